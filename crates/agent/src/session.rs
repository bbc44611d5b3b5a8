use stocky_core::domain::message::{ConversationMessage, MessagePayload, Role, SessionId};
use stocky_core::domain::proposal::PendingProposal;
use stocky_core::protocol::ProtocolState;

/// What the runtime carries for one conversation between turns.
///
/// Only `Idle` and `AwaitingConfirmation` survive across turns; the rest of
/// the protocol walk happens inside a single `handle_turn` call. The state is
/// always reconstructible from the transcript, which is what makes a pending
/// confirmation survive a process restart.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub session_id: SessionId,
    pub turn: u64,
    pub protocol: ProtocolState,
    pub pending: Option<PendingProposal>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id, turn: 0, protocol: ProtocolState::Idle, pending: None }
    }

    /// Rebuilds the state from a replayed transcript.
    ///
    /// A proposal payload on the final agent row means the conversation
    /// stopped while suspended for confirmation; a later agent row without
    /// one means the proposal was executed, revised away or abandoned.
    pub fn replay(session_id: SessionId, history: &[ConversationMessage]) -> Self {
        let turn = history.iter().filter(|message| message.role == Role::User).count() as u64;
        let pending = history
            .iter()
            .rev()
            .find(|message| message.role == Role::Agent)
            .and_then(|message| match &message.payload {
                Some(MessagePayload::Proposal(proposal)) => Some(proposal.clone()),
                _ => None,
            });
        let protocol = if pending.is_some() {
            ProtocolState::AwaitingConfirmation
        } else {
            ProtocolState::Idle
        };

        Self { session_id, turn, protocol, pending }
    }
}
