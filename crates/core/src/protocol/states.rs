use serde::{Deserialize, Serialize};

/// Where a specialist stands in the confirm-before-write protocol.
///
/// `Proposing` and `Executing` are transient within a turn; only `Idle` and
/// `AwaitingConfirmation` are ever observable between turns (the latter
/// persisted through the transcript's pending-proposal row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Idle,
    Proposing,
    AwaitingConfirmation,
    Executing,
}

impl ProtocolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Proposing => "proposing",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Executing => "executing",
        }
    }

    /// Mutating tools are only accepted in `Executing`.
    pub fn permits_mutation(&self) -> bool {
        matches!(self, Self::Executing)
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// The task needs a mutating tool (or a forecast run).
    MutationPlanned,
    /// The proposal text was emitted to the user.
    ProposalDelivered,
    /// Explicit affirmative reply.
    ConfirmationReceived,
    /// Non-affirmative reply carrying adjusted parameters or a question.
    RevisionRequested,
    /// Rejection, or an unrelated request that supersedes the proposal.
    ProposalAbandoned,
    /// All pending calls ran and the outcome was reported.
    ExecutionFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolAction {
    ComposeProposal,
    SuspendForUser,
    RunPendingCalls,
    DiscardPending,
    ReportOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ProtocolState,
    pub to: ProtocolState,
    pub event: ProtocolEvent,
    pub actions: Vec<ProtocolAction>,
}
