use thiserror::Error;

use crate::protocol::states::{ProtocolAction, ProtocolEvent, ProtocolState, TransitionOutcome};
use crate::trace::{TraceContext, TraceEvent, TraceOutcome, TraceSink, TraceStage};

pub trait ProtocolDefinition {
    fn initial_state(&self) -> ProtocolState;
    fn transition(
        &self,
        current: ProtocolState,
        event: ProtocolEvent,
    ) -> Result<TransitionOutcome, ProtocolError>;
}

/// The confirm-before-write protocol every specialist runs: a task that needs
/// a mutating tool is proposed in plain language, suspended for the user, and
/// executed only after an explicit affirmative reply.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfirmationProtocol;

impl ProtocolDefinition for ConfirmationProtocol {
    fn initial_state(&self) -> ProtocolState {
        ProtocolState::Idle
    }

    fn transition(
        &self,
        current: ProtocolState,
        event: ProtocolEvent,
    ) -> Result<TransitionOutcome, ProtocolError> {
        transition_confirmation(current, event)
    }
}

pub struct ProtocolEngine<P> {
    protocol: P,
}

impl<P> ProtocolEngine<P>
where
    P: ProtocolDefinition,
{
    pub fn new(protocol: P) -> Self {
        Self { protocol }
    }

    pub fn initial_state(&self) -> ProtocolState {
        self.protocol.initial_state()
    }

    pub fn apply(
        &self,
        current: ProtocolState,
        event: ProtocolEvent,
    ) -> Result<TransitionOutcome, ProtocolError> {
        self.protocol.transition(current, event)
    }

    pub fn apply_with_trace<S>(
        &self,
        current: ProtocolState,
        event: ProtocolEvent,
        sink: &S,
        context: &TraceContext,
    ) -> Result<TransitionOutcome, ProtocolError>
    where
        S: TraceSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => sink.emit(
                TraceEvent::new(
                    context,
                    "protocol.transition_applied",
                    TraceStage::Protocol,
                    TraceOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("event", format!("{:?}", outcome.event)),
            ),
            Err(error) => sink.emit(
                TraceEvent::new(
                    context,
                    "protocol.transition_rejected",
                    TraceStage::Protocol,
                    TraceOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}

impl Default for ProtocolEngine<ConfirmationProtocol> {
    fn default() -> Self {
        Self::new(ConfirmationProtocol)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("event {event:?} is not valid in state {state}")]
    InvalidTransition { state: ProtocolState, event: ProtocolEvent },
}

fn transition_confirmation(
    current: ProtocolState,
    event: ProtocolEvent,
) -> Result<TransitionOutcome, ProtocolError> {
    use ProtocolAction::{
        ComposeProposal, DiscardPending, ReportOutcome, RunPendingCalls, SuspendForUser,
    };
    use ProtocolEvent::{
        ConfirmationReceived, ExecutionFinished, MutationPlanned, ProposalAbandoned,
        ProposalDelivered, RevisionRequested,
    };
    use ProtocolState::{AwaitingConfirmation, Executing, Idle, Proposing};

    let (to, actions) = match (current, event) {
        (Idle, MutationPlanned) => (Proposing, vec![ComposeProposal]),
        (Proposing, ProposalDelivered) => (AwaitingConfirmation, vec![SuspendForUser]),
        (Proposing, ProposalAbandoned) => (Idle, vec![DiscardPending]),
        (AwaitingConfirmation, ConfirmationReceived) => (Executing, vec![RunPendingCalls]),
        (AwaitingConfirmation, RevisionRequested) => (Proposing, vec![ComposeProposal]),
        (AwaitingConfirmation, ProposalAbandoned) => (Idle, vec![DiscardPending]),
        (Executing, ExecutionFinished) => (Idle, vec![ReportOutcome]),
        _ => return Err(ProtocolError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
