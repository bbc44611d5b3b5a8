pub mod engine;
pub mod states;

pub use engine::{ConfirmationProtocol, ProtocolDefinition, ProtocolEngine, ProtocolError};
pub use states::{ProtocolAction, ProtocolEvent, ProtocolState, TransitionOutcome};
