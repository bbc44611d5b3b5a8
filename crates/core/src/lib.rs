pub mod calendar;
pub mod config;
pub mod domain;
pub mod forecast;
pub mod ledger;
pub mod protocol;
pub mod routing;
pub mod trace;

pub use calendar::{DateParseError, DayKey};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, ConfirmationPolicy, LoadOptions, LogFormat,
};
pub use domain::message::{ConversationMessage, MessagePayload, Role, SessionId, ToolCallRecord};
pub use domain::proposal::{MacroStage, PendingProposal, PlannedCall};
pub use domain::record::{
    DailyRecord, InventorySummary, PlanSuggestion, QuantitySummary, RecordPatch,
};
pub use forecast::{ForecastError, ForecastMethod};
pub use protocol::{
    ConfirmationProtocol, ProtocolAction, ProtocolEngine, ProtocolError, ProtocolEvent,
    ProtocolState, TransitionOutcome,
};
pub use routing::{ReplyKind, RoutingAmbiguityError, SpecialistKind};
pub use trace::{
    InMemoryTraceSink, NoopTraceSink, TraceContext, TraceEvent, TraceOutcome, TraceSink, TraceStage,
};
