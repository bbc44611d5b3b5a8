//! Per-turn orchestration: triage, the confirmation gate, and execution.
//!
//! `ChatRuntime` owns everything deterministic about a turn. The model only
//! ever chooses between answering in prose and requesting tool calls; the
//! runtime routes the turn, executes read-only calls on the spot, converts
//! mutating calls into a plain-language proposal, and runs them only after
//! the user's explicit yes. Every step lands in the transcript, which is the
//! sole source of truth when a session is reopened.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use stocky_core::config::{AgentConfig, ConfirmationPolicy};
use stocky_core::domain::message::{MessagePayload, Role, SessionId, ToolCallRecord};
use stocky_core::domain::proposal::{MacroStage, PendingProposal, PlannedCall};
use stocky_core::forecast::{ForecastMethod, DEFAULT_PERIODS};
use stocky_core::protocol::{
    ConfirmationProtocol, ProtocolEngine, ProtocolError, ProtocolEvent, ProtocolState,
};
use stocky_core::routing::{self, ReplyKind, RoutingAmbiguityError, SpecialistKind};
use stocky_core::trace::{
    NoopTraceSink, TraceContext, TraceEvent, TraceOutcome, TraceSink, TraceStage,
};
use stocky_db::{RecordStore, StorageError, TranscriptStore};

use crate::llm::{
    ChatMessage, ChatOutcome, ChatRequest, CompletionCapability, CompletionError, ToolInvocation,
};
use crate::session::SessionState;
use crate::specialists;
use crate::tools::{self, ToolLayer};

/// Directive prefix for the composite forecast-then-plan flow. The remainder
/// of the line is carried to the demand stage as context.
pub const FORECAST_PLAN_PREFIX: &str = "/forecast-plan:";

const PLAN_STAGE_REQUEST: &str = "The demand forecast has been stored. Check the series for \
                                  stockout days and update the production plan so each one is \
                                  covered.";

const CANCELLED_REPLY: &str = "Understood, I have cancelled that. Nothing was changed.";

const ROUND_BUDGET_REPLY: &str = "I could not finish that within the allowed number of tool \
                                  calls. Please try a narrower request.";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// What one call to `handle_turn` produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutput {
    pub reply: String,
    pub state: ProtocolState,
}

impl TurnOutput {
    pub fn awaiting_confirmation(&self) -> bool {
        self.state == ProtocolState::AwaitingConfirmation
    }
}

enum ToolRun {
    Completed(Value),
    Failed(String),
}

pub struct ChatRuntime {
    capability: Arc<dyn CompletionCapability>,
    tools: ToolLayer,
    transcript: Arc<dyn TranscriptStore>,
    engine: ProtocolEngine<ConfirmationProtocol>,
    config: AgentConfig,
    sink: Arc<dyn TraceSink>,
}

impl ChatRuntime {
    pub fn new(
        capability: Arc<dyn CompletionCapability>,
        records: Arc<dyn RecordStore>,
        transcript: Arc<dyn TranscriptStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            capability,
            tools: ToolLayer::new(records),
            transcript,
            engine: ProtocolEngine::default(),
            config,
            sink: Arc::new(NoopTraceSink),
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Rebuilds the session from its transcript. A proposal left unresolved
    /// on the final agent row resumes in `AwaitingConfirmation`.
    pub async fn open_session(&self, session_id: SessionId) -> Result<SessionState, RuntimeError> {
        let history = self.transcript.history(&session_id).await?;
        let state = SessionState::replay(session_id, &history);
        if state.protocol == ProtocolState::AwaitingConfirmation {
            tracing::info!(
                session = %state.session_id,
                turn = state.turn,
                "session resumed with a pending confirmation"
            );
        }
        Ok(state)
    }

    /// Handles one user turn end to end and returns the reply to show.
    ///
    /// Turns are strictly sequential per session: the state handed in must be
    /// the one the previous call left behind (or a fresh replay).
    pub async fn handle_turn(
        &self,
        state: &mut SessionState,
        input: &str,
    ) -> Result<TurnOutput, RuntimeError> {
        state.turn += 1;
        let context = TraceContext::new(state.session_id.clone(), state.turn, "triage");
        self.sink.emit(
            TraceEvent::new(
                &context,
                "session.turn_started",
                TraceStage::Session,
                TraceOutcome::Success,
            )
            .with_metadata("protocol", state.protocol.as_str()),
        );
        tracing::debug!(session = %state.session_id, turn = state.turn, "turn received");

        // A turn that failed mid-walk can leave `Proposing` or `Executing`
        // behind; close that walk before reading the new input.
        self.settle_protocol(state, &context)?;
        self.transcript.append(&state.session_id, Role::User, input, None).await?;

        if state.protocol == ProtocolState::AwaitingConfirmation {
            self.resume_pending(state, input, &context).await
        } else {
            self.fresh_request(state, input, &context).await
        }
    }

    async fn fresh_request(
        &self,
        state: &mut SessionState,
        input: &str,
        context: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        if let Some(remainder) = macro_remainder(input) {
            self.sink.emit(
                TraceEvent::new(
                    context,
                    "triage.macro_detected",
                    TraceStage::Routing,
                    TraceOutcome::Success,
                )
                .with_metadata("directive", "forecast-plan"),
            );
            let mut seed = self.capability_seed(&state.session_id).await?;
            // The raw directive line is kept in the transcript but the model
            // gets the rendered stage request instead.
            seed.pop();
            seed.push(ChatMessage::user(forecast_stage_request(remainder)));
            return self
                .run_specialist(
                    state,
                    SpecialistKind::Demand,
                    seed,
                    Some(MacroStage::PlanStockouts),
                    context,
                )
                .await;
        }

        match routing::classify(input) {
            Ok(specialist) => {
                self.sink.emit(
                    TraceEvent::new(
                        context,
                        "triage.routed",
                        TraceStage::Routing,
                        TraceOutcome::Success,
                    )
                    .with_metadata("specialist", specialist.as_str()),
                );
                tracing::debug!(specialist = %specialist, "request routed");
                let seed = self.capability_seed(&state.session_id).await?;
                self.run_specialist(state, specialist, seed, None, context).await
            }
            Err(error) => {
                self.sink.emit(
                    TraceEvent::new(
                        context,
                        "triage.rejected",
                        TraceStage::Routing,
                        TraceOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
                self.finish_reply(state, clarification_reply(&error), context).await
            }
        }
    }

    async fn resume_pending(
        &self,
        state: &mut SessionState,
        input: &str,
        context: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        // Replay keeps the pending proposal and the state in step; if a
        // caller hands us a drifted pair, recover as a fresh request.
        let Some(pending) = state.pending.clone() else {
            let outcome = self.engine.apply_with_trace(
                state.protocol,
                ProtocolEvent::ProposalAbandoned,
                self.sink.as_ref(),
                context,
            )?;
            state.protocol = outcome.to;
            return self.fresh_request(state, input, context).await;
        };
        let actor = context.with_actor(pending.specialist.as_str());

        match routing::classify_reply(input) {
            ReplyKind::Affirmative => self.execute_pending(state, pending, context).await,
            ReplyKind::Negative => {
                let outcome = self.engine.apply_with_trace(
                    state.protocol,
                    ProtocolEvent::ProposalAbandoned,
                    self.sink.as_ref(),
                    &actor,
                )?;
                state.protocol = outcome.to;
                state.pending = None;
                tracing::info!(specialist = %pending.specialist, "proposal cancelled");
                self.finish_reply(state, CANCELLED_REPLY.to_string(), &actor).await
            }
            ReplyKind::Other => {
                if let Ok(redirect) = routing::classify(input) {
                    if redirect != pending.specialist {
                        self.sink.emit(
                            TraceEvent::new(
                                context,
                                "triage.redirected",
                                TraceStage::Routing,
                                TraceOutcome::Success,
                            )
                            .with_metadata("from", pending.specialist.as_str())
                            .with_metadata("to", redirect.as_str()),
                        );
                        let outcome = self.engine.apply_with_trace(
                            state.protocol,
                            ProtocolEvent::ProposalAbandoned,
                            self.sink.as_ref(),
                            &actor,
                        )?;
                        state.protocol = outcome.to;
                        state.pending = None;
                        let seed = self.capability_seed(&state.session_id).await?;
                        return self.run_specialist(state, redirect, seed, None, context).await;
                    }
                }

                let outcome = self.engine.apply_with_trace(
                    state.protocol,
                    ProtocolEvent::RevisionRequested,
                    self.sink.as_ref(),
                    &actor,
                )?;
                state.protocol = outcome.to;
                state.pending = None;
                let seed = self.capability_seed(&state.session_id).await?;
                self.run_specialist(state, pending.specialist, seed, pending.followup, context)
                    .await
            }
        }
    }

    /// Drives one specialist over the capability until it answers, suspends
    /// a proposal, or runs out of tool rounds. Read-only calls execute
    /// immediately and their results go back into the conversation; a batch
    /// containing any mutating call suspends as a whole unless the protocol
    /// state already grants execution (the single-confirmation macro stage).
    async fn run_specialist(
        &self,
        state: &mut SessionState,
        specialist: SpecialistKind,
        seed: Vec<ChatMessage>,
        followup: Option<MacroStage>,
        context: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        let actor = context.with_actor(specialist.as_str());
        let profile = specialists::profile(specialist);
        let specs = specialists::toolset_specs(specialist);
        let mut messages = Vec::with_capacity(seed.len() + 1);
        messages.push(ChatMessage::system(profile.instructions));
        messages.extend(seed);

        for _ in 0..self.config.max_tool_rounds {
            let request = ChatRequest { messages: messages.clone(), tools: specs.clone() };
            match self.capability.complete(request).await? {
                ChatOutcome::Reply(text) => return self.finish_reply(state, text, &actor).await,
                ChatOutcome::ToolCalls(calls) => {
                    if !state.protocol.permits_mutation()
                        && calls.iter().any(|call| tools::is_mutating(&call.tool))
                    {
                        return self
                            .suspend_for_confirmation(state, specialist, calls, followup, &actor)
                            .await;
                    }
                    messages.push(ChatMessage::assistant_calls(calls.clone()));
                    for call in &calls {
                        let content = match self
                            .run_tool(state, specialist, &call.tool, &call.arguments, &actor)
                            .await?
                        {
                            ToolRun::Completed(outcome) => outcome.to_string(),
                            ToolRun::Failed(detail) => json!({"error": detail}).to_string(),
                        };
                        messages.push(ChatMessage::tool_result(call.call_id.clone(), content));
                    }
                }
            }
        }

        tracing::warn!(specialist = %specialist, rounds = self.config.max_tool_rounds, "tool round budget exhausted");
        self.finish_reply(state, ROUND_BUDGET_REPLY.to_string(), &actor).await
    }

    async fn suspend_for_confirmation(
        &self,
        state: &mut SessionState,
        specialist: SpecialistKind,
        calls: Vec<ToolInvocation>,
        followup: Option<MacroStage>,
        actor: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        // A revision re-enters here from `Proposing`; only a fresh walk
        // needs the first transition.
        if state.protocol == ProtocolState::Idle {
            let outcome = self.engine.apply_with_trace(
                state.protocol,
                ProtocolEvent::MutationPlanned,
                self.sink.as_ref(),
                actor,
            )?;
            state.protocol = outcome.to;
        }

        let planned: Vec<PlannedCall> =
            calls.into_iter().map(|call| PlannedCall::new(call.tool, call.arguments)).collect();
        let summary = summarize_calls(&planned);
        let mut proposal = PendingProposal::new(specialist, summary, planned);
        if let Some(stage) = followup {
            proposal = proposal.with_followup(stage);
        }

        let outcome = self.engine.apply_with_trace(
            state.protocol,
            ProtocolEvent::ProposalDelivered,
            self.sink.as_ref(),
            actor,
        )?;
        state.protocol = outcome.to;

        let reply = confirmation_prompt(&proposal);
        let payload = MessagePayload::Proposal(proposal.clone());
        self.transcript.append(&state.session_id, Role::Agent, &reply, Some(&payload)).await?;
        state.pending = Some(proposal);
        tracing::info!(specialist = %specialist, "proposal suspended for confirmation");

        Ok(TurnOutput { reply, state: state.protocol })
    }

    async fn execute_pending(
        &self,
        state: &mut SessionState,
        proposal: PendingProposal,
        context: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        let actor = context.with_actor(proposal.specialist.as_str());
        let outcome = self.engine.apply_with_trace(
            state.protocol,
            ProtocolEvent::ConfirmationReceived,
            self.sink.as_ref(),
            &actor,
        )?;
        state.protocol = outcome.to;
        state.pending = None;

        let mut lines = Vec::with_capacity(proposal.calls.len());
        let mut failed = false;
        let mut skipped = 0usize;
        for (index, call) in proposal.calls.iter().enumerate() {
            match self
                .run_tool(state, proposal.specialist, &call.tool, &call.arguments, &actor)
                .await?
            {
                ToolRun::Completed(result) => {
                    lines.push(format!(
                        "- {}: {}",
                        describe_call(call),
                        render_result(&call.tool, &result)
                    ));
                }
                ToolRun::Failed(detail) => {
                    lines.push(format!("- {}: failed ({detail})", describe_call(call)));
                    failed = true;
                    skipped = proposal.calls.len() - index - 1;
                    break;
                }
            }
        }

        let mut report = String::from(if failed { "That did not complete:" } else { "Done:" });
        for line in &lines {
            report.push('\n');
            report.push_str(line);
        }
        if skipped == 1 {
            report.push_str("\nThe remaining step was not run.");
        } else if skipped > 1 {
            report.push_str(&format!("\nThe {skipped} remaining steps were not run."));
        }

        match proposal.followup {
            Some(MacroStage::PlanStockouts) if !failed => {
                if self.config.confirmation == ConfirmationPolicy::PerSpecialist {
                    let outcome = self.engine.apply_with_trace(
                        state.protocol,
                        ProtocolEvent::ExecutionFinished,
                        self.sink.as_ref(),
                        &actor,
                    )?;
                    state.protocol = outcome.to;
                }
                self.transcript.append(&state.session_id, Role::Agent, &report, None).await?;

                // Under the single-confirmation policy the protocol is still
                // `Executing` here, so the production stage writes without a
                // second gate; otherwise it proposes and suspends again.
                let mut seed = self.capability_seed(&state.session_id).await?;
                seed.push(ChatMessage::user(PLAN_STAGE_REQUEST));
                let stage = self
                    .run_specialist(state, SpecialistKind::Production, seed, None, context)
                    .await?;
                Ok(TurnOutput {
                    reply: format!("{report}\n\n{}", stage.reply),
                    state: stage.state,
                })
            }
            _ => {
                let outcome = self.engine.apply_with_trace(
                    state.protocol,
                    ProtocolEvent::ExecutionFinished,
                    self.sink.as_ref(),
                    &actor,
                )?;
                state.protocol = outcome.to;
                self.transcript.append(&state.session_id, Role::Agent, &report, None).await?;
                Ok(TurnOutput { reply: report, state: state.protocol })
            }
        }
    }

    async fn run_tool(
        &self,
        state: &SessionState,
        specialist: SpecialistKind,
        tool: &str,
        arguments: &Value,
        actor: &TraceContext,
    ) -> Result<ToolRun, RuntimeError> {
        match self.tools.invoke(specialist, state.protocol, tool, arguments).await {
            Ok(outcome) => {
                self.sink.emit(
                    TraceEvent::new(actor, "tool.invoked", TraceStage::Tool, TraceOutcome::Success)
                        .with_metadata("tool", tool),
                );
                let record = ToolCallRecord {
                    tool: tool.to_string(),
                    arguments: arguments.clone(),
                    outcome: outcome.clone(),
                };
                self.transcript
                    .append(
                        &state.session_id,
                        Role::Tool,
                        tool,
                        Some(&MessagePayload::ToolCall(record)),
                    )
                    .await?;
                Ok(ToolRun::Completed(outcome))
            }
            Err(error) => {
                self.sink.emit(
                    TraceEvent::new(actor, "tool.failed", TraceStage::Tool, TraceOutcome::Failed)
                        .with_metadata("tool", tool)
                        .with_metadata("error", error.to_string()),
                );
                tracing::warn!(tool, error = %error, "tool call failed");
                Ok(ToolRun::Failed(error.to_string()))
            }
        }
    }

    async fn finish_reply(
        &self,
        state: &mut SessionState,
        reply: String,
        actor: &TraceContext,
    ) -> Result<TurnOutput, RuntimeError> {
        self.settle_protocol(state, actor)?;
        state.pending = None;
        self.transcript.append(&state.session_id, Role::Agent, &reply, None).await?;
        Ok(TurnOutput { reply, state: state.protocol })
    }

    /// Closes an open protocol walk so the turn always ends in `Idle` or
    /// `AwaitingConfirmation`, the only two states that persist.
    fn settle_protocol(
        &self,
        state: &mut SessionState,
        actor: &TraceContext,
    ) -> Result<(), RuntimeError> {
        let event = match state.protocol {
            ProtocolState::Proposing => ProtocolEvent::ProposalAbandoned,
            ProtocolState::Executing => ProtocolEvent::ExecutionFinished,
            _ => return Ok(()),
        };
        let outcome =
            self.engine.apply_with_trace(state.protocol, event, self.sink.as_ref(), actor)?;
        state.protocol = outcome.to;
        Ok(())
    }

    /// The conversation as the model sees it: user and agent rows as plain
    /// chat entries, tool rows skipped (their results were already folded in
    /// during the turn that ran them).
    async fn capability_seed(
        &self,
        session: &SessionId,
    ) -> Result<Vec<ChatMessage>, RuntimeError> {
        let history = self.transcript.history(session).await?;
        Ok(history
            .iter()
            .filter_map(|row| match row.role {
                Role::User => Some(ChatMessage::user(row.content.clone())),
                Role::Agent => Some(ChatMessage::assistant(row.content.clone())),
                Role::Tool => None,
            })
            .collect())
    }
}

fn macro_remainder(input: &str) -> Option<&str> {
    let trimmed = input.trim_start();
    let head = trimmed.get(..FORECAST_PLAN_PREFIX.len())?;
    if head.eq_ignore_ascii_case(FORECAST_PLAN_PREFIX) {
        Some(trimmed[FORECAST_PLAN_PREFIX.len()..].trim())
    } else {
        None
    }
}

fn forecast_stage_request(context: &str) -> String {
    let mut request = String::from("Calculate and store a demand forecast for the coming days.");
    if !context.is_empty() {
        request.push(' ');
        request.push_str(context);
    }
    request
}

fn clarification_reply(error: &RoutingAmbiguityError) -> String {
    match error {
        RoutingAmbiguityError::OffTopic => "I can help with production planning, demand and \
                                            forecasting, or demo data management. Which of those \
                                            do you need?"
            .to_string(),
        RoutingAmbiguityError::Tied { first, second } => format!(
            "That request could go to the {} or the {}. Could you narrow it down to one of them?",
            first.label(),
            second.label()
        ),
    }
}

fn summarize_calls(calls: &[PlannedCall]) -> String {
    calls.iter().map(describe_call).collect::<Vec<_>>().join("; ")
}

fn confirmation_prompt(proposal: &PendingProposal) -> String {
    let mut text =
        format!("As the {}, here is what I intend to do:", proposal.specialist.label());
    for call in &proposal.calls {
        text.push_str("\n- ");
        text.push_str(&describe_call(call));
    }
    text.push_str("\n\nReply yes to proceed or no to cancel.");
    text
}

/// One proposal line per planned call, in the user's vocabulary. Arguments
/// come straight from the model and may be missing or mistyped, so rendering
/// never assumes a field is present.
fn describe_call(call: &PlannedCall) -> String {
    let args = &call.arguments;
    match call.tool.as_str() {
        tools::UPDATE_DEMAND => {
            format!("set demand for {} to {}", arg_text(args, "date"), arg_text(args, "demand"))
        }
        tools::UPDATE_PRODUCTION_PLAN => format!(
            "set the production plan for {} to {}",
            arg_text(args, "date"),
            arg_text(args, "plan")
        ),
        tools::INCREASE_ALL_DEMAND => {
            format!("increase every stored day's demand by {}", arg_text(args, "offset"))
        }
        tools::CALCULATE_DEMAND_FORECAST => {
            let method = args
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or(ForecastMethod::default().as_str());
            let periods =
                args.get("periods").and_then(Value::as_u64).unwrap_or(DEFAULT_PERIODS as u64);
            format!("calculate and store a {method} demand forecast covering {periods} days")
        }
        tools::CLEAR_ALL_FORECAST => "clear every stored forecast value".to_string(),
        tools::GENERATE_FUTURE_DATA => format!(
            "generate {} days of demo records starting {}",
            arg_text(args, "days"),
            arg_text(args, "start_date")
        ),
        tools::DELETE_ALL_DATA => "delete every stored day".to_string(),
        other => format!("run {other} with {args}"),
    }
}

fn render_result(tool: &str, outcome: &Value) -> String {
    match tool {
        tools::UPDATE_DEMAND | tools::UPDATE_PRODUCTION_PLAN => {
            match outcome.pointer("/record/inventory").and_then(Value::as_f64) {
                Some(balance) => {
                    format!("saved, that day's inventory balance is now {}", quantity(balance))
                }
                None => "saved".to_string(),
            }
        }
        tools::CALCULATE_DEMAND_FORECAST => {
            let days = outcome.get("days_written").and_then(Value::as_u64).unwrap_or(0);
            match outcome.get("start_day").and_then(Value::as_str) {
                Some(start) => format!("stored {days} forecast days starting {start}"),
                None => format!("stored {days} forecast days"),
            }
        }
        tools::CLEAR_ALL_FORECAST => {
            let days = outcome.get("days_cleared").and_then(Value::as_u64).unwrap_or(0);
            format!("cleared {days} forecast values")
        }
        tools::INCREASE_ALL_DEMAND => {
            let days = outcome.get("days_changed").and_then(Value::as_u64).unwrap_or(0);
            format!("changed {days} days and recomputed inventory")
        }
        tools::GENERATE_FUTURE_DATA => {
            let days = outcome.get("days_generated").and_then(Value::as_u64).unwrap_or(0);
            match (
                outcome.get("first_day").and_then(Value::as_str),
                outcome.get("last_day").and_then(Value::as_str),
            ) {
                (Some(first), Some(last)) => format!("generated {days} days ({first} to {last})"),
                _ => format!("generated {days} days"),
            }
        }
        tools::DELETE_ALL_DATA => {
            let days = outcome.get("days_deleted").and_then(Value::as_u64).unwrap_or(0);
            format!("deleted {days} days")
        }
        _ => "completed".to_string(),
    }
}

fn arg_text(arguments: &Value, key: &str) -> String {
    match arguments.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => match number.as_f64() {
            Some(value) => quantity(value),
            None => number.to_string(),
        },
        Some(other) => other.to_string(),
        None => "?".to_string(),
    }
}

fn quantity(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1.0e12 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use stocky_core::calendar::DayKey;
    use stocky_core::domain::record::DailyRecord;
    use stocky_core::trace::InMemoryTraceSink;
    use stocky_db::{InMemoryRecordStore, InMemoryTranscriptStore};

    use crate::llm::ScriptedCapability;

    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            confirmation: ConfirmationPolicy::PerSpecialist,
            max_tool_rounds: 8,
            trace: false,
        }
    }

    fn day(value: &str) -> DayKey {
        DayKey::parse_iso(value).expect("valid test date")
    }

    fn seeded(date: &str, demand: f64, production: f64) -> DailyRecord {
        let mut record = DailyRecord::new(day(date));
        record.demand = demand;
        record.production = production;
        record
    }

    fn session_state() -> SessionState {
        SessionState::new(SessionId("runtime-test".to_string()))
    }

    struct Harness {
        runtime: ChatRuntime,
        records: Arc<InMemoryRecordStore>,
        transcript: Arc<InMemoryTranscriptStore>,
        capability: Arc<ScriptedCapability>,
        sink: InMemoryTraceSink,
    }

    impl Harness {
        async fn demand_for(&self, date: &str) -> f64 {
            self.records.fetch_day(day(date)).await.expect("fetch").expect("stored day").demand
        }

        async fn production_for(&self, date: &str) -> f64 {
            self.records.fetch_day(day(date)).await.expect("fetch").expect("stored day").production
        }
    }

    async fn harness(outcomes: Vec<ChatOutcome>) -> Harness {
        harness_with_config(outcomes, config()).await
    }

    /// Seeds three days: balances 20, -20, -40, so the last two are
    /// stockouts.
    async fn harness_with_config(outcomes: Vec<ChatOutcome>, config: AgentConfig) -> Harness {
        let records = Arc::new(InMemoryRecordStore::new());
        records
            .store_days(vec![
                seeded("2024-07-01", 100.0, 120.0),
                seeded("2024-07-02", 130.0, 90.0),
                seeded("2024-07-03", 80.0, 60.0),
            ])
            .await
            .expect("seed records");
        let transcript = Arc::new(InMemoryTranscriptStore::new());
        let capability = Arc::new(ScriptedCapability::new(outcomes));
        let sink = InMemoryTraceSink::default();
        let runtime =
            ChatRuntime::new(capability.clone(), records.clone(), transcript.clone(), config)
                .with_trace_sink(Arc::new(sink.clone()));

        Harness { runtime, records, transcript, capability, sink }
    }

    fn demand_update(call_id: &str, demand: f64) -> ChatOutcome {
        ChatOutcome::ToolCalls(vec![ToolInvocation::new(
            call_id,
            tools::UPDATE_DEMAND,
            json!({"date": "2024-07-02", "demand": demand}),
        )])
    }

    #[tokio::test]
    async fn read_only_requests_bypass_the_gate() {
        let h = harness(vec![
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-1",
                tools::GET_STOCKOUTS,
                json!({}),
            )]),
            ChatOutcome::Reply("2024-07-02 and 2024-07-03 are short.".to_string()),
        ])
        .await;
        let mut state = session_state();

        let output =
            h.runtime.handle_turn(&mut state, "which days have a stockout?").await.expect("turn");
        assert_eq!(output.state, ProtocolState::Idle);
        assert_eq!(output.reply, "2024-07-02 and 2024-07-03 are short.");
        assert!(state.pending.is_none());

        // The tool round went back to the model with real results.
        let requests = h.capability.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().expect("tool result message");
        assert!(last.content.contains("stockouts"));
    }

    #[tokio::test]
    async fn mutations_wait_for_an_affirmative_reply() {
        let h = harness(vec![demand_update("call-1", 500.0)]).await;
        let mut state = session_state();

        let first = h
            .runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");
        assert!(first.awaiting_confirmation());
        assert!(first.reply.contains("set demand for 2024-07-02 to 500"));
        assert_eq!(h.demand_for("2024-07-02").await, 130.0);

        let second = h.runtime.handle_turn(&mut state, "yes").await.expect("turn");
        assert_eq!(second.state, ProtocolState::Idle);
        assert!(second.reply.starts_with("Done:"));
        assert_eq!(h.demand_for("2024-07-02").await, 500.0);
    }

    #[tokio::test]
    async fn negative_replies_cancel_without_writing() {
        let h = harness(vec![demand_update("call-1", 500.0)]).await;
        let mut state = session_state();

        h.runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");
        let output = h.runtime.handle_turn(&mut state, "no").await.expect("turn");

        assert_eq!(output.state, ProtocolState::Idle);
        assert!(output.reply.contains("cancelled"));
        assert!(state.pending.is_none());
        assert_eq!(h.demand_for("2024-07-02").await, 130.0);
    }

    #[tokio::test]
    async fn other_replies_revise_the_proposal() {
        let h = harness(vec![demand_update("call-1", 500.0), demand_update("call-2", 600.0)])
            .await;
        let mut state = session_state();

        h.runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");
        let revised =
            h.runtime.handle_turn(&mut state, "make it 600 instead").await.expect("turn");

        assert!(revised.awaiting_confirmation());
        assert!(revised.reply.contains("set demand for 2024-07-02 to 600"));
        // The revision round saw the user's correction as the latest entry.
        let requests = h.capability.requests();
        assert_eq!(requests[1].messages.last().map(|m| m.content.as_str()), Some("make it 600 instead"));

        h.runtime.handle_turn(&mut state, "yes").await.expect("turn");
        assert_eq!(h.demand_for("2024-07-02").await, 600.0);
    }

    #[tokio::test]
    async fn redirected_requests_abandon_the_pending_proposal() {
        let h = harness(vec![
            demand_update("call-1", 500.0),
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-2",
                tools::GENERATE_FUTURE_DATA,
                json!({"start_date": "2024-07-04", "days": 3}),
            )]),
        ])
        .await;
        let mut state = session_state();

        h.runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");
        let output = h
            .runtime
            .handle_turn(&mut state, "generate 30 days of synthetic records")
            .await
            .expect("turn");

        // The demand proposal is gone and the data steward now holds the gate.
        assert!(output.awaiting_confirmation());
        assert_eq!(state.pending.as_ref().map(|p| p.specialist), Some(SpecialistKind::Data));
        assert_eq!(h.demand_for("2024-07-02").await, 130.0);
        assert!(h.sink.labels().iter().any(|label| label == "triage.redirected"));
    }

    #[tokio::test]
    async fn ambiguous_requests_get_a_clarification() {
        let h = harness(vec![]).await;
        let mut state = session_state();

        let off_topic = h.runtime.handle_turn(&mut state, "hello there").await.expect("turn");
        assert_eq!(off_topic.state, ProtocolState::Idle);
        assert!(off_topic.reply.contains("production planning"));

        let tied = h.runtime.handle_turn(&mut state, "demand and production").await.expect("turn");
        assert!(tied.reply.contains("production planner"));
        assert!(tied.reply.contains("demand planner"));

        assert!(h.capability.requests().is_empty());
    }

    #[tokio::test]
    async fn forecast_plan_gates_each_stage_by_default() {
        let h = harness(vec![
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-1",
                tools::CALCULATE_DEMAND_FORECAST,
                json!({"method": "moving_average", "periods": 3}),
            )]),
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-2",
                tools::GET_STOCKOUTS,
                json!({}),
            )]),
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-3",
                tools::UPDATE_PRODUCTION_PLAN,
                json!({"date": "2024-07-02", "plan": 130.0}),
            )]),
        ])
        .await;
        let mut state = session_state();

        let first = h
            .runtime
            .handle_turn(&mut state, "/forecast-plan: cover the coming week")
            .await
            .expect("turn");
        assert!(first.awaiting_confirmation());
        assert_eq!(state.pending.as_ref().map(|p| p.specialist), Some(SpecialistKind::Demand));
        assert_eq!(
            state.pending.as_ref().and_then(|p| p.followup),
            Some(MacroStage::PlanStockouts)
        );

        // One yes runs the forecast, then the production stage proposes its
        // own plan and suspends again.
        let second = h.runtime.handle_turn(&mut state, "yes").await.expect("turn");
        assert!(second.awaiting_confirmation());
        assert!(second.reply.contains("forecast"));
        assert_eq!(state.pending.as_ref().map(|p| p.specialist), Some(SpecialistKind::Production));
        let forecasted =
            h.records.fetch_day(day("2024-07-04")).await.expect("fetch").expect("forecast row");
        assert!(forecasted.forecast.is_some());
        assert_eq!(h.production_for("2024-07-02").await, 90.0);

        let third = h.runtime.handle_turn(&mut state, "yes").await.expect("turn");
        assert_eq!(third.state, ProtocolState::Idle);
        assert_eq!(h.production_for("2024-07-02").await, 130.0);
    }

    #[tokio::test]
    async fn forecast_plan_single_policy_needs_one_yes() {
        let mut single = config();
        single.confirmation = ConfirmationPolicy::Single;
        let h = harness_with_config(
            vec![
                ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                    "call-1",
                    tools::CALCULATE_DEMAND_FORECAST,
                    json!({}),
                )]),
                ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                    "call-2",
                    tools::GET_STOCKOUTS,
                    json!({}),
                )]),
                ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                    "call-3",
                    tools::UPDATE_PRODUCTION_PLAN,
                    json!({"date": "2024-07-02", "plan": 130.0}),
                )]),
                ChatOutcome::Reply("The plan now covers the projected stockouts.".to_string()),
            ],
            single,
        )
        .await;
        let mut state = session_state();

        let first = h.runtime.handle_turn(&mut state, "/forecast-plan:").await.expect("turn");
        assert!(first.awaiting_confirmation());

        let second = h.runtime.handle_turn(&mut state, "yes").await.expect("turn");
        assert_eq!(second.state, ProtocolState::Idle);
        assert!(state.pending.is_none());
        assert!(second.reply.contains("Done:"));
        assert!(second.reply.contains("The plan now covers the projected stockouts."));
        assert_eq!(h.production_for("2024-07-02").await, 130.0);
        let forecasted =
            h.records.fetch_day(day("2024-07-04")).await.expect("fetch").expect("forecast row");
        assert!(forecasted.forecast.is_some());
    }

    #[tokio::test]
    async fn pending_confirmation_survives_a_restart() {
        let h = harness(vec![demand_update("call-1", 500.0)]).await;
        let mut state = session_state();
        h.runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");

        // A second runtime over the same stores, as after a process restart.
        let revived = ChatRuntime::new(
            Arc::new(ScriptedCapability::new([])),
            h.records.clone(),
            h.transcript.clone(),
            config(),
        );
        let mut resumed =
            revived.open_session(state.session_id.clone()).await.expect("open session");
        assert_eq!(resumed.protocol, ProtocolState::AwaitingConfirmation);
        assert_eq!(resumed.turn, 1);

        let output = revived.handle_turn(&mut resumed, "yes").await.expect("turn");
        assert_eq!(output.state, ProtocolState::Idle);
        assert_eq!(h.demand_for("2024-07-02").await, 500.0);
    }

    #[tokio::test]
    async fn tool_failures_fold_back_into_the_loop() {
        let h = harness(vec![
            ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                "call-1",
                tools::GET_DAILY_DATA,
                json!({"date": "not a date"}),
            )]),
            ChatOutcome::Reply("I could not read that date; please give it as YYYY-MM-DD.".to_string()),
        ])
        .await;
        let mut state = session_state();

        let output = h
            .runtime
            .handle_turn(&mut state, "show me the stock data for notaday")
            .await
            .expect("turn");
        assert!(output.reply.contains("YYYY-MM-DD"));

        let requests = h.capability.requests();
        let last = requests[1].messages.last().expect("tool message");
        assert!(last.content.contains("error"));
        // Failed calls leave no tool row behind.
        let history = h.transcript.history(&state.session_id).await.expect("history");
        assert!(history.iter().all(|row| row.role != Role::Tool));
    }

    #[tokio::test]
    async fn the_tool_loop_is_bounded() {
        let mut tight = config();
        tight.max_tool_rounds = 2;
        let h = harness_with_config(
            vec![
                ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                    "call-1",
                    tools::GET_STOCKOUTS,
                    json!({}),
                )]),
                ChatOutcome::ToolCalls(vec![ToolInvocation::new(
                    "call-2",
                    tools::GET_STOCKOUTS,
                    json!({}),
                )]),
            ],
            tight,
        )
        .await;
        let mut state = session_state();

        let output = h
            .runtime
            .handle_turn(&mut state, "check inventory for stockouts")
            .await
            .expect("turn");
        assert_eq!(output.state, ProtocolState::Idle);
        assert!(output.reply.contains("tool calls"));
        assert_eq!(h.capability.requests().len(), 2);
    }

    #[tokio::test]
    async fn trace_mode_surfaces_the_whole_turn() {
        let h = harness(vec![demand_update("call-1", 500.0)]).await;
        let mut state = session_state();

        h.runtime
            .handle_turn(&mut state, "set demand for 2024-07-02 to 500")
            .await
            .expect("turn");
        h.runtime.handle_turn(&mut state, "yes").await.expect("turn");

        let labels = h.sink.labels();
        for expected in
            ["session.turn_started", "triage.routed", "protocol.transition_applied", "tool.invoked"]
        {
            assert!(labels.iter().any(|label| label == expected), "missing {expected}: {labels:?}");
        }
        // Idle -> Proposing -> AwaitingConfirmation -> Executing -> Idle.
        let transitions =
            labels.iter().filter(|label| *label == "protocol.transition_applied").count();
        assert_eq!(transitions, 4);
    }

    #[test]
    fn macro_prefix_detection_is_case_insensitive() {
        assert_eq!(macro_remainder("/forecast-plan: next week"), Some("next week"));
        assert_eq!(macro_remainder("  /Forecast-Plan:"), Some(""));
        assert_eq!(macro_remainder("forecast the plan"), None);
    }

    #[test]
    fn proposals_read_as_plain_sentences() {
        let update = PlannedCall::new(
            tools::UPDATE_DEMAND,
            json!({"date": "2024-07-10", "demand": 500.0}),
        );
        assert_eq!(describe_call(&update), "set demand for 2024-07-10 to 500");

        let forecast = PlannedCall::new(tools::CALCULATE_DEMAND_FORECAST, json!({}));
        assert_eq!(
            describe_call(&forecast),
            "calculate and store a moving_average demand forecast covering 7 days"
        );
    }
}
