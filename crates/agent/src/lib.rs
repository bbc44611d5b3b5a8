//! Conversational runtime: triage, specialists, and the confirmation gate.
//!
//! This crate is the conversational layer over the daily supply-chain series:
//! - Triage routes each user turn to one specialist (production planner,
//!   demand planner, data steward) with a deterministic keyword classifier.
//! - Specialists drive a completion capability that either answers directly
//!   or requests tool calls from the specialist's binding.
//! - Every write walks the confirm-before-write protocol: the runtime tells
//!   the user exactly which calls it intends to run and executes them only
//!   after an explicit affirmative reply.
//!
//! # Key Types
//!
//! - `ChatRuntime` - per-turn orchestrator (see `runtime`)
//! - `CompletionCapability` - the model boundary; `OpenAiCapability` speaks
//!   the chat-completions wire format, `ScriptedCapability` replays fixtures
//! - `ToolLayer` - catalog execution with binding and mutation-grant checks
//!
//! # Safety Principle
//!
//! The model is strictly a translator. It never touches storage on its own:
//! the deterministic runtime owns routing, the confirmation gate, and every
//! tool execution, which is what makes the gate testable without a model.

pub mod llm;
pub mod openai;
pub mod runtime;
pub mod session;
pub mod specialists;
pub mod tools;
