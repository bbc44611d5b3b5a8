use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry of the conversation sent to the model. `tool_calls` is only
/// populated on assistant entries that requested tools; `tool_call_id` only on
/// tool entries carrying a result back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn assistant_calls(calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }
}

/// A completion request: the rebuilt conversation plus the tool schemas the
/// addressed specialist is allowed to see.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// A tool call requested by the model, arguments already parsed to JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self { call_id: call_id.into(), tool: tool.into(), arguments }
    }
}

/// What the model decided: answer the user directly, or call tools first.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatOutcome {
    Reply(String),
    ToolCalls(Vec<ToolInvocation>),
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned status {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("malformed completion: {0}")]
    Malformed(String),
    #[error("no completion api key configured")]
    MissingApiKey,
}

/// The boundary behind which the model lives. Everything above this trait is
/// deterministic and is tested against scripted outcomes.
#[async_trait]
pub trait CompletionCapability: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome, CompletionError>;
}

/// Replays a fixed sequence of outcomes and records every request it saw.
#[derive(Default)]
pub struct ScriptedCapability {
    outcomes: Mutex<VecDeque<ChatOutcome>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedCapability {
    pub fn new(outcomes: impl IntoIterator<Item = ChatOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CompletionCapability for ScriptedCapability {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome, CompletionError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.outcomes.lock() {
            Ok(mut outcomes) => outcomes.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.ok_or_else(|| CompletionError::Malformed("scripted outcomes exhausted".to_string()))
    }
}
