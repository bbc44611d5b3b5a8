use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use stocky_core::config::LlmConfig;

use crate::llm::{
    ChatMessage, ChatOutcome, ChatRequest, ChatRole, CompletionCapability, CompletionError,
    ToolInvocation,
};

const OPENAI_PUBLIC_BASE_URL: &str = "https://api.openai.com/v1";
const RETRY_BASE_DELAY_MS: u64 = 250;

/// OpenAI-compatible chat completions client. Works against the public API
/// or any self-hosted endpoint speaking the same wire format; a key is only
/// required for the public endpoint.
pub struct OpenAiCapability {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OpenAiCapability {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        if !config.has_api_key() && config.base_url == OPENAI_PUBLIC_BASE_URL {
            return Err(CompletionError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(&request.messages),
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters,
                        },
                    })
                })
                .collect();
            if let Some(object) = body.as_object_mut() {
                object.insert("tools".to_string(), Value::Array(tools));
                object.insert("tool_choice".to_string(), Value::String("auto".to_string()));
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<ChatOutcome, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(CompletionError::Api { status: status.as_u16(), detail });
        }

        let wire: ChatCompletionWire = response.json().await?;
        outcome_from_wire(wire)
    }
}

#[async_trait]
impl CompletionCapability for OpenAiCapability {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome, CompletionError> {
        let body = self.request_body(&request);
        let mut attempt: u32 = 0;
        loop {
            match self.send(&body).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if attempt < self.max_retries && retryable(&error) => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY_MS << (attempt - 1).min(4);
                    tracing::debug!(attempt, delay_ms = delay, %error, "retrying completion");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message.role {
            ChatRole::Assistant if !message.tool_calls.is_empty() => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.tool,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                let content =
                    if message.content.is_empty() { Value::Null } else { json!(message.content) };
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            ChatRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.content,
            }),
            role => json!({"role": role.as_str(), "content": message.content}),
        })
        .collect()
}

fn outcome_from_wire(wire: ChatCompletionWire) -> Result<ChatOutcome, CompletionError> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Malformed("response had no choices".to_string()))?;

    if let Some(calls) = choice.message.tool_calls {
        if !calls.is_empty() {
            let invocations = calls
                .into_iter()
                .map(|call| {
                    // Models occasionally emit arguments that are not valid
                    // JSON; keep the raw text so the tool layer can reject it
                    // with a usable message.
                    let arguments = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::String(call.function.arguments));
                    ToolInvocation::new(call.id, call.function.name, arguments)
                })
                .collect();
            return Ok(ChatOutcome::ToolCalls(invocations));
        }
    }

    Ok(ChatOutcome::Reply(choice.message.content.unwrap_or_default()))
}

fn retryable(error: &CompletionError) -> bool {
    match error {
        CompletionError::Transport(_) => true,
        CompletionError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionWire {
    choices: Vec<ChoiceWire>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    message: MessageWire,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallWire>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallWire {
    id: String,
    function: FunctionWire,
}

#[derive(Debug, Deserialize)]
struct FunctionWire {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools;

    fn capability() -> OpenAiCapability {
        let config = LlmConfig {
            api_key: None,
            base_url: "http://localhost:11434/v1".to_string(),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        };
        OpenAiCapability::from_config(&config).expect("local endpoint needs no key")
    }

    #[test]
    fn public_endpoint_without_key_is_refused() {
        let config = LlmConfig {
            api_key: None,
            base_url: OPENAI_PUBLIC_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        };
        assert!(matches!(
            OpenAiCapability::from_config(&config),
            Err(CompletionError::MissingApiKey)
        ));
    }

    #[test]
    fn request_body_carries_model_messages_and_tool_schemas() {
        let capability = capability();
        let request = ChatRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("any stockouts?")],
            tools: tools::catalog()
                .into_iter()
                .filter(|spec| spec.name == tools::GET_STOCKOUTS)
                .collect(),
        };

        let body = capability.request_body(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "any stockouts?");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_stockouts");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn assistant_tool_calls_round_trip_to_wire_form() {
        let calls = vec![ToolInvocation::new(
            "call-9",
            "update_demand",
            serde_json::json!({"date": "2024-07-10", "demand": 500.0}),
        )];
        let messages = vec![
            ChatMessage::assistant_calls(calls),
            ChatMessage::tool_result("call-9", "{\"ok\":true}"),
        ];

        let wire = wire_messages(&messages);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"], Value::Null);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call-9");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "update_demand");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call-9");
    }

    #[test]
    fn text_choice_parses_to_a_reply() {
        let wire: ChatCompletionWire = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "all good"}}]
        }))
        .expect("valid wire shape");

        let outcome = outcome_from_wire(wire).expect("parsable");
        assert_eq!(outcome, ChatOutcome::Reply("all good".to_string()));
    }

    #[test]
    fn tool_call_choice_parses_arguments_json() {
        let wire: ChatCompletionWire = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call-1",
                    "type": "function",
                    "function": {
                        "name": "update_demand",
                        "arguments": "{\"date\":\"2024-07-10\",\"demand\":500}"
                    }
                }]
            }}]
        }))
        .expect("valid wire shape");

        let outcome = outcome_from_wire(wire).expect("parsable");
        let ChatOutcome::ToolCalls(calls) = outcome else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].tool, "update_demand");
        assert_eq!(calls[0].arguments["demand"], 500);
    }

    #[test]
    fn unparseable_arguments_fall_back_to_the_raw_string() {
        let wire: ChatCompletionWire = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {
                "tool_calls": [{
                    "id": "call-2",
                    "function": {"name": "get_daily_data", "arguments": "not json"}
                }]
            }}]
        }))
        .expect("valid wire shape");

        let outcome = outcome_from_wire(wire).expect("parsable");
        let ChatOutcome::ToolCalls(calls) = outcome else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].arguments, Value::String("not json".to_string()));
    }

    #[test]
    fn empty_choice_list_is_malformed() {
        let wire = ChatCompletionWire { choices: Vec::new() };
        assert!(matches!(outcome_from_wire(wire), Err(CompletionError::Malformed(_))));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert!(retryable(&CompletionError::Api { status: 429, detail: String::new() }));
        assert!(retryable(&CompletionError::Api { status: 503, detail: String::new() }));
        assert!(!retryable(&CompletionError::Api { status: 401, detail: String::new() }));
        assert!(!retryable(&CompletionError::Malformed("x".to_string())));
    }
}
