//! Chat provider implementations.
//!
//! - **[`DisabledChat`]**: every call fails; the orchestrator answers with
//!   its apology message.
//! - **[`OpenAIChat`]**: OpenAI-compatible `POST /chat/completions` with
//!   function tools and `tool_choice`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use concierge_core::chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall, ToolChoice, ToolSchema};
use concierge_core::error::ProviderError;

use crate::config::ChatConfig;
use crate::http;

/// Build the chat provider named by `config.provider`.
pub fn create_chat(config: &ChatConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => anyhow::bail!("Unknown chat provider: {}", other),
    }
}

pub struct DisabledChat;

#[async_trait]
impl ChatProvider for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _choice: ToolChoice,
    ) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Disabled("chat provider is disabled".to_string()))
    }
}

pub struct OpenAIChat {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAIChat {
    /// Requires `OPENAI_API_KEY` in the environment.
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        Self::with_api_key(config, http::api_key_from_env()?)
    }

    pub fn with_api_key(config: &ChatConfig, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            model: config.model.clone(),
            url: http::endpoint(&config.base_url, "chat/completions"),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSchema], choice: ToolChoice) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(encode_message).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(encode_tool).collect());
            body["tool_choice"] = json!(match choice {
                ToolChoice::Auto => "auto",
                ToolChoice::Required => "required",
            });
            body["parallel_tool_calls"] = json!(false);
        }
        body
    }
}

fn encode_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(content) => json!({"role": "system", "content": content}),
        ChatMessage::User(content) => json!({"role": "user", "content": content}),
        ChatMessage::Assistant(content) => json!({"role": "assistant", "content": content}),
        ChatMessage::AssistantToolCall(call) => json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            }],
        }),
        ChatMessage::ToolResult { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

fn encode_tool(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

/// First tool call of the first choice, else its text content.
fn parse_completion(json: &Value) -> Result<ChatResponse, ProviderError> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message".to_string()))?;

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        if calls.len() > 1 {
            debug!(count = calls.len(), "model returned several tool calls, using the first");
        }
        if let Some(call) = calls.first() {
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::InvalidResponse("tool call without a name".to_string()))?;
            let arguments = match call.pointer("/function/arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "{}".to_string(),
                Some(other) => other.to_string(),
            };
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            return Ok(ChatResponse::ToolCall(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            }));
        }
    }

    match message.get("content") {
        Some(Value::String(text)) => Ok(ChatResponse::PlainText(text.clone())),
        _ => Err(ProviderError::InvalidResponse(
            "completion has neither tool calls nor content".to_string(),
        )),
    }
}

#[async_trait]
impl ChatProvider for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        choice: ToolChoice,
    ) -> Result<ChatResponse, ProviderError> {
        let body = self.request_body(messages, tools, choice);
        let json = http::post_json(&self.client, &self.url, &self.api_key, &body, self.max_retries).await?;
        parse_completion(&json)
    }
}
