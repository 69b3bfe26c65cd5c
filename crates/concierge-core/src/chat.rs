//! Chat (LLM) provider abstraction.
//!
//! The dialogue layer talks to the model only through [`ChatProvider`].
//! A response is a sum type: either one tool invocation or plain text.
//! With [`ToolChoice::Required`] plain text is a contract violation the
//! caller handles; with [`ToolChoice::Auto`] and no tools it is the
//! normal answer (used for translation and query expansion).

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;
use crate::models::{Message, Role};

/// A tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    /// Provider-assigned call id; the tool result must reference it.
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

/// One message in a chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
    /// The model's own earlier tool call, replayed so the tool result
    /// that follows can reference it.
    AssistantToolCall(ToolCall),
    ToolResult { call_id: String, content: String },
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            Role::User => ChatMessage::User(message.content.clone()),
            Role::Assistant => ChatMessage::Assistant(message.content.clone()),
            Role::System => ChatMessage::System(message.content.clone()),
        }
    }
}

/// A callable tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model may answer in text.
    Auto,
    /// The model must call exactly one of the offered tools.
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatResponse {
    ToolCall(ToolCall),
    PlainText(String),
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        choice: ToolChoice,
    ) -> Result<ChatResponse, ProviderError>;
}

/// One-shot text completion: a system instruction plus a user message,
/// no tools.
pub async fn complete_text(
    provider: &dyn ChatProvider,
    instruction: &str,
    input: &str,
) -> Result<String, ProviderError> {
    let messages = [
        ChatMessage::System(instruction.to_string()),
        ChatMessage::User(input.to_string()),
    ];
    match provider.chat(&messages, &[], ToolChoice::Auto).await? {
        ChatResponse::PlainText(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        ChatResponse::PlainText(_) => Err(ProviderError::InvalidResponse(
            "empty completion".to_string(),
        )),
        ChatResponse::ToolCall(call) => Err(ProviderError::InvalidResponse(format!(
            "unexpected tool call '{}' in a text completion",
            call.name
        ))),
    }
}
