use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::plugins::history::{Message, Role};

use super::error::ChatError;
use super::models::DEFAULT_MODEL;

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// One entry of the history sent to the chat API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Per-request options chosen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl ChatOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// What the user typed, plus an optional attached image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub text: String,
    pub image_url: Option<String>,
}

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.image_url.is_none()
    }

    pub(super) fn into_message(self) -> Message {
        let message = Message::user(self.text);
        match self.image_url {
            Some(url) => message.with_image(url),
            None => message,
        }
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Reply of a one-shot chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    pub model: String,
    pub tokens: Option<u64>,
    pub response_time_ms: Option<u64>,
}

/// Outcome of `ChatSession::send_message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResult {
    pub content: String,
    pub model: String,
    pub tokens: Option<u64>,
    pub response_time_ms: u64,
    pub message: Message,
}

/// One element of a streamed reply. The last element of every successful
/// stream has `is_complete == true` and empty `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub text: String,
    pub is_complete: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_complete: false,
        }
    }

    pub fn complete() -> Self {
        Self {
            text: String::new(),
            is_complete: true,
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ChatError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Flatten message content the way the chat UI shows it: plain strings as
/// is, `{ text }` items by their text, anything else as JSON.
pub(super) fn content_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        JsonValue::Object(map) => match map.get("text").and_then(|t| t.as_str()) {
            Some(text) => text.to_string(),
            None => value.to_string(),
        },
        JsonValue::Array(items) => {
            let texts: Option<Vec<&str>> = items
                .iter()
                .map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect();
            match texts {
                Some(texts) if !texts.is_empty() => texts.concat(),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// BYOT response accepting both the OpenAI-compatible shape and the Llama
/// API native shape (`completion_message`, `metrics`).
#[derive(Debug, Deserialize)]
pub(super) struct ByotChatCompletionResponse {
    #[serde(default)]
    pub(super) model: Option<String>,
    #[serde(default)]
    pub(super) choices: Vec<ByotChatChoice>,
    #[serde(default)]
    pub(super) completion_message: Option<ByotChatMessage>,
    #[serde(default)]
    pub(super) usage: Option<ByotUsage>,
    #[serde(default)]
    pub(super) metrics: Vec<ByotMetric>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotChatChoice {
    #[serde(default)]
    pub(super) message: Option<ByotChatMessage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotChatMessage {
    #[serde(default)]
    pub(super) content: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotUsage {
    #[serde(default)]
    pub(super) total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotMetric {
    pub(super) metric: String,
    pub(super) value: f64,
}

impl ByotChatCompletionResponse {
    /// `None` when the payload carries no message at all.
    pub(super) fn content(&self) -> Option<String> {
        let message = self
            .choices
            .iter()
            .find_map(|c| c.message.as_ref())
            .or(self.completion_message.as_ref())?;
        Some(message.content.as_ref().map(content_text).unwrap_or_default())
    }

    pub(super) fn total_tokens(&self) -> Option<u64> {
        self.usage
            .as_ref()
            .and_then(|u| u.total_tokens)
            .or_else(|| {
                self.metrics
                    .iter()
                    .find(|m| m.metric == "num_total_tokens")
                    .map(|m| m.value.max(0.0) as u64)
            })
    }
}

/// BYOT stream chunk: `choices[].delta.content` (OpenAI-compatible) or
/// `event.delta.text` (Llama API native).
#[derive(Debug, Default, Deserialize)]
pub(super) struct ByotChatCompletionStreamResponse {
    #[serde(default)]
    pub(super) choices: Vec<ByotChatChoiceStream>,
    #[serde(default)]
    pub(super) event: Option<ByotStreamEvent>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotChatChoiceStream {
    #[serde(default)]
    pub(super) delta: Option<ByotChatCompletionStreamDelta>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotChatCompletionStreamDelta {
    #[serde(default)]
    pub(super) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotStreamEvent {
    #[serde(default)]
    pub(super) delta: Option<ByotStreamEventDelta>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ByotStreamEventDelta {
    #[serde(default)]
    pub(super) text: Option<String>,
}

impl ByotChatCompletionStreamResponse {
    /// Non-empty text deltas carried by this chunk, in order.
    pub(super) fn deltas(self) -> Vec<String> {
        let mut out: Vec<String> = self
            .choices
            .into_iter()
            .filter_map(|c| c.delta.and_then(|d| d.content))
            .collect();
        if let Some(text) = self.event.and_then(|e| e.delta).and_then(|d| d.text) {
            out.push(text);
        }
        out.retain(|t| !t.is_empty());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_shape() {
        let response: ByotChatCompletionResponse = serde_json::from_value(json!({
            "model": "Llama-3.3-70B-Instruct",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Hi!" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
        }))
        .unwrap();
        assert_eq!(response.content().as_deref(), Some("Hi!"));
        assert_eq!(response.total_tokens(), Some(5));
    }

    #[test]
    fn test_llama_native_shape() {
        let response: ByotChatCompletionResponse = serde_json::from_value(json!({
            "completion_message": {
                "role": "assistant",
                "content": { "type": "text", "text": "Hello there" }
            },
            "metrics": [
                { "metric": "num_completion_tokens", "value": 3 },
                { "metric": "num_total_tokens", "value": 12 }
            ]
        }))
        .unwrap();
        assert_eq!(response.content().as_deref(), Some("Hello there"));
        assert_eq!(response.total_tokens(), Some(12));
        assert_eq!(response.model, None);
    }

    #[test]
    fn test_missing_message() {
        let response: ByotChatCompletionResponse =
            serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert_eq!(response.content(), None);
    }

    #[test]
    fn test_content_text_variants() {
        assert_eq!(content_text(&json!("plain")), "plain");
        assert_eq!(content_text(&json!(null)), "");
        assert_eq!(
            content_text(&json!([{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }])),
            "ab"
        );
        assert_eq!(content_text(&json!({ "image": 1 })), r#"{"image":1}"#);
        assert_eq!(content_text(&json!(42)), "42");
    }

    #[test]
    fn test_stream_deltas() {
        let chunk: ByotChatCompletionStreamResponse = serde_json::from_value(json!({
            "choices": [{ "index": 0, "delta": { "content": "Hel" } }, { "index": 1, "delta": {} }]
        }))
        .unwrap();
        assert_eq!(chunk.deltas(), vec!["Hel".to_string()]);

        let chunk: ByotChatCompletionStreamResponse = serde_json::from_value(json!({
            "event": { "event_type": "progress", "delta": { "type": "text", "text": "lo" } }
        }))
        .unwrap();
        assert_eq!(chunk.deltas(), vec!["lo".to_string()]);

        let chunk: ByotChatCompletionStreamResponse = serde_json::from_value(json!({
            "choices": [{ "delta": { "content": "" }, "finish_reason": "stop" }]
        }))
        .unwrap();
        assert!(chunk.deltas().is_empty());
    }

    #[test]
    fn test_blank_input() {
        assert!(UserInput::new("   ").is_blank());
        assert!(!UserInput::new("  ").with_image("data:image/png;base64,AA").is_blank());
        assert!(!UserInput::from("hi").is_blank());
    }
}
