//! Chat API boundary.
//!
//! `ChatApi` is what the session controller depends on; `OpenAiCompatClient`
//! talks to the Llama API (or any OpenAI-compatible endpoint) through
//! async-openai's BYOT methods so both response shapes can be decoded.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::services::config::AiConfig;

use super::error::ChatError;
use super::history::prepare_for_transmission;
use super::models::MODELS;
use super::stream::decode_stream;
use super::types::{
    ByotChatCompletionResponse, ByotChatCompletionStreamResponse, ChatReply, ChatTurn, ChunkStream,
    GenerationParams, ModelInfo,
};

#[async_trait]
pub trait ChatApi: Send + Sync {
    fn is_configured(&self) -> bool {
        self.credential().is_some()
    }

    fn set_credential(&self, key: &str);

    fn credential(&self) -> Option<String>;

    fn models(&self) -> &[ModelInfo] {
        MODELS
    }

    async fn chat(
        &self,
        history: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<ChatReply, ChatError>;

    async fn chat_stream(
        &self,
        history: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<ChunkStream, ChatError>;
}

fn request_body(turns: &[ChatTurn], model: &str, params: GenerationParams, stream: bool) -> JsonValue {
    serde_json::json!({
        "model": model,
        "messages": turns,
        "max_completion_tokens": params.max_tokens,
        "temperature": params.temperature,
        "stream": stream
    })
}

pub struct OpenAiCompatClient {
    base_url: String,
    http_client: reqwest::Client,
    credential: ArcSwapOption<String>,
}

impl OpenAiCompatClient {
    pub fn new(config: &AiConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let key = config.api_key.trim();
        let credential = (!key.is_empty()).then(|| Arc::new(key.to_string()));

        Self {
            base_url: config.base_url.clone(),
            http_client,
            credential: ArcSwapOption::new(credential),
        }
    }

    fn client(&self) -> Result<Client<OpenAIConfig>, ChatError> {
        let key = self
            .credential()
            .ok_or_else(|| ChatError::configuration("API key not configured"))?;
        let openai_config = OpenAIConfig::new()
            .with_api_base(self.base_url.clone())
            .with_api_key(key);
        Ok(Client::with_config(openai_config).with_http_client(self.http_client.clone()))
    }
}

#[async_trait]
impl ChatApi for OpenAiCompatClient {
    fn set_credential(&self, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            self.credential.store(None);
        } else {
            self.credential.store(Some(Arc::new(key.to_string())));
        }
    }

    fn credential(&self) -> Option<String> {
        self.credential.load_full().map(|key| key.as_ref().clone())
    }

    async fn chat(
        &self,
        history: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<ChatReply, ChatError> {
        let client = self.client()?;
        let turns = prepare_for_transmission(history)?;
        let request = request_body(&turns, model, params, false);

        log::debug!("Sending {} messages to {}", turns.len(), model);
        let started = Instant::now();

        let response: ByotChatCompletionResponse = client
            .chat()
            .create_byot::<_, ByotChatCompletionResponse>(&request)
            .await
            .map_err(|e| {
                log::warn!("Chat API error: {}", e);
                ChatError::transport(format!("Failed to get response: {e}"))
            })?;

        let content = response.content().ok_or_else(|| {
            ChatError::transport("Failed to get response: reply contained no message")
        })?;

        Ok(ChatReply {
            content,
            model: response
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| model.to_string()),
            tokens: response.total_tokens(),
            response_time_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    async fn chat_stream(
        &self,
        history: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<ChunkStream, ChatError> {
        let client = self.client()?;
        let turns = prepare_for_transmission(history)?;
        let request = request_body(&turns, model, params, true);

        log::debug!("Streaming {} messages to {}", turns.len(), model);

        let upstream = client
            .chat()
            .create_stream_byot::<_, ByotChatCompletionStreamResponse>(&request)
            .await
            .map_err(|e| {
                log::warn!("Streaming API error: {}", e);
                ChatError::transport(format!("Failed to stream response: {e}"))
            })?;

        Ok(decode_stream(upstream))
    }
}
