//! Chat session controller.
//!
//! Turns user input into persisted user/assistant messages. A failed call
//! leaves only the user message behind; an assistant message is written only
//! for a complete reply.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::stream::{Stream, StreamExt};

use crate::plugins::history::{ConversationStore, Message, Role};

use super::client::ChatApi;
use super::error::ChatError;
use super::history::build_valid_history;
use super::manager::{InFlightGuard, RequestRegistry};
use super::models::DEFAULT_MODEL;
use super::types::{ChatOptions, ChatResult, ChatTurn, ChunkStream, ModelInfo, StreamChunk, UserInput};

#[derive(Clone)]
pub struct ChatSession {
    store: ConversationStore,
    api: Arc<dyn ChatApi>,
    requests: RequestRegistry,
}

fn resolve_model(options: &ChatOptions) -> String {
    let model = options.model.trim();
    if model.is_empty() {
        DEFAULT_MODEL.to_string()
    } else {
        model.to_string()
    }
}

impl ChatSession {
    pub fn new(store: ConversationStore, api: Arc<dyn ChatApi>) -> Self {
        Self {
            store,
            api,
            requests: RequestRegistry::new(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn api(&self) -> &Arc<dyn ChatApi> {
        &self.api
    }

    pub fn models(&self) -> &[ModelInfo] {
        self.api.models()
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_configured()
    }

    pub fn set_credential(&self, key: &str) {
        self.api.set_credential(key);
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.requests.is_busy(conversation_id)
    }

    /// Shared prologue of both send paths: checks, user message append and
    /// history rebuild. The returned guard holds the conversation slot.
    async fn begin(
        &self,
        conversation_id: &str,
        input: UserInput,
    ) -> Result<(InFlightGuard, Vec<ChatTurn>), ChatError> {
        if !self.api.is_configured() {
            return Err(ChatError::configuration(
                "API key not configured. Please set your Llama API key.",
            ));
        }
        if input.is_blank() {
            return Err(ChatError::validation("Message is empty"));
        }

        let guard = self.requests.try_begin(conversation_id)?;

        if self.store.get(conversation_id).await?.is_none() {
            return Err(ChatError::validation("Conversation not found"));
        }
        if !self
            .store
            .add_message(conversation_id, input.into_message())
            .await?
        {
            return Err(ChatError::validation("Conversation not found"));
        }

        let conversation = self
            .store
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::validation("Conversation not found"))?;
        let history = build_valid_history(&conversation);
        match history.first() {
            Some(first) if first.role == Role::User => {}
            _ => {
                return Err(ChatError::validation(
                    "Conversation must start with a user message",
                ));
            }
        }

        Ok((guard, history))
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        input: impl Into<UserInput>,
        options: &ChatOptions,
    ) -> Result<ChatResult, ChatError> {
        let (guard, history) = self.begin(conversation_id, input.into()).await?;
        let model = resolve_model(options);

        log::info!(
            "Chat request {} ({} turns, model {})",
            guard.request_id(),
            history.len(),
            model
        );
        let started = Instant::now();
        let reply = self.api.chat(&history, &model, options.params()).await?;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let message = Message::assistant(reply.content.clone());
        if !self
            .store
            .add_message(conversation_id, message.clone())
            .await?
        {
            log::warn!(
                "Conversation {} vanished before the reply to {} was stored",
                conversation_id,
                guard.request_id()
            );
        }

        Ok(ChatResult {
            content: reply.content,
            model: reply.model,
            tokens: reply.tokens,
            response_time_ms,
            message,
        })
    }

    pub async fn stream_message(
        &self,
        conversation_id: &str,
        input: impl Into<UserInput>,
        options: &ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        let (guard, history) = self.begin(conversation_id, input.into()).await?;
        let model = resolve_model(options);

        log::info!(
            "Stream request {} ({} turns, model {})",
            guard.request_id(),
            history.len(),
            model
        );
        let inner = self.api.chat_stream(&history, &model, options.params()).await?;

        Ok(ChatStream {
            inner,
            store: self.store.clone(),
            model,
            guard,
            completed: false,
            failed: false,
            finished: false,
        })
    }
}

/// A streamed reply bound to one conversation.
///
/// Yields deltas, then one terminal chunk, then ends. Call `finish` with the
/// accumulated text to store the assistant message. Dropping the stream
/// before that stores nothing and frees the conversation.
pub struct ChatStream {
    inner: ChunkStream,
    store: ConversationStore,
    model: String,
    guard: InFlightGuard,
    completed: bool,
    failed: bool,
    finished: bool,
}

impl ChatStream {
    pub fn conversation_id(&self) -> &str {
        self.guard.conversation_id()
    }

    pub fn request_id(&self) -> &str {
        self.guard.request_id()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Persist the accumulated reply as one assistant message.
    pub async fn finish(mut self, content: &str) -> Result<Message, ChatError> {
        if !self.completed {
            return Err(ChatError::validation("Stream has not completed"));
        }

        let message = Message::assistant(content);
        let stored = self
            .store
            .add_message(self.guard.conversation_id(), message.clone())
            .await?;
        if !stored {
            log::warn!(
                "Conversation {} vanished before the reply to {} was stored",
                self.guard.conversation_id(),
                self.guard.request_id()
            );
        }
        self.finished = true;
        Ok(message)
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamChunk, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.completed || this.failed {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if chunk.is_complete {
                    this.completed = true;
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.failed = true;
                log::warn!("Stream {} failed: {}", this.guard.request_id(), err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.failed = true;
                Poll::Ready(Some(Err(ChatError::transport(
                    "Failed to stream response: stream ended unexpectedly",
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if !self.completed && !self.failed {
            log::debug!("Stream {} cancelled", self.guard.request_id());
        } else if self.completed && !self.finished {
            log::debug!(
                "Stream {} completed but the reply was not stored",
                self.guard.request_id()
            );
        }
    }
}
