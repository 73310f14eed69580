use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use uuid::Uuid;

use super::error::ChatError;

/// Tracks which conversations have a request in flight.
///
/// Maps conversation id -> request id. At most one request per conversation;
/// different conversations proceed independently.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    // NOTE: Using std::sync::Mutex since lock is never held across .await.
    by_conversation: Arc<Mutex<HashMap<String, String>>>,
}

/// Releases the conversation slot on drop.
pub struct InFlightGuard {
    registry: RequestRegistry,
    conversation_id: String,
    request_id: String,
}

impl InFlightGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.conversation_id, &self.request_id);
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self, conversation_id: &str) -> Result<InFlightGuard, ChatError> {
        let mut registry = self
            .by_conversation
            .lock()
            .map_err(|_| ChatError::busy("Request registry lock poisoned"))?;
        if registry.contains_key(conversation_id) {
            return Err(ChatError::busy("Conversation is busy"));
        }

        let request_id = format!("req_{}", Uuid::new_v4().simple());
        registry.insert(conversation_id.to_string(), request_id.clone());
        log::debug!("Request {} started for {}", request_id, conversation_id);

        Ok(InFlightGuard {
            registry: self.clone(),
            conversation_id: conversation_id.to_string(),
            request_id,
        })
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.by_conversation
            .lock()
            .map(|registry| registry.contains_key(conversation_id))
            .unwrap_or(false)
    }

    fn release(&self, conversation_id: &str, request_id: &str) {
        if let Ok(mut registry) = self.by_conversation.lock() {
            if registry.get(conversation_id).map(|rid| rid.as_str()) == Some(request_id) {
                registry.remove(conversation_id);
                log::debug!("Request {} finished for {}", request_id, conversation_id);
            }
        }
    }
}
