//! Conversation collection persisted as one JSON value under one key.
//!
//! Every mutation serializes a candidate collection, writes it through the
//! key-value medium, and only then commits it to memory. A failed write
//! leaves memory and medium at the previous state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::kv::KeyValueStore;
use super::types::{Conversation, ImportOutcome, Message};
use super::HistoryError;

pub const STORAGE_KEY: &str = "pwllama_conversations_v1";
pub const DEFAULT_CONVERSATION_NAME: &str = "New Chat";
const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<ConversationStoreInner>,
}

struct ConversationStoreInner {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    /// Insertion order; newest records sit at the front.
    conversations: Vec<Conversation>,
    loaded: bool,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// `updated` never moves backwards, even if the wall clock does.
fn touch(conversation: &mut Conversation) {
    conversation.updated = now_ms()
        .max(conversation.updated)
        .max(conversation.created);
}

fn sorted_by_recency(conversations: &[Conversation]) -> Vec<Conversation> {
    let mut out = conversations.to_vec();
    out.sort_by(|a, b| b.updated.cmp(&a.updated));
    out
}

#[derive(Deserialize)]
struct ImportPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created: Option<u64>,
    messages: Vec<Message>,
}

fn parse_import(raw: &str) -> Result<Conversation, String> {
    let value: JsonValue =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {e}"))?;

    let Some(object) = value.as_object() else {
        return Err("Expected a conversation object".to_string());
    };
    let has_id = object
        .get("id")
        .and_then(|v| v.as_str())
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false);
    if !has_id {
        return Err("Conversation id is missing or empty".to_string());
    }
    if !object.get("messages").map(|m| m.is_array()).unwrap_or(false) {
        return Err("Conversation messages must be an array".to_string());
    }

    let payload: ImportPayload =
        serde_json::from_value(value).map_err(|e| format!("Invalid conversation: {e}"))?;

    let now = now_ms();
    let created = payload.created.unwrap_or(now);
    Ok(Conversation {
        id: payload.id,
        name: payload
            .name
            .unwrap_or_else(|| DEFAULT_CONVERSATION_NAME.to_string()),
        created,
        updated: now.max(created),
        messages: payload.messages,
    })
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, STORAGE_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConversationStoreInner {
                kv,
                key: key.into(),
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Lock the state, loading it from the medium on first use.
    ///
    /// A payload that fails to parse is treated as an empty collection; its
    /// raw text is copied aside first so a later write cannot destroy it.
    /// Read errors propagate and leave the store unloaded.
    async fn state(&self) -> Result<MutexGuard<'_, StoreState>, HistoryError> {
        let mut state = self.inner.state.lock().await;
        if state.loaded {
            return Ok(state);
        }

        let raw = self.inner.kv.get(&self.inner.key).await?;
        state.conversations = match raw {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<Conversation>>(&raw) {
                Ok(conversations) => conversations,
                Err(err) => {
                    log::warn!(
                        "Conversation payload under {} is corrupted ({}); starting empty",
                        self.inner.key,
                        err
                    );
                    let backup_key = format!("{}{}", self.inner.key, CORRUPT_SUFFIX);
                    if let Err(err) = self.inner.kv.set(&backup_key, &raw).await {
                        log::warn!("Failed to back up corrupted payload: {}", err);
                    }
                    Vec::new()
                }
            },
        };
        state.loaded = true;
        log::debug!("Loaded {} conversations", state.conversations.len());
        Ok(state)
    }

    /// Apply `op` to a copy of the collection and persist it.
    ///
    /// `op` returns `None` for a no-op, in which case nothing is written.
    async fn mutate<T, F>(&self, op: F) -> Result<Option<T>, HistoryError>
    where
        F: FnOnce(&mut Vec<Conversation>) -> Option<T>,
    {
        let mut state = self.state().await?;
        let mut next = state.conversations.clone();
        let Some(out) = op(&mut next) else {
            return Ok(None);
        };

        let payload = serde_json::to_string(&next)?;
        self.inner.kv.set(&self.inner.key, &payload).await?;
        state.conversations = next;
        Ok(Some(out))
    }

    /// All conversations, most recently updated first.
    pub async fn get_all(&self) -> Result<Vec<Conversation>, HistoryError> {
        let state = self.state().await?;
        Ok(sorted_by_recency(&state.conversations))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, HistoryError> {
        let state = self.state().await?;
        Ok(state.conversations.iter().find(|c| c.id == id).cloned())
    }

    pub async fn create(&self, name: &str) -> Result<Conversation, HistoryError> {
        let now = now_ms();
        let conversation = Conversation {
            id: new_id("conv"),
            name: name.to_string(),
            created: now,
            updated: now,
            messages: Vec::new(),
        };
        let created = conversation.clone();
        self.mutate(move |conversations| {
            conversations.insert(0, conversation);
            Some(())
        })
        .await?;
        log::info!("Created conversation {}", created.id);
        Ok(created)
    }

    pub async fn create_default(&self) -> Result<Conversation, HistoryError> {
        self.create(DEFAULT_CONVERSATION_NAME).await
    }

    /// Replace the stored record that has the same id. No-op if absent.
    pub async fn update(&self, conversation: Conversation) -> Result<bool, HistoryError> {
        let changed = self
            .mutate(move |conversations| {
                let slot = conversations.iter_mut().find(|c| c.id == conversation.id)?;
                let floor = slot.updated;
                *slot = conversation;
                slot.updated = slot.updated.max(floor);
                touch(slot);
                Some(())
            })
            .await?;
        Ok(changed.is_some())
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<bool, HistoryError> {
        let changed = self
            .mutate(|conversations| {
                let conversation = conversations.iter_mut().find(|c| c.id == id)?;
                conversation.name = name.to_string();
                touch(conversation);
                Some(())
            })
            .await?;
        Ok(changed.is_some())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, HistoryError> {
        let removed = self
            .mutate(|conversations| {
                let idx = conversations.iter().position(|c| c.id == id)?;
                conversations.remove(idx);
                Some(())
            })
            .await?;
        if removed.is_some() {
            log::info!("Deleted conversation {}", id);
        }
        Ok(removed.is_some())
    }

    /// Append a message. Returns `false` when the conversation no longer exists.
    pub async fn add_message(&self, id: &str, message: Message) -> Result<bool, HistoryError> {
        let appended = self
            .mutate(move |conversations| {
                let conversation = conversations.iter_mut().find(|c| c.id == id)?;
                conversation.messages.push(message);
                touch(conversation);
                Some(())
            })
            .await?;
        Ok(appended.is_some())
    }

    /// Case-insensitive match on the name or any message content.
    pub async fn search(&self, query: &str) -> Result<Vec<Conversation>, HistoryError> {
        let needle = query.to_lowercase();
        let state = self.state().await?;
        let matches: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| c.matches(&needle))
            .cloned()
            .collect();
        Ok(sorted_by_recency(&matches))
    }

    /// Pretty-printed JSON of one conversation, or `None` if absent.
    pub async fn export(&self, id: &str) -> Result<Option<String>, HistoryError> {
        let Some(conversation) = self.get(id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::to_string_pretty(&conversation)?))
    }

    /// Import one exported conversation.
    ///
    /// Malformed input is rejected without touching the collection; only a
    /// failed write is an error. An id that is already taken is replaced by
    /// a fresh one.
    pub async fn import(&self, raw: &str) -> Result<ImportOutcome, HistoryError> {
        let mut conversation = match parse_import(raw) {
            Ok(conversation) => conversation,
            Err(reason) => {
                log::warn!("Rejected conversation import: {}", reason);
                return Ok(ImportOutcome::Rejected { reason });
            }
        };

        let imported = self
            .mutate(move |conversations| {
                if conversations.iter().any(|c| c.id == conversation.id) {
                    let fresh = new_id("conv");
                    log::info!(
                        "Imported id {} already exists; storing as {}",
                        conversation.id,
                        fresh
                    );
                    conversation.id = fresh;
                }
                conversations.insert(0, conversation.clone());
                Some(conversation)
            })
            .await?;

        match imported {
            Some(conversation) => Ok(ImportOutcome::Imported(conversation)),
            None => Err(HistoryError::internal("Import produced no record")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::history::kv::MemoryKeyValueStore;
    use crate::plugins::history::types::Role;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn memory_store() -> (ConversationStore, Arc<MemoryKeyValueStore>) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        (ConversationStore::new(kv.clone()), kv)
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    /// Medium whose writes can be switched off.
    #[derive(Default)]
    struct FlakyKeyValueStore {
        inner: MemoryKeyValueStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyKeyValueStore {
        async fn get(&self, key: &str) -> Result<Option<String>, HistoryError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), HistoryError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(HistoryError::database("quota exceeded"));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), HistoryError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (store, _) = memory_store();
        let conv = store.create_default().await.unwrap();
        let fetched = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "New Chat");
        assert_eq!(fetched.created, fetched.updated);
        assert!(fetched.messages.is_empty());
        assert!(fetched.id.starts_with("conv_"));
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_recency() {
        let (store, _) = memory_store();
        let a = store.create("a").await.unwrap();
        tick().await;
        let b = store.create("b").await.unwrap();
        tick().await;

        let ids: Vec<String> = store.get_all().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);

        store.add_message(&a.id, Message::user("bump")).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all[0].id, a.id);
        assert!(all.windows(2).all(|w| w[0].updated >= w[1].updated));
    }

    #[tokio::test]
    async fn test_add_message_preserves_order_and_bumps_updated() {
        let (store, _) = memory_store();
        let conv = store.create_default().await.unwrap();

        let mut last_updated = conv.updated;
        for i in 0..5 {
            assert!(store
                .add_message(&conv.id, Message::user(format!("m{i}")))
                .await
                .unwrap());
            let current = store.get(&conv.id).await.unwrap().unwrap();
            assert!(current.updated >= last_updated);
            last_updated = current.updated;
        }

        let conv = store.get(&conv.id).await.unwrap().unwrap();
        let contents: Vec<&str> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_missing_ids_are_noops() {
        let (store, _) = memory_store();
        assert!(!store.rename("nope", "x").await.unwrap());
        assert!(!store.delete("nope").await.unwrap());
        assert!(!store.add_message("nope", Message::user("x")).await.unwrap());
        assert_eq!(store.export("nope").await.unwrap(), None);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (store, _) = memory_store();
        let conv = store.create_default().await.unwrap();
        tick().await;
        assert!(store.rename(&conv.id, "Trip planning").await.unwrap());
        let renamed = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(renamed.name, "Trip planning");
        assert!(renamed.updated > renamed.created);

        assert!(store.delete(&conv.id).await.unwrap());
        assert_eq!(store.get(&conv.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let (store, _) = memory_store();
        let mut conv = store.create_default().await.unwrap();
        conv.name = "Edited".to_string();
        conv.messages.push(Message::user("hello"));
        assert!(store.update(conv.clone()).await.unwrap());

        let stored = store.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Edited");
        assert_eq!(stored.messages.len(), 1);
        assert!(stored.updated >= conv.updated);
    }

    #[tokio::test]
    async fn test_search_matches_name_and_content() {
        let (store, _) = memory_store();
        let by_name = store.create("foo-bar").await.unwrap();
        let by_content = store.create("Groceries").await.unwrap();
        store
            .add_message(&by_content.id, Message::user("buy some FOOD please"))
            .await
            .unwrap();
        let unrelated = store.create("Weather").await.unwrap();
        store
            .add_message(&unrelated.id, Message::assistant("sunny"))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .search("foo")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&by_name.id));
        assert!(ids.contains(&by_content.id));
        assert!(!ids.contains(&unrelated.id));
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let (source, _) = memory_store();
        let conv = source.create("Recipes").await.unwrap();
        source
            .add_message(&conv.id, Message::user("  spaced\ncontent ✨ "))
            .await
            .unwrap();
        source
            .add_message(&conv.id, Message::assistant("{\"json\": true}").with_image("blob:x"))
            .await
            .unwrap();
        let exported = source.export(&conv.id).await.unwrap().unwrap();
        assert!(exported.contains("\n  \"name\": \"Recipes\""));

        let (target, _) = memory_store();
        let outcome = target.import(&exported).await.unwrap();
        let imported = outcome.conversation().unwrap().clone();
        let original = source.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(imported.name, original.name);
        assert_eq!(imported.messages, original.messages);
        assert_eq!(target.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_shapes() {
        let (store, _) = memory_store();
        for raw in [
            "not json",
            "[]",
            r#"{"id":"","messages":[]}"#,
            r#"{"id":"x","messages":{}}"#,
            r#"{"name":"no id","messages":[]}"#,
            r#"{"id":"x","messages":[{"role":"robot","content":"?"}]}"#,
        ] {
            let outcome = store.import(raw).await.unwrap();
            assert!(!outcome.is_imported(), "accepted {raw}");
        }
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_defaults_and_duplicate_ids() {
        let (store, _) = memory_store();
        let raw = r#"{"id":"abc","messages":[{"role":"user","content":"hi"}]}"#;
        let first = store.import(raw).await.unwrap();
        let first = first.conversation().unwrap();
        assert_eq!(first.id, "abc");
        assert_eq!(first.name, "New Chat");
        assert!(first.updated >= first.created);
        assert_eq!(first.messages[0].role, Role::User);

        let second = store.import(raw).await.unwrap();
        let second = second.conversation().unwrap();
        assert_ne!(second.id, "abc");
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persisted_state_is_reloaded() {
        let (store, kv) = memory_store();
        let conv = store.create("kept").await.unwrap();
        store.add_message(&conv.id, Message::user("hi")).await.unwrap();

        let reopened = ConversationStore::new(kv);
        let loaded = reopened.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "kept");
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_payload_loads_empty_and_is_backed_up() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(STORAGE_KEY, "{not valid").await.unwrap();

        let store = ConversationStore::new(kv.clone());
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(
            kv.get("pwllama_conversations_v1.corrupt").await.unwrap().as_deref(),
            Some("{not valid")
        );

        store.create_default().await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_surfaced_and_not_applied() {
        let kv = Arc::new(FlakyKeyValueStore::default());
        let store = ConversationStore::new(kv.clone());
        let conv = store.create_default().await.unwrap();

        kv.fail_writes.store(true, Ordering::SeqCst);
        let err = store
            .add_message(&conv.id, Message::user("lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::Database { .. }));
        assert!(store.get(&conv.id).await.unwrap().unwrap().messages.is_empty());

        kv.fail_writes.store(false, Ordering::SeqCst);
        assert!(store.add_message(&conv.id, Message::user("kept")).await.unwrap());
        let reopened = ConversationStore::new(kv);
        let stored = reopened.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].content, "kept");
    }
}
