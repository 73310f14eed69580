//! Conversation history persistence.
//!
//! The whole collection lives under one key of a `KeyValueStore`
//! (libSQL in the app, in-memory in tests).

mod error;
pub mod kv;
mod store;
mod types;

pub use error::HistoryError;
pub use kv::{KeyValueStore, LibsqlKeyValueStore, MemoryKeyValueStore};
pub use store::{ConversationStore, DEFAULT_CONVERSATION_NAME, STORAGE_KEY};
pub(crate) use store::now_ms;
pub use types::{Conversation, ImportOutcome, Message, Role};
