use std::sync::Arc;

pub mod cli;
pub mod plugins;
pub mod services;

pub use plugins::history::{
    Conversation, ConversationStore, HistoryError, ImportOutcome, KeyValueStore,
    LibsqlKeyValueStore, MemoryKeyValueStore, Message, Role,
};
pub use services::ai::{
    ChatApi, ChatError, ChatOptions, ChatResult, ChatSession, ChatStream, OpenAiCompatClient,
    StreamChunk, UserInput,
};
pub use services::config::{AiConfig, AiPublicConfig};
pub use services::settings::{AdvancedSettings, SavedPrompt, SettingsStore};

/// Everything a front end needs: the chat session (which owns the store
/// handle), persisted settings and the loaded API configuration.
pub struct AppState {
    pub session: ChatSession,
    pub settings: SettingsStore,
    pub ai_config: AiConfig,
}

impl AppState {
    /// Wire the store, settings and API client over one key-value medium.
    ///
    /// A credential from the environment wins; otherwise the one saved in
    /// settings is used. The configured model is the default for settings
    /// that do not select one.
    pub async fn with_store(
        kv: Arc<dyn KeyValueStore>,
        ai_config: AiConfig,
    ) -> Result<Self, HistoryError> {
        let settings = SettingsStore::new(kv.clone()).with_default_model(&ai_config.model);
        let client = OpenAiCompatClient::new(&ai_config);
        if !client.is_configured() {
            if let Some(key) = settings.load_credential().await? {
                log::debug!("Using API key from saved settings");
                client.set_credential(&key);
            }
        }

        let session = ChatSession::new(ConversationStore::new(kv), Arc::new(client));
        Ok(Self {
            session,
            settings,
            ai_config,
        })
    }

    pub fn store(&self) -> &ConversationStore {
        self.session.store()
    }

    /// Options for the next send: saved settings, else the configured model.
    pub async fn chat_options(&self) -> Result<ChatOptions, HistoryError> {
        Ok(self.settings.load_advanced().await?.chat_options())
    }

    pub fn public_config(&self) -> AiPublicConfig {
        let mut public = AiPublicConfig::from(&self.ai_config);
        public.has_api_key = self.session.is_configured();
        public
    }
}

/// Load `.env`/environment configuration and open the history database.
pub async fn init() -> Result<AppState, String> {
    let ai_config = services::config::load_ai_config();
    let storage = services::config::load_storage_config()?;
    let kv = LibsqlKeyValueStore::open(&storage)
        .await
        .map_err(|e| e.to_string())?;
    log::info!("Chat API: {} ({})", ai_config.base_url, ai_config.model);
    AppState::with_store(Arc::new(kv), ai_config)
        .await
        .map_err(|e| e.to_string())
}
