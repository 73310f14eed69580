//! Persisted user settings: the API credential, the advanced chat settings
//! and the prompt library, stored next to the conversations in the same
//! key-value medium.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::plugins::history::{HistoryError, KeyValueStore};
use crate::services::ai::{ChatOptions, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};

pub const CREDENTIAL_KEY: &str = "llama_api_key";
pub const ADVANCED_SETTINGS_KEY: &str = "pwllama_advanced_settings";
pub const PROMPT_LIBRARY_KEY: &str = "pwllama_prompt_library";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedSettings {
    #[serde(default)]
    pub selected_model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub persona: String,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            selected_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: String::new(),
            persona: String::new(),
        }
    }
}

impl AdvancedSettings {
    pub fn chat_options(&self) -> ChatOptions {
        let model = self.selected_model.trim();
        ChatOptions {
            model: if model.is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                model.to_string()
            },
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: self.temperature,
        }
    }
}

/// A reusable prompt from the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPrompt {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

impl SavedPrompt {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            persona: None,
        }
    }

    /// Case-insensitive substring match on title or content.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

/// Library shown before the user saves one of their own.
pub fn default_prompts() -> Vec<SavedPrompt> {
    vec![
        SavedPrompt::new("Wazi", "You are Wazi, a helpful, friendly AI assistant."),
        SavedPrompt::new("Code Explainer", "Explain code step by step in simple terms."),
        SavedPrompt::new("Creative Writer", "Write creative, engaging stories or poems."),
    ]
}

#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    default_model: String,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Model used when the saved settings do not name one. Blank is ignored.
    pub fn with_default_model(mut self, model: &str) -> Self {
        let model = model.trim();
        if !model.is_empty() {
            self.default_model = model.to_string();
        }
        self
    }

    pub fn default_settings(&self) -> AdvancedSettings {
        AdvancedSettings {
            selected_model: self.default_model.clone(),
            ..AdvancedSettings::default()
        }
    }

    pub async fn load_credential(&self) -> Result<Option<String>, HistoryError> {
        let value = self.kv.get(CREDENTIAL_KEY).await?;
        Ok(value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    pub async fn save_credential(&self, key: &str) -> Result<(), HistoryError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(HistoryError::invalid_input("API key is empty"));
        }
        self.kv.set(CREDENTIAL_KEY, key).await
    }

    pub async fn clear_credential(&self) -> Result<(), HistoryError> {
        self.kv.remove(CREDENTIAL_KEY).await
    }

    /// Unparsable settings fall back to defaults. A missing or blank model
    /// is filled with the configured default.
    pub async fn load_advanced(&self) -> Result<AdvancedSettings, HistoryError> {
        let Some(raw) = self.kv.get(ADVANCED_SETTINGS_KEY).await? else {
            return Ok(self.default_settings());
        };
        match serde_json::from_str::<AdvancedSettings>(&raw) {
            Ok(mut settings) => {
                if settings.selected_model.trim().is_empty() {
                    settings.selected_model = self.default_model.clone();
                }
                Ok(settings)
            }
            Err(err) => {
                log::warn!("Ignoring unreadable advanced settings: {}", err);
                Ok(self.default_settings())
            }
        }
    }

    pub async fn save_advanced(&self, settings: &AdvancedSettings) -> Result<(), HistoryError> {
        let raw = serde_json::to_string(settings)?;
        self.kv.set(ADVANCED_SETTINGS_KEY, &raw).await
    }

    /// Saved prompts, newest first. An absent or unreadable library yields
    /// the built-in prompts.
    pub async fn load_prompts(&self) -> Result<Vec<SavedPrompt>, HistoryError> {
        let Some(raw) = self.kv.get(PROMPT_LIBRARY_KEY).await? else {
            return Ok(default_prompts());
        };
        match serde_json::from_str(&raw) {
            Ok(prompts) => Ok(prompts),
            Err(err) => {
                log::warn!("Ignoring unreadable prompt library: {}", err);
                Ok(default_prompts())
            }
        }
    }

    pub async fn save_prompts(&self, prompts: &[SavedPrompt]) -> Result<(), HistoryError> {
        let raw = serde_json::to_string(prompts)?;
        self.kv.set(PROMPT_LIBRARY_KEY, &raw).await
    }

    /// Put `prompt` at the front of the library and persist it.
    pub async fn add_prompt(&self, prompt: SavedPrompt) -> Result<Vec<SavedPrompt>, HistoryError> {
        if prompt.title.trim().is_empty() || prompt.content.trim().is_empty() {
            return Err(HistoryError::invalid_input(
                "Prompt title and content are required",
            ));
        }
        let mut prompts = self.load_prompts().await?;
        prompts.insert(0, prompt);
        self.save_prompts(&prompts).await?;
        Ok(prompts)
    }

    pub async fn search_prompts(&self, query: &str) -> Result<Vec<SavedPrompt>, HistoryError> {
        let prompts = self.load_prompts().await?;
        Ok(prompts.into_iter().filter(|p| p.matches(query)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::history::MemoryKeyValueStore;

    fn store() -> (SettingsStore, Arc<dyn KeyValueStore>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        (SettingsStore::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn test_credential_roundtrip() {
        let (settings, kv) = store();
        assert_eq!(settings.load_credential().await.unwrap(), None);

        settings.save_credential("  llm-key ").await.unwrap();
        assert_eq!(kv.get(CREDENTIAL_KEY).await.unwrap().as_deref(), Some("llm-key"));
        assert_eq!(
            settings.load_credential().await.unwrap().as_deref(),
            Some("llm-key")
        );

        assert!(settings.save_credential("   ").await.is_err());

        settings.clear_credential().await.unwrap();
        assert_eq!(settings.load_credential().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_advanced_settings_wire_format() {
        let (settings, kv) = store();
        assert_eq!(
            settings.load_advanced().await.unwrap(),
            AdvancedSettings::default()
        );

        kv.set(
            ADVANCED_SETTINGS_KEY,
            r#"{"selectedModel":"Llama-3.3-8B-Instruct","temperature":0,"persona":"pirate"}"#,
        )
        .await
        .unwrap();
        let loaded = settings.load_advanced().await.unwrap();
        assert_eq!(loaded.selected_model, "Llama-3.3-8B-Instruct");
        assert_eq!(loaded.temperature, 0.0);
        assert_eq!(loaded.system_prompt, "");
        assert_eq!(loaded.persona, "pirate");

        let options = loaded.chat_options();
        assert_eq!(options.model, "Llama-3.3-8B-Instruct");
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.max_tokens, DEFAULT_MAX_TOKENS);

        settings.save_advanced(&loaded).await.unwrap();
        let raw = kv.get(ADVANCED_SETTINGS_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"systemPrompt\""));
        assert!(raw.contains("\"selectedModel\""));
    }

    #[tokio::test]
    async fn test_corrupt_advanced_settings_fall_back() {
        let (settings, kv) = store();
        kv.set(ADVANCED_SETTINGS_KEY, "{not json").await.unwrap();
        assert_eq!(
            settings.load_advanced().await.unwrap(),
            AdvancedSettings::default()
        );
    }

    #[tokio::test]
    async fn test_configured_model_fills_missing_selection() {
        let (settings, kv) = store();
        let settings = settings.with_default_model("Llama-3.3-8B-Instruct");
        assert_eq!(
            settings.load_advanced().await.unwrap().chat_options().model,
            "Llama-3.3-8B-Instruct"
        );

        kv.set(ADVANCED_SETTINGS_KEY, r#"{"temperature":0.2}"#)
            .await
            .unwrap();
        let loaded = settings.load_advanced().await.unwrap();
        assert_eq!(loaded.selected_model, "Llama-3.3-8B-Instruct");
        assert_eq!(loaded.temperature, 0.2);

        kv.set(
            ADVANCED_SETTINGS_KEY,
            r#"{"selectedModel":"Llama-4-Scout-17B-16E-Instruct-FP8"}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            settings.load_advanced().await.unwrap().selected_model,
            "Llama-4-Scout-17B-16E-Instruct-FP8"
        );

        let blank = store().0.with_default_model("  ");
        assert_eq!(blank.default_settings().selected_model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_prompt_library_defaults_and_add() {
        let (settings, kv) = store();
        let prompts = settings.load_prompts().await.unwrap();
        assert_eq!(prompts, default_prompts());
        assert_eq!(prompts[0].title, "Wazi");

        let prompts = settings
            .add_prompt(SavedPrompt::new("Translator", "Translate to French."))
            .await
            .unwrap();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[0].title, "Translator");
        assert_eq!(settings.load_prompts().await.unwrap(), prompts);

        let raw = kv.get(PROMPT_LIBRARY_KEY).await.unwrap().unwrap();
        assert!(raw.starts_with(r#"[{"title":"Translator","content":"Translate to French."}"#));

        assert!(settings.add_prompt(SavedPrompt::new(" ", "x")).await.is_err());
        assert!(settings.add_prompt(SavedPrompt::new("x", "")).await.is_err());
        assert_eq!(settings.load_prompts().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_prompt_library_reads_persona_and_tolerates_garbage() {
        let (settings, kv) = store();
        kv.set(
            PROMPT_LIBRARY_KEY,
            r#"[{"title":"Pirate","content":"Talk like a pirate.","persona":"pirate"}]"#,
        )
        .await
        .unwrap();
        let prompts = settings.load_prompts().await.unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].persona.as_deref(), Some("pirate"));

        kv.set(PROMPT_LIBRARY_KEY, "[{oops").await.unwrap();
        assert_eq!(settings.load_prompts().await.unwrap(), default_prompts());
    }

    #[tokio::test]
    async fn test_search_prompts_is_case_insensitive() {
        let (settings, _) = store();
        let titles = |prompts: Vec<SavedPrompt>| {
            prompts.into_iter().map(|p| p.title).collect::<Vec<_>>()
        };

        assert_eq!(
            titles(settings.search_prompts("CODE").await.unwrap()),
            vec!["Code Explainer"]
        );
        assert_eq!(
            titles(settings.search_prompts("poems").await.unwrap()),
            vec!["Creative Writer"]
        );
        assert_eq!(settings.search_prompts("").await.unwrap().len(), 3);
        assert!(settings.search_prompts("nothing here").await.unwrap().is_empty());
    }
}
