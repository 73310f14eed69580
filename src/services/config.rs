//! Shared configuration loading for the chat API client and the history DB.
//!
//! Secrets never leave this module except through `AiConfig`; `AiPublicConfig`
//! is safe to print.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::services::ai::DEFAULT_MODEL;
use crate::services::paths;

pub const LLAMA_API_BASE: &str = "https://api.llama.com/compat/v1";
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Llama,
    OpenAI,
    Compatible,
}

/// Chat API configuration for Llama API / OpenAI-compatible endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Llama,
            base_url: LLAMA_API_BASE.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

fn infer_provider(base_url: &str) -> AiProvider {
    let base = base_url.trim().to_ascii_lowercase();
    if base.contains("api.llama.com") {
        return AiProvider::Llama;
    }
    if base.contains("api.openai.com") {
        return AiProvider::OpenAI;
    }
    AiProvider::Compatible
}

fn normalize_api_base(provider: AiProvider, base_url: &str) -> String {
    let mut base = base_url.trim().trim_end_matches('/').to_string();

    match provider {
        AiProvider::Llama => {
            // The native API lives under /v1; chat completions in OpenAI shape under /compat/v1.
            if base.ends_with("/compat/v1") {
                return base;
            }
            if base.ends_with("/v1") {
                base.truncate(base.len().saturating_sub(3));
            }
            if !base.ends_with("/compat") {
                base.push_str("/compat");
            }
            base.push_str("/v1");
        }
        AiProvider::OpenAI => {
            if !base.ends_with("/v1") {
                base.push_str("/v1");
            }
        }
        AiProvider::Compatible => {}
    }

    base
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Load chat API configuration from `.env`/environment.
///
/// Reads:
/// - `LLAMA_BASE_URL` (fallback: `AI_BASE_URL`)
/// - `LLAMA_PROVIDER` (fallback: `AI_PROVIDER`)
/// - `LLAMA_API_KEY` (fallback: `AI_API_KEY`, `OPENAI_API_KEY`)
/// - `LLAMA_MODEL` (fallback: `AI_MODEL`)
pub fn load_ai_config() -> AiConfig {
    let _ = dotenvy::dotenv();

    let base_url =
        env_first(&["LLAMA_BASE_URL", "AI_BASE_URL"]).unwrap_or_else(|| LLAMA_API_BASE.to_string());

    let provider = match env_first(&["LLAMA_PROVIDER", "AI_PROVIDER"])
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "llama" | "meta" => AiProvider::Llama,
        "openai" => AiProvider::OpenAI,
        "compatible" | "openai-compatible" | "openai_compatible" => AiProvider::Compatible,
        _ => infer_provider(&base_url),
    };

    AiConfig {
        provider,
        base_url: normalize_api_base(provider, &base_url),
        api_key: env_first(&["LLAMA_API_KEY", "AI_API_KEY", "OPENAI_API_KEY"]).unwrap_or_default(),
        model: env_first(&["LLAMA_MODEL", "AI_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    }
}

/// Public chat API configuration (secrets omitted).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPublicConfig {
    pub provider: AiProvider,
    pub base_url: String,
    pub model: String,
    pub has_api_key: bool,
}

impl From<&AiConfig> for AiPublicConfig {
    fn from(config: &AiConfig) -> Self {
        Self {
            provider: config.provider,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            has_api_key: !config.api_key.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Remote { url: String, token: String },
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database: DatabaseLocation,
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseLocation::Local(path.into()),
        }
    }
}

/// Load history DB configuration.
///
/// Remote Turso/libSQL is used when both `TURSO_DATABASE_URL` (or
/// `LIBSQL_DATABASE_URL`) and `TURSO_AUTH_TOKEN` (or `LIBSQL_AUTH_TOKEN`) are
/// set; otherwise `history.db` in the data directory.
pub fn load_storage_config() -> Result<StorageConfig, String> {
    let _ = dotenvy::dotenv();

    let url = env_first(&["TURSO_DATABASE_URL", "LIBSQL_DATABASE_URL"]);
    let token = env_first(&["TURSO_AUTH_TOKEN", "LIBSQL_AUTH_TOKEN"]);

    if let (Some(url), Some(token)) = (url, token) {
        return Ok(StorageConfig {
            database: DatabaseLocation::Remote { url, token },
        });
    }

    let dir = paths::data_dir()?;
    log::debug!("History DB: TURSO env missing, using data dir {}", dir.display());
    Ok(StorageConfig::local(dir.join("history.db")))
}
