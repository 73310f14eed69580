use serde::{Deserialize, Serialize};

use crate::plugins::history::HistoryError;

/// Errors surfaced by the chat session. All of them are recoverable: the
/// caller shows `message()` and may retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatError {
    /// No API credential is configured.
    Configuration { message: String },
    /// The conversational input is empty or malformed.
    Validation { message: String },
    /// The remote call failed or returned a malformed payload.
    Transport { message: String },
    /// The history store could not durably save a message.
    Persistence { message: String },
    /// Another request for the same conversation is still in flight.
    Busy { message: String },
}

impl ChatError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message }
            | Self::Validation { message }
            | Self::Transport { message }
            | Self::Persistence { message }
            | Self::Busy { message } => message,
        }
    }
}

impl From<HistoryError> for ChatError {
    fn from(err: HistoryError) -> Self {
        Self::persistence(err.to_string())
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration { message } => write!(f, "Configuration: {}", message),
            Self::Validation { message } => write!(f, "Validation: {}", message),
            Self::Transport { message } => write!(f, "Transport: {}", message),
            Self::Persistence { message } => write!(f, "Persistence: {}", message),
            Self::Busy { message } => write!(f, "Busy: {}", message),
        }
    }
}

impl std::error::Error for ChatError {}
