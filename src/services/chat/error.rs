use serde::{Deserialize, Serialize};

use crate::adapters::TransportError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatError {
    /// Connect/timeout/mid-stream transport failure.
    Transport { message: String },
    /// Non-2xx response from the chat backend.
    Api { message: String },
    /// Session expired; re-login was already triggered.
    Unauthorized { message: String },
    Internal { message: String },
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message }
            | Self::Api { message }
            | Self::Unauthorized { message }
            | Self::Internal { message } => message,
        }
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        Self::transport(err.message)
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { message } => write!(f, "Transport: {}", message),
            Self::Api { message } => write!(f, "Api: {}", message),
            Self::Unauthorized { message } => write!(f, "Unauthorized: {}", message),
            Self::Internal { message } => write!(f, "Internal: {}", message),
        }
    }
}

impl std::error::Error for ChatError {}
