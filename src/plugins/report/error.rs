use serde::{Deserialize, Serialize};

use crate::services::chat::ChatError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReportError {
    InvalidInput { message: String },
    /// Remote store/RPC failure.
    Remote { message: String },
    /// Invite code was rejected by the verification RPC.
    InviteRejected { message: String },
}

impl ReportError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn invite_rejected(message: impl Into<String>) -> Self {
        Self::InviteRejected {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput { message }
            | Self::Remote { message }
            | Self::InviteRejected { message } => message,
        }
    }
}

impl From<ChatError> for ReportError {
    fn from(err: ChatError) -> Self {
        Self::remote(err.message().to_string())
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "InvalidInput: {}", message),
            Self::Remote { message } => write!(f, "Remote: {}", message),
            Self::InviteRejected { message } => write!(f, "InviteRejected: {}", message),
        }
    }
}

impl std::error::Error for ReportError {}
