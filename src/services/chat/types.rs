use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ChatError;

/// Fixed conversation topics the product offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatMode {
    #[serde(rename = "discover-self")]
    DiscoverSelf,
    #[serde(rename = "understand-others")]
    UnderstandOthers,
}

impl Default for ChatMode {
    fn default() -> Self {
        Self::DiscoverSelf
    }
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoverSelf => "discover-self",
            Self::UnderstandOthers => "understand-others",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DiscoverSelf => "发掘自己",
            Self::UnderstandOthers => "了解他人",
        }
    }

    /// Route-parameter parsing: anything unrecognized falls back to the
    /// default mode.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("understand-others") => Self::UnderstandOthers,
            _ => Self::DiscoverSelf,
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Per-message lifecycle. `Local` means optimistically added and not yet
/// network-confirmed (user messages only); `Loading` means the paired
/// assistant response is still streaming/typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Local,
    Loading,
    Success,
    Error,
}

/// One turn of dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

/// Minimal `{role, content}` shape sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Chat turn request body.
#[derive(Debug, Serialize)]
pub struct ChatRequestBody<'a> {
    pub mode: ChatMode,
    pub messages: &'a [WireMessage],
    pub stream: bool,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time-seeded message id allocator. Collisions must not occur within
/// one orchestration run, so ids only ever move forward.
pub(crate) struct MessageIdGen {
    next: AtomicU64,
}

impl MessageIdGen {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(now_ms()),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        let candidate = now_ms();
        let previous = self.next.fetch_max(candidate, Ordering::SeqCst);
        if previous >= candidate {
            self.next.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            candidate
        }
    }
}

/// UI-side observers of one conversation.
///
/// Callbacks fire outside the session's internal lock, in mutation
/// order; implementations may call back into the session.
pub trait ChatEvents: Send + Sync {
    /// Any message-list mutation, including every reveal tick.
    fn on_messages_changed(&self, _messages: &[Message]) {}
    /// A user message was appended, before the assistant placeholder
    /// exists. Used for real-time local persistence.
    fn on_user_message_sent(&self, _messages: &[Message]) {}
    /// The report sentinel was observed for the first time this turn.
    fn on_report_start(&self) {}
    /// Displayed text for the report turn, as revealed so far. Raw form;
    /// apply the marker cleaning transforms before persisting.
    fn on_report_update(&self, _displayed: &str) {}
    fn on_report_complete(&self) {}
    /// A report-generation turn failed after exhausting auto retries.
    fn on_report_error(&self, _error: &ChatError) {}
}

/// Default observer for headless use.
#[derive(Default)]
pub struct NoopEvents;

impl ChatEvents for NoopEvents {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChatMode::DiscoverSelf).unwrap(),
            "\"discover-self\""
        );
        assert_eq!(ChatMode::from_param(Some("understand-others")).label(), "了解他人");
        assert_eq!(ChatMode::from_param(Some("bogus")), ChatMode::DiscoverSelf);
        assert_eq!(ChatMode::from_param(None), ChatMode::DiscoverSelf);
    }

    #[test]
    fn test_message_id_gen_is_strictly_increasing() {
        let ids = MessageIdGen::new();
        let mut last = 0;
        for _ in 0..64 {
            let id = ids.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let message = Message {
            id: 1,
            role: Role::Assistant,
            content: "你好".to_string(),
            status: MessageStatus::Loading,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["status"], "loading");
    }
}
