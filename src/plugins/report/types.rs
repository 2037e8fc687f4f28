use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::chat::{now_ms, ChatMode, Message};

/// Characters of content a locked report exposes.
pub const LOCKED_PREVIEW_CHARS: usize = 200;
const LOCKED_PREVIEW_SUFFIX: &str = "...(待解锁)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Completed,
    Expired,
}

/// Persisted artifact of one conversation. Created locally (no server
/// round-trip) the moment the user confirms a new conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub report_id: String,
    pub title: String,
    #[serde(default)]
    pub sub_title: String,
    #[serde(default)]
    pub content: String,
    /// Conversation snapshot at last save.
    #[serde(default)]
    pub messages: Vec<Message>,
    pub status: ReportStatus,
    pub mode: ChatMode,
    pub created_at_ms: u64,
    /// Durably written to the remote store at least once.
    #[serde(default)]
    pub remote_synced: bool,
    /// Attached to an authenticated (non-anonymous) identity.
    #[serde(default)]
    pub user_bound: bool,
    /// True until an invite code is consumed against this report.
    #[serde(default = "default_lock")]
    pub lock: bool,
}

fn default_lock() -> bool {
    true
}

impl Report {
    pub fn new(mode: ChatMode) -> Self {
        Self {
            report_id: generate_report_id(),
            title: generate_report_title(mode),
            sub_title: String::new(),
            content: String::new(),
            messages: Vec::new(),
            status: ReportStatus::Pending,
            mode,
            created_at_ms: now_ms(),
            remote_synced: false,
            user_bound: false,
            lock: true,
        }
    }
}

pub fn generate_report_id() -> String {
    format!("report_{}", Uuid::new_v4())
}

/// `<mode label>-YYYY-MM-DD HH:MM` in local time.
pub fn generate_report_title(mode: ChatMode) -> String {
    format!("{}-{}", mode.label(), Local::now().format("%Y-%m-%d %H:%M"))
}

/// Read shape served to the report view; locked reports carry only the
/// truncated preview in `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    #[serde(default)]
    pub content: String,
    pub status: ReportStatus,
    #[serde(default)]
    pub sub_title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_lock")]
    pub lock: bool,
    pub is_completed: bool,
    #[serde(default)]
    pub mode: Option<ChatMode>,
}

/// Truncated view of locked content: first [`LOCKED_PREVIEW_CHARS`]
/// characters plus the unlock hint.
pub fn locked_preview(content: &str) -> String {
    let preview: String = content.chars().take(LOCKED_PREVIEW_CHARS).collect();
    format!("{preview}{LOCKED_PREVIEW_SUFFIX}")
}
