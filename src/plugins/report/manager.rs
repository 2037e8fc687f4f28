//! Report lifecycle manager.
//!
//! Owns the in-memory report state for the active conversation and its
//! persistence across the local cache and the remote store. Local writes
//! come first and never block on (or fail because of) remote writes;
//! remote convergence is best-effort and retried via
//! [`ReportManager::sync_local_reports_to_remote`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::adapters::Storage;
use crate::services::chat::{
    clean_report_content, contains_report_marker, extract_report_sub_title, ChatApi, ChatError,
    ChatEvents, ChatMode, Message, MessageStatus, Role, WireMessage,
};
use crate::services::identity::{current_username, is_logged_in};
use crate::services::track::Tracker;

use super::error::ReportError;
use super::remote::RemoteStore;
use super::store::LocalReportStore;
use super::types::{locked_preview, Report, ReportDetail, ReportStatus};

const DETAIL_CACHE_TTL: Duration = Duration::from_secs(5);

/// Callback invoked with a report id when the invite-code dialog should
/// be shown.
pub type InviteDialogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// In-memory view of the active report, mirrored to the UI.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportState {
    /// Cleaned report body (sentinel and heading stripped).
    pub content: String,
    pub sub_title: String,
    pub messages: Vec<Message>,
    pub is_generating: bool,
    pub is_pending: bool,
    pub is_complete: bool,
    pub current_report_id: Option<String>,
    pub current_mode: Option<ChatMode>,
    pub report_error: Option<String>,
}

struct ManagerInner {
    storage: Arc<dyn Storage>,
    local: LocalReportStore,
    remote: Arc<dyn RemoteStore>,
    tracker: Arc<dyn Tracker>,
    // NOTE: Using std::sync::Mutex since locks are never held across .await.
    state: Mutex<ReportState>,
    /// Re-entrancy guard for completion (reveal catch-up and retry paths
    /// can both request it).
    saving: AtomicBool,
    last_reported_round: Mutex<HashMap<String, usize>>,
    tracked_start: Mutex<HashSet<String>>,
    detail_cache: Mutex<HashMap<String, (Instant, ReportDetail)>>,
    detail_cache_ttl: Duration,
    invite_dialog: Mutex<Option<InviteDialogFn>>,
}

#[derive(Clone)]
pub struct ReportManager {
    inner: Arc<ManagerInner>,
}

impl ReportManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        remote: Arc<dyn RemoteStore>,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        Self::with_detail_cache_ttl(storage, remote, tracker, DETAIL_CACHE_TTL)
    }

    pub fn with_detail_cache_ttl(
        storage: Arc<dyn Storage>,
        remote: Arc<dyn RemoteStore>,
        tracker: Arc<dyn Tracker>,
        detail_cache_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                local: LocalReportStore::new(storage.clone()),
                storage,
                remote,
                tracker,
                state: Mutex::new(ReportState::default()),
                saving: AtomicBool::new(false),
                last_reported_round: Mutex::new(HashMap::new()),
                tracked_start: Mutex::new(HashSet::new()),
                detail_cache: Mutex::new(HashMap::new()),
                detail_cache_ttl,
                invite_dialog: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ReportState {
        self.inner
            .state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    pub fn register_invite_dialog(&self, callback: InviteDialogFn) {
        if let Ok(mut slot) = self.inner.invite_dialog.lock() {
            *slot = Some(callback);
        }
    }

    fn show_invite_dialog(&self, report_id: &str) {
        let callback = self
            .inner
            .invite_dialog
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(report_id);
        }
    }

    /// Create the report for a newly confirmed conversation: local cache
    /// first (status pending, locked), then best-effort remote. Remote
    /// failure is logged, never returned.
    pub async fn create_report(&self, mode: ChatMode) -> String {
        let report = Report::new(mode);
        let report_id = report.report_id.clone();

        if let Ok(mut state) = self.inner.state.lock() {
            *state = ReportState {
                current_report_id: Some(report_id.clone()),
                current_mode: Some(mode),
                is_pending: true,
                ..ReportState::default()
            };
        }
        self.inner.local.save(&report);

        let logged_in = is_logged_in(self.inner.storage.as_ref());
        let username = logged_in.then(|| current_username(self.inner.storage.as_ref())).flatten();
        match self
            .inner
            .remote
            .upsert_report(&report, ReportStatus::Pending, username.as_deref())
            .await
        {
            Ok(()) => {
                self.inner.local.update(&report_id, |r| {
                    r.remote_synced = true;
                    r.user_bound = logged_in;
                });
            }
            Err(err) => log::error!("报告远端同步失败 ({}): {}", report_id, err),
        }

        report_id
    }

    /// The report sentinel was observed for the first time this turn.
    /// Tracks the exposure once per report.
    pub fn start_report(&self) {
        let report_id = self
            .inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.current_report_id.clone());
        if let Some(report_id) = report_id {
            let first = self
                .inner
                .tracked_start
                .lock()
                .map(|mut set| set.insert(report_id))
                .unwrap_or(false);
            if first {
                self.inner.tracker.track_visit_event("start_generate_report_expose");
            }
        }

        if let Ok(mut state) = self.inner.state.lock() {
            state.is_generating = true;
            state.is_pending = true;
            state.is_complete = false;
            state.report_error = None;
        }
    }

    /// Message-list change: refresh the snapshot in state and the local
    /// cache, and report each new conversation round at most once.
    pub fn update_messages(&self, messages: &[Message]) {
        let report_id = self
            .inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.current_report_id.clone());

        if let Some(report_id) = &report_id {
            let round = messages.iter().filter(|m| m.role == Role::User).count();
            let is_new_round = self
                .inner
                .last_reported_round
                .lock()
                .map(|mut rounds| {
                    let last = rounds.entry(report_id.clone()).or_insert(0);
                    if round > *last {
                        *last = round;
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if is_new_round {
                self.inner.tracker.track_conversation_round(report_id, round);
            }
        }

        if let Ok(mut state) = self.inner.state.lock() {
            state.messages = messages.to_vec();
        }
        if let Some(report_id) = &report_id {
            self.inner
                .local
                .update(report_id, |r| r.messages = messages.to_vec());
        }
    }

    /// Report-stream reveal once the marker has fired. Stores cleaned
    /// content and subtitle in memory only; persistence happens at
    /// completion.
    pub fn update_report_content(&self, raw: &str) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.sub_title = extract_report_sub_title(raw);
            state.content = clean_report_content(raw);
        }
    }

    pub fn set_report_error(&self, message: impl Into<String>) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.report_error = Some(message.into());
            state.is_generating = false;
        }
    }

    /// Finalize the active report: mark completed locally, push to
    /// remote, and resolve local-cache residency by auth state. When the
    /// remote copy is still locked, asks the shell to show the
    /// invite-code dialog.
    pub async fn complete_report(&self) {
        if self.inner.saving.swap(true, Ordering::SeqCst) {
            return;
        }

        let snapshot = {
            let Ok(mut state) = self.inner.state.lock() else {
                self.inner.saving.store(false, Ordering::SeqCst);
                return;
            };
            state.is_generating = false;
            state.is_pending = false;
            state.is_complete = true;
            state.clone()
        };

        if let Some(report_id) = snapshot.current_report_id {
            self.inner.local.update(&report_id, |r| {
                r.content = snapshot.content.clone();
                r.sub_title = snapshot.sub_title.clone();
                r.messages = snapshot.messages.clone();
                r.status = ReportStatus::Completed;
            });

            if let Some(report) = self.inner.local.find(&report_id) {
                let logged_in = is_logged_in(self.inner.storage.as_ref());
                let username = logged_in
                    .then(|| current_username(self.inner.storage.as_ref()))
                    .flatten();
                match self
                    .inner
                    .remote
                    .upsert_report(&report, ReportStatus::Completed, username.as_deref())
                    .await
                {
                    Ok(()) => {
                        if logged_in {
                            // Remote is now authoritative for this user.
                            self.inner.local.remove(&report_id);
                        } else {
                            self.inner.local.update(&report_id, |r| {
                                r.remote_synced = true;
                                r.user_bound = false;
                            });
                        }
                        self.inner.tracker.track_visit_event("complete_report_expose");
                        if report.lock {
                            self.show_invite_dialog(&report_id);
                        }
                    }
                    Err(err) => log::error!("报告远端同步失败 ({}): {}", report_id, err),
                }
            }
        }

        self.inner.saving.store(false, Ordering::SeqCst);
    }

    /// Replay the stored message history through the chat backend to
    /// regenerate a report that failed mid-stream. Content updates are
    /// gated on the sentinel; success finalizes via [`complete_report`].
    ///
    /// [`complete_report`]: Self::complete_report
    pub async fn retry_report(&self, api: &ChatApi) -> Result<(), ReportError> {
        let (messages, mode) = {
            let Ok(mut state) = self.inner.state.lock() else {
                return Ok(());
            };
            if state.messages.is_empty() {
                return Ok(());
            }
            state.report_error = None;
            state.is_generating = true;
            state.is_complete = false;
            (state.messages.clone(), state.current_mode.unwrap_or_default())
        };

        let wire: Vec<WireMessage> = messages.iter().map(WireMessage::from).collect();
        let captured: Mutex<String> = Mutex::new(String::new());
        let on_stream = |snapshot: &str| {
            if !contains_report_marker(snapshot) {
                return;
            }
            if let Ok(mut captured) = captured.lock() {
                *captured = snapshot.to_string();
            }
            self.update_report_content(snapshot);
        };

        match api.send_message(&wire, mode, Some(&on_stream)).await {
            Ok(_full_content) => {
                let report_content = captured.lock().map(|c| c.clone()).unwrap_or_default();
                if !report_content.is_empty() {
                    self.update_report_content(&report_content);
                    self.complete_report().await;
                }
                Ok(())
            }
            Err(err) => {
                self.set_report_error(err.message().to_string());
                Err(err.into())
            }
        }
    }

    /// Push every never-synced completed report to the remote store.
    /// Failures are swallowed per-report; once authenticated, reports
    /// that converged are pruned from the local cache.
    pub async fn sync_local_reports_to_remote(&self) {
        let never_synced: Vec<Report> = self
            .inner
            .local
            .read()
            .into_iter()
            .filter(|r| r.status == ReportStatus::Completed && !r.remote_synced)
            .collect();

        for report in never_synced {
            let logged_in = is_logged_in(self.inner.storage.as_ref());
            let username = logged_in
                .then(|| current_username(self.inner.storage.as_ref()))
                .flatten();
            match self
                .inner
                .remote
                .upsert_report(&report, ReportStatus::Completed, username.as_deref())
                .await
            {
                Ok(()) => {
                    self.inner.local.update(&report.report_id, |r| {
                        r.remote_synced = true;
                        r.user_bound = logged_in;
                    });
                }
                Err(err) => {
                    log::error!("报告远端同步失败 ({}): {}", report.report_id, err);
                }
            }
        }

        if is_logged_in(self.inner.storage.as_ref()) {
            for report in self.inner.local.read() {
                if report.status == ReportStatus::Completed
                    && report.remote_synced
                    && report.user_bound
                {
                    self.inner.local.remove(&report.report_id);
                }
            }
        }
    }

    pub async fn check_login_and_sync(&self) {
        if is_logged_in(self.inner.storage.as_ref()) {
            self.sync_local_reports_to_remote().await;
        }
    }

    /// Consume an invite code against a report. On success the local
    /// copy is unlocked and the detail is re-fetched bypassing the read
    /// cache.
    pub async fn handle_invite_code(
        &self,
        report_id: &str,
        invite_code: &str,
    ) -> Result<(), ReportError> {
        if report_id.is_empty() || invite_code.trim().is_empty() {
            return Err(ReportError::invalid_input("邀请码不能为空"));
        }

        let result = self
            .inner
            .remote
            .call_function(
                "invite-code",
                json!({
                    "action": "consume",
                    "reportId": report_id,
                    "inviteCode": invite_code.trim(),
                }),
            )
            .await?;
        if !result.is_ok() {
            let message = if result.message.is_empty() {
                "邀请码验证失败".to_string()
            } else {
                result.message
            };
            return Err(ReportError::invite_rejected(message));
        }

        self.inner.local.update(report_id, |r| r.lock = false);
        if let Err(err) = self.get_report_detail(report_id, true).await {
            log::warn!("解锁后刷新报告失败 ({}): {}", report_id, err);
        }
        Ok(())
    }

    /// Fetch report detail through a short read cache. Locked reports
    /// serve only the truncated preview; fetching a locked report asks
    /// the shell to show the invite-code dialog.
    pub async fn get_report_detail(
        &self,
        report_id: &str,
        skip_cache: bool,
    ) -> Result<Option<ReportDetail>, ReportError> {
        if report_id.is_empty() {
            return Err(ReportError::invalid_input("reportId 不能为空"));
        }

        if let Ok(mut cache) = self.inner.detail_cache.lock() {
            if skip_cache {
                cache.remove(report_id);
            } else if let Some((fetched_at, detail)) = cache.get(report_id) {
                if fetched_at.elapsed() <= self.inner.detail_cache_ttl {
                    return Ok(Some(detail.clone()));
                }
                cache.remove(report_id);
            }
        }

        let Some(mut detail) = self.inner.remote.get_report(report_id).await? else {
            return Ok(None);
        };
        if detail.lock {
            detail.content = locked_preview(&detail.content);
        }

        if let Ok(mut cache) = self.inner.detail_cache.lock() {
            cache.insert(report_id.to_string(), (Instant::now(), detail.clone()));
        }
        if let Ok(mut state) = self.inner.state.lock() {
            state.content = detail.content.clone();
            state.sub_title = detail.sub_title.clone();
            state.is_complete = detail.is_completed;
            state.current_report_id = Some(report_id.to_string());
        }
        if detail.lock {
            self.show_invite_dialog(report_id);
        }

        Ok(Some(detail))
    }

    /// Most recent pending report for a mode, from the local cache.
    pub fn get_pending_report(&self, mode: ChatMode) -> Option<Report> {
        self.inner.local.pending_by_mode(mode)
    }

    /// Adopt a pending report as the active one; the caller restores its
    /// message snapshot into the session.
    pub fn resume_report(&self, report: &Report) {
        if let Ok(mut state) = self.inner.state.lock() {
            *state = ReportState {
                current_report_id: Some(report.report_id.clone()),
                current_mode: Some(report.mode),
                messages: report.messages.clone(),
                content: report.content.clone(),
                sub_title: report.sub_title.clone(),
                is_pending: true,
                ..ReportState::default()
            };
        }
    }
}

/// Adapts conversation events onto the report lifecycle. Completion is
/// asynchronous (remote sync), so it is spawned rather than awaited
/// inside the event callback.
pub struct ReportBridge {
    manager: ReportManager,
}

impl ReportBridge {
    pub fn new(manager: ReportManager) -> Self {
        Self { manager }
    }
}

impl ChatEvents for ReportBridge {
    fn on_messages_changed(&self, messages: &[Message]) {
        // Reveal ticks replay the whole list once per tick while the reply
        // is still loading; persist only settled snapshots.
        if messages
            .last()
            .is_some_and(|m| m.status == MessageStatus::Loading)
        {
            return;
        }
        self.manager.update_messages(messages);
    }

    fn on_report_start(&self) {
        self.manager.start_report();
    }

    fn on_report_update(&self, displayed: &str) {
        self.manager.update_report_content(displayed);
    }

    fn on_report_complete(&self) {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            manager.complete_report().await;
        });
    }

    fn on_report_error(&self, error: &ChatError) {
        self.manager.set_report_error(error.message().to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::super::remote::FnResult;
    use super::*;
    use crate::adapters::MemoryStorage;
    use crate::services::identity::{CREDENTIALS_STORAGE_KEY, USER_INFO_STORAGE_KEY};
    use crate::services::track::NoopTracker;

    #[derive(Default)]
    struct MockRemote {
        upserts: Mutex<Vec<(String, ReportStatus, Option<String>)>>,
        details: Mutex<HashMap<String, ReportDetail>>,
        fn_results: Mutex<VecDeque<FnResult>>,
        fail_upserts: AtomicBool,
        get_calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for MockRemote {
        async fn get_report(&self, report_id: &str) -> Result<Option<ReportDetail>, ReportError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.details.lock().unwrap().get(report_id).cloned())
        }

        async fn upsert_report(
            &self,
            report: &Report,
            status: ReportStatus,
            username: Option<&str>,
        ) -> Result<(), ReportError> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(ReportError::remote("remote down"));
            }
            self.upserts.lock().unwrap().push((
                report.report_id.clone(),
                status,
                username.map(String::from),
            ));
            Ok(())
        }

        async fn save_messages(
            &self,
            _report_id: &str,
            _messages: &[Message],
        ) -> Result<(), ReportError> {
            Ok(())
        }

        async fn call_function(
            &self,
            _name: &str,
            _payload: Value,
        ) -> Result<FnResult, ReportError> {
            Ok(self
                .fn_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(FnResult {
                    retcode: 0,
                    message: String::new(),
                }))
        }
    }

    #[derive(Default)]
    struct RecordingTracker {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl Tracker for RecordingTracker {
        fn track_event(&self, event: &str, data: Value) {
            self.events.lock().unwrap().push((event.to_string(), data));
        }
    }

    fn log_in(storage: &MemoryStorage) {
        storage.set_item(
            USER_INFO_STORAGE_KEY,
            r#"{"content":{"name":"alice","uid":"uid_1"}}"#,
        );
        storage.set_item(CREDENTIALS_STORAGE_KEY, r#"{"access_token":"tok"}"#);
    }

    fn manager() -> (ReportManager, Arc<MockRemote>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let remote = Arc::new(MockRemote::default());
        let manager = ReportManager::new(storage.clone(), remote.clone(), Arc::new(NoopTracker));
        (manager, remote, storage)
    }

    fn message(id: u64, role: Role, content: &str) -> Message {
        Message {
            id,
            role,
            content: content.to_string(),
            status: MessageStatus::Success,
        }
    }

    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        writes: AtomicUsize,
    }

    impl Storage for CountingStorage {
        fn get_item(&self, key: &str) -> Option<String> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(key, value);
        }

        fn remove_item(&self, key: &str) {
            self.inner.remove_item(key);
        }
    }

    #[tokio::test]
    async fn test_create_report_is_local_first() {
        let (manager, remote, _storage) = manager();
        remote.fail_upserts.store(true, Ordering::SeqCst);

        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;

        // Remote failed, local copy exists untagged.
        let report = manager.get_pending_report(ChatMode::DiscoverSelf).unwrap();
        assert_eq!(report.report_id, report_id);
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.lock);
        assert!(!report.remote_synced);
        assert_eq!(manager.state().current_report_id.as_deref(), Some(report_id.as_str()));
    }

    #[tokio::test]
    async fn test_create_report_tags_sync_outcome() {
        let (manager, remote, storage) = manager();
        log_in(&storage);

        manager.create_report(ChatMode::DiscoverSelf).await;

        let report = manager.get_pending_report(ChatMode::DiscoverSelf).unwrap();
        assert!(report.remote_synced);
        assert!(report.user_bound);
        let upserts = remote.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].1, ReportStatus::Pending);
        assert_eq!(upserts[0].2.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_complete_report_authenticated_evicts_local() {
        let (manager, remote, storage) = manager();
        log_in(&storage);
        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;

        manager.update_messages(&[message(1, Role::User, "你好")]);
        manager.update_report_content("[Report] # 真理捕捉者\n\n你的天赋是...");
        manager.complete_report().await;

        // Remote is authoritative; local copy gone.
        assert!(manager.get_pending_report(ChatMode::DiscoverSelf).is_none());
        let upserts = remote.upserts.lock().unwrap();
        assert_eq!(upserts.last().unwrap().1, ReportStatus::Completed);
        drop(upserts);

        let state = manager.state();
        assert!(state.is_complete);
        assert_eq!(state.sub_title, "真理捕捉者");
        assert_eq!(state.content, "你的天赋是...");
        let _ = report_id;
    }

    #[tokio::test]
    async fn test_complete_report_anonymous_keeps_local_marked_synced() {
        let (manager, _remote, storage) = manager();
        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;

        manager.update_report_content("[Report]\n正文");
        manager.complete_report().await;

        let reports = LocalReportStore::new(storage).read();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_id, report_id);
        assert_eq!(reports[0].status, ReportStatus::Completed);
        assert!(reports[0].remote_synced);
        assert!(!reports[0].user_bound);
    }

    #[tokio::test]
    async fn test_complete_report_shows_invite_dialog_when_locked() {
        let (manager, _remote, _storage) = manager();
        let asked: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let asked_in_cb = asked.clone();
        manager.register_invite_dialog(Arc::new(move |report_id| {
            asked_in_cb.lock().unwrap().push(report_id.to_string());
        }));

        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;
        manager.complete_report().await;

        assert_eq!(*asked.lock().unwrap(), vec![report_id]);
    }

    #[tokio::test]
    async fn test_sync_swallows_per_report_failures_and_prunes_when_logged_in() {
        let (manager, remote, storage) = manager();

        // Seed two completed never-synced reports directly.
        let store = LocalReportStore::new(storage.clone());
        let mut a = Report::new(ChatMode::DiscoverSelf);
        a.status = ReportStatus::Completed;
        a.created_at_ms = 1;
        let mut b = Report::new(ChatMode::UnderstandOthers);
        b.status = ReportStatus::Completed;
        b.created_at_ms = 2;
        store.save(&a);
        store.save(&b);

        // First pass fails entirely: both stay local, unsynced.
        remote.fail_upserts.store(true, Ordering::SeqCst);
        manager.sync_local_reports_to_remote().await;
        assert_eq!(store.read().len(), 2);
        assert!(store.read().iter().all(|r| !r.remote_synced));

        // Second pass, authenticated: both converge and are pruned.
        remote.fail_upserts.store(false, Ordering::SeqCst);
        log_in(&storage);
        manager.check_login_and_sync().await;
        assert!(store.read().is_empty());
        assert_eq!(remote.upserts.lock().unwrap().len(), 2);

        // Redundant call is harmless.
        manager.sync_local_reports_to_remote().await;
        assert_eq!(remote.upserts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invite_code_rejection_and_unlock() {
        let (manager, remote, storage) = manager();
        let store = LocalReportStore::new(storage.clone());
        let report = Report::new(ChatMode::DiscoverSelf);
        store.save(&report);

        remote.fn_results.lock().unwrap().push_back(FnResult {
            retcode: 1001,
            message: "邀请码无效".to_string(),
        });
        let err = manager
            .handle_invite_code(&report.report_id, "BAD-CODE")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::InviteRejected { .. }));
        assert!(store.find(&report.report_id).unwrap().lock);

        remote.fn_results.lock().unwrap().push_back(FnResult {
            retcode: 0,
            message: String::new(),
        });
        manager
            .handle_invite_code(&report.report_id, "GOOD-CODE")
            .await
            .unwrap();
        assert!(!store.find(&report.report_id).unwrap().lock);

        assert!(matches!(
            manager.handle_invite_code(&report.report_id, "  ").await,
            Err(ReportError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_detail_cache_and_locked_preview() {
        let (manager, remote, _storage) = manager();
        let long_content = "内".repeat(300);
        remote.details.lock().unwrap().insert(
            "report_x".to_string(),
            ReportDetail {
                content: long_content.clone(),
                status: ReportStatus::Completed,
                sub_title: "标题".to_string(),
                username: None,
                lock: true,
                is_completed: true,
                mode: Some(ChatMode::DiscoverSelf),
            },
        );

        let detail = manager.get_report_detail("report_x", false).await.unwrap().unwrap();
        assert!(detail.content.ends_with("...(待解锁)"));
        assert_eq!(detail.content.chars().count(), 200 + "...(待解锁)".chars().count());

        // Second read within the TTL is served from cache.
        manager.get_report_detail("report_x", false).await.unwrap();
        assert_eq!(remote.get_calls.load(Ordering::SeqCst), 1);

        // skip_cache bypasses and refreshes.
        remote.details.lock().unwrap().get_mut("report_x").unwrap().lock = false;
        let detail = manager.get_report_detail("report_x", true).await.unwrap().unwrap();
        assert_eq!(remote.get_calls.load(Ordering::SeqCst), 2);
        assert_eq!(detail.content, long_content);

        assert!(manager.get_report_detail("missing", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rounds_reported_once_each() {
        let storage = Arc::new(MemoryStorage::default());
        let remote = Arc::new(MockRemote::default());
        let tracker = Arc::new(RecordingTracker::default());
        let manager = ReportManager::new(storage, remote, tracker.clone());
        manager.create_report(ChatMode::DiscoverSelf).await;

        let round1 = vec![message(1, Role::User, "第一问")];
        manager.update_messages(&round1);
        // Reveal ticks replay the same list; the round must not re-report.
        manager.update_messages(&round1);
        let round2 = vec![
            message(1, Role::User, "第一问"),
            message(2, Role::Assistant, "答"),
            message(3, Role::User, "第二问"),
        ];
        manager.update_messages(&round2);

        let events = tracker.events.lock().unwrap();
        let rounds: Vec<&Value> = events
            .iter()
            .filter(|(event, _)| event == "conversation_round")
            .map(|(_, data)| data)
            .collect();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0]["round"], 1);
        assert_eq!(rounds[1]["round"], 2);
    }

    #[tokio::test]
    async fn test_streamed_report_flows_into_completed_state() {
        use crate::services::chat::testutil::{delta_frame, test_bundle_with_storage, Script, ScriptedTransport};
        use crate::services::chat::ChatSession;
        use crate::services::config::{ChatConfig, TypewriterConfig};
        use crate::services::retry::RetryConfig;

        let storage = Arc::new(MemoryStorage::default());
        let remote = Arc::new(MockRemote::default());
        let manager = ReportManager::new(storage.clone(), remote.clone(), Arc::new(NoopTracker));
        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;

        let transport = Arc::new(ScriptedTransport::new(vec![Script::Stream(vec![
            delta_frame("[Report] # 真理捕捉者\\n\\n"),
            delta_frame("你的天赋是..."),
        ])]));
        let api = ChatApi::new(
            test_bundle_with_storage(transport, storage.clone()),
            ChatConfig::default(),
        );
        let session = ChatSession::with_config(
            ChatMode::DiscoverSelf,
            api,
            RetryConfig::immediate(0),
            TypewriterConfig {
                tick_interval: Duration::from_millis(1),
                ..TypewriterConfig::default()
            },
            Arc::new(ReportBridge::new(manager.clone())),
        );

        session.send_user_message("请生成报告", None).await;
        // Completion runs on a spawned task.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let state = manager.state();
        assert_eq!(state.sub_title, "真理捕捉者");
        assert_eq!(state.content, "你的天赋是...");
        assert!(state.is_complete);
        assert!(!state.is_generating);

        // Anonymous run: the completed report stays local, marked synced.
        let local = LocalReportStore::new(storage).find(&report_id).unwrap();
        assert_eq!(local.status, ReportStatus::Completed);
        assert!(local.remote_synced);
        assert_eq!(
            remote.upserts.lock().unwrap().last().unwrap().1,
            ReportStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_reveal_ticks_do_not_write_local_storage() {
        use crate::services::chat::testutil::{delta_frame, test_bundle_with_storage, Script, ScriptedTransport};
        use crate::services::chat::ChatSession;
        use crate::services::config::{ChatConfig, TypewriterConfig};
        use crate::services::retry::RetryConfig;

        let storage = Arc::new(CountingStorage::default());
        let remote = Arc::new(MockRemote::default());
        let manager = ReportManager::new(storage.clone(), remote, Arc::new(NoopTracker));
        manager.create_report(ChatMode::DiscoverSelf).await;
        let after_create = storage.writes.load(Ordering::SeqCst);

        let transport = Arc::new(ScriptedTransport::new(vec![Script::Stream(vec![
            delta_frame("一段足够长的回复，会被逐字揭示很多次，"),
            delta_frame("后半段把揭示拖得更久一些。"),
        ])]));
        let api = ChatApi::new(
            test_bundle_with_storage(transport, storage.clone()),
            ChatConfig::default(),
        );
        let session = ChatSession::with_config(
            ChatMode::DiscoverSelf,
            api,
            RetryConfig::immediate(0),
            TypewriterConfig {
                tick_interval: Duration::from_millis(1),
                ..TypewriterConfig::default()
            },
            Arc::new(ReportBridge::new(manager.clone())),
        );

        session.send_user_message("你好", None).await;

        // One write for the appended user message, one for the settled
        // turn; reveal ticks must add none.
        let during_turn = storage.writes.load(Ordering::SeqCst) - after_create;
        assert!(during_turn <= 2, "{} local writes during one turn", during_turn);
        // The settled snapshot still reached the local cache.
        let pending = manager.get_pending_report(ChatMode::DiscoverSelf).unwrap();
        assert_eq!(pending.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_report_replays_history() {
        use crate::services::chat::testutil::{delta_frame, test_bundle_with_storage, Script, ScriptedTransport};
        use crate::services::config::ChatConfig;

        let storage = Arc::new(MemoryStorage::default());
        let remote = Arc::new(MockRemote::default());
        let manager = ReportManager::new(storage.clone(), remote.clone(), Arc::new(NoopTracker));
        manager.create_report(ChatMode::DiscoverSelf).await;
        manager.update_messages(&[message(1, Role::User, "你好")]);
        manager.set_report_error("stream cut");

        let transport = Arc::new(ScriptedTransport::new(vec![Script::Stream(vec![
            delta_frame("[Report] # 重试标题\\n重试正文"),
        ])]));
        let api = ChatApi::new(
            test_bundle_with_storage(transport.clone(), storage),
            ChatConfig::default(),
        );

        manager.retry_report(&api).await.unwrap();

        assert_eq!(transport.call_count(), 1);
        let state = manager.state();
        assert_eq!(state.report_error, None);
        assert_eq!(state.sub_title, "重试标题");
        assert_eq!(state.content, "重试正文");
        assert!(state.is_complete);
    }

    #[tokio::test]
    async fn test_retry_report_failure_sets_error() {
        use crate::services::chat::testutil::{test_bundle_with_storage, Script, ScriptedTransport};
        use crate::services::config::ChatConfig;

        let storage = Arc::new(MemoryStorage::default());
        let remote = Arc::new(MockRemote::default());
        let manager = ReportManager::new(storage.clone(), remote, Arc::new(NoopTracker));
        manager.create_report(ChatMode::DiscoverSelf).await;
        manager.update_messages(&[message(1, Role::User, "你好")]);

        let transport = Arc::new(ScriptedTransport::new(vec![Script::Fail(
            "still down".to_string(),
        )]));
        let api = ChatApi::new(
            test_bundle_with_storage(transport, storage),
            ChatConfig::default(),
        );

        let err = manager.retry_report(&api).await.unwrap_err();
        assert!(matches!(err, ReportError::Remote { .. }));
        let state = manager.state();
        assert!(state.report_error.is_some());
        assert!(!state.is_generating);
    }

    #[tokio::test]
    async fn test_resume_pending_report() {
        let (manager, _remote, _storage) = manager();
        let report_id = manager.create_report(ChatMode::DiscoverSelf).await;
        manager.update_messages(&[message(1, Role::User, "进行中的对话")]);

        let pending = manager.get_pending_report(ChatMode::DiscoverSelf).unwrap();
        assert_eq!(pending.report_id, report_id);
        assert_eq!(pending.messages.len(), 1);

        manager.resume_report(&pending);
        let state = manager.state();
        assert_eq!(state.current_report_id.as_deref(), Some(report_id.as_str()));
        assert_eq!(state.messages.len(), 1);
        assert!(state.is_pending);
        assert!(!state.is_complete);
    }
}
