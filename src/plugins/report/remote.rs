//! Remote report store: collection reads/writes plus named RPC
//! functions (invite-code verification, analytics ingestion).
//!
//! The HTTP implementation speaks to the same backend as the chat
//! endpoint: `POST {base}/db/{collection}/{op}` for collections and
//! `POST {base}/functions/{name}` for RPCs. All calls go through the
//! shared request wrapper so 401 recovery applies here too.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapters::{AdapterBundle, HttpRequest, Storage};
use crate::services::chat::{now_ms, Message};
use crate::services::config::ChatConfig;
use crate::services::identity::{current_token, current_user_id, current_username};
use crate::services::request::request;
use crate::services::track::Tracker;

use super::error::ReportError;
use super::types::{Report, ReportDetail, ReportStatus};

/// Result envelope of a named RPC. `retcode == 0` means success.
#[derive(Debug, Clone, Deserialize)]
pub struct FnResult {
    pub retcode: i64,
    #[serde(default)]
    pub message: String,
}

impl FnResult {
    pub fn is_ok(&self) -> bool {
        self.retcode == 0
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the stored report, `None` when it does not exist.
    async fn get_report(&self, report_id: &str) -> Result<Option<ReportDetail>, ReportError>;

    /// Insert-or-update by report id. `username` binds the report to an
    /// authenticated identity when present. Content arrives already
    /// cleaned (sentinel and heading stripped) and is persisted as-is.
    async fn upsert_report(
        &self,
        report: &Report,
        status: ReportStatus,
        username: Option<&str>,
    ) -> Result<(), ReportError>;

    /// Store the latest conversation snapshot under the report id.
    async fn save_messages(
        &self,
        report_id: &str,
        messages: &[Message],
    ) -> Result<(), ReportError>;

    /// Invoke a named RPC with a JSON payload.
    async fn call_function(&self, name: &str, payload: Value) -> Result<FnResult, ReportError>;
}

pub struct HttpRemoteStore {
    adapters: AdapterBundle,
    base_url: String,
}

impl HttpRemoteStore {
    pub fn new(adapters: AdapterBundle, base_url: impl Into<String>) -> Self {
        Self {
            adapters,
            base_url: base_url.into(),
        }
    }

    /// Base URL from the env adapter (same base as the chat endpoint).
    pub fn load(adapters: AdapterBundle) -> Self {
        let base_url = ChatConfig::load(adapters.env.as_ref()).base_url;
        Self::new(adapters, base_url)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ReportError> {
        let http_request = HttpRequest::post(format!("{}{}", self.base_url, path), body)
            .bearer(current_token(self.adapters.storage.as_ref()).as_deref());
        let response = request(&self.adapters, http_request)
            .await
            .map_err(ReportError::from)?;
        if !response.ok() {
            return Err(ReportError::remote(format!(
                "请求失败: {} {}",
                response.status, path
            )));
        }
        response
            .json()
            .ok_or_else(|| ReportError::remote(format!("响应不是 JSON: {path}")))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_report(&self, report_id: &str) -> Result<Option<ReportDetail>, ReportError> {
        if report_id.is_empty() {
            return Err(ReportError::invalid_input("reportId 不能为空"));
        }
        let payload = self
            .post("/db/report/get", json!({ "reportId": report_id }))
            .await?;
        let Some(record) = payload.pointer("/data/0") else {
            return Ok(None);
        };

        let status: ReportStatus = record
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(ReportStatus::Pending);
        Ok(Some(ReportDetail {
            content: str_field(record, "content"),
            status,
            sub_title: str_field(record, "subTitle"),
            username: record
                .get("username")
                .and_then(|v| v.as_str())
                .map(String::from),
            lock: lock_flag(record.get("lock")),
            is_completed: status == ReportStatus::Completed,
            mode: record
                .get("mode")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok()),
        }))
    }

    async fn upsert_report(
        &self,
        report: &Report,
        status: ReportStatus,
        username: Option<&str>,
    ) -> Result<(), ReportError> {
        if report.report_id.is_empty() {
            return Err(ReportError::invalid_input("reportId 不能为空"));
        }
        let mut record = json!({
            "reportId": report.report_id,
            "title": report.title,
            "subTitle": report.sub_title,
            "content": report.content,
            "status": status,
            "mode": report.mode,
            "lock": report.lock,
            "updatedAt": now_ms(),
        });
        if let Some(username) = username {
            record["username"] = json!(username);
        }
        self.post("/db/report/upsert", record).await?;

        // The conversation snapshot rides along best-effort; losing it
        // must not fail the report write.
        if !report.messages.is_empty() {
            if let Err(err) = self.save_messages(&report.report_id, &report.messages).await {
                log::warn!("保存对话记录失败 ({}): {}", report.report_id, err);
            }
        }
        Ok(())
    }

    async fn save_messages(
        &self,
        report_id: &str,
        messages: &[Message],
    ) -> Result<(), ReportError> {
        if report_id.is_empty() {
            return Err(ReportError::invalid_input("reportId 不能为空"));
        }
        self.post(
            "/db/message/add",
            json!({ "reportId": report_id, "messages": messages }),
        )
        .await?;
        Ok(())
    }

    async fn call_function(&self, name: &str, payload: Value) -> Result<FnResult, ReportError> {
        let response = self.post(&format!("/functions/{name}"), payload).await?;
        serde_json::from_value(response)
            .map_err(|e| ReportError::remote(format!("RPC {name} 响应解析失败: {e}")))
    }
}

fn str_field(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// The stored lock flag is a bool on newer records and 0/1 on older
/// ones; anything absent counts as locked.
fn lock_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(1) != 0,
        _ => true,
    }
}

/// Analytics sink writing through the `track` RPC. Events are
/// fire-and-forget; failures are logged and dropped.
pub struct RemoteTracker {
    remote: Arc<dyn RemoteStore>,
    storage: Arc<dyn Storage>,
}

const DEVICE_ID_STORAGE_KEY: &str = "device_id";

impl RemoteTracker {
    pub fn new(remote: Arc<dyn RemoteStore>, storage: Arc<dyn Storage>) -> Self {
        Self { remote, storage }
    }

    fn device_id(&self) -> String {
        self.storage
            .get_item(DEVICE_ID_STORAGE_KEY)
            .unwrap_or_else(|| "default_device_id".to_string())
    }
}

impl Tracker for RemoteTracker {
    fn track_event(&self, event: &str, data: Value) {
        let mut merged = json!({
            "event": event,
            "bt": "inner-book",
            "userId": current_user_id(self.storage.as_ref()),
            "username": current_username(self.storage.as_ref()),
            "timestamp": now_ms(),
            "deviceId": self.device_id(),
        });
        if let (Some(merged), Some(data)) = (merged.as_object_mut(), data.as_object()) {
            for (key, value) in data {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let remote = self.remote.clone();
        tokio::spawn(async move {
            if let Err(err) = remote.call_function("track", merged).await {
                log::warn!("埋点上报失败: {}", err);
            }
        });
    }
}
