//! Local report cache over the injected key/value storage.
//!
//! The cache is bounded: at most 3 most-recent completed reports plus at
//! most 1 pending report per mode survive a write. Eviction keys on
//! `(status, mode)`, not raw recency. All operations are best-effort:
//! a storage/parse failure reads as an empty list and never surfaces to
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::Storage;
use crate::services::chat::ChatMode;

use super::types::{Report, ReportStatus};

pub const LOCAL_REPORTS_KEY: &str = "pendingReports";

const COMPLETED_KEEP: usize = 3;

#[derive(Clone)]
pub struct LocalReportStore {
    storage: Arc<dyn Storage>,
}

impl LocalReportStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn read(&self) -> Vec<Report> {
        let Some(raw) = self.storage.get_item(LOCAL_REPORTS_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(reports) => reports,
            Err(err) => {
                log::error!("读取本地报告失败: {}", err);
                Vec::new()
            }
        }
    }

    fn write(&self, reports: &[Report]) {
        match serde_json::to_string(reports) {
            Ok(raw) => self.storage.set_item(LOCAL_REPORTS_KEY, &raw),
            Err(err) => log::error!("写入本地报告失败: {}", err),
        }
    }

    /// Insert or replace by report id, then apply the retention policy.
    pub fn save(&self, report: &Report) {
        let mut reports = self.read();
        match reports.iter_mut().find(|r| r.report_id == report.report_id) {
            Some(existing) => *existing = report.clone(),
            None => reports.push(report.clone()),
        }
        self.write(&trim(reports));
    }

    /// Apply a mutation to the stored report, if present.
    pub fn update<F>(&self, report_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Report),
    {
        let mut reports = self.read();
        let Some(report) = reports.iter_mut().find(|r| r.report_id == report_id) else {
            return false;
        };
        apply(report);
        self.write(&trim(reports));
        true
    }

    pub fn remove(&self, report_id: &str) {
        let mut reports = self.read();
        reports.retain(|r| r.report_id != report_id);
        self.write(&trim(reports));
    }

    pub fn find(&self, report_id: &str) -> Option<Report> {
        self.read().into_iter().find(|r| r.report_id == report_id)
    }

    /// Most recent pending report for a mode, used to resume an
    /// interrupted conversation.
    pub fn pending_by_mode(&self, mode: ChatMode) -> Option<Report> {
        self.read()
            .into_iter()
            .filter(|r| r.mode == mode && r.status == ReportStatus::Pending)
            .max_by_key(|r| r.created_at_ms)
    }
}

/// Retention policy: 3 most-recent completed reports plus the most
/// recent pending report per mode; everything else (including expired
/// reports) is dropped.
fn trim(reports: Vec<Report>) -> Vec<Report> {
    let mut completed: Vec<Report> = reports
        .iter()
        .filter(|r| r.status == ReportStatus::Completed)
        .cloned()
        .collect();
    completed.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
    completed.truncate(COMPLETED_KEEP);

    let mut pending_by_mode: HashMap<ChatMode, Report> = HashMap::new();
    for report in reports {
        if report.status != ReportStatus::Pending {
            continue;
        }
        match pending_by_mode.get(&report.mode) {
            Some(kept) if kept.created_at_ms >= report.created_at_ms => {}
            _ => {
                pending_by_mode.insert(report.mode, report);
            }
        }
    }

    completed.extend(pending_by_mode.into_values());
    completed
}
