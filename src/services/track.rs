//! Analytics events. The trait is the seam; the remote-writing
//! implementation lives next to the report remote store.

use serde_json::{json, Value};

pub trait Tracker: Send + Sync {
    fn track_event(&self, event: &str, data: Value);

    fn track_visit_event(&self, key: &str) {
        self.track_event("visit", json!({ "key": key }));
    }

    /// Max round per report is deduplicated server-side; the caller only
    /// guarantees each round is reported at most once.
    fn track_conversation_round(&self, report_id: &str, round: usize) {
        self.track_event(
            "conversation_round",
            json!({ "key": "conversation_round", "reportId": report_id, "round": round }),
        );
    }
}

/// Sink for headless runs and tests.
#[derive(Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn track_event(&self, event: &str, data: Value) {
        log::debug!("track {}: {}", event, data);
    }
}
