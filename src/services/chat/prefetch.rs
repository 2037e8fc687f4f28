//! First-turn prefetch: the welcome screen speculatively sends the
//! canonical opening message before the user taps "start", hiding
//! first-turn latency. The cached response is a single-use credit;
//! the orchestrator clears it after consumption.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::api::ChatApi;
use super::types::{ChatMode, WireMessage};

pub const PREFETCH_MESSAGE: &str = "你好，我准备好了，请开始吧。";

#[derive(Clone, Debug)]
enum PrefetchState {
    Pending,
    /// `None` means the prefetch failed; callers fall back to a real
    /// request, never an error.
    Done(Option<String>),
}

struct Slot {
    mode: ChatMode,
    rx: watch::Receiver<PrefetchState>,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct PrefetchCache {
    // NOTE: Using std::sync::Mutex since the lock is never held across .await.
    slot: Arc<Mutex<Option<Slot>>>,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-remember. Starting again for the same mode while a
    /// prefetch is in flight or resolved is a no-op; a different mode
    /// replaces the slot.
    pub fn start(&self, api: ChatApi, mode: ChatMode) {
        let Ok(mut slot) = self.slot.lock() else {
            return;
        };
        if let Some(existing) = slot.as_ref() {
            if existing.mode == mode {
                return;
            }
            existing.handle.abort();
        }

        let (tx, rx) = watch::channel(PrefetchState::Pending);
        let handle = tokio::spawn(async move {
            let opening = [WireMessage::user(PREFETCH_MESSAGE)];
            let result = api
                .send_message(&opening, mode, Some(&|_snapshot: &str| {}))
                .await;
            match &result {
                Ok(content) => {
                    log::info!("prefetch resolved, content length: {}", content.chars().count());
                }
                Err(err) => {
                    log::warn!("prefetch failed: {}", err);
                }
            }
            let _ = tx.send(PrefetchState::Done(result.ok()));
        });

        *slot = Some(Slot { mode, rx, handle });
    }

    /// Resolved content if available, awaiting an in-flight prefetch if
    /// not. `None` on mode mismatch, failure, or no prefetch started.
    pub async fn get_result(&self, mode: ChatMode) -> Option<String> {
        let mut rx = {
            let slot = self.slot.lock().ok()?;
            let slot = slot.as_ref()?;
            if slot.mode != mode {
                return None;
            }
            slot.rx.clone()
        };

        let state = rx
            .wait_for(|state| matches!(state, PrefetchState::Done(_)))
            .await
            .ok()?
            .clone();
        match state {
            PrefetchState::Done(content) => content,
            PrefetchState::Pending => None,
        }
    }

    /// Discard all state; called after consumption and on cancel/unmount.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(slot) = slot.take() {
                slot.handle.abort();
            }
        }
    }
}
