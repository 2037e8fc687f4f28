//! Typewriter scheduler: decouples "content received" from "content
//! displayed" so bursty network delivery reveals at a steady pace.
//!
//! The pure pacing logic lives in [`TypewriterCore`]; the scheduler is a
//! spawned task driving it on a fixed interval. Reveal steps adapt to
//! the backlog, so a large gap catches up quickly without jumping whole
//! paragraphs onto the screen.

use std::sync::{Arc, Mutex};

use crate::services::config::TypewriterConfig;

pub(crate) type RevealFn = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Tick {
    /// More characters were revealed; carries the full displayed text.
    Reveal(String),
    /// Caught up, but the source is still streaming.
    Idle,
    /// Caught up and the source is closed; the scheduler self-stops.
    Finished,
}

pub(crate) struct TypewriterCore {
    config: TypewriterConfig,
    buffer: String,
    buffer_chars: usize,
    displayed_chars: usize,
    source_active: bool,
}

impl TypewriterCore {
    pub(crate) fn new(config: TypewriterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            buffer_chars: 0,
            displayed_chars: 0,
            source_active: false,
        }
    }

    /// Replace the buffer with the latest known full text. The buffer is
    /// cumulative and never shrinks within one attempt.
    pub(crate) fn set_buffer(&mut self, text: &str) {
        self.buffer_chars = text.chars().count();
        self.buffer = text.to_string();
    }

    pub(crate) fn set_source_active(&mut self, active: bool) {
        self.source_active = active;
    }

    pub(crate) fn caught_up(&self) -> bool {
        self.displayed_chars >= self.buffer_chars
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_chars = 0;
        self.displayed_chars = 0;
        self.source_active = false;
    }

    pub(crate) fn tick(&mut self) -> Tick {
        if self.displayed_chars < self.buffer_chars {
            let remaining = self.buffer_chars - self.displayed_chars;
            let step = (remaining.div_ceil(self.config.catch_up_divisor) + 1)
                .min(self.config.max_step);
            self.displayed_chars = (self.displayed_chars + step).min(self.buffer_chars);
            Tick::Reveal(self.buffer.chars().take(self.displayed_chars).collect())
        } else if !self.source_active {
            Tick::Finished
        } else {
            Tick::Idle
        }
    }
}

/// Cloneable handle around the shared pacing state and the scheduler
/// task. Starting an already-running scheduler is a no-op; stopping
/// releases the timer so no stale tick outlives a turn.
#[derive(Clone)]
pub(crate) struct Typewriter {
    shared: Arc<TypewriterShared>,
}

struct TypewriterShared {
    // NOTE: Using std::sync::Mutex since locks are never held across .await.
    core: Mutex<TypewriterCore>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    tick_interval: std::time::Duration,
}

impl Typewriter {
    pub(crate) fn new(config: TypewriterConfig) -> Self {
        Self {
            shared: Arc::new(TypewriterShared {
                core: Mutex::new(TypewriterCore::new(config)),
                task: Mutex::new(None),
                tick_interval: config.tick_interval,
            }),
        }
    }

    pub(crate) fn set_buffer(&self, text: &str) {
        if let Ok(mut core) = self.shared.core.lock() {
            core.set_buffer(text);
        }
    }

    pub(crate) fn set_source_active(&self, active: bool) {
        if let Ok(mut core) = self.shared.core.lock() {
            core.set_source_active(active);
        }
    }

    pub(crate) fn caught_up(&self) -> bool {
        self.shared
            .core
            .lock()
            .map(|core| core.caught_up())
            .unwrap_or(true)
    }

    /// Stop the scheduler and clear both cursors. Called at the start of
    /// every attempt so a stale tick can never write into a new
    /// attempt's message.
    pub(crate) fn reset(&self) {
        self.stop();
        if let Ok(mut core) = self.shared.core.lock() {
            core.reset();
        }
    }

    /// Idempotent start.
    pub(crate) fn start(&self, on_reveal: RevealFn) {
        let Ok(mut task) = self.shared.task.lock() else {
            return;
        };
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.tick_interval);
            loop {
                ticker.tick().await;
                let outcome = match shared.core.lock() {
                    Ok(mut core) => core.tick(),
                    Err(_) => break,
                };
                match outcome {
                    Tick::Reveal(text) => on_reveal(text),
                    Tick::Idle => {}
                    Tick::Finished => break,
                }
            }
        }));
    }

    pub(crate) fn stop(&self) {
        if let Ok(mut task) = self.shared.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}
