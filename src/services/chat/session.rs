//! Conversation orchestrator: one [`ChatSession`] per open conversation.
//!
//! The session owns the message history and the turn state machine. A
//! turn appends the user message and a loading assistant placeholder,
//! runs the network attempt (or consumes a cached/prefetched response),
//! feeds the typewriter, and finalizes status once the displayed text has
//! caught up with the buffered text. Failures retry automatically up to
//! the configured bound; failures during a report turn preserve the
//! transcript instead of rolling the placeholder back.

use std::sync::{Arc, Mutex, Weak};

use crate::adapters::AdapterBundle;
use crate::services::config::{ChatConfig, TypewriterConfig};
use crate::services::retry::RetryConfig;

use super::api::ChatApi;
use super::error::ChatError;
use super::marker::contains_report_marker;
use super::prefetch::PrefetchCache;
use super::typewriter::{RevealFn, Typewriter};
use super::types::{ChatEvents, ChatMode, Message, MessageIdGen, MessageStatus, Role, WireMessage};

/// Pre-resolved assistant content for the turn being sent, bypassing the
/// network attempt when available.
pub enum CachedResponse {
    /// Content the caller already holds.
    Ready(String),
    /// Consume the prefetch slot for this session's mode. Falls back to a
    /// real request when the prefetch failed or never ran.
    Prefetch,
}

struct SessionState {
    messages: Vec<Message>,
    is_loading: bool,
    /// Set when the report sentinel first appears in displayed text;
    /// reset at the start of every turn (not per attempt).
    report_started: bool,
}

struct SessionInner {
    mode: ChatMode,
    api: ChatApi,
    prefetch: PrefetchCache,
    events: Arc<dyn ChatEvents>,
    retry: RetryConfig,
    typewriter: Typewriter,
    ids: MessageIdGen,
    // NOTE: Using std::sync::Mutex since the lock is never held across .await.
    state: Mutex<SessionState>,
}

/// Cloneable conversation handle. All mutation goes through `&self`; the
/// shell may clone it into tasks and UI callbacks freely.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(mode: ChatMode, adapters: AdapterBundle, events: Arc<dyn ChatEvents>) -> Self {
        let env = adapters.env.clone();
        let api = ChatApi::new(adapters, ChatConfig::load(env.as_ref()));
        Self::with_config(
            mode,
            api,
            RetryConfig::load(env.as_ref()),
            TypewriterConfig::load(env.as_ref()),
            events,
        )
    }

    pub fn with_config(
        mode: ChatMode,
        api: ChatApi,
        retry: RetryConfig,
        typewriter: TypewriterConfig,
        events: Arc<dyn ChatEvents>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                mode,
                api,
                prefetch: PrefetchCache::new(),
                events,
                retry,
                typewriter: Typewriter::new(typewriter),
                ids: MessageIdGen::new(),
                state: Mutex::new(SessionState {
                    messages: Vec::new(),
                    is_loading: false,
                    report_started: false,
                }),
            }),
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.inner.mode
    }

    pub fn api(&self) -> &ChatApi {
        &self.inner.api
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .state
            .lock()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.is_loading)
            .unwrap_or(false)
    }

    /// Speculatively send the opening message so the first real turn can
    /// consume the response via [`CachedResponse::Prefetch`].
    pub fn start_prefetch(&self) {
        self.inner
            .prefetch
            .start(self.inner.api.clone(), self.inner.mode);
    }

    /// Replace the history wholesale, e.g. when resuming a pending report
    /// from local storage. Rejected while a turn is in flight.
    pub fn restore_messages(&self, messages: Vec<Message>) {
        let snapshot = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if state.is_loading {
                return;
            }
            state.messages = messages;
            state.messages.clone()
        };
        self.inner.events.on_messages_changed(&snapshot);
    }

    pub fn clear_messages(&self) {
        self.restore_messages(Vec::new());
    }

    /// Stop the typewriter and discard any prefetch; called on unmount.
    pub fn shutdown(&self) {
        self.inner.typewriter.stop();
        self.inner.prefetch.clear();
    }

    /// Send one user turn. No-op on blank input or while another turn is
    /// in flight.
    pub async fn send_user_message(&self, text: &str, cached: Option<CachedResponse>) {
        if text.trim().is_empty() {
            return;
        }

        let (snapshot, wire, user_id) = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if state.is_loading {
                return;
            }
            let user_id = self.inner.ids.next_id();
            state.messages.push(Message {
                id: user_id,
                role: Role::User,
                content: text.to_string(),
                status: MessageStatus::Local,
            });
            let wire: Vec<WireMessage> = state.messages.iter().map(WireMessage::from).collect();
            (state.messages.clone(), wire, user_id)
        };
        self.inner.events.on_messages_changed(&snapshot);
        self.inner.events.on_user_message_sent(&snapshot);

        self.send_internal(wire, Some(user_id), cached).await;
    }

    /// Re-send the turn that ended in a failed user message: history is
    /// truncated to that message (dropping everything after it) and the
    /// turn replays. No-op unless the message exists with error status.
    pub async fn retry_message(&self, failed_id: u64) {
        let (snapshot, wire) = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if state.is_loading {
                return;
            }
            let Some(index) = state
                .messages
                .iter()
                .position(|m| m.id == failed_id && m.status == MessageStatus::Error)
            else {
                return;
            };
            state.messages.truncate(index + 1);
            let wire: Vec<WireMessage> = state.messages.iter().map(WireMessage::from).collect();
            (state.messages.clone(), wire)
        };
        self.inner.events.on_messages_changed(&snapshot);

        self.send_internal(wire, Some(failed_id), None).await;
    }

    async fn send_internal(
        &self,
        api_messages: Vec<WireMessage>,
        user_msg_id: Option<u64>,
        cached: Option<CachedResponse>,
    ) {
        let inner = &self.inner;
        {
            let Ok(mut state) = inner.state.lock() else {
                return;
            };
            if state.is_loading {
                return;
            }
            state.is_loading = true;
            state.report_started = false;
        }
        inner.typewriter.reset();

        // Assistant placeholder; a retried user message goes back to
        // local so its error badge clears while the turn replays.
        let ai_id = inner.ids.next_id();
        let snapshot = {
            let Ok(mut state) = inner.state.lock() else {
                return;
            };
            if let Some(user_id) = user_msg_id {
                if let Some(user) = state.messages.iter_mut().find(|m| m.id == user_id) {
                    user.status = MessageStatus::Local;
                }
            }
            state.messages.push(Message {
                id: ai_id,
                role: Role::Assistant,
                content: String::new(),
                status: MessageStatus::Loading,
            });
            state.messages.clone()
        };
        inner.events.on_messages_changed(&snapshot);

        let cached_content = match cached {
            Some(CachedResponse::Ready(content)) => Some(content),
            Some(CachedResponse::Prefetch) => {
                let content = inner.prefetch.get_result(inner.mode).await;
                inner.prefetch.clear();
                content
            }
            None => None,
        };

        let mut last_error: Option<ChatError> = None;
        for attempt in 0..=inner.retry.max_auto_retries {
            if attempt > 0 {
                log::warn!(
                    "发送消息失败，正在自动重试 ({}/{})",
                    attempt,
                    inner.retry.max_auto_retries
                );
                inner.typewriter.reset();
                let snapshot = {
                    let Ok(mut state) = inner.state.lock() else {
                        break;
                    };
                    if let Some(placeholder) =
                        state.messages.iter_mut().find(|m| m.id == ai_id)
                    {
                        placeholder.content.clear();
                        placeholder.status = MessageStatus::Loading;
                    }
                    state.messages.clone()
                };
                inner.events.on_messages_changed(&snapshot);

                let delay = inner.retry.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match self
                .run_attempt(&api_messages, ai_id, cached_content.as_deref())
                .await
            {
                Ok(()) => {
                    // Let the displayed text catch up with the buffer
                    // before flipping to success.
                    while !inner.typewriter.caught_up() {
                        tokio::time::sleep(inner.retry.parity_poll_interval).await;
                    }

                    let (snapshot, report_started) = {
                        let Ok(mut state) = inner.state.lock() else {
                            break;
                        };
                        if let Some(assistant) =
                            state.messages.iter_mut().find(|m| m.id == ai_id)
                        {
                            assistant.status = MessageStatus::Success;
                        }
                        if let Some(user_id) = user_msg_id {
                            if let Some(user) =
                                state.messages.iter_mut().find(|m| m.id == user_id)
                            {
                                user.status = MessageStatus::Success;
                            }
                        }
                        (state.messages.clone(), state.report_started)
                    };
                    inner.events.on_messages_changed(&snapshot);
                    if report_started {
                        inner.events.on_report_complete();
                    }
                    last_error = None;
                    break;
                }
                Err(err) => {
                    log::error!("发送消息失败 (第{}次): {}", attempt + 1, err);
                    inner.typewriter.set_source_active(false);
                    inner.typewriter.stop();
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            let report_started = inner
                .state
                .lock()
                .map(|state| state.report_started)
                .unwrap_or(false);

            if report_started {
                // Mid-report failure: keep everything displayed so far and
                // let the report layer drive recovery. The placeholder must
                // still leave the loading state or the next turn would run
                // alongside it.
                let snapshot = {
                    let Ok(mut state) = inner.state.lock() else {
                        return;
                    };
                    if let Some(assistant) =
                        state.messages.iter_mut().find(|m| m.id == ai_id)
                    {
                        assistant.status = MessageStatus::Error;
                    }
                    state.messages.clone()
                };
                inner.events.on_messages_changed(&snapshot);
                inner.events.on_report_error(&err);
            } else {
                let snapshot = {
                    let Ok(mut state) = inner.state.lock() else {
                        return;
                    };
                    state.messages.retain(|m| m.id != ai_id);
                    if let Some(user_id) = user_msg_id {
                        if let Some(user) =
                            state.messages.iter_mut().find(|m| m.id == user_id)
                        {
                            user.status = MessageStatus::Error;
                        }
                    }
                    state.messages.clone()
                };
                inner.events.on_messages_changed(&snapshot);
            }
        }

        if let Ok(mut state) = inner.state.lock() {
            state.is_loading = false;
        }
    }

    /// One network (or cached) attempt. Returns once the full assistant
    /// reply is buffered; the typewriter keeps revealing afterwards.
    async fn run_attempt(
        &self,
        api_messages: &[WireMessage],
        ai_id: u64,
        cached: Option<&str>,
    ) -> Result<(), ChatError> {
        let inner = &self.inner;
        let reveal = Self::reveal_fn(&self.inner, ai_id);

        if let Some(content) = cached {
            inner.typewriter.set_source_active(false);
            inner.typewriter.set_buffer(content);
            inner.typewriter.start(reveal);
            return Ok(());
        }

        inner.typewriter.set_source_active(true);
        let typewriter = inner.typewriter.clone();
        let on_stream = move |snapshot: &str| {
            typewriter.set_buffer(snapshot);
            typewriter.start(reveal.clone());
        };
        let result = inner
            .api
            .send_message(api_messages, inner.mode, Some(&on_stream))
            .await;
        inner.typewriter.set_source_active(false);
        result.map(|_full_content| ())
    }

    /// Reveal callback for one assistant message. Holds a weak reference
    /// so a dropped session cannot be kept alive by its own typewriter.
    fn reveal_fn(inner: &Arc<SessionInner>, ai_id: u64) -> RevealFn {
        let weak: Weak<SessionInner> = Arc::downgrade(inner);
        Arc::new(move |displayed: String| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_reveal(ai_id, displayed);
            }
        })
    }
}

impl SessionInner {
    fn handle_reveal(&self, ai_id: u64, displayed: String) {
        let (snapshot, report_just_started, in_report) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let Some(message) = state.messages.iter_mut().find(|m| m.id == ai_id) else {
                return;
            };
            // A stale tick after finalization or rollback must not write.
            if message.status != MessageStatus::Loading {
                return;
            }
            message.content = displayed.clone();

            let mut report_just_started = false;
            if !state.report_started && contains_report_marker(&displayed) {
                state.report_started = true;
                report_just_started = true;
            }
            (state.messages.clone(), report_just_started, state.report_started)
        };

        self.events.on_messages_changed(&snapshot);
        if report_just_started {
            self.events.on_report_start();
        }
        if in_report {
            self.events.on_report_update(&displayed);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.typewriter.stop();
        self.prefetch.clear();
    }
}
