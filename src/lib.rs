//! Headless core of the InnerBook guided self-reflection chat.
//!
//! The web and mini-program shells share this crate: conversation
//! orchestration against a streaming chat backend, typewriter pacing,
//! in-band report detection, first-turn prefetch, and the report
//! lifecycle with local-first persistence. Platform concerns (storage,
//! HTTP transport, toast, environment) are injected through the
//! capability traits in [`adapters`].

pub mod adapters;
pub mod plugins;
pub mod services;

pub use adapters::{AdapterBundle, AuthHandle, Env, Storage, Toast, Transport};
pub use plugins::report::{ReportError, ReportManager};
pub use services::chat::{
    ChatError, ChatEvents, ChatMode, ChatSession, Message, MessageStatus, Role,
};
