//! Capability traits the core consumes.
//!
//! Each platform shell (web, mini-program, desktop) builds an
//! [`AdapterBundle`] once at startup and hands it to the session and
//! report manager constructors. Nothing in this crate reaches for
//! ambient globals; tests construct a fresh bundle per case.

mod http;
mod memory;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

pub use http::ReqwestTransport;
pub use memory::{MemoryStorage, NoopAuth, NoopToast, ProcessEnv};

/// Synchronous string-keyed, string-valued storage (localStorage-shaped).
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// Environment/config lookup (base URLs, feature flags).
pub trait Env: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Transient user-facing notice.
pub trait Toast: Send + Sync {
    fn info(&self, message: &str, duration_ms: u64);
}

/// Session recovery hook, used by the 401 interceptor.
#[async_trait]
pub trait AuthHandle: Send + Sync {
    async fn sign_in_anonymously(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request shape handed to the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// When true the caller wants an incrementally readable body.
    pub stream: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            stream: false,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Vec::new(),
            body: Some(body),
            stream: false,
        }
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        if let Some(token) = token {
            self.headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Incrementally readable response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

pub enum HttpBody {
    Buffered(Vec<u8>),
    Stream(ByteStream),
}

pub struct HttpResponse {
    pub status: u16,
    pub body: HttpBody,
}

impl HttpResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse a buffered body as JSON. A streaming body or malformed JSON
    /// yields `None`; callers treat that as an absent payload.
    pub fn json(&self) -> Option<serde_json::Value> {
        match &self.body {
            HttpBody::Buffered(bytes) => serde_json::from_slice(bytes).ok(),
            HttpBody::Stream(_) => None,
        }
    }
}

/// Transport-level failure (connect, timeout, mid-stream read).
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// HTTP-like call capability. Implementations must support both a
/// buffered JSON response and an incrementally readable response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// The statically-typed collaborator set injected into the core.
#[derive(Clone)]
pub struct AdapterBundle {
    pub storage: Arc<dyn Storage>,
    pub env: Arc<dyn Env>,
    pub toast: Arc<dyn Toast>,
    pub auth: Arc<dyn AuthHandle>,
    pub transport: Arc<dyn Transport>,
}
