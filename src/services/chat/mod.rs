//! Streaming chat orchestration core.
//!
//! One [`ChatSession`] owns the message history and turn lifecycle for a
//! single conversation: it drives the backend call, smooths bursty
//! delivery through the typewriter, watches the displayed text for the
//! report sentinel, and applies the bounded auto-retry policy.

mod api;
mod decoder;
mod error;
mod marker;
mod prefetch;
mod session;
mod typewriter;
mod types;

pub use api::ChatApi;
pub use decoder::StreamDecoder;
pub use error::ChatError;
pub use marker::{
    clean_report_content, contains_report_marker, extract_report_sub_title, REPORT_MARKER,
};
pub use prefetch::{PrefetchCache, PREFETCH_MESSAGE};
pub use session::{CachedResponse, ChatSession};
pub use types::{
    ChatEvents, ChatMode, Message, MessageStatus, NoopEvents, Role, WireMessage,
};

pub(crate) use types::now_ms;

#[cfg(test)]
pub(crate) mod testutil {
    //! Scripted collaborators shared by the chat/report tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::adapters::{
        AdapterBundle, HttpBody, HttpRequest, HttpResponse, MemoryStorage, NoopAuth, NoopToast,
        ProcessEnv, Storage, Transport, TransportError,
    };

    /// One scripted chat-endpoint response.
    pub(crate) enum Script {
        /// SSE-style stream: each entry is one chunk, delivered with a
        /// small pause so the typewriter gets to reveal between chunks.
        Stream(Vec<String>),
        /// Stream that dies mid-flight after its chunks.
        StreamThenFail(Vec<String>, String),
        /// Buffered JSON body with a status code.
        Json(u16, serde_json::Value),
        /// Transport-level failure before any response.
        Fail(String),
    }

    pub(crate) struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        pub(crate) calls: AtomicUsize,
        /// Pause between streamed chunks.
        pub(crate) chunk_delay: Duration,
    }

    impl ScriptedTransport {
        pub(crate) fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                calls: AtomicUsize::new(0),
                chunk_delay: Duration::from_millis(20),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn delta_frame(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{content}\"}}}}]}}\n")
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Fail("script exhausted".to_string()));

            match script {
                Script::Json(status, value) => Ok(HttpResponse {
                    status,
                    body: HttpBody::Buffered(serde_json::to_vec(&value).unwrap()),
                }),
                Script::Fail(message) => Err(TransportError::new(message)),
                Script::Stream(chunks) => Ok(stream_response(chunks, None, self.chunk_delay)),
                Script::StreamThenFail(chunks, message) => {
                    Ok(stream_response(chunks, Some(message), self.chunk_delay))
                }
            }
        }
    }

    fn stream_response(
        chunks: Vec<String>,
        trailing_error: Option<String>,
        delay: Duration,
    ) -> HttpResponse {
        let mut items: Vec<Result<Vec<u8>, TransportError>> = chunks
            .into_iter()
            .map(|c| Ok(c.into_bytes()))
            .collect();
        if let Some(message) = trailing_error {
            items.push(Err(TransportError::new(message)));
        } else {
            items.push(Ok(b"data: [DONE]\n".to_vec()));
        }

        let stream = futures_util::stream::unfold(
            (items.into_iter(), delay),
            |(mut iter, delay)| async move {
                let item = iter.next()?;
                tokio::time::sleep(delay).await;
                Some((item, (iter, delay)))
            },
        );

        HttpResponse {
            status: 200,
            body: HttpBody::Stream(Box::pin(stream)),
        }
    }

    pub(crate) fn test_bundle(transport: Arc<ScriptedTransport>) -> AdapterBundle {
        test_bundle_with_storage(transport, Arc::new(MemoryStorage::default()))
    }

    pub(crate) fn test_bundle_with_storage(
        transport: Arc<ScriptedTransport>,
        storage: Arc<dyn Storage>,
    ) -> AdapterBundle {
        AdapterBundle {
            storage,
            env: Arc::new(ProcessEnv),
            toast: Arc::new(NoopToast),
            auth: Arc::new(NoopAuth),
            transport,
        }
    }
}
