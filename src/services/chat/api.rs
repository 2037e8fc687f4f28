//! Chat backend calls: one POST per turn, buffered or streaming.

use futures_util::StreamExt;

use crate::adapters::{AdapterBundle, HttpBody, HttpRequest};
use crate::services::config::ChatConfig;
use crate::services::identity::current_token;
use crate::services::request::request;

use super::decoder::StreamDecoder;
use super::error::ChatError;
use super::types::{ChatMode, ChatRequestBody, WireMessage};

const FALLBACK_REPLY: &str = "抱歉，我暂时无法回应。";

/// Streaming callback: receives the cumulative content after each delta.
pub type OnStream<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Clone)]
pub struct ChatApi {
    adapters: AdapterBundle,
    config: ChatConfig,
}

impl ChatApi {
    pub fn new(adapters: AdapterBundle, config: ChatConfig) -> Self {
        Self { adapters, config }
    }

    /// Send one chat turn. With `on_stream` the backend streams SSE-style
    /// frames and the callback sees the cumulative content per delta;
    /// without it the backend returns a buffered `{content}` body. Either
    /// way the full assistant reply is returned.
    pub async fn send_message(
        &self,
        messages: &[WireMessage],
        mode: ChatMode,
        on_stream: Option<OnStream<'_>>,
    ) -> Result<String, ChatError> {
        let body = serde_json::to_value(ChatRequestBody {
            mode,
            messages,
            stream: on_stream.is_some(),
        })
        .map_err(|e| ChatError::internal(e.to_string()))?;

        let mut http_request = HttpRequest::post(self.config.chat_url(), body)
            .bearer(current_token(self.adapters.storage.as_ref()).as_deref());
        if on_stream.is_some() {
            http_request = http_request.streaming();
        }

        let response = request(&self.adapters, http_request).await?;
        if !response.ok() {
            let detail = response
                .json()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
                .unwrap_or_else(|| format!("API 请求失败: {}", response.status));
            return Err(ChatError::api(detail));
        }

        let Some(on_stream) = on_stream else {
            let content = response
                .json()
                .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(String::from))
                .unwrap_or_else(|| FALLBACK_REPLY.to_string());
            return Ok(content);
        };

        let mut decoder = StreamDecoder::new();
        match response.body {
            HttpBody::Stream(mut byte_stream) => {
                while let Some(chunk) = byte_stream.next().await {
                    let chunk = chunk.map_err(ChatError::from)?;
                    for snapshot in decoder.push_chunk(&chunk) {
                        on_stream(&snapshot);
                    }
                }
            }
            // A transport may answer a stream request with a buffered
            // body; decode it in one pass.
            HttpBody::Buffered(bytes) => {
                for snapshot in decoder.push_chunk(&bytes) {
                    on_stream(&snapshot);
                }
            }
        }
        if let Some(snapshot) = decoder.finish() {
            on_stream(&snapshot);
        }

        Ok(decoder.full_content().to_string())
    }

    /// Warm the chat service up (health probe); callers fire-and-forget.
    pub async fn warmup(&self) -> Result<(), ChatError> {
        let http_request = HttpRequest::get(self.config.health_url())
            .bearer(current_token(self.adapters.storage.as_ref()).as_deref());
        let response = request(&self.adapters, http_request).await?;
        if !response.ok() {
            return Err(ChatError::api(format!("API 请求失败: {}", response.status)));
        }
        Ok(())
    }
}
