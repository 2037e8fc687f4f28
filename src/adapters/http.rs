//! reqwest-backed [`Transport`] used by the web/desktop shells.

use futures_util::StreamExt;

use super::{HttpBody, HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        let status = response.status().as_u16();

        let body = if request.stream {
            let stream = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::new(e.to_string()))
            });
            HttpBody::Stream(Box::pin(stream))
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::new(e.to_string()))?;
            HttpBody::Buffered(bytes.to_vec())
        };

        Ok(HttpResponse { status, body })
    }
}
