use futures::StreamExt as _;
use tracing::debug;

use crate::errors::{ChatError, TransportError};
use crate::transport::{ByteStream, ChatRequest, ChatTransport};

use super::config::HttpTransportConfig;

/// `ChatTransport` over a streamed HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport using `HttpTransportConfig::from_env`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(HttpTransportConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        let url = self.config.chat_url();
        debug!(
            request_id = %request.request_id,
            session_id = %request.session_id,
            history_len = request.history.len(),
            url = %url,
            "opening chat stream"
        );

        let response = self
            .client
            .post(&url)
            .header(
                self.config.conversation_header.as_str(),
                request.session_id.to_string(),
            )
            .json(&request.body())
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status
                .canonical_reason()
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| status.to_string());
            let body = response.text().await.unwrap_or_default();
            debug!(request_id = %request.request_id, status = status.as_u16(), body = %body, "chat endpoint rejected request");
            return Err(TransportError::status(status.as_u16(), reason));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(stream))
    }
}
