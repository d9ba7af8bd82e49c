use std::time::Duration;

use crate::errors::ChatError;

/// Configuration for `HttpTransport`.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Scheme, host and port of the API (for example `http://localhost:8000`).
    pub base_url: String,
    /// Path of the streaming chat endpoint.
    pub chat_path: String,
    /// Header carrying the session id.
    pub conversation_header: String,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Optional bound on the whole request, body streaming included.
    ///
    /// `None` leaves a hung stream open until the caller aborts it.
    pub timeout: Option<Duration>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            chat_path: "/bastouille/chat".to_string(),
            conversation_header: "X-Conversation-ID".to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl HttpTransportConfig {
    /// Creates a config pointing at `base_url` with default path and timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().base_url(base_url)
    }

    /// Builds a config from the environment.
    ///
    /// - `BASTOUILLE_API_URL`: base URL (default `http://localhost:8000`).
    /// - `BASTOUILLE_CHAT_PATH`: endpoint path (default `/bastouille/chat`).
    /// - `BASTOUILLE_TIMEOUT_SECS`: optional whole-request timeout.
    pub fn from_env() -> Result<Self, ChatError> {
        let mut config = Self::default();
        if let Some(url) = non_empty_env("BASTOUILLE_API_URL") {
            config.base_url = url;
        }
        if let Some(path) = non_empty_env("BASTOUILLE_CHAT_PATH") {
            config.chat_path = path;
        }
        if let Some(raw) = non_empty_env("BASTOUILLE_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ChatError::Config(format!(
                    "BASTOUILLE_TIMEOUT_SECS must be whole seconds, got {raw:?}"
                ))
            })?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn chat_path(mut self, chat_path: impl Into<String>) -> Self {
        self.chat_path = chat_path.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must start with http:// or https://, got {:?}",
                self.base_url
            )));
        }
        if self.conversation_header.trim().is_empty() {
            return Err(ChatError::Config("conversation_header must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn chat_url(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let path = self.chat_path.trim();
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_joins_base_and_path() {
        assert_eq!(
            HttpTransportConfig::new("http://jardin.local:8000/").chat_url(),
            "http://jardin.local:8000/bastouille/chat"
        );
        assert_eq!(
            HttpTransportConfig::new("https://api.example")
                .chat_path("chef/chat")
                .chat_url(),
            "https://api.example/chef/chat"
        );
    }

    #[test]
    fn validate_rejects_non_http_base_url() {
        let err = HttpTransportConfig::new("localhost:8000").validate();
        assert!(matches!(err, Err(ChatError::Config(msg)) if msg.contains("http://")));
    }

    #[test]
    fn defaults_have_no_total_timeout() {
        let config = HttpTransportConfig::default();
        assert!(config.timeout.is_none());
        assert_eq!(config.conversation_header, "X-Conversation-ID");
    }
}
