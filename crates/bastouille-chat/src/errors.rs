/// Failures of the byte-stream source for a single request.
///
/// Every variant is terminal for the request it belongs to and never for the
/// session: the next submitted query starts a clean stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, timeout...).
    #[error("request failed: {message}")]
    Request { message: String },
    /// The server answered with a non-success HTTP status.
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
    /// Reading the streamed response body failed mid-way.
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a send-side error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }
}

/// Errors raised by a `KeyValueStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Underlying storage could not be read or written.
    #[error("store i/o error: {0}")]
    Io(String),
    /// Stored bytes were not valid for the expected shape.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Top-level error type for the public chat API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid caller input (for example a blank query).
    #[error("validation error: {0}")]
    Validation(String),
    /// A request is already streaming for this session.
    #[error("a request is already in flight for this session")]
    Busy,
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Persistence collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
