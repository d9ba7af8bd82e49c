use std::pin::Pin;

use crate::errors::TransportError;
use crate::model::{RequestId, SessionId};
use crate::transcript::HistoryTurn;

/// Response body of one request: byte chunks in arrival order, ending with
/// `None` at end-of-data.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// One query submitted to the assistant.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    /// Correlates requests of the same conversation upstream.
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub message: String,
    /// Prior turns, oldest first, without the current query.
    pub history: Vec<HistoryTurn>,
}

impl ChatRequest {
    /// JSON body sent to the chat endpoint.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "message": self.message,
            "history": self.history,
        })
    }
}

/// Source of response streams. Implemented over HTTP by `HttpTransport`;
/// tests provide in-memory fakes.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and returns the streamed response body.
    ///
    /// Errors returned here (connection, non-success status) and errors
    /// yielded by the stream are both terminal for the request.
    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;

    #[test]
    fn body_carries_message_and_history() {
        let request = ChatRequest {
            session_id: SessionId::new(),
            request_id: RequestId::new(),
            message: "Et les courgettes ?".into(),
            history: vec![
                HistoryTurn {
                    role: Role::User,
                    content: "Tomates ?".into(),
                },
                HistoryTurn {
                    role: Role::Assistant,
                    content: "En mai.".into(),
                },
            ],
        };
        assert_eq!(
            request.body(),
            serde_json::json!({
                "message": "Et les courgettes ?",
                "history": [
                    {"role": "user", "content": "Tomates ?"},
                    {"role": "assistant", "content": "En mai."}
                ]
            })
        );
    }
}
