//! Streaming chat client core for the Baštouille gardening assistant.
//!
//! The assistant answers with newline-delimited JSON events (thoughts, tool
//! steps, answer tokens, errors). This crate folds that byte stream into two
//! projections: a persisted transcript of user and assistant turns, and an
//! in-memory trace of the agent's reasoning.
//!
//! # Builder-first usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bastouille_chat::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let transport = HttpTransport::from_env()?;
//! let mut session = ChatSession::open(SessionConfig::default(), Arc::new(MemoryStore::new()))?;
//!
//! let outcome = session
//!     .submit("Quand planter les tomates ?")
//!     .on_update(|_, update| {
//!         if let FoldUpdate::TranscriptAppended { text, .. } = update {
//!             print!("{text}");
//!         }
//!     })
//!     .send(&transport)
//!     .await?;
//!
//! println!("\n[{:?}]", outcome.state);
//! # Ok(())
//! # }
//! ```
//!
//! Callers that own their byte source can drive the fold directly with
//! `ChatSession::begin`, `fold_chunk` and `complete`, or use
//! `StreamEventProcessor` on a bare `Conversation`.

/// Transcript and trace held together.
pub mod conversation;
/// Line framing over arbitrarily split byte chunks.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Wire events of the chat stream.
pub mod event;
/// HTTP implementation of `ChatTransport`.
pub mod http;
/// Session, request and message identifiers.
pub mod model;
/// Process-wide `tracing` setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Per-request fold of stream events into the projections.
pub mod processor;
/// Submit builder, abort handle and the streaming driver loop.
pub mod run;
/// Conversation session with persistence and request lifecycle.
pub mod session;
/// Key-value persistence for the transcript and session id.
pub mod store;
/// Reasoning trace projection.
pub mod trace;
/// User-visible transcript projection.
pub mod transcript;
/// Byte source contract for chat requests.
pub mod transport;

pub use conversation::Conversation;
pub use decoder::LineDecoder;
pub use errors::{ChatError, StoreError, TransportError};
pub use event::RawEvent;
pub use http::{HttpTransport, HttpTransportConfig};
pub use model::{MessageId, RequestId, SessionId};
pub use observability::init_observability;
pub use processor::{
    ERROR_EVENT_PREFIX, FoldUpdate, RequestState, StreamEventProcessor, TRANSPORT_ERROR_PREFIX,
};
pub use run::{AbortHandle, AbortSignal, RequestOutcome, SubmitBuilder};
pub use session::{ActiveRequest, ChatSession, SessionConfig, TracePolicy, USER_QUERY_PREFIX};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use trace::{Trace, TraceEntry, TraceRecord};
pub use transcript::{ERROR_MARKER, HistoryTurn, Role, Transcript, TranscriptEntry};
pub use transport::{ByteStream, ChatRequest, ChatTransport};
