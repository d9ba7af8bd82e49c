//! Common imports for typical chat client usage.
pub use crate::{
    AbortHandle, ChatError, ChatSession, ChatTransport, Conversation, FileStore, FoldUpdate,
    HttpTransport, HttpTransportConfig, MemoryStore, RequestOutcome, RequestState, Role,
    SessionConfig, TraceEntry, TracePolicy, TranscriptEntry,
};
