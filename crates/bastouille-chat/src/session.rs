use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::errors::{ChatError, StoreError};
use crate::model::{MessageId, RequestId, SessionId};
use crate::processor::{FoldUpdate, RequestState, StreamEventProcessor};
use crate::store::KeyValueStore;
use crate::trace::{Trace, TraceEntry};
use crate::transcript::Transcript;
use crate::transport::ChatRequest;

/// Prefix of the trace entry recording the user's query.
pub const USER_QUERY_PREFIX: &str = "👤 USER: ";

/// What happens to the trace when a new request starts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TracePolicy {
    /// Keep the whole conversation's trace; new requests append after it.
    #[default]
    Session,
    /// Clear the trace at the start of every request.
    PerRequest,
}

/// Configuration used to open a `ChatSession`.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Human-readable session name, used in logs.
    pub name: String,
    /// Store key holding the serialized transcript.
    pub history_key: String,
    /// Store key holding the session id.
    pub session_key: String,
    pub trace_policy: TracePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "bastouille".to_string(),
            history_key: "chat_history_v2_native".to_string(),
            session_key: "bastouille_session_id".to_string(),
            trace_policy: TracePolicy::Session,
        }
    }
}

impl SessionConfig {
    /// Creates a named config with the default store keys.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn trace_policy(mut self, policy: TracePolicy) -> Self {
        self.trace_policy = policy;
        self
    }

    pub fn history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = key.into();
        self
    }

    pub fn session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }
}

/// A request started with `ChatSession::begin`.
///
/// Feed it back to the session with `fold_chunk` and end it with exactly one
/// of `complete`, `fail` or `cancel`.
#[derive(Debug)]
pub struct ActiveRequest {
    request: ChatRequest,
    processor: StreamEventProcessor,
    generation: u64,
    settled: bool,
}

impl ActiveRequest {
    /// The request to hand to a `ChatTransport`.
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    pub fn request_id(&self) -> RequestId {
        self.processor.request_id()
    }

    pub fn assistant_id(&self) -> MessageId {
        self.processor.assistant_id()
    }

    pub fn state(&self) -> RequestState {
        self.processor.state()
    }
}

/// One chat conversation: the two projections plus their persistence.
///
/// At most one request streams at a time.
pub struct ChatSession {
    id: SessionId,
    config: SessionConfig,
    conversation: Conversation,
    store: Arc<dyn KeyValueStore>,
    in_flight: bool,
    generation: u64,
}

impl ChatSession {
    /// Opens a session, restoring its id and transcript from `store`.
    ///
    /// A missing or unreadable session id is replaced by a fresh one; an
    /// unreadable transcript is logged and replaced by an empty one. Only a
    /// store that cannot be read at all fails the open.
    pub fn open(config: SessionConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ChatError> {
        let stored_id = read_or_discard(store.as_ref(), &config.session_key, &config.name)?;
        let id = match stored_id.as_deref().map(str::parse::<SessionId>) {
            Some(Ok(id)) => id,
            Some(Err(e)) => {
                warn!(session = %config.name, "stored session id is invalid, minting a new one: {e}");
                SessionId::new()
            }
            None => SessionId::new(),
        };

        let stored_transcript = read_or_discard(store.as_ref(), &config.history_key, &config.name)?;
        let transcript = match stored_transcript {
            Some(raw) => serde_json::from_str::<Transcript>(&raw).unwrap_or_else(|e| {
                warn!(session = %config.name, "stored transcript is unreadable, starting empty: {e}");
                Transcript::default()
            }),
            None => Transcript::default(),
        };

        let session = Self {
            id,
            config,
            conversation: Conversation::with_transcript(transcript),
            store,
            in_flight: false,
            generation: 0,
        };
        session.persist_session_id();
        info!(session = %session.config.name, session_id = %id, turns = session.transcript().len(), "chat session opened");
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn transcript(&self) -> &Transcript {
        &self.conversation.transcript
    }

    pub fn trace(&self) -> &Trace {
        &self.conversation.trace
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Starts a request for `query`.
    ///
    /// Appends the user turn and an empty assistant placeholder to the
    /// transcript, records the query in the trace and persists the transcript.
    /// The returned request carries the prior non-failed turns as history.
    pub fn begin(&mut self, query: &str) -> Result<ActiveRequest, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::Validation("query must not be empty".into()));
        }
        if self.in_flight {
            return Err(ChatError::Busy);
        }

        let history = self.conversation.transcript.history();
        if self.config.trace_policy == TracePolicy::PerRequest {
            self.conversation.trace.clear();
        }

        let request_id = RequestId::new();
        self.conversation.transcript.push_user(query);
        let assistant_id = self.conversation.transcript.push_assistant_placeholder();
        self.conversation.trace.push(
            request_id,
            TraceEntry::Info {
                content: format!("{USER_QUERY_PREFIX}{query}"),
            },
        );

        let mut processor = StreamEventProcessor::new(request_id, assistant_id);
        processor.start();
        self.in_flight = true;
        self.persist_transcript();

        info!(session_id = %self.id, request_id = %request_id, history_len = history.len(), "chat request started");
        Ok(ActiveRequest {
            request: ChatRequest {
                session_id: self.id,
                request_id,
                message: query.to_string(),
                history,
            },
            processor,
            generation: self.generation,
            settled: false,
        })
    }

    /// Folds one chunk of the response body.
    ///
    /// An upstream `error` event inside the chunk ends the request.
    pub fn fold_chunk(&mut self, active: &mut ActiveRequest, chunk: &[u8]) -> Vec<FoldUpdate> {
        if !self.owns(active) {
            return Vec::new();
        }
        let updates = active.processor.push_chunk(chunk, &mut self.conversation);
        self.settle(active);
        updates
    }

    /// Ends the request at end-of-data.
    pub fn complete(&mut self, active: &mut ActiveRequest) -> Vec<FoldUpdate> {
        if !self.owns(active) {
            return Vec::new();
        }
        let updates = active.processor.finish(&mut self.conversation);
        self.settle(active);
        updates
    }

    /// Ends the request after a transport failure.
    pub fn fail(&mut self, active: &mut ActiveRequest, message: &str) -> Vec<FoldUpdate> {
        if !self.owns(active) {
            return Vec::new();
        }
        let updates = active.processor.fail(message, &mut self.conversation);
        self.settle(active);
        updates
    }

    /// Abandons the request; nothing more is folded for it.
    pub fn cancel(&mut self, active: &mut ActiveRequest) -> Vec<FoldUpdate> {
        if !self.owns(active) {
            return Vec::new();
        }
        let updates = active.processor.cancel();
        self.settle(active);
        updates
    }

    /// Clears both projections and starts a new conversation id.
    ///
    /// A request still streaming is orphaned: its later chunks are ignored.
    /// Store failures are logged; when the persisted transcript cannot be
    /// removed it is overwritten with the now empty one.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.id = SessionId::new();
        self.in_flight = false;
        self.generation = self.generation.wrapping_add(1);
        if let Err(e) = self.store.remove(&self.config.history_key) {
            warn!(session_id = %self.id, "failed to remove persisted transcript: {e}");
            self.persist_transcript();
        }
        self.persist_session_id();
        info!(session = %self.config.name, session_id = %self.id, "chat session reset");
    }

    fn owns(&self, active: &ActiveRequest) -> bool {
        if active.generation == self.generation {
            return true;
        }
        debug!(request_id = %active.request_id(), "ignoring request from before the last reset");
        false
    }

    fn settle(&mut self, active: &mut ActiveRequest) {
        if !active.settled && active.processor.state().is_terminal() {
            active.settled = true;
            self.in_flight = false;
            self.persist_transcript();
            info!(session_id = %self.id, request_id = %active.request_id(), state = ?active.state(), "chat request ended");
        }
    }

    fn persist_session_id(&self) {
        if let Err(e) = self.store.set(&self.config.session_key, &self.id.to_string()) {
            warn!(session_id = %self.id, "failed to persist session id: {e}");
        }
    }

    fn persist_transcript(&self) {
        let raw = match serde_json::to_string(&self.conversation.transcript) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id = %self.id, "failed to serialize transcript: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.config.history_key, &raw) {
            warn!(session_id = %self.id, "failed to persist transcript: {e}");
        }
    }
}

/// Reads `key`, treating a value the store cannot decode as absent.
fn read_or_discard(
    store: &dyn KeyValueStore,
    key: &str,
    session: &str,
) -> Result<Option<String>, StoreError> {
    match store.get(key) {
        Err(StoreError::Serialization(e)) => {
            warn!(session = %session, key = %key, "stored value is unreadable, ignoring it: {e}");
            Ok(None)
        }
        other => other,
    }
}
