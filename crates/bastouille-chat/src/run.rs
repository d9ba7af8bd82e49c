use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::debug;

use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::model::{MessageId, RequestId};
use crate::processor::{FoldUpdate, RequestState};
use crate::session::{ActiveRequest, ChatSession};
use crate::transport::ChatTransport;

/// Handle used to abandon a streaming request.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Creates a handle and the signal to pass to `SubmitBuilder::abort_signal`.
    pub fn pair() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx })
    }

    /// Requests cancellation. The byte source is dropped at the next await
    /// point and the request ends `Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of an `AbortHandle`.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Every handle dropped: abort can no longer happen.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// How a submitted request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    pub assistant_id: MessageId,
    /// `Completed`, `Failed` or `Cancelled`.
    pub state: RequestState,
    /// Transport failure message when the request failed before or while
    /// reading the stream.
    pub failure: Option<String>,
}

type Observer<'s> = Box<dyn FnMut(&Conversation, &FoldUpdate) + Send + 's>;

/// Builder for submitting one query on a `ChatSession`.
pub struct SubmitBuilder<'s> {
    session: &'s mut ChatSession,
    query: String,
    abort: Option<AbortSignal>,
    observer: Option<Observer<'s>>,
}

impl ChatSession {
    /// Starts building a submission of `query`.
    pub fn submit(&mut self, query: impl Into<String>) -> SubmitBuilder<'_> {
        SubmitBuilder {
            session: self,
            query: query.into(),
            abort: None,
            observer: None,
        }
    }
}

impl<'s> SubmitBuilder<'s> {
    /// Lets the caller abandon the request through the matching `AbortHandle`.
    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// Called after every mutation of the projections, with the projections
    /// already updated.
    pub fn on_update(
        mut self,
        observer: impl FnMut(&Conversation, &FoldUpdate) + Send + 's,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Opens the stream through `transport` and folds it to the end.
    ///
    /// Returns `Err` only when the request could not start (blank query,
    /// request already in flight). Transport failures end the request as
    /// `Failed` and are reported in the outcome and in both projections.
    pub async fn send<T>(self, transport: &T) -> Result<RequestOutcome, ChatError>
    where
        T: ChatTransport + ?Sized,
    {
        let SubmitBuilder {
            session,
            query,
            mut abort,
            mut observer,
        } = self;
        let mut active = session.begin(&query)?;
        let mut notify = |session: &ChatSession, updates: Vec<FoldUpdate>| {
            if let Some(observer) = observer.as_mut() {
                for update in &updates {
                    observer(session.conversation(), update);
                }
            }
        };

        let mut failure = None;

        let stream = tokio::select! {
            biased;
            _ = wait_for_abort(abort.as_mut()) => None,
            opened = transport.open_stream(active.request().clone()) => Some(opened),
        };
        let mut stream = match stream {
            None => {
                let updates = session.cancel(&mut active);
                notify(session, updates);
                return Ok(outcome(&active, failure));
            }
            Some(Err(err)) => {
                let message = err.to_string();
                let updates = session.fail(&mut active, &message);
                notify(session, updates);
                failure = Some(message);
                return Ok(outcome(&active, failure));
            }
            Some(Ok(stream)) => stream,
        };

        while !active.state().is_terminal() {
            tokio::select! {
                biased;
                _ = wait_for_abort(abort.as_mut()) => {
                    debug!(request_id = %active.request_id(), "abort requested");
                    let updates = session.cancel(&mut active);
                    notify(session, updates);
                }
                next = stream.next() => {
                    let updates = match next {
                        Some(Ok(chunk)) => session.fold_chunk(&mut active, &chunk),
                        Some(Err(err)) => {
                            let message = err.to_string();
                            failure = Some(message.clone());
                            session.fail(&mut active, &message)
                        }
                        None => session.complete(&mut active),
                    };
                    notify(session, updates);
                }
            }
        }
        drop(stream);
        Ok(outcome(&active, failure))
    }
}

async fn wait_for_abort(signal: Option<&mut AbortSignal>) {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending::<()>().await,
    }
}

fn outcome(active: &ActiveRequest, failure: Option<String>) -> RequestOutcome {
    RequestOutcome {
        request_id: active.request_id(),
        assistant_id: active.assistant_id(),
        state: active.state(),
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::session::SessionConfig;
    use crate::store::MemoryStore;
    use crate::trace::TraceEntry;
    use crate::transport::{ByteStream, ChatRequest};
    use futures::StreamExt as _;
    use futures::stream;
    use std::sync::{Arc, Mutex};

    enum FakeBehavior {
        Chunks(Vec<Result<&'static str, TransportError>>),
        RefuseWith(TransportError),
        /// Yields the chunks, then never ends.
        Hang(Vec<&'static str>),
    }

    struct FakeTransport {
        behavior: FakeBehavior,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl FakeTransport {
        fn new(behavior: FakeBehavior) -> Self {
            Self {
                behavior,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn chunks(chunks: &[&'static str]) -> Self {
            Self::new(FakeBehavior::Chunks(chunks.iter().map(|c| Ok(*c)).collect()))
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
            self.seen.lock().expect("lock").push(request);
            match &self.behavior {
                FakeBehavior::RefuseWith(err) => Err(err.clone()),
                FakeBehavior::Chunks(chunks) => {
                    let items: Vec<Result<bytes::Bytes, TransportError>> = chunks
                        .iter()
                        .map(|chunk| {
                            chunk
                                .clone()
                                .map(|text| bytes::Bytes::from_static(text.as_bytes()))
                        })
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::Hang(chunks) => {
                    let items: Vec<Result<bytes::Bytes, TransportError>> = chunks
                        .iter()
                        .map(|chunk| Ok(bytes::Bytes::from_static(chunk.as_bytes())))
                        .collect();
                    Ok(Box::pin(stream::iter(items).chain(stream::pending())))
                }
            }
        }
    }

    fn session() -> ChatSession {
        ChatSession::open(SessionConfig::named("run-test"), Arc::new(MemoryStore::new()))
            .expect("open")
    }

    fn last_content(session: &ChatSession) -> String {
        session
            .transcript()
            .last()
            .map(|entry| entry.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn folds_split_records_to_completion() {
        let transport = FakeTransport::chunks(&[
            "{\"type\":\"step_start\",\"tool\":\"arroser\",\"args\":{\"l\":2}}\n{\"type\":\"step_",
            "end\",\"tool\":\"arroser\",\"result\":\"ok\",\"duration\":120}\n",
            "{\"type\":\"message_token\",\"content\":\"Fa",
            "it.\"}\n",
        ]);
        let mut session = session();
        let outcome = session.submit("Arrose le potager").send(&transport).await.expect("send");

        assert_eq!(outcome.state, RequestState::Completed);
        assert_eq!(outcome.failure, None);
        assert_eq!(last_content(&session), "Fait.");
        assert!(!session.is_in_flight());
        let kinds: Vec<&str> = session
            .trace()
            .entries()
            .map(|entry| match entry {
                TraceEntry::Info { .. } => "info",
                TraceEntry::ToolCall { .. } => "tool_call",
                TraceEntry::ToolResult { .. } => "tool_result",
                TraceEntry::Answer { .. } => "answer",
                TraceEntry::Thought { .. } => "thought",
                TraceEntry::Error { .. } => "error",
            })
            .collect();
        assert_eq!(kinds, vec!["info", "tool_call", "tool_result", "answer"]);
    }

    #[tokio::test]
    async fn observer_sees_partial_transcript_as_it_grows() {
        let transport = FakeTransport::chunks(&[
            "{\"type\":\"message_token\",\"content\":\"Bon\"}\n",
            "{\"type\":\"message_token\",\"content\":\"jour\"}\n",
        ]);
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        let mut session = session();
        session
            .submit("Salut")
            .on_update(move |conversation, update| {
                if let FoldUpdate::TranscriptAppended { .. } = update {
                    let text = conversation
                        .transcript
                        .last()
                        .map(|entry| entry.content.clone())
                        .unwrap_or_default();
                    sink.lock().expect("lock").push(text);
                }
            })
            .send(&transport)
            .await
            .expect("send");

        assert_eq!(
            *snapshots.lock().expect("lock"),
            vec!["Bon".to_string(), "Bonjour".to_string()]
        );
    }

    #[tokio::test]
    async fn error_event_ends_request_and_leaves_later_chunks_unread() {
        let transport = FakeTransport::chunks(&[
            "{\"type\":\"message_token\",\"content\":\"Bon\"}\n{\"type\":\"message_token\",\"content\":\"jour\"}\n",
            "{\"type\":\"error\",\"content\":\"Gemini indisponible\"}\n",
            "{\"type\":\"message_token\",\"content\":\" !\"}\n",
        ]);
        let mut session = session();
        let outcome = session.submit("Salut").send(&transport).await.expect("send");

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(outcome.failure, None);
        assert_eq!(last_content(&session), "Bonjour⚠️ Gemini indisponible");
        assert!(matches!(
            session.trace().last().map(|r| &r.entry),
            Some(TraceEntry::Error { content }) if content == "Gemini indisponible"
        ));
        assert!(!session.is_in_flight());
    }

    #[tokio::test]
    async fn refused_request_is_a_failed_outcome_not_an_error() {
        let transport = FakeTransport::new(FakeBehavior::RefuseWith(TransportError::status(
            500,
            "Internal Server Error",
        )));
        let mut session = session();
        let outcome = session.submit("Salut").send(&transport).await.expect("send");

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(
            outcome.failure.as_deref(),
            Some("server answered 500: Internal Server Error")
        );
        assert_eq!(
            last_content(&session),
            "\n⚠️ Erreur technique : server answered 500: Internal Server Error"
        );
        assert!(session.transcript().last().expect("entry").failed);
    }

    #[tokio::test]
    async fn read_failure_mid_stream_keeps_partial_text() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("{\"type\":\"message_token\",\"content\":\"Je regarde\"}\n"),
            Err(TransportError::read("connection reset")),
            Ok("{\"type\":\"message_token\",\"content\":\"jamais lu\"}\n"),
        ]));
        let mut session = session();
        let outcome = session.submit("Salut").send(&transport).await.expect("send");

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(
            last_content(&session),
            "Je regarde\n⚠️ Erreur technique : stream read failed: connection reset"
        );
    }

    #[tokio::test]
    async fn abort_cancels_a_hung_stream() {
        let transport = FakeTransport::new(FakeBehavior::Hang(vec![
            "{\"type\":\"message_token\",\"content\":\"Partiel\"}\n",
        ]));
        let (handle, signal) = AbortHandle::pair();
        let mut session = session();
        let outcome = session
            .submit("Salut")
            .abort_signal(signal)
            .on_update(move |_, update| {
                if let FoldUpdate::TranscriptAppended { .. } = update {
                    handle.abort();
                }
            })
            .send(&transport)
            .await
            .expect("send");

        assert_eq!(outcome.state, RequestState::Cancelled);
        assert_eq!(last_content(&session), "Partiel");
        assert!(!session.is_in_flight());
        assert!(!session.transcript().last().expect("entry").failed);
    }

    #[tokio::test]
    async fn abort_before_send_never_reads() {
        let transport = FakeTransport::new(FakeBehavior::Hang(Vec::new()));
        let (handle, signal) = AbortHandle::pair();
        handle.abort();
        let mut session = session();
        let outcome = session
            .submit("Salut")
            .abort_signal(signal)
            .send(&transport)
            .await
            .expect("send");
        assert_eq!(outcome.state, RequestState::Cancelled);
        assert_eq!(last_content(&session), "");
    }

    #[tokio::test]
    async fn second_request_replays_history_with_session_header_id() {
        let transport =
            FakeTransport::chunks(&["{\"type\":\"message\",\"content\":\"En mai.\"}\n"]);
        let mut session = session();
        session.submit("Tomates ?").send(&transport).await.expect("first");
        session.submit("Courgettes ?").send(&transport).await.expect("second");

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert!(seen[0].history.is_empty());
        assert_eq!(seen[1].history.len(), 2);
        assert_eq!(seen[1].history[1].content, "En mai.");
        assert_eq!(seen[1].session_id, session.id());
        assert_ne!(seen[0].request_id, seen[1].request_id);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_transport_call() {
        let transport = FakeTransport::chunks(&[]);
        let mut session = session();
        let err = session.submit("  ").send(&transport).await;
        assert!(matches!(err, Err(ChatError::Validation(_))));
        assert!(transport.seen.lock().expect("lock").is_empty());
    }
}
