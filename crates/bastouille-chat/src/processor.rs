use std::collections::HashMap;

use tracing::{debug, warn};

use crate::conversation::Conversation;
use crate::decoder::LineDecoder;
use crate::event::RawEvent;
use crate::model::{MessageId, RequestId};
use crate::trace::TraceEntry;

/// Prefix of the suffix appended to the assistant turn on an upstream `error` event.
pub const ERROR_EVENT_PREFIX: &str = "⚠️ ";
/// Prefix of the suffix appended to the assistant turn when the transport fails.
pub const TRANSPORT_ERROR_PREFIX: &str = "\n⚠️ Erreur technique : ";

const LOG_PREVIEW_CHARS: usize = 200;

/// Lifecycle of one request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    /// `Completed`, `Failed` and `Cancelled` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A single mutation applied to the projections, in fold order.
#[derive(Clone, Debug, PartialEq)]
pub enum FoldUpdate {
    /// `text` was appended to the transcript entry `id`.
    TranscriptAppended { id: MessageId, text: String },
    /// A new trace record was pushed at `index`.
    TraceAppended { index: usize },
    /// The trace record at `index` had text appended in place.
    TraceExtended { index: usize },
    /// The request moved to a new state.
    StateChanged(RequestState),
}

#[derive(Clone, Copy)]
enum OpenKind {
    Thought,
    Answer,
}

/// Folds the byte stream of one request into a `Conversation`.
///
/// The processor owns the line buffer, the request state and the index of
/// pending tool calls; the projections themselves are borrowed per call so the
/// caller can read them between chunks.
#[derive(Debug)]
pub struct StreamEventProcessor {
    request_id: RequestId,
    assistant_id: MessageId,
    state: RequestState,
    decoder: LineDecoder,
    pending_calls: HashMap<String, Vec<usize>>,
}

impl StreamEventProcessor {
    /// Creates an idle processor that appends answer text to `assistant_id`.
    pub fn new(request_id: RequestId, assistant_id: MessageId) -> Self {
        Self {
            request_id,
            assistant_id,
            state: RequestState::Idle,
            decoder: LineDecoder::default(),
            pending_calls: HashMap::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn assistant_id(&self) -> MessageId {
        self.assistant_id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Moves `Idle` to `Streaming`. No-op in any other state.
    pub fn start(&mut self) -> Vec<FoldUpdate> {
        if self.state != RequestState::Idle {
            return Vec::new();
        }
        debug!(request_id = %self.request_id, "request streaming");
        self.transition(RequestState::Streaming)
    }

    /// Buffers `chunk`, decodes every complete line and folds the events.
    ///
    /// Undecodable lines are dropped with a warning. Events decoded after the
    /// request reached a terminal state are parsed but not folded.
    pub fn push_chunk(&mut self, chunk: &[u8], conversation: &mut Conversation) -> Vec<FoldUpdate> {
        let mut updates = self.start();
        for line in self.decoder.push_chunk(chunk) {
            updates.extend(self.decode_and_apply(&line, conversation));
        }
        updates
    }

    /// Folds one already decoded event.
    pub fn apply(&mut self, event: RawEvent, conversation: &mut Conversation) -> Vec<FoldUpdate> {
        if self.state != RequestState::Streaming {
            debug!(request_id = %self.request_id, state = ?self.state, kind = event.kind(), "ignoring event outside streaming state");
            return Vec::new();
        }
        debug!(request_id = %self.request_id, kind = event.kind(), "folding stream event");

        let mut updates = Vec::new();
        match event {
            RawEvent::ThoughtToken { content } => {
                updates.push(self.extend_or_push(conversation, OpenKind::Thought, content));
            }
            RawEvent::StepStart { tool, args } => {
                let index = conversation.trace.push(
                    self.request_id,
                    TraceEntry::ToolCall {
                        tool: tool.clone(),
                        args,
                    },
                );
                self.pending_calls.entry(tool).or_default().push(index);
                updates.push(FoldUpdate::TraceAppended { index });
            }
            RawEvent::StepEnd {
                tool,
                result,
                duration_ms,
            } => {
                let call = self.take_pending_call(&tool);
                if call.is_none() {
                    debug!(request_id = %self.request_id, tool = %tool, "step_end without pending step_start; recording standalone result");
                }
                let index = conversation.trace.push(
                    self.request_id,
                    TraceEntry::ToolResult {
                        tool,
                        result,
                        duration_ms,
                        call,
                    },
                );
                updates.push(FoldUpdate::TraceAppended { index });
            }
            RawEvent::MessageToken { content } | RawEvent::Message { content } => {
                if conversation.transcript.append(self.assistant_id, &content) {
                    updates.push(FoldUpdate::TranscriptAppended {
                        id: self.assistant_id,
                        text: content.clone(),
                    });
                } else {
                    warn!(request_id = %self.request_id, assistant_id = %self.assistant_id, "assistant transcript entry missing; answer text kept in trace only");
                }
                updates.push(self.extend_or_push(conversation, OpenKind::Answer, content));
            }
            RawEvent::Info { content } => {
                let index = conversation
                    .trace
                    .push(self.request_id, TraceEntry::Info { content });
                updates.push(FoldUpdate::TraceAppended { index });
            }
            RawEvent::Error { content } => {
                warn!(request_id = %self.request_id, error = %content, "upstream reported an error");
                updates.extend(self.record_failure(
                    conversation,
                    format!("{ERROR_EVENT_PREFIX}{content}"),
                    content,
                ));
            }
        }
        updates
    }

    /// Handles end-of-data: the buffered tail is decode-attempted once, then
    /// the request completes unless it already failed.
    pub fn finish(&mut self, conversation: &mut Conversation) -> Vec<FoldUpdate> {
        let mut updates = self.start();
        if let Some(line) = self.decoder.finish() {
            updates.extend(self.decode_and_apply(&line, conversation));
        }
        if self.state == RequestState::Streaming {
            debug!(request_id = %self.request_id, "request completed");
            updates.extend(self.transition(RequestState::Completed));
        }
        updates
    }

    /// Records a transport failure in both projections and ends the request.
    pub fn fail(&mut self, message: &str, conversation: &mut Conversation) -> Vec<FoldUpdate> {
        if self.state.is_terminal() {
            debug!(request_id = %self.request_id, state = ?self.state, "ignoring transport failure after terminal state");
            return Vec::new();
        }
        self.decoder.clear();
        warn!(request_id = %self.request_id, error = %message, "request failed");
        self.record_failure(
            conversation,
            format!("{TRANSPORT_ERROR_PREFIX}{message}"),
            message.to_string(),
        )
    }

    /// Abandons the request: buffered bytes are dropped and nothing else is
    /// folded. The projections keep whatever was already applied.
    pub fn cancel(&mut self) -> Vec<FoldUpdate> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.decoder.clear();
        debug!(request_id = %self.request_id, "request cancelled");
        self.transition(RequestState::Cancelled)
    }

    fn decode_and_apply(&mut self, line: &str, conversation: &mut Conversation) -> Vec<FoldUpdate> {
        match RawEvent::from_line(line) {
            Ok(event) => self.apply(event, conversation),
            Err(e) => {
                let preview: String = line.chars().take(LOG_PREVIEW_CHARS).collect();
                warn!(request_id = %self.request_id, line = %preview, "dropping undecodable stream line: {e}");
                Vec::new()
            }
        }
    }

    fn record_failure(
        &mut self,
        conversation: &mut Conversation,
        suffix: String,
        trace_text: String,
    ) -> Vec<FoldUpdate> {
        let mut updates = Vec::new();
        if conversation
            .transcript
            .append_failure(self.assistant_id, &suffix)
        {
            updates.push(FoldUpdate::TranscriptAppended {
                id: self.assistant_id,
                text: suffix,
            });
        }
        let index = conversation.trace.push(
            self.request_id,
            TraceEntry::Error {
                content: trace_text,
            },
        );
        updates.push(FoldUpdate::TraceAppended { index });
        updates.extend(self.transition(RequestState::Failed));
        updates
    }

    fn extend_or_push(
        &self,
        conversation: &mut Conversation,
        kind: OpenKind,
        text: String,
    ) -> FoldUpdate {
        let trace = &mut conversation.trace;
        let last_index = trace.len().checked_sub(1);
        if let (Some(index), Some(record)) = (last_index, trace.last_mut())
            && record.request_id == self.request_id
        {
            match (kind, &mut record.entry) {
                (OpenKind::Thought, TraceEntry::Thought { content })
                | (OpenKind::Answer, TraceEntry::Answer { content }) => {
                    content.push_str(&text);
                    return FoldUpdate::TraceExtended { index };
                }
                _ => {}
            }
        }
        let entry = match kind {
            OpenKind::Thought => TraceEntry::Thought { content: text },
            OpenKind::Answer => TraceEntry::Answer { content: text },
        };
        FoldUpdate::TraceAppended {
            index: trace.push(self.request_id, entry),
        }
    }

    fn take_pending_call(&mut self, tool: &str) -> Option<usize> {
        let calls = self.pending_calls.get_mut(tool)?;
        let index = calls.pop();
        if calls.is_empty() {
            self.pending_calls.remove(tool);
        }
        index
    }

    fn transition(&mut self, next: RequestState) -> Vec<FoldUpdate> {
        self.state = next;
        vec![FoldUpdate::StateChanged(next)]
    }
}
