use chrono::{DateTime, Utc};

use crate::model::RequestId;

/// One step of the execution trace shown in the debug panel.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// Reasoning text; extended in place while it is the current entry.
    Thought { content: String },
    /// A tool invocation. Never modified once recorded.
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// Outcome of a tool invocation.
    ToolResult {
        tool: String,
        result: String,
        duration_ms: Option<u64>,
        /// Trace index of the paired `ToolCall`, `None` when no pending call
        /// for this tool was found.
        call: Option<usize>,
    },
    /// Final answer text; extended in place while it is the current entry.
    Answer { content: String },
    /// Informational note (user query echo, upstream `info` events).
    Info { content: String },
    /// Terminal failure of a request.
    Error { content: String },
}

/// A trace entry stamped with the request it belongs to and the client-side
/// time it was first observed.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct TraceRecord {
    pub request_id: RequestId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: TraceEntry,
}

/// Append-only execution log, conversation-scoped.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Trace {
    records: Vec<TraceRecord>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its index.
    pub fn push(&mut self, request_id: RequestId, entry: TraceEntry) -> usize {
        self.records.push(TraceRecord {
            request_id,
            at: Utc::now(),
            entry,
        });
        self.records.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&TraceRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.last()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut TraceRecord> {
        self.records.last_mut()
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Entries without their timestamps, in order.
    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.records.iter().map(|record| &record.entry)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
