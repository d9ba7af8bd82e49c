use crate::model::MessageId;

/// Text marking an error report inside a turn's content.
pub const ERROR_MARKER: &str = "⚠️ Erreur";

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the human-facing conversation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEntry {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Set once an error suffix was appended; such turns are not replayed as
    /// history.
    #[serde(default)]
    pub failed: bool,
}

/// A prior turn replayed to the server with a new query.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

/// Ordered list of user/assistant turns. This is the persisted projection.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a user turn and returns its id.
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Role::User, content.into())
    }

    /// Appends an empty assistant turn that streamed text will be appended to.
    pub fn push_assistant_placeholder(&mut self) -> MessageId {
        self.push(Role::Assistant, String::new())
    }

    fn push(&mut self, role: Role, content: String) -> MessageId {
        let id = MessageId::new();
        self.entries.push(TranscriptEntry {
            id,
            role,
            content,
            failed: false,
        });
        id
    }

    /// Appends text to the entry with `id`. Returns `false` when no such entry
    /// exists (for example after the conversation was cleared).
    pub fn append(&mut self, id: MessageId, text: &str) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Appends a visible error suffix and flags the entry as failed.
    pub fn append_failure(&mut self, id: MessageId, suffix: &str) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.content.push_str(suffix);
                entry.failed = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|entry| entry.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut TranscriptEntry> {
        // The in-flight entry is almost always the last one.
        self.entries.iter_mut().rev().find(|entry| entry.id == id)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Turns to replay with the next query, in order.
    ///
    /// Failed entries are skipped, and so are entries carrying
    /// `ERROR_MARKER`: the server also reports some failures as plain answer
    /// text.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.entries
            .iter()
            .filter(|entry| !entry.failed && !entry.content.contains(ERROR_MARKER))
            .map(|entry| HistoryTurn {
                role: entry.role,
                content: entry.content.clone(),
            })
            .collect()
    }
}
