use crate::trace::Trace;
use crate::transcript::Transcript;

/// The two read models folded from the event stream.
///
/// Both are derived from the same events but are independent: an event
/// updates the transcript, the trace, or both.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    pub transcript: Transcript,
    pub trace: Trace,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcript(transcript: Transcript) -> Self {
        Self {
            transcript,
            trace: Trace::default(),
        }
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.trace.clear();
    }
}
