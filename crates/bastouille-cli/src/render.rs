use bastouille_chat::{TraceEntry, TraceRecord, TranscriptEntry};

/// One line of the debug trace, as printed with `--trace`.
pub fn trace_line(record: &TraceRecord) -> String {
    let at = record.at.format("%H:%M:%S");
    match &record.entry {
        TraceEntry::Thought { content } => format!("{at} 💭 {content}"),
        TraceEntry::ToolCall { tool, args } => format!("{at} 🔧 {tool} {args}"),
        TraceEntry::ToolResult {
            tool,
            result,
            duration_ms,
            ..
        } => match duration_ms {
            Some(ms) => format!("{at} ✅ {tool} ({ms} ms) {result}"),
            None => format!("{at} ✅ {tool} {result}"),
        },
        TraceEntry::Answer { content } => format!("{at} 💬 {content}"),
        TraceEntry::Info { content } => format!("{at} ℹ️ {content}"),
        TraceEntry::Error { content } => format!("{at} ❌ {content}"),
    }
}

pub fn transcript_line(entry: &TranscriptEntry) -> String {
    let marker = if entry.failed { " (échec)" } else { "" };
    format!("[{}]{marker} {}", entry.role.as_str(), entry.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastouille_chat::{MessageId, RequestId, Role};

    /// Record stamped at the Unix epoch so the time prefix is stable.
    fn fixed_record(entry: TraceEntry) -> TraceRecord {
        TraceRecord {
            request_id: RequestId::new(),
            at: Default::default(),
            entry,
        }
    }

    #[test]
    fn tool_result_shows_duration_when_known() {
        let line = trace_line(&fixed_record(TraceEntry::ToolResult {
            tool: "meteo".into(),
            result: "pluie".into(),
            duration_ms: Some(42),
            call: Some(1),
        }));
        assert_eq!(line, "00:00:00 ✅ meteo (42 ms) pluie");
    }

    #[test]
    fn tool_call_prints_args_as_json() {
        let line = trace_line(&fixed_record(TraceEntry::ToolCall {
            tool: "meteo".into(),
            args: serde_json::json!({ "ville": "Lyon" }),
        }));
        assert_eq!(line, "00:00:00 🔧 meteo {\"ville\":\"Lyon\"}");
    }

    #[test]
    fn failed_turns_are_marked() {
        let entry = TranscriptEntry {
            id: MessageId::new(),
            role: Role::Assistant,
            content: "Bonjour⚠️ quota".into(),
            failed: true,
        };
        assert_eq!(transcript_line(&entry), "[assistant] (échec) Bonjour⚠️ quota");
    }
}
