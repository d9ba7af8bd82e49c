use serde::Deserialize as _;

/// One decoded record of the response stream.
///
/// The wire shape is one JSON object per line, tagged by `type`. The set of
/// kinds is closed: an unknown `type` fails to decode and the line is dropped.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// Reasoning text, streamed token by token.
    ThoughtToken {
        #[serde(default)]
        content: String,
    },
    /// A tool invocation started.
    StepStart {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// A tool invocation finished.
    StepEnd {
        tool: String,
        #[serde(default, deserialize_with = "text_or_json")]
        result: String,
        #[serde(default, rename = "duration", deserialize_with = "millis")]
        duration_ms: Option<u64>,
    },
    /// Answer text, streamed token by token.
    MessageToken {
        #[serde(default)]
        content: String,
    },
    /// Answer text delivered in one piece.
    Message {
        #[serde(default)]
        content: String,
    },
    /// Informational note for the trace.
    Info {
        #[serde(default)]
        content: String,
    },
    /// Terminal upstream failure.
    Error {
        #[serde(default)]
        content: String,
    },
}

impl RawEvent {
    /// Decodes a single trimmed, non-empty line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Wire name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThoughtToken { .. } => "thought_token",
            Self::StepStart { .. } => "step_start",
            Self::StepEnd { .. } => "step_end",
            Self::MessageToken { .. } => "message_token",
            Self::Message { .. } => "message",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
        }
    }
}

// Tool results are usually `json.dumps`'d upstream; raw JSON is rendered compactly.
fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(Some(ms.round() as u64)),
        Some(ms) => Err(serde::de::Error::custom(format!(
            "duration must be a non-negative number, got {ms}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_event_kind() {
        let cases = [
            (r#"{"type":"thought_token","content":"hmm"}"#, "thought_token"),
            (r#"{"type":"step_start","tool":"arroser","args":{"l":2}}"#, "step_start"),
            (r#"{"type":"step_end","tool":"arroser","result":"ok","duration":120}"#, "step_end"),
            (r#"{"type":"message_token","content":"Fait."}"#, "message_token"),
            (r#"{"type":"message","content":"Fait."}"#, "message"),
            (r#"{"type":"info","content":"note"}"#, "info"),
            (r#"{"type":"error","content":"quota"}"#, "error"),
        ];
        for (line, kind) in cases {
            let event = RawEvent::from_line(line).expect("decode");
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn step_start_keeps_args_verbatim() {
        let event = RawEvent::from_line(r#"{"type":"step_start","tool":"arroser","args":{"l":2}}"#)
            .expect("decode");
        assert_eq!(
            event,
            RawEvent::StepStart {
                tool: "arroser".into(),
                args: serde_json::json!({"l": 2}),
            }
        );
    }

    #[test]
    fn step_end_renders_object_results_and_rounds_duration() {
        let event = RawEvent::from_line(
            r#"{"type":"step_end","tool":"meteo","result":{"pluie":true},"duration":12.6}"#,
        )
        .expect("decode");
        assert_eq!(
            event,
            RawEvent::StepEnd {
                tool: "meteo".into(),
                result: r#"{"pluie":true}"#.into(),
                duration_ms: Some(13),
            }
        );
    }

    #[test]
    fn step_end_without_duration_is_unknown() {
        let event = RawEvent::from_line(r#"{"type":"step_end","tool":"meteo","result":"{}"}"#)
            .expect("decode");
        assert!(matches!(event, RawEvent::StepEnd { duration_ms: None, .. }));
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(
            RawEvent::from_line(r#"{"type":"step_end","tool":"t","result":"","duration":-1}"#)
                .is_err()
        );
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let event = RawEvent::from_line(r#"{"type":"message_token"}"#).expect("decode");
        assert_eq!(
            event,
            RawEvent::MessageToken {
                content: String::new()
            }
        );
    }

    #[test]
    fn unknown_type_and_truncated_json_fail() {
        assert!(RawEvent::from_line(r#"{"type":"done"}"#).is_err());
        assert!(RawEvent::from_line(r#"{"type":"mess"#).is_err());
    }
}
