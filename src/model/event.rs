use serde::{Deserialize, Serialize};

use crate::model::report::AnalysisReport;

/// Events yielded by a pipeline run, consumed by the SSE boundary.
///
/// `Complete`, `Empty`, and `Error` are terminal: the run stream yields
/// exactly one of them last and then ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Emitted on entering each pipeline stage.
    Progress { percent: u8, message: String },
    /// One token of the streamed critical analysis.
    StreamToken { text: String },
    /// Successful completion with the typed report.
    Complete { result: AnalysisReport },
    /// No candidate survived the cutoff after the rewrite round.
    Empty {},
    /// Terminal failure with a stable error code.
    Error { code: String, message: String },
}

impl PipelineEvent {
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            percent,
            message: message.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// SSE event name for this kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::StreamToken { .. } => "stream_token",
            Self::Complete { .. } => "complete",
            Self::Empty {} => "empty",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Empty {} | Self::Error { .. }
        )
    }

    /// Encode as one SSE frame: `event: <kind>\ndata: <json>\n\n`.
    ///
    /// The data payload carries only the event fields; the kind travels as
    /// the SSE event name.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("kind");
        }
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.kind(),
            serde_json::to_string(&value)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_wire_format() {
        let frame = PipelineEvent::progress(35, "검색 중").to_sse().unwrap();
        assert!(frame.starts_with("event: progress\ndata: "));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains(r#""percent":35"#));
        assert!(!frame.contains(r#""kind""#));
    }

    #[test]
    fn terminal_events() {
        assert!(PipelineEvent::Empty {}.is_terminal());
        assert!(PipelineEvent::error("InternalError", "boom").is_terminal());
        assert!(PipelineEvent::Complete {
            result: AnalysisReport::empty()
        }
        .is_terminal());
        assert!(!PipelineEvent::progress(10, "x").is_terminal());
        assert!(!PipelineEvent::StreamToken {
            text: "token".into()
        }
        .is_terminal());
    }

    #[test]
    fn event_roundtrip() {
        let original = PipelineEvent::error("PromptInjection", "blocked");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn empty_event_has_empty_payload() {
        let frame = PipelineEvent::Empty {}.to_sse().unwrap();
        assert_eq!(frame, "event: empty\ndata: {}\n\n");
    }
}
