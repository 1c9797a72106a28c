use serde_json::Value as JsonValue;

/// One classified unit of the upstream reply stream.
///
/// Each decoded chunk is evaluated on its own: either it is a complete JSON
/// envelope carrying an `error` field, or the whole text is a literal fragment
/// of the assistant reply. There is no partial-JSON buffering across chunks.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    /// Structured error envelope, kept verbatim for passthrough.
    Error(JsonValue),
    /// Literal assistant text fragment.
    Content(String),
}

impl UpstreamFrame {
    pub fn classify(text: &str) -> UpstreamFrame {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
                if value.get("error").is_some() {
                    return UpstreamFrame::Error(value);
                }
            }
        }
        UpstreamFrame::Content(text.to_string())
    }

    pub fn from_chunk(chunk: &[u8]) -> UpstreamFrame {
        Self::classify(&String::from_utf8_lossy(chunk))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, UpstreamFrame::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_is_classified() {
        let frame = UpstreamFrame::classify(r#"{"error":{"message":"expired token"}}"#);
        assert_eq!(
            frame,
            UpstreamFrame::Error(json!({"error":{"message":"expired token"}}))
        );
    }

    #[test]
    fn plain_text_is_content() {
        let frame = UpstreamFrame::classify("Hello");
        assert_eq!(frame, UpstreamFrame::Content("Hello".to_string()));
    }

    #[test]
    fn json_without_error_field_is_content() {
        let frame = UpstreamFrame::classify(r#"{"content":"hi"}"#);
        assert_eq!(
            frame,
            UpstreamFrame::Content(r#"{"content":"hi"}"#.to_string())
        );
    }

    #[test]
    fn malformed_json_is_content() {
        let frame = UpstreamFrame::classify(r#"{"error": trunc"#);
        assert!(!frame.is_error());
    }

    #[test]
    fn invalid_utf8_chunk_falls_back_to_lossy_content() {
        let frame = UpstreamFrame::from_chunk(&[0x48, 0x69, 0xff]);
        assert!(matches!(frame, UpstreamFrame::Content(_)));
    }
}
