//! Wire protocol of the upstream conversation service.
//!
//! The server sends either textual JSON frames of the form
//! `{"type": "<kind>", "text"?: "<s>"}` or binary frames of 16kHz linear
//! PCM. Binary frames never reach this module.

use crate::error::{BridgeError, Result};
use serde::Deserialize;

/// A decoded upstream text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Partial transcript of the caller's speech.
    Transcript(String),
    /// One token of the generation stream.
    LlmToken(String),
    /// Generation finished; carries the full text.
    LlmDone(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Parses one upstream text frame.
///
/// Invalid JSON or a missing `type` is a protocol error; an unmatched `type`
/// is warned and ignored (`Ok(None)`).
pub fn parse_text_frame(raw: &str) -> Result<Option<ServerFrame>> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|err| BridgeError::UpstreamProtocol {
            message: err.to_string(),
        })?;

    let text = frame.text.unwrap_or_default();
    match frame.kind.as_str() {
        "transcript" => Ok(Some(ServerFrame::Transcript(text))),
        "llm_token" => Ok(Some(ServerFrame::LlmToken(text))),
        "llm_done" => Ok(Some(ServerFrame::LlmDone(text))),
        other => {
            tracing::warn!(kind = other, "unmatched upstream frame type ignored");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcript() {
        let frame = parse_text_frame(r#"{"type": "transcript", "text": "hello there"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(frame, ServerFrame::Transcript("hello there".to_string()));
    }

    #[test]
    fn test_parse_llm_token() {
        let frame = parse_text_frame(r#"{"type": "llm_token", "text": "wor"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(frame, ServerFrame::LlmToken("wor".to_string()));
    }

    #[test]
    fn test_parse_llm_done() {
        let frame = parse_text_frame(r#"{"type": "llm_done", "text": "full reply."}"#)
            .unwrap()
            .unwrap();
        assert_eq!(frame, ServerFrame::LlmDone("full reply.".to_string()));
    }

    #[test]
    fn test_missing_text_defaults_to_empty() {
        let frame = parse_text_frame(r#"{"type": "llm_done"}"#).unwrap().unwrap();
        assert_eq!(frame, ServerFrame::LlmDone(String::new()));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let frame = parse_text_frame(r#"{"type": "telemetry", "text": "x"}"#).unwrap();
        assert!(frame.is_none());
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        let result = parse_text_frame("{not json");
        assert!(matches!(
            result,
            Err(BridgeError::UpstreamProtocol { .. })
        ));
    }

    #[test]
    fn test_missing_type_is_protocol_error() {
        let result = parse_text_frame(r#"{"text": "orphan"}"#);
        assert!(matches!(
            result,
            Err(BridgeError::UpstreamProtocol { .. })
        ));
    }
}
