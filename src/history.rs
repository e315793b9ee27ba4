//! Parse raw session log records from JSONL files.
//!
//! One session is one newline-delimited JSON file. Record types observed:
//! - user: User messages (human prompts, tool results, local command echoes)
//! - assistant: Agent responses (text, thinking, tool_use content blocks)
//! - system: System notices (skipped downstream)
//! - summary: Session summary line
//! - file-history-snapshot, queue-operation: Bookkeeping (skipped downstream)
//!
//! Parsing is tolerant: a malformed line degrades only that line, never the
//! rest of the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Content block within a user or assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(rename = "image")]
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<serde_json::Value>,
    },
}

/// One line of a session log, discriminated by its `type` tag.
/// Each case carries only the fields the normalizer reads from it.
#[derive(Debug, Clone)]
pub enum LogRecord {
    User {
        timestamp: Option<DateTime<Utc>>,
        content: Vec<ContentBlock>,
        session_id: Option<String>,
        sidechain: bool,
    },
    Assistant {
        timestamp: Option<DateTime<Utc>>,
        content: Vec<ContentBlock>,
        model: Option<String>,
        session_id: Option<String>,
        sidechain: bool,
    },
    System {
        timestamp: Option<DateTime<Utc>>,
    },
    Summary {
        summary: String,
    },
    FileHistorySnapshot,
    QueueOperation {
        timestamp: Option<DateTime<Utc>>,
    },
    Other {
        record_type: String,
    },
}

impl LogRecord {
    /// Timestamp for chronology purposes (session start time derivation)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            LogRecord::User { timestamp, .. }
            | LogRecord::Assistant { timestamp, .. }
            | LogRecord::System { timestamp }
            | LogRecord::QueueOperation { timestamp } => *timestamp,
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            LogRecord::User { session_id, .. } | LogRecord::Assistant { session_id, .. } => {
                session_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Raw JSONL record envelope; `message` stays untyped because its shape
/// varies between string content and content-block arrays
#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    message: Option<serde_json::Value>,
    summary: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "isSidechain", default)]
    is_sidechain: bool,
}

/// Parse one log line. Returns None for blank, malformed, or shapeless lines.
pub fn parse_record(line: &str) -> Option<LogRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let envelope: RecordEnvelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            debug!("Skipping malformed log line: {}", e);
            return None;
        }
    };

    let timestamp = envelope.timestamp.as_deref().and_then(parse_timestamp);

    let record = match envelope.record_type.as_deref() {
        Some("user") => LogRecord::User {
            timestamp,
            content: extract_content_blocks(envelope.message.as_ref()),
            session_id: envelope.session_id,
            sidechain: envelope.is_sidechain,
        },
        Some("assistant") => {
            let model = envelope
                .message
                .as_ref()
                .and_then(|m| m.get("model"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            LogRecord::Assistant {
                timestamp,
                content: extract_content_blocks(envelope.message.as_ref()),
                model,
                session_id: envelope.session_id,
                sidechain: envelope.is_sidechain,
            }
        }
        Some("system") => LogRecord::System { timestamp },
        Some("summary") => LogRecord::Summary {
            summary: envelope.summary.unwrap_or_default(),
        },
        Some("file-history-snapshot") => LogRecord::FileHistorySnapshot,
        Some("queue-operation") => LogRecord::QueueOperation { timestamp },
        Some(other) => LogRecord::Other {
            record_type: other.to_string(),
        },
        None => {
            debug!("Skipping log line without a type tag");
            return None;
        }
    };

    Some(record)
}

/// Parse an ISO 8601 timestamp, normalizing to UTC
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract content blocks from a message value.
/// Content can be a bare string (one text block) or an array of blocks.
fn extract_content_blocks(message: Option<&serde_json::Value>) -> Vec<ContentBlock> {
    let content = match message.and_then(|m| m.get("content")) {
        Some(c) => c,
        None => return vec![],
    };

    match content {
        serde_json::Value::Array(arr) => arr
            .iter()
            .filter_map(|item| {
                let block_type = item.get("type")?.as_str()?;
                match block_type {
                    "text" => {
                        let text = item.get("text")?.as_str()?.to_string();
                        if text.is_empty() {
                            return None;
                        }
                        Some(ContentBlock::Text { text })
                    }
                    "thinking" => {
                        let thinking = item.get("thinking")?.as_str()?.to_string();
                        if thinking.is_empty() {
                            return None;
                        }
                        Some(ContentBlock::Thinking { thinking })
                    }
                    "tool_use" => {
                        let id = item.get("id")?.as_str()?.to_string();
                        let name = item.get("name")?.as_str()?.to_string();
                        let input = item.get("input").cloned().unwrap_or(serde_json::Value::Null);
                        Some(ContentBlock::ToolUse { id, name, input })
                    }
                    "tool_result" => {
                        let tool_use_id = item.get("tool_use_id")?.as_str()?.to_string();
                        let content = item.get("content").cloned().unwrap_or(serde_json::Value::Null);
                        let is_error = item.get("is_error").and_then(|v| v.as_bool());
                        Some(ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        })
                    }
                    "image" => Some(ContentBlock::Image {
                        source: item.get("source").cloned(),
                    }),
                    _ => None,
                }
            })
            .collect(),
        serde_json::Value::String(s) => {
            if s.is_empty() {
                vec![]
            } else {
                vec![ContentBlock::Text { text: s.clone() }]
            }
        }
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_record_string_content() {
        let line = r#"{"type":"user","timestamp":"2026-01-05T10:00:00Z","sessionId":"s1","message":{"role":"user","content":"fix the bug"}}"#;
        let record = parse_record(line).unwrap();
        match record {
            LogRecord::User {
                content,
                session_id,
                sidechain,
                timestamp,
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert!(!sidechain);
                assert!(timestamp.is_some());
                assert!(matches!(&content[0], ContentBlock::Text { text } if text == "fix the bug"));
            }
            other => panic!("expected user record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_assistant_record_with_blocks() {
        let line = r#"{"type":"assistant","timestamp":"2026-01-05T10:00:05Z","message":{"role":"assistant","model":"some-model-1","content":[{"type":"thinking","thinking":"hmm"},{"type":"tool_use","id":"toolu_01","name":"Bash","input":{"command":"ls"}},{"type":"text","text":"done"}]}}"#;
        let record = parse_record(line).unwrap();
        match record {
            LogRecord::Assistant { content, model, .. } => {
                assert_eq!(model.as_deref(), Some("some-model-1"));
                assert_eq!(content.len(), 3);
                assert!(matches!(&content[1], ContentBlock::ToolUse { name, .. } if name == "Bash"));
            }
            other => panic!("expected assistant record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_result_block() {
        let line = r#"{"type":"user","timestamp":"2026-01-05T10:00:10Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_01","content":"ok","is_error":false}]}}"#;
        let record = parse_record(line).unwrap();
        match record {
            LogRecord::User { content, .. } => {
                assert!(matches!(
                    &content[0],
                    ContentBlock::ToolResult { tool_use_id, is_error: Some(false), .. }
                        if tool_use_id == "toolu_01"
                ));
            }
            other => panic!("expected user record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_summary_record() {
        let line = r#"{"type":"summary","summary":"Refactor the parser","leafUuid":"abc"}"#;
        match parse_record(line).unwrap() {
            LogRecord::Summary { summary } => assert_eq!(summary, "Refactor the parser"),
            other => panic!("expected summary record, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        assert!(parse_record("{not json").is_none());
        assert!(parse_record("").is_none());
        assert!(parse_record("   ").is_none());
    }

    #[test]
    fn test_unknown_type_becomes_other() {
        let line = r#"{"type":"telemetry","payload":{}}"#;
        match parse_record(line).unwrap() {
            LogRecord::Other { record_type } => assert_eq!(record_type, "telemetry"),
            other => panic!("expected other record, got {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_offset_normalized_to_utc() {
        let ts = parse_timestamp("2026-01-05T12:00:00+02:00").unwrap();
        assert_eq!(ts, parse_timestamp("2026-01-05T10:00:00Z").unwrap());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_empty_text_blocks_dropped() {
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"text","text":""}]}}"#;
        match parse_record(line).unwrap() {
            LogRecord::User { content, .. } => assert!(content.is_empty()),
            other => panic!("expected user record, got {:?}", other),
        }
    }
}
