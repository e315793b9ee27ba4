//! Group raw log records into interactions.
//!
//! An interaction is one human prompt plus everything the agent did in
//! response: thinking, tool calls (with their results merged in), visible
//! text, and context auto-compaction markers. A cancellation closes the
//! interaction; records arriving after it and before the next human prompt
//! are dropped.

use crate::history::{ContentBlock, LogRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payload of one agent-side action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Thinking {
        thinking: String,
    },
    ToolUse {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        tool_input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    Text {
        text: String,
    },
    AutoCompact {
        summary: String,
    },
}

/// One action taken by the agent during an interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// A single interaction: human prompt -> agent actions -> final response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// 1-based ordinal within the session, `interaction-{n}`
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_prompt: String,
    pub actions: Vec<Action>,
    pub final_response: Option<String>,
    pub model: Option<String>,
    pub cancel_reason: Option<String>,
}

const AUTO_COMPACT_PREFIX: &str =
    "This session is being continued from a previous conversation that ran out of context.";

const CANCELLATION_MESSAGES: &[&str] = &[
    "[Request interrupted by user for tool use]",
    "[Request interrupted by user]",
];

const LOCAL_COMMAND_CAVEAT: &str =
    "Caveat: The messages below were generated by the user while running local commands";

fn is_auto_compact(text: &str) -> bool {
    text.trim_start().starts_with(AUTO_COMPACT_PREFIX)
}

fn is_cancellation(text: &str) -> bool {
    CANCELLATION_MESSAGES.contains(&text.trim())
}

fn is_local_command(text: &str) -> bool {
    text.starts_with(LOCAL_COMMAND_CAVEAT)
        || text.contains("<command-name>")
        || text.contains("<command-message>")
        || text.contains("<local-command-stdout>")
        || text.contains("<local-command-stderr>")
}

/// Joined text of a record's text blocks
fn text_of(content: &[ContentBlock]) -> String {
    let texts: Vec<&str> = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    texts.join("\n")
}

/// A user record is human-originated unless it carries tool results or is a
/// local command echo, auto-compact continuation, or cancellation marker
fn is_human_message(content: &[ContentBlock], text: &str) -> bool {
    let has_tool_result = content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
    if has_tool_result {
        return false;
    }
    !is_local_command(text) && !is_auto_compact(text) && !is_cancellation(text)
}

/// Stringify a tool result payload for display
fn result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Group records into interactions, in file order.
///
/// Every human-originated user record opens exactly one interaction;
/// repeated normalization of the same records yields identical ordinal ids.
pub fn build_interactions(records: &[LogRecord]) -> Vec<Interaction> {
    let mut interactions: Vec<Interaction> = Vec::new();
    let mut current: Option<Interaction> = None;
    let mut counter = 0usize;

    for record in records {
        match record {
            LogRecord::User {
                timestamp,
                content,
                sidechain,
                ..
            } => {
                if *sidechain {
                    continue;
                }
                let text = text_of(content);
                if is_human_message(content, &text) {
                    if let Some(done) = current.take() {
                        interactions.push(done);
                    }
                    counter += 1;
                    current = Some(Interaction {
                        id: format!("interaction-{}", counter),
                        timestamp: *timestamp,
                        user_prompt: text,
                        actions: Vec::new(),
                        final_response: None,
                        model: None,
                        cancel_reason: None,
                    });
                } else if let Some(interaction) = current.as_mut() {
                    // First cancellation wins and closes the interaction
                    if interaction.cancel_reason.is_some() {
                        continue;
                    }
                    if is_cancellation(&text) {
                        interaction.cancel_reason = Some(text.trim().to_string());
                    } else if is_auto_compact(&text) {
                        interaction.actions.push(Action {
                            timestamp: *timestamp,
                            kind: ActionKind::AutoCompact { summary: text },
                        });
                    } else {
                        for block in content {
                            if let ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                is_error,
                            } = block
                            {
                                attach_tool_result(
                                    interaction,
                                    tool_use_id,
                                    result_text(content),
                                    is_error.unwrap_or(false),
                                );
                            }
                        }
                    }
                }
            }
            LogRecord::Assistant {
                timestamp,
                content,
                model,
                sidechain,
                ..
            } => {
                if *sidechain {
                    continue;
                }
                let Some(interaction) = current.as_mut() else {
                    continue;
                };
                if interaction.cancel_reason.is_some() {
                    continue;
                }

                if interaction.model.is_none() {
                    interaction.model = model.clone();
                }

                let mut text_parts: Vec<&str> = Vec::new();
                for block in content {
                    match block {
                        ContentBlock::Thinking { thinking } => {
                            interaction.actions.push(Action {
                                timestamp: *timestamp,
                                kind: ActionKind::Thinking {
                                    thinking: thinking.clone(),
                                },
                            });
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            interaction.actions.push(Action {
                                timestamp: *timestamp,
                                kind: ActionKind::ToolUse {
                                    tool_name: name.clone(),
                                    tool_id: Some(id.clone()),
                                    tool_input: input.clone(),
                                    tool_result: None,
                                    is_error: false,
                                },
                            });
                        }
                        ContentBlock::Text { text } => text_parts.push(text),
                        _ => {}
                    }
                }

                if !text_parts.is_empty() {
                    let text = text_parts.join("\n");
                    interaction.actions.push(Action {
                        timestamp: *timestamp,
                        kind: ActionKind::Text { text: text.clone() },
                    });
                    // Last text action wins
                    interaction.final_response = Some(text);
                }
            }
            LogRecord::System { .. }
            | LogRecord::Summary { .. }
            | LogRecord::FileHistorySnapshot
            | LogRecord::QueueOperation { .. } => {}
            LogRecord::Other { record_type } => {
                debug!("Skipping record of unknown type: {}", record_type);
            }
        }
    }

    if let Some(done) = current.take() {
        interactions.push(done);
    }

    interactions
}

/// Merge a tool result into the tool call it answers, matched by call id.
/// Unmatched results are dropped; unmatched calls keep a null result.
fn attach_tool_result(interaction: &mut Interaction, id: &str, result: String, error: bool) {
    for action in &mut interaction.actions {
        if let ActionKind::ToolUse {
            tool_id,
            tool_result,
            is_error,
            ..
        } = &mut action.kind
        {
            if tool_id.as_deref() == Some(id) {
                *tool_result = Some(result);
                *is_error = error;
                return;
            }
        }
    }
    debug!("Tool result {} has no matching tool call", id);
}

// ----------------------------------------------------------------------------
// Derived statistics (presentation helpers, computed on demand)
// ----------------------------------------------------------------------------

/// Tools that modify files
pub const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Elapsed time from the human prompt to the last action carrying a
/// timestamp. None when the prompt or every action lacks one.
pub fn duration(interaction: &Interaction) -> Option<Duration> {
    let start = interaction.timestamp?;
    let end = interaction.actions.iter().rev().find_map(|a| a.timestamp)?;
    Some(end - start)
}

/// Number of tool_use actions whose tool name is in `names`
pub fn tool_use_count(interaction: &Interaction, names: &[&str]) -> usize {
    interaction
        .actions
        .iter()
        .filter(|a| {
            matches!(&a.kind, ActionKind::ToolUse { tool_name, .. }
                if names.contains(&tool_name.as_str()))
        })
        .count()
}

/// Number of file-editing tool calls in the interaction
pub fn edit_count(interaction: &Interaction) -> usize {
    tool_use_count(interaction, EDIT_TOOLS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::parse_record;

    fn records(lines: &[&str]) -> Vec<LogRecord> {
        lines.iter().filter_map(|l| parse_record(l)).collect()
    }

    fn human(ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"user","timestamp":"{}","sessionId":"s1","message":{{"role":"user","content":"{}"}}}}"#,
            ts, text
        )
    }

    fn assistant_text(ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"{}","message":{{"role":"assistant","model":"model-a","content":[{{"type":"text","text":"{}"}}]}}}}"#,
            ts, text
        )
    }

    fn tool_call(ts: &str, id: &str, name: &str) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"{}","message":{{"role":"assistant","model":"model-a","content":[{{"type":"tool_use","id":"{}","name":"{}","input":{{"command":"ls"}}}}]}}}}"#,
            ts, id, name
        )
    }

    fn tool_result(ts: &str, id: &str, output: &str) -> String {
        format!(
            r#"{{"type":"user","timestamp":"{}","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"{}","content":"{}","is_error":false}}]}}}}"#,
            ts, id, output
        )
    }

    #[test]
    fn test_each_human_message_opens_one_interaction() {
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "first"),
            &assistant_text("2026-01-05T10:00:05Z", "ok"),
            &human("2026-01-05T10:01:00Z", "second"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 2);
        assert_eq!(interactions[0].id, "interaction-1");
        assert_eq!(interactions[0].user_prompt, "first");
        assert_eq!(interactions[1].id, "interaction-2");
        assert_eq!(interactions[1].user_prompt, "second");
    }

    #[test]
    fn test_tool_call_and_result_merge_into_one_action() {
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "run ls"),
            &tool_call("2026-01-05T10:00:01Z", "toolu_01", "Bash"),
            &tool_result("2026-01-05T10:00:02Z", "toolu_01", "Cargo.toml"),
            &assistant_text("2026-01-05T10:00:03Z", "one file"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        let actions = &interactions[0].actions;
        assert_eq!(actions.len(), 2); // tool call + text, not three
        match &actions[0].kind {
            ActionKind::ToolUse {
                tool_name,
                tool_result,
                is_error,
                ..
            } => {
                assert_eq!(tool_name, "Bash");
                assert_eq!(tool_result.as_deref(), Some("Cargo.toml"));
                assert!(!is_error);
            }
            other => panic!("expected tool_use action, got {:?}", other),
        }
    }

    #[test]
    fn test_cancellation_closes_interaction() {
        // [human, tool_call, cancel, tool_result] -> one unmatched tool
        // action, cancel_reason set, trailing result dropped
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "run it"),
            &tool_call("2026-01-05T10:00:01Z", "toolu_01", "Bash"),
            &human("2026-01-05T10:00:02Z", "[Request interrupted by user]"),
            &tool_result("2026-01-05T10:00:03Z", "toolu_01", "too late"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        let interaction = &interactions[0];
        assert_eq!(
            interaction.cancel_reason.as_deref(),
            Some("[Request interrupted by user]")
        );
        assert_eq!(interaction.actions.len(), 1);
        match &interaction.actions[0].kind {
            ActionKind::ToolUse { tool_result, .. } => assert!(tool_result.is_none()),
            other => panic!("expected tool_use action, got {:?}", other),
        }
    }

    #[test]
    fn test_first_cancellation_wins() {
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "go"),
            &human("2026-01-05T10:00:01Z", "[Request interrupted by user for tool use]"),
            &human("2026-01-05T10:00:02Z", "[Request interrupted by user]"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert_eq!(
            interactions[0].cancel_reason.as_deref(),
            Some("[Request interrupted by user for tool use]")
        );
    }

    #[test]
    fn test_final_response_is_last_text_action() {
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "explain"),
            &assistant_text("2026-01-05T10:00:01Z", "A"),
            &tool_call("2026-01-05T10:00:02Z", "toolu_01", "Read"),
            &assistant_text("2026-01-05T10:00:03Z", "B"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions[0].final_response.as_deref(), Some("B"));
    }

    #[test]
    fn test_zero_action_interaction_still_emitted() {
        let recs = records(&[&human("2026-01-05T10:00:00Z", "hello?")]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].actions.is_empty());
        assert!(interactions[0].cancel_reason.is_none());
        assert!(interactions[0].final_response.is_none());
    }

    #[test]
    fn test_ordinal_ids_stable_across_runs() {
        let lines = [
            human("2026-01-05T10:00:00Z", "one"),
            assistant_text("2026-01-05T10:00:01Z", "ok"),
            human("2026-01-05T10:01:00Z", "two"),
        ];
        let line_refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let first = build_interactions(&records(&line_refs));
        let second = build_interactions(&records(&line_refs));
        let first_ids: Vec<&str> = first.iter().map(|i| i.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(first_ids, vec!["interaction-1", "interaction-2"]);
    }

    #[test]
    fn test_auto_compact_becomes_action_not_interaction() {
        let compact = format!(
            r#"{{"type":"user","timestamp":"2026-01-05T10:00:05Z","message":{{"role":"user","content":"{} The summary follows."}}}}"#,
            "This session is being continued from a previous conversation that ran out of context."
        );
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "long task"),
            &compact,
            &assistant_text("2026-01-05T10:00:10Z", "continuing"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert!(matches!(
            &interactions[0].actions[0].kind,
            ActionKind::AutoCompact { .. }
        ));
    }

    #[test]
    fn test_local_command_echo_ignored() {
        let echo = r#"{"type":"user","timestamp":"2026-01-05T10:00:01Z","message":{"role":"user","content":"<command-name>/status</command-name>"}}"#;
        let recs = records(&[&human("2026-01-05T10:00:00Z", "real prompt"), echo]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].actions.is_empty());
    }

    #[test]
    fn test_sidechain_records_skipped() {
        let side = r#"{"type":"user","timestamp":"2026-01-05T10:00:01Z","isSidechain":true,"message":{"role":"user","content":"subagent prompt"}}"#;
        let recs = records(&[&human("2026-01-05T10:00:00Z", "main prompt"), side]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].user_prompt, "main prompt");
    }

    #[test]
    fn test_model_from_first_assistant_record() {
        let second = r#"{"type":"assistant","timestamp":"2026-01-05T10:00:02Z","message":{"role":"assistant","model":"model-b","content":[{"type":"text","text":"more"}]}}"#;
        let recs = records(&[
            &human("2026-01-05T10:00:00Z", "go"),
            &assistant_text("2026-01-05T10:00:01Z", "first"),
            second,
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions[0].model.as_deref(), Some("model-a"));
    }

    #[test]
    fn test_duration_skips_trailing_actions_without_timestamps() {
        let mut interaction = build_interactions(&records(&[
            &human("2026-01-05T10:00:00Z", "go"),
            &assistant_text("2026-01-05T10:00:30Z", "done"),
        ]))
        .remove(0);
        // Auto-compact style tail with no timestamp
        interaction.actions.push(Action {
            timestamp: None,
            kind: ActionKind::AutoCompact {
                summary: "condensed".to_string(),
            },
        });
        assert_eq!(duration(&interaction), Some(Duration::seconds(30)));
    }

    #[test]
    fn test_duration_none_without_timestamps() {
        let interaction = Interaction {
            id: "interaction-1".to_string(),
            timestamp: None,
            user_prompt: "hi".to_string(),
            actions: vec![],
            final_response: None,
            model: None,
            cancel_reason: None,
        };
        assert_eq!(duration(&interaction), None);
    }

    #[test]
    fn test_edit_count() {
        let edit = r#"{"type":"assistant","timestamp":"2026-01-05T10:00:01Z","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Edit","input":{}},{"type":"tool_use","id":"t2","name":"Bash","input":{}},{"type":"tool_use","id":"t3","name":"Write","input":{}}]}}"#;
        let recs = records(&[&human("2026-01-05T10:00:00Z", "edit files"), edit]);
        let interactions = build_interactions(&recs);
        assert_eq!(edit_count(&interactions[0]), 2);
        assert_eq!(tool_use_count(&interactions[0], &["Bash"]), 1);
    }

    #[test]
    fn test_agent_records_before_first_human_message_ignored() {
        let recs = records(&[
            &assistant_text("2026-01-05T09:59:00Z", "orphan"),
            &human("2026-01-05T10:00:00Z", "go"),
        ]);
        let interactions = build_interactions(&recs);
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].actions.is_empty());
    }
}
