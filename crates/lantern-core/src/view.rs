//! Request-time conversation views.
//!
//! Raw session history is immutable and provider-agnostic. When the
//! target model changed between turns, or the provider cannot represent
//! tool-role messages, the view flattens tool traffic into plain
//! assistant text. Flattening only affects the per-request projection;
//! it never writes back to history, and it is idempotent.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use lantern_llm::types::ViewMessage;
use lantern_types::message::{Message, MessageRole};

/// Maximum rendered length of tool arguments in a flattened view.
const MAX_ARGS_CHARS: usize = 200;

/// Maximum rendered length of a tool result in a flattened view.
const MAX_RESULT_CHARS: usize = 2000;

/// Why a view was flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenReason {
    /// The model id differs from the one persisted by the last turn.
    ModelChanged,
    /// The provider does not accept tool-role messages.
    ProviderUnsupported,
}

/// Observability record for one view build.
#[derive(Debug, Clone, Serialize)]
pub struct ViewDiagnostics {
    /// Whether the view was flattened.
    pub flattened: bool,
    /// Reason code when flattened.
    pub reason: Option<FlattenReason>,
    /// Assistant messages whose tool calls were folded in.
    pub flattened_assistant_count: usize,
    /// Tool messages without a matching assistant call.
    pub orphan_tool_count: usize,
}

/// A provider-safe projection of session history for one LLM call.
#[derive(Debug, Clone)]
pub struct ConversationView {
    /// Messages in provider shape.
    pub messages: Vec<ViewMessage>,
    /// How the view was built.
    pub diagnostics: ViewDiagnostics,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max).collect();
    format!("{kept}…")
}

/// Build a conversation view.
///
/// With `flatten_reason == None` the raw structure passes through
/// (roles, tool calls, and tool-call ids intact). With a reason, tool
/// traffic is folded into plain assistant text.
pub fn build_view(messages: &[Message], flatten_reason: Option<FlattenReason>) -> ConversationView {
    match flatten_reason {
        None => ConversationView {
            messages: messages.iter().map(passthrough).collect(),
            diagnostics: ViewDiagnostics {
                flattened: false,
                reason: None,
                flattened_assistant_count: 0,
                orphan_tool_count: 0,
            },
        },
        Some(reason) => flatten(messages, reason),
    }
}

fn passthrough(msg: &Message) -> ViewMessage {
    ViewMessage {
        role: role_str(msg.role).to_string(),
        content: msg.content.clone(),
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls: if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.clone())
        },
    }
}

fn flatten(messages: &[Message], reason: FlattenReason) -> ConversationView {
    // Index tool results by the call they answer.
    let mut results_by_call: HashMap<&str, &Message> = HashMap::new();
    for msg in messages {
        if msg.role == MessageRole::Tool {
            if let Some(call_id) = msg.tool_call_id.as_deref() {
                results_by_call.entry(call_id).or_insert(msg);
            }
        }
    }

    let mut consumed: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());
    let mut flattened_assistant_count = 0;
    let mut orphan_tool_count = 0;

    for msg in messages {
        match msg.role {
            MessageRole::Assistant if msg.has_tool_calls() => {
                flattened_assistant_count += 1;
                let mut text = msg.content.clone();
                for call in &msg.tool_calls {
                    let args = truncate(&call.arguments.to_string(), MAX_ARGS_CHARS);
                    let result = match results_by_call.get(call.id.as_str()) {
                        Some(result_msg) => {
                            consumed.insert(call.id.as_str());
                            truncate(&result_msg.content, MAX_RESULT_CHARS)
                        }
                        None => "(no result)".to_string(),
                    };
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&format!(
                        "[Tool: {} | Args: {args}] [Result: {result}]",
                        call.name
                    ));
                }
                out.push(ViewMessage::new("assistant", text));
            }
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().unwrap_or("");
                if consumed.contains(call_id) {
                    continue;
                }
                // Orphan tool result: no matching assistant call.
                orphan_tool_count += 1;
                let name = msg.tool_name.as_deref().unwrap_or("unknown");
                let result = truncate(&msg.content, MAX_RESULT_CHARS);
                out.push(ViewMessage::new(
                    "assistant",
                    format!("[Tool: {name}][Result: {result}]"),
                ));
            }
            _ => out.push(passthrough(msg)),
        }
    }

    ConversationView {
        messages: out,
        diagnostics: ViewDiagnostics {
            flattened: true,
            reason: Some(reason),
            flattened_assistant_count,
            orphan_tool_count,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_types::message::ToolCall;

    fn tool_turn() -> Vec<Message> {
        vec![
            Message::user("list ./foo"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "tc1".into(),
                    name: "list_directory".into(),
                    arguments: serde_json::json!({"path": "./foo"}),
                }],
            ),
            Message::tool_result("tc1", "list_directory", "a\nb"),
            Message::assistant("a, b"),
        ]
    }

    #[test]
    fn passthrough_preserves_structure() {
        let msgs = tool_turn();
        let view = build_view(&msgs, None);
        assert!(!view.diagnostics.flattened);
        assert_eq!(view.messages.len(), 4);
        assert_eq!(view.messages[1].role, "assistant");
        assert!(view.messages[1].tool_calls.is_some());
        assert_eq!(view.messages[2].role, "tool");
        assert_eq!(view.messages[2].tool_call_id.as_deref(), Some("tc1"));
    }

    #[test]
    fn flatten_folds_tool_traffic() {
        let msgs = tool_turn();
        let view = build_view(&msgs, Some(FlattenReason::ModelChanged));
        assert!(view.diagnostics.flattened);
        assert_eq!(view.diagnostics.flattened_assistant_count, 1);
        assert_eq!(view.diagnostics.orphan_tool_count, 0);

        // No tool roles survive flattening.
        assert!(view.messages.iter().all(|m| m.role != "tool"));
        assert!(view.messages.iter().all(|m| m.tool_calls.is_none()));

        let folded = &view.messages[1];
        assert!(folded.content.contains("[Tool: list_directory | Args:"));
        assert!(folded.content.contains("[Result: a\nb]"));
        // User and final assistant messages pass through.
        assert_eq!(view.messages[0].content, "list ./foo");
        assert_eq!(view.messages[2].content, "a, b");
    }

    #[test]
    fn flatten_is_idempotent() {
        let msgs = tool_turn();
        let once = build_view(&msgs, Some(FlattenReason::ModelChanged));

        // Rebuild raw messages from the flattened view and flatten again.
        let roundtrip: Vec<Message> = once
            .messages
            .iter()
            .map(|m| match m.role.as_str() {
                "user" => Message::user(m.content.clone()),
                "system" => Message::system(m.content.clone()),
                _ => Message::assistant(m.content.clone()),
            })
            .collect();
        let twice = build_view(&roundtrip, Some(FlattenReason::ModelChanged));

        let texts_once: Vec<&str> = once.messages.iter().map(|m| m.content.as_str()).collect();
        let texts_twice: Vec<&str> = twice.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts_once, texts_twice);
        assert_eq!(twice.diagnostics.flattened_assistant_count, 0);
    }

    #[test]
    fn orphan_tool_results_rendered_standalone() {
        let msgs = vec![
            Message::user("hello"),
            Message::tool_result("tc-gone", "web_search", "stale result"),
        ];
        let view = build_view(&msgs, Some(FlattenReason::ProviderUnsupported));
        assert_eq!(view.diagnostics.orphan_tool_count, 1);
        assert_eq!(view.messages[1].role, "assistant");
        assert_eq!(
            view.messages[1].content,
            "[Tool: web_search][Result: stale result]"
        );
    }

    #[test]
    fn truncation_limits_args_and_results() {
        let big_arg = "x".repeat(500);
        let big_result = "y".repeat(5000);
        let msgs = vec![
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "tc1".into(),
                    name: "echo".into(),
                    arguments: serde_json::json!({ "text": big_arg }),
                }],
            ),
            Message::tool_result("tc1", "echo", big_result),
        ];
        let view = build_view(&msgs, Some(FlattenReason::ModelChanged));
        let content = &view.messages[0].content;

        let args_part = content
            .split("Args: ")
            .nth(1)
            .unwrap()
            .split("] [Result")
            .next()
            .unwrap();
        assert!(args_part.chars().count() <= MAX_ARGS_CHARS + 1);

        let result_part = content.split("[Result: ").nth(1).unwrap();
        assert!(result_part.chars().count() <= MAX_RESULT_CHARS + 2);
    }

    #[test]
    fn missing_result_marked() {
        let msgs = vec![Message::assistant_with_tool_calls(
            "checking",
            vec![ToolCall {
                id: "tc1".into(),
                name: "slow_tool".into(),
                arguments: serde_json::json!({}),
            }],
        )];
        let view = build_view(&msgs, Some(FlattenReason::ModelChanged));
        assert!(view.messages[0].content.contains("(no result)"));
    }
}
