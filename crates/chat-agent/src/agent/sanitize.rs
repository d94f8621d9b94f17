use std::collections::{HashMap, HashSet};

use crate::models::message::{Message, MessagePart};

/// Remove tool calls that never finished before the history goes to a model.
///
/// A call still streaming or waiting for confirmation is kept only when a later
/// tool-result part answers it. Tool results left without their call are dropped
/// too, and so is any message that ends up with no parts.
pub fn sanitize_messages(messages: &[Message]) -> Vec<Message> {
    // Position of the last result seen for each call id
    let mut last_result: HashMap<&str, (usize, usize)> = HashMap::new();
    for (m, message) in messages.iter().enumerate() {
        for (p, part) in message.parts.iter().enumerate() {
            if let MessagePart::ToolResult(result) = part {
                last_result.insert(result.tool_call_id.as_str(), (m, p));
            }
        }
    }

    let answered_later = |id: &str, position: (usize, usize)| {
        last_result
            .get(id)
            .map_or(false, |result| *result > position)
    };

    let mut kept_calls: HashSet<String> = HashSet::new();
    let mut without_incomplete: Vec<(Message, bool)> = Vec::with_capacity(messages.len());
    for (m, message) in messages.iter().enumerate() {
        let had_parts = !message.parts.is_empty();
        let is_unanswered = |p: usize, part: &MessagePart| match part {
            MessagePart::ToolCall(call) => {
                call.state.is_incomplete() && !answered_later(&call.tool_call_id, (m, p))
            }
            _ => false,
        };

        let mut cleaned = message.clone();
        cleaned.parts = message
            .parts
            .iter()
            .enumerate()
            .filter(|(p, part)| !is_unanswered(*p, part))
            .map(|(_, part)| part.clone())
            .collect();

        for call in cleaned.tool_calls() {
            kept_calls.insert(call.tool_call_id.clone());
        }
        without_incomplete.push((cleaned, had_parts));
    }

    without_incomplete
        .into_iter()
        .filter_map(|(mut message, had_parts)| {
            message.parts.retain(|part| match part {
                MessagePart::ToolResult(result) => kept_calls.contains(&result.tool_call_id),
                _ => true,
            });
            if had_parts && message.parts.is_empty() {
                None
            } else {
                Some(message)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ToolCallState;
    use serde_json::json;

    fn call_ids(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .flat_map(|m| m.tool_calls().map(|c| c.tool_call_id.clone()))
            .collect()
    }

    #[test]
    fn test_drops_unanswered_incomplete_calls() {
        let messages = vec![
            Message::user().with_text("what's the weather in Lisbon"),
            Message::assistant()
                .with_text("Let me check")
                .with_tool_call(
                    "pending",
                    "getWeatherInformation",
                    json!({"city": "Lisbon"}),
                    ToolCallState::PendingConfirmation,
                )
                .with_tool_call(
                    "streaming",
                    "getLocalTime",
                    json!({}),
                    ToolCallState::InputStreaming,
                )
                .with_tool_call(
                    "done",
                    "getLocalTime",
                    json!({"location": "Lisbon"}),
                    ToolCallState::Resolved {
                        output: json!("10am"),
                    },
                ),
        ];

        let cleaned = sanitize_messages(&messages);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(call_ids(&cleaned), vec!["done"]);
        assert_eq!(cleaned[1].first_text(), Some("Let me check"));
    }

    #[test]
    fn test_keeps_incomplete_call_answered_by_later_result() {
        let messages = vec![
            Message::assistant().with_tool_call(
                "call_1",
                "getLocalTime",
                json!({"location": "Paris"}),
                ToolCallState::PendingConfirmation,
            ),
            Message::new(crate::models::role::Role::Tool, chrono::Utc::now()).with_tool_result(
                "call_1",
                "getLocalTime",
                json!("10am"),
                false,
            ),
        ];

        let cleaned = sanitize_messages(&messages);
        assert_eq!(cleaned, messages);
    }

    #[test]
    fn test_result_before_call_does_not_count() {
        let messages = vec![
            Message::user().with_tool_result("call_1", "getLocalTime", json!("9am"), false),
            Message::assistant().with_tool_call(
                "call_1",
                "getLocalTime",
                json!({}),
                ToolCallState::PendingConfirmation,
            ),
        ];

        assert!(sanitize_messages(&messages).is_empty());
    }

    #[test]
    fn test_drops_orphan_results_and_emptied_messages() {
        let messages = vec![
            Message::user().with_text("hi"),
            Message::user().with_tool_result("ghost", "getLocalTime", json!("10am"), false),
            Message::assistant(),
        ];

        let cleaned = sanitize_messages(&messages);
        // the message that was already empty is not ours to drop
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].first_text(), Some("hi"));
        assert!(cleaned[1].parts.is_empty());
    }

    #[test]
    fn test_terminal_calls_survive() {
        let messages = vec![Message::assistant()
            .with_tool_call("a", "getWeatherInformation", json!({}), ToolCallState::Denied)
            .with_tool_call("b", "getWeatherInformation", json!({}), ToolCallState::Confirmed)
            .with_tool_call(
                "c",
                "getWeatherInformation",
                json!({}),
                ToolCallState::Errored {
                    error: "boom".into(),
                },
            )];

        assert_eq!(call_ids(&sanitize_messages(&messages)), vec!["a", "b", "c"]);
    }
}
