use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::role::Role;

/// Result the model sees for a tool call the user refused
pub const TOOL_DENIED_OUTPUT: &str = "Error: User denied access to tool execution";

/// Generate a short random id for messages, tool calls and schedules
pub fn generate_id() -> String {
    nanoid::nanoid!(16)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// Lifecycle of a single tool call.
///
/// `InputStreaming` while arguments are still arriving. A complete call waits in
/// `PendingConfirmation` until it either runs automatically or the user answers
/// with `Confirmed` or `Denied`. `Confirmed` then becomes `Resolved` or `Errored`.
/// `Denied`, `Resolved` and `Errored` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ToolCallState {
    InputStreaming,
    PendingConfirmation,
    Confirmed,
    Denied,
    Resolved { output: Value },
    Errored { error: String },
}

impl ToolCallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallState::Denied | ToolCallState::Resolved { .. } | ToolCallState::Errored { .. }
        )
    }

    /// True while the call still has neither a result nor a human decision
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            ToolCallState::InputStreaming | ToolCallState::PendingConfirmation
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub state: ToolCallState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
/// Content carried inside a message
pub enum MessagePart {
    Text(TextPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    /// Any part type this crate does not understand (reasoning, step markers, files),
    /// kept as sent so it survives a save and reload
    Unknown(Value),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KnownPart {
    Text(TextPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KnownPartRef<'a> {
    Text(&'a TextPart),
    ToolCall(&'a ToolCallPart),
    ToolResult(&'a ToolResultPart),
}

impl Serialize for MessagePart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessagePart::Text(part) => KnownPartRef::Text(part).serialize(serializer),
            MessagePart::ToolCall(part) => KnownPartRef::ToolCall(part).serialize(serializer),
            MessagePart::ToolResult(part) => KnownPartRef::ToolResult(part).serialize(serializer),
            MessagePart::Unknown(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MessagePart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value.get("type").and_then(Value::as_str) {
            Some("text" | "tool-call" | "tool-result") => {
                let part = KnownPart::deserialize(value).map_err(D::Error::custom)?;
                Ok(match part {
                    KnownPart::Text(part) => MessagePart::Text(part),
                    KnownPart::ToolCall(part) => MessagePart::ToolCall(part),
                    KnownPart::ToolResult(part) => MessagePart::ToolResult(part),
                })
            }
            _ => Ok(MessagePart::Unknown(value)),
        }
    }
}

impl MessagePart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessagePart::Text(TextPart { text: text.into() })
    }

    pub fn tool_call<I, N>(id: I, name: N, input: Value, state: ToolCallState) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        MessagePart::ToolCall(ToolCallPart {
            tool_call_id: id.into(),
            tool_name: name.into(),
            input,
            state,
        })
    }

    pub fn tool_result<I, N>(id: I, name: N, output: Value, is_error: bool) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        MessagePart::ToolResult(ToolResultPart {
            tool_call_id: id.into(),
            tool_name: name.into(),
            output,
            is_error,
        })
    }

    /// Get the text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        if let MessagePart::ToolCall(ref call) = self {
            Some(call)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultPart> {
        if let MessagePart::ToolResult(ref result) = self {
            Some(result)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from the chat agent
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create an empty message with a fresh id, stamped with the given time
    pub fn new(role: Role, created_at: DateTime<Utc>) -> Self {
        Message {
            id: generate_id(),
            role,
            parts: Vec::new(),
            metadata: MessageMetadata {
                created_at: Some(created_at),
            },
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User, Utc::now())
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, Utc::now())
    }

    /// Add any part to the message
    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Add a text part to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_part(MessagePart::text(text))
    }

    /// Add a tool call part to the message
    pub fn with_tool_call<I, N>(self, id: I, name: N, input: Value, state: ToolCallState) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.with_part(MessagePart::tool_call(id, name, input, state))
    }

    /// Add a tool result part to the message
    pub fn with_tool_result<I, N>(self, id: I, name: N, output: Value, is_error: bool) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.with_part(MessagePart::tool_result(id, name, output, is_error))
    }

    /// The first text part of the message, if any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(MessagePart::as_text)
    }

    /// All text parts joined together
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(MessagePart::as_tool_call)
    }

    pub fn tool_calls_mut(&mut self) -> impl Iterator<Item = &mut ToolCallPart> {
        self.parts.iter_mut().filter_map(|part| match part {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_ui_message() {
        let value = json!({
            "id": "m1",
            "role": "assistant",
            "parts": [
                {"type": "text", "text": "Checking the weather"},
                {
                    "type": "tool-call",
                    "toolCallId": "call_1",
                    "toolName": "getWeatherInformation",
                    "input": {"city": "Lisbon"},
                    "state": {"status": "confirmed"}
                },
                {"type": "step-start"}
            ]
        });

        let message: Message = serde_json::from_value(value).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.parts.len(), 3);
        assert_eq!(message.first_text(), Some("Checking the weather"));
        assert_eq!(message.parts[2], MessagePart::Unknown(json!({"type": "step-start"})));

        let call = message.tool_calls().next().unwrap();
        assert_eq!(call.tool_name, "getWeatherInformation");
        assert_eq!(call.state, ToolCallState::Confirmed);
        assert_eq!(message.metadata, MessageMetadata::default());
    }

    #[test]
    fn test_unknown_parts_are_kept_verbatim() {
        let reasoning = json!({"type": "reasoning", "text": "thinking", "providerMetadata": {"x": 1}});
        let file = json!({"type": "file", "mediaType": "image/png", "url": "data:image/png;base64,AA=="});
        let value = json!({
            "id": "m1",
            "role": "user",
            "parts": [reasoning.clone(), {"type": "text", "text": "look"}, file.clone()]
        });

        let message: Message = serde_json::from_value(value).unwrap();
        assert_eq!(message.parts[0], MessagePart::Unknown(reasoning.clone()));
        assert_eq!(message.first_text(), Some("look"));

        let saved = serde_json::to_value(&message).unwrap();
        assert_eq!(saved["parts"][0], reasoning);
        assert_eq!(saved["parts"][1], json!({"type": "text", "text": "look"}));
        assert_eq!(saved["parts"][2], file);
    }

    #[test]
    fn test_malformed_known_part_is_rejected() {
        let value = json!({"role": "user", "parts": [{"type": "text"}]});
        assert!(serde_json::from_value::<Message>(value).is_err());
    }

    #[test]
    fn test_missing_id_is_generated() {
        let message: Message =
            serde_json::from_value(json!({"role": "user", "parts": []})).unwrap();
        assert_eq!(message.id.len(), 16);
    }

    #[test]
    fn test_resolved_state_serialization() {
        let message = Message::assistant().with_tool_call(
            "call_1",
            "getLocalTime",
            json!({"location": "Paris"}),
            ToolCallState::Resolved {
                output: json!("10am"),
            },
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["parts"][0]["type"], "tool-call");
        assert_eq!(value["parts"][0]["state"]["status"], "resolved");
        assert_eq!(value["parts"][0]["state"]["output"], "10am");
        assert!(value["metadata"]["createdAt"].is_string());
    }

    #[test]
    fn test_state_classification() {
        assert!(ToolCallState::PendingConfirmation.is_incomplete());
        assert!(ToolCallState::InputStreaming.is_incomplete());
        assert!(!ToolCallState::Confirmed.is_incomplete());
        assert!(!ToolCallState::Confirmed.is_terminal());
        assert!(ToolCallState::Denied.is_terminal());
        assert!(ToolCallState::Errored {
            error: "boom".into()
        }
        .is_terminal());
    }
}
