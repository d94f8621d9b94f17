use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::models::message::{
    Message, MessagePart, ToolCallPart, ToolCallState, TOOL_DENIED_OUTPUT,
};
use crate::models::role::Role;
use crate::models::tool::Tool;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn output_text(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The tool role message answering a call, if the call has an answer yet
fn tool_call_result(call: &ToolCallPart) -> Option<Value> {
    let content = match &call.state {
        ToolCallState::Resolved { output } => output_text(output),
        ToolCallState::Errored { error } => {
            format!("The tool call returned the following error:\n{}", error)
        }
        ToolCallState::Denied => TOOL_DENIED_OUTPUT.to_string(),
        _ => return None,
    };
    Some(json!({
        "role": "tool",
        "content": content,
        "tool_call_id": call.tool_call_id
    }))
}

/// Convert internal messages to the OpenAI chat completions message specification.
/// Tool calls are only sent once they carry an answer, either in their own state
/// or in a tool-result part with the same id.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let answered: HashSet<&str> = messages
        .iter()
        .flat_map(|message| message.parts.iter())
        .filter_map(MessagePart::as_tool_result)
        .map(|result| result.tool_call_id.as_str())
        .collect();
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": role_name(message.role)
        });
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for part in &message.parts {
            match part {
                MessagePart::Text(part) => text.push_str(&part.text),
                MessagePart::ToolCall(call) => {
                    // A result part carries the answer, so the state must not add a second one
                    let result = if answered.contains(call.tool_call_id.as_str()) {
                        None
                    } else {
                        match tool_call_result(call) {
                            Some(result) => Some(result),
                            None => continue,
                        }
                    };
                    tool_calls.push(json!({
                        "id": call.tool_call_id,
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&call.tool_name),
                            "arguments": call.input.to_string(),
                        }
                    }));
                    output.extend(result);
                }
                MessagePart::ToolResult(result) => {
                    let content = if result.is_error {
                        format!(
                            "The tool call returned the following error:\n{}",
                            output_text(&result.output)
                        )
                    } else {
                        output_text(&result.output)
                    };
                    output.push(json!({
                        "role": "tool",
                        "content": content,
                        "tool_call_id": result.tool_call_id
                    }));
                }
                MessagePart::Unknown(_) => {}
            }
        }

        if !text.is_empty() {
            converted["content"] = json!(text);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if message.role != Role::Tool
            && (converted.get("content").is_some() || converted.get("tool_calls").is_some())
        {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert tools to the OpenAI tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert a chat completions response to an assistant message. Tool calls come
/// back as `PendingConfirmation`, or `Errored` when the model produced an unusable call.
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .cloned()
        .ok_or_else(|| anyhow!("Response has no choices: {}", response))?;
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(crate::models::message::generate_id);
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                );
                message = message.with_tool_call(
                    id,
                    function_name,
                    json!({}),
                    ToolCallState::Errored { error },
                );
                continue;
            }

            // Some compatible endpoints send the arguments as an object instead of a string
            let arguments = &tool_call["function"]["arguments"];
            let parsed = match arguments {
                Value::String(raw) if raw.trim().is_empty() => Ok(json!({})),
                Value::String(raw) => serde_json::from_str::<Value>(raw),
                Value::Null => Ok(json!({})),
                other => Ok(other.clone()),
            };

            message = match parsed {
                Ok(input) => message.with_tool_call(
                    id,
                    function_name,
                    input,
                    ToolCallState::PendingConfirmation,
                ),
                Err(e) => {
                    let error = format!(
                        "Could not interpret tool use parameters for id {}: {}",
                        id, e
                    );
                    message.with_tool_call(
                        id,
                        function_name,
                        json!({}),
                        ToolCallState::Errored { error },
                    )
                }
            };
        }
    }

    Ok(message)
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
