use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolCallState};
use crate::models::tool::ToolCall;
use crate::tools::{Executions, ToolHandler, ToolSet};
use crate::ui_stream::{UiEvent, UiStreamWriter};

/// Handler that runs a confirmed call. Confirmation handlers win over the tool's
/// own auto execution handler.
fn confirmed_handler(
    name: &str,
    tools: &ToolSet,
    executions: &Executions,
) -> Option<Arc<dyn ToolHandler>> {
    executions
        .get(name)
        .cloned()
        .or_else(|| tools.get(name).and_then(|entry| entry.execute.clone()))
}

pub(crate) async fn dispatch_tool_call(
    handler: Option<Arc<dyn ToolHandler>>,
    call: ToolCall,
) -> AgentResult<Value> {
    let handler = handler.ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
    handler.call(call.arguments).await
}

/// Outcome of a finished tool run as a terminal call state
pub(crate) fn settle(result: AgentResult<Value>) -> ToolCallState {
    match result {
        Ok(output) => ToolCallState::Resolved { output },
        Err(e) => ToolCallState::Errored {
            error: e.to_string(),
        },
    }
}

/// Run every call the user has confirmed since the last turn.
///
/// Each confirmed call ends up `Resolved` or `Errored` in place, and its result is
/// written to the stream. A failing handler only affects its own call. Denied
/// calls stay denied; the model sees them as a refusal.
pub async fn process_tool_calls(
    mut messages: Vec<Message>,
    writer: &UiStreamWriter,
    tools: &ToolSet,
    executions: &Executions,
) -> Vec<Message> {
    for message in messages.iter_mut() {
        for call in message.tool_calls_mut() {
            if call.state != ToolCallState::Confirmed {
                continue;
            }

            info!(tool = %call.tool_name, id = %call.tool_call_id, "running confirmed tool call");
            let handler = confirmed_handler(&call.tool_name, tools, executions);
            let result = dispatch_tool_call(
                handler,
                ToolCall::new(call.tool_name.clone(), call.input.clone()),
            )
            .await;
            if let Err(e) = &result {
                warn!(tool = %call.tool_name, "tool call failed: {}", e);
            }
            call.state = settle(result);

            let output = match &call.state {
                ToolCallState::Resolved { output } => output.clone(),
                ToolCallState::Errored { error } => Value::String(error.clone()),
                _ => Value::Null,
            };
            let event = UiEvent::ToolResult {
                id: call.tool_call_id.clone(),
                result: output,
            };
            if writer.write(event).await.is_err() {
                debug!("stream closed while writing tool result");
            }
        }
    }

    messages
}
