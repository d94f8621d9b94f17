use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::tool_calls::{dispatch_tool_call, settle};
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessagePart, ToolCallState};
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::providers::base::Provider;
use crate::tools::ToolSet;
use crate::ui_stream::{UiEvent, UiStreamWriter};

/// Upper bound on model round trips within one response
pub const MAX_STEPS: usize = 10;

/// Called with the assembled assistant message once a response completes
pub type OnFinish = Box<dyn FnOnce(Message) -> BoxFuture<'static, ()> + Send>;

pub struct StreamRequest<'a> {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: &'a ToolSet,
    /// Timestamp for the assembled assistant message
    pub created_at: DateTime<Utc>,
}

/// Why the stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Finished,
    Cancelled,
}

/// Ask the model for a reply and stream it into `writer`.
///
/// Tools with an execution handler run as soon as the model calls them and the
/// model is asked again with their results, up to [`MAX_STEPS`] times. Calls that
/// need confirmation end the response and wait for the user. Provider failures
/// are written to the stream as an error and returned; they are not retried.
pub async fn stream_response(
    provider: &dyn Provider,
    request: StreamRequest<'_>,
    writer: &UiStreamWriter,
    cancel: &CancellationToken,
    on_finish: OnFinish,
) -> AgentResult<StreamOutcome> {
    let StreamRequest {
        system,
        mut messages,
        tools,
        created_at,
    } = request;
    let tool_list = tools.tools();
    let mut assembled = Message::new(Role::Assistant, created_at);
    let (mut prompt_tokens, mut completion_tokens) = (0, 0);
    let mut finish_reason = "stop";

    for step in 0..MAX_STEPS {
        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(step, "generation cancelled");
                return Ok(StreamOutcome::Cancelled);
            }
            completion = provider.complete(&system, &messages, &tool_list) => completion,
        };

        let (mut response, usage) = match completion {
            Ok(completion) => completion,
            Err(e) => {
                error!("provider error: {}", e);
                writer.write(UiEvent::Error(e.to_string())).await?;
                writer
                    .write(UiEvent::Finish {
                        reason: "error".to_string(),
                        prompt_tokens,
                        completion_tokens,
                    })
                    .await?;
                return Err(AgentError::ExecutionError(e.to_string()));
            }
        };
        prompt_tokens += usage.input_tokens.unwrap_or(0);
        completion_tokens += usage.output_tokens.unwrap_or(0);

        writer
            .write(UiEvent::StartStep {
                message_id: assembled.id.clone(),
            })
            .await?;
        for part in &response.parts {
            match part {
                MessagePart::Text(text) if !text.text.is_empty() => {
                    writer.write(UiEvent::TextDelta(text.text.clone())).await?;
                }
                MessagePart::ToolCall(call) => {
                    writer
                        .write(UiEvent::ToolCall {
                            id: call.tool_call_id.clone(),
                            name: call.tool_name.clone(),
                            args: call.input.clone(),
                        })
                        .await?;
                }
                _ => {}
            }
        }

        let mut answered = 0;
        let mut awaiting_confirmation = false;
        for call in response.tool_calls_mut() {
            if call.state == ToolCallState::PendingConfirmation {
                match tools.get(&call.tool_name) {
                    Some(entry) if entry.execute.is_none() => {
                        debug!(tool = %call.tool_name, "tool call awaits confirmation");
                        awaiting_confirmation = true;
                        continue;
                    }
                    entry => {
                        let handler = entry.and_then(|entry| entry.execute.clone());
                        info!(tool = %call.tool_name, id = %call.tool_call_id, "running tool call");
                        let result = dispatch_tool_call(
                            handler,
                            ToolCall::new(call.tool_name.clone(), call.input.clone()),
                        )
                        .await;
                        call.state = settle(result);
                    }
                }
            }

            let result = match &call.state {
                ToolCallState::Resolved { output } => output.clone(),
                ToolCallState::Errored { error } => serde_json::Value::String(error.clone()),
                _ => continue,
            };
            answered += 1;
            writer
                .write(UiEvent::ToolResult {
                    id: call.tool_call_id.clone(),
                    result,
                })
                .await?;
        }

        let is_continued = answered > 0 && !awaiting_confirmation;
        finish_reason = if response.tool_calls().next().is_some() {
            "tool-calls"
        } else {
            "stop"
        };
        writer
            .write(UiEvent::FinishStep {
                reason: finish_reason.to_string(),
                is_continued,
            })
            .await?;

        assembled.parts.extend(response.parts.iter().cloned());
        messages.push(response);
        if !is_continued {
            break;
        }
    }

    writer
        .write(UiEvent::Finish {
            reason: finish_reason.to_string(),
            prompt_tokens,
            completion_tokens,
        })
        .await?;
    on_finish(assembled).await;
    Ok(StreamOutcome::Finished)
}
