//! Events streamed from the agent to the chat interface, encoded with the
//! line oriented data stream protocol (`<code>:<json>\n`).
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StartStep {
        message_id: String,
    },
    TextDelta(String),
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        result: Value,
    },
    FinishStep {
        reason: String,
        is_continued: bool,
    },
    Error(String),
    Finish {
        reason: String,
        prompt_tokens: i32,
        completion_tokens: i32,
    },
}

impl UiEvent {
    /// Encode the event as a single protocol line
    pub fn encode(&self) -> String {
        match self {
            UiEvent::StartStep { message_id } => {
                format!("f:{}\n", json!({ "messageId": message_id }))
            }
            UiEvent::TextDelta(text) => format!("0:{}\n", encode_str(text)),
            UiEvent::ToolCall { id, name, args } => {
                let tool_call = json!({
                    "toolCallId": id,
                    "toolName": name,
                    "args": args
                });
                format!("9:{}\n", tool_call)
            }
            UiEvent::ToolResult { id, result } => {
                let response = json!({
                    "toolCallId": id,
                    "result": result,
                });
                format!("a:{}\n", response)
            }
            UiEvent::FinishStep {
                reason,
                is_continued,
            } => {
                let step = json!({
                    "finishReason": reason,
                    "isContinued": is_continued,
                });
                format!("e:{}\n", step)
            }
            UiEvent::Error(message) => format!("3:{}\n", encode_str(message)),
            UiEvent::Finish {
                reason,
                prompt_tokens,
                completion_tokens,
            } => {
                let finish = json!({
                    "finishReason": reason,
                    "usage": {
                        "promptTokens": prompt_tokens,
                        "completionTokens": completion_tokens
                    }
                });
                format!("d:{}\n", finish)
            }
        }
    }
}

fn encode_str(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// Sink that agent code writes incremental events into
#[derive(Debug, Clone)]
pub struct UiStreamWriter {
    tx: mpsc::Sender<UiEvent>,
}

impl UiStreamWriter {
    pub fn new(tx: mpsc::Sender<UiEvent>) -> Self {
        Self { tx }
    }

    /// Create a writer and the receiving end of its channel
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<UiEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn write(&self, event: UiEvent) -> AgentResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AgentError::Internal("ui stream receiver dropped".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
