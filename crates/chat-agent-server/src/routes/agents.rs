use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use chat_agent::agent::{ChatAgent, StreamOutcome};
use chat_agent::errors::AgentError;
use chat_agent::models::message::Message;
use chat_agent::ui_stream::{UiEvent, UiStreamWriter};
use futures::Stream;
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<Message>,
}

/// Data stream protocol response. Dropping it, which axum does when the client
/// goes away, cancels the generation behind it.
pub struct SseResponse {
    rx: ReceiverStream<UiEvent>,
    _cancel_on_drop: DropGuard,
}

impl SseResponse {
    fn new(rx: ReceiverStream<UiEvent>, cancel_on_drop: DropGuard) -> Self {
        Self {
            rx,
            _cancel_on_drop: cancel_on_drop,
        }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|event| Ok(Bytes::from(event.encode()))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            [("x-vercel-ai-data-stream", "v1")],
            body,
        )
            .into_response()
    }
}

fn status_for(error: &AgentError) -> StatusCode {
    match error {
        AgentError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn agent_for(state: &AppState, name: &str) -> Result<Arc<ChatAgent>, StatusCode> {
    state.registry.get_or_create(name).await.map_err(|e| {
        warn!("rejected agent {:?}: {}", name, e);
        status_for(&e)
    })
}

async fn chat_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    let agent = agent_for(&state, &name).await?;
    agent.save_messages(&request.messages).await.map_err(|e| {
        error!(agent = %name, "failed to save messages: {}", e);
        status_for(&e)
    })?;

    let (writer, rx) = UiStreamWriter::channel(100);
    let cancel = CancellationToken::new();
    let cancel_on_drop = cancel.clone().drop_guard();

    tokio::spawn(async move {
        match agent.on_chat_message(&writer, &cancel).await {
            Ok(StreamOutcome::Finished) => {}
            Ok(StreamOutcome::Cancelled) => info!(agent = %name, "client disconnected"),
            // Provider failures were already written into the stream
            Err(AgentError::ExecutionError(e)) => warn!(agent = %name, "chat turn failed: {}", e),
            Err(e) => {
                error!(agent = %name, "chat turn failed: {}", e);
                let _ = writer.write(UiEvent::Error(e.to_string())).await;
                let _ = writer
                    .write(UiEvent::Finish {
                        reason: "error".to_string(),
                        prompt_tokens: 0,
                        completion_tokens: 0,
                    })
                    .await;
            }
        }
    });

    Ok(SseResponse::new(ReceiverStream::new(rx), cancel_on_drop))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let agent = agent_for(&state, &name).await?;
    let messages = agent.messages().await.map_err(|e| {
        error!(agent = %name, "failed to load messages: {}", e);
        status_for(&e)
    })?;
    Ok(Json(messages))
}

async fn clear_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let agent = agent_for(&state, &name).await?;
    agent.clear().await.map_err(|e| {
        error!(agent = %name, "failed to clear messages: {}", e);
        status_for(&e)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/agents/chat/:name", post(chat_handler))
        .route("/agents/chat/:name/get-messages", get(get_messages))
        .route("/agents/chat/:name/messages", delete(clear_messages))
        .with_state(state)
}
