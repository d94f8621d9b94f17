use axum::{response::IntoResponse, routing::any, Json, Router};
use serde_json::json;

/// Capability check the chat UI calls on startup. The answer never depends on
/// configuration or agent state.
async fn check_open_ai_key() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "provider": "workers-ai"
    }))
}

pub fn routes() -> Router {
    Router::new().route("/check-open-ai-key", any(check_open_ai_key))
}
