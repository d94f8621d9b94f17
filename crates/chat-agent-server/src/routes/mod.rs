pub mod agents;
pub mod assets;
pub mod health;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Capability check first, then agent routes, then static assets for everything else
pub fn configure(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::routes())
        .merge(agents::routes(state.clone()))
        .fallback_service(assets::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
