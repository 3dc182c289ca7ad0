mod handlers;
mod ui;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// The five routes of §6. No bearer-token middleware: identity is the
/// signed `sa_user` cookie, not an API token.
pub fn router(_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/clear", post(handlers::clear))
        .route("/chat", post(handlers::chat))
        .route("/agent-stream", get(handlers::agent_stream))
        .route("/healthz", get(handlers::healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
