use axum::{routing::get, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

async fn healthz() -> &'static str {
    "ok"
}

/// Build the axum Router. The HTTP surface is deliberately small: the
/// real-time channel plus a liveness probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/{user_id}", get(ws_handler::ws_upgrade))
        .with_state(state)
}
