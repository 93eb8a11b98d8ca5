use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub mod ws;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
