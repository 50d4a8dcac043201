pub mod handler;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
