//! Meshcall signaling server library
//!
//! Exposes the hub components for testing and embedding.

pub mod hub;
pub mod registry;
pub mod state;
pub mod ws;

/// Build the configured application router.
pub fn create_app(config: state::Config) -> axum::Router {
    let app_state = state::AppState::new(config);
    ws::create_router(app_state)
}
