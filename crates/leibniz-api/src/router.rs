//! Axum router construction for the control API.
//!
//! Assembles all routes into a single [`Router`] with CORS middleware
//! enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router for the control server.
///
/// The router includes:
/// - `GET /` -- service banner
/// - `GET /status` -- current calculation snapshot
/// - `POST /control` -- apply a command
///
/// CORS allows any origin so a browser dashboard on another port can
/// poll the status.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/status", get(handlers::status))
        .route("/control", post(handlers::control))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
