//! REST API endpoint handlers for the control server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Service banner listing endpoints |
//! | `GET` | `/status` | Current `{piText, status, iteration}` |
//! | `POST` | `/control` | Apply `{"action": "start\|pause\|stop\|reset"}` |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use leibniz_core::{CalculationSnapshot, Command};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for `POST /control`.
#[derive(Debug, serde::Deserialize)]
pub struct ControlRequest {
    /// Command name: `start`, `pause`, `stop`, or `reset`.
    #[serde(alias = "command")]
    pub action: Option<String>,
}

impl ControlRequest {
    /// Validate the requested command name.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidCommand`] if the action is missing or
    /// not one of the four command names.
    pub fn command(&self) -> Result<Command, ApiError> {
        let action = self
            .action
            .as_deref()
            .ok_or_else(|| ApiError::InvalidCommand(String::from("missing 'action' field")))?;
        action
            .parse::<Command>()
            .map_err(|e| ApiError::InvalidCommand(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

/// Serve a small JSON banner naming the service and its endpoints.
pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "leibniz",
        "endpoints": {
            "status": "GET /status",
            "control": "POST /control { action: start|pause|stop|reset }",
        },
    }))
}

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

/// Return the engine's current in-memory snapshot.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<CalculationSnapshot> {
    Json(state.engine.status().await)
}

// ---------------------------------------------------------------------------
// POST /control
// ---------------------------------------------------------------------------

/// Apply a control command and return the resulting snapshot.
///
/// Malformed bodies and unknown commands are rejected with `400` before
/// the engine is touched.
pub async fn control(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<CalculationSnapshot>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let command = request.command()?;
    debug!(%command, "control request accepted");
    Ok(Json(state.engine.execute(command).await))
}
