//! Shared application state for the control API server.

use std::sync::Arc;

use leibniz_core::CalculationEngine;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The calculation engine all handlers delegate to.
    pub engine: Arc<CalculationEngine>,
}

impl AppState {
    /// Create application state around an engine.
    pub const fn new(engine: Arc<CalculationEngine>) -> Self {
        Self { engine }
    }
}
