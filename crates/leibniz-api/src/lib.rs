//! Control API server for the Leibniz pi service.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Status endpoint** (`GET /status`) returning the current
//!   `{piText, status, iteration}` projection
//! - **Control endpoint** (`POST /control`) accepting one of the commands
//!   `start`, `pause`, `stop`, `reset`
//! - **Service banner** (`GET /`) listing the endpoints
//!
//! # Architecture
//!
//! Handlers are thin wrappers around a shared
//! [`CalculationEngine`](leibniz_core::CalculationEngine). Command names are
//! validated here; only well-formed commands reach the engine.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{start_server, ServerConfig, ServerError};
pub use state::AppState;
