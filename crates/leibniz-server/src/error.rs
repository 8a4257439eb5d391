//! Error types for the service binary.
//!
//! [`AppError`] wraps every failure mode during start-up and serving so
//! `main` can propagate with `?`.

/// Top-level error for the service binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: leibniz_core::config::ConfigError,
    },

    /// The control server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: leibniz_api::ServerError,
    },
}
