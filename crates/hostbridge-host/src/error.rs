//! Error types for running the host listener.
//!
//! Per-call failures never use this type; they travel as
//! [`hostbridge_types::BridgeError`] inside reply envelopes.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for host lifecycle operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Error type for host lifecycle operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Failed to bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The listener stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Invalid host configuration.
    #[error("configuration error: {0}")]
    Config(#[from] hostbridge_config::ConfigError),

    /// Failed to start the execution context thread.
    #[error("failed to start execution context: {0}")]
    Context(#[source] std::io::Error),
}
