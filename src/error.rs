//! Error types for the Portico gateway
//!
//! Structured error definitions via thiserror; the binary boundary uses
//! anyhow for propagation. The gateway core itself is a long-running loop
//! that terminates errors at the log sink instead of returning them.

use thiserror::Error;

/// Main error type for Portico operations
#[derive(Error, Debug)]
pub enum PorticoError {
    /// HTTP request to the orchestrator or an upstream backend failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error (listener bind, socket accept, upstream connect)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Orchestrator event stream failure
    #[error("Event stream error: {0}")]
    EventStream(String),

    /// Malformed bind or upstream address
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// Building an HTTP message for the proxy leg failed
    #[error("HTTP message error: {0}")]
    HttpMessage(#[from] axum::http::Error),

    /// Event names a service that is not in the table
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Portico operations
pub type Result<T> = std::result::Result<T, PorticoError>;
