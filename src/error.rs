// Error types shared across the daemon and client.

use thiserror::Error;

/// Errors produced by the log daemon, the file codec and the client.
#[derive(Debug, Error)]
pub enum LogError {
    /// Configuration rejected before the daemon starts.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Underlying file or socket operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A log file line does not match the expected text format.
    #[error("malformed log line: {0}")]
    MalformedLine(String),

    /// Query filter failed validation.
    #[error("invalid filter: {0}")]
    BadFilter(String),

    /// Client exceeded the per-second message budget.
    #[error("rate limited")]
    RateLimited,

    /// Incoming message rejected by validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Protocol request with an unknown type.
    #[error("unsupported request type: {0}")]
    Unsupported(String),

    /// Server-side failure reported over the wire.
    #[error("server error: {0}")]
    Remote(String),

    /// Operation attempted after the daemon stopped.
    #[error("server stopped")]
    Shutdown,
}
