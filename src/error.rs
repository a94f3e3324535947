//! Custom error types for the monitor.
//!
//! `MonitorError` is the single error type returned by the library. It follows the
//! same layout as the rest of the crate's `thiserror` enums: one variant per failure
//! class, with `#[from]` conversions so the `?` operator works across I/O and
//! configuration boundaries.
//!
//! ## Error Classes
//!
//! - **`PortUnavailable`**: opening a serial port failed (permission denied, device
//!   absent, already in use). Surfaced to the caller of `connect()`; never retried
//!   by the connection manager itself.
//! - **`Io`**: a read or write failed on an established connection. Always forces
//!   the session back to `Disconnected`.
//! - **`InvalidBaudRate`**: a baud rate outside the supported set was requested.
//! - **`Configuration`** / **`Config`**: semantic and parse errors from the
//!   configuration layer.
//! - **`Task`**: a background worker panicked or was cancelled by the runtime.
//!
//! Lines that fail to parse as readings are deliberately *not* represented here:
//! device chatter is expected and never treated as an error.

use thiserror::Error;

/// Convenience alias for results using the monitor error type.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to open serial port '{port}': {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported baud rate {0}. Must be one of: 9600, 19200, 38400, 57600, 115200")]
    InvalidBaudRate(u32),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<figment::Error> for MonitorError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for MonitorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
