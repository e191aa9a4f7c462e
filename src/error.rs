//! Error types for a800mon-client.

use thiserror::Error;

use crate::protocol::Command;

/// Main error type for all monitor operations.
///
/// Errors fall into three classes that callers treat differently:
/// - connection errors (`Connection`, `Timeout`, `Io`) tear the socket down;
///   the next call reconnects transparently
/// - command errors (`Command`, `UnsupportedCommand`) are final for that call
/// - protocol errors (`Protocol`) mean a reply did not have the expected shape
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Socket could not be opened, was reset, or a frame arrived short.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A per-operation deadline elapsed (connect, write or exact read).
    #[error("{0} timeout")]
    Timeout(&'static str),

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer answered with a nonzero status.
    #[error("Command failed (status={status}){}", detail(.message))]
    Command {
        /// Status byte from the reply header.
        status: u8,
        /// UTF-8 diagnostic carried in the reply payload, if any.
        message: Option<String>,
    },

    /// Command has no opcode in the negotiated capability table.
    #[error("Command {0:?} is unsupported in this transport")]
    UnsupportedCommand(Command),

    /// Reply payload did not match the expected layout.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error (configuration files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// True for errors that invalidate the connection.
    ///
    /// These are never retried within the failing call; the next call
    /// reconnects.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            MonitorError::Connection(_) | MonitorError::Timeout(_) | MonitorError::Io(_)
        )
    }

    /// Build a command error from a reply status and its diagnostic payload.
    pub fn command(status: u8, payload: &[u8]) -> Self {
        let message = if payload.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(payload).trim_end_matches('\0').to_string())
        };
        MonitorError::Command { status, message }
    }

    /// Shorthand for a "payload too short" protocol error.
    pub(crate) fn short(what: &str) -> Self {
        MonitorError::Protocol(format!("{what} payload too short"))
    }
}

fn detail(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(": {m}"),
        _ => String::new(),
    }
}

/// Result type alias using MonitorError.
pub type Result<T> = std::result::Result<T, MonitorError>;
