//! Centralized error types for minimail.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the minimail library.
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The connection settings are incomplete or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// TCP or TLS connection to the IMAP server failed.
    #[error("Could not connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// The server rejected the credentials.
    #[error("Login failed for '{user}': {reason}")]
    Auth { user: String, reason: String },

    /// The folder could not be opened or searched.
    #[error("Mailbox '{folder}' unavailable: {reason}")]
    Mailbox { folder: String, reason: String },

    /// A single message could not be fetched.
    #[error("Fetch of message {id} failed: {reason}")]
    Fetch { id: u32, reason: String },

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    Mime(String),

    /// A rule could not make sense of a message.
    #[error("Rule '{rule}' failed: {reason}")]
    Parse { rule: &'static str, reason: String },
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the whole cycle failed before any message was read.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Connect { .. } | Self::Auth { .. } | Self::Mailbox { .. }
        )
    }
}
