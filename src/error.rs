// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the delivery engine.
//!
//! Errors are categorized by their source (transport, cursor persistence,
//! wire decoding) and carry enough context to log meaningfully.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Fatal | Description |
//! |------------|-----------|-------|-------------|
//! | `Transport` | Yes | No | Channel could not be opened or dropped mid-session |
//! | `Http` | Yes | No | reqwest failure (pull fetch, SSE connect, create) |
//! | `WebSocket` | Yes | No | tungstenite failure on the duplex socket |
//! | `Persistence` | No | Yes | SQLite error loading/saving the cursor |
//! | `CursorPersist` | No | Yes | Backend refused to persist a cursor value |
//! | `MalformedFrame` | No | No | Undecodable frame (dropped, channel continues) |
//! | `Config` | No | No | Configuration invalid |
//! | `InvalidState` | No | No | Lifecycle command issued in the wrong state |
//! | `Shutdown` | No | No | Engine is shutting down |
//! | `Internal` | No | No | Unexpected internal error |
//!
//! # Fatal Errors
//!
//! Only cursor persistence failures are fatal: if the cursor cannot be saved,
//! a restart would resume from a stale position. [`DeliveryError::is_fatal()`]
//! flags these so callers can escalate instead of retrying silently.

use crate::channel::ChannelKind;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors that can occur while delivering notifications.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Network or protocol failure opening or maintaining a channel.
    ///
    /// Pull channels self-heal on the next tick; push and duplex sessions
    /// terminate and wait for the consumer to reconnect.
    #[error("Transport error ({channel}): {message}")]
    Transport { channel: ChannelKind, message: String },

    /// HTTP client error (delta fetch, event stream, create).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error on the duplex connection.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// SQLite error during cursor persistence.
    #[error("Cursor persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A cursor backend failed to persist a value.
    ///
    /// The in-memory cursor is not advanced when this is returned.
    #[error("Failed to persist cursor at seq {seq}: {message}")]
    CursorPersist { seq: u64, message: String },

    /// A frame could not be decoded into an event.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle command issued in the wrong connection state
    /// (e.g. `connect()` while already connected).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The engine has shut down and no longer accepts commands.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Create a transport error for a channel.
    pub fn transport(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self::Transport {
            channel,
            message: message.into(),
        }
    }

    /// Create a malformed-frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame(message.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http(_) => true,
            Self::WebSocket(_) => true,
            Self::Persistence(_) => false, // Local DB issues need attention
            Self::CursorPersist { .. } => false,
            Self::MalformedFrame(_) => false, // Bad data at the source
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error compromises cursor durability.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::CursorPersist { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_transport() {
        let err = DeliveryError::transport(ChannelKind::Push, "connection reset");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("push"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_persistence_is_fatal() {
        let err = DeliveryError::Persistence(sqlx::Error::PoolTimedOut);
        assert!(err.is_fatal());
        assert!(!err.is_retryable());

        let err = DeliveryError::CursorPersist {
            seq: 42,
            message: "disk full".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_retryable_malformed() {
        let err = DeliveryError::malformed("missing seq");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_not_retryable_config() {
        let err = DeliveryError::Config("interval out of range".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = DeliveryError::InvalidState {
            expected: "Disconnected".to_string(),
            actual: "Connected".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Disconnected"));
        assert!(err.to_string().contains("Connected"));
    }

    #[test]
    fn test_not_retryable_shutdown_and_internal() {
        assert!(!DeliveryError::Shutdown.is_retryable());
        assert!(!DeliveryError::Internal("oops".to_string()).is_retryable());
    }
}
