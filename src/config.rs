//! Configuration for the delivery engine.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON. Every field has a default, so an empty document is valid.
//!
//! # Quick Start
//!
//! ```rust
//! use delivery_engine::config::{DeliveryConfig, PullConfig};
//!
//! let config = DeliveryConfig {
//!     pull: PullConfig {
//!         interval: "5s".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! DeliveryConfig
//! ├── cursor: CursorConfig        # SQLite cursor persistence
//! ├── buffer: BufferConfig        # Recent-event retention
//! ├── pull: PullConfig            # Polling interval and batch size
//! └── endpoints: EndpointConfig   # Notification store URLs
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! cursor:
//!   sqlite_path: "/var/lib/app/cursor.db"
//! buffer:
//!   capacity: 100
//! pull:
//!   interval: "10s"
//!   batch_size: 50
//! endpoints:
//!   base_url: "http://notifications:8000"
//!   ws_url: "ws://notifications:8000/ws"
//! ```

use crate::error::{DeliveryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Shortest allowed pull interval.
pub const MIN_PULL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest allowed pull interval.
pub const MAX_PULL_INTERVAL: Duration = Duration::from_secs(60);

/// Largest page the notification store will serve.
pub const MAX_PULL_BATCH_SIZE: usize = 200;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub pull: PullConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

impl DeliveryConfig {
    /// Create a minimal config for testing (in-memory cursor, 1s polling).
    pub fn for_testing() -> Self {
        Self {
            cursor: CursorConfig::in_memory(),
            buffer: BufferConfig::default(),
            pull: PullConfig {
                interval: "1s".to_string(),
                batch_size: default_batch_size(),
            },
            endpoints: EndpointConfig::default(),
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        self.pull.validate()?;

        if self.buffer.capacity == 0 {
            return Err(DeliveryError::Config("buffer.capacity must be at least 1".to_string()));
        }
        if self.cursor.key.is_empty() {
            return Err(DeliveryError::Config("cursor.key must not be empty".to_string()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Path to the SQLite database holding the cursor.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Fixed key the cursor is stored under.
    #[serde(default = "default_cursor_key")]
    pub key: String,
}

fn default_sqlite_path() -> String {
    "delivery_cursor.db".to_string()
}

fn default_cursor_key() -> String {
    "notif_last_seq".to_string()
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            key: default_cursor_key(),
        }
    }
}

impl CursorConfig {
    /// In-memory SQLite (for testing).
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            key: default_cursor_key(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BufferConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Event buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum events retained for dedup and replay.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    crate::buffer::DEFAULT_CAPACITY
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PullConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Pull channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Tick interval as a duration string (e.g. "10s"). Bounded to 1s..=60s.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Maximum events requested per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_interval() -> String {
    "10s".to_string()
}

fn default_batch_size() -> usize {
    50
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl PullConfig {
    /// Parse the interval, clamped into the allowed bounds.
    ///
    /// Unparseable values fall back to 10s.
    pub fn interval_duration(&self) -> Duration {
        let parsed = humantime::parse_duration(&self.interval).unwrap_or_else(|e| {
            warn!(interval = %self.interval, error = %e, "Invalid pull interval, using 10s");
            Duration::from_secs(10)
        });
        parsed.clamp(MIN_PULL_INTERVAL, MAX_PULL_INTERVAL)
    }

    /// Batch size clamped into `1..=MAX_PULL_BATCH_SIZE`.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_PULL_BATCH_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        let interval = humantime::parse_duration(&self.interval).map_err(|e| {
            DeliveryError::Config(format!("pull.interval '{}': {}", self.interval, e))
        })?;
        if interval < MIN_PULL_INTERVAL || interval > MAX_PULL_INTERVAL {
            return Err(DeliveryError::Config(format!(
                "pull.interval must be between 1s and 60s, got {}",
                self.interval
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_PULL_BATCH_SIZE {
            return Err(DeliveryError::Config(format!(
                "pull.batch_size must be between 1 and {}, got {}",
                MAX_PULL_BATCH_SIZE, self.batch_size
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EndpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Notification store endpoints used by the HTTP and WebSocket transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the notification store (e.g. `"http://localhost:8000"`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path for create (POST) and delta fetch (GET).
    #[serde(default = "default_notifications_path")]
    pub notifications_path: String,

    /// Path for the server-sent event stream.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Full URL of the duplex endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Per-request timeout for create and delta fetch, as a duration string.
    /// Long-lived streams are not subject to it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_notifications_path() -> String {
    "/api/notifications".to_string()
}

fn default_stream_path() -> String {
    "/api/notifications/stream".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            notifications_path: default_notifications_path(),
            stream_path: default_stream_path(),
            ws_url: default_ws_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl EndpointConfig {
    /// URL for create and delta fetch.
    pub fn notifications_url(&self) -> String {
        join_url(&self.base_url, &self.notifications_path)
    }

    /// URL for the event stream.
    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    /// Parse the request timeout (falls back to 10s).
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(10))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
