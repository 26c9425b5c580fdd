// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Notification events and their wire frames.
//!
//! The notification store serializes events as JSON objects:
//!
//! ```json
//! {"id": "6f1c…", "seq": 42, "type": "order.shipped", "payload": {...}, "created_at": "2025-01-01T12:00:00+00:00"}
//! ```
//!
//! The duplex transport wraps them in tagged frames:
//!
//! ```text
//! client → server   {"type": "hello", "last_seq": 41}
//! server → client   {"type": "notification", "data": {...event...}}
//! server → client   {"type": "<anything else>", ...}   (ignored)
//! ```

use crate::error::{DeliveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable notification event as assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque identifier assigned by the store.
    pub id: String,
    /// Position in the global order. Unique per event.
    pub seq: u64,
    /// Type tag (e.g. `"order.shipped"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary structured payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Creation time, if the store reported one.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Build an event with a generated id and the current time.
    pub fn new(seq: u64, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            event_type: event_type.into(),
            payload,
            created_at: Some(Utc::now()),
        }
    }
}

/// Request body for creating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// One page of a delta fetch ("events after N, limit M").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPage {
    /// Events in ascending `seq` order.
    pub items: Vec<Event>,
    /// Highest seq in `items`, or the requested `after_seq` if empty.
    pub next_after_seq: u64,
}

impl PollPage {
    /// Build a page the way the store does.
    pub fn from_items(items: Vec<Event>, after_seq: u64) -> Self {
        let next_after_seq = items.last().map(|e| e.seq).unwrap_or(after_seq);
        Self {
            items,
            next_after_seq,
        }
    }
}

/// Frames sent by the client on a duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Catch-up handshake, sent once right after the connection opens.
    Hello { last_seq: u64 },
}

impl ClientFrame {
    /// Encode to the JSON text sent over the wire.
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DeliveryError::Internal(format!("encode frame: {}", e)))
    }
}

/// Frames received from the server on a duplex connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A notification event (catch-up or live).
    Notification { data: Event },
    /// Any other message type. Ignored by the delivery layer.
    #[serde(other)]
    Other,
}

/// Decode a duplex server frame.
///
/// Returns `Ok(None)` for frames that are well-formed but not notifications.
pub fn decode_server_frame(text: &str) -> Result<Option<Event>> {
    let frame: ServerFrame = serde_json::from_str(text)
        .map_err(|e| DeliveryError::malformed(format!("server frame: {}", e)))?;

    match frame {
        ServerFrame::Notification { data } => Ok(Some(data)),
        ServerFrame::Other => Ok(None),
    }
}

/// Decode a bare event payload (pull page item or SSE `data:` field).
pub fn decode_event(text: &str) -> Result<Event> {
    serde_json::from_str(text).map_err(|e| DeliveryError::malformed(format!("event: {}", e)))
}
