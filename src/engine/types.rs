// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state types.
//!
//! Defines the connection state machine and what the consumer observes.
//!
//! # State Transitions
//!
//! ```text
//!                 connect(channel)
//! Disconnected ───────────────────→ Connecting
//!    ↑   ↑                              │
//!    │   │ (open failed)                │ Ready signal
//!    │   └──────────────────────────────┤ (immediately for Pull)
//!    │                                  ↓
//!    └──────── disconnect() ─────── Connected
//!              terminal signal
//!              persistence failure
//! ```
//!
//! The engine never moves out of `Disconnected` on its own: reconnecting is
//! always a consumer decision.

use crate::channel::ChannelKind;
use crate::event::Event;
use std::fmt;

/// Connection state, owned by the engine and observed by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel open.
    #[default]
    Disconnected,

    /// A channel was opened and has not reported ready yet.
    ///
    /// Mode switches are refused in this state.
    Connecting,

    /// Events are flowing.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The consumer called `disconnect()` or switched mode.
    Requested,
    /// The server closed the session.
    Closed,
    /// The transport failed mid-session.
    TransportError(String),
    /// The channel could not be opened.
    OpenFailed(String),
    /// The cursor could not be persisted; the session was torn down.
    PersistenceFailure(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::Closed => write!(f, "closed by server"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {}", e),
            DisconnectReason::OpenFailed(e) => write!(f, "open failed: {}", e),
            DisconnectReason::PersistenceFailure(e) => write!(f, "persistence failure: {}", e),
        }
    }
}

/// Everything the consumer receives from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    /// A reconciled event: new `seq`, cursor already persisted.
    Delivered(Event),

    StateChanged(ConnectionState),

    /// The active session ended (for any reason, including a request).
    Disconnected {
        channel: ChannelKind,
        reason: DisconnectReason,
    },

    /// Non-terminal transport problem (a failed Pull tick).
    TransportWarning { channel: ChannelKind, message: String },

    /// The cursor could not be saved at `seq`. The event was not delivered.
    ///
    /// This is the one condition that compromises correctness across
    /// restarts; consumers should escalate it.
    PersistenceFailed { seq: u64, message: String },

    /// Cursor and buffer were cleared.
    Reset,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: ConnectionState,
    /// Active channel, if any.
    pub channel: Option<ChannelKind>,
    pub cursor: u64,
    pub buffered: usize,
    /// Connection generation; increments on every connect.
    pub generation: u64,
}

impl EngineStatus {
    /// Connected and able to persist progress.
    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
