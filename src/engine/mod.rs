// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation engine: the consumer-facing handle.
//!
//! [`ReconciliationEngine`] is a cheap, cloneable handle to a spawned actor
//! (see [`reconcile`]). Every operation is a message into the actor's
//! mailbox; state and cursor are mirrored on `watch` channels so reads never
//! queue behind event processing.
//!
//! # Example
//!
//! ```rust,no_run
//! use delivery_engine::{ConsumerEvent, DeliveryConfig, ReconciliationEngine};
//! use delivery_engine::channel::PushChannel;
//! use delivery_engine::transport::http::SseConnector;
//! use std::sync::Arc;
//!
//! # async fn example() -> delivery_engine::Result<()> {
//! let config = DeliveryConfig::default();
//! let (engine, mut events) = ReconciliationEngine::open(&config).await?;
//!
//! let push = PushChannel::new(Arc::new(SseConnector::new(&config.endpoints)?));
//! engine.connect(Arc::new(push)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConsumerEvent::Delivered(notification) => println!("#{} {}", notification.seq, notification.event_type),
//!         ConsumerEvent::Disconnected { reason, .. } => eprintln!("disconnected: {}", reason),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod reconcile;
pub mod types;

pub use types::{ConnectionState, ConsumerEvent, DisconnectReason, EngineStatus};

use crate::buffer::EventBuffer;
use crate::channel::DeliveryChannel;
use crate::config::DeliveryConfig;
use crate::cursor::{CursorSnapshot, CursorStore};
use crate::error::{DeliveryError, Result};
use crate::event::Event;
use reconcile::{Command, Reconciler};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Mailbox depth for consumer commands.
const COMMAND_QUEUE: usize = 64;

/// Handle to a running reconciliation engine.
#[derive(Clone)]
pub struct ReconciliationEngine {
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    cursor_rx: watch::Receiver<CursorSnapshot>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("state", &*self.state_rx.borrow())
            .field("cursor", &*self.cursor_rx.borrow())
            .finish()
    }
}

impl ReconciliationEngine {
    /// Spawn the engine over an already-open cursor.
    ///
    /// Returns the handle and the receiver for everything the consumer sees.
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &DeliveryConfig, cursor: CursorStore) -> (Self, mpsc::UnboundedReceiver<ConsumerEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        let cursor_rx = cursor.subscribe();

        let reconciler = Reconciler::new(cursor, EventBuffer::new(config.buffer.capacity), state_tx, consumer_tx);
        tokio::spawn(reconciler.run(command_rx));

        (
            Self {
                command_tx,
                state_rx,
                cursor_rx,
            },
            consumer_rx,
        )
    }

    /// Validate `config`, open the SQLite cursor it names, and spawn.
    pub async fn open(config: &DeliveryConfig) -> Result<(Self, mpsc::UnboundedReceiver<ConsumerEvent>)> {
        config.validate()?;
        let cursor = CursorStore::from_config(&config.cursor).await?;
        Ok(Self::spawn(config, cursor))
    }

    /// Open `channel` seeded with the current cursor.
    ///
    /// Fails with [`DeliveryError::InvalidState`] unless disconnected, or with
    /// the channel's own error if it cannot be opened.
    pub async fn connect(&self, channel: Arc<dyn DeliveryChannel>) -> Result<()> {
        self.request(|reply| Command::Connect { channel, reply }).await?
    }

    /// Close the active channel. No-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Disconnect and reconnect over `channel`. Refused while connecting.
    pub async fn switch_mode(&self, channel: Arc<dyn DeliveryChannel>) -> Result<()> {
        self.request(|reply| Command::SwitchMode { channel, reply }).await?
    }

    /// Clear the persisted cursor and the buffer.
    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| Command::Reset { reply }).await?
    }

    /// Buffered events, highest `seq` first.
    pub async fn snapshot(&self) -> Result<Vec<Event>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Current cursor value.
    pub fn cursor(&self) -> u64 {
        self.cursor_rx.borrow().seq
    }

    pub fn cursor_receiver(&self) -> watch::Receiver<CursorSnapshot> {
        self.cursor_rx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the actor is still running.
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Close the active channel and the cursor backend, then stop the actor.
    ///
    /// Idempotent: shutting down a stopped engine is a no-op.
    pub async fn shutdown(&self) {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) => debug!("Engine shut down"),
            Err(_) => debug!("Engine already stopped"),
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| DeliveryError::Shutdown)?;
        reply_rx.await.map_err(|_| DeliveryError::Shutdown)
    }
}
