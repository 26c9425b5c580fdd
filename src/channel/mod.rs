// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery channels: one transport each, one output contract.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  open(since_seq, ctx)   ┌──────────────────────────┐
//! │ Reconciler   │ ──────────────────────▶ │ DeliveryChannel          │
//! │ (engine)     │                         │  Pull / Push / Duplex    │
//! │              │ ◀── ChannelMessage ──── │  spawned task + EventSink│
//! │              │     {generation, kind,  └──────────────────────────┘
//! │              │      signal}                     │
//! │              │ ── ChannelHandle::close() ──────▶│ shutdown + abort
//! └──────────────┘
//! ```
//!
//! Each variant runs as its own task and reports through an [`EventSink`]:
//! - `Ready`: session established (Push and Duplex only)
//! - `Event`: one raw, unreconciled event
//! - `Warning`: non-terminal transport problem (a failed Pull tick)
//! - `Terminated`: the session ended on its own; carries the error, if any
//!
//! Every message is tagged with the connection generation it was opened for,
//! so the engine can drop anything a closed channel emits after the fact, and
//! with the cursor epoch it was produced under, so Pull pages fetched before a
//! reset can be dropped as well.

pub mod duplex;
pub mod pull;
pub mod push;

pub use duplex::DuplexChannel;
pub use pull::PullChannel;
pub use push::PushChannel;

use crate::config::DeliveryConfig;
use crate::cursor::CursorSnapshot;
use crate::error::{DeliveryError, Result};
use crate::event::Event;
use crate::transport::http::{HttpNotificationApi, SseConnector};
use crate::transport::ws::WsConnector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

/// Transport variant of a delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Periodic delta fetch.
    Pull,
    /// Server-initiated inbound stream.
    Push,
    /// Bi-directional socket with a hello handshake.
    Duplex,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Duplex => "duplex",
        }
    }

    /// Whether the channel reports `Ready` before it counts as connected.
    ///
    /// Pull has no session to establish: it is connected as soon as it opens.
    pub fn has_ready_phase(&self) -> bool {
        !matches!(self, Self::Pull)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" | "polling" => Ok(Self::Pull),
            "push" | "sse" => Ok(Self::Push),
            "duplex" | "ws" | "websocket" => Ok(Self::Duplex),
            other => Err(DeliveryError::Config(format!("unknown channel kind: {}", other))),
        }
    }
}

/// What a channel reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Ready,
    Event(Event),
    Warning(String),
    /// Spontaneous end of the session; `Some` carries the error.
    Terminated(Option<String>),
}

/// A signal tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub generation: u64,
    pub kind: ChannelKind,
    /// Cursor epoch the signal was produced under.
    pub epoch: u64,
    pub signal: ChannelSignal,
}

/// Channel-side end of the engine mailbox.
///
/// Once the owning [`ChannelHandle`] is closed the sink goes quiet: every
/// send becomes a no-op. Messages are stamped with the cursor epoch current
/// at send time unless the caller supplies one.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    kind: ChannelKind,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    cursor: watch::Receiver<CursorSnapshot>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(
        generation: u64,
        kind: ChannelKind,
        tx: mpsc::UnboundedSender<ChannelMessage>,
        cursor: watch::Receiver<CursorSnapshot>,
    ) -> Self {
        Self {
            generation,
            kind,
            tx,
            cursor,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// True once the handle is closed or the engine has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    pub fn ready(&self) -> bool {
        self.send(ChannelSignal::Ready)
    }

    /// Forward one raw event. Returns `false` if nobody is listening anymore.
    pub fn event(&self, event: Event) -> bool {
        self.send(ChannelSignal::Event(event))
    }

    /// Forward one event fetched under cursor `epoch`.
    pub fn event_at(&self, event: Event, epoch: u64) -> bool {
        self.send_at(ChannelSignal::Event(event), epoch)
    }

    pub fn warning(&self, message: impl Into<String>) -> bool {
        self.send(ChannelSignal::Warning(message.into()))
    }

    pub fn terminated(&self, error: Option<String>) -> bool {
        self.send(ChannelSignal::Terminated(error))
    }

    fn send(&self, signal: ChannelSignal) -> bool {
        let epoch = self.cursor.borrow().epoch;
        self.send_at(signal, epoch)
    }

    fn send_at(&self, signal: ChannelSignal, epoch: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx
            .send(ChannelMessage {
                generation: self.generation,
                kind: self.kind,
                epoch,
                signal,
            })
            .is_ok()
    }
}

/// Everything a channel needs when it opens.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    /// Live cursor; Pull reads it on every tick.
    pub cursor: watch::Receiver<CursorSnapshot>,
    pub sink: EventSink,
}

/// Owned handle to one open channel.
///
/// Dropping the handle closes it.
#[derive(Debug)]
pub struct ChannelHandle {
    kind: ChannelKind,
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl ChannelHandle {
    /// Spawn a channel task.
    ///
    /// `run` receives a shutdown receiver that flips to `true` on close. The
    /// task is also aborted on close, so a channel suspended on I/O that
    /// never observes the flag still releases its transport.
    pub fn spawn<F, Fut>(sink: &EventSink, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = info_span!("channel", channel = %sink.kind, generation = sink.generation);
        let task = tokio::spawn(run(shutdown_rx).instrument(span));

        Self {
            kind: sink.kind,
            generation: sink.generation,
            shutdown_tx,
            task: Some(task),
            closed: Arc::clone(&sink.closed),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the channel. Idempotent.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// One transport variant.
///
/// Implementations spawn their work in [`open`](DeliveryChannel::open) and
/// return immediately; progress is reported through `ctx.sink`.
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Open a session seeded with `since_seq`.
    ///
    /// Must be called from within a tokio runtime.
    fn open(&self, since_seq: u64, ctx: ChannelContext) -> Result<ChannelHandle>;
}

/// Build a channel of `kind` over the network transports in `config`.
///
/// - Pull: [`HttpNotificationApi`] delta fetch
/// - Push: [`SseConnector`] event stream
/// - Duplex: [`WsConnector`] socket
pub fn network_channel(kind: ChannelKind, config: &DeliveryConfig) -> Result<Arc<dyn DeliveryChannel>> {
    let channel: Arc<dyn DeliveryChannel> = match kind {
        ChannelKind::Pull => Arc::new(PullChannel::new(
            Arc::new(HttpNotificationApi::new(&config.endpoints)?),
            &config.pull,
        )),
        ChannelKind::Push => Arc::new(PushChannel::new(Arc::new(SseConnector::new(&config.endpoints)?))),
        ChannelKind::Duplex => Arc::new(DuplexChannel::new(Arc::new(WsConnector::new(&config.endpoints)))),
    };
    Ok(channel)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a context plus the receiving end of the mailbox.
    pub fn context(
        kind: ChannelKind,
        seq: u64,
    ) -> (
        ChannelContext,
        watch::Sender<CursorSnapshot>,
        mpsc::UnboundedReceiver<ChannelMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cursor_tx, cursor_rx) = watch::channel(CursorSnapshot { seq, epoch: 0 });
        let ctx = ChannelContext {
            sink: EventSink::new(1, kind, tx, cursor_rx.clone()),
            cursor: cursor_rx,
        };
        (ctx, cursor_tx, rx)
    }

    /// Next signal, failing the test after a generous timeout.
    pub async fn next_signal(rx: &mut mpsc::UnboundedReceiver<ChannelMessage>) -> ChannelSignal {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for channel signal")
            .expect("mailbox closed")
            .signal
    }
}
