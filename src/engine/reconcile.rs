// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The engine's single serialization point.
//!
//! [`Reconciler`] owns the cursor, the buffer, the connection state and the
//! active channel handle. It runs as one task and takes input from exactly
//! two queues:
//!
//! - consumer commands (connect, disconnect, switch, reset, queries)
//! - channel signals, tagged with the generation they were opened for
//!
//! Commands win ties (`biased` select), so a `disconnect()` is applied before
//! anything the closing channel still has queued. Those leftovers then carry
//! a stale generation and are dropped.
//!
//! # Raw Event Handling
//!
//! ```text
//! raw event ──► buffer.insert ──dup──► absorbed (debug log only)
//!                    │
//!                    ▼ accepted
//!               cursor.set(max(cursor, seq))  (persisted first)
//!                    │
//!          ┌─────────┴──────────┐
//!          ▼ ok                 ▼ failed
//!     Delivered(event)     undo buffer insert, PersistenceFailed,
//!                          close channel, Disconnected
//! ```

use crate::buffer::EventBuffer;
use crate::channel::{
    ChannelContext, ChannelHandle, ChannelKind, ChannelMessage, ChannelSignal, DeliveryChannel, EventSink,
};
use crate::cursor::CursorStore;
use crate::engine::types::{ConnectionState, ConsumerEvent, DisconnectReason, EngineStatus};
use crate::error::{DeliveryError, Result};
use crate::event::Event;
use crate::metrics;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Consumer requests routed into the actor.
pub(crate) enum Command {
    Connect {
        channel: Arc<dyn DeliveryChannel>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    SwitchMode {
        channel: Arc<dyn DeliveryChannel>,
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Event>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct ActiveConnection {
    kind: ChannelKind,
    handle: ChannelHandle,
}

pub(crate) struct Reconciler {
    cursor: CursorStore,
    buffer: EventBuffer,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    consumer_tx: mpsc::UnboundedSender<ConsumerEvent>,
    signal_tx: mpsc::UnboundedSender<ChannelMessage>,
    signal_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    active: Option<ActiveConnection>,
    generation: u64,
}

impl Reconciler {
    pub(crate) fn new(
        cursor: CursorStore,
        buffer: EventBuffer,
        state_tx: watch::Sender<ConnectionState>,
        consumer_tx: mpsc::UnboundedSender<ConsumerEvent>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        metrics::set_cursor_value(cursor.get());
        metrics::set_connection_state(&ConnectionState::Disconnected.to_string());

        Self {
            cursor,
            buffer,
            state: ConnectionState::Disconnected,
            state_tx,
            consumer_tx,
            signal_tx,
            signal_rx,
            active: None,
            generation: 0,
        }
    }

    /// Actor loop. Returns after `Shutdown` or once every handle is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(cursor = self.cursor.get(), "Reconciliation engine started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All engine handles dropped");
                        self.shutdown().await;
                        return;
                    }
                },

                Some(message) = self.signal_rx.recv() => self.on_signal(message).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { channel, reply } => {
                let _ = reply.send(self.connect(channel));
            }
            Command::Disconnect { reply } => {
                self.disconnect(DisconnectReason::Requested);
                let _ = reply.send(Ok(()));
            }
            Command::SwitchMode { channel, reply } => {
                let _ = reply.send(self.switch_mode(channel));
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.reset().await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.buffer.to_ordered_list());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                // Handled in run(); kept for exhaustiveness
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    /// Open `channel` seeded with the current cursor. Only valid while disconnected.
    pub(crate) fn connect(&mut self, channel: Arc<dyn DeliveryChannel>) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(DeliveryError::InvalidState {
                expected: ConnectionState::Disconnected.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.generation += 1;
        let kind = channel.kind();
        let since_seq = self.cursor.get();
        let ctx = ChannelContext {
            cursor: self.cursor.subscribe(),
            sink: EventSink::new(self.generation, kind, self.signal_tx.clone(), self.cursor.subscribe()),
        };

        info!(channel = %kind, since_seq, generation = self.generation, "Connecting");
        self.set_state(ConnectionState::Connecting);

        match channel.open(since_seq, ctx) {
            Ok(handle) => {
                self.active = Some(ActiveConnection { kind, handle });
                if !kind.has_ready_phase() {
                    self.set_state(ConnectionState::Connected);
                }
                Ok(())
            }
            Err(e) => {
                warn!(channel = %kind, error = %e, "Channel failed to open");
                metrics::record_transport_error(kind.as_str());
                self.set_state(ConnectionState::Disconnected);
                self.emit(ConsumerEvent::Disconnected {
                    channel: kind,
                    reason: DisconnectReason::OpenFailed(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Close the active channel, if any. Idempotent.
    pub(crate) fn disconnect(&mut self, reason: DisconnectReason) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.handle.close();
        info!(channel = %active.kind, generation = active.handle.generation(), reason = %reason, "Disconnected");
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConsumerEvent::Disconnected {
            channel: active.kind,
            reason,
        });
    }

    /// Disconnect, then connect to `channel`. Refused while a connection
    /// attempt is still pending.
    pub(crate) fn switch_mode(&mut self, channel: Arc<dyn DeliveryChannel>) -> Result<()> {
        if self.state == ConnectionState::Connecting {
            return Err(DeliveryError::InvalidState {
                expected: format!("{} or {}", ConnectionState::Connected, ConnectionState::Disconnected),
                actual: self.state.to_string(),
            });
        }

        info!(from = ?self.active.as_ref().map(|a| a.kind), to = %channel.kind(), "Switching mode");
        self.disconnect(DisconnectReason::Requested);
        self.connect(channel)
    }

    /// Clear the persisted cursor and the buffer together.
    ///
    /// The active channel stays open. Pull pages fetched before the reset are
    /// discarded by the cursor epoch change, whether still in flight or
    /// already queued in the mailbox.
    pub(crate) async fn reset(&mut self) -> Result<()> {
        self.cursor.reset().await?;
        self.buffer.clear();

        metrics::record_reset();
        metrics::set_buffer_len(0);
        metrics::set_cursor_value(0);
        info!("Cursor and buffer reset");
        self.emit(ConsumerEvent::Reset);
        Ok(())
    }

    pub(crate) fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            channel: self.active.as_ref().map(|a| a.kind),
            cursor: self.cursor.get(),
            buffered: self.buffer.len(),
            generation: self.generation,
        }
    }

    pub(crate) async fn on_signal(&mut self, message: ChannelMessage) {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.handle.generation() == message.generation);

        if !is_current {
            trace!(
                channel = %message.kind,
                generation = message.generation,
                current = self.generation,
                "Dropping signal from closed channel"
            );
            if matches!(message.signal, ChannelSignal::Event(_)) {
                metrics::record_event_stale(message.kind.as_str());
            }
            return;
        }

        // Pull refetches from the cursor, so a page from an older epoch is stale
        if message.kind == ChannelKind::Pull
            && matches!(message.signal, ChannelSignal::Event(_))
            && message.epoch != self.cursor.snapshot().epoch
        {
            debug!(
                channel = %message.kind,
                epoch = message.epoch,
                current = self.cursor.snapshot().epoch,
                "Dropping event fetched before cursor reset"
            );
            metrics::record_event_stale(message.kind.as_str());
            return;
        }

        match message.signal {
            ChannelSignal::Ready => {
                if self.state == ConnectionState::Connecting {
                    info!(channel = %message.kind, "Channel ready");
                    self.set_state(ConnectionState::Connected);
                }
            }
            ChannelSignal::Event(event) => self.on_raw_event(message.kind, event).await,
            ChannelSignal::Warning(text) => {
                self.emit(ConsumerEvent::TransportWarning {
                    channel: message.kind,
                    message: text,
                });
            }
            ChannelSignal::Terminated(err) => {
                let reason = match err {
                    Some(e) => DisconnectReason::TransportError(e),
                    None => DisconnectReason::Closed,
                };
                self.disconnect(reason);
            }
        }
    }

    async fn on_raw_event(&mut self, kind: ChannelKind, event: Event) {
        let seq = event.seq;

        if !self.buffer.insert(event.clone()) {
            debug!(channel = %kind, seq, "Duplicate event absorbed");
            metrics::record_event_deduplicated(kind.as_str());
            return;
        }

        if let Err(e) = self.cursor.set(seq).await {
            // Never deliver what the cursor can't vouch for
            self.buffer.remove(seq);
            error!(channel = %kind, seq, error = %e, "Cursor persistence failed, closing channel");
            let message = e.to_string();
            self.emit(ConsumerEvent::PersistenceFailed {
                seq,
                message: message.clone(),
            });
            self.disconnect(DisconnectReason::PersistenceFailure(message));
            return;
        }

        debug!(channel = %kind, seq, cursor = self.cursor.get(), "Event delivered");
        metrics::record_event_accepted(kind.as_str());
        metrics::set_buffer_len(self.buffer.len());
        self.emit(ConsumerEvent::Delivered(event));
    }

    async fn shutdown(&mut self) {
        self.disconnect(DisconnectReason::Requested);
        self.cursor.close().await;
        info!(cursor = self.cursor.get(), "Reconciliation engine stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.state_tx.send_replace(state);
        metrics::set_connection_state(&state.to_string());
        self.emit(ConsumerEvent::StateChanged(state));
    }

    fn emit(&self, event: ConsumerEvent) {
        if self.consumer_tx.send(event).is_err() {
            trace!("Consumer receiver dropped");
        }
    }

    /// Process every queued signal without the actor loop.
    #[cfg(test)]
    pub(crate) async fn drain_signals(&mut self) {
        while let Ok(message) = self.signal_rx.try_recv() {
            self.on_signal(message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorBackend;
    use serde_json::json;
    use std::sync::Mutex;

    /// Channel whose sink is handed back to the test to drive by hand.
    struct ScriptedChannel {
        kind: ChannelKind,
        fail_open: bool,
        opened: Mutex<Vec<(u64, EventSink)>>,
    }

    impl ScriptedChannel {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_open: false,
                opened: Mutex::new(Vec::new()),
            })
        }

        fn failing(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_open: true,
                opened: Mutex::new(Vec::new()),
            })
        }

        fn sink(&self) -> EventSink {
            self.opened.lock().unwrap().last().unwrap().1.clone()
        }

        fn since_seqs(&self) -> Vec<u64> {
            self.opened.lock().unwrap().iter().map(|(seq, _)| *seq).collect()
        }
    }

    impl DeliveryChannel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn open(&self, since_seq: u64, ctx: ChannelContext) -> Result<ChannelHandle> {
            if self.fail_open {
                return Err(DeliveryError::transport(self.kind, "refused"));
            }
            self.opened.lock().unwrap().push((since_seq, ctx.sink.clone()));
            Ok(ChannelHandle::spawn(&ctx.sink, |_| std::future::pending::<()>()))
        }
    }

    struct Harness {
        reconciler: Reconciler,
        consumer_rx: mpsc::UnboundedReceiver<ConsumerEvent>,
        backend: MemoryCursorBackend,
    }

    impl Harness {
        async fn new(capacity: usize) -> Self {
            let backend = MemoryCursorBackend::new();
            let cursor = CursorStore::open(Arc::new(backend.clone()), "test_cursor").await.unwrap();
            let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
            let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
            Self {
                reconciler: Reconciler::new(cursor, EventBuffer::new(capacity), state_tx, consumer_tx),
                consumer_rx,
                backend,
            }
        }

        fn events(&mut self) -> Vec<ConsumerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.consumer_rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn delivered(&mut self) -> Vec<u64> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ConsumerEvent::Delivered(e) => Some(e.seq),
                    _ => None,
                })
                .collect()
        }

        async fn feed(&mut self, sink: &EventSink, seqs: &[u64]) {
            for seq in seqs {
                sink.event(Event::new(*seq, "test", json!({ "seq": seq })));
            }
            self.reconciler.drain_signals().await;
        }
    }

    #[tokio::test]
    async fn test_pull_connects_immediately() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);

        h.reconciler.connect(channel.clone()).unwrap();
        assert_eq!(h.reconciler.status().state, ConnectionState::Connected);
        assert_eq!(
            h.events(),
            vec![
                ConsumerEvent::StateChanged(ConnectionState::Connecting),
                ConsumerEvent::StateChanged(ConnectionState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_waits_for_ready() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Push);

        h.reconciler.connect(channel.clone()).unwrap();
        assert_eq!(h.reconciler.status().state, ConnectionState::Connecting);

        channel.sink().ready();
        h.reconciler.drain_signals().await;
        assert_eq!(h.reconciler.status().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_requires_disconnected() {
        let mut h = Harness::new(100).await;
        h.reconciler.connect(ScriptedChannel::new(ChannelKind::Pull)).unwrap();
        let err = h.reconciler.connect(ScriptedChannel::new(ChannelKind::Push)).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_open_failure_goes_straight_to_disconnected() {
        let mut h = Harness::new(100).await;
        assert!(h.reconciler.connect(ScriptedChannel::failing(ChannelKind::Duplex)).is_err());
        assert_eq!(h.reconciler.status().state, ConnectionState::Disconnected);

        let events = h.events();
        assert!(events.contains(&ConsumerEvent::StateChanged(ConnectionState::Connecting)));
        assert!(matches!(
            events.last(),
            Some(ConsumerEvent::Disconnected { reason: DisconnectReason::OpenFailed(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_pull_scenario_resent_event_not_duplicated() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        h.events();

        h.feed(&channel.sink(), &[1, 2]).await;
        assert_eq!(h.reconciler.cursor.get(), 2);
        assert_eq!(h.reconciler.buffer.seqs(), vec![2, 1]);

        h.feed(&channel.sink(), &[2, 3]).await;
        assert_eq!(h.reconciler.cursor.get(), 3);
        assert_eq!(h.reconciler.buffer.seqs(), vec![3, 2, 1]);
        assert_eq!(h.delivered(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_out_of_order_arrival() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();

        h.feed(&channel.sink(), &[3, 1, 2]).await;
        assert_eq!(h.reconciler.cursor.get(), 3);
        assert_eq!(h.reconciler.buffer.seqs(), vec![3, 2, 1]);
        // Delivered in arrival order; display order comes from the buffer
        assert_eq!(h.delivered(), vec![3, 1, 2]);
        assert_eq!(h.backend.stored("test_cursor").await, Some(3));
    }

    #[tokio::test]
    async fn test_disconnect_drops_late_signals() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Push);
        h.reconciler.connect(channel.clone()).unwrap();
        let sink = channel.sink();
        sink.ready();
        h.feed(&sink, &[1]).await;

        // Event queued before the close, processed after it
        sink.event(Event::new(2, "late", json!({})));
        h.reconciler.disconnect(DisconnectReason::Requested);
        h.reconciler.drain_signals().await;

        assert_eq!(h.reconciler.cursor.get(), 1);
        assert_eq!(h.reconciler.buffer.seqs(), vec![1]);
        assert_eq!(h.delivered(), vec![1]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut h = Harness::new(100).await;
        h.reconciler.disconnect(DisconnectReason::Requested);
        assert!(h.events().is_empty());

        h.reconciler.connect(ScriptedChannel::new(ChannelKind::Pull)).unwrap();
        h.reconciler.disconnect(DisconnectReason::Requested);
        h.reconciler.disconnect(DisconnectReason::Requested);
        let disconnects = h
            .events()
            .into_iter()
            .filter(|e| matches!(e, ConsumerEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_terminated_signal_disconnects() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Duplex);
        h.reconciler.connect(channel.clone()).unwrap();
        channel.sink().ready();
        channel.sink().terminated(Some("socket reset".to_string()));
        h.reconciler.drain_signals().await;

        assert_eq!(h.reconciler.status().state, ConnectionState::Disconnected);
        assert!(h.events().contains(&ConsumerEvent::Disconnected {
            channel: ChannelKind::Duplex,
            reason: DisconnectReason::TransportError("socket reset".to_string()),
        }));
        // Closed handle's sink is silenced
        assert!(channel.sink().is_closed());
    }

    #[tokio::test]
    async fn test_switch_mode_refused_while_connecting() {
        let mut h = Harness::new(100).await;
        h.reconciler.connect(ScriptedChannel::new(ChannelKind::Push)).unwrap();
        let err = h.reconciler.switch_mode(ScriptedChannel::new(ChannelKind::Pull)).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_switch_mode_reseeds_from_cursor() {
        let mut h = Harness::new(100).await;
        let pull = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(pull.clone()).unwrap();
        h.feed(&pull.sink(), &[1, 2, 3]).await;

        let duplex = ScriptedChannel::new(ChannelKind::Duplex);
        h.reconciler.switch_mode(duplex.clone()).unwrap();

        assert_eq!(duplex.since_seqs(), vec![3]);
        assert!(pull.sink().is_closed());
        assert_eq!(h.reconciler.status().channel, Some(ChannelKind::Duplex));
        assert_eq!(h.reconciler.status().generation, 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_not_delivered() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        h.feed(&channel.sink(), &[1]).await;
        h.events();

        h.backend.set_fail_saves(true);
        h.feed(&channel.sink(), &[2]).await;

        assert_eq!(h.reconciler.cursor.get(), 1);
        assert_eq!(h.reconciler.buffer.seqs(), vec![1]);
        assert_eq!(h.reconciler.status().state, ConnectionState::Disconnected);

        let events = h.events();
        assert!(events.iter().any(|e| matches!(e, ConsumerEvent::PersistenceFailed { seq: 2, .. })));
        assert!(!events.iter().any(|e| matches!(e, ConsumerEvent::Delivered(_))));

        // Once storage recovers, a reconnect picks the event up again
        h.backend.set_fail_saves(false);
        let retry = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(retry.clone()).unwrap();
        assert_eq!(retry.since_seqs(), vec![1]);
        h.feed(&retry.sink(), &[2]).await;
        assert_eq!(h.reconciler.cursor.get(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_cursor_and_buffer() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        h.feed(&channel.sink(), &[1, 2]).await;

        h.reconciler.reset().await.unwrap();
        assert_eq!(h.reconciler.cursor.get(), 0);
        assert!(h.reconciler.buffer.is_empty());
        assert_eq!(h.backend.stored("test_cursor").await, None);
        assert!(h.events().contains(&ConsumerEvent::Reset));

        // Channel stays open; previously seen seqs are accepted again
        assert_eq!(h.reconciler.status().state, ConnectionState::Connected);
        h.feed(&channel.sink(), &[1]).await;
        assert_eq!(h.delivered(), vec![1]);
    }

    #[tokio::test]
    async fn test_reset_drops_queued_pull_page() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        h.feed(&channel.sink(), &[1, 2, 3]).await;

        // Page fetched before the reset, still sitting in the mailbox
        let sink = channel.sink();
        sink.event(Event::new(4, "test", json!({ "seq": 4 })));
        sink.event(Event::new(5, "test", json!({ "seq": 5 })));
        h.reconciler.reset().await.unwrap();
        h.events();
        h.reconciler.drain_signals().await;

        assert_eq!(h.reconciler.cursor.get(), 0);
        assert!(h.reconciler.buffer.is_empty());
        assert!(h.delivered().is_empty());
        assert_eq!(h.backend.stored("test_cursor").await, None);

        // Pages fetched after the reset are accepted from the start
        h.feed(&channel.sink(), &[1, 2]).await;
        assert_eq!(h.delivered(), vec![1, 2]);
        assert_eq!(h.reconciler.cursor.get(), 2);
    }

    #[tokio::test]
    async fn test_reset_keeps_queued_push_events() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Push);
        h.reconciler.connect(channel.clone()).unwrap();
        channel.sink().ready();
        h.feed(&channel.sink(), &[1, 2]).await;

        // Live events are never resent, so a reset must not swallow them
        channel.sink().event(Event::new(3, "test", json!({ "seq": 3 })));
        h.reconciler.reset().await.unwrap();
        h.events();
        h.reconciler.drain_signals().await;

        assert_eq!(h.delivered(), vec![3]);
        assert_eq!(h.reconciler.cursor.get(), 3);
    }

    #[tokio::test]
    async fn test_eviction_keeps_cursor() {
        let mut h = Harness::new(3).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        h.feed(&channel.sink(), &[1, 2, 3, 4, 5]).await;

        assert_eq!(h.reconciler.buffer.seqs(), vec![5, 4, 3]);
        assert_eq!(h.reconciler.cursor.get(), 5);
    }

    #[tokio::test]
    async fn test_warning_forwarded() {
        let mut h = Harness::new(100).await;
        let channel = ScriptedChannel::new(ChannelKind::Pull);
        h.reconciler.connect(channel.clone()).unwrap();
        channel.sink().warning("timeout");
        h.reconciler.drain_signals().await;

        assert!(h.events().contains(&ConsumerEvent::TransportWarning {
            channel: ChannelKind::Pull,
            message: "timeout".to_string(),
        }));
        assert_eq!(h.reconciler.status().state, ConnectionState::Connected);
    }
}
