//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Engine spawn helpers over in-memory and SQLite cursors
//! - A consumer-side recorder that waits on `ConsumerEvent`s with timeouts
//! - Channel builders over the in-memory notification store

#![allow(dead_code)]

use delivery_engine::{
    ConnectionState, ConsumerEvent, CursorStore, DeliveryChannel, DeliveryConfig, DisconnectReason, DuplexChannel,
    Event, MemoryNotificationStore, NewEvent, PullChannel, PushChannel, ReconciliationEngine,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Generous upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Pull tick used by tests.
pub const FAST_TICK: Duration = Duration::from_millis(20);

pub fn pull(store: &Arc<MemoryNotificationStore>) -> Arc<dyn DeliveryChannel> {
    Arc::new(PullChannel::new(Arc::clone(store), &DeliveryConfig::for_testing().pull).with_interval(FAST_TICK))
}

pub fn pull_every(store: &Arc<MemoryNotificationStore>, interval: Duration) -> Arc<dyn DeliveryChannel> {
    Arc::new(PullChannel::new(Arc::clone(store), &DeliveryConfig::for_testing().pull).with_interval(interval))
}

pub fn push(store: &Arc<MemoryNotificationStore>) -> Arc<dyn DeliveryChannel> {
    Arc::new(PushChannel::new(Arc::clone(store)))
}

pub fn duplex(store: &Arc<MemoryNotificationStore>) -> Arc<dyn DeliveryChannel> {
    Arc::new(DuplexChannel::new(Arc::clone(store)))
}

/// Store holding `count` events with seqs `1..=count`.
pub async fn store_with(count: u64) -> Arc<MemoryNotificationStore> {
    let store = MemoryNotificationStore::new();
    for n in 1..=count {
        store.create(NewEvent::new("test.created", json!({ "n": n }))).await;
    }
    Arc::new(store)
}

pub fn event(seq: u64) -> Event {
    Event::new(seq, "test.created", json!({ "seq": seq }))
}

/// Engine under test plus everything it has emitted so far.
pub struct TestConsumer {
    pub engine: ReconciliationEngine,
    rx: UnboundedReceiver<ConsumerEvent>,
    pub seen: Vec<ConsumerEvent>,
}

impl TestConsumer {
    pub async fn in_memory() -> Self {
        let cursor = CursorStore::in_memory().await.expect("open in-memory cursor");
        Self::with_cursor(cursor)
    }

    pub fn with_cursor(cursor: CursorStore) -> Self {
        let (engine, rx) = ReconciliationEngine::spawn(&DeliveryConfig::for_testing(), cursor);
        Self {
            engine,
            rx,
            seen: Vec::new(),
        }
    }

    /// Wait for the next consumer event matching `pred`, recording everything.
    pub async fn wait_for(&mut self, what: &str, pred: impl Fn(&ConsumerEvent) -> bool) -> ConsumerEvent {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}; saw {:?}", what, self.seen))
                .expect("engine stopped");
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    /// Wait until `seq` has been delivered.
    pub async fn wait_delivered(&mut self, seq: u64) {
        if self.delivered().contains(&seq) {
            return;
        }
        self.wait_for(&format!("delivery of {}", seq), |e| {
            matches!(e, ConsumerEvent::Delivered(ev) if ev.seq == seq)
        })
        .await;
    }

    pub async fn wait_state(&mut self, state: ConnectionState) {
        if self.engine.state() == state {
            return;
        }
        self.wait_for(&format!("state {}", state), |e| *e == ConsumerEvent::StateChanged(state))
            .await;
    }

    pub async fn wait_disconnected(&mut self) -> DisconnectReason {
        match self
            .wait_for("disconnect", |e| matches!(e, ConsumerEvent::Disconnected { .. }))
            .await
        {
            ConsumerEvent::Disconnected { reason, .. } => reason,
            _ => unreachable!(),
        }
    }

    /// Collect whatever arrives within `window` without waiting for anything specific.
    pub async fn settle(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            self.seen.push(event);
        }
    }

    /// Seqs delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<u64> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::Delivered(ev) => Some(ev.seq),
                _ => None,
            })
            .collect()
    }

    /// Seqs currently buffered, highest first.
    pub async fn buffered(&self) -> Vec<u64> {
        self.engine
            .snapshot()
            .await
            .expect("snapshot")
            .iter()
            .map(|e| e.seq)
            .collect()
    }
}
