// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process notification store.
//!
//! [`MemoryNotificationStore`] implements all three transport traits against
//! one shared event log, so every channel variant can run without a network.
//! It mirrors the store's observable behavior:
//!
//! - Delta fetch returns events with `seq > after_seq`, ascending, at most `limit`
//! - Stream and duplex sessions replay the backlog first and then tail live
//!   events; the live subscription is taken before the backlog is read, so an
//!   event created in between may arrive twice (never zero times)
//! - Duplex sessions wait for the client's hello before sending anything
//!
//! Fault injection hooks cover what the transports do in the wild: failed
//! fetches, slow responses, malformed frames, dropped and closed sessions,
//! refused connections.

use crate::channel::ChannelKind;
use crate::error::{DeliveryError, Result};
use crate::event::{ClientFrame, Event, NewEvent};
use crate::transport::{BoxFuture, DuplexConnector, EventFetcher, FrameSink, FrameStream, StreamConnector};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, trace};

/// Live fan-out capacity; slow sessions skip ahead rather than block writers.
const LIVE_CAPACITY: usize = 1024;

/// Most events replayed when a session opens.
const BACKLOG_LIMIT: usize = 200;

/// Per-session outbound queue.
const SESSION_QUEUE: usize = 256;

/// What the store pushes to open sessions.
#[derive(Debug, Clone)]
enum Live {
    Event(Event),
    Raw(String),
    Fail(String),
    Close,
}

#[derive(Debug, Default)]
struct StoreState {
    events: BTreeMap<u64, Event>,
    last_seq: u64,
    failing_fetches: usize,
    failing_connects: usize,
    fetch_delay: Option<Duration>,
    fetch_requests: Vec<(u64, usize)>,
    stream_requests: Vec<u64>,
    hellos: Vec<u64>,
}

impl StoreState {
    fn after(&self, after_seq: u64, limit: usize) -> Vec<Event> {
        self.events
            .range(after_seq.saturating_add(1)..)
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn take_connect_failure(&mut self) -> bool {
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            true
        } else {
            false
        }
    }
}

struct Inner {
    state: Mutex<StoreState>,
    live_tx: broadcast::Sender<Live>,
}

/// Shared in-memory event log with pull, push and duplex access.
///
/// Cloning is cheap; clones share the same log.
#[derive(Clone)]
pub struct MemoryNotificationStore {
    inner: Arc<Inner>,
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryNotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNotificationStore")
            .field("sessions", &self.inner.live_tx.receiver_count())
            .finish()
    }
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                live_tx,
            }),
        }
    }

    /// Append a notification with the next seq and push it to open sessions.
    pub async fn create(&self, new_event: NewEvent) -> Event {
        let event = {
            let mut state = self.inner.state.lock().await;
            state.last_seq += 1;
            let event = Event::new(state.last_seq, new_event.event_type, new_event.payload);
            state.events.insert(event.seq, event.clone());
            event
        };

        debug!(seq = event.seq, "Memory store created event");
        let _ = self.inner.live_tx.send(Live::Event(event.clone()));
        event
    }

    /// Store an event with a caller-chosen seq and push it to open sessions.
    pub async fn insert(&self, event: Event) {
        self.store(std::iter::once(event.clone())).await;
        let _ = self.inner.live_tx.send(Live::Event(event));
    }

    /// Store events without pushing them (history that predates any session).
    pub async fn seed(&self, events: impl IntoIterator<Item = Event>) {
        self.store(events).await;
    }

    async fn store(&self, events: impl IntoIterator<Item = Event>) {
        let mut state = self.inner.state.lock().await;
        for event in events {
            state.last_seq = state.last_seq.max(event.seq);
            state.events.insert(event.seq, event);
        }
    }

    /// Push an event to open sessions without storing it (redelivery).
    pub fn publish(&self, event: Event) {
        let _ = self.inner.live_tx.send(Live::Event(event));
    }

    /// Push a raw frame to open sessions, bypassing encoding.
    ///
    /// Stream sessions receive it as-is; duplex sessions receive it as the
    /// whole text frame.
    pub fn publish_raw(&self, text: impl Into<String>) {
        let _ = self.inner.live_tx.send(Live::Raw(text.into()));
    }

    /// Drop every open session with a transport error.
    pub fn fail_streams(&self, message: impl Into<String>) {
        let _ = self.inner.live_tx.send(Live::Fail(message.into()));
    }

    /// Close every open session cleanly.
    pub fn close_streams(&self) {
        let _ = self.inner.live_tx.send(Live::Close);
    }

    /// Make the next `count` delta fetches fail.
    pub async fn fail_next_fetches(&self, count: usize) {
        self.inner.state.lock().await.failing_fetches = count;
    }

    /// Make the next `count` stream or duplex connects fail.
    pub async fn fail_next_connects(&self, count: usize) {
        self.inner.state.lock().await.failing_connects = count;
    }

    /// Delay every delta fetch response.
    pub async fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().await.fetch_delay = delay;
    }

    /// Events with `seq > after_seq`, ascending, at most `limit`.
    pub async fn events_after(&self, after_seq: u64, limit: usize) -> Vec<Event> {
        self.inner.state.lock().await.after(after_seq, limit)
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.events.is_empty()
    }

    /// Every delta fetch received, as `(after_seq, limit)`.
    pub async fn fetch_requests(&self) -> Vec<(u64, usize)> {
        self.inner.state.lock().await.fetch_requests.clone()
    }

    /// Every stream connect received, by `since_seq`.
    pub async fn stream_requests(&self) -> Vec<u64> {
        self.inner.state.lock().await.stream_requests.clone()
    }

    /// Every duplex hello received, by `last_seq`.
    pub async fn hellos(&self) -> Vec<u64> {
        self.inner.state.lock().await.hellos.clone()
    }

    /// Number of sessions currently subscribed to live events.
    pub fn session_count(&self) -> usize {
        self.inner.live_tx.receiver_count()
    }

    async fn fetch(&self, after_seq: u64, limit: usize) -> Result<Vec<Event>> {
        let (page, delay) = {
            let mut state = self.inner.state.lock().await;
            state.fetch_requests.push((after_seq, limit));

            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                return Err(DeliveryError::transport(ChannelKind::Pull, "injected fetch failure"));
            }

            (state.after(after_seq, limit), state.fetch_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        trace!(after_seq, limit, count = page.len(), "Memory store served delta");
        Ok(page)
    }

    async fn open_stream(&self, since_seq: u64) -> Result<FrameStream> {
        let (live_rx, backlog) = {
            let mut state = self.inner.state.lock().await;
            state.stream_requests.push(since_seq);

            if state.take_connect_failure() {
                return Err(DeliveryError::transport(ChannelKind::Push, "injected connect failure"));
            }

            // Subscribe under the lock so nothing slips between backlog and live
            (self.inner.live_tx.subscribe(), state.after(since_seq, BACKLOG_LIMIT))
        };

        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        tokio::spawn(serve_session(backlog, live_rx, tx, encode_stream_frame));

        Ok(receiver_stream(rx))
    }

    async fn open_duplex(&self) -> Result<(FrameSink, FrameStream)> {
        if self.inner.state.lock().await.take_connect_failure() {
            return Err(DeliveryError::transport(ChannelKind::Duplex, "injected connect failure"));
        }

        let (client_tx, mut client_rx) = futures::channel::mpsc::unbounded::<String>();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let store = self.clone();

        tokio::spawn(async move {
            let last_seq = loop {
                let text = tokio::select! {
                    _ = tx.closed() => return,
                    text = client_rx.next() => match text {
                        Some(text) => text,
                        None => return,
                    },
                };
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Hello { last_seq }) => break last_seq,
                    Err(e) => trace!(error = %e, "Memory store ignoring client frame"),
                }
            };

            let (live_rx, backlog) = {
                let mut state = store.inner.state.lock().await;
                state.hellos.push(last_seq);
                (store.inner.live_tx.subscribe(), state.after(last_seq, BACKLOG_LIMIT))
            };

            let greeting = serde_json::json!({ "type": "welcome", "last_seq": last_seq }).to_string();
            if tx.send(Ok(greeting)).await.is_err() {
                return;
            }

            serve_session(backlog, live_rx, tx, encode_duplex_frame).await;
        });

        let sink = client_tx.sink_map_err(|e| DeliveryError::transport(ChannelKind::Duplex, e.to_string()));
        Ok((Box::pin(sink), receiver_stream(rx)))
    }
}

fn encode_stream_frame(event: &Event) -> Result<String> {
    serde_json::to_string(event).map_err(|e| DeliveryError::Internal(format!("encode event: {}", e)))
}

fn encode_duplex_frame(event: &Event) -> Result<String> {
    serde_json::to_string(&serde_json::json!({ "type": "notification", "data": event }))
        .map_err(|e| DeliveryError::Internal(format!("encode frame: {}", e)))
}

/// Replay `backlog`, then forward live traffic until the session ends.
async fn serve_session(
    backlog: Vec<Event>,
    mut live_rx: broadcast::Receiver<Live>,
    tx: mpsc::Sender<Result<String>>,
    encode: fn(&Event) -> Result<String>,
) {
    for event in &backlog {
        if tx.send(encode(event)).await.is_err() {
            return;
        }
    }

    loop {
        let live = tokio::select! {
            _ = tx.closed() => return,
            live = live_rx.recv() => live,
        };

        let frame = match live {
            Ok(Live::Event(event)) => encode(&event),
            Ok(Live::Raw(text)) => Ok(text),
            Ok(Live::Fail(message)) => {
                let _ = tx.send(Err(DeliveryError::Internal(message))).await;
                return;
            }
            Ok(Live::Close) | Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!(skipped, "Memory store session lagged");
                continue;
            }
        };

        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

fn receiver_stream(rx: mpsc::Receiver<Result<String>>) -> FrameStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

impl EventFetcher for MemoryNotificationStore {
    fn fetch_after(&self, after_seq: u64, limit: usize) -> BoxFuture<'_, Vec<Event>> {
        Box::pin(self.fetch(after_seq, limit))
    }
}

impl StreamConnector for MemoryNotificationStore {
    fn connect(&self, since_seq: u64) -> BoxFuture<'_, FrameStream> {
        Box::pin(self.open_stream(since_seq))
    }
}

impl DuplexConnector for MemoryNotificationStore {
    fn connect(&self) -> BoxFuture<'_, (FrameSink, FrameStream)> {
        Box::pin(self.open_duplex())
    }
}
