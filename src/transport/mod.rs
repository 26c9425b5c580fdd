// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport primitives the delivery channels consume.
//!
//! The channels never talk to a wire library directly. Each one is handed a
//! primitive implementing one of these traits:
//!
//! | Trait | Used by | Shape |
//! |-------|---------|-------|
//! | [`EventFetcher`] | Pull channel | request/response: events after N, limit M |
//! | [`StreamConnector`] | Push channel | one inbound stream seeded with the last seq |
//! | [`DuplexConnector`] | Duplex channel | bi-directional text frames |
//!
//! Implementations:
//! - [`http`]: reqwest delta fetch + server-sent event stream
//! - [`ws`]: tokio-tungstenite duplex socket
//! - [`memory`]: in-process store implementing all three, with fault injection
//!
//! # Example
//!
//! ```rust,no_run
//! use delivery_engine::transport::{BoxFuture, EventFetcher};
//! use delivery_engine::Event;
//!
//! struct FixedFetcher(Vec<Event>);
//!
//! impl EventFetcher for FixedFetcher {
//!     fn fetch_after(&self, after_seq: u64, limit: usize) -> BoxFuture<'_, Vec<Event>> {
//!         let page = self.0.iter().filter(|e| e.seq > after_seq).take(limit).cloned().collect();
//!         Box::pin(async move { Ok(page) })
//!     }
//! }
//! ```

pub mod http;
pub mod memory;
pub mod ws;

use crate::error::{DeliveryError, Result};
use crate::event::Event;
use futures::{Sink, Stream};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async results (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Inbound raw text frames. An `Err` item or the end of the stream is terminal.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Outbound raw text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = DeliveryError> + Send + 'static>>;

/// Delta fetch: "events with seq greater than `after_seq`, at most `limit`".
pub trait EventFetcher: Send + Sync + 'static {
    /// Returns events in ascending seq order, `len() <= limit`.
    fn fetch_after(&self, after_seq: u64, limit: usize) -> BoxFuture<'_, Vec<Event>>;
}

/// Long-lived inbound event stream.
///
/// The server replays events after `since_seq` and then tails live ones.
/// Every frame is the JSON text of one event.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self, since_seq: u64) -> BoxFuture<'_, FrameStream>;
}

/// Bi-directional text connection.
///
/// The caller is responsible for the hello handshake; the connector only
/// establishes the socket.
pub trait DuplexConnector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, (FrameSink, FrameStream)>;
}
