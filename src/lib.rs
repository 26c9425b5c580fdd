//! # Delivery Engine
//!
//! Gap-free, exactly-once delivery of notification events over
//! interchangeable transports.
//!
//! ## Architecture
//!
//! The engine sits between a notification store and a consumer. Exactly one
//! delivery channel is open at a time; whatever it produces is reconciled
//! against a durable cursor and a bounded event buffer before the consumer
//! sees it:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             delivery-engine                               │
//! │                                                                           │
//! │  ┌──────────────────┐  raw   ┌──────────────────────────┐  reconciled     │
//! │  │ DeliveryChannel  │──────► │ Reconciler (one task)    │───────────────► │ Consumer
//! │  │ Pull │ Push │ WS │ events │ buffer dedup → cursor.set│  ConsumerEvent  │
//! │  └──────────────────┘        └──────────────────────────┘                 │
//! │           ▲  since_seq                    │                               │
//! │           │                               ▼                               │
//! │           │                     ┌─────────────────────┐                   │
//! │           └──────────────────── │ CursorStore (SQLite)│                   │
//! │                                 └─────────────────────┘                   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! 1. **No duplicates**: the [`EventBuffer`] rejects any `seq` it already holds
//! 2. **No silent loss**: the cursor is persisted before an event is
//!    delivered, and every connect is seeded with it for catch-up
//! 3. **Monotonic progress**: the cursor never moves backwards, except on an
//!    explicit consumer reset
//!
//! ## Usage
//!
//! ```rust,no_run
//! use delivery_engine::{network_channel, ChannelKind, DeliveryConfig, ReconciliationEngine};
//!
//! #[tokio::main]
//! async fn main() -> delivery_engine::Result<()> {
//!     let config = DeliveryConfig::default();
//!     let (engine, mut events) = ReconciliationEngine::open(&config).await?;
//!
//!     engine.connect(network_channel(ChannelKind::Duplex, &config)?).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod channel;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub mod transport;

// Re-exports for convenience
pub use buffer::EventBuffer;
pub use channel::{
    network_channel, ChannelContext, ChannelHandle, ChannelKind, DeliveryChannel, DuplexChannel, PullChannel,
    PushChannel,
};
pub use config::{BufferConfig, CursorConfig, DeliveryConfig, EndpointConfig, PullConfig};
pub use cursor::{CursorBackend, CursorSnapshot, CursorStore, MemoryCursorBackend, SqliteCursorBackend};
pub use engine::{ConnectionState, ConsumerEvent, DisconnectReason, EngineStatus, ReconciliationEngine};
pub use error::{DeliveryError, Result};
pub use event::{Event, NewEvent};
pub use transport::memory::MemoryNotificationStore;
