// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pull channel: periodic delta fetch.
//!
//! # Tick Loop
//!
//! ```text
//! loop {
//!     wait for tick (or shutdown)
//!     snapshot = cursor.borrow()          ← current cursor, not the one at open
//!     page = fetch_after(snapshot.seq, batch) (or shutdown)
//!     if closed or cursor epoch moved: discard page
//!     forward every event, in order
//! }
//! ```
//!
//! A failed fetch is reported as a warning and the loop carries on: the next
//! tick retries at the same fixed interval. There is no backoff escalation.

use crate::channel::{ChannelContext, ChannelHandle, ChannelKind, DeliveryChannel};
use crate::config::PullConfig;
use crate::error::Result;
use crate::metrics;
use crate::transport::EventFetcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Periodic delta-fetch channel.
pub struct PullChannel<F: EventFetcher> {
    fetcher: Arc<F>,
    interval: Duration,
    batch_size: usize,
}

impl<F: EventFetcher> PullChannel<F> {
    /// Build from configuration (interval and batch size are clamped).
    pub fn new(fetcher: Arc<F>, config: &PullConfig) -> Self {
        Self {
            fetcher,
            interval: config.interval_duration(),
            batch_size: config.effective_batch_size(),
        }
    }

    /// Override the tick interval without clamping (tests run sub-second ticks).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<F: EventFetcher> DeliveryChannel for PullChannel<F> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Pull
    }

    fn open(&self, since_seq: u64, ctx: ChannelContext) -> Result<ChannelHandle> {
        let fetcher = Arc::clone(&self.fetcher);
        let interval = self.interval;
        let batch_size = self.batch_size;
        let ChannelContext { cursor, sink } = ctx;
        let task_sink = sink.clone();

        info!(since_seq, interval = ?interval, batch_size, "Opening pull channel");

        Ok(ChannelHandle::spawn(&sink, move |mut shutdown| async move {
            let sink = task_sink;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = *cursor.borrow();
                let started = Instant::now();

                let result = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = fetcher.fetch_after(snapshot.seq, batch_size) => result,
                };

                if sink.is_closed() || *shutdown.borrow() {
                    debug!(after_seq = snapshot.seq, "Discarding pull response after close");
                    break;
                }

                match result {
                    Ok(events) => {
                        metrics::record_pull_request(started.elapsed(), events.len());

                        if cursor.borrow().epoch != snapshot.epoch {
                            debug!(
                                after_seq = snapshot.seq,
                                count = events.len(),
                                "Discarding pull response from before cursor reset"
                            );
                            continue;
                        }

                        trace!(after_seq = snapshot.seq, count = events.len(), "Pull tick");
                        for event in events {
                            metrics::record_event_received(ChannelKind::Pull.as_str());
                            if !sink.event_at(event, snapshot.epoch) {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(after_seq = snapshot.seq, error = %e, "Pull tick failed, retrying next tick");
                        metrics::record_transport_error(ChannelKind::Pull.as_str());
                        sink.warning(e.to_string());
                    }
                }
            }

            debug!("Pull channel stopped");
        }))
    }
}
