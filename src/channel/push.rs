// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push channel: one long-lived inbound stream.
//!
//! The stream is seeded with `since_seq`; the server replays what was missed
//! and then tails live events on the same connection. Any stream error or end
//! of stream terminates the session. There is no retry loop here: the
//! consumer decides whether and when to reconnect.

use crate::channel::{ChannelContext, ChannelHandle, ChannelKind, DeliveryChannel};
use crate::error::Result;
use crate::event::decode_event;
use crate::metrics;
use crate::transport::StreamConnector;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Server-push channel.
pub struct PushChannel<C: StreamConnector> {
    connector: Arc<C>,
}

impl<C: StreamConnector> PushChannel<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }
}

impl<C: StreamConnector> DeliveryChannel for PushChannel<C> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    fn open(&self, since_seq: u64, ctx: ChannelContext) -> Result<ChannelHandle> {
        let connector = Arc::clone(&self.connector);
        let sink = ctx.sink;
        let task_sink = sink.clone();

        info!(since_seq, "Opening push channel");

        Ok(ChannelHandle::spawn(&sink, move |mut shutdown| async move {
            let sink = task_sink;
            let kind = ChannelKind::Push.as_str();

            let connected = tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                connected = connector.connect(since_seq) => connected,
            };

            let mut frames = match connected {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(since_seq, error = %e, "Push stream failed to open");
                    metrics::record_transport_error(kind);
                    sink.terminated(Some(e.to_string()));
                    return;
                }
            };

            debug!(since_seq, "Push stream established");
            sink.ready();

            loop {
                let frame = tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    frame = frames.next() => frame,
                };

                match frame {
                    Some(Ok(text)) => {
                        trace!(len = text.len(), "Push frame");
                        match decode_event(&text) {
                            Ok(event) => {
                                metrics::record_event_received(kind);
                                if !sink.event(event) {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Dropping malformed push frame");
                                metrics::record_malformed_frame(kind);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Push stream failed");
                        metrics::record_transport_error(kind);
                        sink.terminated(Some(e.to_string()));
                        return;
                    }
                    None => {
                        info!("Push stream closed by server");
                        sink.terminated(None);
                        return;
                    }
                }
            }
        }))
    }
}
