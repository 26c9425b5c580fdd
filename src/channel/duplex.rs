// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Duplex channel: bi-directional socket with a hello handshake.
//!
//! Right after the socket opens the client sends `{"type":"hello","last_seq":N}`.
//! The server answers with catch-up followed by live frames. Only
//! `notification` frames reach the engine; every other frame type is skipped.
//! A close from either side ends the session for good.

use crate::channel::{ChannelContext, ChannelHandle, ChannelKind, DeliveryChannel};
use crate::error::Result;
use crate::event::{decode_server_frame, ClientFrame};
use crate::metrics;
use crate::transport::DuplexConnector;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Duplex socket channel.
pub struct DuplexChannel<C: DuplexConnector> {
    connector: Arc<C>,
}

impl<C: DuplexConnector> DuplexChannel<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }
}

impl<C: DuplexConnector> DeliveryChannel for DuplexChannel<C> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Duplex
    }

    fn open(&self, since_seq: u64, ctx: ChannelContext) -> Result<ChannelHandle> {
        let connector = Arc::clone(&self.connector);
        let hello = ClientFrame::Hello { last_seq: since_seq }.to_text()?;
        let sink = ctx.sink;
        let task_sink = sink.clone();

        info!(since_seq, "Opening duplex channel");

        Ok(ChannelHandle::spawn(&sink, move |mut shutdown| async move {
            let sink = task_sink;
            let kind = ChannelKind::Duplex.as_str();

            let connected = tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                connected = connector.connect() => connected,
            };

            let (mut outbound, mut frames) = match connected {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(since_seq, error = %e, "Duplex socket failed to open");
                    metrics::record_transport_error(kind);
                    sink.terminated(Some(e.to_string()));
                    return;
                }
            };

            if let Err(e) = outbound.send(hello).await {
                warn!(since_seq, error = %e, "Failed to send hello");
                metrics::record_transport_error(kind);
                sink.terminated(Some(e.to_string()));
                return;
            }

            debug!(since_seq, "Duplex handshake sent");
            sink.ready();

            loop {
                let frame = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    frame = frames.next() => frame,
                };

                match frame {
                    Some(Ok(text)) => match decode_server_frame(&text) {
                        Ok(Some(event)) => {
                            metrics::record_event_received(kind);
                            if !sink.event(event) {
                                break;
                            }
                        }
                        Ok(None) => trace!("Ignoring non-notification frame"),
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed duplex frame");
                            metrics::record_malformed_frame(kind);
                        }
                    },
                    Some(Err(e)) => {
                        warn!(error = %e, "Duplex socket failed");
                        metrics::record_transport_error(kind);
                        sink.terminated(Some(e.to_string()));
                        return;
                    }
                    None => {
                        info!("Duplex socket closed by server");
                        sink.terminated(None);
                        return;
                    }
                }
            }

            // Best effort; the task may be aborted before this completes
            let _ = outbound.close().await;
        }))
    }
}
