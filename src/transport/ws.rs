// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! WebSocket transport for the duplex channel.
//!
//! Only text frames carry notifications. Binary, ping and pong frames are
//! skipped; a close frame ends the inbound stream.

use crate::channel::ChannelKind;
use crate::config::EndpointConfig;
use crate::error::{DeliveryError, Result};
use crate::transport::{BoxFuture, DuplexConnector, FrameSink, FrameStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Opens duplex sockets to the notification store.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoints: &EndpointConfig) -> Self {
        Self {
            url: endpoints.ws_url.clone(),
            connect_timeout: endpoints.request_timeout_duration(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                DeliveryError::transport(
                    ChannelKind::Duplex,
                    format!("WebSocket connect timed out after {:?}", self.connect_timeout),
                )
            })??;

        debug!(url = %self.url, "WebSocket connected");

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(DeliveryError::from)
            .with(|text: String| futures::future::ready(Ok::<_, DeliveryError>(Message::Text(text))));

        let stream = stream
            .take_while(|message| futures::future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                futures::future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(other) => {
                        trace!(kind = ?other, "Skipping non-text frame");
                        None
                    }
                    Err(e) => Some(Err(DeliveryError::from(e))),
                })
            });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

impl DuplexConnector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, (FrameSink, FrameStream)> {
        Box::pin(self.open())
    }
}
