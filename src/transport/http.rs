// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP transports for the notification store.
//!
//! - [`HttpNotificationApi`]: create (POST) and delta fetch (GET), used by the
//!   pull channel
//! - [`SseConnector`]: server-sent event stream, used by the push channel
//!
//! # Event Stream Format
//!
//! The store replays missed events and then tails live ones on one response:
//!
//! ```text
//! id: 42
//! event: notification
//! data: {"id":"…","seq":42,"type":"…","payload":{…},"created_at":"…"}
//!
//! : ping
//!
//! ```
//!
//! [`SseDecoder`] is incremental: chunks may split lines or UTF-8 sequences
//! anywhere.

use crate::channel::ChannelKind;
use crate::config::EndpointConfig;
use crate::error::Result;
use crate::event::{decode_event, Event, NewEvent};
use crate::metrics;
use crate::transport::{BoxFuture, EventFetcher, FrameStream, StreamConnector};
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// SSE event names carrying notification payloads.
const NOTIFICATION_EVENTS: [&str; 2] = ["notification", "message"];

/// Longest event-stream line kept; longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Raw delta-fetch page; items are decoded one by one so a single bad item
/// doesn't cost the whole page.
#[derive(Debug, Deserialize)]
struct RawPage {
    items: Vec<serde_json::Value>,
}

/// Client for the store's request/response endpoints.
#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    client: Client,
    notifications_url: String,
}

impl HttpNotificationApi {
    /// Build a client from endpoint configuration.
    pub fn new(endpoints: &EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(endpoints.request_timeout_duration())
            .build()?;

        Ok(Self {
            client,
            notifications_url: endpoints.notifications_url(),
        })
    }

    /// Submit a new notification; returns it with its assigned seq.
    ///
    /// The created event reaches subscribers through whichever channel is
    /// active, where it is reconciled like any other.
    pub async fn create(&self, event: &NewEvent) -> Result<Event> {
        let created: Event = self
            .client
            .post(&self.notifications_url)
            .json(event)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(seq = created.seq, event_type = %created.event_type, "Notification created");
        Ok(created)
    }

    async fn fetch_page(&self, after_seq: u64, limit: usize) -> Result<Vec<Event>> {
        let page: RawPage = self
            .client
            .get(&self.notifications_url)
            .query(&[("after_seq", after_seq.to_string()), ("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut events = Vec::with_capacity(page.items.len());
        for item in page.items {
            match serde_json::from_value::<Event>(item) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(after_seq, error = %e, "Failed to decode polled event, skipping");
                    metrics::record_malformed_frame("pull");
                }
            }
        }

        trace!(after_seq, limit, count = events.len(), "Fetched delta page");
        Ok(events)
    }
}

impl EventFetcher for HttpNotificationApi {
    fn fetch_after(&self, after_seq: u64, limit: usize) -> BoxFuture<'_, Vec<Event>> {
        Box::pin(self.fetch_page(after_seq, limit))
    }
}

/// Opens the store's server-sent event stream.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: Client,
    stream_url: String,
}

impl SseConnector {
    /// Build a connector from endpoint configuration.
    ///
    /// No request timeout is applied: the response body never ends while
    /// the session is healthy.
    pub fn new(endpoints: &EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(endpoints.request_timeout_duration())
            .build()?;

        Ok(Self {
            client,
            stream_url: endpoints.stream_url(),
        })
    }

    async fn open(&self, since_seq: u64) -> Result<FrameStream> {
        let response = self
            .client
            .get(&self.stream_url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .query(&[("last_event_id", since_seq.to_string())])
            .send()
            .await?
            .error_for_status()?;

        debug!(since_seq, url = %self.stream_url, "Event stream opened");

        let frames = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let items: Vec<Result<String>> = match chunk {
                    Ok(bytes) => decoder
                        .feed(&bytes)
                        .into_iter()
                        .filter(|message| NOTIFICATION_EVENTS.contains(&message.event.as_str()))
                        .map(|message| Ok(message.data))
                        .collect(),
                    Err(e) => vec![Err(e.into())],
                };
                futures::future::ready(Some(futures::stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(frames))
    }
}

impl StreamConnector for SseConnector {
    fn connect(&self, since_seq: u64) -> BoxFuture<'_, FrameStream> {
        Box::pin(self.open(since_seq))
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub id: Option<String>,
    /// Event name; `"message"` when the server sent none.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Holds at most one partial line, capped at `max_line` bytes.
#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    /// Inside an oversized line; drop bytes up to the next newline.
    discarding: bool,
    max_line: usize,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
            id: None,
            event: None,
            data: Vec::new(),
        }
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let discarding = std::mem::replace(&mut self.discarding, false);

            if !discarding {
                if end - start > self.max_line {
                    self.drop_oversized_line(end - start);
                } else {
                    let decoded = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
                    let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
                    if let Some(message) = self.process_line(line) {
                        messages.push(message);
                    }
                }
            }

            start = end + 1;
            self.scanned = start;
        }

        self.pending.drain(..start);
        if self.discarding {
            self.pending.clear();
        } else if self.pending.len() > self.max_line {
            self.drop_oversized_line(self.pending.len());
            self.pending.clear();
            self.discarding = true;
        }
        self.scanned = self.pending.len();

        messages
    }

    fn drop_oversized_line(&mut self, len: usize) {
        warn!(bytes = len, limit = self.max_line, "Dropping oversized event-stream line");
        metrics::record_malformed_frame(ChannelKind::Push.as_str());
        // The event it belonged to can't be trusted either
        self.event = None;
        self.data.clear();
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // Comment (keep-alive)
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // retry and unknown fields
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseMessage {
            id: self.id.clone(),
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Decode a notification carried in an SSE `data:` field.
pub fn decode_sse_data(data: &str) -> Result<Event> {
    decode_event(data)
}
