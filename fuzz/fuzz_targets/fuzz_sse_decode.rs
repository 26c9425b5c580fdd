//! Fuzz target for the incremental event-stream decoder.
//!
//! Feeding the same bytes in one chunk or split at an arbitrary point must
//! never panic and must produce the same events.

#![no_main]

use delivery_engine::transport::http::{decode_sse_data, SseDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&[u8], usize)| {
    let (bytes, split) = data;

    // Should never panic
    let whole = SseDecoder::new().feed(bytes);

    let split = if bytes.is_empty() { 0 } else { split % bytes.len() };
    let mut decoder = SseDecoder::new();
    let mut chunked = decoder.feed(&bytes[..split]);
    chunked.extend(decoder.feed(&bytes[split..]));

    // Chunk boundaries must not change the result (lossy UTF-8 aside)
    if std::str::from_utf8(bytes).is_ok() {
        assert_eq!(whole, chunked);
    }

    for message in whole {
        let _ = decode_sse_data(&message.data);
    }
});
