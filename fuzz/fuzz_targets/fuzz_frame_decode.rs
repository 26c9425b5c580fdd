//! Fuzz target for duplex and event frame decoding.
//!
//! Arbitrary text must decode to an event, an ignored frame, or an error:
//! never a panic.

#![no_main]

use delivery_engine::event::{decode_event, decode_server_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    // Should never panic
    if let Ok(Some(event)) = decode_server_frame(text) {
        // A decoded notification re-encodes to an equivalent event
        let encoded = serde_json::to_string(&event).unwrap();
        let again = decode_event(&encoded).unwrap();
        assert_eq!(again.seq, event.seq);
        assert_eq!(again.id, event.id);
    }

    let _ = decode_event(text);
});
