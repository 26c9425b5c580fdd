//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

mod common;

use common::{event, TestConsumer};
use delivery_engine::transport::{BoxFuture, FrameStream, StreamConnector};
use delivery_engine::{CursorStore, EventBuffer, PushChannel};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Push connector that replays a fixed list of seqs and then ends the stream.
struct ReplayConnector {
    seqs: Vec<u64>,
}

impl StreamConnector for ReplayConnector {
    fn connect(&self, _since_seq: u64) -> BoxFuture<'_, FrameStream> {
        let frames: Vec<delivery_engine::Result<String>> = self
            .seqs
            .iter()
            .map(|seq| Ok(serde_json::to_string(&event(*seq)).unwrap()))
            .collect();
        Box::pin(async move { Ok(Box::pin(futures::stream::iter(frames)) as FrameStream) })
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Run `seqs` through a fresh engine; returns (cursor, buffered, delivered).
fn reconcile(seqs: Vec<u64>) -> (u64, Vec<u64>, Vec<u64>) {
    runtime().block_on(async move {
        let mut consumer = TestConsumer::in_memory().await;
        let channel = PushChannel::new(Arc::new(ReplayConnector { seqs }));
        consumer.engine.connect(Arc::new(channel)).await.unwrap();

        // End of stream is queued behind every event
        consumer.wait_disconnected().await;

        let result = (consumer.engine.cursor(), consumer.buffered().await, consumer.delivered());
        consumer.engine.shutdown().await;
        result
    })
}

// =============================================================================
// Event Buffer Properties
// =============================================================================

proptest! {
    /// Inserting an event twice leaves the buffer exactly as the first insert did
    #[test]
    fn buffer_dedup_idempotent(seqs in prop::collection::vec(1u64..500, 1..60), dup_index in any::<prop::sample::Index>()) {
        let mut buffer = EventBuffer::new(100);
        for seq in &seqs {
            buffer.insert(event(*seq));
        }
        let before = buffer.to_ordered_list();

        let dup = seqs[dup_index.index(seqs.len())];
        if buffer.contains(dup) {
            prop_assert!(!buffer.insert(event(dup)));
            prop_assert_eq!(buffer.to_ordered_list(), before);
        }
    }

    /// Buffer keeps exactly the `cap` highest distinct seqs, sorted descending
    #[test]
    fn buffer_bounded_retention(seqs in prop::collection::vec(1u64..10_000, 0..300), cap in 1usize..150) {
        let mut buffer = EventBuffer::new(cap);
        for seq in &seqs {
            buffer.insert(event(*seq));
        }

        let distinct: BTreeSet<u64> = seqs.iter().copied().collect();
        let expected: Vec<u64> = distinct.iter().rev().take(cap).copied().collect();

        prop_assert_eq!(buffer.seqs(), expected);
        prop_assert!(buffer.len() <= cap);
    }

    /// Ordered list is always strictly descending
    #[test]
    fn buffer_always_sorted(seqs in prop::collection::vec(any::<u64>(), 0..200)) {
        let mut buffer = EventBuffer::new(64);
        for seq in seqs {
            buffer.insert(event(seq));
        }
        let listed = buffer.seqs();
        prop_assert!(listed.windows(2).all(|pair| pair[0] > pair[1]));
    }
}

// =============================================================================
// Cursor Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cursor never decreases and always equals the max value ever set
    #[test]
    fn cursor_monotonic(values in prop::collection::vec(0u64..1_000_000, 0..50)) {
        runtime().block_on(async {
            let mut cursor = CursorStore::in_memory().await.unwrap();
            let mut max_seen = 0u64;

            for value in values {
                let before = cursor.get();
                let advanced = cursor.set(value).await.unwrap();
                max_seen = max_seen.max(value);

                assert!(cursor.get() >= before);
                assert_eq!(cursor.get(), max_seen);
                assert_eq!(advanced, value > before);
            }
        });
    }
}

// =============================================================================
// Reconciliation Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any arrival order (with duplicates) converges to the same cursor and
    /// buffer, and each distinct seq is delivered exactly once
    #[test]
    fn reconcile_order_independent(
        seqs in prop::collection::vec(1u64..200, 1..40),
        shuffle_seed in any::<u64>(),
    ) {
        let mut arrival = seqs.clone();
        // Duplicate a prefix to simulate resends
        arrival.extend(seqs.iter().take(seqs.len() / 2).copied());
        // Deterministic shuffle driven by the seed
        let mut state = shuffle_seed | 1;
        for i in (1..arrival.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            arrival.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let mut in_order: Vec<u64> = seqs.clone();
        in_order.sort_unstable();

        let (cursor_a, buffered_a, delivered_a) = reconcile(arrival);
        let (cursor_b, buffered_b, _) = reconcile(in_order);

        let distinct: BTreeSet<u64> = seqs.iter().copied().collect();
        let max = *distinct.iter().next_back().unwrap();

        prop_assert_eq!(cursor_a, max);
        prop_assert_eq!(cursor_a, cursor_b);
        prop_assert_eq!(&buffered_a, &buffered_b);
        prop_assert_eq!(buffered_a, distinct.iter().rev().copied().collect::<Vec<_>>());

        let mut delivered_sorted = delivered_a;
        delivered_sorted.sort_unstable();
        prop_assert_eq!(delivered_sorted, distinct.into_iter().collect::<Vec<_>>());
    }

    /// Two overlapping pages (resent tail) never duplicate
    #[test]
    fn reconcile_overlapping_pages(split in 1u64..30, overlap in 0u64..5, len in 2u64..40) {
        let split = split.min(len - 1);
        let first: Vec<u64> = (1..=split).collect();
        let second: Vec<u64> = (split.saturating_sub(overlap).max(1)..=len).collect();
        let mut arrival = first;
        arrival.extend(second);

        let (cursor, buffered, delivered) = reconcile(arrival);
        prop_assert_eq!(cursor, len);
        prop_assert_eq!(buffered, (1..=len).rev().collect::<Vec<_>>());
        prop_assert_eq!(delivered, (1..=len).collect::<Vec<_>>());
    }
}
