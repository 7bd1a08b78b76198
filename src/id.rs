// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic id allocation (C1): one counter for `req_id`, one for `order_id`.
//!
//! Neither counter recycles. `req_id` starts at 1. `order_id` is floored by
//! the upstream's `next_order_id` at every handshake and only ever advances.

use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out `req_id`s and `order_id`s under concurrent access, lock-free.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_req_id: AtomicI64,
    next_order_id: AtomicI64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next_req_id: AtomicI64::new(1), next_order_id: AtomicI64::new(1) }
    }

    /// Allocate the next `req_id`. Used for subscriptions and contract-details lookups.
    pub fn next_req_id(&self) -> i64 {
        self.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Raise the `order_id` floor to at least `upstream_next`, called once per handshake.
    ///
    /// Never lowers the floor: a reconnect to an upstream with a stale `next_order_id`
    /// must not reissue ids already handed out locally.
    pub fn advance_order_id_floor(&self, upstream_next: i64) {
        self.next_order_id.fetch_max(upstream_next, Ordering::Relaxed);
    }

    /// Allocate the next `order_id`.
    pub fn next_order_id(&self) -> i64 {
        self.next_order_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current `order_id` floor, for tests/diagnostics.
    pub fn order_id_floor(&self) -> i64 {
        self.next_order_id.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_ids_are_monotonic_and_start_at_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_req_id(), 1);
        assert_eq!(ids.next_req_id(), 2);
        assert_eq!(ids.next_req_id(), 3);
    }

    #[test]
    fn order_id_floor_never_goes_backwards() {
        let ids = IdAllocator::new();
        ids.advance_order_id_floor(1001);
        assert_eq!(ids.next_order_id(), 1001);
        assert_eq!(ids.next_order_id(), 1002);

        // A reconnect reporting a lower next_order_id must not rewind allocation.
        ids.advance_order_id_floor(500);
        assert_eq!(ids.next_order_id(), 1003);

        // A reconnect reporting a higher next_order_id raises the floor.
        ids.advance_order_id_floor(5000);
        assert_eq!(ids.next_order_id(), 5000);
    }

    #[test]
    fn concurrent_allocation_never_repeats() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let ids = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = Arc::clone(&ids);
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| ids.next_req_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap_or_default() {
                assert!(seen.insert(id), "req_id {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
