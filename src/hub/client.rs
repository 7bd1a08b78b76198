// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client outbound queues and the client registry, grounded on
//! donor's `transport/ws_mux.rs` per-client fan-out, with
//! the bounded drop-oldest-non-critical policy in place of donor's simple bounded channel.
//!
//! See `core.rs`'s module doc for why `.lock().expect(...)` is this crate's
//! deliberate fail-fast response to lock poisoning, not an oversight.

#![allow(clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::protocol::OutboundMessage;

/// Outcome of enqueueing a message onto a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// The message itself was non-critical and there was no room to make
    /// for it; it was silently dropped.
    Dropped,
    /// A critical message could not be accommodated even after evicting
    /// every droppable entry; the caller must disconnect the client.
    SlowConsumer,
}

struct QueueState {
    items: VecDeque<OutboundMessage>,
    closed: bool,
}

/// A bounded per-client outbound queue implementing the
/// drop-oldest-non-critical backpressure policy.
pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity), closed: false }),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, message: OutboundMessage) -> PushOutcome {
        let mut state = self.state.lock().expect("outbound queue lock poisoned");
        if state.items.len() >= self.capacity {
            if let Some(pos) = state.items.iter().position(|m| !m.is_critical()) {
                state.items.remove(pos);
            } else if !message.is_critical() {
                return PushOutcome::Dropped;
            } else {
                return PushOutcome::SlowConsumer;
            }
        }
        state.items.push_back(message);
        drop(state);
        self.notify.notify_one();
        PushOutcome::Enqueued
    }

    /// Await and pop the next message, or `None` once closed and drained.
    pub async fn pop(&self) -> Option<OutboundMessage> {
        loop {
            {
                let mut state = self.state.lock().expect("outbound queue lock poisoned");
                if let Some(msg) = state.items.pop_front() {
                    return Some(msg);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().expect("outbound queue lock poisoned").closed = true;
        self.notify.notify_one();
    }
}

/// Why a session's cancellation token was tripped, so the writer task knows
/// what WebSocket close frame to send.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// A critical message could not be enqueued even after evicting every
    /// droppable entry (close code 1011, reason `slow_consumer`).
    SlowConsumer,
}

/// Registered state for one live WebSocket client.
pub struct ClientSession {
    pub client_id: u64,
    pub queue: Arc<OutboundQueue>,
    pub cancel: CancellationToken,
    pub connected_at: DateTime<Utc>,
    pub last_pong_at: Mutex<DateTime<Utc>>,
    /// Liveness pings sent since the last pong ("three missed
    /// pongs -> close"). Reset to zero on every pong.
    pub missed_pongs: AtomicU32,
    close_reason: Mutex<Option<CloseReason>>,
}

impl ClientSession {
    /// Enqueue a message, disconnecting the client if backpressure cannot
    /// be resolved.
    pub fn send(&self, message: OutboundMessage) -> PushOutcome {
        let outcome = self.queue.push(message);
        if outcome == PushOutcome::SlowConsumer {
            *self.close_reason.lock().expect("close reason lock poisoned") = Some(CloseReason::SlowConsumer);
            self.cancel.cancel();
        }
        outcome
    }

    /// The reason this session was force-closed, if any. `None` means a
    /// normal client-initiated or shutdown close.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().expect("close reason lock poisoned").clone()
    }

    pub fn touch_pong(&self) {
        *self.last_pong_at.lock().expect("pong timestamp lock poisoned") = Utc::now();
        self.missed_pongs.store(0, Ordering::Relaxed);
    }

    /// Record that a liveness ping went unanswered; returns the new missed
    /// count so the caller can compare it against the configured limit.
    pub fn record_missed_pong(&self) -> u32 {
        self.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The live set of connected clients, addressable by `client_id`.
pub struct ClientRegistry {
    next_client_id: AtomicU64,
    sessions: RwLock<HashMap<u64, Arc<ClientSession>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { next_client_id: AtomicU64::new(1), sessions: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, queue_capacity: usize) -> Arc<ClientSession> {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ClientSession {
            client_id,
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
            cancel: CancellationToken::new(),
            connected_at: Utc::now(),
            last_pong_at: Mutex::new(Utc::now()),
            missed_pongs: AtomicU32::new(0),
            close_reason: Mutex::new(None),
        });
        self.sessions.write().expect("client registry lock poisoned").insert(client_id, Arc::clone(&session));
        session
    }

    pub fn unregister(&self, client_id: u64) {
        if let Some(session) = self.sessions.write().expect("client registry lock poisoned").remove(&client_id) {
            session.queue.close();
        }
    }

    pub fn get(&self, client_id: u64) -> Option<Arc<ClientSession>> {
        self.sessions.read().expect("client registry lock poisoned").get(&client_id).cloned()
    }

    /// Enqueue to one client, or silently no-op if the client is gone (it
    /// may have disconnected between the routing lookup and this call).
    pub fn send_to(&self, client_id: u64, message: OutboundMessage) {
        if let Some(session) = self.get(client_id) {
            session.send(message);
        }
    }

    /// Enqueue the same message to every currently-connected client
    /// (`connection_status` broadcast).
    pub fn broadcast(&self, message: OutboundMessage) {
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.read().expect("client registry lock poisoned").values().cloned().collect();
        for session in sessions {
            session.send(message.clone());
        }
    }

    pub fn client_ids(&self) -> Vec<u64> {
        self.sessions.read().expect("client registry lock poisoned").keys().copied().collect()
    }

    /// Force every currently-connected client's reader/writer tasks to
    /// unwind (shutdown: close WS clients after the grace
    /// period). Each client's own `client_disconnected` cascade runs as its
    /// task notices the cancellation.
    pub fn disconnect_all(&self) {
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.read().expect("client registry lock poisoned").values().cloned().collect();
        for session in sessions {
            session.cancel.cancel();
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
