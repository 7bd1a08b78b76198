// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription domain model and manager, grounded on
//! donor's single-writer-owns-a-map style (`WsBridge.clients`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::instrument::{Instrument, InstrumentKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Level1,
    Trades,
    Quotes,
}

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubState {
    Pending,
    Active,
    Failed,
    Cancelling,
    Cancelled,
}

impl SubState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubState::Failed | SubState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub sub_id: u64,
    pub client_id: u64,
    pub instrument: Instrument,
    pub stream_kind: StreamKind,
    pub req_id: i64,
    pub state: SubState,
    pub created_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Owns the subscription table and enforces the at-most-one-non-terminal
/// subscription-per-`(client, instrument, stream_kind)` invariant.
pub struct SubscriptionManager {
    by_sub_id: HashMap<u64, Subscription>,
    active_keys: HashMap<(u64, InstrumentKey, StreamKind), u64>,
    next_sub_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self { by_sub_id: HashMap::new(), active_keys: HashMap::new(), next_sub_id: AtomicU64::new(1) }
    }

    /// Allocate a fresh, process-lifetime-unique subscription handle. Unlike
    /// `req_id`, `sub_id` never changes across a resubscribe.
    pub fn next_sub_id(&self) -> u64 {
        self.next_sub_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Preflight duplicate check, so a caller can avoid burning a `req_id`
    /// on a subscribe attempt that `subscribe` would reject anyway.
    pub fn has_active(&self, client_id: u64, key: &InstrumentKey, stream_kind: StreamKind) -> bool {
        self.active_keys.contains_key(&(client_id, key.clone(), stream_kind))
    }

    /// Register a new subscription in `Pending`. Rejects a duplicate if the
    /// client already has a non-terminal subscription on the same identity
    /// key and stream kind.
    pub fn subscribe(
        &mut self,
        sub_id: u64,
        client_id: u64,
        instrument: Instrument,
        stream_kind: StreamKind,
        req_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CommandError> {
        let key = (client_id, instrument.identity_key(), stream_kind);
        if self.active_keys.contains_key(&key) {
            return Err(CommandError::DuplicateSubscription);
        }
        self.active_keys.insert(key, sub_id);
        self.by_sub_id.insert(
            sub_id,
            Subscription {
                sub_id,
                client_id,
                instrument,
                stream_kind,
                req_id,
                state: SubState::Pending,
                created_at: now,
                last_event_at: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, sub_id: u64) -> Option<&Subscription> {
        self.by_sub_id.get(&sub_id)
    }

    pub fn get_by_req_id(&self, req_id: i64) -> Option<&Subscription> {
        self.by_sub_id.values().find(|s| s.req_id == req_id)
    }

    /// All non-terminal subscriptions for a client matching a bare symbol,
    /// across stream kinds.
    pub fn active_for_client_symbol(&self, client_id: u64, symbol: &str) -> Vec<u64> {
        let symbol = symbol.trim().to_uppercase();
        self.by_sub_id
            .values()
            .filter(|s| s.client_id == client_id && !s.state.is_terminal() && s.instrument.symbol == symbol)
            .map(|s| s.sub_id)
            .collect()
    }

    /// Finalize a `Cancelling` subscription to `Cancelled`. No-op if the
    /// subscription already moved on (idempotent against racing callers).
    pub fn finalize_cancel(&mut self, sub_id: u64, now: DateTime<Utc>) {
        if let Some(sub) = self.by_sub_id.get(&sub_id) {
            if sub.state == SubState::Cancelling {
                self.set_state(sub_id, SubState::Cancelled, now);
            }
        }
    }

    pub fn set_state(&mut self, sub_id: u64, state: SubState, now: DateTime<Utc>) {
        if let Some(sub) = self.by_sub_id.get_mut(&sub_id) {
            sub.state = state;
            if state.is_terminal() {
                let key = (sub.client_id, sub.instrument.identity_key(), sub.stream_kind);
                self.active_keys.remove(&key);
            }
        }
    }

    pub fn record_event(&mut self, sub_id: u64, now: DateTime<Utc>) {
        if let Some(sub) = self.by_sub_id.get_mut(&sub_id) {
            sub.last_event_at = Some(now);
            if sub.state == SubState::Pending {
                sub.state = SubState::Active;
            }
        }
    }

    /// Begin a client-initiated unsubscribe: the subscription moves to
    /// `Cancelling` pending the vendor's acknowledgement (or the unsubscribe
    /// timeout forcing `Cancelled`).
    pub fn begin_unsubscribe(&mut self, sub_id: u64, client_id: u64) -> Result<i64, CommandError> {
        let sub = self.by_sub_id.get_mut(&sub_id).ok_or(CommandError::OrderNotFound)?;
        if sub.client_id != client_id {
            return Err(CommandError::OrderNotOwned);
        }
        if sub.state.is_terminal() || sub.state == SubState::Cancelling {
            return Err(CommandError::OrderTerminal);
        }
        sub.state = SubState::Cancelling;
        Ok(sub.req_id)
    }

    /// All non-terminal subscriptions for a client, used both for the
    /// client-disconnect cascade and for the reconnect-resubscribe replay.
    pub fn active_for_client(&self, client_id: u64) -> Vec<&Subscription> {
        self.by_sub_id
            .values()
            .filter(|s| s.client_id == client_id && !s.state.is_terminal())
            .collect()
    }

    /// All non-terminal subscriptions, in `sub_id` order, for replay after a
    /// vendor `ConnectionReady` (resubscribe-on-reconnect).
    pub fn all_active(&self) -> Vec<&Subscription> {
        let mut v: Vec<&Subscription> =
            self.by_sub_id.values().filter(|s| !s.state.is_terminal()).collect();
        v.sort_by_key(|s| s.sub_id);
        v
    }

    /// Mark every non-terminal subscription `Pending` again ahead of a
    /// resubscribe replay, and assign it a fresh `req_id` (vendor `req_id`
    /// space is cleared on reconnect).
    pub fn reset_for_resubscribe(&mut self, sub_id: u64, new_req_id: i64) {
        if let Some(sub) = self.by_sub_id.get_mut(&sub_id) {
            sub.req_id = new_req_id;
            sub.state = SubState::Pending;
        }
    }

    /// Mark every currently-`Active` subscription `Pending` after an
    /// upstream disconnect. `Pending` subscriptions that were
    /// never acknowledged, and terminal ones, are left untouched.
    pub fn mark_active_as_pending(&mut self) -> Vec<u64> {
        let ids: Vec<u64> =
            self.by_sub_id.values().filter(|s| s.state == SubState::Active).map(|s| s.sub_id).collect();
        for id in &ids {
            if let Some(sub) = self.by_sub_id.get_mut(id) {
                sub.state = SubState::Pending;
            }
        }
        ids
    }

    /// Count of non-terminal subscriptions, for the diagnostics snapshot.
    pub fn active_count(&self) -> usize {
        self.by_sub_id.values().filter(|s| !s.state.is_terminal()).count()
    }

    /// Cascade a client disconnect: move every non-terminal subscription to
    /// `Cancelling` so C4 issues the matching vendor cancels.
    pub fn client_disconnected(&mut self, client_id: u64) -> Vec<u64> {
        let sub_ids: Vec<u64> = self
            .by_sub_id
            .values()
            .filter(|s| s.client_id == client_id && !s.state.is_terminal())
            .map(|s| s.sub_id)
            .collect();
        for id in &sub_ids {
            self.set_state(*id, SubState::Cancelling, Utc::now());
        }
        sub_ids
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
