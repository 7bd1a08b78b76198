// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing tables: the bidirectional maps the Event Router
//! (C4) uses to get a vendor event from a bare `req_id`/`order_id` to the
//! right subscription, client, or owning connection.
//!
//! Grounded on donor's `WsBridge.clients: Arc<RwLock<HashMap<...>>>`:
//! a single lock guarding every map, held only for the duration of one
//! lookup or mutation.

use std::collections::{HashMap, HashSet};

use crate::instrument::InstrumentKey;

#[derive(Debug, Default)]
pub struct RoutingTables {
    req_to_sub: HashMap<i64, u64>,
    sub_to_req: HashMap<u64, i64>,
    sub_to_client: HashMap<u64, u64>,
    client_to_subs: HashMap<u64, HashSet<u64>>,
    order_to_client: HashMap<i64, u64>,
    client_to_orders: HashMap<u64, HashSet<i64>>,
    instrument_to_subs: HashMap<InstrumentKey, HashSet<u64>>,
    sub_to_instrument: HashMap<u64, InstrumentKey>,
    transient_to_client: HashMap<i64, u64>,
}

impl RoutingTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh subscription under its vendor `req_id`.
    pub fn link_subscription(
        &mut self,
        sub_id: u64,
        client_id: u64,
        req_id: i64,
        instrument: InstrumentKey,
    ) {
        self.req_to_sub.insert(req_id, sub_id);
        self.sub_to_req.insert(sub_id, req_id);
        self.sub_to_client.insert(sub_id, client_id);
        self.client_to_subs.entry(client_id).or_default().insert(sub_id);
        self.instrument_to_subs.entry(instrument.clone()).or_default().insert(sub_id);
        self.sub_to_instrument.insert(sub_id, instrument);
    }

    /// Rebind a subscription to a new `req_id`, issued after a reconnect
    /// resubscribe replay. The old `req_id` mapping is torn
    /// down first so a late event on it cannot resurrect a stale route.
    pub fn rebind_req(&mut self, sub_id: u64, new_req_id: i64) {
        if let Some(old_req_id) = self.sub_to_req.insert(sub_id, new_req_id) {
            self.req_to_sub.remove(&old_req_id);
        }
        self.req_to_sub.insert(new_req_id, sub_id);
    }

    /// Tear down every mapping for a subscription once it reaches a terminal
    /// state. Idempotent.
    pub fn forget_subscription(&mut self, sub_id: u64) {
        if let Some(req_id) = self.sub_to_req.remove(&sub_id) {
            self.req_to_sub.remove(&req_id);
        }
        if let Some(client_id) = self.sub_to_client.remove(&sub_id) {
            if let Some(subs) = self.client_to_subs.get_mut(&client_id) {
                subs.remove(&sub_id);
            }
        }
        if let Some(key) = self.sub_to_instrument.remove(&sub_id) {
            if let Some(subs) = self.instrument_to_subs.get_mut(&key) {
                subs.remove(&sub_id);
                if subs.is_empty() {
                    self.instrument_to_subs.remove(&key);
                }
            }
        }
    }

    pub fn link_order(&mut self, order_id: i64, client_id: u64) {
        self.order_to_client.insert(order_id, client_id);
        self.client_to_orders.entry(client_id).or_default().insert(order_id);
    }

    /// Tear down an order's routing entry once it reaches a terminal state
    /// and has been garbage-collected. Idempotent.
    pub fn forget_order(&mut self, order_id: i64) {
        if let Some(client_id) = self.order_to_client.remove(&order_id) {
            if let Some(orders) = self.client_to_orders.get_mut(&client_id) {
                orders.remove(&order_id);
            }
        }
    }

    /// Register a one-shot `get_contract_details` lookup.
    pub fn link_transient(&mut self, req_id: i64, client_id: u64) {
        self.transient_to_client.insert(req_id, client_id);
    }

    pub fn client_for_transient(&self, req_id: i64) -> Option<u64> {
        self.transient_to_client.get(&req_id).copied()
    }

    /// Drop a transient lookup entry once `ContractDetailsEnd` arrives.
    pub fn forget_transient(&mut self, req_id: i64) {
        self.transient_to_client.remove(&req_id);
    }

    pub fn sub_for_req(&self, req_id: i64) -> Option<u64> {
        self.req_to_sub.get(&req_id).copied()
    }

    pub fn client_for_sub(&self, sub_id: u64) -> Option<u64> {
        self.sub_to_client.get(&sub_id).copied()
    }

    pub fn client_for_order(&self, order_id: i64) -> Option<u64> {
        self.order_to_client.get(&order_id).copied()
    }

    pub fn subs_for_client(&self, client_id: u64) -> Vec<u64> {
        self.client_to_subs.get(&client_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn orders_for_client(&self, client_id: u64) -> Vec<i64> {
        self.client_to_orders.get(&client_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn subs_for_instrument(&self, key: &InstrumentKey) -> Vec<u64> {
        self.instrument_to_subs.get(key).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Remove every route owned by a client, returning the orphaned
    /// subscription and order ids so the caller can issue vendor cancels.
    pub fn remove_client(&mut self, client_id: u64) -> (Vec<u64>, Vec<i64>) {
        let subs = self.subs_for_client(client_id);
        for sub_id in &subs {
            self.forget_subscription(*sub_id);
        }
        let orders = self.client_to_orders.remove(&client_id).map(|s| s.into_iter().collect()).unwrap_or_default();
        self.client_to_subs.remove(&client_id);
        (subs, orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentKind;

    fn key(symbol: &str) -> InstrumentKey {
        InstrumentKey {
            kind: InstrumentKind::Stock,
            symbol: symbol.to_owned(),
            exchange: "SMART".to_owned(),
            contract_month: None,
        }
    }

    #[test]
    fn req_id_round_trips_to_sub_id() {
        let mut t = RoutingTables::new();
        t.link_subscription(1, 7, 100, key("AAPL"));
        assert_eq!(t.sub_for_req(100), Some(1));
        assert_eq!(t.client_for_sub(1), Some(7));
    }

    #[test]
    fn rebind_req_removes_stale_mapping() {
        let mut t = RoutingTables::new();
        t.link_subscription(1, 7, 100, key("AAPL"));
        t.rebind_req(1, 200);
        assert_eq!(t.sub_for_req(100), None);
        assert_eq!(t.sub_for_req(200), Some(1));
    }

    #[test]
    fn forget_subscription_clears_all_maps() {
        let mut t = RoutingTables::new();
        t.link_subscription(1, 7, 100, key("AAPL"));
        t.forget_subscription(1);
        assert_eq!(t.sub_for_req(100), None);
        assert_eq!(t.client_for_sub(1), None);
        assert!(t.subs_for_instrument(&key("AAPL")).is_empty());
    }

    #[test]
    fn remove_client_cascades_and_returns_orphans() {
        let mut t = RoutingTables::new();
        t.link_subscription(1, 7, 100, key("AAPL"));
        t.link_order(50, 7);
        let (subs, orders) = t.remove_client(7);
        assert_eq!(subs, vec![1]);
        assert_eq!(orders, vec![50]);
        assert_eq!(t.client_for_sub(1), None);
        assert_eq!(t.client_for_order(50), None);
    }

    #[test]
    fn instrument_aggregation_tracks_multiple_subscribers() {
        let mut t = RoutingTables::new();
        t.link_subscription(1, 7, 100, key("AAPL"));
        t.link_subscription(2, 8, 101, key("AAPL"));
        let mut subs = t.subs_for_instrument(&key("AAPL"));
        subs.sort();
        assert_eq!(subs, vec![1, 2]);
    }
}
