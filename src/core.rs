// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The composition root shared by the Client Hub (C5) command path and the
//! Event Router (C4) event path: owns C1/C2/C6/C7 and a handle to C3/C5.
//!
//! Spec.md models C6 and C7 as single-writer components reached only via
//! message-passing. Here they are synchronized state behind short-held
//! `std::sync::Mutex` guards instead of actor mailboxes — equivalent
//! single-writer semantics, cheaper to wire up, justified by spec.md §5's
//! own observation that routing-table mutations are "short, uncontended in
//! practice"; the same holds for subscription/order bookkeeping.
//!
//! Lock poisoning means some other task already panicked while holding the
//! same mutex — an invariant violation, not a
//! recoverable condition, so `.expect()` on `lock()` is the deliberate
//! fail-fast path rather than an oversight against the crate's
//! `expect_used` lint.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CommandError;
use crate::hub::client::ClientRegistry;
use crate::hub::protocol::PlaceOrderFields;
use crate::id::IdAllocator;
use crate::instrument::{Instrument, RawInstrument};
use crate::order::{NewOrder, OrderManager};
use crate::routing::RoutingTables;
use crate::subscription::{StreamKind, SubscriptionManager};
use crate::upstream::UpstreamHandle;
use crate::vendor::VendorRequest;

fn map_send_error(err: crate::error::SendError) -> CommandError {
    match err {
        crate::error::SendError::NotReady | crate::error::SendError::BackpressureExceeded => {
            CommandError::NotConnected
        }
        crate::error::SendError::Timeout => CommandError::Timeout,
    }
}

pub struct Core {
    pub config: Config,
    pub ids: Arc<IdAllocator>,
    pub routing: Mutex<RoutingTables>,
    pub subs: Mutex<SubscriptionManager>,
    pub orders: Mutex<OrderManager>,
    pub upstream: UpstreamHandle,
    pub clients: Arc<ClientRegistry>,
}

impl Core {
    pub fn new(config: Config, ids: Arc<IdAllocator>, upstream: UpstreamHandle, clients: Arc<ClientRegistry>) -> Self {
        Self {
            config,
            ids,
            routing: Mutex::new(RoutingTables::new()),
            subs: Mutex::new(SubscriptionManager::new()),
            orders: Mutex::new(OrderManager::new()),
            upstream,
            clients,
        }
    }

    fn send_deadline(&self) -> Duration {
        self.config.send_deadline()
    }

    /// spec.md §4.6 subscribe algorithm.
    pub async fn subscribe(
        &self,
        client_id: u64,
        raw: RawInstrument,
        stream_kind: StreamKind,
    ) -> Result<(), CommandError> {
        let instrument = Instrument::canonicalize(raw)?;
        let key = instrument.identity_key();

        let (sub_id, req_id) = {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            if subs.has_active(client_id, &key, stream_kind) {
                return Err(CommandError::DuplicateSubscription);
            }
            let req_id = self.ids.next_req_id();
            let sub_id = subs.next_sub_id();
            subs.subscribe(sub_id, client_id, instrument.clone(), stream_kind, req_id, Utc::now())
                .expect("duplicate check already passed");
            let mut routing = self.routing.lock().expect("routing lock poisoned");
            routing.link_subscription(sub_id, client_id, req_id, key);
            (sub_id, req_id)
        };

        let request = VendorRequest::SubscribeMarketData { req_id, instrument, stream_kind };
        match self.upstream.send(request, self.send_deadline()).await {
            Ok(()) => {}
            Err(err) => {
                // Subscription stays Pending; it rides the next resubscribe sweep.
                warn!(sub_id, req_id, error = %err, "subscribe send deferred, leaving subscription pending");
            }
        }
        Ok(())
    }

    /// spec.md §4.5 `unsubscribe_market_data{symbol}`: cancels every
    /// non-terminal subscription the client holds on that symbol, across
    /// stream kinds.
    pub async fn unsubscribe_symbol(&self, client_id: u64, symbol: &str) {
        let matches = {
            let subs = self.subs.lock().expect("subscription lock poisoned");
            subs.active_for_client_symbol(client_id, symbol)
        };
        for sub_id in matches {
            self.unsubscribe_one(client_id, sub_id).await;
        }
    }

    async fn unsubscribe_one(&self, client_id: u64, sub_id: u64) {
        let req_id = {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            match subs.begin_unsubscribe(sub_id, client_id) {
                Ok(req_id) => req_id,
                Err(_) => return,
            }
        };

        let _ = self
            .upstream
            .send(VendorRequest::CancelMarketData { req_id }, self.send_deadline())
            .await;

        // The vendor protocol surfaces no explicit unsubscribe acknowledgement, so
        // C6 always finalizes on the unsubscribe timeout rather than racing an ack
        // that never comes.
        let timeout = self.config.unsubscribe_timeout();
        tokio::time::sleep(timeout).await;
        let mut subs = self.subs.lock().expect("subscription lock poisoned");
        subs.finalize_cancel(sub_id, Utc::now());
        drop(subs);
        self.routing.lock().expect("routing lock poisoned").forget_subscription(sub_id);
    }

    /// spec.md §4.7 `place_order`.
    pub async fn place_order(&self, client_id: u64, fields: PlaceOrderFields) -> Result<i64, CommandError> {
        let instrument = Instrument::canonicalize(fields.instrument)?;
        let new_order = NewOrder::validate(
            instrument.clone(),
            fields.action.into(),
            fields.quantity,
            fields.order_type.into(),
            fields.price,
        )?;

        let order_id = self.ids.next_order_id();
        {
            let mut orders = self.orders.lock().expect("order lock poisoned");
            orders.insert(order_id, client_id, new_order, Utc::now());
            self.routing.lock().expect("routing lock poisoned").link_order(order_id, client_id);
        }

        let request = VendorRequest::PlaceOrder {
            order_id,
            instrument,
            side: fields.action.into(),
            qty: fields.quantity,
            order_kind: fields.order_type.into(),
            price: fields.price,
        };
        match self.upstream.send(request, self.send_deadline()).await {
            Ok(()) => Ok(order_id),
            Err(err) => {
                let mut orders = self.orders.lock().expect("order lock poisoned");
                orders.mark_rejected(order_id, Utc::now());
                Err(map_send_error(err))
            }
        }
    }

    /// spec.md §4.7 `cancel_order`.
    pub async fn cancel_order(&self, client_id: u64, order_id: i64) -> Result<(), CommandError> {
        {
            let orders = self.orders.lock().expect("order lock poisoned");
            orders.authorize_cancel(order_id, client_id)?;
        }
        self.upstream
            .send(VendorRequest::CancelOrder { order_id }, self.send_deadline())
            .await
            .map_err(map_send_error)
    }

    /// spec.md §4.5 `get_contract_details`: a one-shot vendor lookup routed
    /// back to the requesting client via the transient lookup table.
    pub async fn get_contract_details(&self, client_id: u64, raw: RawInstrument) -> Result<(), CommandError> {
        let instrument = Instrument::canonicalize(raw)?;
        let req_id = self.ids.next_req_id();
        self.routing.lock().expect("routing lock poisoned").link_transient(req_id, client_id);

        let request = VendorRequest::RequestContractDetails { req_id, instrument };
        if let Err(err) = self.upstream.send(request, self.send_deadline()).await {
            self.routing.lock().expect("routing lock poisoned").forget_transient(req_id);
            return Err(map_send_error(err));
        }
        Ok(())
    }

    /// spec.md §3 client-session ownership: cascades subscription
    /// cancellation and strips every routing-table entry for `client_id`
    /// (testable property 2, "ownership cascade").
    pub async fn client_disconnected(&self, client_id: u64) {
        let (sub_ids, _order_ids) = self.routing.lock().expect("routing lock poisoned").remove_client(client_id);

        let mut cancel_requests = Vec::new();
        {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            for sub_id in &sub_ids {
                if let Some(sub) = subs.get(*sub_id) {
                    cancel_requests.push(sub.req_id);
                }
                subs.set_state(*sub_id, crate::subscription::SubState::Cancelling, Utc::now());
                subs.set_state(*sub_id, crate::subscription::SubState::Cancelled, Utc::now());
            }
        }
        for req_id in cancel_requests {
            let _ = self
                .upstream
                .send(VendorRequest::CancelMarketData { req_id }, self.send_deadline())
                .await;
        }

        self.clients.unregister(client_id);
        info!(client_id, subscriptions = sub_ids.len(), "client disconnected, subscriptions cascaded");
    }

    /// Periodic GC sweep, intended to be driven by a timer in
    /// the supervisor.
    pub fn gc_orders(&self) -> usize {
        let mut orders = self.orders.lock().expect("order lock poisoned");
        orders.gc(Utc::now(), self.config.order_retention())
    }

    /// spec.md §4.4 `ConnectionReady`: broadcast the new phase, then replay
    /// every non-terminal subscription with a fresh `req_id` (§4.6
    /// resubscribe-on-reconnect). Resubscribe is authoritative here, never
    /// cached client-side.
    pub async fn handle_connection_ready(&self, next_order_id: i64) {
        info!(next_order_id, "upstream ready, broadcasting connection_status and resubscribing");
        self.clients.broadcast(crate::hub::protocol::OutboundMessage::ConnectionStatus {
            status: crate::hub::protocol::ConnectionStatusValue::Connected,
            next_order_id: Some(next_order_id),
        });
        self.resubscribe_all().await;
    }

    /// spec.md §4.4 `ConnectionLost`: broadcast the new phase and mark every
    /// `Active` subscription `Pending` (it rides the next resubscribe sweep;
    /// `Pending` ones that never got an ack stay exactly as they were).
    pub fn handle_connection_lost(&self, reason: &str) {
        warn!(reason, "upstream connection lost");
        self.clients.broadcast(crate::hub::protocol::OutboundMessage::ConnectionStatus {
            status: crate::hub::protocol::ConnectionStatusValue::Disconnected,
            next_order_id: None,
        });
        self.subs.lock().expect("subscription lock poisoned").mark_active_as_pending();
    }

    /// spec.md §4.6 resubscribe: every non-terminal subscription gets a
    /// fresh `req_id` (old ones are meaningless post-reconnect) and is
    /// re-sent. Replayed in `sub_id` order, which preserves each client's
    /// own relative ordering (testable property 4).
    async fn resubscribe_all(&self) {
        let replay: Vec<(u64, i64, Instrument, StreamKind)> = {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            let mut routing = self.routing.lock().expect("routing lock poisoned");
            let sub_ids: Vec<u64> = subs.all_active().iter().map(|s| s.sub_id).collect();
            let mut replay = Vec::with_capacity(sub_ids.len());
            for sub_id in sub_ids {
                let new_req_id = self.ids.next_req_id();
                subs.reset_for_resubscribe(sub_id, new_req_id);
                routing.rebind_req(sub_id, new_req_id);
                if let Some(sub) = subs.get(sub_id) {
                    replay.push((sub_id, new_req_id, sub.instrument.clone(), sub.stream_kind));
                }
            }
            replay
        };

        for (sub_id, req_id, instrument, stream_kind) in replay {
            let request = VendorRequest::SubscribeMarketData { req_id, instrument, stream_kind };
            if let Err(err) = self.upstream.send(request, self.send_deadline()).await {
                warn!(sub_id, req_id, error = %err, "resubscribe send failed, left pending for next replay");
            }
        }
    }

    /// Count of non-terminal subscriptions, for the diagnostics snapshot.
    pub fn active_subscription_count(&self) -> usize {
        self.subs.lock().expect("subscription lock poisoned").active_count()
    }

    /// Count of non-terminal orders, for the diagnostics snapshot.
    pub fn active_order_count(&self) -> usize {
        self.orders.lock().expect("order lock poisoned").active_count()
    }
}
