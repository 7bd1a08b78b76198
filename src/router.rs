// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Event Router (C4): the single task that drains decoded
//! vendor events and turns each into a routing-table lookup plus an outbound
//! message to the owning client, or a state transition with no client-facing
//! echo.
//!
//! Grounded on donor's `transport/ws.rs` dispatch loop, which matches
//! one incoming frame kind at a time against a small table and forwards to
//! the addressed peer; here the "frame kind" is a [`VendorEvent`] variant and
//! the "peer" is resolved through [`crate::routing::RoutingTables`] instead
//! of a direct connection handle.
//!
//! See `core.rs`'s module doc for why `.lock().expect(...)` is this crate's
//! deliberate fail-fast response to lock poisoning, not an oversight.

#![allow(clippy::expect_used)]

use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::Core;
use crate::error::{ErrorEnvelope, Severity};
use crate::hub::protocol::{self, OutboundMessage};
use crate::subscription::SubState;
use crate::vendor::{ReceivedEvent, VendorEvent};

/// Run the router until the event channel closes (upstream session torn
/// down for good). Each event is handled to completion before the next is
/// pulled, matching C3's single-producer ordering guarantee.
pub async fn run(core: std::sync::Arc<Core>, mut events: tokio::sync::mpsc::Receiver<ReceivedEvent>) {
    while let Some(received) = events.recv().await {
        handle_event(&core, received).await;
    }
    tracing::info!("event router stopped, upstream channel closed");
}

async fn handle_event(core: &Core, received: ReceivedEvent) {
    let now = received.received_at;
    match received.event {
        VendorEvent::ConnectionReady { next_order_id } => {
            core.handle_connection_ready(next_order_id).await;
        }
        VendorEvent::ConnectionLost { reason } => {
            core.handle_connection_lost(&reason);
        }
        VendorEvent::Tick { req_id, tick_type, price, size, timestamp } => {
            route_market_data(core, req_id, now, |symbol| OutboundMessage::MarketData {
                symbol,
                req_id,
                data_type: tick_type.data_type(),
                tick_type,
                price,
                size,
                timestamp,
            });
        }
        VendorEvent::Trade { req_id, price, size, timestamp } => {
            route_market_data(core, req_id, now, |symbol| OutboundMessage::TimeAndSales {
                symbol,
                req_id,
                price,
                size,
                timestamp,
            });
        }
        VendorEvent::BidAsk { req_id, bid_price, ask_price, bid_size, ask_size, timestamp } => {
            route_market_data(core, req_id, now, |symbol| OutboundMessage::BidAskTick {
                symbol,
                req_id,
                bid_price,
                ask_price,
                bid_size,
                ask_size,
                timestamp,
            });
        }
        VendorEvent::ContractDetails { req_id, contract } => {
            let client_id = core.routing.lock().expect("routing lock poisoned").client_for_transient(req_id);
            if let Some(client_id) = client_id {
                let (summary, market_name, min_tick) = protocol::split_contract_details(contract);
                core.clients.send_to(
                    client_id,
                    OutboundMessage::ContractDetails { req_id, contract: summary, market_name, min_tick },
                );
            } else {
                tracing::warn!(req_id, "contract_details for unknown req_id, dropped");
            }
        }
        VendorEvent::ContractDetailsEnd { req_id } => {
            let client_id = core.routing.lock().expect("routing lock poisoned").client_for_transient(req_id);
            if let Some(client_id) = client_id {
                core.clients.send_to(client_id, OutboundMessage::ContractDetailsEnd { req_id });
            }
            core.routing.lock().expect("routing lock poisoned").forget_transient(req_id);
        }
        VendorEvent::OrderStatus { order_id, status, filled, remaining, avg_fill_price, last_fill_price } => {
            route_order_status(core, order_id, &status, filled, remaining, avg_fill_price, last_fill_price, now);
        }
        VendorEvent::VendorError { req_id, order_id, code, message, severity } => {
            route_vendor_error(core, req_id, order_id, code, message, severity, now);
        }
    }
}

/// Resolve a market-data event's `req_id` to its owning subscription and
/// client, marking the subscription `Active` on first delivery, and
/// forward the built message. A `Cancelling` subscription's
/// trailing events are dropped silently: the client asked to stop hearing
/// about it and a late in-flight tick is not an error. A `req_id` with no
/// subscription at all — resolved after the vendor's own cancel ack, or
/// simply unknown — is logged and dropped.
fn route_market_data(core: &Core, req_id: i64, now: chrono::DateTime<Utc>, build: impl FnOnce(String) -> OutboundMessage) {
    let sub_id = { core.routing.lock().expect("routing lock poisoned").sub_for_req(req_id) };
    let Some(sub_id) = sub_id else {
        tracing::warn!(req_id, "market data event for unknown req_id, dropped");
        return;
    };

    let (client_id, symbol, cancelling) = {
        let mut subs = core.subs.lock().expect("subscription lock poisoned");
        let Some(sub) = subs.get(sub_id) else {
            return;
        };
        if sub.state.is_terminal() {
            return;
        }
        let cancelling = sub.state == SubState::Cancelling;
        let symbol = sub.instrument.symbol.clone();
        let client_id = sub.client_id;
        if !cancelling {
            subs.record_event(sub_id, now);
        }
        (client_id, symbol, cancelling)
    };
    if cancelling {
        return;
    }

    core.clients.send_to(client_id, build(symbol));
}

/// Merge the vendor's fill state into our order book and echo
/// it to the owning client. An order_id with no matching order is logged and
/// dropped — it predates this process (a restart) or the vendor sent a
/// status for an order we never placed.
fn route_order_status(
    core: &Core,
    order_id: i64,
    status: &str,
    filled: Decimal,
    remaining: Decimal,
    avg_fill_price: Option<Decimal>,
    last_fill_price: Option<Decimal>,
    now: chrono::DateTime<Utc>,
) {
    let mut orders = core.orders.lock().expect("order lock poisoned");
    let Some(order) = orders.apply_status(order_id, status, filled, remaining, avg_fill_price, last_fill_price, now)
    else {
        tracing::warn!(order_id, status, "order_status for unknown order_id, dropped");
        return;
    };
    let message = OutboundMessage::OrderStatus {
        order_id,
        status: status.to_owned(),
        filled: order.filled,
        remaining: order.remaining,
        avg_fill_price: order.avg_fill_price,
        last_fill_price: order.last_fill_price,
        timestamp: now.timestamp() as f64,
    };
    let client_id = order.client_id;
    drop(orders);
    core.clients.send_to(client_id, message);
}

/// A vendor error may be scoped to a `req_id` (market data
/// request), an `order_id` (order), or neither (session-wide, broadcast to
/// everyone). `Severity::Error` against a subscription's `req_id` is treated
/// as fatal for that subscription: it
/// moves to `Failed` and its routing entries are torn down so a stale
/// `req_id` cannot resurrect a route. An order-scoped error with no
/// `OrderStatus` to follow is the vendor's way of rejecting the order
/// outright, so it forces `Rejected`.
fn route_vendor_error(
    core: &Core,
    req_id: Option<i64>,
    order_id: Option<i64>,
    code: i32,
    message: String,
    severity: Severity,
    now: chrono::DateTime<Utc>,
) {
    let severity = crate::vendor::severity_override(code).unwrap_or(severity);
    let mut envelope = ErrorEnvelope::vendor(severity, format!("vendor_{code}"), message);
    if let Some(req_id) = req_id {
        envelope = envelope.with_req_id(req_id);
    }
    if let Some(order_id) = order_id {
        envelope = envelope.with_order_id(order_id);
    }

    if let Some(order_id) = order_id {
        let client_id = {
            let mut orders = core.orders.lock().expect("order lock poisoned");
            orders.mark_rejected(order_id, now);
            core.routing.lock().expect("routing lock poisoned").client_for_order(order_id)
        };
        if let Some(client_id) = client_id {
            core.clients.send_to(client_id, OutboundMessage::error(envelope));
        } else {
            tracing::warn!(order_id, code, "vendor error for unknown order_id, dropped");
        }
        return;
    }

    if let Some(req_id) = req_id {
        let sub_id = { core.routing.lock().expect("routing lock poisoned").sub_for_req(req_id) };
        let Some(sub_id) = sub_id else {
            tracing::warn!(req_id, code, "vendor error for unknown req_id, dropped");
            return;
        };
        let client_id = {
            let mut subs = core.subs.lock().expect("subscription lock poisoned");
            let client_id = subs.get(sub_id).map(|s| s.client_id);
            if severity == Severity::Error {
                subs.set_state(sub_id, SubState::Failed, now);
            }
            client_id
        };
        if severity == Severity::Error {
            core.routing.lock().expect("routing lock poisoned").forget_subscription(sub_id);
        }
        if let Some(client_id) = client_id {
            core.clients.send_to(client_id, OutboundMessage::error(envelope));
        }
        return;
    }

    // Session-wide error: every connected client sees it.
    core.clients.broadcast(OutboundMessage::error(envelope));
}
