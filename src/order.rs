// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Order domain model and state machine, grounded on
//! `barter-execution`'s `order/state.rs` and `order/request.rs` field naming.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::instrument::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
}

/// Order lifecycle state. `PartiallyFilled` and `Filled` carry
/// no extra data; fill quantities live on [`Order`] itself so a status update
/// can be merged without reconstructing the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    PendingSubmit,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled | OrderState::Rejected)
    }

    /// Map a vendor `OrderStatus.status` string onto our state enum. Unknown
    /// strings are treated as `Submitted` and logged by the caller; the
    /// vendor is the source of truth for fill quantities regardless.
    fn from_vendor_status(status: &str, filled: Decimal, remaining: Decimal) -> Self {
        match status {
            "filled" if remaining.is_zero() => OrderState::Filled,
            "cancelled" | "canceled" => OrderState::Cancelled,
            "rejected" => OrderState::Rejected,
            _ if filled > Decimal::ZERO && !remaining.is_zero() => OrderState::PartiallyFilled,
            _ if filled > Decimal::ZERO && remaining.is_zero() => OrderState::Filled,
            _ => OrderState::Submitted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub order_id: i64,
    pub client_id: u64,
    pub instrument: Instrument,
    pub side: Side,
    pub qty: Decimal,
    pub order_kind: OrderKind,
    pub price: Option<Decimal>,
    pub state: OrderState,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub last_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated fields for a new order request, produced after parsing an
/// inbound `place_order` command.
pub struct NewOrder {
    pub instrument: Instrument,
    pub side: Side,
    pub qty: Decimal,
    pub order_kind: OrderKind,
    pub price: Option<Decimal>,
}

impl NewOrder {
    pub fn validate(
        instrument: Instrument,
        side: Side,
        qty: Decimal,
        order_kind: OrderKind,
        price: Option<Decimal>,
    ) -> Result<Self, CommandError> {
        if qty <= Decimal::ZERO {
            return Err(CommandError::InvalidField { field: "qty", reason: "must be positive" });
        }
        match order_kind {
            OrderKind::Market => {}
            OrderKind::Limit | OrderKind::Stop => match price {
                Some(p) if p > Decimal::ZERO => {}
                Some(_) => {
                    return Err(CommandError::InvalidField {
                        field: "price",
                        reason: "must be positive",
                    })
                }
                None => {
                    return Err(CommandError::MissingField { field: "price" });
                }
            },
        }
        Ok(Self { instrument, side, qty, order_kind, price })
    }
}

/// Owns the order book: one row per order, keyed by the bridge-assigned
/// `order_id`. Single-writer, mirrors [`crate::subscription::SubscriptionManager`].
pub struct OrderManager {
    orders: HashMap<i64, Order>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self { orders: HashMap::new() }
    }

    /// Record a newly-submitted order in `PendingSubmit`.
    pub fn insert(&mut self, order_id: i64, client_id: u64, new: NewOrder, now: DateTime<Utc>) {
        self.orders.insert(
            order_id,
            Order {
                order_id,
                client_id,
                instrument: new.instrument,
                side: new.side,
                qty: new.qty,
                order_kind: new.order_kind,
                price: new.price,
                state: OrderState::PendingSubmit,
                filled: Decimal::ZERO,
                remaining: new.qty,
                avg_fill_price: None,
                last_fill_price: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn get(&self, order_id: i64) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// Authorize a cancel request: the order must exist, belong to
    /// `client_id`, and not already be terminal.
    pub fn authorize_cancel(&self, order_id: i64, client_id: u64) -> Result<(), CommandError> {
        let order = self.orders.get(&order_id).ok_or(CommandError::OrderNotFound)?;
        if order.client_id != client_id {
            return Err(CommandError::OrderNotOwned);
        }
        if order.state.is_terminal() {
            return Err(CommandError::OrderTerminal);
        }
        Ok(())
    }

    /// Merge a vendor `OrderStatus` event using a monotone fold
    /// (`state ← latest`, `filled_qty ← max(prev, new)`, `remaining_qty ←
    /// new`), so the result is order-independent of how updates interleave
    /// with place/cancel commands. Returns the updated
    /// order and the owning `client_id` if the order is known, or `None` if
    /// the order_id is unrecognized (logged and dropped by the
    /// router).
    pub fn apply_status(
        &mut self,
        order_id: i64,
        status: &str,
        filled: Decimal,
        remaining: Decimal,
        avg_fill_price: Option<Decimal>,
        last_fill_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<&Order> {
        let order = self.orders.get_mut(&order_id)?;
        let merged_filled = order.filled.max(filled);
        order.state = OrderState::from_vendor_status(status, merged_filled, remaining);
        order.filled = merged_filled;
        order.remaining = remaining;
        if avg_fill_price.is_some() {
            order.avg_fill_price = avg_fill_price;
        }
        if last_fill_price.is_some() {
            order.last_fill_price = last_fill_price;
        }
        order.updated_at = now;
        Some(order)
    }

    /// Force an order to `Rejected` when the vendor reports an order-scoped
    /// error with no matching status update.
    pub fn mark_rejected(&mut self, order_id: i64, now: DateTime<Utc>) -> Option<&Order> {
        let order = self.orders.get_mut(&order_id)?;
        if !order.state.is_terminal() {
            order.state = OrderState::Rejected;
            order.updated_at = now;
        }
        Some(order)
    }

    /// Sweep terminal orders older than `retention`, returning how many were
    /// dropped. Grounded on donor's periodic-sweep health check.
    pub fn gc(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let before = self.orders.len();
        self.orders.retain(|_, o| !(o.state.is_terminal() && now - o.updated_at > retention));
        before - self.orders.len()
    }

    pub fn orders_for_client(&self, client_id: u64) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(move |o| o.client_id == client_id)
    }

    /// Count of non-terminal orders, for the diagnostics snapshot.
    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| !o.state.is_terminal()).count()
    }
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Instrument, InstrumentKind, RawInstrument};

    fn stock() -> Instrument {
        Instrument::canonicalize(RawInstrument {
            symbol: "AAPL".to_owned(),
            instrument_type: InstrumentKind::Stock,
            exchange: None,
            currency: None,
            contract_month: None,
            last_trade_date: None,
        })
        .unwrap()
    }

    #[test]
    fn market_order_does_not_require_price() {
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(10), OrderKind::Market, None);
        assert!(new.is_ok());
    }

    #[test]
    fn limit_order_requires_positive_price() {
        let err =
            NewOrder::validate(stock(), Side::Buy, Decimal::from(10), OrderKind::Limit, None).unwrap_err();
        assert!(matches!(err, CommandError::MissingField { field: "price" }));
    }

    #[test]
    fn zero_quantity_rejected() {
        let err = NewOrder::validate(stock(), Side::Buy, Decimal::ZERO, OrderKind::Market, None)
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidField { field: "qty", .. }));
    }

    #[test]
    fn cancel_rejected_for_non_owner() {
        let mut mgr = OrderManager::new();
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(1), OrderKind::Market, None)
            .unwrap();
        mgr.insert(1, 42, new, Utc::now());
        let err = mgr.authorize_cancel(1, 7).unwrap_err();
        assert!(matches!(err, CommandError::OrderNotOwned));
    }

    #[test]
    fn cancel_rejected_once_terminal() {
        let mut mgr = OrderManager::new();
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(1), OrderKind::Market, None)
            .unwrap();
        mgr.insert(1, 42, new, Utc::now());
        mgr.apply_status(1, "filled", Decimal::from(1), Decimal::ZERO, None, None, Utc::now());
        let err = mgr.authorize_cancel(1, 42).unwrap_err();
        assert!(matches!(err, CommandError::OrderTerminal));
    }

    #[test]
    fn partial_fill_then_full_fill_transitions_state() {
        let mut mgr = OrderManager::new();
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(10), OrderKind::Market, None)
            .unwrap();
        mgr.insert(1, 42, new, Utc::now());
        mgr.apply_status(1, "partial", Decimal::from(4), Decimal::from(6), None, None, Utc::now());
        assert_eq!(mgr.get(1).unwrap().state, OrderState::PartiallyFilled);
        mgr.apply_status(1, "filled", Decimal::from(10), Decimal::ZERO, None, None, Utc::now());
        assert_eq!(mgr.get(1).unwrap().state, OrderState::Filled);
    }

    #[test]
    fn filled_quantity_never_regresses_on_an_out_of_order_update() {
        let mut mgr = OrderManager::new();
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(10), OrderKind::Market, None)
            .unwrap();
        mgr.insert(1, 42, new, Utc::now());
        mgr.apply_status(1, "partial", Decimal::from(8), Decimal::from(2), None, None, Utc::now());
        // A duplicate/reordered update reporting a smaller filled quantity
        // must not roll the fold backwards.
        mgr.apply_status(1, "partial", Decimal::from(3), Decimal::from(7), None, None, Utc::now());
        let order = mgr.get(1).unwrap();
        assert_eq!(order.filled, Decimal::from(8));
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn unknown_order_id_status_update_is_ignored() {
        let mut mgr = OrderManager::new();
        let updated =
            mgr.apply_status(999, "filled", Decimal::from(1), Decimal::ZERO, None, None, Utc::now());
        assert!(updated.is_none());
    }

    #[test]
    fn gc_drops_only_terminal_orders_past_retention() {
        let mut mgr = OrderManager::new();
        let new = NewOrder::validate(stock(), Side::Buy, Decimal::from(1), OrderKind::Market, None)
            .unwrap();
        let old = Utc::now() - chrono::Duration::hours(48);
        mgr.insert(1, 42, new, old);
        mgr.apply_status(1, "filled", Decimal::from(1), Decimal::ZERO, None, None, old);
        let new2 = NewOrder::validate(stock(), Side::Buy, Decimal::from(1), OrderKind::Market, None)
            .unwrap();
        mgr.insert(2, 42, new2, Utc::now());

        let dropped = mgr.gc(Utc::now(), Duration::from_secs(3600));
        assert_eq!(dropped, 1);
        assert!(mgr.get(1).is_none());
        assert!(mgr.get(2).is_some());
    }
}
