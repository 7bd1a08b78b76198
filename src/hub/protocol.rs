// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-facing JSON wire protocol: inbound commands and
//! outbound messages, plus the hand-rolled parser that distinguishes
//! malformed JSON from an unknown command from a missing field — a
//! distinction a single `serde(tag = "command")` enum can't make on its own.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CommandError, ErrorEnvelope, Severity};
use crate::instrument::RawInstrument;
use crate::order::{OrderKind, Side};
use crate::subscription::StreamKind;
use crate::vendor::{ContractDetailsPayload, TickType};

/// `action` values on `place_order`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireSide {
    Buy,
    Sell,
}

impl From<WireSide> for Side {
    fn from(value: WireSide) -> Self {
        match value {
            WireSide::Buy => Side::Buy,
            WireSide::Sell => Side::Sell,
        }
    }
}

/// `order_type` values on `place_order`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum WireOrderKind {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "STP")]
    Stop,
}

impl From<WireOrderKind> for OrderKind {
    fn from(value: WireOrderKind) -> Self {
        match value {
            WireOrderKind::Market => OrderKind::Market,
            WireOrderKind::Limit => OrderKind::Limit,
            WireOrderKind::Stop => OrderKind::Stop,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderFields {
    #[serde(flatten)]
    pub instrument: RawInstrument,
    pub action: WireSide,
    pub quantity: Decimal,
    pub order_type: WireOrderKind,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// A parsed, not-yet-validated inbound command.
#[derive(Debug, Clone)]
pub enum InboundCommand {
    SubscribeMarketData(RawInstrument),
    SubscribeTimeAndSales(RawInstrument),
    SubscribeBidAsk(RawInstrument),
    UnsubscribeMarketData { symbol: String },
    PlaceOrder(PlaceOrderFields),
    CancelOrder { order_id: i64 },
    GetContractDetails(RawInstrument),
}

impl InboundCommand {
    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            InboundCommand::SubscribeMarketData(_) => Some(StreamKind::Level1),
            InboundCommand::SubscribeTimeAndSales(_) => Some(StreamKind::Trades),
            InboundCommand::SubscribeBidAsk(_) => Some(StreamKind::Quotes),
            _ => None,
        }
    }
}

/// Parse one inbound text frame. Distinguishes malformed JSON, a missing
/// `command` discriminator, an unrecognized command, and per-command field
/// errors — each maps to a distinct `error_code`.
pub fn parse_command(text: &str) -> Result<InboundCommand, CommandError> {
    let value: Value = serde_json::from_str(text).map_err(|e| CommandError::MalformedJson(e.to_string()))?;
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingField { field: "command" })?;

    let from_value = |v: Value| -> Result<RawInstrument, CommandError> {
        serde_json::from_value(v).map_err(|e| CommandError::MalformedJson(e.to_string()))
    };

    match command {
        "subscribe_market_data" => from_value(value).map(InboundCommand::SubscribeMarketData),
        "subscribe_time_and_sales" => from_value(value).map(InboundCommand::SubscribeTimeAndSales),
        "subscribe_bid_ask" => from_value(value).map(InboundCommand::SubscribeBidAsk),
        "unsubscribe_market_data" => {
            let symbol = value
                .get("symbol")
                .and_then(Value::as_str)
                .ok_or(CommandError::MissingField { field: "symbol" })?;
            Ok(InboundCommand::UnsubscribeMarketData { symbol: symbol.to_owned() })
        }
        "place_order" => {
            // rust_decimal's `Deserialize` accepts a JSON string via
            // `visit_str` as readily as a JSON number; the wire protocol
            // only allows numeric `quantity`/`price`, so both tokens are
            // checked against the raw `Value` before the typed parse.
            if !matches!(value.get("quantity"), Some(Value::Number(_))) {
                return Err(CommandError::InvalidField { field: "quantity", reason: "must be a JSON number" });
            }
            if let Some(price) = value.get("price") {
                if !price.is_null() && !price.is_number() {
                    return Err(CommandError::InvalidField { field: "price", reason: "must be a JSON number" });
                }
            }
            serde_json::from_value::<PlaceOrderFields>(value)
                .map(InboundCommand::PlaceOrder)
                .map_err(|e| CommandError::MalformedJson(e.to_string()))
        }
        "cancel_order" => {
            let order_id = value
                .get("order_id")
                .and_then(Value::as_i64)
                .ok_or(CommandError::MissingField { field: "order_id" })?;
            Ok(InboundCommand::CancelOrder { order_id })
        }
        "get_contract_details" => from_value(value).map(InboundCommand::GetContractDetails),
        other => Err(CommandError::UnknownCommand { command: other.to_owned() }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatusValue {
    Connected,
    Disconnected,
    Connecting,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Price,
    Size,
}

impl TickType {
    /// Whether a tick of this kind carries a `price` or a `size` value.
    pub fn data_type(self) -> DataType {
        match self {
            TickType::Last | TickType::Bid | TickType::Ask => DataType::Price,
            TickType::BidSize | TickType::AskSize | TickType::Volume => DataType::Size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractSummary {
    pub symbol: String,
    pub exchange: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Split a vendor contract-details payload into the nested `contract`
/// summary plus the two fields the outbound message keeps at the top level.
pub fn split_contract_details(payload: ContractDetailsPayload) -> (ContractSummary, String, f64) {
    (
        ContractSummary { symbol: payload.symbol, exchange: payload.exchange, currency: payload.currency },
        payload.market_name,
        payload.min_tick,
    )
}

/// A single outbound message. `type` is attached by
/// the `serde(tag)` below, never stored as a field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    ConnectionStatus {
        status: ConnectionStatusValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_order_id: Option<i64>,
    },
    MarketData {
        symbol: String,
        req_id: i64,
        data_type: DataType,
        tick_type: TickType,
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
        timestamp: f64,
    },
    TimeAndSales { symbol: String, req_id: i64, price: f64, size: f64, timestamp: f64 },
    BidAskTick {
        symbol: String,
        req_id: i64,
        bid_price: f64,
        ask_price: f64,
        bid_size: f64,
        ask_size: f64,
        timestamp: f64,
    },
    OrderStatus {
        order_id: i64,
        status: String,
        filled: Decimal,
        remaining: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        avg_fill_price: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_fill_price: Option<Decimal>,
        timestamp: f64,
    },
    ContractDetails { req_id: i64, contract: ContractSummary, market_name: String, min_tick: f64 },
    ContractDetailsEnd { req_id: i64 },
    Error {
        severity: Severity,
        error_code: String,
        error_string: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        order_id: Option<i64>,
    },
}

impl OutboundMessage {
    pub fn error(envelope: ErrorEnvelope) -> Self {
        OutboundMessage::Error {
            severity: envelope.severity,
            error_code: envelope.error_code,
            error_string: envelope.error_string,
            req_id: envelope.req_id,
            order_id: envelope.order_id,
        }
    }

    /// Messages the hub must never silently drop from a client's outbound
    /// queue: the client is disconnected instead.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            OutboundMessage::OrderStatus { .. }
                | OutboundMessage::ConnectionStatus { .. }
                | OutboundMessage::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_is_distinguished_from_unknown_command() {
        assert!(matches!(parse_command("{not json"), Err(CommandError::MalformedJson(_))));
        assert!(matches!(
            parse_command(r#"{"command":"frobnicate"}"#),
            Err(CommandError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn missing_command_field_reported() {
        let err = parse_command(r#"{"symbol":"AAPL"}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingField { field: "command" }));
    }

    #[test]
    fn subscribe_market_data_parses_instrument_fields() {
        let cmd = parse_command(
            r#"{"command":"subscribe_market_data","symbol":"aapl","instrument_type":"stock"}"#,
        )
        .unwrap();
        match cmd {
            InboundCommand::SubscribeMarketData(raw) => assert_eq!(raw.symbol, "aapl"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn place_order_parses_action_and_order_type() {
        let cmd = parse_command(
            r#"{"command":"place_order","symbol":"AAPL","instrument_type":"stock","action":"BUY","quantity":100,"order_type":"LMT","price":150.0}"#,
        )
        .unwrap();
        match cmd {
            InboundCommand::PlaceOrder(fields) => {
                assert!(matches!(fields.action, WireSide::Buy));
                assert!(matches!(fields.order_type, WireOrderKind::Limit));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn place_order_rejects_stringified_quantity_and_price() {
        let err = parse_command(
            r#"{"command":"place_order","symbol":"AAPL","instrument_type":"stock","action":"BUY","quantity":"100","order_type":"LMT","price":"150.00"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidField { field: "quantity", .. }));
    }

    #[test]
    fn error_message_serializes_with_type_tag_and_no_duplicate_fields() {
        let msg = OutboundMessage::error(ErrorEnvelope::from_command(&CommandError::NotConnected));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error_code"], "not_connected");
    }
}
