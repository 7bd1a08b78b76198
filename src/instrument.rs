// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instrument descriptors: the immutable identity of what a subscription or
//! order refers to.

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Stock,
    Option,
    Future,
    Forex,
    Index,
    Crypto,
}

impl InstrumentKind {
    /// Default routing exchange applied when a command omits `exchange`.
    fn default_exchange(self) -> &'static str {
        match self {
            InstrumentKind::Stock => "SMART",
            InstrumentKind::Option => "SMART",
            InstrumentKind::Future => "GLOBEX",
            InstrumentKind::Forex => "IDEALPRO",
            InstrumentKind::Index => "SMART",
            InstrumentKind::Crypto => "PAXOS",
        }
    }
}

/// Fields as received from a client command, before canonicalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInstrument {
    pub symbol: String,
    pub instrument_type: InstrumentKind,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub contract_month: Option<String>,
    #[serde(default)]
    pub last_trade_date: Option<String>,
}

/// Canonical, immutable instrument descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub kind: InstrumentKind,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub contract_month: Option<String>,
    pub last_trade_date: Option<String>,
}

/// The identity key used for the at-most-one-subscription invariant and for
/// the diagnostic `instrument_to_subs` aggregation table.
///
/// For futures this is `(symbol, exchange, contract_month|last_trade_date)`;
/// for everything else, symbol plus the resolved routing exchange suffices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub kind: InstrumentKind,
    pub symbol: String,
    pub exchange: String,
    pub contract_month: Option<String>,
}

impl Instrument {
    /// Canonicalize a raw command payload: uppercase the symbol, default the
    /// exchange by kind, and require at least one of `contract_month` /
    /// `last_trade_date` for futures.
    ///
    /// Per spec.md §9 / SPEC_FULL.md §11.2, automatic contract-month
    /// resolution (e.g. nearest front month) is not implemented — the field
    /// is accepted and carried through, never inferred.
    pub fn canonicalize(raw: RawInstrument) -> Result<Self, CommandError> {
        if raw.symbol.trim().is_empty() {
            return Err(CommandError::MissingField { field: "symbol" });
        }
        if raw.instrument_type == InstrumentKind::Future
            && raw.contract_month.is_none()
            && raw.last_trade_date.is_none()
        {
            return Err(CommandError::InvalidField {
                field: "contract_month",
                reason: "futures require contract_month or last_trade_date",
            });
        }

        let exchange = raw
            .exchange
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| raw.instrument_type.default_exchange().to_owned());

        Ok(Self {
            symbol: raw.symbol.trim().to_uppercase(),
            kind: raw.instrument_type,
            exchange: Some(exchange),
            currency: raw.currency,
            contract_month: raw.contract_month,
            last_trade_date: raw.last_trade_date,
        })
    }

    pub fn identity_key(&self) -> InstrumentKey {
        InstrumentKey {
            kind: self.kind,
            symbol: self.symbol.clone(),
            exchange: self
                .exchange
                .clone()
                .unwrap_or_else(|| self.kind.default_exchange().to_owned()),
            contract_month: match self.kind {
                InstrumentKind::Future => {
                    self.contract_month.clone().or_else(|| self.last_trade_date.clone())
                }
                _ => None,
            },
        }
    }
}
