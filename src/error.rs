// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy. One `thiserror` enum per failure domain, each
//! mapping onto the WS `error{...}` envelope clients see.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity tag carried on outbound `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Errors raised while validating or dispatching an inbound client command.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("unknown command {command:?}")]
    UnknownCommand { command: String },
    #[error("missing field {field}")]
    MissingField { field: &'static str },
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: &'static str },
    #[error("malformed json: {0}")]
    MalformedJson(String),
    #[error("duplicate subscription")]
    DuplicateSubscription,
    #[error("not connected")]
    NotConnected,
    #[error("order not found")]
    OrderNotFound,
    #[error("order not owned by this client")]
    OrderNotOwned,
    #[error("order already in a terminal state")]
    OrderTerminal,
    #[error("upstream send timed out")]
    Timeout,
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand { .. }
            | CommandError::MissingField { .. }
            | CommandError::InvalidField { .. }
            | CommandError::MalformedJson(_) => "bad_request",
            CommandError::DuplicateSubscription => "duplicate_subscription",
            CommandError::NotConnected => "not_connected",
            CommandError::OrderNotFound => "not_found",
            CommandError::OrderNotOwned => "not_owned",
            CommandError::OrderTerminal => "terminal",
            CommandError::Timeout => "timeout",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

/// Errors surfaced from the vendor transport boundary (C3).
#[derive(Debug, Clone, Error)]
pub enum VendorTransportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("connection closed")]
    Closed,
}

/// Errors `UpstreamSession::send` can fail with.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("upstream session is not ready")]
    NotReady,
    #[error("outbound queue is full")]
    BackpressureExceeded,
    #[error("send timed out")]
    Timeout,
}

/// The fields of an outbound `error{...}` message, before the
/// `type` discriminator is attached by [`crate::hub::protocol::OutboundMessage`].
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    pub severity: Severity,
    pub error_code: String,
    pub error_string: String,
    pub req_id: Option<i64>,
    pub order_id: Option<i64>,
}

impl ErrorEnvelope {
    pub fn from_command(err: &CommandError) -> Self {
        Self {
            severity: err.severity(),
            error_code: err.code().to_owned(),
            error_string: err.to_string(),
            req_id: None,
            order_id: None,
        }
    }

    /// An error originating at the vendor transport boundary, scoped to
    /// whichever `req_id`/`order_id` it names via [`Self::with_req_id`] and
    /// [`Self::with_order_id`].
    pub fn vendor(severity: Severity, error_code: String, error_string: String) -> Self {
        Self { severity, error_code, error_string, req_id: None, order_id: None }
    }

    pub fn with_req_id(mut self, req_id: i64) -> Self {
        self.req_id = Some(req_id);
        self
    }

    pub fn with_order_id(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// The two ways `run()` can fail, distinguished only so `main` can pick the
/// right exit code (spec.md §6: 1 for configuration, 2 for a fatal upstream
/// session). CLI parse failures never reach this type; they exit 64 directly
/// from `Config::try_parse`.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(anyhow::Error),
    #[error(transparent)]
    Upstream(anyhow::Error),
}
