// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MarketBridge: a real-time market-data and order-entry gateway. Fans out
//! a single authenticated upstream brokerage session to many WebSocket
//! clients speaking a JSON subscribe/unsubscribe/order protocol.

pub mod config;
pub mod core;
pub mod error;
pub mod hub;
pub mod id;
pub mod instrument;
pub mod order;
pub mod router;
pub mod routing;
pub mod subscription;
pub mod supervisor;
pub mod upstream;
pub mod vendor;

use crate::config::Config;
use crate::error::FatalError;
use crate::supervisor::Supervisor;

/// Wire up the bridge and run its WebSocket listener to completion.
/// Returns once shutdown is complete; an `Err` distinguishes the two fatal
/// outcomes that map to distinct process exit codes in `main`.
pub async fn run(config: Config) -> Result<(), FatalError> {
    let supervisor = Supervisor::start(config).map_err(FatalError::Config)?;
    supervisor.serve().await
}
