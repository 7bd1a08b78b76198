// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process composition root (C8): wires C1-C7 and
//! the client hub together, drives the shutdown sequence, and exposes a
//! diagnostics snapshot for an external statistics surface to poll.
//!
//! Grounded on donor's `cli/src/run.rs`: a `CancellationToken` handed
//! to every long-lived task, a double-signal handler (first signal starts
//! graceful shutdown, a second forces immediate exit), and
//! `axum::serve(...).with_graceful_shutdown(...)` for the listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::Core;
use crate::error::FatalError;
use crate::hub::client::ClientRegistry;
use crate::hub::protocol::{ConnectionStatusValue, OutboundMessage};
use crate::id::IdAllocator;
use crate::upstream::SessionPhase;
use crate::vendor::fake;

/// A point-in-time diagnostics snapshot. The HTTP
/// statistics surface that serves this to operators is an external
/// collaborator; this struct is its only integration point.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub active_clients: usize,
    pub active_subscriptions: usize,
    pub active_orders: usize,
    pub upstream_phase: &'static str,
    pub upstream_reconnect_attempt: u32,
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Disconnected => "disconnected",
        SessionPhase::Connecting => "connecting",
        SessionPhase::Handshaking => "handshaking",
        SessionPhase::Ready => "ready",
        SessionPhase::Reconnecting => "reconnecting",
        SessionPhase::Failed => "failed",
    }
}

/// Owns the wired-up core and the process lifecycle around it.
pub struct Supervisor {
    config: Config,
    core: Arc<Core>,
    shutdown: CancellationToken,
    fatal: Arc<AtomicBool>,
    router_task: tokio::task::JoinHandle<()>,
}

impl Supervisor {
    /// Wire up C1-C7 and spawn the Event Router. No production
    /// `VendorTransport` ships in this crate (the vendor SDK is
    /// an external collaborator), so only `--fake-upstream` is supported
    /// here; anything else is a configuration error.
    pub fn start(config: Config) -> anyhow::Result<Self> {
        if !config.fake_upstream {
            anyhow::bail!(
                "no production vendor transport is bundled in this crate; pass --fake-upstream \
                 to run against the in-process test double, or wire in a VendorTransport \
                 implementation for your upstream"
            );
        }

        let ids = Arc::new(IdAllocator::new());
        let (vendor, _vendor_handle) = fake::pair(1);
        let (upstream, events) = crate::upstream::spawn(vendor, config.clone(), Arc::clone(&ids));
        let clients = Arc::new(ClientRegistry::new());
        let core = Arc::new(Core::new(config.clone(), ids, upstream, clients));

        let router_task = tokio::spawn(crate::router::run(Arc::clone(&core), events));

        Ok(Self { config, core, shutdown: CancellationToken::new(), fatal: Arc::new(AtomicBool::new(false)), router_task })
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            active_clients: self.core.clients.client_ids().len(),
            active_subscriptions: self.core.active_subscription_count(),
            active_orders: self.core.active_order_count(),
            upstream_phase: phase_label(self.core.upstream.status().phase),
            upstream_reconnect_attempt: self.core.upstream.status().attempt,
        }
    }

    /// Run the WebSocket listener to completion: serves until a shutdown
    /// signal or a fatal upstream state, then drains clients within the
    /// grace period before returning.
    pub async fn serve(self) -> Result<(), FatalError> {
        let listener = TcpListener::bind(self.config.ws_addr())
            .await
            .with_context(|| format!("binding websocket listener on {}", self.config.ws_addr()))
            .map_err(FatalError::Config)?;
        info!(addr = %self.config.ws_addr(), "websocket listener bound");

        tokio::spawn(watch_for_fatal_upstream(Arc::clone(&self.core), self.shutdown.clone(), Arc::clone(&self.fatal)));
        tokio::spawn(run_order_gc(Arc::clone(&self.core), self.shutdown.clone()));
        tokio::spawn(wait_for_shutdown_signal(self.shutdown.clone()));
        tokio::spawn(drain_clients_on_shutdown(Arc::clone(&self.core), self.shutdown.clone()));

        let app = crate::hub::router(Arc::clone(&self.core));
        axum::serve(listener, app)
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
            .context("websocket server")
            .map_err(FatalError::Upstream)?;

        self.router_task.abort();

        if self.fatal.load(Ordering::SeqCst) {
            return Err(FatalError::Upstream(anyhow::anyhow!(
                "upstream session reached a fatal state (reconnect attempts exhausted)"
            )));
        }
        Ok(())
    }
}

/// Trip the shutdown token the moment the upstream session gives up for
/// good, rather than waiting for an operator to
/// notice and send a signal.
async fn watch_for_fatal_upstream(core: Arc<Core>, shutdown: CancellationToken, fatal: Arc<AtomicBool>) {
    let mut watch = core.upstream.watch();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = watch.changed() => {
                if changed.is_err() {
                    return;
                }
                if watch.borrow().phase == SessionPhase::Failed {
                    warn!("upstream session failed permanently, initiating shutdown");
                    fatal.store(true, Ordering::SeqCst);
                    shutdown.cancel();
                    return;
                }
            }
        }
    }
}

async fn run_order_gc(core: Arc<Core>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(core.config.order_gc_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let dropped = core.gc_orders();
                if dropped > 0 {
                    info!(dropped, "order gc swept terminal orders");
                }
            }
        }
    }
}

/// First SIGTERM/SIGINT starts graceful shutdown; a second forces an
/// immediate exit, mirroring an operator's expectation that a stuck
/// shutdown can always be interrupted.
async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGTERM");
        }
        _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGINT");
        }
    }
    shutdown.cancel();

    tokio::select! {
        _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGTERM again, forcing exit");
        }
        _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGINT again, forcing exit");
        }
    }
    std::process::exit(130);
}

/// On shutdown: broadcast `shutting_down`, give connected clients the grace
/// period to notice and close on their own, then force the rest closed.
async fn drain_clients_on_shutdown(core: Arc<Core>, shutdown: CancellationToken) {
    shutdown.cancelled().await;
    core.clients.broadcast(OutboundMessage::ConnectionStatus {
        status: ConnectionStatusValue::ShuttingDown,
        next_order_id: None,
    });
    tokio::time::sleep(core.config.shutdown_grace()).await;
    core.clients.disconnect_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_rejects_real_upstream_as_unsupported() {
        let config = Config { fake_upstream: false, ..Config::default() };
        let err = Supervisor::start(config).unwrap_err();
        assert!(err.to_string().contains("vendor transport"));
    }

    #[tokio::test]
    async fn start_succeeds_with_fake_upstream() {
        let config = Config { fake_upstream: true, ..Config::default() };
        let supervisor = Supervisor::start(config).unwrap();
        let stats = supervisor.snapshot();
        assert_eq!(stats.active_clients, 0);
    }
}
