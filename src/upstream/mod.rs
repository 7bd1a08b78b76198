// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream session management: owns the single vendor
//! connection, drives the handshake/reconnect state machine, and republishes
//! decoded vendor events to the Event Router (C4).
//!
//! Grounded on donor's `upstream/bridge.rs` `run_loop` (exponential
//! backoff reconnect) and `upstream/health.rs` (periodic liveness check),
//! generalized from a WS-to-WS relay to a TCP vendor-protocol client.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SendError;
use crate::id::IdAllocator;
use crate::vendor::{ReceivedEvent, VendorEvent, VendorRequest, VendorTransport};

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub attempt: u32,
}

/// The handle the rest of the core holds; the session itself runs as a
/// detached task owning the [`VendorTransport`].
#[derive(Clone)]
pub struct UpstreamHandle {
    outbound_tx: mpsc::Sender<VendorRequest>,
    status_rx: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl UpstreamHandle {
    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// A subscribable handle on status changes, for the supervisor's
    /// fatal-state watcher (exit code 2).
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Enqueue a request for the upstream connection, subject to a send
    /// deadline. Rejected immediately if the session is not `Ready`
    /// (`SendError::NotReady`) or if the outbound queue is already at
    /// capacity (`SendError::BackpressureExceeded`); a queue that still
    /// hasn't drained by the deadline fails with `SendError::Timeout`.
    pub async fn send(&self, request: VendorRequest, deadline: Duration) -> Result<(), SendError> {
        if self.status().phase != SessionPhase::Ready {
            return Err(SendError::NotReady);
        }
        if self.outbound_tx.capacity() == 0 {
            return Err(SendError::BackpressureExceeded);
        }
        match timeout(deadline, self.outbound_tx.send(request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::NotReady),
            Err(_) => Err(SendError::Timeout),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Spawn the upstream session task. Returns a handle for issuing requests
/// and observing status, plus the channel of decoded events for C4.
pub fn spawn<T: VendorTransport>(
    transport: T,
    config: Config,
    ids: std::sync::Arc<IdAllocator>,
) -> (UpstreamHandle, mpsc::Receiver<ReceivedEvent>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.client_queue_capacity);
    let (events_tx, events_rx) = mpsc::channel(config.client_queue_capacity);
    let (status_tx, status_rx) = watch::channel(SessionStatus { phase: SessionPhase::Disconnected, attempt: 0 });
    let cancel = CancellationToken::new();

    let handle = UpstreamHandle { outbound_tx, status_rx, cancel: cancel.clone() };

    tokio::spawn(run_loop(transport, config, ids, outbound_rx, events_tx, status_tx, cancel));

    (handle, events_rx)
}

async fn run_loop<T: VendorTransport>(
    mut transport: T,
    config: Config,
    ids: std::sync::Arc<IdAllocator>,
    mut outbound_rx: mpsc::Receiver<VendorRequest>,
    events_tx: mpsc::Sender<ReceivedEvent>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let handshake_deadline = config.idle_timeout() + config.pong_timeout();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let _ = status_tx.send(SessionStatus { phase: SessionPhase::Connecting, attempt });
        let _ = status_tx.send(SessionStatus { phase: SessionPhase::Handshaking, attempt });
        match timeout(handshake_deadline, transport.handshake()).await {
            Ok(Ok(next_order_id)) => {
                info!(next_order_id, attempt, "upstream handshake succeeded");
                attempt = 0;
                ids.advance_order_id_floor(next_order_id);
                let _ = status_tx.send(SessionStatus { phase: SessionPhase::Ready, attempt });
                if publish(&events_tx, VendorEvent::ConnectionReady { next_order_id }).await.is_err() {
                    return;
                }

                let lost_reason = pump(
                    &mut transport,
                    &mut outbound_rx,
                    &events_tx,
                    &cancel,
                    config.idle_timeout(),
                    config.pong_timeout(),
                )
                .await;
                if cancel.is_cancelled() {
                    return;
                }
                warn!(reason = %lost_reason, "upstream connection lost");
                if publish(&events_tx, VendorEvent::ConnectionLost { reason: lost_reason }).await.is_err() {
                    return;
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, attempt, "upstream handshake failed");
            }
            Err(_elapsed) => {
                warn!(attempt, "upstream handshake timed out");
            }
        }

        attempt += 1;
        if let Some(max) = config.max_reconnect_attempts {
            if attempt > max {
                let _ = status_tx.send(SessionStatus { phase: SessionPhase::Failed, attempt });
                warn!(attempt, "upstream session exhausted reconnect attempts");
                return;
            }
        }

        let _ = status_tx.send(SessionStatus { phase: SessionPhase::Reconnecting, attempt });
        let delay = backoff_delay(&config, attempt);
        debug!(delay_ms = delay.as_millis() as u64, attempt, "backing off before reconnect");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

/// Pump the send/recv loop while the session is `Ready`, implementing the
/// heartbeat: `idle_timeout` of inbound silence triggers a
/// protocol ping; if no inbound event of any kind follows within
/// `pong_timeout` the session is declared lost. Any inbound event — not just
/// a pong reply — resets the idle clock, matching "no inbound bytes" rather
/// than a narrower "no pong reply" reading. Returns a human-readable reason
/// once the transport is lost.
async fn pump<T: VendorTransport>(
    transport: &mut T,
    outbound_rx: &mut mpsc::Receiver<VendorRequest>,
    events_tx: &mpsc::Sender<ReceivedEvent>,
    cancel: &CancellationToken,
    idle_timeout: Duration,
    pong_timeout: Duration,
) -> String {
    let mut awaiting_pong = false;
    loop {
        let recv_deadline = if awaiting_pong { pong_timeout } else { idle_timeout };
        tokio::select! {
            _ = cancel.cancelled() => return "shutdown".to_owned(),
            maybe_request = outbound_rx.recv() => {
                match maybe_request {
                    Some(request) => {
                        if let Err(err) = transport.send(&request).await {
                            return err.to_string();
                        }
                    }
                    None => return "outbound channel closed".to_owned(),
                }
            }
            recv_result = timeout(recv_deadline, transport.recv()) => {
                match recv_result {
                    Ok(Ok(event)) => {
                        awaiting_pong = false;
                        if publish(events_tx, event).await.is_err() {
                            return "event channel closed".to_owned();
                        }
                    }
                    Ok(Err(err)) => return err.to_string(),
                    Err(_elapsed) if awaiting_pong => return "heartbeat timeout".to_owned(),
                    Err(_elapsed) => {
                        debug!("idle timeout elapsed, sending heartbeat ping");
                        if let Err(err) = transport.ping().await {
                            return err.to_string();
                        }
                        awaiting_pong = true;
                    }
                }
            }
        }
    }
}

async fn publish(events_tx: &mpsc::Sender<ReceivedEvent>, event: VendorEvent) -> Result<(), ()> {
    events_tx.send(ReceivedEvent { event, received_at: chrono::Utc::now() }).await.map_err(|_| ())
}

fn backoff_delay(config: &Config, attempt: u32) -> Duration {
    let base = config.reconnect_base();
    let cap = config.reconnect_cap();
    let scale = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.checked_mul(scale as u32).unwrap_or(cap).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config { reconnect_base_ms: 100, reconnect_cap_ms: 800, ..Config::default() }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let c = cfg();
        assert_eq!(backoff_delay(&c, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&c, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&c, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&c, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(&c, 10), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn handshake_success_sets_ready_and_emits_connection_ready() {
        let (vendor, _vendor_handle) = crate::vendor::fake::pair(7);
        let (handle, mut events) = spawn(vendor, cfg(), std::sync::Arc::new(IdAllocator::new()));

        let event = events.recv().await.expect("connection ready event");
        assert!(matches!(event.event, VendorEvent::ConnectionReady { next_order_id: 7 }));
        assert_eq!(handle.status().phase, SessionPhase::Ready);
        handle.shutdown();
    }

    #[tokio::test]
    async fn send_rejected_before_ready_reported() {
        let (vendor, vendor_handle) = crate::vendor::fake::pair(1);
        vendor_handle.fail_next_handshake();
        let (handle, _events) = spawn(vendor, cfg(), std::sync::Arc::new(IdAllocator::new()));

        let err = handle
            .send(VendorRequest::CancelOrder { order_id: 1 }, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::NotReady);
        handle.shutdown();
    }

    #[tokio::test]
    async fn idle_silence_triggers_a_heartbeat_ping() {
        let cfg = Config { idle_timeout_ms: 20, pong_timeout_ms: 500, ..Config::default() };
        let (vendor, vendor_handle) = crate::vendor::fake::pair(1);
        let (handle, mut events) = spawn(vendor, cfg, std::sync::Arc::new(IdAllocator::new()));
        let _ready = events.recv().await.expect("connection ready event");

        sleep(Duration::from_millis(80)).await;
        assert!(vendor_handle.pings_sent() >= 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn pong_timeout_with_no_inbound_event_forces_reconnect() {
        let cfg = Config { idle_timeout_ms: 20, pong_timeout_ms: 20, ..Config::default() };
        let (vendor, _vendor_handle) = crate::vendor::fake::pair(1);
        let (handle, mut events) = spawn(vendor, cfg, std::sync::Arc::new(IdAllocator::new()));
        let _ready = events.recv().await.expect("connection ready event");

        let lost = events.recv().await.expect("connection lost event");
        assert!(matches!(lost.event, VendorEvent::ConnectionLost { .. }));
        handle.shutdown();
    }

    #[tokio::test]
    async fn disconnect_emits_connection_lost_and_reconnects() {
        let (vendor, vendor_handle) = crate::vendor::fake::pair(1);
        let (handle, mut events) = spawn(vendor, cfg(), std::sync::Arc::new(IdAllocator::new()));

        let _ready = events.recv().await.unwrap();
        vendor_handle.disconnect();
        let lost = events.recv().await.unwrap();
        assert!(matches!(lost.event, VendorEvent::ConnectionLost { .. }));

        vendor_handle.reconnectable();
        let ready_again = events.recv().await.unwrap();
        assert!(matches!(ready_again.event, VendorEvent::ConnectionReady { .. }));
        handle.shutdown();
    }
}
