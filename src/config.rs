// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration.

use std::time::Duration;

/// Configuration for the bridge process.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "marketbridge", version)]
pub struct Config {
    /// Upstream brokerage host.
    #[arg(long, default_value = "127.0.0.1", env = "MARKETBRIDGE_UPSTREAM_HOST")]
    pub upstream_host: String,

    /// Upstream brokerage port.
    #[arg(long, default_value_t = 7497, env = "MARKETBRIDGE_UPSTREAM_PORT")]
    pub upstream_port: u16,

    /// WebSocket listen host.
    #[arg(long, default_value = "0.0.0.0", env = "MARKETBRIDGE_WS_HOST")]
    pub ws_host: String,

    /// WebSocket listen port.
    #[arg(long, default_value_t = 8765, env = "MARKETBRIDGE_WS_PORT")]
    pub ws_port: u16,

    /// Milliseconds of upstream inbound silence before a heartbeat ping is sent.
    #[arg(long, default_value_t = 30_000, env = "MARKETBRIDGE_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Milliseconds to wait for a heartbeat pong before forcing a reconnect.
    #[arg(long, default_value_t = 10_000, env = "MARKETBRIDGE_PONG_TIMEOUT_MS")]
    pub pong_timeout_ms: u64,

    /// Base reconnect backoff in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "MARKETBRIDGE_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Reconnect backoff cap in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "MARKETBRIDGE_RECONNECT_CAP_MS")]
    pub reconnect_cap_ms: u64,

    /// Optional bound on reconnect attempts before the session trips to `Failed`.
    #[arg(long, env = "MARKETBRIDGE_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Per-client outbound queue capacity, in messages.
    #[arg(long, default_value_t = 1024, env = "MARKETBRIDGE_CLIENT_QUEUE_CAPACITY")]
    pub client_queue_capacity: usize,

    /// Hours a terminal order is retained before garbage collection.
    #[arg(long, default_value_t = 24, env = "MARKETBRIDGE_ORDER_RETENTION_HOURS")]
    pub order_retention_hours: u64,

    /// Order GC sweep interval in seconds.
    #[arg(long, default_value_t = 60, env = "MARKETBRIDGE_ORDER_GC_INTERVAL_SECS")]
    pub order_gc_interval_secs: u64,

    /// Deadline for a single outbound upstream send, in seconds.
    #[arg(long, default_value_t = 5, env = "MARKETBRIDGE_SEND_DEADLINE_SECS")]
    pub send_deadline_secs: u64,

    /// Maximum inbound WebSocket frame size, in bytes.
    #[arg(long, default_value_t = 256 * 1024, env = "MARKETBRIDGE_MAX_WS_MESSAGE_BYTES")]
    pub max_ws_message_bytes: usize,

    /// Unsubscribe-acknowledgement timeout in seconds, before forcing Cancelled.
    #[arg(long, default_value_t = 5, env = "MARKETBRIDGE_UNSUBSCRIBE_TIMEOUT_SECS")]
    pub unsubscribe_timeout_secs: u64,

    /// Client liveness ping interval in seconds.
    #[arg(long, default_value_t = 30, env = "MARKETBRIDGE_CLIENT_PING_SECS")]
    pub client_ping_secs: u64,

    /// Consecutive missed pongs before a client is considered dead.
    #[arg(long, default_value_t = 3, env = "MARKETBRIDGE_CLIENT_MAX_MISSED_PONGS")]
    pub client_max_missed_pongs: u32,

    /// Grace period before forcibly closing clients during shutdown, in seconds.
    #[arg(long, default_value_t = 2, env = "MARKETBRIDGE_SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: u64,

    /// Use the in-process fake vendor backend instead of a real upstream connection.
    #[arg(long, env = "MARKETBRIDGE_FAKE_UPSTREAM")]
    pub fake_upstream: bool,
}

impl Config {
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    pub fn order_retention(&self) -> Duration {
        Duration::from_secs(self.order_retention_hours * 3600)
    }

    pub fn order_gc_interval(&self) -> Duration {
        Duration::from_secs(self.order_gc_interval_secs)
    }

    pub fn send_deadline(&self) -> Duration {
        Duration::from_secs(self.send_deadline_secs)
    }

    pub fn unsubscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.unsubscribe_timeout_secs)
    }

    pub fn client_ping_interval(&self) -> Duration {
        Duration::from_secs(self.client_ping_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_host: "127.0.0.1".to_owned(),
            upstream_port: 7497,
            ws_host: "127.0.0.1".to_owned(),
            ws_port: 0,
            idle_timeout_ms: 30_000,
            pong_timeout_ms: 10_000,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: None,
            client_queue_capacity: 1024,
            order_retention_hours: 24,
            order_gc_interval_secs: 60,
            send_deadline_secs: 5,
            max_ws_message_bytes: 256 * 1024,
            unsubscribe_timeout_secs: 5,
            client_ping_secs: 30,
            client_max_missed_pongs: 3,
            shutdown_grace_secs: 2,
            fake_upstream: true,
        }
    }
}
