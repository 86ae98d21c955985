// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the bridge's gateway listener and device model.
#[derive(Debug, Clone, clap::Parser)]
pub struct BridgeConfig {
    /// Host to bind the gateway TCP listener on.
    #[arg(long, default_value = "0.0.0.0", env = "HEARTH_HOST")]
    pub host: String,

    /// Port to accept gateway connections on.
    #[arg(long, default_value_t = 7417, env = "HEARTH_PORT")]
    pub port: u16,

    /// Host to bind the fulfillment HTTP surface on.
    #[arg(long, default_value = "0.0.0.0", env = "HEARTH_HTTP_HOST")]
    pub http_host: String,

    /// Port to serve the fulfillment HTTP surface on.
    #[arg(long, default_value_t = 8080, env = "HEARTH_HTTP_PORT")]
    pub http_port: u16,

    /// Deadline in milliseconds for a gateway to complete authentication
    /// after the handshake reply is sent.
    #[arg(long, default_value_t = 10_000, env = "HEARTH_AUTH_DEADLINE_MS")]
    pub auth_deadline_ms: u64,

    /// Maximum buffered (possibly partial) frame size per connection, in bytes.
    #[arg(long, default_value_t = 100 * 1024, env = "HEARTH_MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,

    /// Device liveness timeout: a device with no `device/<id>` signal for
    /// longer than this is forced `available=false`.
    #[arg(long, default_value_t = 30_000, env = "HEARTH_LIVENESS_TIMEOUT_MS")]
    pub liveness_timeout_ms: u64,

    /// Bounded capacity of each connection's outbound write queue.
    #[arg(long, default_value_t = 256, env = "HEARTH_WRITE_QUEUE_CAPACITY")]
    pub write_queue_capacity: usize,
}

impl BridgeConfig {
    pub fn auth_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.auth_deadline_ms)
    }

    pub fn liveness_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Watchdog sweep interval: `min(timeout/3, 10s)`.
    pub fn watchdog_interval(&self) -> std::time::Duration {
        let third = self.liveness_timeout_ms / 3;
        std::time::Duration::from_millis(third.clamp(1, 10_000))
    }
}
