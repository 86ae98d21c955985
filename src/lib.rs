// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hearthbridge: cloud bridge between a voice-assistant fulfillment backend
//! and per-user smart-home gateways connected over a long-lived TCP session.

pub mod config;
pub mod directory;
pub mod error;
pub mod fulfillment;
pub mod http;
pub mod ids;
pub mod listener;
pub mod protocol;
pub mod repository;
pub mod state;
pub mod translate;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::repository::spawn_watchdog;
use crate::state::BridgeState;

/// Run the bridge until shutdown: the gateway TCP listener, the liveness
/// watchdog, and the fulfillment HTTP surface all run concurrently and
/// share one `CancellationToken`.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(BridgeState::new(config.clone(), shutdown.clone()));

    spawn_watchdog(
        Arc::clone(&state.repository),
        config.watchdog_interval(),
        shutdown.clone(),
    );

    let gateway_task = tokio::spawn(listener::spawn_listener(
        config.clone(),
        Arc::clone(&state.directory),
        Arc::clone(&state.repository),
        shutdown.clone(),
    ));

    let http_addr = format!("{}:{}", config.http_host, config.http_port);
    let http_listener = TcpListener::bind(&http_addr).await?;
    tracing::info!(addr = %http_addr, "fulfillment HTTP surface listening");
    let router = http::build_router(Arc::clone(&state));
    let http_shutdown = shutdown.clone();
    axum::serve(http_listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    gateway_task.await??;
    Ok(())
}
