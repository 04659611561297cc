// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Climate: a per-client subprocess broker that fronts a locally-spawned
//! child process exposing a line-delimited JSON-RPC stdio protocol, and
//! exposes that process to remote clients as an HTTP bridge.

pub mod config;
pub mod error;
pub mod event;
pub mod event_hub;
pub mod http;
pub mod identity;
pub mod manager;
pub mod overlay;
pub mod session;
pub mod sse;
pub mod supervisor;

use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;

/// Run the broker until a termination signal arrives. First SIGTERM/SIGINT
/// triggers a graceful shutdown (the supervisor's 5 s grace period); a
/// second one forces an immediate exit.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    supervisor::serve(config, shutdown).await
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        wait_for_signal(&mut sigterm, &mut sigint).await;
        tracing::info!("shutdown signal received, draining");
        shutdown.cancel();

        wait_for_signal(&mut sigterm, &mut sigint).await;
        tracing::warn!("second shutdown signal received, forcing exit");
        std::process::exit(130);
    });
}

async fn wait_for_signal(
    sigterm: &mut Option<tokio::signal::unix::Signal>,
    sigint: &mut Option<tokio::signal::unix::Signal>,
) {
    tokio::select! {
        _ = async {
            match sigterm { Some(s) => s.recv().await, None => std::future::pending().await }
        } => {}
        _ = async {
            match sigint { Some(s) => s.recv().await, None => std::future::pending().await }
        } => {}
    }
}
