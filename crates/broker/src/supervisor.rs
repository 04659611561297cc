// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binds both a loopback socket and, when configured, an overlay socket,
//! serves the same HTTP bridge on both (each with its own injected
//! identity provider), and coordinates shutdown. Grounded on the
//! teacher's `coop_mux::run` (`crates/mux/src/lib.rs`): bind, log, spawn
//! the background sweeper, `axum::serve(...).with_graceful_shutdown(...)`,
//! generalized from one listener to the spec's loopback+overlay pair.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::http::{build_router, AppState};
use crate::identity::{HeaderProvider, OverlayProvider};
use crate::manager::SessionManager;
use crate::overlay::{OverlayNode, TailscaleConfig, TailscaleOverlay};

const LOOPBACK_HEADER: &str = "X-Client-ID";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type ServeResult = std::io::Result<()>;

/// Bind both listeners and serve until `shutdown` fires or either server
/// hits a runtime I/O error (which brings down both, per spec.md §4.6).
/// Returns once both servers have drained (up to the grace period) and the
/// overlay node is closed.
pub async fn serve(config: BrokerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let idle_ttl = Duration::from_secs(config.idle_ttl_secs);
    let manager = SessionManager::new(
        config.codex_bin.clone(),
        config.max_sessions,
        config.hub_capacity,
        Some(idle_ttl),
        shutdown.clone(),
    );
    manager.spawn_idle_sweeper();

    let loopback_state = Arc::new(AppState {
        manager: Arc::clone(&manager),
        identity: Arc::new(HeaderProvider::new(LOOPBACK_HEADER)),
    });
    let loopback_addr: SocketAddr = format!("{}:{}", config.bind_ip, config.port).parse()?;
    let loopback_listener = TcpListener::bind(loopback_addr)
        .await
        .map_err(|err| anyhow::anyhow!("failed to bind loopback listener {loopback_addr}: {err}"))?;
    tracing::info!(addr = %loopback_addr, "climate listening (loopback)");
    let mut loopback_task = spawn_server(loopback_listener, loopback_state, shutdown.clone());

    let overlay: Option<Arc<TailscaleOverlay>> = if config.overlay_enabled() {
        let auth_key = config.ts_auth_key.clone().unwrap_or_default();
        Some(
            TailscaleOverlay::start(TailscaleConfig {
                auth_key,
                hostname: config.ts_hostname.clone(),
                state_dir: config.ts_state_dir.clone(),
                tailscale_bin: "tailscale".to_owned(),
                tailscaled_bin: "tailscaled".to_owned(),
            })
            .await
            .map_err(|err| anyhow::anyhow!("failed to bring up overlay listener: {err}"))?,
        )
    } else {
        None
    };

    let mut overlay_task: Option<JoinHandle<ServeResult>> = match &overlay {
        Some(overlay) => {
            let overlay_listener = overlay
                .bind(config.port)
                .await
                .map_err(|err| anyhow::anyhow!("failed to bind overlay listener: {err}"))?;
            tracing::info!(port = config.port, "climate listening (overlay)");
            let overlay_state = Arc::new(AppState {
                manager: Arc::clone(&manager),
                identity: Arc::new(OverlayProvider::new(Arc::clone(overlay))),
            });
            Some(spawn_server(overlay_listener, overlay_state, shutdown.clone()))
        }
        None => None,
    };

    let result = match &mut overlay_task {
        Some(overlay_task) => {
            tokio::select! {
                res = &mut loopback_task => labeled("loopback server", res),
                res = overlay_task => labeled("overlay server", res),
                _ = shutdown.cancelled() => Ok(()),
            }
        }
        None => {
            tokio::select! {
                res = &mut loopback_task => labeled("loopback server", res),
                _ = shutdown.cancelled() => Ok(()),
            }
        }
    };

    // Whatever ended the select — a runtime error on either server, or an
    // external shutdown request — brings down both.
    shutdown.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, loopback_task).await;
    if let Some(overlay_task) = overlay_task {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, overlay_task).await;
    }

    if let Some(overlay) = overlay {
        overlay.close().await;
    }

    result
}

fn spawn_server(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> JoinHandle<ServeResult> {
    let router = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await
    })
}

fn labeled(label: &str, res: Result<ServeResult, tokio::task::JoinError>) -> anyhow::Result<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(anyhow::anyhow!("{label} failed: {err}")),
        Err(err) => Err(anyhow::anyhow!("{label} task panicked: {err}")),
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
