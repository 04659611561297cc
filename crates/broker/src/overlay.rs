// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The embedded overlay-network node, consumed only through the narrow
//! seam spec.md asks for: "bind a listening socket for me" and "who is
//! the peer at this remote address". The overlay node itself is an
//! external collaborator (spec.md §1); this module defines that seam as
//! an [`OverlayNode`] trait and ships one concrete, intentionally thin
//! adapter, [`TailscaleOverlay`], that shells out to a `tailscale`/
//! `tailscaled` pair already present on the host — the pattern
//! `Tonksthebear-trybotster`'s `tailscale.rs` uses to embed a tailnet,
//! re-expressed against `tokio::process` instead of blocking `std::process`
//! since every other subprocess in this crate is managed asynchronously
//! (see `src/session.rs`).

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::Mutex;

/// The seam between the broker and whatever embeds the private overlay
/// network. Implementors own one or more private network interfaces and
/// answer two questions: "bind me a listening socket" and "who is the
/// peer at this remote address".
pub trait OverlayNode: Send + Sync {
    /// Bind a TCP listener reachable over the overlay network on `port`.
    fn bind(&self, port: u16) -> BoxFuture<'_, anyhow::Result<TcpListener>>;

    /// Resolve the stable identity of the peer connecting from `addr`.
    fn whois(&self, addr: SocketAddr) -> BoxFuture<'_, anyhow::Result<String>>;

    /// Close the overlay node's underlying process/connection. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Configuration needed to bring up the Tailscale adapter, mirroring
/// spec.md §6's `ts_*` options.
#[derive(Debug, Clone)]
pub struct TailscaleConfig {
    pub auth_key: String,
    pub hostname: String,
    pub state_dir: std::path::PathBuf,
    /// Override for the `tailscale`/`tailscaled` binaries, defaulting to
    /// whatever is on `$PATH`. Split in two since `tailscaled` is the
    /// daemon and `tailscale` is the CLI used to drive it.
    pub tailscale_bin: String,
    pub tailscaled_bin: String,
}

/// Adapter that supervises a `tailscaled` daemon as a child process and
/// drives it with the `tailscale` CLI. Not a tsnet reimplementation: it is
/// exactly the listener + whois seam [`OverlayNode`] asks for, nothing
/// more.
pub struct TailscaleOverlay {
    config: TailscaleConfig,
    daemon: Mutex<Option<tokio::process::Child>>,
}

impl TailscaleOverlay {
    /// Spawn `tailscaled` against the configured state directory and bring
    /// the node up on the tailnet with `tailscale up`. Returns once `up`
    /// completes; it is the caller's job to retry start-up on failure.
    pub async fn start(config: TailscaleConfig) -> anyhow::Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.state_dir).await.ok();

        let daemon = Command::new(&config.tailscaled_bin)
            .arg("--state")
            .arg(&config.state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let overlay = Arc::new(Self { config: config.clone(), daemon: Mutex::new(Some(daemon)) });

        let status = Command::new(&config.tailscale_bin)
            .args([
                "up",
                "--authkey",
                &config.auth_key,
                "--hostname",
                &config.hostname,
                "--accept-routes",
            ])
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tailscale up exited with {status}");
        }

        Ok(overlay)
    }

    async fn tailnet_ip(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.config.tailscale_bin).args(["ip", "-4"]).output().await?;
        if !output.status.success() {
            anyhow::bail!("tailscale ip failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl OverlayNode for TailscaleOverlay {
    fn bind(&self, port: u16) -> BoxFuture<'_, anyhow::Result<TcpListener>> {
        Box::pin(async move {
            let ip = self.tailnet_ip().await?;
            let listener = TcpListener::bind((ip.as_str(), port)).await?;
            Ok(listener)
        })
    }

    fn whois(&self, addr: SocketAddr) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move {
            let output = Command::new(&self.config.tailscale_bin)
                .args(["whois", "--json", &addr.ip().to_string()])
                .output()
                .await?;
            if !output.status.success() {
                anyhow::bail!("tailscale whois failed: {}", String::from_utf8_lossy(&output.stderr));
            }
            let value: Value = serde_json::from_slice(&output.stdout)?;
            parse_whois_identity(&value)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut child) = self.daemon.lock().await.take() {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        })
    }
}

/// Extract the peer's stable node identifier from `tailscale whois --json`
/// output, falling back to the numeric node id in decimal when no stable
/// id is present.
fn parse_whois_identity(value: &Value) -> anyhow::Result<String> {
    let node = value.get("Node").ok_or_else(|| anyhow::anyhow!("whois response missing Node"))?;
    if let Some(stable_id) = node.get("StableID").and_then(Value::as_str) {
        if !stable_id.is_empty() {
            return Ok(stable_id.to_owned());
        }
    }
    if let Some(id) = node.get("ID").and_then(Value::as_u64) {
        return Ok(id.to_string());
    }
    if let Some(id) = node.get("ID").and_then(Value::as_i64) {
        return Ok(id.to_string());
    }
    anyhow::bail!("whois response had neither StableID nor a numeric ID")
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod tests;
