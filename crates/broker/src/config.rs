// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration loader: explicit flags, then an optional TOML file, then
//! built-in defaults (spec.md §6). Each field is resolved independently —
//! a flag present for one field never suppresses a file-sourced value for
//! another — so the precedence rule stays auditable in one function rather
//! than relying on a merge-semantics crate (the teacher's own `Config`
//! in `crates/cli/src/config.rs` has no file layer at all; this is
//! supplemented from `paulirotta-ahma_mcp`'s workspace, which carries
//! `toml` for exactly this purpose).

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

const DEFAULT_CODEX_BIN: &str = "codex";
const DEFAULT_BIND_IP: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4500;
const DEFAULT_TS_HOSTNAME: &str = "climate-server";
const DEFAULT_TS_STATE_DIR: &str = "~/.climate/tsnet";
const DEFAULT_MAX_SESSIONS: usize = 16;
const DEFAULT_HUB_CAPACITY: usize = 1024;
const DEFAULT_IDLE_TTL_SECS: u64 = 10 * 60;

/// Command-line flags. Every field is optional here even where the
/// resolved [`BrokerConfig`] field has a default, so presence/absence can
/// be distinguished from the file layer and built-in defaults.
#[derive(Debug, Parser, Default)]
#[command(name = "climate", version, about = "Per-client subprocess broker")]
pub struct Flags {
    /// Path to a TOML configuration file.
    #[arg(long, env = "CLIMATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Child binary path.
    #[arg(long, env = "CLIMATE_CODEX_BIN")]
    pub codex_bin: Option<String>,

    /// Loopback listener bind address.
    #[arg(long, env = "CLIMATE_BIND_IP")]
    pub bind_ip: Option<String>,

    /// Loopback listener port.
    #[arg(long, env = "CLIMATE_PORT")]
    pub port: Option<u16>,

    /// Tailnet auth key; presence enables the overlay listener.
    #[arg(long, env = "CLIMATE_TS_AUTH_KEY")]
    pub ts_auth_key: Option<String>,

    /// Hostname advertised to the overlay.
    #[arg(long, env = "CLIMATE_TS_HOSTNAME")]
    pub ts_hostname: Option<String>,

    /// Overlay node persistent state directory.
    #[arg(long, env = "CLIMATE_TS_STATE_DIR")]
    pub ts_state_dir: Option<PathBuf>,

    /// Maximum number of concurrently live child sessions.
    #[arg(long, env = "CLIMATE_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Per-client event hub ring buffer capacity (minimum 16).
    #[arg(long, env = "CLIMATE_HUB_CAPACITY")]
    pub hub_capacity: Option<usize>,

    /// Seconds of inactivity before the idle sweeper kills a session.
    #[arg(long, env = "CLIMATE_IDLE_TTL_SECS")]
    pub idle_ttl_secs: Option<u64>,
}

/// The same fields as [`Flags`], as they may appear in a TOML document.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    codex_bin: Option<String>,
    bind_ip: Option<String>,
    port: Option<u16>,
    ts_auth_key: Option<String>,
    ts_hostname: Option<String>,
    ts_state_dir: Option<PathBuf>,
    max_sessions: Option<usize>,
    hub_capacity: Option<usize>,
    idle_ttl_secs: Option<u64>,
}

/// Fully-resolved configuration, with every field defaulted.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub codex_bin: String,
    pub bind_ip: String,
    pub port: u16,
    pub ts_auth_key: Option<String>,
    pub ts_hostname: String,
    pub ts_state_dir: PathBuf,
    /// Open Question (spec.md §9) resolved: the ring capacity and
    /// admission cap are configuration-driven rather than hardcoded
    /// constants, each independently defaulted like every other field.
    pub max_sessions: usize,
    pub hub_capacity: usize,
    pub idle_ttl_secs: u64,
}

impl BrokerConfig {
    /// Resolve flags, an optional config file, and built-in defaults, in
    /// that precedence order, field by field.
    pub fn resolve(flags: Flags) -> anyhow::Result<Self> {
        let file = match &flags.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        Ok(Self {
            codex_bin: flags
                .codex_bin
                .or(file.codex_bin)
                .unwrap_or_else(|| DEFAULT_CODEX_BIN.to_owned()),
            bind_ip: flags.bind_ip.or(file.bind_ip).unwrap_or_else(|| DEFAULT_BIND_IP.to_owned()),
            port: flags.port.or(file.port).unwrap_or(DEFAULT_PORT),
            ts_auth_key: flags.ts_auth_key.or(file.ts_auth_key),
            ts_hostname: flags
                .ts_hostname
                .or(file.ts_hostname)
                .unwrap_or_else(|| DEFAULT_TS_HOSTNAME.to_owned()),
            ts_state_dir: expand_home(
                flags
                    .ts_state_dir
                    .or(file.ts_state_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TS_STATE_DIR)),
            ),
            max_sessions: flags
                .max_sessions
                .or(file.max_sessions)
                .unwrap_or(DEFAULT_MAX_SESSIONS),
            hub_capacity: flags
                .hub_capacity
                .or(file.hub_capacity)
                .unwrap_or(DEFAULT_HUB_CAPACITY),
            idle_ttl_secs: flags
                .idle_ttl_secs
                .or(file.idle_ttl_secs)
                .unwrap_or(DEFAULT_IDLE_TTL_SECS),
        })
    }

    pub fn overlay_enabled(&self) -> bool {
        self.ts_auth_key.is_some()
    }
}

fn load_file(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("reading config file {}: {err}", path.display()))?;
    toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("parsing config file {}: {err}", path.display()))
}

/// Expand a leading `~` (or `~/...`) to the invoking user's home directory.
/// Paths without a leading `~` pass through unchanged.
fn expand_home(path: PathBuf) -> PathBuf {
    let Some(path_str) = path.to_str() else { return path };
    if path_str == "~" {
        return dirs::home_dir().unwrap_or(path);
    }
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
