// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps a stable client identifier to a `(Hub, Session?)` pair; lazily
//! spawns a session on first request, enforces the global concurrency
//! cap, and sweeps idle sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::event_hub::EventHub;
use crate::session::ChildSession;

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(10 * 60);
const CHILD_SUBCOMMAND: &str = "app-server";

/// Per-client bookkeeping: exclusively owns its hub and, when present, its
/// session. `entry_lock` serializes `ensure` against the idle sweeper for
/// this one client without ever being held across spawn or blocking I/O.
struct ClientEntry {
    hub: Arc<EventHub>,
    session: RwLock<Option<Arc<ChildSession>>>,
    has_ever_run: AtomicBool,
    entry_lock: Mutex<()>,
}

impl ClientEntry {
    fn new(hub_capacity: usize) -> Self {
        Self {
            hub: EventHub::new(hub_capacity),
            session: RwLock::new(None),
            has_ever_run: AtomicBool::new(false),
            entry_lock: Mutex::new(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub running: bool,
    pub last_activity_ms: Option<u64>,
    pub last_event_id: u64,
    pub has_ever_run: bool,
}

pub struct SessionManager {
    entries: RwLock<HashMap<String, Arc<ClientEntry>>>,
    live_sessions: Arc<AtomicUsize>,
    cap: usize,
    hub_capacity: usize,
    idle_ttl: Duration,
    codex_bin: String,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        codex_bin: String,
        cap: usize,
        hub_capacity: usize,
        idle_ttl: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            live_sessions: Arc::new(AtomicUsize::new(0)),
            cap,
            hub_capacity,
            idle_ttl: idle_ttl.unwrap_or(DEFAULT_IDLE_TTL),
            codex_bin,
            shutdown,
        })
    }

    /// Returns a live session for `client_key`, spawning one if necessary.
    pub async fn ensure(self: &Arc<Self>, client_key: &str) -> Result<Arc<ChildSession>, ErrorCode> {
        if client_key.is_empty() {
            return Err(ErrorCode::BadRequest);
        }

        let entry = self.entry_for(client_key).await;
        let _guard = entry.entry_lock.lock().await;

        if let Some(session) = entry.session.read().await.as_ref() {
            if !session.is_dead() {
                return Ok(Arc::clone(session));
            }
        }

        self.admit()?;

        let live_sessions = Arc::clone(&self.live_sessions);
        let on_dead: Box<dyn FnOnce() + Send> =
            Box::new(move || { live_sessions.fetch_sub(1, Ordering::SeqCst); });

        let args = vec![CHILD_SUBCOMMAND.to_owned()];
        match ChildSession::spawn(&self.codex_bin, &args, Arc::clone(&entry.hub), on_dead).await {
            Ok(session) => {
                *entry.session.write().await = Some(Arc::clone(&session));
                entry.has_ever_run.store(true, Ordering::Release);
                Ok(session)
            }
            Err(err) => {
                self.live_sessions.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(client = %client_key, %err, "failed to spawn child session");
                Err(ErrorCode::SpawnFailed)
            }
        }
    }

    /// Returns the client's hub, creating the entry if needed. Never
    /// spawns a child: stream subscribers may attach before any request
    /// has ever been made.
    pub async fn events(&self, client_key: &str) -> Arc<EventHub> {
        Arc::clone(&self.entry_for(client_key).await.hub)
    }

    pub async fn snapshot(&self, client_key: &str) -> Snapshot {
        let entry = self.entry_for(client_key).await;
        let session = entry.session.read().await.clone();
        let running = session.as_ref().map(|s| !s.is_dead()).unwrap_or(false);
        let last_activity_ms = session.as_ref().map(|s| epoch_ms().saturating_sub(s.idle_for().as_millis() as u64));
        Snapshot {
            running,
            last_activity_ms,
            last_event_id: entry.hub.high_water_mark(),
            has_ever_run: entry.has_ever_run.load(Ordering::Acquire),
        }
    }

    pub fn running_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Atomically reserve one admission slot, failing closed if that
    /// would exceed the cap. The caller must release the slot (via the
    /// session's `on_dead` callback) if spawning subsequently fails.
    fn admit(&self) -> Result<(), ErrorCode> {
        loop {
            let current = self.live_sessions.load(Ordering::SeqCst);
            if current >= self.cap {
                return Err(ErrorCode::MaxSessions);
            }
            if self
                .live_sessions
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    async fn entry_for(&self, client_key: &str) -> Arc<ClientEntry> {
        if let Some(entry) = self.entries.read().await.get(client_key) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(client_key) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(ClientEntry::new(self.hub_capacity));
        entries.insert(client_key.to_owned(), Arc::clone(&entry));
        entry
    }

    /// Background tick: kill any session idle past the TTL, leaving its
    /// hub intact so reconnecting subscribers still see recent history.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                manager.sweep_idle().await;
            }
        })
    }

    async fn sweep_idle(&self) {
        let entries: Vec<Arc<ClientEntry>> = self.entries.read().await.values().cloned().collect();
        for entry in entries {
            let _guard = entry.entry_lock.lock().await;
            let session = entry.session.read().await.clone();
            let Some(session) = session else { continue };
            if !session.is_dead() && session.idle_for() >= self.idle_ttl {
                tracing::info!(pid = session.pid(), "idle sweep: killing session");
                session.kill();
                *entry.session.write().await = None;
            }
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
