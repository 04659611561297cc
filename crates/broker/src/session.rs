// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wraps one spawned child process: owns the stdin write path, parses the
//! child's line-delimited stdout, correlates responses with pending
//! requests, and publishes every output line into the client's event hub.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};

use crate::error::ErrorCode;
use crate::event_hub::EventHub;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
const STDOUT_EVENT_KIND: &str = "child_stdout";

type OnDead = Box<dyn FnOnce() + Send + 'static>;
/// Pending requests are kept behind a plain sync mutex rather than
/// `tokio::sync::Mutex`: `mark_dead` must be able to clear the table
/// unconditionally (never skip on contention), so a racing
/// `send_rpc`/reader holding the lock for a few instructions can't leave a
/// pending sink un-closed.
type PendingTable = HashMap<String, oneshot::Sender<Bytes>>;

/// One spawned child process plus its correlation table. At most one is
/// live per client at a time; a dead session is never resurrected in
/// place, a fresh one is created on next demand.
pub struct ChildSession {
    pid: u32,
    stdin: Mutex<ChildStdin>,
    pending: SyncMutex<PendingTable>,
    dead: AtomicBool,
    dead_notify: Notify,
    last_activity_ms: AtomicU64,
    initialize_cache: RwLock<Option<Bytes>>,
    on_dead: SyncMutex<Option<OnDead>>,
}

impl ChildSession {
    /// Spawn `program` with `args`, piped stdin/stdout and inherited
    /// stderr, and start the reader and waiter tasks. `on_dead` runs
    /// exactly once, the first time the session transitions to dead.
    pub async fn spawn(
        program: &str,
        args: &[String],
        hub: Arc<EventHub>,
        on_dead: OnDead,
    ) -> anyhow::Result<Arc<Self>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().ok_or_else(|| anyhow::anyhow!("spawned child has no pid"))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("child stdin missing"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("child stdout missing"))?;

        let session = Arc::new(Self {
            pid,
            stdin: Mutex::new(stdin),
            pending: SyncMutex::new(HashMap::new()),
            dead: AtomicBool::new(false),
            dead_notify: Notify::new(),
            last_activity_ms: AtomicU64::new(epoch_ms()),
            initialize_cache: RwLock::new(None),
            on_dead: SyncMutex::new(Some(on_dead)),
        });

        tokio::spawn(reader_loop(Arc::clone(&session), hub, BufReader::new(stdout).lines()));
        tokio::spawn(waiter_loop(Arc::clone(&session), child));

        Ok(session)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn idle_for(&self) -> Duration {
        let elapsed_ms = epoch_ms().saturating_sub(self.last_activity_ms.load(Ordering::Relaxed));
        Duration::from_millis(elapsed_ms)
    }

    /// Send one JSON-RPC envelope down stdin and await its response, per
    /// the contract in spec.md ยง4.2: NotRunning check, initialize-cache
    /// short-circuit, request/notification/response classification, and a
    /// 30 s-or-caller-deadline wait.
    pub async fn send_rpc(
        &self,
        envelope: Value,
        deadline: Option<Duration>,
    ) -> Result<Bytes, ErrorCode> {
        if self.is_dead() {
            return Err(ErrorCode::NotRunning);
        }

        let method = envelope.get("method").and_then(Value::as_str).map(str::to_owned);
        let id_value = envelope.get("id").cloned();

        if method.as_deref() == Some("initialize") {
            if let Some(ref id) = id_value {
                if let Some(cached) = self.initialize_cache.read().await.clone() {
                    return Ok(synthesize_initialize_response(id, &cached));
                }
            }
        }

        let canonical_id = id_value.as_ref().and_then(canonicalize_id);

        let mut line = serde_json::to_vec(&envelope).map_err(|_| ErrorCode::BadRequest)?;
        line.push(b'\n');

        // Only a named method with a canonical id is a correlatable request;
        // everything else (notifications, bare responses) gets no pending slot.
        let pending_slot = match (&method, &canonical_id) {
            (Some(_), Some(id)) => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().insert(id.clone(), tx);
                Some((id.clone(), rx))
            }
            _ => None,
        };

        {
            let mut stdin = self.stdin.lock().await;
            let write_result = match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = write_result {
                tracing::warn!(pid = self.pid, %err, "stdin write failed");
                if let Some((id, _)) = &pending_slot {
                    self.pending.lock().remove(id);
                }
                self.mark_dead();
                return Err(ErrorCode::RPCFailed);
            }
        }
        self.last_activity_ms.store(epoch_ms(), Ordering::Relaxed);

        let Some((id_key, rx)) = pending_slot else {
            // Notification or response-shaped envelope: constant ack.
            return Ok(Bytes::from_static(br#"{"jsonrpc":"2.0","result":null}"#));
        };
        let wait = deadline.unwrap_or(DEFAULT_DEADLINE);

        tokio::select! {
            result = rx => {
                match result {
                    Ok(bytes) => {
                        if method.as_deref() == Some("initialize") {
                            self.maybe_cache_initialize(&bytes).await;
                        }
                        Ok(bytes)
                    }
                    Err(_) => Err(ErrorCode::NotRunning),
                }
            }
            // Belt-and-suspenders alongside the unconditional clear in
            // `mark_dead`: a waiter already parked in this select wakes the
            // instant the session dies instead of waiting for its sink to be
            // dropped, per spec.md ยง4.2 step 5(b).
            _ = self.dead_notify.notified() => {
                self.pending.lock().remove(&id_key);
                Err(ErrorCode::NotRunning)
            }
            _ = tokio::time::sleep(wait) => {
                self.pending.lock().remove(&id_key);
                Err(ErrorCode::Timeout)
            }
        }
    }

    async fn maybe_cache_initialize(&self, bytes: &Bytes) {
        let Ok(value) = serde_json::from_slice::<Value>(bytes) else { return };
        if value.get("error").is_some() {
            return;
        }
        let Some(result) = value.get("result") else { return };
        if result.is_null() {
            return;
        }
        if let Ok(encoded) = serde_json::to_vec(result) {
            *self.initialize_cache.write().await = Some(Bytes::from(encoded));
        }
    }

    /// Send a termination signal to the child. Idempotent and does not
    /// wait for the process to actually exit; `waiter_loop` observes the
    /// exit and is a no-op once `mark_dead` has already run.
    pub fn kill(&self) {
        if !self.is_dead() {
            let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM);
        }
        self.mark_dead();
    }

    /// Idempotent: sets the dead flag once, fires the dead notification,
    /// closes every pending sink (waiters observe `NotRunning`), and runs
    /// the "on dead" callback exactly once.
    fn mark_dead(&self) {
        if self.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dead_notify.notify_waiters();
        // Dropping the senders is what makes pending send_rpc calls waiting
        // on `rx` observe NotRunning instead of hanging until their timeout.
        // Unconditional lock, not try_lock: a racing send_rpc/reader holding
        // this for a few instructions must never cause this clear to skip.
        self.pending.lock().clear();
        let callback = {
            let mut slot = self.on_dead.lock();
            slot.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Canonicalize a JSON `id` to a string key: strings pass through, numbers
/// are formatted in their shortest round-trip decimal form (which is
/// exactly what `serde_json::Number`'s `Display` impl already produces).
/// Any other shape (object, array, bool, null) is never a valid id.
fn canonicalize_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn synthesize_initialize_response(caller_id: &Value, cached_result: &Bytes) -> Bytes {
    let result: Value = serde_json::from_slice(cached_result).unwrap_or(Value::Null);
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": caller_id,
        "result": result,
    });
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

async fn reader_loop(
    session: Arc<ChildSession>,
    hub: Arc<EventHub>,
    mut lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let payload = Bytes::copy_from_slice(line.as_bytes());
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    if let Some(id_value) = value.get("id") {
                        if let Some(key) = canonicalize_id(id_value) {
                            if let Some(tx) = session.pending.lock().remove(&key) {
                                let _ = tx.send(payload.clone());
                            }
                        }
                    }
                }
                hub.publish(STDOUT_EVENT_KIND, payload);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(pid = session.pid, %err, "stdout read failed");
                break;
            }
        }
    }
}

async fn waiter_loop(session: Arc<ChildSession>, mut child: tokio::process::Child) {
    let status = child.wait().await;
    match status {
        Ok(status) => tracing::info!(pid = session.pid, %status, "child exited"),
        Err(err) => tracing::warn!(pid = session.pid, %err, "wait on child failed"),
    }
    session.mark_dead();
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
