//! Downstream sync channel: correlated request/response over a subprocess.
//!
//! Protocol: one JSON object per line on the child's stdin/stdout. Every
//! outbound message carries a monotonically increasing `id`; inbound
//! messages resolve the matching pending entry. Lines that do not parse as
//! JSON are treated as non-protocol diagnostic output and skipped. Messages
//! with an unknown id are dropped, which also covers responses arriving
//! after their request timed out.
//!
//! Lifecycle: the child is spawned lazily on first use. When it crashes or
//! closes stdout, the handle is cleared so the next call respawns it.
//! Requests in flight at crash time are deliberately NOT failed eagerly —
//! they expire through their own timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No response arrived within the per-request deadline. The channel
    /// stays usable for other requests.
    #[error("request '{method}' timed out")]
    Timeout { method: String },

    /// The channel was stopped or the child's stdin went away mid-write.
    #[error("sync channel closed")]
    ChannelClosed,

    /// The subprocess could not be started.
    #[error("failed to spawn bridge process: {0}")]
    Spawn(String),

    /// The service answered with an error object.
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

// ─── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ─── Pending Map ──────────────────────────────────────────────────

type PendingMap = StdMutex<HashMap<u64, oneshot::Sender<Result<Value, BridgeError>>>>;

/// What the reader did with one inbound line (observable for tests/logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineDisposition {
    /// Resolved a pending request.
    Resolved,
    /// Valid JSON with an id nobody is waiting for (e.g. a late response).
    UnknownId,
    /// Valid JSON without an id — a notification we don't consume.
    Notification,
    /// Not JSON at all: diagnostic output from the child.
    Diagnostic,
}

/// Route one inbound line against the pending map.
fn dispatch_line(line: &str, pending: &PendingMap) -> LineDisposition {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineDisposition::Diagnostic;
    }
    let Ok(msg) = serde_json::from_str::<Value>(trimmed) else {
        return LineDisposition::Diagnostic;
    };
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        return LineDisposition::Notification;
    };
    let Some(tx) = pending.lock().expect("pending map poisoned").remove(&id) else {
        return LineDisposition::UnknownId;
    };

    let outcome = match msg.get("error") {
        Some(err) => Err(BridgeError::Service {
            code: err["code"].as_i64().unwrap_or(-1),
            message: err["message"].as_str().unwrap_or("unknown error").to_string(),
        }),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    };
    // The caller may have timed out between remove and send; that's fine.
    let _ = tx.send(outcome);
    LineDisposition::Resolved
}

// ─── Channel ──────────────────────────────────────────────────────

struct ProcessState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Bumped on every spawn so a stale reader can't clear a fresh handle.
    generation: u64,
}

struct Inner {
    config: BridgeConfig,
    state: Mutex<ProcessState>,
    pending: PendingMap,
    next_id: AtomicU64,
}

/// Request/response bridge to the synthesis subprocess. Cheap to clone.
#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<Inner>,
}

impl SyncChannel {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ProcessState {
                    child: None,
                    stdin: None,
                    generation: 0,
                }),
                pending: StdMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Eagerly spawn the subprocess. Optional — `send_request` spawns lazily.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_spawned(&mut state)?;
        Ok(())
    }

    /// Kill the subprocess and fail all pending requests with
    /// [`BridgeError::ChannelClosed`] (a clean stop should not leave callers
    /// hanging until their deadlines).
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.stdin = None;
        if let Some(mut child) = state.child.take() {
            let _ = child.kill().await;
        }
        state.generation += 1;
        drop(state);

        let drained: Vec<_> = {
            let mut pending = self.inner.pending.lock().expect("pending map poisoned");
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(BridgeError::ChannelClosed));
        }
    }

    /// Number of outstanding requests.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().expect("pending map poisoned").len()
    }

    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.send_request_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        if let Err(e) = self.write_line(line.as_bytes()).await {
            self.inner
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a value: the channel was torn down.
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                self.inner
                    .pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&id);
                tracing::warn!(method, id, "bridge request timed out");
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Write one framed request, respawning once if the child is gone.
    async fn write_line(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        let mut state = self.inner.state.lock().await;

        // Reap a child that exited since the last call.
        if let Some(child) = state.child.as_mut() {
            if !matches!(child.try_wait(), Ok(None)) {
                tracing::warn!("bridge process exited, respawning on this call");
                state.child = None;
                state.stdin = None;
            }
        }

        self.ensure_spawned(&mut state)?;
        let stdin = state.stdin.as_mut().ok_or(BridgeError::ChannelClosed)?;
        if write_all_flush(stdin, bytes).await.is_ok() {
            return Ok(());
        }

        // Broken pipe: clear the dead handle and retry once on a fresh child.
        state.child = None;
        state.stdin = None;
        self.ensure_spawned(&mut state)?;
        let stdin = state.stdin.as_mut().ok_or(BridgeError::ChannelClosed)?;
        write_all_flush(stdin, bytes)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    fn ensure_spawned(&self, state: &mut ProcessState) -> Result<(), BridgeError> {
        if state.child.is_some() {
            return Ok(());
        }
        let config = &self.inner.config;
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("child stdout not piped".into()))?;

        state.generation += 1;
        state.child = Some(child);
        state.stdin = Some(stdin);

        tracing::info!(
            program = %config.program,
            generation = state.generation,
            "bridge process spawned"
        );

        let inner = Arc::clone(&self.inner);
        let generation = state.generation;
        tokio::spawn(read_loop(inner, stdout, generation));
        Ok(())
    }
}

async fn write_all_flush(stdin: &mut ChildStdin, bytes: &[u8]) -> std::io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

/// Reader task: routes child stdout lines to pending requests until EOF.
/// On EOF the process handle is cleared (if still this generation) so the
/// next call respawns. Pending entries are left to their timeouts.
async fn read_loop(inner: Arc<Inner>, stdout: tokio::process::ChildStdout, generation: u64) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match dispatch_line(&line, &inner.pending) {
                LineDisposition::Resolved => {}
                LineDisposition::UnknownId => {
                    tracing::debug!("dropping response for unknown or expired id");
                }
                LineDisposition::Notification => {
                    tracing::debug!("ignoring unsolicited bridge notification");
                }
                LineDisposition::Diagnostic => {
                    tracing::trace!("skipping non-protocol bridge output");
                }
            },
            Ok(None) | Err(_) => break,
        }
    }

    let mut state = inner.state.lock().await;
    if state.generation == generation {
        tracing::warn!(generation, "bridge process closed its stdout");
        state.child = None;
        state.stdin = None;
    }
}

// ─── Tests ────────────────────────────────────────────────────────
