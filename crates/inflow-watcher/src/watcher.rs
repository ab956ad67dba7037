//! Generic source watcher: owns a poll loop, a checkpoint, an activity-aware
//! scheduler, and failure counters.
//!
//! Lifecycle:
//! 1. `Watcher::start` checks source credentials, then spawns the loop task.
//! 2. The task runs one immediate poll, then self-schedules via its
//!    [`PollScheduler`].
//! 3. Commands (`poll_now`, `record_activity`, `stop`) arrive over an mpsc
//!    channel; item batches and errors leave over the shared
//!    [`WatcherEvent`] channel.
//!
//! Within one watcher, poll N+1 never starts before poll N settles: the loop
//! awaits each poll inline. A `stop` racing an in-flight poll wins the
//! `select!` and drops the poll future, so late results can neither write
//! state nor resurrect scheduling.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use inflow_core::client::SourceClient;
use inflow_core::error::ClientError;
use inflow_core::filter;
use inflow_core::types::{
    ChangeBatch, Item, SourceKind, WatcherConfig, WatcherEvent, WatcherStats, WatcherStatus,
};

use crate::scheduler::PollScheduler;

/// Command-channel depth. Commands are tiny and coalescable; a small buffer
/// is enough.
const COMMAND_BUFFER: usize = 16;

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ─── Commands ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    PollNow,
    RecordActivity,
    Stop,
}

// ─── Poll Outcome ─────────────────────────────────────────────────

#[derive(Debug)]
enum PollOutcome {
    Success {
        batch: ChangeBatch,
        /// True when this batch came from the one-shot full resync after a
        /// `SyncTokenInvalid`.
        resynced: bool,
    },
    Failure {
        error: ClientError,
        /// True when the checkpoint was cleared before the failing retry.
        checkpoint_reset: bool,
    },
}

/// One incremental poll against the source client.
///
/// A `SyncTokenInvalid` clears the checkpoint and triggers exactly one
/// immediate full-resync retry — not unbounded retries.
async fn poll_source(
    client: Arc<dyn SourceClient>,
    checkpoint: Option<String>,
    max_results: u32,
) -> PollOutcome {
    match client.list_changed(checkpoint.as_deref(), max_results).await {
        Ok(batch) => PollOutcome::Success {
            batch,
            resynced: false,
        },
        Err(ClientError::SyncTokenInvalid) => {
            tracing::info!("sync token rejected, retrying with a full resync");
            match client.list_changed(None, max_results).await {
                Ok(batch) => PollOutcome::Success {
                    batch,
                    resynced: true,
                },
                Err(error) => PollOutcome::Failure {
                    error,
                    checkpoint_reset: true,
                },
            }
        }
        Err(error) => PollOutcome::Failure {
            error,
            checkpoint_reset: false,
        },
    }
}

// ─── Watcher ──────────────────────────────────────────────────────

/// Entry point for starting a source watcher. See module docs.
pub struct Watcher;

impl Watcher {
    /// Check credentials and spawn the poll loop.
    ///
    /// Fails with [`ClientError::NotAuthenticated`] when the client reports
    /// invalid credentials; this is fatal only to this `start` attempt.
    pub async fn start(
        source: SourceKind,
        client: Arc<dyn SourceClient>,
        config: WatcherConfig,
        initial_checkpoint: Option<String>,
        events: mpsc::Sender<WatcherEvent>,
    ) -> Result<WatcherHandle, ClientError> {
        let auth = client.check_auth().await?;
        if !auth.authenticated {
            return Err(ClientError::NotAuthenticated(auth.error));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) =
            watch::channel(WatcherStatus::initial(source, config.poll_interval_ms));

        let scheduler = PollScheduler::new(
            config.poll_interval_ms,
            config.idle_poll_interval_ms,
            config.idle_threshold_ms,
        );

        let task = WatcherTask {
            source,
            client,
            config,
            scheduler,
            checkpoint: initial_checkpoint,
            stats: WatcherStats::default(),
            last_poll_at: None,
            current_interval_ms: 0,
            cmd_rx,
            events,
            status_tx,
        };

        tracing::info!(source = %source, "watcher started");
        let join = tokio::spawn(task.run());

        Ok(WatcherHandle {
            source,
            cmd_tx,
            status_rx,
            join,
        })
    }
}

/// Control handle for a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    source: SourceKind,
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<WatcherStatus>,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Cancel the pending timer, poll immediately, then resume scheduling.
    pub async fn poll_now(&self) {
        let _ = self.cmd_tx.send(Command::PollNow).await;
    }

    /// Record user activity. Updates the activity timestamp only; the next
    /// scheduling decision picks the interval.
    pub async fn record_activity(&self) {
        let _ = self.cmd_tx.send(Command::RecordActivity).await;
    }

    /// Stop the watcher and wait for its loop to exit. An in-flight poll is
    /// dropped; its result is discarded.
    pub async fn stop(self) {
        let _ = self.cmd_tx.send(Command::Stop).await;
        let _ = self.join.await;
    }

    /// Snapshot of the watcher's current state.
    pub fn status(&self) -> WatcherStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status_rx.borrow().running
    }

    /// Subscribe to status snapshots (published after every poll).
    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status_rx.clone()
    }
}

// ─── Poll Loop ────────────────────────────────────────────────────

struct WatcherTask {
    source: SourceKind,
    client: Arc<dyn SourceClient>,
    config: WatcherConfig,
    scheduler: PollScheduler,
    checkpoint: Option<String>,
    stats: WatcherStats,
    last_poll_at: Option<chrono::DateTime<Utc>>,
    current_interval_ms: u64,
    cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<WatcherEvent>,
    status_tx: watch::Sender<WatcherStatus>,
}

impl WatcherTask {
    async fn run(mut self) {
        self.scheduler.start();
        self.current_interval_ms = self.config.poll_interval_ms;
        self.publish_status();

        // One immediate poll on start.
        if self.poll_cycle().await.is_break() {
            return self.finish();
        }

        loop {
            self.current_interval_ms = self.scheduler.schedule_next(now_ms());
            self.publish_status();

            let sleep = tokio::time::sleep(Duration::from_millis(self.current_interval_ms));
            tokio::pin!(sleep);

            // Wait for the timer or a command. RecordActivity must not move
            // the pending fire.
            loop {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        None | Some(Command::Stop) => return self.finish(),
                        Some(Command::PollNow) => {
                            self.scheduler.cancel_pending();
                            break;
                        }
                        Some(Command::RecordActivity) => {
                            self.scheduler.record_activity(now_ms());
                            self.publish_status();
                        }
                    },
                    _ = &mut sleep => break,
                }
            }

            if self.poll_cycle().await.is_break() {
                return self.finish();
            }
        }
    }

    /// Run one poll to completion while still servicing commands.
    /// Returns `Break` when a stop arrived (the in-flight call is dropped).
    async fn poll_cycle(&mut self) -> ControlFlow<()> {
        let started = std::time::Instant::now();
        let fut = poll_source(
            Arc::clone(&self.client),
            self.checkpoint.clone(),
            self.config.max_results,
        );
        tokio::pin!(fut);

        let outcome = loop {
            tokio::select! {
                outcome = &mut fut => break outcome,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Stop) => return ControlFlow::Break(()),
                    Some(Command::RecordActivity) => {
                        self.scheduler.record_activity(now_ms());
                    }
                    // Already polling — coalesce.
                    Some(Command::PollNow) => {}
                }
            }
        };

        self.apply_outcome(outcome, started.elapsed()).await;
        ControlFlow::Continue(())
    }

    async fn apply_outcome(&mut self, outcome: PollOutcome, elapsed: Duration) {
        self.stats.poll_count += 1;
        self.stats.last_poll_duration_ms = elapsed.as_millis() as u64;
        self.last_poll_at = Some(Utc::now());

        match outcome {
            PollOutcome::Success { batch, resynced } => {
                let (kept, filtered) = split_sensitive(batch.items);
                self.stats.filtered += filtered;
                self.stats.items_found += kept.len() as u64;

                match batch.new_checkpoint {
                    Some(cp) => self.checkpoint = Some(cp),
                    // Full resync that yielded no new cursor leaves the
                    // checkpoint cleared; otherwise keep the current one.
                    None if resynced => self.checkpoint = None,
                    None => {}
                }

                tracing::debug!(
                    source = %self.source,
                    items = kept.len(),
                    filtered,
                    resynced,
                    "poll completed"
                );

                if !kept.is_empty() {
                    let _ = self
                        .events
                        .send(WatcherEvent::Items {
                            source: self.source,
                            items: kept,
                        })
                        .await;
                }
            }
            PollOutcome::Failure {
                error,
                checkpoint_reset,
            } => {
                if checkpoint_reset {
                    self.checkpoint = None;
                }
                self.stats.errors += 1;
                tracing::warn!(source = %self.source, "poll failed: {error}");
                let _ = self
                    .events
                    .send(WatcherEvent::Error {
                        source: self.source,
                        message: error.to_string(),
                    })
                    .await;
            }
        }

        self.publish_status();
    }

    /// Freeze state on stop: final status snapshot with `running = false`.
    fn finish(mut self) {
        self.scheduler.stop();
        self.publish_status();
        tracing::info!(source = %self.source, "watcher stopped");
    }

    fn publish_status(&mut self) {
        self.status_tx.send_replace(WatcherStatus {
            source: self.source,
            running: self.scheduler.is_running(),
            interval_ms: self.current_interval_ms,
            user_active: self.scheduler.user_active(now_ms()),
            last_poll_at: self.last_poll_at,
            checkpoint: self.checkpoint.clone(),
            stats: self.stats.clone(),
        });
    }
}

/// Apply the PII/content filter. Filtered items are counted and dropped
/// without their content being logged.
fn split_sensitive(items: Vec<Item>) -> (Vec<Item>, u64) {
    let mut kept = Vec::with_capacity(items.len());
    let mut filtered = 0u64;
    for item in items {
        if filter::is_sensitive(&item.subject, &item.content) {
            filtered += 1;
        } else {
            kept.push(item);
        }
    }
    (kept, filtered)
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inflow_core::types::{AuthStatus, ItemKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn make_item(id: &str, subject: &str) -> Item {
        Item {
            id: id.to_string(),
            kind: ItemKind::Email,
            source: SourceKind::Mail,
            subject: subject.to_string(),
            content: String::new(),
            metadata: serde_json::json!({}),
            source_ts: Utc::now(),
        }
    }

    fn make_batch(n: usize, checkpoint: &str) -> ChangeBatch {
        ChangeBatch {
            items: (0..n)
                .map(|i| make_item(&format!("m{i}"), &format!("message {i}")))
                .collect(),
            new_checkpoint: Some(checkpoint.to_string()),
        }
    }

    /// Scripted client: pops one result per `list_changed` call and records
    /// the checkpoint argument of each call.
    struct ScriptedClient {
        authenticated: bool,
        script: Mutex<VecDeque<Result<ChangeBatch, ClientError>>>,
        seen_checkpoints: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<ChangeBatch, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                authenticated: true,
                script: Mutex::new(script.into()),
                seen_checkpoints: Mutex::new(Vec::new()),
            })
        }

        fn unauthenticated() -> Arc<Self> {
            Arc::new(Self {
                authenticated: false,
                script: Mutex::new(VecDeque::new()),
                seen_checkpoints: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.seen_checkpoints.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl SourceClient for ScriptedClient {
        async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
            Ok(AuthStatus {
                authenticated: self.authenticated,
                error: (!self.authenticated).then(|| "token revoked".to_string()),
            })
        }

        async fn list_changed(
            &self,
            checkpoint: Option<&str>,
            _max_results: u32,
        ) -> Result<ChangeBatch, ClientError> {
            self.seen_checkpoints
                .lock()
                .expect("lock")
                .push(checkpoint.map(String::from));
            self.script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(ChangeBatch {
                        items: Vec::new(),
                        new_checkpoint: checkpoint.map(String::from),
                    })
                })
        }
    }

    /// Client whose polls take `poll_duration` of (tokio) time; records the
    /// start/end instants of every call for overlap checks.
    struct SlowClient {
        poll_duration: Duration,
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl SourceClient for SlowClient {
        async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
            Ok(AuthStatus {
                authenticated: true,
                error: None,
            })
        }

        async fn list_changed(
            &self,
            _checkpoint: Option<&str>,
            _max_results: u32,
        ) -> Result<ChangeBatch, ClientError> {
            let started = Instant::now();
            tokio::time::sleep(self.poll_duration).await;
            self.spans
                .lock()
                .expect("lock")
                .push((started, Instant::now()));
            Ok(ChangeBatch {
                items: vec![make_item("x", "hello")],
                new_checkpoint: Some("cp".into()),
            })
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            poll_interval_ms: 1_000,
            idle_poll_interval_ms: 1_000,
            idle_threshold_ms: 300_000,
            max_results: 20,
        }
    }

    async fn wait_for_polls(handle: &WatcherHandle, n: u64) -> WatcherStatus {
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.stats.poll_count >= n)
            .await
            .expect("watcher status channel closed")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn initial_poll_emits_items_and_advances_checkpoint() {
        // First poll with no checkpoint: the client returns 5 items and "c1".
        let client = ScriptedClient::new(vec![Ok(make_batch(5, "c1"))]);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Watcher::start(SourceKind::Mail, client.clone(), fast_config(), None, tx)
            .await
            .expect("start");

        let status = wait_for_polls(&handle, 1).await;
        assert_eq!(status.checkpoint.as_deref(), Some("c1"));
        assert_eq!(status.stats.items_found, 5);
        assert_eq!(status.stats.filtered, 0);

        match rx.recv().await.expect("items event") {
            WatcherEvent::Items { source, items } => {
                assert_eq!(source, SourceKind::Mail);
                assert_eq!(items.len(), 5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(client.calls(), vec![None]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sync_token_invalid_resets_and_retries_once() {
        // Stale cursor rejected on call 1, full listing succeeds on call 2.
        let client = ScriptedClient::new(vec![
            Err(ClientError::SyncTokenInvalid),
            Ok(make_batch(1, "fresh")),
        ]);
        let (tx, _rx) = mpsc::channel(16);
        let handle = Watcher::start(
            SourceKind::Drive,
            client.clone(),
            fast_config(),
            Some("stale".into()),
            tx,
        )
        .await
        .expect("start");

        let status = wait_for_polls(&handle, 1).await;
        // Exactly two client calls: stale cursor, then fresh-from-scratch.
        assert_eq!(client.calls(), vec![Some("stale".to_string()), None]);
        assert_eq!(status.checkpoint.as_deref(), Some("fresh"));
        assert_eq!(status.stats.errors, 0);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resync_leaves_checkpoint_cleared() {
        let client = ScriptedClient::new(vec![
            Err(ClientError::SyncTokenInvalid),
            Err(ClientError::Network("connection reset".into())),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Watcher::start(
            SourceKind::Calendar,
            client.clone(),
            fast_config(),
            Some("old".into()),
            tx,
        )
        .await
        .expect("start");

        let status = wait_for_polls(&handle, 1).await;
        assert!(status.checkpoint.is_none());
        assert_eq!(status.stats.errors, 1);
        assert!(status.running, "network errors never stop the watcher");

        match rx.recv().await.expect("error event") {
            WatcherEvent::Error { source, message } => {
                assert_eq!(source, SourceKind::Calendar);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sensitive_items_are_counted_not_emitted() {
        let batch = ChangeBatch {
            items: vec![
                make_item("a", "Team offsite agenda"),
                make_item("b", "Your verification code is 824113"),
                make_item("c", "Invoice draft"),
            ],
            new_checkpoint: Some("c1".into()),
        };
        let client = ScriptedClient::new(vec![Ok(batch)]);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Watcher::start(SourceKind::Mail, client, fast_config(), None, tx)
            .await
            .expect("start");

        let status = wait_for_polls(&handle, 1).await;
        assert_eq!(status.stats.items_found, 2);
        assert_eq!(status.stats.filtered, 1);

        match rx.recv().await.expect("items event") {
            WatcherEvent::Items { items, .. } => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|i| !i.subject.contains("verification")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_never_overlap() {
        let client = Arc::new(SlowClient {
            poll_duration: Duration::from_secs(5),
            spans: Mutex::new(Vec::new()),
        });
        let (tx, _rx) = mpsc::channel(64);
        let handle = Watcher::start(SourceKind::Drive, client.clone(), fast_config(), None, tx)
            .await
            .expect("start");

        wait_for_polls(&handle, 3).await;
        handle.stop().await;

        let spans = client.spans.lock().expect("lock").clone();
        assert!(spans.len() >= 3);
        for pair in spans.windows(2) {
            assert!(
                pair[1].0 >= pair[0].1,
                "poll started before the previous one completed"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_now_runs_without_waiting_for_timer() {
        let client = ScriptedClient::new(vec![
            Ok(make_batch(0, "c1")),
            Ok(make_batch(0, "c2")),
        ]);
        let (tx, _rx) = mpsc::channel(16);
        let mut config = fast_config();
        config.poll_interval_ms = 3_600_000; // next timer fire is an hour away
        config.idle_poll_interval_ms = 3_600_000;
        let handle = Watcher::start(SourceKind::Mail, client, config, None, tx)
            .await
            .expect("start");

        wait_for_polls(&handle, 1).await;
        let before = Instant::now();
        handle.poll_now().await;
        let status = wait_for_polls(&handle, 2).await;
        assert_eq!(status.checkpoint.as_deref(), Some("c2"));
        assert!(
            before.elapsed() < Duration::from_secs(60),
            "poll_now must not wait for the hour-long timer"
        );
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_poll() {
        let client = Arc::new(SlowClient {
            poll_duration: Duration::from_secs(60),
            spans: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let handle = Watcher::start(SourceKind::Calendar, client, fast_config(), None, tx)
            .await
            .expect("start");

        // The immediate start poll is still in flight; stop must drop it.
        let status_rx = handle.subscribe();
        handle.stop().await;

        let status = status_rx.borrow().clone();
        assert!(!status.running);
        assert_eq!(status.stats.poll_count, 0, "dropped poll must not be applied");
        assert!(
            rx.try_recv().is_err(),
            "late poll result must not emit items"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_client_fails_start() {
        let client = ScriptedClient::unauthenticated();
        let (tx, _rx) = mpsc::channel(16);
        let err = Watcher::start(SourceKind::Mail, client, fast_config(), None, tx)
            .await
            .expect_err("start must fail");
        assert!(matches!(err, ClientError::NotAuthenticated(Some(ref m)) if m == "token revoked"));
    }

    #[tokio::test(start_paused = true)]
    async fn record_activity_does_not_trigger_poll() {
        let client = ScriptedClient::new(vec![Ok(make_batch(0, "c1"))]);
        let (tx, _rx) = mpsc::channel(16);
        let mut config = fast_config();
        config.poll_interval_ms = 3_600_000;
        config.idle_poll_interval_ms = 3_600_000;
        let handle = Watcher::start(SourceKind::Mail, client.clone(), config, None, tx)
            .await
            .expect("start");

        wait_for_polls(&handle, 1).await;
        handle.record_activity().await;
        // Give the loop a chance to mishandle the command.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.status().stats.poll_count, 1);
        assert!(handle.status().user_active);
        handle.stop().await;
    }
}
