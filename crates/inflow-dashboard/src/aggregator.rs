//! Fan-in aggregator: owns the watcher handles, the bounded per-kind item
//! caches, and the single outbound dashboard event channel.
//!
//! All mutable state lives inside the aggregator task; the public
//! [`AggregatorHandle`] talks to it over a command channel with oneshot
//! replies, so no lock is ever shared with callers. Item batches are cached
//! unconditionally and forwarded to the synthesis bridge best-effort: a
//! failed forward is logged, never rolled back.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use inflow_bridge::synth::Synthesizer;
use inflow_core::client::SourceClient;
use inflow_core::error::ClientError;
use inflow_core::types::{
    CleanupReport, Item, ItemKind, SourceKind, WatcherConfig, WatcherEvent, WatcherStatus,
};
use inflow_watcher::watcher::WatcherHandle;
use inflow_watcher::{calendar, drive, mail};

use crate::event::DashboardEvent;

pub const DEFAULT_CACHE_CAP: usize = 50;
pub const DEFAULT_MAX_AGE_HOURS: u32 = 48;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Maximum cached items per [`ItemKind`], oldest dropped first.
    pub cache_cap: usize,
    /// Retention horizon handed to the bridge on `cleanup_expired`.
    pub max_age_hours: u32,
    /// Mailbox folder allow-list; empty admits every folder.
    pub watched_folders: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache_cap: DEFAULT_CACHE_CAP,
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            watched_folders: Vec::new(),
        }
    }
}

/// Client plus watcher configuration for one enabled source.
#[derive(Clone)]
pub struct SourceSpec {
    pub client: Arc<dyn SourceClient>,
    pub config: WatcherConfig,
}

impl SourceSpec {
    pub fn new(client: Arc<dyn SourceClient>, config: WatcherConfig) -> Self {
        Self { client, config }
    }
}

// ─── Commands ─────────────────────────────────────────────────────

enum Command {
    Start(SourceKind, oneshot::Sender<Result<(), ClientError>>),
    StartAll(oneshot::Sender<BTreeMap<SourceKind, Result<(), ClientError>>>),
    Stop(SourceKind, oneshot::Sender<bool>),
    StopAll(oneshot::Sender<()>),
    RecordActivity,
    PollAllNow,
    DashboardData(oneshot::Sender<BTreeMap<ItemKind, Vec<Item>>>),
    Status(oneshot::Sender<BTreeMap<SourceKind, WatcherStatus>>),
    CleanupExpired(oneshot::Sender<CleanupReport>),
    Shutdown(oneshot::Sender<()>),
}

// ─── Aggregator ───────────────────────────────────────────────────

/// Entry point for spawning the aggregator task.
pub struct Aggregator;

impl Aggregator {
    pub fn spawn(
        sources: BTreeMap<SourceKind, SourceSpec>,
        config: AggregatorConfig,
        synth: Option<Synthesizer>,
        out: mpsc::Sender<DashboardEvent>,
    ) -> AggregatorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let task = AggregatorTask {
            sources,
            config,
            synth,
            watchers: HashMap::new(),
            cache: HashMap::new(),
            last_status: HashMap::new(),
            events_tx,
            events_rx,
            cmd_rx,
            out,
        };
        let join = tokio::spawn(task.run());

        AggregatorHandle { cmd_tx, join }
    }
}

/// Control handle for the running aggregator.
#[derive(Debug)]
pub struct AggregatorHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Start one source watcher. Already-running sources are a no-op.
    pub async fn start(&self, kind: SourceKind) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Start(kind, tx)).await.is_err() {
            return Err(stopped_error());
        }
        rx.await.unwrap_or_else(|_| Err(stopped_error()))
    }

    /// Start every configured watcher; per-source results, so one failed
    /// auth check does not block the rest.
    pub async fn start_all(&self) -> BTreeMap<SourceKind, Result<(), ClientError>> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StartAll(tx)).await.is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop one watcher. Returns false when it was not running.
    pub async fn stop(&self, kind: SourceKind) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(kind, tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn stop_all(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StopAll(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Propagate a user-activity signal to every running watcher.
    pub async fn record_activity(&self) {
        let _ = self.cmd_tx.send(Command::RecordActivity).await;
    }

    pub async fn poll_all_now(&self) {
        let _ = self.cmd_tx.send(Command::PollAllNow).await;
    }

    /// Snapshot of every per-kind cache, newest first.
    pub async fn dashboard_data(&self) -> BTreeMap<ItemKind, Vec<Item>> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::DashboardData(tx)).await.is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Per-source status: live snapshots for running watchers, frozen final
    /// snapshots for stopped ones.
    pub async fn status(&self) -> BTreeMap<SourceKind, WatcherStatus> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Status(tx)).await.is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Run the bridge's age-based retention pass. Reports counts; a bridge
    /// failure yields an empty report rather than an error.
    pub async fn cleanup_expired(&self) -> CleanupReport {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CleanupExpired(tx)).await.is_err() {
            return CleanupReport::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop every watcher and tear down the aggregator task.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.join.await;
    }
}

fn stopped_error() -> ClientError {
    ClientError::Network("aggregator is not running".into())
}

// ─── Fan-in Task ──────────────────────────────────────────────────

struct AggregatorTask {
    sources: BTreeMap<SourceKind, SourceSpec>,
    config: AggregatorConfig,
    synth: Option<Synthesizer>,
    watchers: HashMap<SourceKind, WatcherHandle>,
    cache: HashMap<ItemKind, VecDeque<Item>>,
    /// Frozen final snapshots of stopped watchers, also the checkpoint store
    /// for restarts.
    last_status: HashMap<SourceKind, WatcherStatus>,
    events_tx: mpsc::Sender<WatcherEvent>,
    events_rx: mpsc::Receiver<WatcherEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    out: mpsc::Sender<DashboardEvent>,
}

impl AggregatorTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => break,
                    Some(Command::Shutdown(reply)) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },
                // The task keeps a sender clone, so this arm never closes.
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
        self.stop_all().await;
        tracing::info!("aggregator stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(kind, reply) => {
                let _ = reply.send(self.start_source(kind).await);
            }
            Command::StartAll(reply) => {
                let mut results = BTreeMap::new();
                for kind in SourceKind::WATCHED {
                    if self.sources.contains_key(&kind) {
                        results.insert(kind, self.start_source(kind).await);
                    }
                }
                let _ = reply.send(results);
            }
            Command::Stop(kind, reply) => {
                let _ = reply.send(self.stop_source(kind).await);
            }
            Command::StopAll(reply) => {
                self.stop_all().await;
                let _ = reply.send(());
            }
            Command::RecordActivity => {
                for handle in self.watchers.values() {
                    handle.record_activity().await;
                }
            }
            Command::PollAllNow => {
                for handle in self.watchers.values() {
                    handle.poll_now().await;
                }
            }
            Command::DashboardData(reply) => {
                let snapshot = self
                    .cache
                    .iter()
                    .map(|(kind, items)| (*kind, items.iter().cloned().collect()))
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::Status(reply) => {
                let mut statuses = BTreeMap::new();
                for (kind, status) in &self.last_status {
                    statuses.insert(*kind, status.clone());
                }
                for (kind, handle) in &self.watchers {
                    statuses.insert(*kind, handle.status());
                }
                let _ = reply.send(statuses);
            }
            Command::CleanupExpired(reply) => {
                let _ = reply.send(self.cleanup_expired().await);
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    async fn start_source(&mut self, kind: SourceKind) -> Result<(), ClientError> {
        if self.watchers.contains_key(&kind) {
            return Ok(());
        }
        let spec = self.sources.get(&kind).cloned().ok_or(ClientError::Api {
            code: 400,
            message: format!("no client configured for source: {kind}"),
        })?;
        // A restart resumes from the checkpoint frozen at the last stop.
        let checkpoint = self
            .last_status
            .get(&kind)
            .and_then(|s| s.checkpoint.clone());
        let events = self.events_tx.clone();

        let handle = match kind {
            SourceKind::Mail => {
                mail::start(
                    spec.client,
                    spec.config,
                    self.config.watched_folders.clone(),
                    checkpoint,
                    events,
                )
                .await?
            }
            SourceKind::Drive => drive::start(spec.client, spec.config, checkpoint, events).await?,
            SourceKind::Calendar => {
                calendar::start(spec.client, spec.config, checkpoint, events).await?
            }
            SourceKind::Tracker => {
                return Err(ClientError::Api {
                    code: 400,
                    message: "tracker is polled by the triage categorizer".into(),
                });
            }
        };
        self.watchers.insert(kind, handle);
        Ok(())
    }

    async fn stop_source(&mut self, kind: SourceKind) -> bool {
        match self.watchers.remove(&kind) {
            Some(handle) => {
                let status_rx = handle.subscribe();
                handle.stop().await;
                self.last_status.insert(kind, status_rx.borrow().clone());
                true
            }
            None => false,
        }
    }

    async fn stop_all(&mut self) {
        for kind in SourceKind::WATCHED {
            self.stop_source(kind).await;
        }
    }

    async fn handle_event(&mut self, event: WatcherEvent) {
        match event {
            WatcherEvent::Items { source, items } => {
                // A batch can arrive after its watcher was stopped; stopped
                // sources must not repopulate the cache.
                if !self.watchers.contains_key(&source) {
                    tracing::debug!(source = %source, "dropping batch from stopped source");
                    return;
                }
                let kind = source.item_kind();
                let cache = self.cache.entry(kind).or_default();
                // A full resync re-delivers items already cached; only the
                // unseen ones go downstream.
                let fresh = fresh_items(cache, &items);
                prepend_bounded(cache, &items, self.config.cache_cap);
                let snapshot: Vec<Item> = cache.iter().cloned().collect();

                self.forward_to_bridge(&fresh).await;

                let _ = self
                    .out
                    .send(DashboardEvent::Update {
                        kind,
                        items,
                        cache: snapshot,
                    })
                    .await;
            }
            WatcherEvent::Error { source, message } => {
                let _ = self
                    .out
                    .send(DashboardEvent::SourceError { source, message })
                    .await;
            }
        }
    }

    /// Best-effort forward. The cache write already happened and stands
    /// regardless of the bridge outcome.
    async fn forward_to_bridge(&self, items: &[Item]) {
        let Some(synth) = &self.synth else {
            return;
        };
        for item in items {
            if let Err(err) = synth.add_source(item).await {
                tracing::warn!(id = %item.id, "forward to synthesis service failed: {err}");
            }
        }
    }

    async fn cleanup_expired(&self) -> CleanupReport {
        let Some(synth) = &self.synth else {
            return CleanupReport::default();
        };
        match synth.cleanup_expired_sources(self.config.max_age_hours).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!("cleanup pass failed: {err}");
                CleanupReport::default()
            }
        }
    }
}

/// Prepend a batch to a bounded cache, keeping batch order at the front
/// (batches arrive newest first) and dropping the oldest overflow.
/// Re-delivered ids replace their cached entry instead of duplicating it.
fn prepend_bounded(cache: &mut VecDeque<Item>, items: &[Item], cap: usize) {
    cache.retain(|cached| !items.iter().any(|item| item.id == cached.id));
    for item in items.iter().rev() {
        cache.push_front(item.clone());
    }
    cache.truncate(cap);
}

/// Items of a batch not already present in the cache (by id).
fn fresh_items(cache: &VecDeque<Item>, items: &[Item]) -> Vec<Item> {
    items
        .iter()
        .filter(|item| !cache.iter().any(|cached| cached.id == item.id))
        .cloned()
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────
