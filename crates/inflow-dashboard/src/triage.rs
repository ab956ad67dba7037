//! Rule-based triage over the issue-tracker notification feed.
//!
//! Each cycle fetches one [`TriageSummary`], derives actions through fixed
//! priority rules (a pure function), publishes them as a single
//! [`DashboardEvent::Triage`], then executes the auto-approvable ones.
//! Auto-execution requires both the `auto_approvable` flag and membership in
//! the configured low-risk category list; every execution is reported
//! individually for audit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use inflow_core::client::TrackerClient;
use inflow_core::types::{TriageAction, TriagePriority, TriageSummary};

use crate::event::DashboardEvent;

/// Hard floor for the cycle interval. Lower configured values are clamped
/// silently; the clamped value is what `status()` reports.
pub const MIN_POLL_INTERVAL_MS: u64 = 30_000;

const COMMAND_BUFFER: usize = 8;

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfig {
    pub poll_interval_ms: u64,
    /// Minimum count for a low-risk category to get a bulk-cleanup action.
    pub bulk_threshold: u64,
    /// Categories safe to act on without confirmation.
    pub low_risk_categories: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 120_000,
            bulk_threshold: 5,
            low_risk_categories: vec!["subscribed".to_string()],
        }
    }
}

impl TriageConfig {
    pub fn effective_interval_ms(&self) -> u64 {
        self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS)
    }

    fn is_low_risk(&self, category: &str) -> bool {
        self.low_risk_categories.iter().any(|c| c == category)
    }
}

/// Snapshot of the categorizer's state, published after every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageStatus {
    pub running: bool,
    /// Clamped cycle interval actually in effect.
    pub interval_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub runs: u64,
    pub executed: u64,
    pub errors: u64,
}

// ─── Action Derivation ────────────────────────────────────────────

/// Derive triage actions from a summary. Pure; recomputed every cycle.
pub fn derive_actions(summary: &TriageSummary, config: &TriageConfig) -> Vec<TriageAction> {
    let mut actions = Vec::new();

    let ci = summary.count("ci_failures");
    if ci > 0 {
        actions.push(TriageAction {
            id: "investigate_ci".into(),
            priority: TriagePriority::High,
            category: "ci_failures".into(),
            label: format!("Investigate {ci} CI failure notification(s)"),
            auto_approvable: false,
            command: "list_failures".into(),
        });
    }

    let mentions = summary.count("mentions");
    if mentions > 0 {
        actions.push(TriageAction {
            id: "respond_mentions".into(),
            priority: TriagePriority::Medium,
            category: "mentions".into(),
            label: format!("Respond to {mentions} mention(s)"),
            auto_approvable: false,
            command: "list_mentions".into(),
        });
    }

    let reviews = summary.count("review_requests");
    if reviews > 0 {
        actions.push(TriageAction {
            id: "review_prs".into(),
            priority: TriagePriority::Medium,
            category: "review_requests".into(),
            label: format!("Review {reviews} requested change(s)"),
            auto_approvable: false,
            command: "list_review_requests".into(),
        });
    }

    for category in &config.low_risk_categories {
        let n = summary.count(category);
        if n >= config.bulk_threshold {
            actions.push(TriageAction {
                id: format!("bulk_cleanup_{category}"),
                priority: TriagePriority::Low,
                category: category.clone(),
                label: format!("Mark {n} {category} notification(s) as read"),
                auto_approvable: true,
                command: format!("mark_read {category}"),
            });
        }
    }

    actions
}

// ─── Categorizer ──────────────────────────────────────────────────

enum Command {
    TriggerNow,
    UpdateConfig(TriageConfig),
    Stop,
}

pub struct TriageCategorizer;

impl TriageCategorizer {
    /// Spawn the triage loop: one immediate cycle, then self-scheduling at
    /// the clamped interval.
    pub fn start(
        client: Arc<dyn TrackerClient>,
        config: TriageConfig,
        out: mpsc::Sender<DashboardEvent>,
    ) -> TriageHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(TriageStatus {
            running: false,
            interval_ms: config.effective_interval_ms(),
            last_run_at: None,
            runs: 0,
            executed: 0,
            errors: 0,
        });

        let task = TriageTask {
            client,
            config,
            last_run_at: None,
            runs: 0,
            executed: 0,
            errors: 0,
            cmd_rx,
            out,
            status_tx,
        };
        let join = tokio::spawn(task.run());

        TriageHandle {
            cmd_tx,
            status_rx,
            join,
        }
    }
}

/// Control handle for the running categorizer.
#[derive(Debug)]
pub struct TriageHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<TriageStatus>,
    join: JoinHandle<()>,
}

impl TriageHandle {
    /// Run one cycle immediately, independent of the timer.
    pub async fn trigger_now(&self) {
        let _ = self.cmd_tx.send(Command::TriggerNow).await;
    }

    /// Swap the config. Takes effect from the next scheduling decision; the
    /// interval floor still applies.
    pub async fn update_config(&self, config: TriageConfig) {
        let _ = self.cmd_tx.send(Command::UpdateConfig(config)).await;
    }

    pub async fn stop(self) {
        let _ = self.cmd_tx.send(Command::Stop).await;
        let _ = self.join.await;
    }

    pub fn status(&self) -> TriageStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status_rx.borrow().running
    }

    pub fn subscribe(&self) -> watch::Receiver<TriageStatus> {
        self.status_rx.clone()
    }
}

// ─── Cycle Loop ───────────────────────────────────────────────────

struct TriageTask {
    client: Arc<dyn TrackerClient>,
    config: TriageConfig,
    last_run_at: Option<DateTime<Utc>>,
    runs: u64,
    executed: u64,
    errors: u64,
    cmd_rx: mpsc::Receiver<Command>,
    out: mpsc::Sender<DashboardEvent>,
    status_tx: watch::Sender<TriageStatus>,
}

impl TriageTask {
    async fn run(mut self) {
        if self.config.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            tracing::debug!(
                requested = self.config.poll_interval_ms,
                effective = MIN_POLL_INTERVAL_MS,
                "triage interval clamped to floor"
            );
        }
        self.publish(true);
        self.cycle().await;

        'schedule: loop {
            let sleep =
                tokio::time::sleep(Duration::from_millis(self.config.effective_interval_ms()));
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        None | Some(Command::Stop) => return self.finish(),
                        Some(Command::TriggerNow) => break,
                        Some(Command::UpdateConfig(config)) => {
                            self.config = config;
                            self.publish(true);
                            continue 'schedule;
                        }
                    },
                    _ = &mut sleep => break,
                }
            }

            self.cycle().await;
        }
    }

    async fn cycle(&mut self) {
        self.runs += 1;
        match self.client.fetch_summary().await {
            Ok(summary) => {
                self.last_run_at = Some(Utc::now());
                let actions = derive_actions(&summary, &self.config);
                tracing::debug!(actions = actions.len(), "triage cycle completed");
                let _ = self
                    .out
                    .send(DashboardEvent::Triage {
                        summary,
                        actions: actions.clone(),
                    })
                    .await;
                for action in actions {
                    if action.auto_approvable && self.config.is_low_risk(&action.category) {
                        self.execute(action).await;
                    }
                }
            }
            Err(err) => {
                self.errors += 1;
                tracing::warn!("triage summary fetch failed: {err}");
            }
        }
        self.publish(true);
    }

    async fn execute(&mut self, action: TriageAction) {
        let result = self.client.execute(&action.command).await;
        let success = result.is_ok();
        if success {
            self.executed += 1;
        } else {
            self.errors += 1;
        }
        tracing::info!(action = %action.id, success, "auto-approved triage action executed");
        let _ = self
            .out
            .send(DashboardEvent::TriageExecuted {
                action_id: action.id,
                command: action.command,
                success,
                error: result.err().map(|e| e.to_string()),
            })
            .await;
    }

    fn finish(mut self) {
        self.publish(false);
        tracing::info!("triage categorizer stopped");
    }

    fn publish(&mut self, running: bool) {
        self.status_tx.send_replace(TriageStatus {
            running,
            interval_ms: self.config.effective_interval_ms(),
            last_run_at: self.last_run_at,
            runs: self.runs,
            executed: self.executed,
            errors: self.errors,
        });
    }
}

// ─── Tests ────────────────────────────────────────────────────────
