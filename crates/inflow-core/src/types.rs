use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

// ─── Source & Item Kind ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mail,
    Drive,
    Calendar,
    Tracker,
}

impl SourceKind {
    pub const ALL: [Self; 4] = [Self::Mail, Self::Drive, Self::Calendar, Self::Tracker];

    /// Sources owned by the aggregator's watchers. The tracker is polled by
    /// the triage categorizer instead.
    pub const WATCHED: [Self; 3] = [Self::Mail, Self::Drive, Self::Calendar];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Drive => "drive",
            Self::Calendar => "calendar",
            Self::Tracker => "tracker",
        }
    }

    /// Item kind emitted by this source.
    pub fn item_kind(self) -> ItemKind {
        match self {
            Self::Mail => ItemKind::Email,
            Self::Drive => ItemKind::File,
            Self::Calendar => ItemKind::CalendarEvent,
            Self::Tracker => ItemKind::Notification,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mail" => Ok(Self::Mail),
            "drive" => Ok(Self::Drive),
            "calendar" => Ok(Self::Calendar),
            "tracker" => Ok(Self::Tracker),
            _ => Err(ClientError::Api {
                code: 400,
                message: format!("unknown source: {s}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Email,
    File,
    CalendarEvent,
    Notification,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::File => "file",
            Self::CalendarEvent => "calendar_event",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Item ─────────────────────────────────────────────────────────

/// Normalized change-event envelope. Immutable once emitted by a watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    pub source: SourceKind,
    pub subject: String,
    pub content: String,
    /// Source-specific fields (folder labels, mime type, attendees, ...).
    pub metadata: serde_json::Value,
    pub source_ts: DateTime<Utc>,
}

// ─── Protocol: Source Client <-> Watcher ──────────────────────────

/// Result of a `check_auth` call on a source client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One page of changed items plus the advanced checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub items: Vec<Item>,
    /// Opaque cursor to resume from on the next poll. `None` means the
    /// source has no incremental support and every poll is a full listing.
    pub new_checkpoint: Option<String>,
}

// ─── Watcher State ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    pub poll_count: u64,
    pub items_found: u64,
    pub filtered: u64,
    pub errors: u64,
    pub last_poll_duration_ms: u64,
}

/// Snapshot of a watcher's state, published after every poll and frozen on
/// stop. Mutated only by the watcher's own poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub source: SourceKind,
    pub running: bool,
    /// Interval chosen by the last scheduling decision.
    pub interval_ms: u64,
    pub user_active: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub checkpoint: Option<String>,
    pub stats: WatcherStats,
}

impl WatcherStatus {
    pub fn initial(source: SourceKind, interval_ms: u64) -> Self {
        Self {
            source,
            running: false,
            interval_ms,
            user_active: false,
            last_poll_at: None,
            checkpoint: None,
            stats: WatcherStats::default(),
        }
    }
}

/// Per-watcher configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Poll interval while the user is active, in milliseconds.
    pub poll_interval_ms: u64,
    /// Poll interval after `idle_threshold_ms` without recorded activity.
    pub idle_poll_interval_ms: u64,
    /// How long since the last recorded activity the user still counts as active.
    pub idle_threshold_ms: u64,
    /// Maximum items requested per poll.
    pub max_results: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            idle_poll_interval_ms: 300_000,
            idle_threshold_ms: 300_000,
            max_results: 20,
        }
    }
}

// ─── Watcher Events ───────────────────────────────────────────────

/// Event pushed by a watcher's poll loop to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatcherEvent {
    Items {
        source: SourceKind,
        items: Vec<Item>,
    },
    Error {
        source: SourceKind,
        message: String,
    },
}

// ─── Triage ───────────────────────────────────────────────────────

/// Structured per-category notification counts fetched from the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageSummary {
    /// Count per category, e.g. `ci_failures`, `mentions`, `review_requests`,
    /// `subscribed`. BTreeMap keeps derived action order deterministic.
    pub counts: BTreeMap<String, u64>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TriageSummary {
    pub fn count(&self, category: &str) -> u64 {
        self.counts.get(category).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriagePriority {
    Low,
    Medium,
    High,
}

/// Suggested (possibly auto-executable) action derived from a triage summary.
/// Recomputed every cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageAction {
    pub id: String,
    pub priority: TriagePriority,
    pub category: String,
    pub label: String,
    pub auto_approvable: bool,
    /// Command passed to the tracker client on execution.
    pub command: String,
}

// ─── Cleanup ──────────────────────────────────────────────────────

/// Outcome of an age-based retention pass on the downstream service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: u64,
    pub failed: u64,
    pub verified: u64,
}

// ─── Tests ────────────────────────────────────────────────────────
