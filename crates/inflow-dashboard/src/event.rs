//! Outbound dashboard event stream.
//!
//! Everything the dashboard consumer sees flows through one channel of these
//! events; the runtime serializes them as NDJSON for the external UI.

use serde::{Deserialize, Serialize};

use inflow_core::types::{Item, ItemKind, SourceKind, TriageAction, TriageSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// One item batch landed: the new items plus the full cache snapshot for
    /// that kind, newest first.
    Update {
        kind: ItemKind,
        items: Vec<Item>,
        cache: Vec<Item>,
    },
    /// A watcher's poll failed. The watcher keeps running.
    SourceError { source: SourceKind, message: String },
    /// One triage cycle completed: raw summary plus derived actions.
    Triage {
        summary: TriageSummary,
        actions: Vec<TriageAction>,
    },
    /// One auto-approved action was executed, reported individually for audit.
    TriageExecuted {
        action_id: String,
        command: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

// ─── Tests ────────────────────────────────────────────────────────
