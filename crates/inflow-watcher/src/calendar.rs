//! Calendar watcher: event normalization for the calendar source.
//!
//! The calendar checkpoint is an "updated after" timestamp minted by the
//! client; the watcher treats it as opaque. Cancelled events are dropped
//! during translation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use inflow_core::client::SourceClient;
use inflow_core::error::ClientError;
use inflow_core::types::{Item, ItemKind, SourceKind, WatcherConfig, WatcherEvent};

use crate::watcher::{Watcher, WatcherHandle};

pub const SOURCE: SourceKind = SourceKind::Calendar;

pub fn default_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval_ms: 300_000,
        idle_poll_interval_ms: 900_000,
        idle_threshold_ms: 300_000,
        max_results: 10,
    }
}

/// Normalize a raw calendar-event payload into an [`Item`].
///
/// Expected shape: `{ "id", "summary", "description", "status", "location",
/// "start": {"dateTime"|"date"}, "end": {...}, "attendees": [...] }`.
/// Returns `None` for payloads without an id and for cancelled events.
pub fn translate_event(raw: &serde_json::Value) -> Option<Item> {
    let id = raw["id"].as_str()?;
    if raw["status"].as_str() == Some("cancelled") {
        return None;
    }
    let summary = raw["summary"].as_str().unwrap_or("(untitled event)");
    let description = raw["description"].as_str().unwrap_or("");

    let source_ts = event_time(&raw["start"]).unwrap_or_else(Utc::now);
    let attendees = raw["attendees"].as_array().map(Vec::len).unwrap_or(0);

    Some(Item {
        id: format!("calendar-{id}"),
        kind: ItemKind::CalendarEvent,
        source: SOURCE,
        subject: summary.to_string(),
        content: description.to_string(),
        metadata: serde_json::json!({
            "start": raw.get("start").cloned().unwrap_or(serde_json::Value::Null),
            "end": raw.get("end").cloned().unwrap_or(serde_json::Value::Null),
            "location": raw.get("location").cloned().unwrap_or(serde_json::Value::Null),
            "attendees_count": attendees,
        }),
        source_ts,
    })
}

/// Parse an event boundary: timed events carry `dateTime`, all-day events
/// carry `date` (interpreted as midnight UTC).
fn event_time(boundary: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(s) = boundary["dateTime"].as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    let date = boundary["date"].as_str()?;
    DateTime::parse_from_rfc3339(&format!("{date}T00:00:00Z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub async fn start(
    client: Arc<dyn SourceClient>,
    config: WatcherConfig,
    initial_checkpoint: Option<String>,
    events: mpsc::Sender<WatcherEvent>,
) -> Result<WatcherHandle, ClientError> {
    Watcher::start(SOURCE, client, config, initial_checkpoint, events).await
}

// ─── Tests ────────────────────────────────────────────────────────
