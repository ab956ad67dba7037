//! Daemon wiring: bridge subprocess, source watchers, aggregator, triage.
//!
//! The dashboard consumer reads NDJSON events from stdout; logs go to
//! stderr. Shutdown on ctrl-c or SIGTERM tears the components down in
//! dependency order (triage, aggregator, bridge).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use inflow_bridge::channel::{BridgeConfig, SyncChannel};
use inflow_bridge::source_client::{BridgeSourceClient, BridgeTrackerClient};
use inflow_bridge::synth::Synthesizer;
use inflow_core::types::{SourceKind, WatcherConfig};
use inflow_dashboard::aggregator::{Aggregator, AggregatorConfig, SourceSpec};
use inflow_dashboard::event::DashboardEvent;
use inflow_dashboard::triage::{TriageCategorizer, TriageConfig};
use inflow_watcher::{calendar, drive, mail};

use crate::cli::DaemonOpts;

const EVENT_BUFFER: usize = 256;
/// Retention passes run hourly; the horizon itself comes from the options.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3_600);

pub async fn run_daemon(opts: DaemonOpts) -> anyhow::Result<()> {
    let channel = SyncChannel::new(
        BridgeConfig::new(opts.bridge_cmd.clone(), opts.bridge_args.clone())
            .with_request_timeout(Duration::from_secs(opts.bridge_timeout_secs)),
    );
    let synth = Synthesizer::new(channel.clone());

    let (out_tx, out_rx) = mpsc::channel::<DashboardEvent>(EVENT_BUFFER);
    let writer = tokio::spawn(write_ndjson(out_rx));

    let aggregator = Aggregator::spawn(
        build_sources(&opts, &channel),
        AggregatorConfig {
            cache_cap: opts.cache_cap,
            max_age_hours: opts.max_age_hours,
            watched_folders: opts.watched_folders.clone(),
        },
        Some(synth),
        out_tx.clone(),
    );

    for (kind, result) in aggregator.start_all().await {
        match result {
            Ok(()) => tracing::info!(source = %kind, "watcher running"),
            Err(err) => tracing::warn!(source = %kind, "watcher failed to start: {err}"),
        }
    }

    let triage = opts.enabled(SourceKind::Tracker).then(|| {
        TriageCategorizer::start(
            Arc::new(BridgeTrackerClient::new(channel.clone())),
            TriageConfig {
                poll_interval_ms: opts.triage_interval_ms,
                bulk_threshold: opts.bulk_threshold,
                low_risk_categories: opts.low_risk_categories.clone(),
            },
            out_tx.clone(),
        )
    });
    drop(out_tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
    cleanup.tick().await; // immediate first tick consumed

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = cleanup.tick() => {
                let report = aggregator.cleanup_expired().await;
                tracing::info!(
                    deleted = report.deleted,
                    failed = report.failed,
                    verified = report.verified,
                    "retention pass completed"
                );
            }
        }
    }

    if let Some(triage) = triage {
        triage.stop().await;
    }
    aggregator.shutdown().await;
    channel.stop().await;
    let _ = writer.await;
    tracing::info!("daemon stopped");
    Ok(())
}

/// One bridge-backed client per enabled watched source, with its per-source
/// normalizer and interval override.
fn build_sources(opts: &DaemonOpts, channel: &SyncChannel) -> BTreeMap<SourceKind, SourceSpec> {
    let mut sources = BTreeMap::new();

    if opts.enabled(SourceKind::Mail) {
        sources.insert(
            SourceKind::Mail,
            SourceSpec::new(
                Arc::new(BridgeSourceClient::new(
                    channel.clone(),
                    SourceKind::Mail,
                    mail::translate_message,
                )),
                override_interval(mail::default_config(), opts.mail_interval_ms),
            ),
        );
    }
    if opts.enabled(SourceKind::Drive) {
        sources.insert(
            SourceKind::Drive,
            SourceSpec::new(
                Arc::new(BridgeSourceClient::new(
                    channel.clone(),
                    SourceKind::Drive,
                    drive::translate_change,
                )),
                override_interval(drive::default_config(), opts.drive_interval_ms),
            ),
        );
    }
    if opts.enabled(SourceKind::Calendar) {
        sources.insert(
            SourceKind::Calendar,
            SourceSpec::new(
                Arc::new(BridgeSourceClient::new(
                    channel.clone(),
                    SourceKind::Calendar,
                    calendar::translate_event,
                )),
                override_interval(calendar::default_config(), opts.calendar_interval_ms),
            ),
        );
    }

    sources
}

fn override_interval(mut config: WatcherConfig, interval_ms: Option<u64>) -> WatcherConfig {
    if let Some(ms) = interval_ms {
        config.poll_interval_ms = ms;
    }
    config
}

/// Serialize dashboard events as one JSON object per line on stdout.
async fn write_ndjson(mut events: mpsc::Receiver<DashboardEvent>) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(mut line) => {
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    tracing::error!("stdout closed, stopping event writer");
                    return;
                }
                let _ = stdout.flush().await;
            }
            Err(err) => tracing::error!("event serialization failed: {err}"),
        }
    }
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!("failed to register SIGTERM handler: {err}");
                ctrl_c.await.ok();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
