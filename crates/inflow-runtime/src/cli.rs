//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

use inflow_core::types::SourceKind;

#[derive(Parser)]
#[command(name = "inflow", about = "background data-sync daemon for a personal dashboard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the sync daemon (watchers + triage + bridge, NDJSON on stdout)
    Daemon(DaemonOpts),
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Program spawned as the synthesis bridge subprocess
    #[arg(long, default_value = "node")]
    pub bridge_cmd: String,

    /// Argument passed to the bridge subprocess (repeatable)
    #[arg(long = "bridge-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub bridge_args: Vec<String>,

    /// Per-request bridge timeout in seconds
    #[arg(long, default_value = "30")]
    pub bridge_timeout_secs: u64,

    /// Disable a source (repeatable: mail, drive, calendar, tracker)
    #[arg(long = "disable", value_name = "SOURCE")]
    pub disabled: Vec<SourceKind>,

    /// Mailbox poll interval override in milliseconds
    #[arg(long)]
    pub mail_interval_ms: Option<u64>,

    /// Cloud-file poll interval override in milliseconds
    #[arg(long)]
    pub drive_interval_ms: Option<u64>,

    /// Calendar poll interval override in milliseconds
    #[arg(long)]
    pub calendar_interval_ms: Option<u64>,

    /// Triage cycle interval in milliseconds (floor: 30000)
    #[arg(long, default_value = "120000")]
    pub triage_interval_ms: u64,

    /// Minimum low-risk count for a bulk-cleanup action
    #[arg(long, default_value = "5")]
    pub bulk_threshold: u64,

    /// Category safe for auto-execution (repeatable)
    #[arg(long = "low-risk-category", value_name = "CATEGORY", default_values_t = [String::from("subscribed")])]
    pub low_risk_categories: Vec<String>,

    /// Cached items per kind
    #[arg(long, default_value = "50")]
    pub cache_cap: usize,

    /// Retention horizon for the periodic cleanup pass
    #[arg(long, default_value = "48")]
    pub max_age_hours: u32,

    /// Mailbox folder allow-list entry (repeatable; empty admits all)
    #[arg(long = "watched-folder", value_name = "FOLDER")]
    pub watched_folders: Vec<String>,
}

impl DaemonOpts {
    pub fn enabled(&self, kind: SourceKind) -> bool {
        !self.disabled.contains(&kind)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_defaults() {
        let cli = Cli::try_parse_from(["inflow", "daemon"]).expect("parse");
        let Command::Daemon(opts) = cli.command;
        assert_eq!(opts.bridge_cmd, "node");
        assert_eq!(opts.cache_cap, 50);
        assert_eq!(opts.max_age_hours, 48);
        assert_eq!(opts.low_risk_categories, vec!["subscribed"]);
        assert!(opts.enabled(SourceKind::Mail));
        assert!(opts.enabled(SourceKind::Tracker));
    }

    #[test]
    fn disable_flag_parses_source_names() {
        let cli = Cli::try_parse_from([
            "inflow", "daemon", "--disable", "drive", "--disable", "tracker",
        ])
        .expect("parse");
        let Command::Daemon(opts) = cli.command;
        assert!(opts.enabled(SourceKind::Mail));
        assert!(!opts.enabled(SourceKind::Drive));
        assert!(!opts.enabled(SourceKind::Tracker));
    }

    #[test]
    fn repeatable_flags_accumulate() {
        let cli = Cli::try_parse_from([
            "inflow",
            "daemon",
            "--bridge-arg",
            "bridge.js",
            "--bridge-arg",
            "--headless",
            "--watched-folder",
            "INBOX",
            "--watched-folder",
            "Work",
        ])
        .expect("parse");
        let Command::Daemon(opts) = cli.command;
        assert_eq!(opts.bridge_args, vec!["bridge.js", "--headless"]);
        assert_eq!(opts.watched_folders, vec!["INBOX", "Work"]);
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!(Cli::try_parse_from(["inflow", "daemon", "--disable", "pager"]).is_err());
    }
}
