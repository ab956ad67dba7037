//! inflow: background data-synchronization daemon binary.
//! Single-process binary embedding watchers, aggregator, triage, and the
//! synthesis bridge; the dashboard UI consumes NDJSON from stdout.

use clap::Parser;

mod cli;
mod daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("INFLOW_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            // stdout carries the NDJSON event stream; logs go to stderr.
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .with_writer(std::io::stderr)
                .init();

            tracing::info!("inflow daemon starting");
            daemon::run_daemon(opts).await?;
        }
    }

    Ok(())
}
