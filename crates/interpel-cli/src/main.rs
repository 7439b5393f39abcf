use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use interpel_sync::{run_sync_once, snapshot_report_markdown, AppConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "interpel")]
#[command(about = "Watches Sejm inquiries for new government replies")]
struct Cli {
    /// Path to config.json; defaults to the one next to the executable.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding per-representative snapshots.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check every configured representative once and notify about new replies.
    Sync {
        /// Print digests to stdout and leave snapshots untouched.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print stored snapshot statistics as markdown.
    Summary,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = AppConfig::load(cli.config.as_deref(), cli.data_dir)?;

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => {
            let summary = run_sync_once(config, dry_run).await?;
            println!(
                "sync complete: run_id={} term={} representatives={} skipped={} new_answers={} delivered={} failed={} printed={}",
                summary.run_id,
                summary.term,
                summary.reports.len(),
                summary.skipped,
                summary.new_answers,
                summary.digests_delivered,
                summary.digests_failed,
                summary.digests_printed
            );
        }
        Commands::Summary => {
            println!("{}", snapshot_report_markdown(&config).await?);
        }
    }

    Ok(())
}
