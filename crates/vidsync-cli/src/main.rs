use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vidsync_sync::{
    build_cron_scheduler, IntervalScheduler, ScheduleMode, SyncCycle, SyncPipeline,
};

#[derive(Debug, Parser)]
#[command(name = "vidsync")]
#[command(about = "Keep a CMS collection in step with a video playlist")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single fetch, diff and insert cycle.
    Sync,
    /// Repeat cycles on the configured interval or cron schedule.
    Run {
        /// Stop after this many cycles. Rejected when VIDSYNC_CRON is set.
        #[arg(long)]
        max_cycles: Option<usize>,
    },
    /// Refresh the playlist snapshot only.
    FetchPlaylist,
    /// Refresh the collection snapshot only.
    FetchCollection,
    /// Print ids present in the playlist snapshot but not the collection snapshot.
    Diff,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info")?;

    let cli = Cli::parse();
    let pipeline = vidsync_sync::pipeline_from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = pipeline.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Run { max_cycles } => run_scheduled(pipeline, max_cycles).await?,
        Commands::FetchPlaylist => {
            let (videos, stored) = pipeline.refresh_playlist_snapshot().await?;
            match stored {
                Some(stored) => println!("saved {videos} videos to {}", stored.path.display()),
                None => println!("no videos were extracted; snapshot left unchanged"),
            }
        }
        Commands::FetchCollection => {
            let stored = pipeline.refresh_collection_snapshot().await?;
            println!("saved {} items to {}", stored.rows, stored.path.display());
        }
        Commands::Diff => {
            let missing = pipeline.preview_missing().await?;
            if missing.is_empty() {
                println!("no new video");
            }
            for id in missing {
                println!("{id}");
            }
        }
    }

    Ok(())
}

async fn run_scheduled(pipeline: SyncPipeline, max_cycles: Option<usize>) -> Result<()> {
    let cron = match ScheduleMode::resolve(pipeline.config().cron.as_deref(), max_cycles)? {
        ScheduleMode::Interval { max_cycles } => {
            let scheduler = IntervalScheduler::new(pipeline.config().interval);
            let report = scheduler.run(&pipeline, max_cycles).await;
            info!(
                cycles = report.cycles,
                succeeded = report.succeeded,
                failed = report.failed,
                "scheduler stopped"
            );
            return Ok(());
        }
        ScheduleMode::Cron(cron) => cron,
    };

    let cycle: Arc<dyn SyncCycle> = Arc::new(pipeline);
    let mut sched = build_cron_scheduler(cycle, &cron).await?;
    sched.start().await.context("starting scheduler")?;
    info!(%cron, "cron scheduler started; press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
