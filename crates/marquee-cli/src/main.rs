use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marquee_adapters::{FixtureReleaseSource, ReleaseSource};
use marquee_storage::{CatalogStore, InMemoryCatalogStore, PgCatalogStore};
use marquee_sync::{ReleaseScheduler, RunStatus, SyncConfig, SyncRunSummary};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "marquee")]
#[command(about = "Upcoming-release catalog sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync immediately.
    Sync {
        /// Reconcile into an in-memory store instead of Postgres.
        #[arg(long)]
        dry_run: bool,
        /// Replay recorded provider pages from this directory instead of calling the provider.
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// Arm the daily sync and run until Ctrl-C.
    Schedule {
        #[arg(long)]
        cron: Option<String>,
    },
    Migrate,
    Serve,
    /// Summarize the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        fixtures: None,
    }) {
        Commands::Sync { dry_run, fixtures } => {
            let source: Arc<dyn ReleaseSource> = match fixtures {
                Some(root) => Arc::new(FixtureReleaseSource::new(root)),
                None => Arc::new(marquee_sync::tmdb_source(&config)?),
            };
            let store: Arc<dyn CatalogStore> = if dry_run {
                Arc::new(InMemoryCatalogStore::new())
            } else {
                let store = PgCatalogStore::connect(&config.database_url, 5).await?;
                store.migrate().await.context("running catalog migrations")?;
                Arc::new(store)
            };
            let service = marquee_sync::build_service(&config, source, store).await?;
            let summary = service.run_now().await?;
            print_summary(&summary);
            if summary.status == RunStatus::Failed {
                anyhow::bail!(
                    "sync aborted: {}",
                    summary.message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Schedule { cron } => {
            let service = Arc::new(marquee_sync::service_from_env().await?);
            let scheduler = ReleaseScheduler::new(Arc::clone(&service), service.scheduler_state());
            let cron = cron.unwrap_or_else(|| config.sync_cron.clone());
            scheduler.schedule(&cron).await?;
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
            scheduler.stop().await?;
        }
        Commands::Migrate => {
            let store = PgCatalogStore::connect(&config.database_url, 1).await?;
            store.migrate().await.context("running catalog migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            marquee_web::serve_from_env().await?;
        }
        Commands::Report { runs, dir } => {
            let dir = dir
                .or(config.reports_dir)
                .context("no reports directory; pass --dir or set MARQUEE_REPORTS_DIR")?;
            print!("{}", marquee_sync::report_daily_markdown(runs, &dir)?);
        }
    }

    Ok(())
}

fn print_summary(summary: &SyncRunSummary) {
    println!(
        "sync complete: run_id={} success={} imported={} skipped={} releases={} movies={}",
        summary.run_id,
        summary.success,
        summary.total_imported,
        summary.total_skipped,
        summary
            .release_rows
            .map(|n| n.to_string())
            .unwrap_or_else(|| "n/a".into()),
        summary
            .movie_rows
            .map(|n| n.to_string())
            .unwrap_or_else(|| "n/a".into()),
    );
    for region in &summary.regions {
        println!(
            "  {:<3} imported={} skipped={} failed_pages={:?}",
            region.code, region.imported, region.skipped, region.failed_pages
        );
    }
}
