//! Region/page orchestration: preflight, one task per region, page loop, aggregated report.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use marquee_adapters::{AdapterContext, ReleaseSource};
use marquee_core::{DateWindow, ReconcileOutcome, RegionDescriptor};
use marquee_storage::CatalogStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::reconcile::Reconciler;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub regions: Vec<RegionDescriptor>,
    pub page_cap: u32,
    pub window_days: u32,
    pub platform: String,
}

/// Unit of work for one region. Tasks are independent of each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTask {
    pub region: RegionDescriptor,
    pub page_cap: u32,
    pub window: DateWindow,
}

pub fn plan_region_tasks(
    regions: &[RegionDescriptor],
    page_cap: u32,
    window: DateWindow,
) -> VecDeque<RegionTask> {
    regions
        .iter()
        .map(|region| RegionTask {
            region: region.clone(),
            page_cap,
            window,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Reconciled {
        page: u32,
        outcomes: Vec<ReconcileOutcome>,
    },
    FetchFailed {
        page: u32,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionReport {
    pub code: String,
    pub label: String,
    pub imported: u64,
    pub skipped: u64,
    pub pages_fetched: u32,
    pub failed_pages: Vec<u32>,
    pub had_errors: bool,
}

impl RegionReport {
    pub fn new(region: &RegionDescriptor) -> Self {
        Self {
            code: region.code.clone(),
            label: region.label.clone(),
            imported: 0,
            skipped: 0,
            pages_fetched: 0,
            failed_pages: Vec::new(),
            had_errors: false,
        }
    }

    pub fn fold_page(mut self, outcome: &PageOutcome) -> Self {
        match outcome {
            PageOutcome::Reconciled { outcomes, .. } => {
                self.pages_fetched += 1;
                let imported = outcomes.iter().filter(|o| o.is_imported()).count() as u64;
                self.imported += imported;
                self.skipped += outcomes.len() as u64 - imported;
            }
            PageOutcome::FetchFailed { page, .. } => {
                self.failed_pages.push(*page);
                self.had_errors = true;
            }
        }
        self
    }
}

/// Run-level accumulator over region reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTally {
    pub regions: Vec<RegionReport>,
}

impl RunTally {
    pub fn fold_region(mut self, report: RegionReport) -> Self {
        self.regions.push(report);
        self
    }

    pub fn total_imported(&self) -> u64 {
        self.regions.iter().map(|r| r.imported).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.regions.iter().map(|r| r.skipped).sum()
    }

    pub fn had_errors(&self) -> bool {
        self.regions.iter().any(|r| r.had_errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub success: bool,
    pub message: Option<String>,
    pub window: Option<DateWindow>,
    pub total_imported: u64,
    pub total_skipped: u64,
    pub release_rows: Option<u64>,
    pub movie_rows: Option<u64>,
    pub regions: Vec<RegionReport>,
}

impl SyncRunSummary {
    fn fatal(run_id: Uuid, started_at: DateTime<Utc>, clock: Instant, message: String) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms(clock),
            status: RunStatus::Failed,
            success: false,
            message: Some(message),
            window: None,
            total_imported: 0,
            total_skipped: 0,
            release_rows: None,
            movie_rows: None,
            regions: Vec::new(),
        }
    }

    pub fn log(&self) {
        let status = match self.status {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        match self.status {
            RunStatus::Success => info!(
                run_id = %self.run_id,
                status,
                duration_ms = self.duration_ms,
                imported = self.total_imported,
                skipped = self.total_skipped,
                release_rows = ?self.release_rows,
                movie_rows = ?self.movie_rows,
                "catalog sync finished"
            ),
            RunStatus::Partial => warn!(
                run_id = %self.run_id,
                status,
                duration_ms = self.duration_ms,
                imported = self.total_imported,
                skipped = self.total_skipped,
                release_rows = ?self.release_rows,
                movie_rows = ?self.movie_rows,
                "catalog sync finished with errors"
            ),
            RunStatus::Failed => error!(
                run_id = %self.run_id,
                status,
                duration_ms = self.duration_ms,
                imported = self.total_imported,
                skipped = self.total_skipped,
                release_rows = ?self.release_rows,
                movie_rows = ?self.movie_rows,
                reason = self.message.as_deref().unwrap_or_default(),
                "catalog sync aborted"
            ),
        }
        for region in &self.regions {
            info!(
                run_id = %self.run_id,
                region = %region.code,
                label = %region.label,
                imported = region.imported,
                skipped = region.skipped,
                pages_fetched = region.pages_fetched,
                failed_pages = ?region.failed_pages,
                "region breakdown"
            );
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct Orchestrator {
    source: Arc<dyn ReleaseSource>,
    store: Arc<dyn CatalogStore>,
    reconciler: Reconciler,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn CatalogStore>,
        settings: RunSettings,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), settings.platform.clone());
        Self {
            source,
            store,
            reconciler,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub async fn run(&self) -> SyncRunSummary {
        self.run_from(Utc::now().date_naive()).await
    }

    /// Runs with the release window anchored at `start_date`.
    pub async fn run_from(&self, start_date: NaiveDate) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%run_id, source = self.source.source_id(), "catalog sync started");

        if let Err(err) = self.source.ensure_configured() {
            let summary = SyncRunSummary::fatal(run_id, started_at, clock, err.to_string());
            summary.log();
            return summary;
        }
        if let Err(err) = self.store.ping().await {
            let summary = SyncRunSummary::fatal(
                run_id,
                started_at,
                clock,
                format!("catalog store unavailable: {err}"),
            );
            summary.log();
            return summary;
        }

        let ctx = AdapterContext {
            run_id,
            started_at,
        };
        let window = DateWindow::starting(start_date, self.settings.window_days);
        let mut queue = plan_region_tasks(&self.settings.regions, self.settings.page_cap, window);

        let mut tally = RunTally::default();
        while let Some(task) = queue.pop_front() {
            let pages = self.run_region_task(&ctx, &task).await;
            let report = pages
                .iter()
                .fold(RegionReport::new(&task.region), RegionReport::fold_page);
            tally = tally.fold_region(report);
        }

        let release_rows = match self.store.count_releases().await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(%run_id, error = %err, "counting region releases failed");
                None
            }
        };
        let movie_rows = match self.store.count_movies().await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(%run_id, error = %err, "counting movies failed");
                None
            }
        };

        let had_errors = tally.had_errors();
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms(clock),
            status: if had_errors {
                RunStatus::Partial
            } else {
                RunStatus::Success
            },
            success: !had_errors,
            message: had_errors.then(|| "one or more pages failed to fetch".to_string()),
            window: Some(window),
            total_imported: tally.total_imported(),
            total_skipped: tally.total_skipped(),
            release_rows,
            movie_rows,
            regions: tally.regions,
        };
        summary.log();
        summary
    }

    /// Fetches and reconciles pages `1..=page_cap` for one region, stopping early once the
    /// provider reports no further pages. Fetch failures move on to the next page.
    pub async fn run_region_task(&self, ctx: &AdapterContext, task: &RegionTask) -> Vec<PageOutcome> {
        let mut pages = Vec::new();
        for page in 1..=task.page_cap {
            match self
                .source
                .fetch_page(ctx, &task.region, page, &task.window)
                .await
            {
                Ok(release_page) => {
                    let mut outcomes = Vec::with_capacity(release_page.results.len());
                    for raw in &release_page.results {
                        outcomes.push(self.reconciler.reconcile(raw, &task.region).await);
                    }
                    info!(
                        run_id = %ctx.run_id,
                        region = %task.region.code,
                        page,
                        records = outcomes.len(),
                        imported = outcomes.iter().filter(|o| o.is_imported()).count(),
                        "page reconciled"
                    );
                    pages.push(PageOutcome::Reconciled { page, outcomes });
                    if page >= release_page.total_pages {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        run_id = %ctx.run_id,
                        region = %task.region.code,
                        page,
                        error = %err,
                        "page fetch failed; continuing"
                    );
                    pages.push(PageOutcome::FetchFailed {
                        page,
                        error: err.to_string(),
                    });
                }
            }
        }
        pages
    }
}
