//! Operational HTTP surface: manual sync trigger, run status, health.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use marquee_sync::{ReleaseScheduler, SchedulerState, SyncConfig, SyncError, SyncService};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "marquee-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub scheduler_state: Arc<SchedulerState>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        let scheduler_state = service.scheduler_state();
        Self {
            service,
            scheduler_state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub scheduler_armed: bool,
    pub regions: Vec<String>,
    pub page_cap: u32,
    pub window_days: u32,
    pub platform: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/sync/status", get(status_handler))
        .route("/sync/run", post(run_handler))
        .with_state(Arc::new(state))
}

/// Binds `addr` and serves until the listener fails.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "marquee web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Production wiring; also arms the daily schedule when `MARQUEE_SCHEDULER_ENABLED` is set.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let service = Arc::new(marquee_sync::service_from_env().await?);
    let scheduler = ReleaseScheduler::new(Arc::clone(&service), service.scheduler_state());
    if config.scheduler_enabled {
        scheduler.schedule(&config.sync_cron).await?;
    }
    let served = serve(AppState::new(service), &config.bind_addr).await;
    scheduler.stop().await?;
    served
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let settings = state.service.orchestrator().settings();
    Json(SyncStatus {
        running: state.service.is_running(),
        scheduler_armed: state.scheduler_state.is_armed(),
        regions: settings.regions.iter().map(|r| r.code.clone()).collect(),
        page_cap: settings.page_cap,
        window_days: settings.window_days,
        platform: settings.platform.clone(),
    })
    .into_response()
}

async fn run_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.run_now().await {
        Ok(summary) => Json(summary).into_response(),
        Err(SyncError::RunInProgress) => {
            warn!("manual sync rejected; a run is already in progress");
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": SyncError::RunInProgress.to_string() })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "manual sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
