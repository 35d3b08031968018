//! Release source contracts + the provider and fixture-backed implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{DateWindow, RegionDescriptor, ReleasePage};
use marquee_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "marquee-adapters";

pub const TMDB_DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("release provider is not configured: {0}")]
    NotConfigured(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding provider response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("fixture error: {0:#}")]
    Fixture(#[from] anyhow::Error),
}

impl ProviderError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, ProviderError::NotConfigured(_))
    }
}

/// A paginated upcoming-release feed.
///
/// `fetch_page` failures are per page; callers decide whether to keep going.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Detects conditions under which every call would fail identically.
    fn ensure_configured(&self) -> Result<(), ProviderError>;

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        region: &RegionDescriptor,
        page: u32,
        window: &DateWindow,
    ) -> Result<ReleasePage, ProviderError>;
}

#[derive(Clone)]
pub struct TmdbDiscoverSource {
    http: Arc<HttpFetcher>,
    api_key: Option<String>,
    base_url: String,
}

impl std::fmt::Debug for TmdbDiscoverSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmdbDiscoverSource")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TmdbDiscoverSource {
    pub fn new(http: Arc<HttpFetcher>, api_key: Option<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn discover_url(&self) -> String {
        format!("{}/discover/movie", self.base_url)
    }
}

/// Query parameters for one discover page, excluding credentials.
pub fn discover_query(
    region: &RegionDescriptor,
    page: u32,
    window: &DateWindow,
) -> Vec<(&'static str, String)> {
    vec![
        ("region", region.provider_region.clone()),
        ("sort_by", "primary_release_date.asc".to_string()),
        ("release_date.gte", window.start.format("%Y-%m-%d").to_string()),
        ("release_date.lte", window.end.format("%Y-%m-%d").to_string()),
        ("with_release_type", "2|3".to_string()),
        ("include_adult", "false".to_string()),
        ("page", page.max(1).to_string()),
    ]
}

pub fn decode_release_page(bytes: &[u8]) -> Result<ReleasePage, ProviderError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl ReleaseSource for TmdbDiscoverSource {
    fn source_id(&self) -> &'static str {
        "tmdb"
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.api_key.is_none() {
            return Err(ProviderError::NotConfigured(
                "TMDB_API_KEY is not set".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        region: &RegionDescriptor,
        page: u32,
        window: &DateWindow,
    ) -> Result<ReleasePage, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::NotConfigured(
                "TMDB_API_KEY is not set".to_string(),
            ));
        };

        let mut query = discover_query(region, page, window);
        query.push(("api_key", api_key.clone()));

        let endpoint = format!("discover/movie region={} page={page}", region.code);
        let response = self
            .http
            .fetch_bytes(ctx.run_id, &endpoint, &self.discover_url(), &query)
            .await?;
        let decoded = decode_release_page(&response.body)?;
        debug!(
            region = %region.code,
            page,
            results = decoded.results.len(),
            total_pages = decoded.total_pages,
            "decoded discover page"
        );
        Ok(decoded)
    }
}

/// Replays recorded discover pages from `<root>/<region>/page-<n>.json`.
///
/// A missing page file reads as an empty final page.
#[derive(Debug, Clone)]
pub struct FixtureReleaseSource {
    root: PathBuf,
}

impl FixtureReleaseSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn page_path(&self, region: &RegionDescriptor, page: u32) -> PathBuf {
        self.root
            .join(region.code.to_ascii_lowercase())
            .join(format!("page-{page}.json"))
    }
}

pub async fn load_fixture_page(path: impl AsRef<Path>) -> Result<ReleasePage> {
    let path = path.as_ref();
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl ReleaseSource for FixtureReleaseSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if !self.root.is_dir() {
            return Err(ProviderError::NotConfigured(format!(
                "fixture directory {} does not exist",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        _ctx: &AdapterContext,
        region: &RegionDescriptor,
        page: u32,
        _window: &DateWindow,
    ) -> Result<ReleasePage, ProviderError> {
        let path = self.page_path(region, page);
        if !path.exists() {
            return Ok(ReleasePage {
                page,
                total_pages: page,
                results: Vec::new(),
            });
        }
        Ok(load_fixture_page(&path).await?)
    }
}
