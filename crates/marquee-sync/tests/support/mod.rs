#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use marquee_adapters::{AdapterContext, ProviderError, ReleaseSource};
use marquee_core::{
    DateWindow, MovieRecord, RawRelease, RegionDescriptor, ReleasePage, ReleaseRecord,
    PLATFORM_THEATRICAL,
};
use marquee_storage::{CatalogStore, FetchError, InMemoryCatalogStore, MovieHandle, StoreError};
use marquee_sync::RunSettings;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub fn region(code: &str) -> RegionDescriptor {
    RegionDescriptor::new(code, code, code)
}

pub fn settings(codes: &[&str]) -> RunSettings {
    RunSettings {
        regions: codes.iter().map(|c| region(c)).collect(),
        page_cap: 3,
        window_days: 30,
        platform: PLATFORM_THEATRICAL.to_string(),
    }
}

pub fn record(id: i64, title: &str, date: &str) -> RawRelease {
    RawRelease {
        id: Some(id),
        title: Some(title.to_string()),
        release_date: Some(date.to_string()),
        overview: Some(format!("Overview of {title}")),
        poster_path: Some(format!("/{id}.jpg")),
        vote_average: Some(7.1),
        genre_ids: vec![28, 12],
        ..RawRelease::default()
    }
}

pub fn page_of(page: u32, total_pages: u32, results: Vec<RawRelease>) -> ReleasePage {
    ReleasePage {
        page,
        total_pages,
        results,
    }
}

/// Release source that replays scripted pages keyed by `(region code, page)`.
///
/// Unscripted pages read as an empty final page. An optional gate holds every fetch until
/// the test releases permits.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<(String, u32), Result<ReleasePage, String>>,
    unconfigured: bool,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, code: &str, page: ReleasePage) -> Self {
        self.pages.insert((code.to_string(), page.page), Ok(page));
        self
    }

    pub fn with_failure(mut self, code: &str, page: u32, message: &str) -> Self {
        self.pages
            .insert((code.to_string(), page), Err(message.to_string()));
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.unconfigured = true;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseSource for ScriptedSource {
    fn source_id(&self) -> &'static str {
        "scripted"
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.unconfigured {
            return Err(ProviderError::NotConfigured("no credential".to_string()));
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
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.calls.lock().unwrap().push((region.code.clone(), page));
        match self.pages.get(&(region.code.clone(), page)) {
            Some(Ok(scripted)) => Ok(scripted.clone()),
            Some(Err(message)) => Err(ProviderError::Fetch(FetchError::HttpStatus {
                status: 503,
                endpoint: message.clone(),
            })),
            None => Ok(page_of(page, page, Vec::new())),
        }
    }
}

/// In-memory store with injectable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryCatalogStore,
    unreachable: bool,
    failing_movies: HashSet<i64>,
    failing_releases: HashSet<i64>,
}

impl FlakyStore {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn failing_movie(mut self, external_id: i64) -> Self {
        self.failing_movies.insert(external_id);
        self
    }

    pub fn failing_release(mut self, external_id: i64) -> Self {
        self.failing_releases.insert(external_id);
        self
    }
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.unreachable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.ping().await
    }

    async fn upsert_movie(&self, movie: &MovieRecord) -> Result<MovieHandle, StoreError> {
        if self.failing_movies.contains(&movie.external_id) {
            return Err(StoreError::Unavailable("movie write rejected".to_string()));
        }
        self.inner.upsert_movie(movie).await
    }

    async fn upsert_release(
        &self,
        movie: &MovieHandle,
        release: &ReleaseRecord,
    ) -> Result<Uuid, StoreError> {
        if self.failing_releases.contains(&release.external_id) {
            return Err(StoreError::Unavailable("release write rejected".to_string()));
        }
        self.inner.upsert_release(movie, release).await
    }

    async fn count_releases(&self) -> Result<u64, StoreError> {
        self.inner.count_releases().await
    }

    async fn count_movies(&self) -> Result<u64, StoreError> {
        self.inner.count_movies().await
    }
}
