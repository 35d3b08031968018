//! Catalog persistence + HTTP fetch utilities for Marquee.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use marquee_core::{CanonicalMovie, MovieRecord, RegionRelease, ReleaseRecord};
use reqwest::StatusCode;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "marquee-storage";

/// Proof that a canonical movie row exists.
///
/// Only [`CatalogStore::upsert_movie`] implementations in this crate can issue one, and
/// [`CatalogStore::upsert_release`] requires it, so a region release can never be written
/// ahead of its owning movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieHandle {
    id: Uuid,
    external_id: i64,
}

impl MovieHandle {
    pub(crate) fn issue(id: Uuid, external_id: i64) -> Self {
        Self { id, external_id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn external_id(&self) -> i64 {
        self.external_id
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("movie handle for external id {handle} cannot own release for external id {release}")]
    HandleMismatch { handle: i64, release: i64 },
    #[error("movie {0} does not exist")]
    MissingMovie(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Upsert-by-unique-key persistence contract used by the reconciler.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Cheap connectivity probe used during preflight.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Insert or update the canonical movie keyed by `external_id`.
    async fn upsert_movie(&self, movie: &MovieRecord) -> Result<MovieHandle, StoreError>;

    /// Insert or update the release keyed by `(external_id, region_code, platform)`.
    async fn upsert_release(
        &self,
        movie: &MovieHandle,
        release: &ReleaseRecord,
    ) -> Result<Uuid, StoreError>;

    async fn count_releases(&self) -> Result<u64, StoreError>;

    async fn count_movies(&self) -> Result<u64, StoreError>;
}

fn check_handle(movie: &MovieHandle, release: &ReleaseRecord) -> Result<(), StoreError> {
    if movie.external_id != release.external_id {
        return Err(StoreError::HandleMismatch {
            handle: movie.external_id,
            release: release.external_id,
        });
    }
    Ok(())
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_movie(&self, movie: &MovieRecord) -> Result<MovieHandle, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO movies (
                id, external_id, title, release_year, description,
                poster_url, genres, rating, release_date, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (external_id) DO UPDATE SET
                title = EXCLUDED.title,
                release_year = EXCLUDED.release_year,
                description = EXCLUDED.description,
                poster_url = EXCLUDED.poster_url,
                genres = EXCLUDED.genres,
                rating = EXCLUDED.rating,
                release_date = EXCLUDED.release_date,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(movie.external_id)
        .bind(&movie.title)
        .bind(movie.release_year)
        .bind(&movie.description)
        .bind(movie.poster_url.as_deref())
        .bind(&movie.genres)
        .bind(movie.rating)
        .bind(movie.release_date)
        .fetch_one(&self.pool)
        .await?;

        let id: Uuid = row.try_get("id")?;
        Ok(MovieHandle::issue(id, movie.external_id))
    }

    async fn upsert_release(
        &self,
        movie: &MovieHandle,
        release: &ReleaseRecord,
    ) -> Result<Uuid, StoreError> {
        check_handle(movie, release)?;
        let row = sqlx::query(
            r#"
            INSERT INTO region_releases (
                id, movie_id, external_id, region_code, platform, release_date,
                title, genres, poster_url, release_year, description, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (external_id, region_code, platform) DO UPDATE SET
                movie_id = EXCLUDED.movie_id,
                release_date = EXCLUDED.release_date,
                title = EXCLUDED.title,
                genres = EXCLUDED.genres,
                poster_url = EXCLUDED.poster_url,
                release_year = EXCLUDED.release_year,
                description = EXCLUDED.description,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(movie.id)
        .bind(release.external_id)
        .bind(&release.region_code)
        .bind(&release.platform)
        .bind(release.release_date)
        .bind(&release.title)
        .bind(&release.genres)
        .bind(release.poster_url.as_deref())
        .bind(release.release_year)
        .bind(&release.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn count_releases(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM region_releases")
            .fetch_one(&self.pool)
            .await?;
        Ok(count_to_u64(count))
    }

    async fn count_movies(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count_to_u64(count))
    }
}

type ReleaseKey = (i64, String, String);

#[derive(Debug, Default)]
struct InMemoryState {
    movies: HashMap<i64, CanonicalMovie>,
    releases: HashMap<ReleaseKey, RegionRelease>,
}

/// Process-local store with the same keying rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn movies(&self) -> Vec<CanonicalMovie> {
        let state = self.state.lock().await;
        let mut movies: Vec<_> = state.movies.values().cloned().collect();
        movies.sort_by_key(|m| m.external_id);
        movies
    }

    pub async fn releases(&self) -> Vec<RegionRelease> {
        let state = self.state.lock().await;
        let mut releases: Vec<_> = state.releases.values().cloned().collect();
        releases.sort_by(|a, b| {
            (a.external_id, &a.region_code, &a.platform)
                .cmp(&(b.external_id, &b.region_code, &b.platform))
        });
        releases
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_movie(&self, movie: &MovieRecord) -> Result<MovieHandle, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let row = state
            .movies
            .entry(movie.external_id)
            .or_insert_with(|| CanonicalMovie {
                id: Uuid::new_v4(),
                external_id: movie.external_id,
                title: String::new(),
                release_year: movie.release_year,
                description: String::new(),
                poster_url: None,
                genres: Vec::new(),
                rating: None,
                release_date: None,
                updated_at: now,
            });
        row.title = movie.title.clone();
        row.release_year = movie.release_year;
        row.description = movie.description.clone();
        row.poster_url = movie.poster_url.clone();
        row.genres = movie.genres.clone();
        row.rating = movie.rating;
        row.release_date = movie.release_date;
        row.updated_at = now;
        Ok(MovieHandle::issue(row.id, movie.external_id))
    }

    async fn upsert_release(
        &self,
        movie: &MovieHandle,
        release: &ReleaseRecord,
    ) -> Result<Uuid, StoreError> {
        check_handle(movie, release)?;
        let mut state = self.state.lock().await;
        if !state.movies.values().any(|m| m.id == movie.id) {
            return Err(StoreError::MissingMovie(movie.id));
        }

        let now = Utc::now();
        let key = (
            release.external_id,
            release.region_code.clone(),
            release.platform.clone(),
        );
        let row = state.releases.entry(key).or_insert_with(|| RegionRelease {
            id: Uuid::new_v4(),
            movie_id: movie.id,
            external_id: release.external_id,
            region_code: release.region_code.clone(),
            platform: release.platform.clone(),
            release_date: release.release_date,
            title: String::new(),
            genres: Vec::new(),
            poster_url: None,
            release_year: release.release_year,
            description: String::new(),
            updated_at: now,
        });
        row.movie_id = movie.id;
        row.release_date = release.release_date;
        row.title = release.title.clone();
        row.genres = release.genres.clone();
        row.poster_url = release.poster_url.clone();
        row.release_year = release.release_year;
        row.description = release.description.clone();
        row.updated_at = now;
        Ok(row.id)
    }

    async fn count_releases(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.releases.len() as u64)
    }

    async fn count_movies(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.movies.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = u32::try_from(attempt_index)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Upper bound on concurrent requests through one fetcher.
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
    /// Fixed pause taken after every successful response, before the permit is released.
    pub pause_after_success: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            max_in_flight: 1,
            backoff: BackoffPolicy::default(),
            pause_after_success: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    backoff: BackoffPolicy,
    pause_after_success: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },
    #[error("fetcher is shut down")]
    Closed,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            backoff: config.backoff,
            pause_after_success: config.pause_after_success,
        })
    }

    /// GET `url` with `query`, retrying transient failures.
    ///
    /// `endpoint` is the loggable name of the request; query values (which may carry
    /// credentials) never reach the logs.
    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        endpoint: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", %run_id, endpoint);
        let response = self.fetch_with_retry(endpoint, url, query).instrument(span).await?;

        if !self.pause_after_success.is_zero() {
            tokio::time::sleep(self.pause_after_success).await;
        }
        Ok(response)
    }

    async fn fetch_with_retry(
        &self,
        endpoint: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse { status, body });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying provider request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        endpoint: endpoint.to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err.without_url(), attempt, "retrying provider request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err.without_url()));
                }
            }
        }
    }
}
