//! Turns one provider record into a canonical movie upsert followed by a region release upsert.

use std::sync::Arc;

use marquee_core::{
    normalize_genres, parse_release_date, poster_url, release_year, MovieRecord, RawRelease,
    ReconcileOutcome, RegionDescriptor, ReleaseRecord, SkipReason,
};
use marquee_storage::CatalogStore;
use tracing::{debug, warn};

/// Normalized write pair for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRelease {
    pub movie: MovieRecord,
    pub release: ReleaseRecord,
}

/// Validates and normalizes a provider record. No partial output on failure.
pub fn normalize_release(
    raw: &RawRelease,
    region_code: &str,
    platform: &str,
) -> Result<NormalizedRelease, SkipReason> {
    if let Some(err) = &raw.decode_error {
        return Err(SkipReason::Malformed(err.clone()));
    }
    let external_id = raw
        .id
        .ok_or_else(|| SkipReason::MissingField("id".to_string()))?;
    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SkipReason::MissingField("title".to_string()))?
        .to_string();
    let release_date = effective_release_date(raw)?;
    let year = release_year(release_date);
    let genres = normalize_genres(&raw.genre_ids);
    let poster = poster_url(raw.poster_path.as_deref());
    let description = raw.overview.as_deref().unwrap_or_default().trim().to_string();

    let movie = MovieRecord {
        external_id,
        title: title.clone(),
        release_year: year,
        description: description.clone(),
        poster_url: poster.clone(),
        genres: genres.clone(),
        rating: raw.vote_average,
        release_date: Some(release_date),
    };
    let release = ReleaseRecord {
        external_id,
        region_code: region_code.to_string(),
        platform: platform.to_string(),
        release_date,
        title,
        genres,
        poster_url: poster,
        release_year: year,
        description,
    };
    Ok(NormalizedRelease { movie, release })
}

/// Prefers `primary_release_date`, falling back to `release_date`.
fn effective_release_date(raw: &RawRelease) -> Result<chrono::NaiveDate, SkipReason> {
    let mut malformed = None;
    for candidate in [raw.primary_release_date.as_deref(), raw.release_date.as_deref()]
        .into_iter()
        .flatten()
    {
        match parse_release_date(candidate) {
            Some(Ok(date)) => return Ok(date),
            Some(Err(bad)) => {
                malformed.get_or_insert(bad);
            }
            None => {}
        }
    }
    Err(match malformed {
        Some(bad) => SkipReason::InvalidReleaseDate(bad),
        None => SkipReason::MissingField("release_date".to_string()),
    })
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
    platform: String,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CatalogStore>, platform: impl Into<String>) -> Self {
        Self {
            store,
            platform: platform.into(),
        }
    }

    pub async fn reconcile(&self, raw: &RawRelease, region: &RegionDescriptor) -> ReconcileOutcome {
        let normalized = match normalize_release(raw, &region.code, &self.platform) {
            Ok(normalized) => normalized,
            Err(reason) => {
                debug!(region = %region.code, external_id = ?raw.id, %reason, "skipping record");
                return ReconcileOutcome::skipped(reason);
            }
        };

        let external_id = normalized.movie.external_id;
        let handle = match self.store.upsert_movie(&normalized.movie).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(region = %region.code, external_id, error = %err, "movie upsert failed");
                return ReconcileOutcome::skipped(SkipReason::Storage(err.to_string()));
            }
        };

        if let Err(err) = self.store.upsert_release(&handle, &normalized.release).await {
            warn!(region = %region.code, external_id, error = %err, "release upsert failed");
            return ReconcileOutcome::skipped(SkipReason::Storage(err.to_string()));
        }

        ReconcileOutcome::Imported { external_id }
    }
}
