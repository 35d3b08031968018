//! Core catalog model, provider record shapes, and genre normalization for Marquee.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const CRATE_NAME: &str = "marquee-core";

/// Platform label written on every release produced by the upcoming-release pipeline.
pub const PLATFORM_THEATRICAL: &str = "theatrical";

pub const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// A geographic market queried against the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub code: String,
    pub label: String,
    /// Value passed as the provider's `region` query parameter.
    pub provider_region: String,
}

impl RegionDescriptor {
    pub fn new(code: &str, label: &str, provider_region: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            provider_region: provider_region.to_string(),
        }
    }
}

/// Inclusive release-date window: `start <= release_date <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn starting(start: NaiveDate, width_days: u32) -> Self {
        Self {
            start,
            end: start + Duration::days(i64::from(width_days)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// One record as returned by the provider's discover endpoint.
///
/// Every field is optional on the wire, and `null` reads as absent. Validation happens during
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawRelease {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub primary_release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub genre_ids: Vec<i64>,
    /// Set when the record could not be decoded; the reconciler skips it.
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RawRelease {
    /// Decodes one record. An undecodable record keeps its `id` when readable and carries the
    /// decode error instead of failing its page.
    pub fn from_value(value: Value) -> Self {
        let id = value.get("id").and_then(Value::as_i64);
        match serde_json::from_value::<RawRelease>(value) {
            Ok(raw) => raw,
            Err(err) => RawRelease {
                id,
                decode_error: Some(err.to_string()),
                ..RawRelease::default()
            },
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<i64>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<RawRelease>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.into_iter().map(RawRelease::from_value).collect())
}

/// One page of discover results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePage {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub total_pages: u32,
    #[serde(default, deserialize_with = "lenient_records")]
    pub results: Vec<RawRelease>,
}

fn first_page() -> u32 {
    1
}

/// Normalized canonical payload, keyed by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub external_id: i64,
    pub title: String,
    pub release_year: i32,
    pub description: String,
    pub poster_url: Option<String>,
    pub genres: Vec<String>,
    pub rating: Option<f64>,
    pub release_date: Option<NaiveDate>,
}

/// Normalized region payload, keyed by `(external_id, region_code, platform)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub external_id: i64,
    pub region_code: String,
    pub platform: String,
    pub release_date: NaiveDate,
    pub title: String,
    pub genres: Vec<String>,
    pub poster_url: Option<String>,
    pub release_year: i32,
    pub description: String,
}

/// Persisted global movie row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMovie {
    pub id: Uuid,
    pub external_id: i64,
    pub title: String,
    pub release_year: i32,
    pub description: String,
    pub poster_url: Option<String>,
    pub genres: Vec<String>,
    pub rating: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted region/platform-scoped release row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRelease {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub external_id: i64,
    pub region_code: String,
    pub platform: String,
    pub release_date: NaiveDate,
    pub title: String,
    pub genres: Vec<String>,
    pub poster_url: Option<String>,
    pub release_year: i32,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    MissingField(String),
    InvalidReleaseDate(String),
    Malformed(String),
    Storage(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing required field: {field}"),
            SkipReason::InvalidReleaseDate(raw) => write!(f, "invalid release date: {raw}"),
            SkipReason::Malformed(err) => write!(f, "malformed record: {err}"),
            SkipReason::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Imported { external_id: i64 },
    Skipped { reason: SkipReason },
}

impl ReconcileOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self, ReconcileOutcome::Imported { .. })
    }
}

const GENRE_TABLE: &[(i64, &str)] = &[
    (12, "Adventure"),
    (14, "Fantasy"),
    (16, "Animation"),
    (18, "Drama"),
    (27, "Horror"),
    (28, "Action"),
    (35, "Comedy"),
    (36, "History"),
    (37, "Western"),
    (53, "Thriller"),
    (80, "Crime"),
    (99, "Documentary"),
    (878, "Science Fiction"),
    (9648, "Mystery"),
    (10402, "Music"),
    (10749, "Romance"),
    (10751, "Family"),
    (10752, "War"),
    (10770, "TV Movie"),
];

/// Display name for a provider genre code; unknown codes degrade to the code itself.
pub fn genre_name(code: i64) -> String {
    GENRE_TABLE
        .binary_search_by_key(&code, |(id, _)| *id)
        .map(|idx| GENRE_TABLE[idx].1.to_string())
        .unwrap_or_else(|_| code.to_string())
}

/// Maps provider genre codes to display names, preserving input order.
pub fn normalize_genres(codes: &[i64]) -> Vec<String> {
    codes.iter().map(|code| genre_name(*code)).collect()
}

pub fn poster_url(poster_path: Option<&str>) -> Option<String> {
    let path = poster_path.map(str::trim).filter(|p| !p.is_empty())?;
    if path.starts_with('/') {
        Some(format!("{POSTER_BASE_URL}{path}"))
    } else {
        Some(format!("{POSTER_BASE_URL}/{path}"))
    }
}

/// Parses a provider `YYYY-MM-DD` date. Blank strings count as absent.
pub fn parse_release_date(raw: &str) -> Option<Result<NaiveDate, String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| trimmed.to_string()))
}

pub fn release_year(date: NaiveDate) -> i32 {
    date.year()
}
