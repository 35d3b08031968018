mod support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use marquee_adapters::FixtureReleaseSource;
use marquee_core::{RawRelease, RegionDescriptor};
use marquee_storage::{CatalogStore, InMemoryCatalogStore};
use marquee_sync::{Orchestrator, RunSettings, RunStatus};
use support::{page_of, record, settings, FlakyStore, ScriptedSource};

fn anchor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn twenty_with_one_undated() -> Vec<RawRelease> {
    (1..=20)
        .map(|id| {
            if id == 7 {
                record(id, "Undated", "")
            } else {
                record(id, &format!("Film {id}"), "2026-11-01")
            }
        })
        .collect()
}

#[tokio::test]
async fn page_with_one_undated_record_imports_nineteen() {
    let source = ScriptedSource::new().with_page("US", page_of(1, 1, twenty_with_one_undated()));
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US"]));

    let summary = orchestrator.run_from(anchor()).await;

    assert_eq!(summary.status, RunStatus::Success);
    assert!(summary.success);
    assert_eq!(summary.total_imported, 19);
    assert_eq!(summary.total_skipped, 1);
    assert_eq!(summary.regions[0].imported, 19);
    assert_eq!(summary.regions[0].skipped, 1);
    assert_eq!(summary.release_rows, Some(19));
    assert_eq!(summary.movie_rows, Some(19));
    assert!(store.movies().await.iter().all(|m| m.external_id != 7));
}

#[tokio::test]
async fn repeated_runs_are_idempotent() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_page("US", page_of(1, 1, vec![record(1, "One", "2026-10-20")]))
            .with_page("GB", page_of(1, 1, vec![record(1, "One", "2026-10-22")])),
    );
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(source, store.clone(), settings(&["US", "GB"]));

    let first = orchestrator.run_from(anchor()).await;
    let movies_before = store.movies().await;
    let releases_before = store.releases().await;
    let second = orchestrator.run_from(anchor()).await;

    assert_eq!(first.total_imported, second.total_imported);
    assert_eq!(second.release_rows, Some(2));
    assert_eq!(second.movie_rows, Some(1));
    let movies_after = store.movies().await;
    let releases_after = store.releases().await;
    assert_eq!(movies_before[0].id, movies_after[0].id);
    let ids = |rows: &[marquee_core::RegionRelease]| rows.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(&releases_before), ids(&releases_after));
}

#[tokio::test]
async fn same_movie_in_two_regions_shares_one_canonical_row() {
    let source = ScriptedSource::new()
        .with_page("US", page_of(1, 1, vec![record(42, "Shared", "2026-10-20")]))
        .with_page("GB", page_of(1, 1, vec![record(42, "Shared", "2026-10-27")]));
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US", "GB"]));

    orchestrator.run_from(anchor()).await;

    let movies = store.movies().await;
    let releases = store.releases().await;
    assert_eq!(movies.len(), 1);
    assert_eq!(releases.len(), 2);
    assert!(releases.iter().all(|r| r.movie_id == movies[0].id));
    let dates: Vec<_> = releases.iter().map(|r| r.release_date.to_string()).collect();
    assert!(dates.contains(&"2026-10-20".to_string()));
    assert!(dates.contains(&"2026-10-27".to_string()));
}

#[tokio::test]
async fn failed_page_in_one_region_leaves_other_regions_intact() {
    let us_pages = |source: ScriptedSource| {
        source
            .with_page("US", page_of(1, 2, vec![record(1, "A", "2026-10-20")]))
            .with_page("US", page_of(2, 2, vec![record(2, "B", "2026-10-21")]))
    };
    let us_only = Orchestrator::new(
        Arc::new(us_pages(ScriptedSource::new())),
        Arc::new(InMemoryCatalogStore::new()),
        settings(&["US"]),
    )
    .run_from(anchor())
    .await;

    let source = Arc::new(
        us_pages(ScriptedSource::new())
            .with_page("GB", page_of(1, 3, vec![record(10, "C", "2026-10-22")]))
            .with_failure("GB", 2, "upstream returned 503")
            .with_page("GB", page_of(3, 3, vec![record(11, "D", "2026-10-23")])),
    );
    let orchestrator = Orchestrator::new(
        source.clone(),
        Arc::new(InMemoryCatalogStore::new()),
        settings(&["US", "GB"]),
    );
    let summary = orchestrator.run_from(anchor()).await;

    assert!(!summary.success);
    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.regions[0], us_only.regions[0]);
    let gb = &summary.regions[1];
    assert_eq!(gb.imported, 2);
    assert_eq!(gb.failed_pages, vec![2]);
    assert!(gb.had_errors);
    assert!(source.calls().contains(&("GB".to_string(), 3)));
}

#[tokio::test]
async fn paging_stops_at_last_reported_page() {
    let source = Arc::new(
        ScriptedSource::new().with_page("US", page_of(1, 1, vec![record(1, "Only", "2026-10-20")])),
    );
    let orchestrator = Orchestrator::new(
        source.clone(),
        Arc::new(InMemoryCatalogStore::new()),
        settings(&["US"]),
    );

    orchestrator.run_from(anchor()).await;

    assert_eq!(source.calls(), vec![("US".to_string(), 1)]);
}

#[tokio::test]
async fn page_cap_bounds_requests_per_region() {
    let mut source = ScriptedSource::new();
    for page in 1..=5 {
        source = source.with_page("US", page_of(page, 5, vec![record(page as i64, "P", "2026-10-20")]));
    }
    let source = Arc::new(source);
    let orchestrator = Orchestrator::new(
        source.clone(),
        Arc::new(InMemoryCatalogStore::new()),
        settings(&["US"]),
    );

    let summary = orchestrator.run_from(anchor()).await;

    assert_eq!(source.calls().len(), 3);
    assert_eq!(summary.total_imported, 3);
}

#[tokio::test]
async fn records_missing_required_fields_are_skipped_without_writes() {
    let mut untitled = record(2, "x", "2026-10-20");
    untitled.title = None;
    let mut unidentified = record(3, "No id", "2026-10-20");
    unidentified.id = None;
    let source = ScriptedSource::new().with_page(
        "US",
        page_of(
            1,
            1,
            vec![
                record(1, "Fine", "2026-10-20"),
                untitled,
                unidentified,
                record(4, "Bad date", "next summer"),
            ],
        ),
    );
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US"]));

    let summary = orchestrator.run_from(anchor()).await;

    assert_eq!(summary.total_imported, 1);
    assert_eq!(summary.total_skipped, 3);
    assert!(summary.success);
    assert_eq!(store.count_movies().await.unwrap(), 1);
    assert_eq!(store.count_releases().await.unwrap(), 1);
}

#[tokio::test]
async fn undecodable_record_skips_alone_and_page_still_counts() {
    let body = br#"{"page":1,"total_pages":1,"results":[
        {"id":1,"title":"First","release_date":"2026-10-20","genre_ids":[28]},
        {"id":2,"title":"Second","release_date":"2026-10-21","genre_ids":null},
        {"id":3,"title":"Third","release_date":"2026-10-22","genre_ids":"action"}
    ]}"#;
    let page = marquee_adapters::decode_release_page(body).unwrap();
    let source = ScriptedSource::new().with_page("US", page);
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US"]));

    let summary = orchestrator.run_from(anchor()).await;

    assert!(summary.success);
    assert_eq!(summary.total_imported, 2);
    assert_eq!(summary.total_skipped, 1);
    assert!(summary.regions[0].failed_pages.is_empty());
    assert!(store.movies().await.iter().all(|m| m.external_id != 3));
}

#[tokio::test]
async fn every_release_references_a_stored_movie() {
    let source = ScriptedSource::new()
        .with_page("US", page_of(1, 1, twenty_with_one_undated()))
        .with_page("GB", page_of(1, 1, vec![record(3, "Film 3", "2026-11-08"), record(99, "Solo", "2026-11-09")]));
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US", "GB"]));

    orchestrator.run_from(anchor()).await;

    let movie_ids: Vec<_> = store.movies().await.into_iter().map(|m| m.id).collect();
    let releases = store.releases().await;
    assert_eq!(releases.len(), 21);
    assert!(releases.iter().all(|r| movie_ids.contains(&r.movie_id)));
}

#[tokio::test]
async fn missing_credential_aborts_before_any_region() {
    let source = Arc::new(
        ScriptedSource::new()
            .unconfigured()
            .with_page("US", page_of(1, 1, vec![record(1, "A", "2026-10-20")])),
    );
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = Orchestrator::new(source.clone(), store.clone(), settings(&["US", "GB"]));

    let summary = orchestrator.run_from(anchor()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(!summary.success);
    assert!(summary.message.as_deref().unwrap().contains("not configured"));
    assert!(summary.regions.is_empty());
    assert_eq!(summary.total_imported, 0);
    assert_eq!(summary.release_rows, None);
    assert!(source.calls().is_empty());
    assert_eq!(store.count_movies().await.unwrap(), 0);
}

#[tokio::test]
async fn unreachable_store_aborts_before_any_fetch() {
    let source = Arc::new(
        ScriptedSource::new().with_page("US", page_of(1, 1, vec![record(1, "A", "2026-10-20")])),
    );
    let orchestrator = Orchestrator::new(
        source.clone(),
        Arc::new(FlakyStore::unreachable()),
        settings(&["US"]),
    );

    let summary = orchestrator.run_from(anchor()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.message.as_deref().unwrap().contains("unavailable"));
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn per_record_storage_failure_only_skips_that_record() {
    let source = ScriptedSource::new().with_page(
        "US",
        page_of(
            1,
            1,
            vec![
                record(1, "A", "2026-10-20"),
                record(2, "B", "2026-10-21"),
                record(3, "C", "2026-10-22"),
            ],
        ),
    );
    let store = Arc::new(FlakyStore::default().failing_movie(2).failing_release(3));
    let orchestrator = Orchestrator::new(Arc::new(source), store.clone(), settings(&["US"]));

    let summary = orchestrator.run_from(anchor()).await;

    assert!(summary.success);
    assert_eq!(summary.total_imported, 1);
    assert_eq!(summary.total_skipped, 2);
    assert_eq!(store.inner.count_releases().await.unwrap(), 1);
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/tmdb")
        .canonicalize()
        .unwrap()
}

#[tokio::test]
async fn recorded_fixture_run_reconciles_across_regions() {
    let store = Arc::new(InMemoryCatalogStore::new());
    let run_settings = RunSettings {
        regions: vec![
            RegionDescriptor::new("US", "United States", "US"),
            RegionDescriptor::new("GB", "United Kingdom", "GB"),
        ],
        ..settings(&[])
    };
    let orchestrator = Orchestrator::new(
        Arc::new(FixtureReleaseSource::new(fixtures_root())),
        store.clone(),
        run_settings,
    );

    let summary = orchestrator.run_from(anchor()).await;

    assert!(summary.success);
    let us = &summary.regions[0];
    assert_eq!((us.imported, us.skipped, us.pages_fetched), (21, 2, 2));
    let gb = &summary.regions[1];
    assert_eq!((gb.imported, gb.skipped), (4, 0));
    assert_eq!(summary.movie_rows, Some(23));
    assert_eq!(summary.release_rows, Some(25));
}
