// Tests for result persistence

mod common;

use common::*;
use homefront_core::config::RunConfig;
use homefront_core::pipeline::check_target;
use homefront_core::report::{ErrorCode, ErrorDetails, ErrorResult, Parameters};
use homefront_core::store::{ResultStore, result_file_stem};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn error_record(url: &str) -> ErrorResult {
    ErrorResult::new(
        url,
        ErrorCode::CollectionFailed,
        "Navigation failed".to_string(),
        ErrorDetails::default(),
        Parameters::from_config(&RunConfig::default()),
    )
}

// ============================================================================
// Layout Tests
// ============================================================================

#[test]
fn test_store_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("results");

    let store = ResultStore::new(&root).unwrap();

    assert_eq!(store.root(), root.as_path());
    assert!(root.join("_error").is_dir());
    assert!(root.join("_logs").is_dir());
}

#[test]
fn test_error_record_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();
    let url = "https://broken.gov.tw/";

    let path = store.save_error(&error_record(url)).unwrap();
    assert!(path.starts_with(temp_dir.path().join("_error")));
    assert!(
        path.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&result_file_stem(url))
    );

    let loaded = store.load_error(url).unwrap().unwrap();
    assert_eq!(loaded.error_code, ErrorCode::CollectionFailed);
    assert_eq!(loaded.hostname.as_deref(), Some("broken.gov.tw"));
    assert!(store.load_success(url).unwrap().is_none());
}

#[test]
fn test_no_temp_files_left_behind() {
    let temp_dir = TempDir::new().unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();
    store.save_error(&error_record("https://a.gov.tw")).unwrap();

    let leftovers = fs::read_dir(temp_dir.path().join("_error"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_concurrent_saves_for_the_same_stem() {
    let temp_dir = TempDir::new().unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();

    // query strings are dropped from the stem, so all of these share one file
    let failures: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = &store;
                scope.spawn(move || {
                    (0..50)
                        .filter(|round| {
                            let url = format!("https://a.test/?q={}-{}", worker, round);
                            store.save_error(&error_record(&url)).is_err()
                        })
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(failures, 0);
    assert!(store.error_path("https://a.test/").exists());
    let leftovers = fs::read_dir(temp_dir.path().join("_error"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

// ============================================================================
// Stale Error Record Tests
// ============================================================================

#[tokio::test]
async fn test_success_removes_previous_error_record() {
    let temp_dir = TempDir::new().unwrap();
    let url = "https://portal.gov.tw";
    let ctx = build_context(
        test_config(temp_dir.path()),
        Arc::new(FixtureCollector::new()),
        fixture_dns(&["portal.gov.tw"]),
        Arc::new(fixture_geo()),
        None,
    )
    .await;
    let store = ctx.store.clone().unwrap();

    store.save_error(&error_record(url)).unwrap();
    assert!(store.error_path(url).exists());

    let result = check_target(&ctx, url).await.unwrap();
    store.save_success(&result).unwrap();

    assert!(store.success_path(url).exists());
    assert!(!store.error_path(url).exists());
}

#[tokio::test]
async fn test_prune_only_removes_superseded_errors() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = build_context(
        test_config(temp_dir.path()),
        Arc::new(FixtureCollector::new()),
        fixture_dns(&["portal.gov.tw"]),
        Arc::new(fixture_geo()),
        None,
    )
    .await;
    let store = ctx.store.clone().unwrap();

    let result = check_target(&ctx, "https://portal.gov.tw").await.unwrap();
    store.save_success(&result).unwrap();

    // written behind the store's back, as an older run would have left it
    let stale = store.error_path("https://portal.gov.tw");
    fs::write(&stale, "{}").unwrap();
    store.save_error(&error_record("https://broken.gov.tw")).unwrap();

    let removed = store.prune_stale_errors().unwrap();

    assert_eq!(removed, vec![stale.clone()]);
    assert!(!stale.exists());
    assert!(store.error_path("https://broken.gov.tw").exists());
}

#[test]
fn test_prune_on_empty_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();

    assert!(store.prune_stale_errors().unwrap().is_empty());
}
