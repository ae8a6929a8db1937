use clap::{Command, arg};
use homefront::handlers::*;
use homefront_core::data::SqliteStore;
use homefront_scanner::cache::{CacheEntry, CacheStore};
use homefront_scanner::result::{CategoryCounts, ResilienceSummary};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("www.gov.tw");
    assert_eq!(result, Some("https://www.gov.tw".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_parse_url_line_comment() {
    assert_eq!(parse_url_line("# https://example.com"), None);
    assert_eq!(parse_url_line("   "), None);
}

#[test]
fn test_parse_pop_codes() {
    assert_eq!(parse_pop_codes("tpe, KHH,,rmq "), vec!["TPE", "KHH", "RMQ"]);
    assert!(parse_pop_codes("").is_empty());
}

#[test]
fn test_format_matrix() {
    let summary = ResilienceSummary {
        domestic: CategoryCounts { cloud: 2, direct: 5 },
        foreign: CategoryCounts { cloud: 1, direct: 0 },
    };

    let matrix = format_matrix(&summary);
    let lines: Vec<&str> = matrix.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("cloud") && lines[0].contains("direct"));
    assert!(lines[1].starts_with("domestic"));
    assert!(lines[1].trim_end().ends_with('7'));
    assert!(lines[2].starts_with("foreign"));
    assert!(lines[2].trim_end().ends_with('1'));
}

fn prune_command() -> Command {
    Command::new("prune")
        .arg(
            arg!(-o --"output" <PATH>)
                .required(false)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"cache-db" <PATH>)
                .required(false)
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

#[test]
fn test_handle_prune_removes_superseded_errors() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("_error"))?;
    fs::write(root.join("www.gov.tw.json"), "{}")?;
    fs::write(root.join("_error").join("www.gov.tw.error.json"), "{}")?;
    fs::write(root.join("_error").join("broken.gov.tw.error.json"), "{}")?;

    let matches = prune_command().try_get_matches_from([
        "prune",
        "--output",
        root.to_str().unwrap(),
    ])?;
    handle_prune(&matches, true)?;

    assert!(!root.join("_error").join("www.gov.tw.error.json").exists());
    assert!(root.join("_error").join("broken.gov.tw.error.json").exists());
    assert!(root.join("www.gov.tw.json").exists());

    Ok(())
}

#[test]
fn test_handle_prune_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope");

    let matches = prune_command()
        .try_get_matches_from(["prune", "--output", missing.to_str().unwrap()])
        .unwrap();

    assert!(handle_prune(&matches, true).is_err());
    assert!(!missing.exists());
}

#[test]
fn test_handle_prune_purges_expired_cache_entries() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("cache.db");
    {
        let db = SqliteStore::new(&db_path)?;
        let old: CacheEntry = serde_json::from_value(serde_json::json!({
            "storedAt": "2020-01-01T00:00:00Z",
            "value": {"country": "TW"}
        }))?;
        db.store("ipinfo", "203.66.1.10", &old)?;
        db.store("adblock", "old-list", &old)?;
        db.store("ipinfo", "142.250.1.95", &CacheEntry::new(serde_json::json!({"country": "US"})))?;
    }

    let matches = prune_command().try_get_matches_from([
        "prune",
        "--output",
        temp_dir.path().to_str().unwrap(),
        "--cache-db",
        db_path.to_str().unwrap(),
    ])?;
    handle_prune(&matches, true)?;

    let db = SqliteStore::new(&db_path)?;
    assert!(db.load("ipinfo", "203.66.1.10")?.is_none());
    assert!(db.load("adblock", "old-list")?.is_none());
    assert!(db.load("ipinfo", "142.250.1.95")?.is_some());

    Ok(())
}

#[test]
fn test_handle_prune_missing_cache_db() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("absent.db");

    let matches = prune_command()
        .try_get_matches_from([
            "prune",
            "--output",
            temp_dir.path().to_str().unwrap(),
            "--cache-db",
            db_path.to_str().unwrap(),
        ])
        .unwrap();

    assert!(handle_prune(&matches, true).is_err());
    assert!(!db_path.exists());
}
