// On-disk result records

use crate::report::{BatchSummary, ErrorResult, TargetResult};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use url::Url;

pub const ERROR_DIR: &str = "_error";
pub const LOG_DIR: &str = "_logs";
pub const MAX_STEM_LEN: usize = 150;
const ERROR_SUFFIX: &str = ".error.json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File stem for a target: host plus path, flattened and bounded.
///
/// Success and error records for one input URL always share this stem.
pub fn result_file_stem(url: &str) -> String {
    let raw = match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or("unknown"), parsed.path()),
        Err(_) => url.to_string(),
    };
    let flattened: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let trimmed = flattened.trim_matches('_');
    let stem: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    if stem.is_empty() { "target".to_string() } else { stem }
}

/// Writes success, error and batch records under one output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Creates the directory layout. Failure here is a setup error.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ERROR_DIR))?;
        fs::create_dir_all(root.join(LOG_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn success_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.json", result_file_stem(url)))
    }

    pub fn error_path(&self, url: &str) -> PathBuf {
        self.root
            .join(ERROR_DIR)
            .join(format!("{}{}", result_file_stem(url), ERROR_SUFFIX))
    }

    /// Write the success record, then drop any error record for the same target.
    pub fn save_success(&self, result: &TargetResult) -> io::Result<PathBuf> {
        let path = self.success_path(&result.url);
        write_json(&path, result)?;

        let stale = self.error_path(&result.url);
        match fs::remove_file(&stale) {
            Ok(()) => info!("Removed stale error record {}", stale.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        debug!("Saved {}", path.display());
        Ok(path)
    }

    pub fn save_error(&self, result: &ErrorResult) -> io::Result<PathBuf> {
        let path = self.error_path(&result.url);
        write_json(&path, result)?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    /// `batch_summary_<millis>.json`, plus `batch_errors_<millis>.json` when any target failed.
    pub fn save_batch_summary(&self, summary: &BatchSummary) -> io::Result<PathBuf> {
        let millis = summary.finished_at.timestamp_millis();
        let logs = self.root.join(LOG_DIR);
        fs::create_dir_all(&logs)?;

        let path = logs.join(format!("batch_summary_{}.json", millis));
        write_json(&path, summary)?;

        if !summary.error_sites.is_empty() {
            let errors = serde_json::json!({
                "runId": summary.run_id,
                "finishedAt": summary.finished_at,
                "errorSites": summary.error_sites,
            });
            write_json(&logs.join(format!("batch_errors_{}.json", millis)), &errors)?;
        }
        Ok(path)
    }

    pub fn load_success(&self, url: &str) -> io::Result<Option<TargetResult>> {
        read_json(&self.success_path(url))
    }

    pub fn load_error(&self, url: &str) -> io::Result<Option<ErrorResult>> {
        read_json(&self.error_path(url))
    }

    /// Delete every error record whose target also has a success record.
    pub fn prune_stale_errors(&self) -> io::Result<Vec<PathBuf>> {
        let error_dir = self.root.join(ERROR_DIR);
        if !error_dir.exists() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for entry in fs::read_dir(&error_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(ERROR_SUFFIX) else {
                continue;
            };
            if self.root.join(format!("{}.json", stem)).exists() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed.push(entry.path()),
                    Err(e) => warn!("Cannot remove {}: {}", entry.path().display(), e),
                }
            }
        }
        info!("Pruned {} stale error record(s)", removed.len());
        Ok(removed)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    // Each writer gets its own temp file; the last rename wins.
    let tmp = path.with_extension(format!(
        "json.{}-{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_file_stem() {
        assert_eq!(result_file_stem("https://example.com/"), "example.com");
        assert_eq!(result_file_stem("https://www.gov.tw/news/list?id=3"), "www.gov.tw_news_list");
        assert_eq!(result_file_stem("https://a.test/x y/é"), "a.test_x_20y__C3_A9");

        let long = format!("https://example.com/{}", "a".repeat(400));
        assert_eq!(result_file_stem(&long).len(), MAX_STEM_LEN);
    }

    #[test]
    fn test_bare_and_www_targets_do_not_collide() {
        assert_ne!(
            result_file_stem("https://example.com/"),
            result_file_stem("https://www.example.com/")
        );
    }
}
