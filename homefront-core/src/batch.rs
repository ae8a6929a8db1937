// Batch worker pool over a target list

use crate::context::RunContext;
use crate::error::{CoreError, Result};
use crate::pipeline::{check_target, persist_outcome};
use crate::report::{
    BatchOptions, BatchStats, BatchSummary, ErrorCode, ErrorDetails, ErrorSite, TargetOutcome,
};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// One entry of a target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub url: String,
    #[serde(
        default,
        deserialize_with = "deserialize_rank",
        skip_serializing_if = "Option::is_none"
    )]
    pub rank: Option<u64>,
}

impl BatchTarget {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            website: None,
            url: url.into(),
            rank: None,
        }
    }

    pub fn label(&self) -> &str {
        self.website.as_deref().unwrap_or(&self.url)
    }
}

/// Ranks show up both as numbers and as numeric strings.
fn deserialize_rank<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetEntry {
    Url(String),
    Target(BatchTarget),
}

impl From<TargetEntry> for BatchTarget {
    fn from(entry: TargetEntry) -> Self {
        match entry {
            TargetEntry::Url(url) => BatchTarget::from_url(url),
            TargetEntry::Target(target) => target,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLog {
    error_sites: Vec<TargetEntry>,
}

/// Parse a single line as a URL, adding `https://` when the scheme is missing.
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line.contains("://") {
        return Url::parse(line)
            .ok()
            .filter(|u| u.host_str().is_some())
            .map(|_| line.to_string());
    }
    let with_scheme = format!("https://{}", line);
    match Url::parse(&with_scheme) {
        Ok(u) if u.host_str().is_some_and(|h| h.contains('.')) => Some(with_scheme),
        _ => {
            warn!("Skipping invalid URL '{}'", line);
            None
        }
    }
}

/// Load targets from a JSON array, a previous run's error log (`errorSites`),
/// or a newline-delimited URL list.
pub fn load_target_list(path: &Path) -> Result<Vec<BatchTarget>> {
    let content = fs::read_to_string(path)?;
    let invalid = |message: String| CoreError::TargetList {
        path: path.display().to_string(),
        message,
    };

    let trimmed = content.trim_start();
    let targets: Vec<BatchTarget> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<TargetEntry>>(trimmed)
            .map_err(|e| invalid(e.to_string()))?
            .into_iter()
            .map(BatchTarget::from)
            .collect()
    } else if trimmed.starts_with('{') {
        let log: ErrorLog = serde_json::from_str(trimmed)
            .map_err(|e| invalid(format!("expected an object with errorSites: {}", e)))?;
        info!("Re-running {} error sites from a previous run", log.error_sites.len());
        log.error_sites.into_iter().map(BatchTarget::from).collect()
    } else {
        content
            .lines()
            .filter_map(parse_url_line)
            .map(BatchTarget::from_url)
            .collect()
    };

    if targets.is_empty() {
        return Err(invalid("no targets found".to_string()));
    }
    Ok(targets)
}

/// Apply `start` and `limit` to a loaded list.
pub fn select_targets(targets: Vec<BatchTarget>, start: usize, limit: Option<usize>) -> Vec<BatchTarget> {
    let iter = targets.into_iter().skip(start);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

#[derive(Default)]
struct BatchState {
    stats: BatchStats,
    results: Vec<(usize, TargetOutcome)>,
    error_sites: Vec<(usize, ErrorSite)>,
}

impl BatchState {
    fn record_error(
        &mut self,
        index: usize,
        target: BatchTarget,
        duration_ms: u64,
        error_code: ErrorCode,
        error_reason: String,
        error_details: ErrorDetails,
    ) {
        self.error_sites.push((
            index,
            ErrorSite {
                target: target.clone(),
                error_code,
                error_reason,
                error_details,
            },
        ));
        self.results.push((
            index,
            TargetOutcome {
                target,
                success: false,
                resilient: None,
                summary: None,
                error_code: Some(error_code),
                duration_ms,
            },
        ));
    }
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Run the pipeline over `targets` with a bounded worker pool.
///
/// Workers claim indices from one shared cursor, so each target runs exactly
/// once. A failing target is recorded and never stops the run.
pub async fn execute_batch(
    ctx: Arc<RunContext>,
    targets: Vec<BatchTarget>,
    command_line: String,
    show_progress: bool,
) -> BatchSummary {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let total = targets.len();
    let workers = ctx.config.worker_count(total);
    let delay = ctx.config.delay();

    info!(
        "Starting run {} over {} targets with {} workers",
        run_id, total, workers
    );
    if let Some(db) = &ctx.database
        && let Err(e) = db.create_run(&run_id, &command_line, total)
    {
        warn!("Cannot record run start: {}", e);
    }

    let targets = Arc::new(targets);
    let cursor = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(Mutex::new(BatchState::default()));
    let pb = progress_bar(total, show_progress);

    let mut worker_handles = Vec::new();
    for worker_id in 0..workers {
        let ctx = ctx.clone();
        let targets = targets.clone();
        let cursor = cursor.clone();
        let state = state.clone();
        let pb = pb.clone();

        let handle = tokio::spawn(async move {
            debug!("Worker {} started", worker_id);
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= targets.len() {
                    break;
                }
                let target = targets[index].clone();
                pb.set_message(target.label().to_string());

                run_one(&ctx, &state, index, target).await;
                pb.inc(1);

                if index + 1 < targets.len() && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            debug!("Worker {} exiting", worker_id);
        });
        worker_handles.push(handle);
    }

    let mut run_failed = false;
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
            run_failed = true;
        }
    }
    pb.finish_and_clear();

    let mut state = match Arc::try_unwrap(state) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|e| e.into_inner()),
        Err(shared) => {
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            BatchState {
                stats: guard.stats,
                results: guard.results.clone(),
                error_sites: guard.error_sites.clone(),
            }
        }
    };
    state.stats.total = total;
    state.results.sort_by_key(|(i, _)| *i);
    state.error_sites.sort_by_key(|(i, _)| *i);

    let summary = BatchSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        command_line,
        options: BatchOptions {
            parameters: ctx.parameters.clone(),
            concurrency: workers,
            delay_ms: ctx.config.delay_ms,
            start: ctx.config.start,
            limit: ctx.config.limit,
        },
        stats: state.stats,
        results: state.results.into_iter().map(|(_, r)| r).collect(),
        error_sites: state.error_sites.into_iter().map(|(_, e)| e).collect(),
    };

    if let Some(store) = &ctx.store {
        match store.save_batch_summary(&summary) {
            Ok(path) => info!("Batch summary written to {}", path.display()),
            Err(e) => {
                error!("Cannot write batch summary: {}", e);
                run_failed = true;
            }
        }
    }
    if let Some(db) = &ctx.database {
        let recorded = if run_failed {
            db.fail_run(&summary.run_id, &summary.stats)
        } else {
            db.complete_run(&summary.run_id, &summary.stats)
        };
        if let Err(e) = recorded {
            warn!("Cannot record end of run: {}", e);
        }
    }

    info!(
        "Run {} finished: {} ok, {} errors, {} failed",
        summary.run_id, summary.stats.success, summary.stats.test_errors, summary.stats.failed
    );
    summary
}

/// Run one target in its own task so a panic is contained and counted.
///
/// Each target lands in exactly one of `success`, `test_errors` or `failed`.
async fn run_one(ctx: &Arc<RunContext>, state: &Mutex<BatchState>, index: usize, target: BatchTarget) {
    let started = Instant::now();
    let task_ctx = ctx.clone();
    let url = target.url.clone();
    let joined = tokio::spawn(async move { check_target(&task_ctx, &url).await }).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Pipeline task for {} failed: {}", target.url, e);
            let reason = e.to_string();
            let details = ErrorDetails {
                message: reason.clone(),
                ..Default::default()
            };
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.stats.failed += 1;
            state.record_error(index, target, duration_ms, ErrorCode::Unexpected, reason, details);
            return;
        }
    };

    let persisted = persist_outcome(ctx, &outcome);

    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    match (outcome, persisted) {
        (_, Err(e)) => {
            warn!("Cannot save result for {}: {}", target.url, e);
            state.stats.failed += 1;
            let details = ErrorDetails {
                message: e.to_string(),
                ..Default::default()
            };
            state.record_error(
                index,
                target,
                duration_ms,
                ErrorCode::PersistFailed,
                format!("Cannot save result: {}", e),
                details,
            );
        }
        (Ok(result), Ok(())) => {
            state.stats.success += 1;
            state.results.push((
                index,
                TargetOutcome {
                    target,
                    success: true,
                    resilient: Some(result.resilient),
                    summary: Some(result.summary),
                    error_code: None,
                    duration_ms,
                },
            ));
        }
        (Err(err), Ok(())) => {
            info!("{} -> {} ({})", target.label(), err.error_code.as_str(), err.error_reason);
            state.stats.test_errors += 1;
            state.record_error(
                index,
                target,
                duration_ms,
                err.error_code,
                err.error_reason,
                err.error_details,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_line() {
        assert_eq!(parse_url_line("https://example.com"), Some("https://example.com".into()));
        assert_eq!(parse_url_line("example.com.tw"), Some("https://example.com.tw".into()));
        assert_eq!(parse_url_line("  # comment"), None);
        assert_eq!(parse_url_line("not a valid url!!!"), None);
    }

    #[test]
    fn test_select_targets() {
        let targets: Vec<BatchTarget> = (0..10)
            .map(|i| BatchTarget::from_url(format!("https://site{}.test", i)))
            .collect();

        let window = select_targets(targets.clone(), 3, Some(2));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].url, "https://site3.test");

        assert_eq!(select_targets(targets.clone(), 8, None).len(), 2);
        assert!(select_targets(targets, 20, Some(5)).is_empty());
    }

    #[test]
    fn test_rank_accepts_strings() {
        let target: BatchTarget =
            serde_json::from_str(r#"{"website":"Gov","url":"https://gov.tw","rank":"7"}"#).unwrap();
        assert_eq!(target.rank, Some(7));

        let target: BatchTarget = serde_json::from_str(r#"{"url":"https://gov.tw","rank":3}"#).unwrap();
        assert_eq!(target.rank, Some(3));
        assert_eq!(target.label(), "https://gov.tw");
    }
}
