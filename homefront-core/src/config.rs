use homefront_scanner::adblock::DEFAULT_SOURCES;
use homefront_scanner::cloud::{DEFAULT_RTT_THRESHOLD_MS, Jurisdiction};
use homefront_scanner::filter::DEFAULT_IGNORE_PATTERNS;
use homefront_scanner::geo::DEFAULT_GEO_BASE_URL;
use homefront_scanner::retry::HeadlessMode;
use std::path::PathBuf;
use std::time::Duration;

pub const TOKEN_ENV_VAR: &str = "IPINFO_TOKEN";
pub const DEFAULT_CACHE_DIR: &str = "~/.cache/homefront";
pub const DEFAULT_OUTPUT_DIR: &str = "test_results";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Every knob for a check or batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub limit: Option<usize>,
    pub start: usize,
    pub concurrency: usize,
    pub delay_ms: u64,
    /// Custom DNS server (`IP` or `IP:port`); system resolver when unset.
    pub dns_server: Option<String>,
    pub ipinfo_token: Option<String>,
    pub ipinfo_url: String,
    pub adblock: bool,
    pub adblock_sources: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// When false, fresh cache reads are skipped but results are still written.
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    pub cache_db: Option<PathBuf>,
    pub headless: HeadlessMode,
    pub debug: bool,
    pub timeout: Duration,
    pub output_dir: PathBuf,
    pub save: bool,
    pub jurisdiction: Jurisdiction,
    pub rtt_threshold_ms: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            limit: None,
            start: 0,
            concurrency: DEFAULT_CONCURRENCY,
            delay_ms: DEFAULT_DELAY_MS,
            dns_server: None,
            ipinfo_token: None,
            ipinfo_url: DEFAULT_GEO_BASE_URL.to_string(),
            adblock: true,
            adblock_sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            use_cache: true,
            cache_dir: expand_path(DEFAULT_CACHE_DIR),
            cache_db: None,
            headless: HeadlessMode::Auto,
            debug: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            save: true,
            jurisdiction: Jurisdiction::taiwan(),
            rtt_threshold_ms: DEFAULT_RTT_THRESHOLD_MS,
        }
    }
}

impl RunConfig {
    /// Token from the explicit value, falling back to `IPINFO_TOKEN`.
    pub fn resolve_token(explicit: Option<String>) -> Option<String> {
        explicit
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Worker count for a list of `targets` items: never zero, never more than the list.
    pub fn worker_count(&self, targets: usize) -> usize {
        self.concurrency.min(targets).max(1)
    }
}

/// Expand a leading `~` in a user-supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
