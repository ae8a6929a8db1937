// Collection fallback: an explicit state table driven by a loop

use crate::collector::{CollectOptions, CollectedPage, PageCollector};
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Which presentation modes the controller may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadlessMode {
    /// Headless first, then headful.
    #[default]
    Auto,
    /// Headless only.
    On,
    /// Headful only.
    Off,
}

impl FromStr for HeadlessMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(HeadlessMode::Auto),
            "true" | "on" | "yes" => Ok(HeadlessMode::On),
            "false" | "off" | "no" => Ok(HeadlessMode::Off),
            other => Err(ScanError::Other(format!(
                "Invalid headless mode '{}' (expected auto, true or false)",
                other
            ))),
        }
    }
}

impl fmt::Display for HeadlessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadlessMode::Auto => write!(f, "auto"),
            HeadlessMode::On => write!(f, "true"),
            HeadlessMode::Off => write!(f, "false"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectState {
    HeadlessBare,
    HeadlessWww,
    HeadfulBare,
    HeadfulWww,
}

impl CollectState {
    pub fn headless(&self) -> bool {
        matches!(self, CollectState::HeadlessBare | CollectState::HeadlessWww)
    }

    pub fn uses_www(&self) -> bool {
        matches!(self, CollectState::HeadlessWww | CollectState::HeadfulWww)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectState::HeadlessBare => "headless",
            CollectState::HeadlessWww => "headless+www",
            CollectState::HeadfulBare => "headful",
            CollectState::HeadfulWww => "headful+www",
        }
    }

    /// First state for a headless setting.
    pub fn initial(mode: HeadlessMode) -> Self {
        match mode {
            HeadlessMode::Auto | HeadlessMode::On => CollectState::HeadlessBare,
            HeadlessMode::Off => CollectState::HeadfulBare,
        }
    }

    /// Transition taken when this state's attempt fails. `None` is terminal.
    pub fn next_on_failure(&self, mode: HeadlessMode) -> Option<Self> {
        match (self, mode) {
            (CollectState::HeadlessBare, _) => Some(CollectState::HeadlessWww),
            (CollectState::HeadlessWww, HeadlessMode::Auto) => Some(CollectState::HeadfulBare),
            (CollectState::HeadlessWww, _) => None,
            (CollectState::HeadfulBare, _) => Some(CollectState::HeadfulWww),
            (CollectState::HeadfulWww, _) => None,
        }
    }
}

impl fmt::Display for CollectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFailure {
    pub state: CollectState,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub page: CollectedPage,
    pub state: CollectState,
    pub url_used: String,
    pub attempts: usize,
    pub failures: Vec<AttemptFailure>,
}

/// Every attempt failed. Carries the last error plus what was tried.
#[derive(Debug)]
pub struct FallbackError {
    pub error: ScanError,
    pub last_state: CollectState,
    pub attempts: usize,
    pub failures: Vec<AttemptFailure>,
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collection failed after {} attempt(s), last mode {}: {}",
            self.attempts, self.last_state, self.error
        )
    }
}

impl std::error::Error for FallbackError {}

/// `url` with its host prefixed by `www.`, or `None` when it already is.
pub fn www_variant(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    if host.starts_with("www.") || host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    parsed.set_host(Some(&format!("www.{}", host))).ok()?;
    Some(parsed.to_string())
}

/// Walk the state table until one attempt succeeds.
///
/// Attempts run strictly one after another, each bounded by `timeout`.
/// www states are skipped when the host already has the prefix.
pub async fn collect_with_fallback(
    collector: &dyn PageCollector,
    url: &str,
    mode: HeadlessMode,
    timeout: Duration,
) -> std::result::Result<FallbackOutcome, FallbackError> {
    let www_url = www_variant(url);
    let mut state = Some(CollectState::initial(mode));
    let mut attempts = 0;
    let mut failures = Vec::new();
    let mut last: Option<(CollectState, ScanError)> = None;

    while let Some(current) = state {
        let target = match (current.uses_www(), &www_url) {
            (false, _) => url.to_string(),
            (true, Some(www)) => www.clone(),
            (true, None) => {
                debug!("Skipping {} for {}: host already has www prefix", current, url);
                state = current.next_on_failure(mode);
                continue;
            }
        };

        attempts += 1;
        let options = CollectOptions {
            timeout,
            headless: current.headless(),
        };
        debug!("Attempt {} for {} in {} mode", attempts, target, current);

        let result = match tokio::time::timeout(timeout, collector.collect(&target, &options)).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout(timeout.as_secs())),
        };

        match result {
            Ok(page) => {
                if attempts > 1 {
                    info!("{} succeeded in {} mode after {} attempts", url, current, attempts);
                }
                return Ok(FallbackOutcome {
                    page,
                    state: current,
                    url_used: target,
                    attempts,
                    failures,
                });
            }
            Err(e) => {
                warn!("{} failed in {} mode: {}", target, current, e);
                failures.push(AttemptFailure {
                    state: current,
                    url: target,
                    message: e.to_string(),
                });
                last = Some((current, e));
                state = current.next_on_failure(mode);
            }
        }
    }

    let (last_state, error) = last.unwrap_or_else(|| {
        (
            CollectState::initial(mode),
            ScanError::Other(format!("no collection attempt possible for {}", url)),
        )
    });
    Err(FallbackError {
        error,
        last_state,
        attempts,
        failures,
    })
}
