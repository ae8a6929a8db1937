// Persisted result schema

use crate::batch::BatchTarget;
use crate::config::RunConfig;
use chrono::{DateTime, Utc};
use homefront_scanner::result::{ClassifiedDomain, CloudVerdict, GeoRecord, ResilienceSummary};
use homefront_scanner::retry::{AttemptFailure, CollectState, FallbackError, HeadlessMode};
use homefront_scanner::ScanError;
use serde::{Deserialize, Serialize};

/// Settings that shaped a result, recorded for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    pub headless: HeadlessMode,
    pub adblock: bool,
    pub adblock_sources: Vec<String>,
    pub use_cache: bool,
    pub timeout_secs: u64,
    pub country: String,
    pub pop_codes: Vec<String>,
    pub rtt_threshold_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_server: Option<String>,
}

impl Parameters {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            headless: config.headless,
            adblock: config.adblock,
            adblock_sources: if config.adblock {
                config.adblock_sources.clone()
            } else {
                Vec::new()
            },
            use_cache: config.use_cache,
            timeout_secs: config.timeout.as_secs(),
            country: config.jurisdiction.country.clone(),
            pop_codes: config.jurisdiction.pop_codes.clone(),
            rtt_threshold_ms: config.rtt_threshold_ms,
            dns_server: config.dns_server.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub tool_version: String,
    pub os: String,
    pub arch: String,
    pub dns: String,
    pub geolocation_endpoint: String,
    pub blocked_domains: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub mode: CollectState,
    pub attempts: usize,
    pub url_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AttemptFailure>,
}

/// One dependency domain with everything learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDetail {
    pub domain: String,
    pub request_url: String,
    pub resource_type: String,
    pub geo: GeoRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudVerdict>,
    /// Absent for domains whose geolocation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassifiedDomain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub url: String,
    pub hostname: String,
    /// Bare host eligible for the www retry, as opposed to one already under `www.`.
    pub hostname_is_top_level: bool,
    /// Site-declared canonical link, or the URL that was actually collected.
    pub canonical_url: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub parameters: Parameters,
    pub environment: EnvironmentInfo,
    pub collection: CollectionInfo,
    pub request_count: usize,
    pub domain_count: usize,
    pub summary: ResilienceSummary,
    pub resilient: bool,
    pub domains: Vec<DomainDetail>,
}

impl TargetResult {
    pub fn geo_errors(&self) -> usize {
        self.domains.iter().filter(|d| d.geo.is_error()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoDomains,
    ChallengeDetected,
    CollectionFailed,
    PersistFailed,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoDomains => "no_domains",
            ErrorCode::ChallengeDetected => "challenge_detected",
            ErrorCode::CollectionFailed => "collection_failed",
            ErrorCode::PersistFailed => "persist_failed",
            ErrorCode::Unexpected => "unexpected",
        }
    }

    pub fn for_error(error: &ScanError) -> Self {
        match error {
            ScanError::NoDomainsAfterFiltering { .. } => ErrorCode::NoDomains,
            ScanError::ChallengeDetected(_) => ErrorCode::ChallengeDetected,
            _ => ErrorCode::Unexpected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<CollectState>,
    /// Requests observed before filtering; separates an empty page from over-filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AttemptFailure>,
}

impl ErrorDetails {
    pub fn from_error(error: &ScanError) -> Self {
        let mut details = Self {
            message: error.to_string(),
            http_status: error.http_status(),
            net_error: error.net_error(),
            ..Default::default()
        };
        match error {
            ScanError::NoDomainsAfterFiltering { requests } => details.request_count = Some(*requests),
            ScanError::ChallengeDetected(url) => details.challenge_url = Some(url.clone()),
            _ => {}
        }
        details
    }

    pub fn from_fallback(error: &FallbackError) -> Self {
        Self {
            attempts: Some(error.attempts),
            last_mode: Some(error.last_state),
            failures: error.failures.clone(),
            ..Self::from_error(&error.error)
        }
    }
}

/// Terminal failure for one target, persisted separately from successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResult {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_code: ErrorCode,
    pub error_reason: String,
    pub error_details: ErrorDetails,
    pub parameters: Parameters,
}

impl ErrorResult {
    pub fn new(url: &str, code: ErrorCode, reason: String, details: ErrorDetails, parameters: Parameters) -> Self {
        Self {
            url: url.to_string(),
            hostname: url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string)),
            timestamp: Utc::now(),
            duration_ms: 0,
            error_code: code,
            error_reason: reason,
            error_details: details,
            parameters,
        }
    }

    pub fn from_error(url: &str, error: &ScanError, parameters: Parameters) -> Self {
        Self::new(
            url,
            ErrorCode::for_error(error),
            error.to_string(),
            ErrorDetails::from_error(error),
            parameters,
        )
    }

    pub fn from_fallback(url: &str, error: &FallbackError, parameters: Parameters) -> Self {
        Self::new(
            url,
            ErrorCode::CollectionFailed,
            error.to_string(),
            ErrorDetails::from_fallback(error),
            parameters,
        )
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    /// Targets whose outcome could not be recorded (persistence failure, panicked task).
    pub failed: usize,
    pub test_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    #[serde(flatten)]
    pub target: BatchTarget,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resilient: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ResilienceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSite {
    #[serde(flatten)]
    pub target: BatchTarget,
    pub error_code: ErrorCode,
    pub error_reason: String,
    #[serde(default)]
    pub error_details: ErrorDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    #[serde(flatten)]
    pub parameters: Parameters,
    pub concurrency: usize,
    pub delay_ms: u64,
    pub start: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Run-level report written once the worker pool drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub command_line: String,
    pub options: BatchOptions,
    pub stats: BatchStats,
    pub results: Vec<TargetOutcome>,
    pub error_sites: Vec<ErrorSite>,
}

pub fn generate_json_report(result: &TargetResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let empty = ScanError::NoDomainsAfterFiltering { requests: 12 };
        assert_eq!(ErrorCode::for_error(&empty), ErrorCode::NoDomains);
        assert_eq!(ErrorDetails::from_error(&empty).request_count, Some(12));

        let challenge = ScanError::ChallengeDetected("https://challenges.cloudflare.com/x".into());
        assert_eq!(ErrorCode::for_error(&challenge), ErrorCode::ChallengeDetected);

        let io = ScanError::Other("boom".into());
        assert_eq!(ErrorCode::for_error(&io), ErrorCode::Unexpected);
    }

    #[test]
    fn test_fallback_details() {
        let err = FallbackError {
            error: ScanError::Navigation("net::ERR_NAME_NOT_RESOLVED at https://x.test".into()),
            last_state: CollectState::HeadfulWww,
            attempts: 4,
            failures: vec![],
        };
        let details = ErrorDetails::from_fallback(&err);
        assert_eq!(details.attempts, Some(4));
        assert_eq!(details.last_mode, Some(CollectState::HeadfulWww));
        assert_eq!(details.net_error.as_deref(), Some("net::ERR_NAME_NOT_RESOLVED"));

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["lastMode"], "headful_www");
        assert!(json.get("failures").is_none());
    }

    #[test]
    fn test_error_code_serialization() {
        assert_eq!(serde_json::to_string(&ErrorCode::NoDomains).unwrap(), "\"no_domains\"");
        assert_eq!(ErrorCode::CollectionFailed.as_str(), "collection_failed");
    }
}
