use crate::adblock::AdblockRules;
use crate::collector::ObservedRequest;
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Hostnames that are always noise for a resilience check.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "analytics.google.com",
    "www.google-analytics.com",
    "connect.facebook.net",
    "fonts.gstatic.com",
    "www.facebook.com",
    "www.youtube.com",
    "doubleclick.net",
    "www.google.com.tw/ads",
    "jscdn.appier.net",
];

/// A dependency hostname that survived filtering, with the first request seen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredDomain {
    pub hostname: String,
    pub request: ObservedRequest,
}

/// Decides which observed hostnames are third-party dependencies worth classifying.
#[derive(Debug, Clone)]
pub struct DomainFilter {
    ignore_patterns: Vec<String>,
    adblock: Arc<AdblockRules>,
}

impl Default for DomainFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_PATTERNS, Arc::new(AdblockRules::new()))
    }
}

impl DomainFilter {
    pub fn new<S: AsRef<str>>(ignore_patterns: &[S], adblock: Arc<AdblockRules>) -> Self {
        Self {
            ignore_patterns: ignore_patterns
                .iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
            adblock,
        }
    }

    pub fn adblock(&self) -> &AdblockRules {
        &self.adblock
    }

    /// Whether `hostname` should be kept as a dependency of `target_host`.
    ///
    /// `subject` is the host plus path of the request; manual patterns that
    /// contain a `/` are matched against it instead of the bare host.
    pub fn keep(&self, hostname: &str, subject: &str, target_host: &str) -> bool {
        if is_related_host(hostname, target_host) {
            return true;
        }
        if self
            .ignore_patterns
            .iter()
            .any(|pattern| matches_ignore_pattern(pattern, hostname, subject))
        {
            debug!("Ignoring {} (manual ignore list)", hostname);
            return false;
        }
        if self.adblock.is_blocked(hostname) {
            debug!("Ignoring {} (block list)", hostname);
            return false;
        }
        true
    }

    /// Drop noise and deduplicate by hostname. The first kept request wins.
    ///
    /// Returns an error when nothing survives: that means the block lists
    /// swallowed the whole page, which must not look like an empty result.
    pub fn filter(&self, requests: &[ObservedRequest], target_host: &str) -> Result<Vec<FilteredDomain>> {
        let target_host = target_host.to_ascii_lowercase();
        let mut seen = HashSet::new();
        let mut kept = Vec::new();

        for request in requests {
            let Ok(url) = Url::parse(&request.url) else {
                continue;
            };
            let Some(hostname) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
                continue;
            };
            if seen.contains(&hostname) {
                continue;
            }
            let subject = format!("{}{}", hostname, url.path());
            if self.keep(&hostname, &subject, &target_host) {
                seen.insert(hostname.clone());
                kept.push(FilteredDomain {
                    hostname,
                    request: request.clone(),
                });
            }
        }

        if kept.is_empty() {
            return Err(ScanError::NoDomainsAfterFiltering {
                requests: requests.len(),
            });
        }

        debug!(
            "{} requests reduced to {} unique domains for {}",
            requests.len(),
            kept.len(),
            target_host
        );
        Ok(kept)
    }
}

/// True when one host is the other, or a subdomain of it.
pub fn is_related_host(hostname: &str, target_host: &str) -> bool {
    let host = hostname.trim_end_matches('.');
    let target = target_host.trim_end_matches('.');
    if host.is_empty() || target.is_empty() {
        return false;
    }
    host.eq_ignore_ascii_case(target)
        || is_subdomain_of(host, target)
        || is_subdomain_of(target, host)
}

fn is_subdomain_of(host: &str, parent: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let parent = parent.to_ascii_lowercase();
    host.len() > parent.len() + 1 && host.ends_with(&format!(".{}", parent))
}

fn matches_ignore_pattern(pattern: &str, hostname: &str, subject: &str) -> bool {
    if let Some(domain) = pattern.strip_prefix("*.") {
        return hostname == domain || is_subdomain_of(hostname, domain);
    }
    if pattern.contains('/') {
        return subject.contains(pattern);
    }
    hostname.contains(pattern)
}
