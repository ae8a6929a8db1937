// Block-list parsing and cached source loading

use crate::cache::TtlCache;
use crate::error::{Result, ScanError};
use futures::future::join_all;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CACHE_NAMESPACE: &str = "adblock";

/// Block lists used when no custom source is configured.
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://easylist.to/easylist/easyprivacy.txt",
    "https://filter.futa.gg/hosts_abp.txt",
];

/// A set of blocked hostnames.
#[derive(Debug, Clone, Default)]
pub struct AdblockRules {
    domains: HashSet<String>,
}

impl AdblockRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .filter_map(|d| normalize_domain(d.as_ref()))
                .collect(),
        }
    }

    pub fn parse(text: &str) -> Self {
        Self {
            domains: parse_rules(text),
        }
    }

    pub fn extend(&mut self, other: AdblockRules) {
        self.domains.extend(other.domains);
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// True when the hostname, or any dot-delimited suffix of it, is listed.
    pub fn is_blocked(&self, hostname: &str) -> bool {
        if self.domains.is_empty() {
            return false;
        }
        let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
        let mut candidate = hostname.as_str();
        loop {
            if self.domains.contains(candidate) {
                return true;
            }
            match candidate.find('.') {
                Some(idx) => candidate = &candidate[idx + 1..],
                None => return false,
            }
        }
    }
}

/// Parse block-list text into blocked hostnames.
///
/// Supports `||domain^` network rules, bare-domain lines and hosts-file
/// lines. Comments, section headers, exceptions and cosmetic rules are skipped.
pub fn parse_rules(text: &str) -> HashSet<String> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') || line.starts_with('#') {
        return None;
    }
    if line.starts_with("@@") || line.contains("##") || line.contains("#@#") || line.contains("#?#") {
        return None;
    }

    if let Some(rest) = line.strip_prefix("||") {
        let end = rest.find(['^', '/', '$']).unwrap_or(rest.len());
        return normalize_domain(&rest[..end]);
    }

    let mut fields = line.split_whitespace();
    if let (Some(first), Some(second)) = (fields.next(), fields.next())
        && matches!(first, "0.0.0.0" | "127.0.0.1" | "::" | "::1")
    {
        return normalize_domain(second);
    }

    const RULE_SYNTAX: &[char] = &['|', '^', '$', '/', '*', '#', '@', '=', ' ', '\t', '~', ','];
    if line.contains('.') && !line.contains(RULE_SYNTAX) {
        return normalize_domain(line);
    }

    None
}

/// Lowercase a candidate token and reject anything that is not a plain hostname.
fn normalize_domain(token: &str) -> Option<String> {
    let domain = token.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return None;
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    if domain.split('.').any(|label| label.is_empty()) {
        return None;
    }
    Some(domain)
}

/// Content-address for a source URL.
pub fn source_cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Downloads and caches block lists.
pub struct AdblockStore {
    client: Client,
    cache: Option<TtlCache>,
    use_cache: bool,
}

impl AdblockStore {
    pub fn new(cache: Option<TtlCache>, use_cache: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Homefront/0.1 (https://github.com/trapdoorsec/homefront)")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            cache,
            use_cache,
        })
    }

    /// Load and union every source. Sources are fetched concurrently.
    pub async fn load<S: AsRef<str>>(&self, sources: &[S]) -> AdblockRules {
        let loaded = join_all(sources.iter().map(|s| self.load_source(s.as_ref()))).await;

        let mut rules = AdblockRules::new();
        for source_rules in loaded {
            rules.extend(source_rules);
        }
        info!("Loaded {} blocked domains from {} source(s)", rules.len(), sources.len());
        rules
    }

    /// Fresh cache, then network, then any cached copy. A source with no
    /// cached copy that cannot be fetched contributes nothing.
    pub async fn load_source(&self, url: &str) -> AdblockRules {
        let key = source_cache_key(url);

        if self.use_cache
            && let Some(cache) = &self.cache
            && let Some((text, _)) = cache.get::<String>(&key)
        {
            debug!("Using cached block list for {}", url);
            return AdblockRules::parse(&text);
        }

        match self.fetch(url).await {
            Ok(text) => {
                if let Some(cache) = &self.cache {
                    cache.put(&key, &text);
                }
                AdblockRules::parse(&text)
            }
            Err(e) => {
                if let Some((text, stored_at)) = self
                    .cache
                    .as_ref()
                    .and_then(|cache| cache.get_stale::<String>(&key))
                {
                    warn!(
                        "Failed to download block list {} ({}); using cached copy from {}",
                        url, e, stored_at
                    );
                    AdblockRules::parse(&text)
                } else {
                    warn!("Failed to download block list {} ({}); no cached copy", url, e);
                    AdblockRules::new()
                }
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheStore, DEFAULT_TTL, MemoryStore};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const SAMPLE_LIST: &str = "\
[Adblock Plus 2.0]
! Title: sample
||ads.example.com^
||tracker.test^$third-party
||cdn.metrics.io/pixel.gif
@@||allowed.example.com^
example.org##.banner
||*.wild.test^
plain-domain.net
0.0.0.0 hosts-style.test
/banner/*/img^
";

    #[test]
    fn test_parse_rules() {
        let domains = parse_rules(SAMPLE_LIST);

        assert!(domains.contains("ads.example.com"));
        assert!(domains.contains("tracker.test"));
        assert!(domains.contains("cdn.metrics.io"));
        assert!(domains.contains("plain-domain.net"));
        assert!(domains.contains("hosts-style.test"));
        assert!(!domains.contains("allowed.example.com"));
        assert!(!domains.iter().any(|d| d.contains('*')));
        assert!(!domains.iter().any(|d| d.contains("example.org")));
        assert_eq!(domains.len(), 5);
    }

    #[test]
    fn test_is_blocked_matches_suffixes() {
        let rules = AdblockRules::from_domains(["doubleclick.net", "ads.example.com"]);

        assert!(rules.is_blocked("doubleclick.net"));
        assert!(rules.is_blocked("stats.g.doubleclick.net"));
        assert!(rules.is_blocked("ADS.EXAMPLE.COM"));
        assert!(!rules.is_blocked("example.com"));
        assert!(!rules.is_blocked("notdoubleclick.net"));
    }

    #[tokio::test]
    async fn test_load_source_writes_cache() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("||ads.example.com^\n"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let cache = TtlCache::new(store.clone(), CACHE_NAMESPACE, DEFAULT_TTL);
        let adblock = AdblockStore::new(Some(cache), true).unwrap();
        let url = format!("{}/list.txt", mock_server.uri());

        let first = adblock.load_source(&url).await;
        let second = adblock.load_source(&url).await;

        assert!(first.is_blocked("ads.example.com"));
        assert!(second.is_blocked("ads.example.com"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_load_source_falls_back_to_expired_cache() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let url = format!("{}/list.txt", mock_server.uri());
        let store = Arc::new(MemoryStore::new());
        store
            .store(
                CACHE_NAMESPACE,
                &source_cache_key(&url),
                &CacheEntry {
                    stored_at: Utc::now() - ChronoDuration::days(3),
                    value: serde_json::json!("||stale.example.com^"),
                },
            )
            .unwrap();

        let cache = TtlCache::new(store, CACHE_NAMESPACE, DEFAULT_TTL);
        let adblock = AdblockStore::new(Some(cache), true).unwrap();
        let rules = adblock.load_source(&url).await;

        assert!(rules.is_blocked("stale.example.com"));
    }

    #[tokio::test]
    async fn test_load_source_without_cache_contributes_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let adblock = AdblockStore::new(None, true).unwrap();
        let rules = adblock
            .load(&[format!("{}/missing.txt", mock_server.uri())])
            .await;

        assert!(rules.is_empty());
    }
}
