use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Response headers keyed by request URL, header names lowercased.
pub type ResponseHeaders = HashMap<String, HashMap<String, String>>;

/// One network request observed while rendering a target page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRequest {
    pub url: String,
    pub resource_type: String,
}

impl ObservedRequest {
    pub fn new(url: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resource_type: resource_type.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub timeout: Duration,
    pub headless: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            headless: true,
        }
    }
}

/// Everything a collector reports about one rendered page.
#[derive(Debug, Clone, Default)]
pub struct CollectedPage {
    pub requests: Vec<ObservedRequest>,
    pub canonical_url: Option<String>,
    pub http_status: Option<u16>,
    pub response_headers: ResponseHeaders,
}

impl CollectedPage {
    /// All captured header maps for responses served by `host`.
    pub fn headers_for_host(&self, host: &str) -> Vec<&HashMap<String, String>> {
        self.response_headers
            .iter()
            .filter(|(url, _)| {
                Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
                    .unwrap_or(false)
            })
            .map(|(_, headers)| headers)
            .collect()
    }
}

/// Renders a page and records its outgoing requests.
///
/// Implementations must return an error on navigation failure, timeout and
/// HTTP 4xx/5xx so that the fallback controller can move to the next mode.
#[async_trait]
pub trait PageCollector: Send + Sync {
    async fn collect(&self, url: &str, options: &CollectOptions) -> Result<CollectedPage>;
}

const CHALLENGE_MARKERS: &[&str] = &["challenges.cloudflare.com", "/cdn-cgi/challenge-platform/"];

/// Returns the first request that belongs to an anti-bot challenge page.
pub fn detect_challenge(requests: &[ObservedRequest]) -> Option<&ObservedRequest> {
    requests
        .iter()
        .find(|r| CHALLENGE_MARKERS.iter().any(|marker| r.url.contains(marker)))
}

/// Plain HTTP collector: fetches the document and records the sub-resources
/// its markup references. It cannot see script-initiated requests, and the
/// `headless` option has no effect on it.
pub struct StaticCollector {
    client: Client,
}

impl StaticCollector {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; Homefront/0.1; +https://github.com/trapdoorsec/homefront)")
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageCollector for StaticCollector {
    async fn collect(&self, url: &str, options: &CollectOptions) -> Result<CollectedPage> {
        debug!("Fetching {} (headless={})", url, options.headless);

        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScanError::Timeout(options.timeout.as_secs())
                } else {
                    ScanError::Navigation(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        if status >= 400 {
            return Err(ScanError::HttpStatus {
                status,
                url: final_url,
            });
        }

        let body = response.text().await?;
        let (mut requests, canonical_url) = extract_subresources(&body, &final_url);
        requests.insert(0, ObservedRequest::new(final_url.clone(), "document"));

        let mut response_headers = ResponseHeaders::new();
        response_headers.insert(final_url, headers);

        Ok(CollectedPage {
            requests,
            canonical_url,
            http_status: Some(status),
            response_headers,
        })
    }
}

const RESOURCE_SELECTORS: &[(&str, &str, &str)] = &[
    ("script[src]", "src", "script"),
    ("link[href]", "href", "link"),
    ("img[src]", "src", "image"),
    ("iframe[src]", "src", "iframe"),
    ("source[src]", "src", "media"),
    ("video[src]", "src", "media"),
    ("audio[src]", "src", "media"),
    ("embed[src]", "src", "embed"),
];

const LINK_RELS: &[&str] = &[
    "stylesheet",
    "preload",
    "modulepreload",
    "icon",
    "shortcut",
    "apple-touch-icon",
    "manifest",
];

/// Pull sub-resource URLs and the canonical link out of an HTML document.
pub fn extract_subresources(html: &str, base_url: &str) -> (Vec<ObservedRequest>, Option<String>) {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut requests = Vec::new();

    for (css, attr, resource_type) in RESOURCE_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            if *resource_type == "link" {
                let rel = element.value().attr("rel").unwrap_or("").to_ascii_lowercase();
                if !rel.split_whitespace().any(|r| LINK_RELS.contains(&r)) {
                    continue;
                }
            }
            if let Some(value) = element.value().attr(attr)
                && let Some(absolute) = resolve_resource_url(base.as_ref(), value)
            {
                let kind = match (*resource_type, element.value().attr("rel")) {
                    ("link", Some(rel)) if rel.contains("stylesheet") => "stylesheet",
                    (kind, _) => kind,
                };
                requests.push(ObservedRequest::new(absolute, kind));
            }
        }
    }

    let canonical_url = Selector::parse("link[rel=canonical]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .find_map(|e| e.value().attr("href"))
                .and_then(|href| resolve_resource_url(base.as_ref(), href))
        });

    (requests, canonical_url)
}

fn resolve_resource_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    let resolved = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
