// Fixture collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use homefront_core::config::RunConfig;
use homefront_core::context::RunContext;
use homefront_scanner::adblock::AdblockRules;
use homefront_scanner::cache::MemoryStore;
use homefront_scanner::cloud::RttProbe;
use homefront_scanner::collector::{CollectOptions, CollectedPage, ObservedRequest, PageCollector};
use homefront_scanner::error::{Result, ScanError};
use homefront_scanner::geo::{DnsResolve, GeoProvider, IpInfo};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Serves the same dependency set for every target. Hosts containing
/// "broken" fail every attempt, "guarded" hosts serve a challenge page and
/// "empty" hosts load no resources. "wwwonly" hosts only answer under the
/// www prefix, and "nocanonical" pages declare no canonical link.
pub struct FixtureCollector {
    pub calls: AtomicUsize,
    pub call_times: Mutex<Vec<Instant>>,
    pub extra_headers: HashMap<String, HashMap<String, String>>,
}

impl FixtureCollector {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, url: &str, headers: &[(&str, &str)]) -> Self {
        self.extra_headers.insert(
            url.to_string(),
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl PageCollector for FixtureCollector {
    async fn collect(&self, url: &str, _options: &CollectOptions) -> Result<CollectedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ScanError::InvalidUrl(url.to_string()))?;

        if host.contains("broken") {
            return Err(ScanError::Navigation(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }
        if host.contains("wwwonly") && !host.starts_with("www.") {
            return Err(ScanError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        if host.contains("guarded") {
            return Ok(CollectedPage {
                requests: vec![
                    ObservedRequest::new(url, "document"),
                    ObservedRequest::new(
                        "https://challenges.cloudflare.com/turnstile/v0/api.js",
                        "script",
                    ),
                ],
                http_status: Some(403),
                ..Default::default()
            });
        }
        if host.contains("empty") {
            return Ok(CollectedPage {
                http_status: Some(200),
                ..Default::default()
            });
        }

        let requests = vec![
            ObservedRequest::new(url, "document"),
            ObservedRequest::new(format!("https://{}/app.js", host), "script"),
            ObservedRequest::new("https://cdn.hinet.net/lib.js", "script"),
            ObservedRequest::new("https://ajax.googleapis.com/jquery.min.js", "script"),
            ObservedRequest::new("https://www.google-analytics.com/analytics.js", "script"),
        ];
        Ok(CollectedPage {
            requests,
            canonical_url: if host.contains("wwwonly") || host.contains("nocanonical") {
                None
            } else {
                Some(url.to_string())
            },
            http_status: Some(200),
            response_headers: self.extra_headers.clone(),
        })
    }
}

/// Static host table. Unknown hosts fail to resolve.
pub struct FixtureDns {
    hosts: HashMap<String, Ipv4Addr>,
}

impl FixtureDns {
    pub fn new(entries: &[(&str, [u8; 4])]) -> Self {
        Self {
            hosts: entries
                .iter()
                .map(|(h, ip)| (h.to_string(), Ipv4Addr::from(*ip)))
                .collect(),
        }
    }
}

#[async_trait]
impl DnsResolve for FixtureDns {
    async fn resolve4(&self, hostname: &str) -> Result<Vec<Ipv4Addr>> {
        self.hosts
            .get(hostname)
            .map(|ip| vec![*ip])
            .ok_or_else(|| ScanError::DnsError {
                domain: hostname.to_string(),
                message: "NXDOMAIN".to_string(),
            })
    }

    fn describe(&self) -> String {
        "fixture".to_string()
    }
}

/// Static IP table with a lookup counter.
pub struct FixtureGeo {
    records: HashMap<String, IpInfo>,
    pub lookups: AtomicUsize,
}

impl FixtureGeo {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            records: entries
                .iter()
                .map(|(ip, country, org)| {
                    (
                        ip.to_string(),
                        IpInfo {
                            ip: Some(ip.to_string()),
                            country: Some(country.to_string()),
                            org: Some(org.to_string()),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GeoProvider for FixtureGeo {
    async fn lookup(&self, ip: &str) -> Result<IpInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.records.get(ip).cloned().ok_or_else(|| ScanError::GeolocationError {
            ip: ip.to_string(),
            message: "HTTP 429".to_string(),
        })
    }
}

pub struct FixedProbe(pub Option<f64>);

#[async_trait]
impl RttProbe for FixedProbe {
    async fn probe(&self, _ip: &str) -> Option<f64> {
        self.0
    }
}

/// Host table used by every test target: all `*.gov.tw` hosts map to one
/// domestic address.
pub fn fixture_dns(targets: &[&str]) -> FixtureDns {
    let mut entries: Vec<(&str, [u8; 4])> = vec![
        ("cdn.hinet.net", [203, 66, 1, 10]),
        ("ajax.googleapis.com", [142, 250, 1, 95]),
    ];
    for host in targets {
        entries.push((*host, [210, 69, 1, 1]));
    }
    FixtureDns::new(&entries)
}

pub fn fixture_geo() -> FixtureGeo {
    FixtureGeo::new(&[
        ("210.69.1.1", "TW", "AS4782 Data Communication Business Group"),
        ("203.66.1.10", "TW", "AS3462 Chunghwa Telecom Co., Ltd."),
        ("142.250.1.95", "US", "AS15169 Google LLC"),
    ])
}

pub fn test_config(output: &Path) -> RunConfig {
    RunConfig {
        concurrency: 3,
        delay_ms: 0,
        timeout: Duration::from_secs(5),
        output_dir: output.to_path_buf(),
        adblock: false,
        ..Default::default()
    }
}

pub async fn build_context(
    config: RunConfig,
    collector: Arc<FixtureCollector>,
    dns: FixtureDns,
    geo: Arc<FixtureGeo>,
    probe: Option<f64>,
) -> RunContext {
    RunContext::builder(config)
        .collector(collector)
        .dns(Arc::new(dns))
        .geo_provider(geo)
        .probe(Arc::new(FixedProbe(probe)))
        .cache_store(Arc::new(MemoryStore::new()))
        .adblock_rules(AdblockRules::new())
        .build()
        .await
        .unwrap()
}
