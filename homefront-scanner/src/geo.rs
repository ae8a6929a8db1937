// DNS resolution and IP geolocation with a TTL cache

use crate::cache::TtlCache;
use crate::error::{Result, ScanError};
use crate::result::{GeoRecord, GeoSource};
use async_trait::async_trait;
use futures::future::join_all;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const CACHE_NAMESPACE: &str = "ipinfo";
pub const DEFAULT_GEO_BASE_URL: &str = "https://ipinfo.io";

#[async_trait]
pub trait DnsResolve: Send + Sync {
    /// IPv4 addresses for `hostname`, in resolver order.
    async fn resolve4(&self, hostname: &str) -> Result<Vec<Ipv4Addr>>;

    /// Human-readable description of the servers in use.
    fn describe(&self) -> String;
}

/// DNS via hickory, against the system configuration or a single custom server.
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
    description: String,
}

impl HickoryDns {
    pub fn system() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| ScanError::DnsError {
            domain: "<system>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            resolver,
            description: "system".to_string(),
        })
    }

    /// `server` is an IP address, optionally with a port (`1.1.1.1:5353`).
    pub fn custom(server: &str) -> Result<Self> {
        let addr = parse_dns_server(server)?;
        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        opts.timeout = Duration::from_secs(5);
        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            description: addr.to_string(),
        })
    }

    pub fn from_option(server: Option<&str>) -> Result<Self> {
        match server {
            Some(server) => Self::custom(server),
            None => Self::system(),
        }
    }
}

#[async_trait]
impl DnsResolve for HickoryDns {
    async fn resolve4(&self, hostname: &str) -> Result<Vec<Ipv4Addr>> {
        let lookup = self
            .resolver
            .lookup_ip(hostname)
            .await
            .map_err(|e| ScanError::DnsError {
                domain: hostname.to_string(),
                message: e.to_string(),
            })?;
        let addrs: Vec<Ipv4Addr> = lookup
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect();
        if addrs.is_empty() {
            return Err(ScanError::DnsError {
                domain: hostname.to_string(),
                message: "no A records".to_string(),
            });
        }
        Ok(addrs)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn parse_dns_server(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| ScanError::Other(format!("Invalid DNS server '{}'", server)))
}

/// Fields returned by the geolocation service for one IP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bogon: Option<bool>,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<IpInfo>;
}

/// Client for the `GET /<ip>/json[?token=...]` geolocation API.
pub struct IpInfoClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Homefront/0.1 (https://github.com/trapdoorsec/homefront)")
            .timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(16)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl GeoProvider for IpInfoClient {
    async fn lookup(&self, ip: &str) -> Result<IpInfo> {
        let url = format!("{}/{}/json", self.base_url, ip);
        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::GeolocationError {
                ip: ip.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        Ok(response.json::<IpInfo>().await?)
    }
}

/// Resolves dependency domains to geolocated IPs.
///
/// Never fails: DNS and lookup errors come back as `GeoSource::Error` records
/// so one bad domain cannot abort a target.
pub struct GeoResolver {
    dns: Arc<dyn DnsResolve>,
    provider: Arc<dyn GeoProvider>,
    cache: Option<TtlCache>,
    use_cache: bool,
}

impl GeoResolver {
    pub fn new(
        dns: Arc<dyn DnsResolve>,
        provider: Arc<dyn GeoProvider>,
        cache: Option<TtlCache>,
        use_cache: bool,
    ) -> Self {
        Self {
            dns,
            provider,
            cache,
            use_cache,
        }
    }

    pub fn dns_description(&self) -> String {
        self.dns.describe()
    }

    pub async fn resolve(&self, domain: &str) -> GeoRecord {
        let ip = match self.dns.resolve4(domain).await {
            Ok(addrs) => match addrs.first() {
                Some(ip) => ip.to_string(),
                None => {
                    return GeoRecord::with_error(domain.to_string(), None, "no A records".into());
                }
            },
            Err(e) => {
                warn!("Cannot resolve {}: {}", domain, e);
                return GeoRecord::with_error(domain.to_string(), None, e.to_string());
            }
        };
        self.locate(domain, &ip).await
    }

    /// Geolocate an already resolved IP.
    pub async fn locate(&self, domain: &str, ip: &str) -> GeoRecord {
        if self.use_cache
            && let Some(cache) = &self.cache
            && let Some((info, stored_at)) = cache.get::<IpInfo>(ip)
        {
            debug!("Geolocation cache hit for {} ({})", domain, ip);
            return build_record(domain, ip, info, GeoSource::Cached, Some(stored_at));
        }

        match self.provider.lookup(ip).await {
            Ok(info) => {
                if let Some(cache) = &self.cache {
                    cache.put(ip, &info);
                }
                build_record(domain, ip, info, GeoSource::Live, None)
            }
            Err(e) => {
                if let Some((info, stored_at)) =
                    self.cache.as_ref().and_then(|c| c.get_stale::<IpInfo>(ip))
                {
                    warn!(
                        "Geolocation failed for {} ({}): {}; using stale entry from {}",
                        domain, ip, e, stored_at
                    );
                    return build_record(domain, ip, info, GeoSource::Stale, Some(stored_at));
                }
                warn!("Geolocation failed for {} ({}): {}", domain, ip, e);
                GeoRecord::with_error(domain.to_string(), Some(ip.to_string()), e.to_string())
            }
        }
    }

    /// Resolve every domain concurrently; returns once all have settled.
    pub async fn resolve_all<S: AsRef<str>>(&self, domains: &[S]) -> Vec<GeoRecord> {
        join_all(domains.iter().map(|d| self.resolve(d.as_ref()))).await
    }
}

fn build_record(
    domain: &str,
    ip: &str,
    info: IpInfo,
    source: GeoSource,
    cached_at: Option<chrono::DateTime<chrono::Utc>>,
) -> GeoRecord {
    GeoRecord {
        domain: domain.to_string(),
        ip: Some(ip.to_string()),
        country: info.country,
        org: info.org,
        city: info.city,
        region: info.region,
        loc: info.loc,
        timezone: info.timezone,
        source,
        cached_at,
        error: None,
    }
}
