// Everything a run shares, built once and passed to every pipeline call

use crate::config::RunConfig;
use crate::data::SqliteStore;
use crate::error::Result;
use crate::report::{EnvironmentInfo, Parameters};
use crate::store::ResultStore;
use homefront_scanner::adblock::{self, AdblockRules, AdblockStore};
use homefront_scanner::aggregate::CloudRegistry;
use homefront_scanner::cache::{CacheStore, DEFAULT_TTL, DiskStore, TtlCache};
use homefront_scanner::cloud::{CloudClassifier, PingProbe, RttProbe};
use homefront_scanner::collector::{PageCollector, StaticCollector};
use homefront_scanner::filter::DomainFilter;
use homefront_scanner::geo::{self, DnsResolve, GeoProvider, GeoResolver, HickoryDns, IpInfoClient};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RunContext {
    pub config: RunConfig,
    pub collector: Arc<dyn PageCollector>,
    pub filter: DomainFilter,
    pub geo: GeoResolver,
    pub cloud: CloudClassifier,
    pub registry: CloudRegistry,
    pub store: Option<ResultStore>,
    pub database: Option<Arc<SqliteStore>>,
    pub parameters: Parameters,
    pub environment: EnvironmentInfo,
}

impl RunContext {
    pub fn builder(config: RunConfig) -> RunContextBuilder {
        RunContextBuilder::new(config)
    }
}

/// Swaps in fixtures for any collaborator; the rest are built from the config.
pub struct RunContextBuilder {
    config: RunConfig,
    collector: Option<Arc<dyn PageCollector>>,
    dns: Option<Arc<dyn DnsResolve>>,
    geo_provider: Option<Arc<dyn GeoProvider>>,
    probe: Option<Arc<dyn RttProbe>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    adblock_rules: Option<AdblockRules>,
    registry: Option<CloudRegistry>,
}

impl RunContextBuilder {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            collector: None,
            dns: None,
            geo_provider: None,
            probe: None,
            cache_store: None,
            adblock_rules: None,
            registry: None,
        }
    }

    pub fn collector(mut self, collector: Arc<dyn PageCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn dns(mut self, dns: Arc<dyn DnsResolve>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn geo_provider(mut self, provider: Arc<dyn GeoProvider>) -> Self {
        self.geo_provider = Some(provider);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn RttProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Use these rules instead of downloading the configured sources.
    pub fn adblock_rules(mut self, rules: AdblockRules) -> Self {
        self.adblock_rules = Some(rules);
        self
    }

    pub fn registry(mut self, registry: CloudRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn build(self) -> Result<RunContext> {
        let config = self.config;

        let database = match &config.cache_db {
            Some(path) => {
                info!("Using SQLite cache at {}", path.display());
                Some(Arc::new(SqliteStore::new(path)?))
            }
            None => None,
        };

        let cache_store: Arc<dyn CacheStore> = match (self.cache_store, &database) {
            (Some(store), _) => store,
            (None, Some(db)) => db.clone() as Arc<dyn CacheStore>,
            (None, None) => Arc::new(DiskStore::new(&config.cache_dir)),
        };

        let rules = if !config.adblock {
            debug!("Block lists disabled");
            AdblockRules::new()
        } else if let Some(rules) = self.adblock_rules {
            rules
        } else {
            let cache = TtlCache::new(cache_store.clone(), adblock::CACHE_NAMESPACE, DEFAULT_TTL);
            AdblockStore::new(Some(cache), config.use_cache)?
                .load(&config.adblock_sources)
                .await
        };
        let filter = DomainFilter::new(&config.ignore_patterns, Arc::new(rules));

        let dns: Arc<dyn DnsResolve> = match self.dns {
            Some(dns) => dns,
            None => Arc::new(HickoryDns::from_option(config.dns_server.as_deref())?),
        };
        let provider: Arc<dyn GeoProvider> = match self.geo_provider {
            Some(provider) => provider,
            None => Arc::new(IpInfoClient::new(
                config.ipinfo_url.clone(),
                config.ipinfo_token.clone(),
            )?),
        };
        let geo_cache = TtlCache::new(cache_store, geo::CACHE_NAMESPACE, DEFAULT_TTL);
        let geo = GeoResolver::new(dns, provider, Some(geo_cache), config.use_cache);

        let probe: Arc<dyn RttProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(PingProbe::new()),
        };
        let cloud = CloudClassifier::new(config.jurisdiction.clone(), probe, config.rtt_threshold_ms);

        let collector: Arc<dyn PageCollector> = match self.collector {
            Some(collector) => collector,
            None => Arc::new(StaticCollector::new()?),
        };

        let store = if config.save {
            Some(ResultStore::new(&config.output_dir)?)
        } else {
            None
        };

        let environment = EnvironmentInfo {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            dns: geo.dns_description(),
            geolocation_endpoint: config.ipinfo_url.clone(),
            blocked_domains: filter.adblock().len(),
        };
        let parameters = Parameters::from_config(&config);

        Ok(RunContext {
            config,
            collector,
            filter,
            geo,
            cloud,
            registry: self.registry.unwrap_or_default(),
            store,
            database,
            parameters,
            environment,
        })
    }
}
