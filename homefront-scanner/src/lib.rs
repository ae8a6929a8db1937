pub mod adblock;
pub mod aggregate;
pub mod cache;
pub mod cloud;
pub mod collector;
pub mod error;
pub mod filter;
pub mod geo;
pub mod result;
pub mod retry;

pub use adblock::{AdblockRules, AdblockStore};
pub use aggregate::{CloudRegistry, classify, summarize};
pub use cache::{CacheEntry, CacheStore, DiskStore, MemoryStore, TtlCache};
pub use cloud::{CloudClassifier, Jurisdiction, PingProbe, RttProbe};
pub use collector::{CollectOptions, CollectedPage, ObservedRequest, PageCollector, StaticCollector};
pub use error::ScanError;
pub use filter::{DomainFilter, FilteredDomain};
pub use geo::{DnsResolve, GeoProvider, GeoResolver, HickoryDns, IpInfo, IpInfoClient};
pub use result::{
    Category, ClassifiedDomain, CloudVerdict, DetectionMethod, GeoRecord, GeoSource,
    ResilienceSummary,
};
pub use retry::{CollectState, FallbackError, FallbackOutcome, HeadlessMode, collect_with_fallback};
