use crate::cloud::{Jurisdiction, extract_asn};
use crate::result::{Category, ClassifiedDomain, CloudVerdict, GeoRecord, ResilienceSummary};

/// Static org-keyword / ASN to provider-name table.
///
/// Independent from the RTT watch list: a domain can count as cloud even when
/// it was geolocated domestically and never probed.
#[derive(Debug, Clone)]
pub struct CloudRegistry {
    entries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    provider: String,
    keywords: Vec<String>,
    asns: Vec<String>,
}

const BUILTIN_PROVIDERS: &[(&str, &[&str], &[&str])] = &[
    ("Google", &["GOOGLE"], &["AS15169", "AS396982", "AS19527"]),
    ("Amazon", &["AMAZON"], &["AS16509", "AS14618"]),
    ("Microsoft", &["MICROSOFT"], &["AS8075", "AS8068"]),
    ("Cloudflare", &["CLOUDFLARE"], &["AS13335", "AS209242"]),
    ("Akamai", &["AKAMAI"], &["AS16625", "AS20940", "AS12222"]),
    ("Fastly", &["FASTLY"], &["AS54113"]),
];

impl Default for CloudRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CloudRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_PROVIDERS
                .iter()
                .map(|(provider, keywords, asns)| RegistryEntry {
                    provider: provider.to_string(),
                    keywords: keywords.iter().map(|k| k.to_string()).collect(),
                    asns: asns.iter().map(|a| a.to_string()).collect(),
                })
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_provider<S: AsRef<str>>(mut self, provider: &str, keywords: &[S], asns: &[S]) -> Self {
        self.entries.push(RegistryEntry {
            provider: provider.to_string(),
            keywords: keywords.iter().map(|k| k.as_ref().to_ascii_uppercase()).collect(),
            asns: asns.iter().map(|a| a.as_ref().to_ascii_uppercase()).collect(),
        });
        self
    }

    /// Provider operating the network described by `org`, matched by ASN first.
    pub fn lookup(&self, org: &str) -> Option<&str> {
        if let Some(asn) = extract_asn(org)
            && let Some(entry) = self.entries.iter().find(|e| e.asns.contains(&asn))
        {
            return Some(&entry.provider);
        }
        let upper = org.to_ascii_uppercase();
        self.entries
            .iter()
            .find(|e| e.keywords.iter().any(|k| upper.contains(k.as_str())))
            .map(|e| e.provider.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Categorise one domain. Error records are skipped and return `None`.
pub fn classify(
    geo: &GeoRecord,
    verdict: Option<&CloudVerdict>,
    registry: &CloudRegistry,
    jurisdiction: &Jurisdiction,
) -> Option<ClassifiedDomain> {
    if geo.is_error() {
        return None;
    }
    let is_domestic = verdict.is_some_and(|v| v.region_match)
        || jurisdiction.is_domestic_country(geo.country.as_deref());
    let provider = geo
        .org
        .as_deref()
        .and_then(|org| registry.lookup(org))
        .map(str::to_string);
    let is_cloud = provider.is_some();

    Some(ClassifiedDomain {
        domain: geo.domain.clone(),
        is_domestic,
        is_cloud,
        category: Category::from_flags(is_domestic, is_cloud),
        provider,
    })
}

pub fn summarize<'a, I>(domains: I) -> ResilienceSummary
where
    I: IntoIterator<Item = &'a ClassifiedDomain>,
{
    let mut summary = ResilienceSummary::default();
    for domain in domains {
        summary.record(domain.category);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{DetectionMethod, GeoSource};

    fn geo(domain: &str, country: &str, org: &str) -> GeoRecord {
        GeoRecord {
            domain: domain.to_string(),
            ip: Some("192.0.2.1".to_string()),
            country: Some(country.to_string()),
            org: Some(org.to_string()),
            city: None,
            region: None,
            loc: None,
            timezone: None,
            source: GeoSource::Live,
            cached_at: None,
            error: None,
        }
    }

    fn verdict(region_match: bool) -> CloudVerdict {
        CloudVerdict {
            region_match,
            detection_method: DetectionMethod::Rtt,
            rtt: Some(if region_match { 4.0 } else { 40.0 }),
            asn: None,
            evidence: None,
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CloudRegistry::builtin();
        assert_eq!(registry.lookup("AS13335 Cloudflare, Inc."), Some("Cloudflare"));
        assert_eq!(registry.lookup("AS14618 Amazon.com, Inc."), Some("Amazon"));
        assert_eq!(registry.lookup("Google Cloud Platform"), Some("Google"));
        assert_eq!(registry.lookup("AS3462 Data Communication Business Group"), None);

        let custom = CloudRegistry::empty().with_provider("Hinet CDN", &["HINET"], &["AS3462"]);
        assert_eq!(custom.lookup("AS3462 Data Communication Business Group"), Some("Hinet CDN"));
    }

    #[test]
    fn test_classify_categories() {
        let registry = CloudRegistry::builtin();
        let tw = Jurisdiction::taiwan();

        let direct_tw = classify(&geo("a.tw", "TW", "AS3462 Chunghwa"), None, &registry, &tw).unwrap();
        assert_eq!(direct_tw.category, Category::DomesticDirect);

        let cloud_tw = classify(&geo("b.test", "TW", "AS15169 Google LLC"), None, &registry, &tw).unwrap();
        assert_eq!(cloud_tw.category, Category::DomesticCloud);
        assert_eq!(cloud_tw.provider.as_deref(), Some("Google"));

        let edge = classify(
            &geo("c.test", "US", "AS13335 Cloudflare, Inc."),
            Some(&verdict(true)),
            &registry,
            &tw,
        )
        .unwrap();
        assert_eq!(edge.category, Category::DomesticCloud);

        let far = classify(
            &geo("d.test", "US", "AS13335 Cloudflare, Inc."),
            Some(&verdict(false)),
            &registry,
            &tw,
        )
        .unwrap();
        assert_eq!(far.category, Category::ForeignCloud);

        let direct_foreign = classify(&geo("e.test", "DE", "AS24940 Hetzner"), None, &registry, &tw).unwrap();
        assert_eq!(direct_foreign.category, Category::ForeignDirect);
    }

    #[test]
    fn test_error_records_are_skipped() {
        let record = GeoRecord::with_error("gone.test".into(), None, "NXDOMAIN".into());
        assert!(classify(&record, None, &CloudRegistry::builtin(), &Jurisdiction::taiwan()).is_none());
    }

    #[test]
    fn test_summary_counts_match_domains() {
        let registry = CloudRegistry::builtin();
        let tw = Jurisdiction::taiwan();
        let records = vec![
            geo("a.test", "TW", "AS3462 Chunghwa"),
            geo("b.test", "TW", "AS15169 Google LLC"),
            geo("c.test", "US", "AS16509 Amazon.com, Inc."),
            GeoRecord::with_error("d.test".into(), None, "timeout".into()),
        ];
        let classified: Vec<ClassifiedDomain> = records
            .iter()
            .filter_map(|g| classify(g, None, &registry, &tw))
            .collect();

        let summary = summarize(&classified);
        assert_eq!(summary.total(), classified.len());
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.foreign.cloud, 1);
        assert!(!summary.is_resilient());

        let domestic_only = summarize(classified.iter().filter(|d| d.is_domestic));
        assert!(domestic_only.is_resilient());
    }
}
