use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a geolocation answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    Live,
    Cached,
    Stale,
    Error,
}

/// Geolocation answer for one dependency domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRecord {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub source: GeoSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeoRecord {
    pub fn with_error(domain: String, ip: Option<String>, error: String) -> Self {
        Self {
            domain,
            ip,
            country: None,
            org: None,
            city: None,
            region: None,
            loc: None,
            timezone: None,
            source: GeoSource::Error,
            cached_at: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.source == GeoSource::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Header,
    Rtt,
    None,
}

/// Regional-presence verdict for a domain served from a watched cloud ASN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudVerdict {
    pub region_match: bool,
    pub detection_method: DetectionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    /// Header name and value that proved the PoP location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "domestic/cloud")]
    DomesticCloud,
    #[serde(rename = "domestic/direct")]
    DomesticDirect,
    #[serde(rename = "foreign/cloud")]
    ForeignCloud,
    #[serde(rename = "foreign/direct")]
    ForeignDirect,
}

impl Category {
    pub fn from_flags(is_domestic: bool, is_cloud: bool) -> Self {
        match (is_domestic, is_cloud) {
            (true, true) => Category::DomesticCloud,
            (true, false) => Category::DomesticDirect,
            (false, true) => Category::ForeignCloud,
            (false, false) => Category::ForeignDirect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::DomesticCloud => "domestic/cloud",
            Category::DomesticDirect => "domestic/direct",
            Category::ForeignCloud => "foreign/cloud",
            Category::ForeignDirect => "foreign/direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedDomain {
    pub domain: String,
    pub is_domestic: bool,
    pub is_cloud: bool,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub cloud: usize,
    pub direct: usize,
}

impl CategoryCounts {
    pub fn total(&self) -> usize {
        self.cloud + self.direct
    }
}

/// The 2x2 domestic/foreign by cloud/direct matrix for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceSummary {
    pub domestic: CategoryCounts,
    pub foreign: CategoryCounts,
}

impl ResilienceSummary {
    pub fn record(&mut self, category: Category) {
        match category {
            Category::DomesticCloud => self.domestic.cloud += 1,
            Category::DomesticDirect => self.domestic.direct += 1,
            Category::ForeignCloud => self.foreign.cloud += 1,
            Category::ForeignDirect => self.foreign.direct += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.domestic.total() + self.foreign.total()
    }

    pub fn is_resilient(&self) -> bool {
        self.domestic.total() > 0 && self.foreign.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_with_slash() {
        let json = serde_json::to_string(&Category::ForeignCloud).unwrap();
        assert_eq!(json, "\"foreign/cloud\"");
    }

    #[test]
    fn test_resilience_verdict() {
        let mut summary = ResilienceSummary::default();
        assert!(!summary.is_resilient(), "empty matrix is not resilient");

        summary.record(Category::DomesticDirect);
        summary.record(Category::DomesticCloud);
        assert!(summary.is_resilient());
        assert_eq!(summary.total(), 2);

        summary.record(Category::ForeignDirect);
        assert!(!summary.is_resilient());
        assert_eq!(summary.foreign.total(), 1);
    }

    #[test]
    fn test_geo_record_error_shape() {
        let record = GeoRecord::with_error("bad.test".into(), None, "NXDOMAIN".into());
        assert!(record.is_error());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "error");
        assert_eq!(json["error"], "NXDOMAIN");
        assert!(json.get("country").is_none());
    }
}
