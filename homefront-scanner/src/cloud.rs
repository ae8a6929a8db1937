// Regional-presence detection for domains served from international cloud/CDN networks

use crate::result::{CloudVerdict, DetectionMethod, GeoRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// International cloud/CDN networks that may have a domestic edge.
pub const WATCHED_ASNS: &[(&str, &str)] = &[
    ("AS15169", "Google LLC"),
    ("AS396982", "Google LLC"),
    ("AS13335", "Cloudflare, Inc."),
    ("AS16509", "Amazon.com, Inc."),
    ("AS54113", "Fastly, Inc."),
    ("AS16625", "Akamai Technologies, Inc."),
    ("AS20940", "Akamai Technologies, Inc."),
    ("AS8075", "Microsoft Corporation"),
];

/// Response headers known to carry an edge PoP or airport code.
pub const POP_HEADERS: &[&str] = &[
    "cf-ray",
    "x-amz-cf-pop",
    "x-served-by",
    "x-edge-location",
    "x-cache-pop",
    "x-azure-ref",
    "x-msedge-ref",
    "x-akamai-edge-ip",
    "server-timing",
];

pub const DEFAULT_RTT_THRESHOLD_MS: f64 = 15.0;
pub const PING_COUNT: u32 = 5;

/// Reference country plus the PoP codes that identify edges inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jurisdiction {
    pub country: String,
    pub pop_codes: Vec<String>,
}

impl Jurisdiction {
    pub fn new<S: AsRef<str>>(country: &str, pop_codes: &[S]) -> Self {
        Self {
            country: country.to_ascii_uppercase(),
            pop_codes: pop_codes
                .iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn taiwan() -> Self {
        Self::new("TW", &["TPE", "KHH", "RMQ"])
    }

    pub fn is_domestic_country(&self, country: Option<&str>) -> bool {
        country.is_some_and(|c| c.eq_ignore_ascii_case(&self.country))
    }

    /// First PoP code appearing in `value` as a whole token.
    pub fn find_pop_code(&self, value: &str) -> Option<&str> {
        let upper = value.to_ascii_uppercase();
        let tokens: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|t| !t.is_empty())
            .collect();
        self.pop_codes
            .iter()
            .find(|code| tokens.iter().any(|t| *t == code.as_str()))
            .map(String::as_str)
    }
}

impl Default for Jurisdiction {
    fn default() -> Self {
        Self::taiwan()
    }
}

/// Leading `ASnnnn` token of a geolocation `org` field, uppercased.
pub fn extract_asn(org: &str) -> Option<String> {
    let token = org.split_whitespace().next()?;
    let digits = token
        .strip_prefix("AS")
        .or_else(|| token.strip_prefix("as"))
        .or_else(|| token.strip_prefix("As"))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("AS{}", digits))
}

pub fn watched_asn_name(asn: &str) -> Option<&'static str> {
    WATCHED_ASNS
        .iter()
        .find(|(a, _)| a.eq_ignore_ascii_case(asn))
        .map(|(_, name)| *name)
}

#[async_trait]
pub trait RttProbe: Send + Sync {
    /// Minimum round-trip time in milliseconds, or `None` when nothing parsed.
    async fn probe(&self, ip: &str) -> Option<f64>;
}

/// Probes with the system `ping` utility.
pub struct PingProbe {
    count: u32,
    timeout: Duration,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            count: PING_COUNT,
            timeout: Duration::from_secs(10),
        }
    }

    fn command(&self, ip: &str) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", &self.count.to_string(), ip]);
        } else {
            cmd.args(["-c", &self.count.to_string(), "-i", "0.2", ip]);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RttProbe for PingProbe {
    async fn probe(&self, ip: &str) -> Option<f64> {
        let output = match tokio::time::timeout(self.timeout, self.command(ip).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run ping for {}: {}", ip, e);
                return None;
            }
            Err(_) => {
                warn!("ping {} timed out", ip);
                return None;
            }
        };
        let rtt = parse_ping_output(&String::from_utf8_lossy(&output.stdout));
        debug!("ping {} -> {:?}", ip, rtt);
        rtt
    }
}

/// Minimum `time=` value from ping output. `time<1ms` counts as 1 ms.
pub fn parse_ping_output(output: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(|line| {
            let idx = line.find("time")?;
            let rest = &line[idx + 4..];
            let rest = rest.strip_prefix('=').or_else(|| rest.strip_prefix('<'))?;
            let number: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            number.parse::<f64>().ok()
        })
        .reduce(f64::min)
}

/// Decides whether a watched-cloud domain is served from a domestic edge.
pub struct CloudClassifier {
    jurisdiction: Jurisdiction,
    probe: Arc<dyn RttProbe>,
    threshold_ms: f64,
}

impl CloudClassifier {
    pub fn new(jurisdiction: Jurisdiction, probe: Arc<dyn RttProbe>, threshold_ms: f64) -> Self {
        Self {
            jurisdiction,
            probe,
            threshold_ms,
        }
    }

    pub fn jurisdiction(&self) -> &Jurisdiction {
        &self.jurisdiction
    }

    /// `None` when the domain is not on the watch list, has no IP, or is
    /// already geolocated to the reference country.
    pub async fn classify(
        &self,
        geo: &GeoRecord,
        headers: &[&HashMap<String, String>],
    ) -> Option<CloudVerdict> {
        if geo.is_error() || self.jurisdiction.is_domestic_country(geo.country.as_deref()) {
            return None;
        }
        let asn = geo.org.as_deref().and_then(extract_asn)?;
        watched_asn_name(&asn)?;
        let ip = geo.ip.as_deref()?;

        if let Some(evidence) = self.header_evidence(headers) {
            debug!("{} matched {} by header {}", geo.domain, self.jurisdiction.country, evidence);
            return Some(CloudVerdict {
                region_match: true,
                detection_method: DetectionMethod::Header,
                rtt: None,
                asn: Some(asn),
                evidence: Some(evidence),
            });
        }

        match self.probe.probe(ip).await {
            Some(rtt) => Some(CloudVerdict {
                region_match: rtt < self.threshold_ms,
                detection_method: DetectionMethod::Rtt,
                rtt: Some(rtt),
                asn: Some(asn),
                evidence: None,
            }),
            None => Some(CloudVerdict {
                region_match: false,
                detection_method: DetectionMethod::None,
                rtt: None,
                asn: Some(asn),
                evidence: None,
            }),
        }
    }

    fn header_evidence(&self, headers: &[&HashMap<String, String>]) -> Option<String> {
        for map in headers {
            for name in POP_HEADERS {
                if let Some(value) = map.get(*name)
                    && let Some(code) = self.jurisdiction.find_pop_code(value)
                {
                    return Some(format!("{}: {} ({})", name, value, code));
                }
            }
        }
        None
    }
}
