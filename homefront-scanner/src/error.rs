use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("DNS resolution failed for {domain}: {message}")]
    DnsError { domain: String, message: String },

    #[error("Geolocation lookup failed for {ip}: {message}")]
    GeolocationError { ip: String, message: String },

    #[error("HTTP {status} returned by {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Anti-bot challenge detected: {0}")]
    ChallengeDetected(String),

    #[error("no domains after filtering ({requests} requests observed)")]
    NoDomainsAfterFiltering { requests: usize },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// HTTP status code carried by the error, either directly or reported
    /// in a collector message such as `"... HTTP 403 ..."`.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ScanError::HttpStatus { status, .. } => Some(*status),
            ScanError::HttpError(e) => e.status().map(|s| s.as_u16()),
            ScanError::Navigation(message) => parse_http_status(message),
            _ => None,
        }
    }

    /// Chromium-style network error code (`net::ERR_*`) embedded in the message.
    pub fn net_error(&self) -> Option<String> {
        parse_net_error(&self.to_string())
    }
}

/// Extract the first `net::ERR_*` token from a message.
pub fn parse_net_error(message: &str) -> Option<String> {
    let start = message.find("net::ERR_")?;
    let code: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    Some(code)
}

const STATUS_MARKERS: &[&str] = &["http ", "status code ", "status "];

/// Extract an HTTP error status (400-599) that directly follows an `HTTP ` or
/// `status ` marker. Digits elsewhere in the text (hostnames, durations) are
/// never read as a status.
pub fn parse_http_status(message: &str) -> Option<u16> {
    let lower = message.to_ascii_lowercase();
    STATUS_MARKERS.iter().find_map(|marker| {
        lower.match_indices(marker).find_map(|(at, _)| {
            let rest = &lower[at + marker.len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.len() != 3 {
                return None;
            }
            digits
                .parse::<u16>()
                .ok()
                .filter(|code| (400..600).contains(code))
        })
    })
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_net_error() {
        assert_eq!(
            parse_net_error("page.goto: net::ERR_NAME_NOT_RESOLVED at https://x.test"),
            Some("net::ERR_NAME_NOT_RESOLVED".to_string())
        );
        assert_eq!(parse_net_error("connection reset"), None);
    }

    #[test]
    fn test_parse_http_status() {
        assert_eq!(parse_http_status("HTTP 403 returned by https://x.test"), Some(403));
        assert_eq!(parse_http_status("took 1200 ms, status 200"), None);
        assert_eq!(parse_http_status("upstream returned status 503"), Some(503));
        assert_eq!(parse_http_status("upstream said 503"), None);
        assert_eq!(parse_http_status("HTTP/1.1 error at https://x.test:4430/"), None);
    }

    #[test]
    fn test_http_status_ignores_digits_in_hostnames() {
        let err = ScanError::Navigation(
            "net::ERR_NAME_NOT_RESOLVED at https://www.518.com.tw/".to_string(),
        );
        assert_eq!(err.http_status(), None);
        assert_eq!(err.net_error(), Some("net::ERR_NAME_NOT_RESOLVED".to_string()));

        let err = ScanError::Navigation("HTTP 502 at https://www.404.com.tw/".to_string());
        assert_eq!(err.http_status(), Some(502));
    }

    #[test]
    fn test_timeout_has_no_http_status() {
        assert_eq!(ScanError::Timeout(450).http_status(), None);
        assert_eq!(ScanError::Timeout(120).http_status(), None);
    }

    #[test]
    fn test_http_status_variant() {
        let err = ScanError::HttpStatus {
            status: 404,
            url: "https://example.com".to_string(),
        };
        assert_eq!(err.http_status(), Some(404));
        assert_eq!(err.net_error(), None);
    }
}
