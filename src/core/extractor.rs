//! Time Extractor (spec §4.3): turns an HTTP response into a whole-second
//! wall-clock instant, polymorphic over where that instant comes from.

use crate::core::error::ExtractError;
use crate::core::types::ExtractorKind;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;

/// The response data an extractor needs; deliberately narrow so a mock
/// transport in tests can build one without a real HTTP stack.
pub struct ExtractorInput<'a> {
    pub headers: &'a HashMap<String, String>,
    pub body: &'a [u8],
}

/// A source of wall-clock time recovered from (or alongside) an HTTP
/// response. New sources are added by implementing this trait, not by
/// touching the phase state machines.
pub trait TimeExtractor: Send + Sync {
    /// Milliseconds since the Unix epoch, or an error if this source
    /// couldn't produce a reading for this response.
    fn extract(&self, input: &ExtractorInput<'_>) -> Result<i64, ExtractError>;
}

/// Parses the first `Date` response header. Accepts the three HTTP/1.1
/// date forms (RFC-1123, RFC-850, asctime); rejects any non-GMT/UTC
/// timezone outright since the whole engine assumes the reported instant
/// is UTC.
pub struct DateHeaderExtractor;

impl TimeExtractor for DateHeaderExtractor {
    fn extract(&self, input: &ExtractorInput<'_>) -> Result<i64, ExtractError> {
        let raw = input
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("date"))
            .map(|(_, v)| v.trim())
            .ok_or(ExtractError::MissingTimeSource)?;

        parse_http_date(raw).map(|dt| dt.timestamp_millis())
    }
}

/// Parses an HTTP `Date` header value in any of the three forms HTTP/1.1
/// permits:
///
/// - RFC-1123: `Sun, 06 Nov 1994 08:49:37 GMT`
/// - RFC-850:  `Sunday, 06-Nov-94 08:49:37 GMT`
/// - asctime:  `Sun Nov  6 08:49:37 1994`
pub fn parse_http_date(raw: &str) -> Result<DateTime<Utc>, ExtractError> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return reject_non_utc(raw, dt);
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%a %b %e %H:%M:%S %Y") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    Err(ExtractError::UnparsableDate(raw.to_string()))
}

fn reject_non_utc(
    raw: &str,
    dt: DateTime<chrono::FixedOffset>,
) -> Result<DateTime<Utc>, ExtractError> {
    if dt.offset().local_minus_utc() != 0 {
        return Err(ExtractError::NonUtcTimezone(raw.to_string()));
    }
    Ok(dt.with_timezone(&Utc))
}

/// Consults a configured trusted external time source instead of the
/// target's own `Date` header. Selected by the orchestrator after a probe
/// whose `date-header` extraction fails with `MissingTimeSource`.
pub struct ExternalFallbackExtractor<F> {
    source: F,
}

impl<F> ExternalFallbackExtractor<F>
where
    F: Fn() -> Result<i64, ExtractError> + Send + Sync,
{
    pub fn new(source: F) -> Self {
        Self { source }
    }
}

impl<F> TimeExtractor for ExternalFallbackExtractor<F>
where
    F: Fn() -> Result<i64, ExtractError> + Send + Sync,
{
    fn extract(&self, _input: &ExtractorInput<'_>) -> Result<i64, ExtractError> {
        (self.source)()
    }
}

pub fn extractor_for(kind: ExtractorKind) -> Box<dyn TimeExtractor> {
    match kind {
        ExtractorKind::DateHeader => Box::new(DateHeaderExtractor),
        ExtractorKind::ExternalFallback => {
            Box::new(ExternalFallbackExtractor::new(|| Err(ExtractError::MissingTimeSource)))
        }
    }
}

/// Case-insensitive check for the CDN/edge-proxy signatures spec §4.3 and
/// §6 call out: `cf-ray`/`x-served-by`/`x-cache` header presence, or a
/// `server` value naming a known CDN. Detection is advisory only — the
/// sample is tagged, not discarded.
pub fn detect_cdn_signature(headers: &HashMap<String, String>) -> bool {
    headers.iter().any(|(key, value)| {
        let key = key.to_ascii_lowercase();
        let value = value.to_ascii_lowercase();
        match key.as_str() {
            "cf-ray" | "x-served-by" | "x-cache" => true,
            "server" => ["cloudflare", "akamai", "fastly"]
                .iter()
                .any(|cdn| value.contains(cdn)),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc1123() {
        let dt = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(dt.timestamp(), 784111777);
    }

    #[test]
    fn parses_rfc850() {
        let dt = parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").unwrap();
        assert_eq!(dt.timestamp(), 784111777);
    }

    #[test]
    fn parses_asctime() {
        let dt = parse_http_date("Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!(dt.timestamp(), 784111777);
    }

    #[test]
    fn rejects_non_utc_offset() {
        let err = parse_http_date("Sun, 06 Nov 1994 08:49:37 +0100").unwrap_err();
        assert!(matches!(err, ExtractError::NonUtcTimezone(_)));
    }

    #[test]
    fn detects_cloudflare_server_header() {
        let mut headers = HashMap::new();
        headers.insert("Server".to_string(), "cloudflare".to_string());
        assert!(detect_cdn_signature(&headers));
    }

    #[test]
    fn detects_cf_ray_header() {
        let mut headers = HashMap::new();
        headers.insert("CF-RAY".to_string(), "abc123-SJC".to_string());
        assert!(detect_cdn_signature(&headers));
    }

    #[test]
    fn no_signature_on_plain_headers() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        assert!(!detect_cdn_signature(&headers));
    }
}
