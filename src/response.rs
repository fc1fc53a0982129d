//! Response Assembly - status, headers and body for one SVG/PNG request.
//!
//! The contract is binary: a complete body with 200/304, or an empty body
//! with 404.

use chrono::{DateTime, TimeZone, Utc};

use crate::cache::CachedOutput;
use crate::selector::OutputFormat;

pub const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Request headers the handler looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub accept_encoding: Option<String>,
    pub if_modified_since: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestHeaders {
    pub fn accepts_gzip(&self) -> bool {
        self.accept_encoding.as_deref().map_or(false, |value| {
            value.split(',').any(|coding| {
                let mut parts = coding.trim().split(';');
                let name = parts.next().unwrap_or_default().trim();
                let rejected = parts.any(|p| {
                    p.trim()
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        == Some(0.0)
                });
                (name.eq_ignore_ascii_case("gzip") || name == "*") && !rejected
            })
        })
    }

    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.if_modified_since
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
            .map(|date| date.with_timezone(&Utc))
    }
}

/// RFC 7231 date for `Last-Modified`.
pub fn http_date(timestamp: i64) -> Option<String> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SvgResponse {
    fn new(status: u16, format: OutputFormat) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), format.content_type().to_string())],
            body: Vec::new(),
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn with_caching(self, last_modified: i64) -> Self {
        let response = self.with_header("Cache-Control", CACHE_CONTROL);
        match http_date(last_modified) {
            Some(date) => response.with_header("Last-Modified", date),
            None => response,
        }
    }

    fn with_body(mut self, body: Vec<u8>) -> Self {
        let length = body.len().to_string();
        self.body = body;
        self.with_header("Content-Length", length)
    }

    pub fn not_modified(format: OutputFormat, last_modified: i64) -> Self {
        Self::new(304, format).with_caching(last_modified)
    }

    /// Empty 404; the content type is still set.
    pub fn not_found(format: OutputFormat) -> Self {
        Self::new(404, format).with_header("Content-Length", "0")
    }

    /// 200 for rendered SVG. Compressed output is passed through when the
    /// client takes gzip and decompressed otherwise.
    pub fn svg(output: CachedOutput, accepts_gzip: bool, last_modified: i64) -> Self {
        if output.is_empty() {
            return Self::not_found(OutputFormat::Svg);
        }
        let response = Self::new(200, OutputFormat::Svg).with_caching(last_modified);
        match output {
            CachedOutput::Compressed(compressed) if accepts_gzip => response
                .with_header("Content-Encoding", "gzip")
                .with_body(compressed.data),
            other => {
                let body = other.into_plain();
                if body.is_empty() {
                    return Self::not_found(OutputFormat::Svg);
                }
                response.with_body(body)
            }
        }
    }

    pub fn png(png: Vec<u8>, last_modified: i64) -> Self {
        if png.is_empty() {
            return Self::not_found(OutputFormat::Png);
        }
        Self::new(200, OutputFormat::Png)
            .with_caching(last_modified)
            .with_body(png)
    }

    /// First header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_gzipped(&self) -> bool {
        self.header("Content-Encoding") == Some("gzip")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompressedOutput;

    #[test]
    fn test_accepts_gzip() {
        let headers = |v: &str| RequestHeaders {
            accept_encoding: Some(v.to_string()),
            ..Default::default()
        };
        assert!(headers("gzip, deflate, br").accepts_gzip());
        assert!(headers("br;q=1.0, GZIP;q=0.5").accepts_gzip());
        assert!(!headers("gzip;q=0, br").accepts_gzip());
        assert!(!headers("identity").accepts_gzip());
        assert!(!RequestHeaders::default().accepts_gzip());
    }

    #[test]
    fn test_conditional_requests() {
        let headers = RequestHeaders {
            if_modified_since: Some("Sun, 06 Nov 1994 08:49:37 GMT".into()),
            ..Default::default()
        };
        assert_eq!(headers.if_modified_since().map(|d| d.timestamp()), Some(784111777));

        let garbage = RequestHeaders {
            if_modified_since: Some("yesterday".into()),
            ..Default::default()
        };
        assert_eq!(garbage.if_modified_since(), None);
    }

    #[test]
    fn test_http_date() {
        assert_eq!(http_date(784111777).as_deref(), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
    }

    #[test]
    fn test_gzip_passthrough_and_fallback() {
        let compressed = CompressedOutput::compress(b"<svg/>").unwrap();

        let passthrough = SvgResponse::svg(CachedOutput::Compressed(compressed.clone()), true, 0);
        assert_eq!(passthrough.status, 200);
        assert!(passthrough.is_gzipped());
        assert_eq!(passthrough.body, compressed.data);

        let plain = SvgResponse::svg(CachedOutput::Compressed(compressed), false, 0);
        assert!(!plain.is_gzipped());
        assert_eq!(plain.body, b"<svg/>");
        assert_eq!(plain.header("content-length"), Some("6"));
        assert_eq!(plain.header("Content-Type"), Some("image/svg+xml; charset=utf-8"));
    }

    #[test]
    fn test_empty_output_is_404_with_content_type() {
        let response = SvgResponse::svg(CachedOutput::Plain(Vec::new()), true, 0);
        assert_eq!(response.status, 404);
        assert!(response.body.is_empty());
        assert_eq!(response.header("Content-Type"), Some("image/svg+xml; charset=utf-8"));

        let response = SvgResponse::png(Vec::new(), 0);
        assert_eq!(response.status, 404);
        assert_eq!(response.header("Content-Type"), Some("image/png"));
    }

    #[test]
    fn test_not_modified_has_no_body() {
        let response = SvgResponse::not_modified(OutputFormat::Png, 0);
        assert_eq!(response.status, 304);
        assert!(response.body.is_empty());
        assert_eq!(response.header("Content-Type"), Some("image/png"));
        assert_eq!(response.header("Cache-Control"), Some(CACHE_CONTROL));
    }
}
