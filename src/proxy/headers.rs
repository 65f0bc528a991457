//! Header construction, forwarding, and hop-by-hop stripping.
//!
//! [`build_forwarded_headers`] copies the client's headers minus the
//! hop-by-hop set and adds `X-Forwarded-For`, `X-Forwarded-Host`,
//! `X-Forwarded-Proto` and `X-Forwarded-Protocol` unless the client
//! already sent them. [`response_headers`] does the stripping for the
//! upstream response; `Content-Length` passes through untouched.

use std::sync::LazyLock;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
        "proxy-connection",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

#[must_use]
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Remove hop-by-hop headers, including any extra ones the message lists
/// in its `Connection` header.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| token.trim().parse::<HeaderName>().ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Where the inbound request came from, for the `X-Forwarded-*` headers.
#[derive(Debug, Clone, Copy)]
pub struct ForwardedFrom<'a> {
    pub client_ip: Option<&'a str>,
    /// Inbound `Host`, port included.
    pub host: Option<&'a str>,
    pub scheme: Option<&'a str>,
}

#[must_use]
pub fn build_forwarded_headers(original: &HeaderMap, from: ForwardedFrom<'_>) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);

    let additions = [
        ("x-forwarded-for", from.client_ip),
        ("x-forwarded-host", from.host),
        ("x-forwarded-proto", from.scheme),
        ("x-forwarded-protocol", from.scheme),
    ];
    for (name, value) in additions {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        if headers.contains_key(name) {
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(val) => {
                headers.insert(HeaderName::from_static(name), val);
            }
            Err(_) => {
                tracing::warn!(header = %name, "invalid forwarded header value, skipping");
            }
        }
    }

    headers
}

/// Headers to send back to the client for an upstream response.
#[must_use]
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    strip_hop_by_hop(&mut headers);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP_NAMES: [&str; 9] = [
        "Connection",
        "Keep-Alive",
        "Proxy-Authenticate",
        "Proxy-Authorization",
        "TE",
        "Trailers",
        "Transfer-Encoding",
        "Upgrade",
        "Proxy-Connection",
    ];

    fn from<'a>() -> ForwardedFrom<'a> {
        ForwardedFrom {
            client_ip: Some("10.0.0.1"),
            host: Some("foo.example.com:8080"),
            scheme: Some("http"),
        }
    }

    fn with_all_hop_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in HOP_NAMES {
            headers.insert(
                name.parse::<HeaderName>().unwrap(),
                "x".parse().unwrap(),
            );
        }
        headers.insert("content-type", "application/json".parse().unwrap());
        headers
    }

    #[test]
    fn strips_every_hop_by_hop_header_regardless_of_case() {
        let result = build_forwarded_headers(&with_all_hop_headers(), from());
        for name in HOP_NAMES {
            assert!(result.get(name).is_none(), "{name} was forwarded");
            assert!(result.get(name.to_ascii_uppercase()).is_none());
        }
        assert_eq!(result.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn strips_headers_named_by_connection() {
        let mut original = HeaderMap::new();
        original.insert("connection", "close, x-session-hint".parse().unwrap());
        original.insert("x-session-hint", "abc".parse().unwrap());
        original.insert("x-keep", "1".parse().unwrap());

        let result = build_forwarded_headers(&original, from());
        assert!(result.get("x-session-hint").is_none());
        assert_eq!(result.get("x-keep").unwrap(), "1");
    }

    #[test]
    fn adds_forwarded_headers() {
        let result = build_forwarded_headers(&HeaderMap::new(), from());
        assert_eq!(result.get("x-forwarded-for").unwrap(), "10.0.0.1");
        assert_eq!(
            result.get("x-forwarded-host").unwrap(),
            "foo.example.com:8080"
        );
        assert_eq!(result.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(result.get("x-forwarded-protocol").unwrap(), "http");
    }

    #[test]
    fn keeps_client_supplied_forwarded_headers() {
        let mut original = HeaderMap::new();
        original.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        original.insert("x-forwarded-proto", "https".parse().unwrap());

        let result = build_forwarded_headers(&original, from());
        assert_eq!(result.get("x-forwarded-for").unwrap(), "1.2.3.4");
        assert_eq!(result.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(result.get("x-forwarded-protocol").unwrap(), "http");
    }

    #[test]
    fn skips_headers_without_a_source_value() {
        let result = build_forwarded_headers(
            &HeaderMap::new(),
            ForwardedFrom {
                client_ip: None,
                host: None,
                scheme: Some("http"),
            },
        );
        assert!(result.get("x-forwarded-for").is_none());
        assert!(result.get("x-forwarded-host").is_none());
    }

    #[test]
    fn host_header_is_passed_through() {
        let mut original = HeaderMap::new();
        original.insert("host", "foo.example.com".parse().unwrap());
        let result = build_forwarded_headers(&original, from());
        assert_eq!(result.get("host").unwrap(), "foo.example.com");
    }

    #[test]
    fn response_keeps_content_length() {
        let mut upstream = with_all_hop_headers();
        upstream.insert("content-length", "42".parse().unwrap());
        let result = response_headers(&upstream);
        assert_eq!(result.get("content-length").unwrap(), "42");
        for name in HOP_NAMES {
            assert!(result.get(name).is_none());
        }
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
    }
}
