//! Dispatch of one matched request to its upstream.
//!
//! The request body is handed to the client as a stream and the upstream
//! response body is handed back to the server as a stream, so neither is
//! buffered here. The upstream timeout bounds connecting and receiving
//! the response head, and then every gap between body frames in either
//! direction. A stalled body ends the exchange and releases both
//! connections.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, Response};

use tower_http::timeout::TimeoutBody;

use crate::error::ProxyError;
use crate::server::HttpClient;

use super::headers::{build_forwarded_headers, response_headers, ForwardedFrom};

/// Build the upstream URI from a rendered target. The inbound query string
/// is appended when the target does not carry one of its own.
pub fn target_uri(rendered: &str, inbound_query: Option<&str>) -> Result<hyper::Uri, ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidTarget {
        target: rendered.to_string(),
        reason,
    };

    let mut url = url::Url::parse(rendered).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    if url.query().is_none() {
        if let Some(query) = inbound_query.filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }
    }

    url.as_str()
        .parse::<hyper::Uri>()
        .map_err(|e| invalid(e.to_string()))
}

pub struct Upstream<'a> {
    pub client: &'a HttpClient,
    pub uri: hyper::Uri,
    pub timeout: Duration,
    pub from: ForwardedFrom<'a>,
    pub correlation_id: &'a str,
}

/// Send the request upstream and translate the response for the client.
#[allow(clippy::cast_possible_truncation)]
pub async fn dispatch(
    upstream: Upstream<'_>,
    parts: &Parts,
    body: Body,
) -> Result<Response<Body>, ProxyError> {
    let start = Instant::now();

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(upstream.uri.clone())
        .body(Body::new(TimeoutBody::new(upstream.timeout, body)))?;
    *request.headers_mut() = build_forwarded_headers(&parts.headers, upstream.from);

    let response = tokio::time::timeout(upstream.timeout, upstream.client.request(request))
        .await
        .map_err(|_| ProxyError::Timeout(upstream.timeout))??;

    tracing::debug!(
        correlation_id = %upstream.correlation_id,
        target = %upstream.uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "upstream responded"
    );

    let (head, incoming) = response.into_parts();
    let mut reply = Response::new(Body::new(TimeoutBody::new(upstream.timeout, incoming)));
    *reply.status_mut() = head.status;
    *reply.headers_mut() = response_headers(&head.headers);
    Ok(reply)
}
