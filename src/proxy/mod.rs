//! The proxy's request handler.
//!
//! [`forward_handler`] is the Axum fallback on the proxy listener. It
//! matches the request's host and path against the route table, renders
//! the route's target, and streams the exchange through [`forward`].
//! No match is a 404, every failure past matching is a 502.

pub mod forward;
pub mod headers;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::routes::{host_without_port, MatchInput};
use crate::server::ProxyState;

use forward::Upstream;
use headers::ForwardedFrom;

const CORRELATION_HEADER: &str = "x-correlation-id";

pub async fn forward_handler(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let correlation_id = parts
        .headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    let inbound_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()));
    let path = parts.uri.path();

    let result: Result<Response<Body>, ProxyError> = async {
        let input = MatchInput {
            host: inbound_host.map(host_without_port),
            path,
        };
        let (route, captures) = state.table.resolve(input).await?;
        let rendered = route.render_target(&captures)?;
        let uri = forward::target_uri(&rendered, parts.uri.query())?;

        tracing::info!(
            correlation_id = %correlation_id,
            method = %parts.method,
            host = inbound_host.unwrap_or(""),
            path = %path,
            route = %route.name(),
            target = %uri,
            "forwarding request"
        );

        let client_ip = addr.ip().to_string();
        let upstream = Upstream {
            client: &state.http_client,
            uri,
            timeout: state.upstream_timeout,
            from: ForwardedFrom {
                client_ip: Some(&client_ip),
                host: inbound_host,
                scheme: Some(parts.uri.scheme_str().unwrap_or("http")),
            },
            correlation_id: &correlation_id,
        };
        forward::dispatch(upstream, &parts, body).await
    }
    .await;

    match result {
        Ok(response) => {
            state.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            response
        }
        Err(ProxyError::NoRoute) => {
            state.stats.not_found.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                correlation_id = %correlation_id,
                method = %parts.method,
                host = inbound_host.unwrap_or(""),
                path = %path,
                "no route matched"
            );
            with_correlation(ProxyError::NoRoute.into_response(), &correlation_id)
        }
        Err(e) => {
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                correlation_id = %correlation_id,
                method = %parts.method,
                path = %path,
                error = %e,
                "request forwarding failed"
            );
            with_correlation(e.into_response(), &correlation_id)
        }
    }
}

fn with_correlation(mut response: Response<Body>, correlation_id: &str) -> Response<Body> {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
