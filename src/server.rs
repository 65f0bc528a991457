//! Listener setup, shared state, and graceful shutdown.
//!
//! Contains [`ProxyState`] and [`ApiState`] (the `Arc`-shared state of the
//! two processes), [`build_proxy_router`] and [`build_api_router`],
//! [`build_http_client`] for the connection-pooled upstream client,
//! [`serve_proxy`] for the proxy's accept loop, and [`shutdown_signal`]
//! for SIGTERM / Ctrl+C handling.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::routing::get;
use axum::{Extension, Router};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::health::health_handler;
use crate::proxy;
use crate::routes::table::RouteTable;
use crate::store::StoreClient;

/// How long in-flight proxy connections get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Request outcome counters for one proxy process.
#[derive(Debug)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub not_found: AtomicU64,
    pub failed: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn log_totals(&self) {
        tracing::info!(
            forwarded = self.forwarded.load(Ordering::Relaxed),
            not_found = self.not_found.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "proxy request totals"
        );
    }
}

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, Body>;

pub struct ProxyState {
    pub table: Arc<RouteTable>,
    pub http_client: HttpClient,
    pub upstream_timeout: Duration,
    pub stats: Stats,
}

pub struct ApiState {
    pub table: Arc<RouteTable>,
    pub store: Arc<dyn StoreClient>,
    pub start_time: Instant,
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // With more than one rustls crypto provider compiled in, rustls cannot
    // pick one on its own.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .http1_title_case_headers(true)
        .build(https)
}

pub fn build_proxy_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(proxy::forward_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_api_router(state: Arc<ApiState>, max_body: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/route", get(api::index).post(api::create))
        .route("/route/{name}", get(api::show).delete(api::delete))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

/// Serve the proxy router until `shutdown` resolves, then drain open
/// connections.
///
/// Outgoing header names are written in canonical `Title-Case`, which
/// `axum::serve` does not expose, so connections are driven by
/// hyper-util directly. Each connection's peer address is injected as
/// [`ConnectInfo`].
pub async fn serve_proxy<F>(listener: TcpListener, router: Router, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder.http1().title_case_headers(true);
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let service = TowerToHyperService::new(
            router
                .clone()
                .layer(Extension(ConnectInfo::<SocketAddr>(remote))),
        );
        let conn = builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service)
            .into_owned();
        let conn = graceful.watch(conn);
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(peer = %remote, error = %e, "connection ended with error");
            }
        });
    }

    drop(listener);
    tokio::select! {
        () = graceful.shutdown() => tracing::debug!("proxy connections drained"),
        () = tokio::time::sleep(DRAIN_TIMEOUT) => {
            tracing::warn!(timeout = ?DRAIN_TIMEOUT, "gave up waiting for proxy connections to drain");
        }
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
