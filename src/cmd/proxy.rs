//! `xrouter proxy`: start the reverse proxy.
//!
//! Loads the route table from the store, keeps it in sync in the
//! background, and forwards every request on the listener until SIGTERM
//! or Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::ProxyArgs;
use crate::error::RouterError;
use crate::logging;
use crate::server::{self, ProxyState, Stats};

pub async fn execute(args: ProxyArgs) -> Result<(), RouterError> {
    let log_format = logging::resolve_format(args.log.pretty, args.log.json);
    logging::init(&args.log.log_level, log_format);

    let store = super::connect_store(&args.store)?;
    let addr = SocketAddr::new(args.host, args.port);

    let (table, sync) = super::start_replica(store, &args.store).await;

    let state = Arc::new(ProxyState {
        table: Arc::clone(&table),
        http_client: server::build_http_client(),
        upstream_timeout: Duration::from_secs(args.upstream_timeout),
        stats: Stats::new(),
    });
    let router = server::build_proxy_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        routes = table.len().await,
        "xrouter proxy started"
    );

    server::serve_proxy(listener, router, server::shutdown_signal()).await;

    sync.stop().await;
    state.stats.log_totals();
    tracing::info!("xrouter proxy stopped");
    Ok(())
}
