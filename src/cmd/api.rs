//! `xrouter api`: serve the route management API.
//!
//! Writes go to the store; reads come from a local replica kept current
//! by the same synchronizer the proxy uses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::ApiArgs;
use crate::error::RouterError;
use crate::logging;
use crate::server::{self, ApiState};

pub async fn execute(args: ApiArgs) -> Result<(), RouterError> {
    let log_format = logging::resolve_format(args.log.pretty, args.log.json);
    logging::init(&args.log.log_level, log_format);

    let store = super::connect_store(&args.store)?;
    let addr = SocketAddr::new(args.host, args.port);

    let (table, sync) = super::start_replica(Arc::clone(&store), &args.store).await;

    let state = Arc::new(ApiState {
        table,
        store,
        start_time: Instant::now(),
    });
    let router = server::build_api_router(state, args.max_body);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "xrouter api started");

    axum::serve(listener, router)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    sync.stop().await;
    tracing::info!("xrouter api stopped");
    Ok(())
}
