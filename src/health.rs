//! `GET /health` endpoint handler for the management API.
//!
//! Returns a [`HealthResponse`] with the server version, uptime, the
//! backing store, and the state of the local route replica.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::ApiState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub routes: RoutesHealth,
}

#[derive(Serialize, Deserialize)]
pub struct RoutesHealth {
    pub store: String,
    pub count: usize,
    /// Next store index the replica will read; absent until the first
    /// snapshot succeeded.
    pub resume_index: Option<u64>,
}

pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        routes: RoutesHealth {
            store: state.store.name().to_string(),
            count: state.table.len().await,
            resume_index: state.table.resume_index().await,
        },
    })
}
