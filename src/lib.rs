//! xrouter is a dynamic HTTP reverse proxy.
//!
//! Routing rules live in a distributed key/value store under `routes/<name>`.
//! Every process keeps an in-memory replica of them, loaded from a snapshot
//! and kept current by following the store's change feed. Incoming requests
//! are matched on host and path, the route's target template is filled from
//! the captured variables, and the exchange is streamed to the upstream.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (proxy, api, health).
//! - [`store`] -- The [`StoreClient`](store::StoreClient) trait with an etcd v2
//!   client and an in-process implementation.
//! - [`routes`] -- Route records, host/path patterns, target templates, the
//!   replicated [`RouteTable`](routes::table::RouteTable) and its synchronizer.
//! - [`proxy`] -- Request matching, header rewriting, and streaming forwarding.
//! - [`api`] -- REST management API over the route store.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`health`] -- `GET /health` endpoint handler for the management API.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`server`] -- Shared state, routers, the upstream HTTP client, the proxy
//!   accept loop, and graceful shutdown.

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cli;
pub mod cmd;
pub mod error;
pub mod health;
pub mod logging;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod store;
