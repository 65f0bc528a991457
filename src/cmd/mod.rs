//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`proxy`], [`api`], or [`health`]. The two server
//! commands share [`connect_store`] and [`start_replica`], which set up
//! the store client and the synchronized route table.

pub mod api;
pub mod health;
pub mod proxy;

use std::sync::Arc;

use crate::cli::{Cli, Commands, StoreArgs};
use crate::error::RouterError;
use crate::routes::sync::{SyncHandle, SyncSettings, Synchronizer};
use crate::routes::table::RouteTable;
use crate::store::etcd::EtcdStore;
use crate::store::StoreClient;

pub async fn dispatch(cli: Cli) -> Result<(), RouterError> {
    match cli.command {
        Some(Commands::Proxy(args)) => proxy::execute(*args).await,
        Some(Commands::Api(args)) => api::execute(*args).await,
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  xrouter v{version}: dynamic HTTP reverse proxy\n\n  \
         No command provided. To get started:\n\n    \
         xrouter proxy --formation <name>     Start the proxy\n    \
         xrouter api --formation <name>       Start the route management API\n    \
         xrouter --help                       See all commands and options\n"
    );
}

/// Build the store client named by the CLI.
pub fn connect_store(args: &StoreArgs) -> Result<Arc<dyn StoreClient>, RouterError> {
    let Some(raw) = args.resolved_url() else {
        return Err(RouterError::NoStore {
            hint: "Provide --formation <name> (or GILLIAM_FORMATION) to use the formation's store,\n  \
                   or --store-url <url> (or XROUTER_STORE_URL) to point at one directly."
                .into(),
        });
    };
    let url = url::Url::parse(&raw).map_err(|source| RouterError::StoreUrl {
        url: raw.clone(),
        source,
    })?;
    tracing::info!(store = %url, "using etcd route store");
    Ok(Arc::new(EtcdStore::new(url)))
}

/// Load the route table from the store and start following its change
/// feed.
pub async fn start_replica(
    store: Arc<dyn StoreClient>,
    args: &StoreArgs,
) -> (Arc<RouteTable>, SyncHandle) {
    let table = Arc::new(RouteTable::new());
    let settings = SyncSettings {
        watch_timeout: args.watch_timeout(),
        snapshot_retries: args.snapshot_retries,
        ..SyncSettings::default()
    };
    let synchronizer = Synchronizer::new(store, Arc::clone(&table), settings);
    let fencing_index = synchronizer.bootstrap().await;
    let handle = synchronizer.start(fencing_index);
    (table, handle)
}
