//! Keeps a [`RouteTable`] in step with the store's change feed.
//!
//! Startup takes a snapshot (listing plus fencing index) and loads it into
//! the table; [`Synchronizer::start`] then spawns the watch loop, which
//! resumes the feed at `fencing + 1`. Each watch call is a bounded long
//! poll: a timeout is just a tick. Store failures are retried with capped
//! exponential backoff, and a compacted history (`IndexCleared`) triggers
//! a fresh snapshot that is reconciled into the table.
//!
//! The loop listens on a `watch` channel and stops as soon as
//! [`SyncHandle::stop`] is called, abandoning any in-flight watch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::table::{ApplyOutcome, RouteTable};
use super::{Route, RouteRecord, RouteUpdate};
use crate::error::{RecordError, StoreError};
use crate::store::{route_name, Event, KeyValue, StoreClient, ROUTE_PREFIX};

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub prefix: String,
    pub watch_timeout: Duration,
    pub snapshot_retries: u32,
    pub backoff: Backoff,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            prefix: ROUTE_PREFIX.to_string(),
            watch_timeout: Duration::from_secs(5),
            snapshot_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Routes listed from the store and the index that fences later events.
/// `index` is `None` when the store could not be reached.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub routes: Vec<Route>,
    pub index: Option<u64>,
}

pub struct Synchronizer {
    store: Arc<dyn StoreClient>,
    table: Arc<RouteTable>,
    settings: SyncSettings,
}

/// Handle to a running watch loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "route synchronizer task failed");
        }
    }
}

fn route_from_entry(entry: &KeyValue) -> Result<Route, RecordError> {
    let name = route_name(&entry.key).ok_or_else(|| RecordError::ForeignKey {
        key: entry.key.clone(),
    })?;
    let update = RouteUpdate::from_json(&entry.value)?;
    Route::compile(RouteRecord::create(name, update)?)
}

impl Synchronizer {
    #[must_use]
    pub fn new(store: Arc<dyn StoreClient>, table: Arc<RouteTable>, settings: SyncSettings) -> Self {
        Self {
            store,
            table,
            settings,
        }
    }

    async fn try_snapshot(&self) -> Result<(Vec<Route>, u64), StoreError> {
        let listing = self.store.list_recursive(&self.settings.prefix).await?;
        let routes = listing
            .entries
            .iter()
            .filter_map(|entry| match route_from_entry(entry) {
                Ok(route) => Some(route),
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "skipping invalid route record");
                    None
                }
            })
            .collect();
        Ok((routes, listing.index))
    }

    /// One snapshot attempt. An unreachable store yields an empty
    /// snapshot without a fencing index.
    pub async fn snapshot(&self) -> Snapshot {
        match self.try_snapshot().await {
            Ok((routes, index)) => Snapshot {
                routes,
                index: Some(index),
            },
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    error = %e,
                    "route store unavailable, snapshot is empty"
                );
                Snapshot::default()
            }
        }
    }

    /// Load the initial snapshot into the table, retrying with backoff.
    /// Returns the fencing index, or `None` if the store stayed
    /// unreachable and the table starts empty.
    pub async fn bootstrap(&self) -> Option<u64> {
        let retries = self.settings.snapshot_retries;
        for attempt in 0..=retries {
            let snapshot = self.snapshot().await;
            if let Some(index) = snapshot.index {
                let count = snapshot.routes.len();
                self.table.replace_all(snapshot.routes, index).await;
                tracing::info!(routes = count, index, "route table loaded");
                return Some(index);
            }
            if attempt < retries {
                tokio::time::sleep(self.settings.backoff.delay(attempt + 1)).await;
            }
        }
        tracing::warn!(
            attempts = retries + 1,
            "starting with an empty route table, snapshot will be retried in the background"
        );
        None
    }

    /// Spawn the watch loop, resuming the feed after `fencing_index`.
    #[must_use]
    pub fn start(self, fencing_index: Option<u64>) -> SyncHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(fencing_index, shutdown_rx).await;
        });
        SyncHandle { shutdown, task }
    }

    async fn run(self, fencing_index: Option<u64>, mut shutdown: watch::Receiver<bool>) {
        let mut resume = fencing_index.map(|i| i + 1);
        let mut failures: u32 = 0;

        tracing::debug!(resume = ?resume, "route synchronizer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(index) = resume else {
                let attempt = tokio::select! {
                    result = self.try_snapshot() => result,
                    _ = shutdown.changed() => break,
                };
                match attempt {
                    Ok((routes, index)) => {
                        let count = routes.len();
                        self.table.replace_all(routes, index).await;
                        tracing::info!(routes = count, index, "route table reloaded from snapshot");
                        resume = Some(index + 1);
                        failures = 0;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        tracing::warn!(error = %e, failures, "route snapshot failed");
                        if !self.pause(failures, &mut shutdown).await {
                            break;
                        }
                    }
                }
                continue;
            };

            let result = tokio::select! {
                result = self.store.watch(&self.settings.prefix, Some(index), self.settings.watch_timeout) => result,
                _ = shutdown.changed() => break,
            };

            match result {
                Ok(None) => failures = 0,
                Ok(Some(event)) => {
                    failures = 0;
                    if self.handle(&event).await {
                        resume = Some(event.index + 1);
                    }
                }
                Err(StoreError::IndexCleared { requested, current }) => {
                    tracing::warn!(
                        requested,
                        current,
                        "watch index cleared from store history, re-snapshotting"
                    );
                    resume = None;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(error = %e, failures, index, "route watch failed");
                    if !self.pause(failures, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!("route synchronizer stopped");
    }

    /// Apply one event. Returns `false` if it was stale.
    async fn handle(&self, event: &Event) -> bool {
        let outcome = self.table.apply(event).await;
        match outcome {
            ApplyOutcome::Created => {
                tracing::info!(key = %event.key, index = event.index, "route created");
            }
            ApplyOutcome::Updated => {
                tracing::info!(key = %event.key, index = event.index, "route updated");
            }
            ApplyOutcome::Deleted => {
                tracing::info!(key = %event.key, index = event.index, "route deleted");
            }
            ApplyOutcome::Ignored => {
                tracing::debug!(key = %event.key, index = event.index, "change event ignored");
            }
            ApplyOutcome::Rejected(e) => {
                tracing::warn!(key = %event.key, index = event.index, error = %e, "invalid route record rejected");
            }
            ApplyOutcome::Stale => {
                tracing::debug!(key = %event.key, index = event.index, "stale change event dropped");
                return false;
            }
        }
        true
    }

    /// Sleep for the backoff delay. Returns `false` if shutdown was
    /// requested meanwhile.
    async fn pause(&self, attempt: u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.settings.backoff.delay(attempt)) => true,
            _ = shutdown.changed() => false,
        }
    }
}
