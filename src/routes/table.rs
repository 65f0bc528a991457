//! The in-memory replica of the route records.
//!
//! [`RouteTable`] keeps routes in creation order next to a name index and
//! the highest store index applied so far. The state lives behind a
//! `tokio::sync::RwLock<Arc<_>>`: readers clone the `Arc` (cheap refcount
//! bump) and release the lock before matching, the synchronizer is the
//! only writer and replaces state copy-on-write, so a reader never sees a
//! half-applied change.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::pattern::Captures;
use super::{MatchInput, Route, RouteRecord, RouteUpdate};
use crate::error::{ProxyError, RecordError};
use crate::store::{route_name, Action, Event};

#[derive(Debug, Clone, Default)]
struct TableState {
    /// Creation sequence → route. Updates keep their slot.
    routes: BTreeMap<u64, Arc<Route>>,
    slots: HashMap<String, u64>,
    next_slot: u64,
    applied_index: Option<u64>,
}

impl TableState {
    fn insert(&mut self, route: Route) {
        let route = Arc::new(route);
        if let Some(slot) = self.slots.get(route.name()) {
            self.routes.insert(*slot, route);
        } else {
            let slot = self.next_slot;
            self.next_slot += 1;
            self.slots.insert(route.name().to_string(), slot);
            self.routes.insert(slot, route);
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        match self.slots.remove(name) {
            Some(slot) => {
                self.routes.remove(&slot);
                true
            }
            None => false,
        }
    }

    fn get(&self, name: &str) -> Option<&Arc<Route>> {
        self.slots.get(name).and_then(|slot| self.routes.get(slot))
    }
}

/// What applying a change event did to the table.
#[derive(Debug)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Deleted,
    /// The event was consumed but changed nothing (delete of an unknown
    /// name, or a key outside the route layout).
    Ignored,
    /// The event was consumed but its value could not be turned into a
    /// route; the table is unchanged.
    Rejected(RecordError),
    /// The event's index is below the resume index and was dropped.
    Stale,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    state: RwLock<Arc<TableState>>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self) -> Arc<TableState> {
        Arc::clone(&*self.state.read().await)
    }

    /// Index the next watch call must ask for; `None` until a snapshot or
    /// an event has been applied.
    pub async fn resume_index(&self) -> Option<u64> {
        self.state.read().await.applied_index.map(|i| i + 1)
    }

    /// Reconcile the table against a full listing taken at `index`.
    ///
    /// Routes absent from the listing are dropped, routes already present
    /// keep their position, new routes are appended in listing order.
    pub async fn replace_all(&self, routes: Vec<Route>, index: u64) {
        let mut guard = self.state.write().await;
        let state = Arc::make_mut(&mut guard);

        let stale: Vec<String> = {
            let listed: HashSet<&str> = routes.iter().map(Route::name).collect();
            state
                .slots
                .keys()
                .filter(|name| !listed.contains(name.as_str()))
                .cloned()
                .collect()
        };
        for name in stale {
            state.remove(&name);
        }
        for route in routes {
            state.insert(route);
        }
        state.applied_index = Some(index);
    }

    /// Apply one change event. Events at or below the last applied index
    /// are dropped, which makes re-delivery a no-op.
    pub async fn apply(&self, event: &Event) -> ApplyOutcome {
        let mut guard = self.state.write().await;

        if guard.applied_index.is_some_and(|applied| event.index <= applied) {
            return ApplyOutcome::Stale;
        }

        let state = Arc::make_mut(&mut guard);
        state.applied_index = Some(event.index);

        let Some(name) = route_name(&event.key) else {
            return ApplyOutcome::Ignored;
        };

        match event.action {
            Action::Delete => {
                if state.remove(name) {
                    ApplyOutcome::Deleted
                } else {
                    ApplyOutcome::Ignored
                }
            }
            Action::Set => {
                let value = event.value.as_deref().unwrap_or("{}");
                let result = RouteUpdate::from_json(value).and_then(|update| {
                    match state.get(name) {
                        Some(current) => {
                            Route::compile(current.record().merged(update)).map(|r| (r, false))
                        }
                        None => RouteRecord::create(name, update)
                            .and_then(Route::compile)
                            .map(|r| (r, true)),
                    }
                });
                match result {
                    Ok((route, created)) => {
                        state.insert(route);
                        if created {
                            ApplyOutcome::Created
                        } else {
                            ApplyOutcome::Updated
                        }
                    }
                    Err(e) => ApplyOutcome::Rejected(e),
                }
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Route>> {
        self.snapshot().await.get(name).cloned()
    }

    /// All routes in creation order.
    pub async fn index(&self) -> Vec<Arc<Route>> {
        self.snapshot().await.routes.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.routes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// First route, in creation order, whose patterns match `input`.
    pub async fn resolve(
        &self,
        input: MatchInput<'_>,
    ) -> Result<(Arc<Route>, Captures), ProxyError> {
        let state = self.snapshot().await;
        state
            .routes
            .values()
            .find_map(|route| route.captures(input).map(|c| (Arc::clone(route), c)))
            .ok_or(ProxyError::NoRoute)
    }
}
