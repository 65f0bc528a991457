//! In-process [`StoreClient`] with etcd-like index semantics.
//!
//! Every write gets the next index, listings report the index they were
//! taken at, and watches are served from a bounded event history so that
//! compaction (and the resulting [`StoreError::IndexCleared`]) can be
//! exercised. Backs the test suite; the binaries always talk to etcd.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{under_prefix, Action, Event, KeyValue, Listing, StoreClient};
use crate::error::StoreError;

const DEFAULT_HISTORY: usize = 1000;
const WATCH_LOG_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct State {
    index: u64,
    entries: Vec<KeyValue>,
    history: VecDeque<Event>,
    history_limit: usize,
    compacted_through: u64,
    watch_requests: VecDeque<Option<u64>>,
}

impl State {
    fn record(&mut self, event: Event) {
        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted_through = dropped.index;
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    changed: Notify,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY)
    }

    /// Keep at most `limit` events for watchers; older indexes report
    /// [`StoreError::IndexCleared`].
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(State {
                history_limit: limit.max(1),
                ..State::default()
            }),
            changed: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Index values passed to [`StoreClient::watch`], in call order. Only
    /// the most recent calls are kept.
    pub async fn watch_requests(&self) -> Vec<Option<u64>> {
        self.state.lock().await.watch_requests.iter().copied().collect()
    }

    pub async fn current_index(&self) -> u64 {
        self.state.lock().await.index
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                source: "memory store marked unavailable".into(),
            })
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Listing, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(Listing {
            entries: state
                .entries
                .iter()
                .filter(|kv| under_prefix(&kv.key, prefix))
                .cloned()
                .collect(),
            index: state.index,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.index += 1;
        let index = state.index;
        let key = key.trim_start_matches('/').to_string();

        match state.entries.iter().position(|kv| kv.key == key) {
            Some(pos) => state.entries[pos].value = value.to_string(),
            None => state.entries.push(KeyValue {
                key: key.clone(),
                value: value.to_string(),
            }),
        }
        state.record(Event {
            action: Action::Set,
            key,
            value: Some(value.to_string()),
            index,
        });
        drop(state);

        self.changed.notify_waiters();
        Ok(index)
    }

    async fn delete(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let key = key.trim_start_matches('/');
        let Some(pos) = state.entries.iter().position(|kv| kv.key == key) else {
            return Ok(None);
        };
        let removed = state.entries.remove(pos);
        state.index += 1;
        let index = state.index;
        state.record(Event {
            action: Action::Delete,
            key: removed.key,
            value: None,
            index,
        });
        drop(state);

        self.changed.notify_waiters();
        Ok(Some(index))
    }

    async fn watch(
        &self,
        prefix: &str,
        index: Option<u64>,
        timeout: Duration,
    ) -> Result<Option<Event>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;

        let start = {
            let mut state = self.state.lock().await;
            if state.watch_requests.len() == WATCH_LOG_LIMIT {
                state.watch_requests.pop_front();
            }
            state.watch_requests.push_back(index);
            index.unwrap_or(state.index + 1)
        };

        loop {
            // Register interest before inspecting state so a write between
            // the check and the wait is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_available()?;
            {
                let state = self.state.lock().await;
                if start <= state.compacted_through {
                    return Err(StoreError::IndexCleared {
                        requested: start,
                        current: state.index,
                    });
                }
                if let Some(event) = state
                    .history
                    .iter()
                    .find(|e| e.index >= start && under_prefix(&e.key, prefix))
                {
                    return Ok(Some(event.clone()));
                }
            }

            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_reports_creation_order_and_index() {
        let store = MemoryStore::new();
        store.set("routes/b", "1").await.unwrap();
        store.set("routes/a", "2").await.unwrap();
        store.set("routes/b", "3").await.unwrap();
        store.set("other/x", "4").await.unwrap();

        let listing = store.list_recursive("routes").await.unwrap();
        let keys: Vec<_> = listing.entries.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["routes/b", "routes/a"]);
        assert_eq!(listing.entries[0].value, "3");
        assert_eq!(listing.index, 4);
    }

    #[tokio::test]
    async fn delete_of_missing_key_does_not_advance_index() {
        let store = MemoryStore::new();
        assert_eq!(store.delete("routes/nope").await.unwrap(), None);
        assert_eq!(store.current_index().await, 0);
    }

    #[tokio::test]
    async fn watch_returns_buffered_event_at_or_after_index() {
        let store = MemoryStore::new();
        store.set("routes/a", "1").await.unwrap();
        store.set("routes/b", "2").await.unwrap();

        let event = store
            .watch("routes", Some(2), Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "routes/b");
        assert_eq!(event.index, 2);
    }

    #[tokio::test]
    async fn watch_times_out_without_events() {
        let store = MemoryStore::new();
        let event = store
            .watch("routes", Some(1), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn watch_wakes_on_later_write() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.delete("routes/none").await.unwrap();
            writer.set("routes/a", "x").await.unwrap();
        });

        let event = store
            .watch("routes", None, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.action, Action::Set);
        assert_eq!(event.index, 1);
    }

    #[tokio::test]
    async fn watch_log_keeps_only_recent_calls() {
        let store = MemoryStore::new();
        store.set("routes/a", "1").await.unwrap();
        for _ in 0..WATCH_LOG_LIMIT + 10 {
            store
                .watch("routes", Some(1), Duration::from_millis(10))
                .await
                .unwrap();
        }
        store.watch("routes", None, Duration::ZERO).await.unwrap();

        let log = store.watch_requests().await;
        assert_eq!(log.len(), WATCH_LOG_LIMIT);
        assert_eq!(log.last(), Some(&None));
    }

    #[tokio::test]
    async fn compacted_index_is_reported() {
        let store = MemoryStore::with_history_limit(2);
        for i in 0..4 {
            store.set(&format!("routes/r{i}"), "v").await.unwrap();
        }
        let err = store
            .watch("routes", Some(1), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::IndexCleared {
                requested: 1,
                current: 4
            }
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.list_recursive("routes").await.is_err());
        assert!(store.set("routes/a", "v").await.is_err());
        assert!(store
            .watch("routes", None, Duration::from_millis(10))
            .await
            .is_err());
    }
}
