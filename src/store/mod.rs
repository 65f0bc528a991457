//! Key/value store clients that hold the replicated route records.
//!
//! Defines the [`StoreClient`] trait consumed by the synchronizer and the
//! management API, the change-feed [`Event`] type, and the key layout
//! (`routes/<name>`). Submodules provide the etcd v2 HTTP client and an
//! in-process store with the same semantics.

pub mod etcd;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Key prefix under which every route record lives.
pub const ROUTE_PREFIX: &str = "routes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Set,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub action: Action,
    /// Key relative to the store root, without a leading slash.
    pub key: String,
    /// Raw value; `None` for deletions.
    pub value: Option<String>,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A recursive listing together with the store index it was taken at.
///
/// Every change with an index greater than `index` is guaranteed not to
/// be reflected in `entries`, so a watch started at `index + 1` sees each
/// later change exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Entries in creation order.
    pub entries: Vec<KeyValue>,
    pub index: u64,
}

// async_trait is required here because StoreClient is shared as
// Arc<dyn StoreClient> and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait StoreClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_recursive(&self, prefix: &str) -> Result<Listing, StoreError>;

    /// Returns the index assigned to the write.
    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Returns the index assigned to the deletion, or `None` if the key
    /// did not exist.
    async fn delete(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Block until a change under `prefix` with an index of at least
    /// `index` exists, or `timeout` elapses. `index = None` waits for the
    /// next change after the call. A timeout yields `Ok(None)`.
    async fn watch(
        &self,
        prefix: &str,
        index: Option<u64>,
        timeout: Duration,
    ) -> Result<Option<Event>, StoreError>;
}

#[must_use]
pub fn route_key(name: &str) -> String {
    format!("{ROUTE_PREFIX}/{name}")
}

/// Extract the route name from a store key. Accepts keys with or without
/// a leading slash and rejects nested keys.
#[must_use]
pub fn route_name(key: &str) -> Option<&str> {
    let rest = key.trim_start_matches('/').strip_prefix(ROUTE_PREFIX)?;
    let name = rest.strip_prefix('/')?;
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name)
    }
}

fn under_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    key.trim_start_matches('/')
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_key_round_trips_through_route_name() {
        assert_eq!(route_key("web"), "routes/web");
        assert_eq!(route_name("routes/web"), Some("web"));
        assert_eq!(route_name("/routes/web"), Some("web"));
    }

    #[test]
    fn route_name_rejects_foreign_and_nested_keys() {
        assert_eq!(route_name("services/web"), None);
        assert_eq!(route_name("routes"), None);
        assert_eq!(route_name("routes/"), None);
        assert_eq!(route_name("routesx/web"), None);
        assert_eq!(route_name("routes/a/b"), None);
    }

    #[test]
    fn prefix_match_respects_segment_boundary() {
        assert!(under_prefix("routes/a", "routes"));
        assert!(under_prefix("/routes/a", "/routes/"));
        assert!(!under_prefix("routes2/a", "routes"));
    }
}
