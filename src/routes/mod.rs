//! Route records, their compiled matchers, and the replicated route table.
//!
//! A [`RouteRecord`] is the stored rule (`name`, optional `domain` and
//! `path` patterns, `target` template). A [`Route`] is a record with its
//! patterns compiled; it is what the [`table::RouteTable`] holds and what
//! the proxy matches against. Submodules provide the pattern language
//! ([`pattern`]), target templates ([`template`]), the table
//! ([`table`]), the change-feed synchronizer ([`sync`]) and input
//! validation for the management API ([`validation`]).

pub mod pattern;
pub mod sync;
pub mod table;
pub mod template;
pub mod validation;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{RecordError, TemplateError};
use pattern::{Captures, Pattern};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouteRecord {
    pub name: String,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    pub target: String,
}

/// A partial record as found in a store value. Absent fields leave the
/// current value untouched; an explicit `null` clears `domain`/`path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "present")]
    pub domain: Option<Option<String>>,

    #[serde(default, deserialize_with = "present")]
    pub path: Option<Option<String>>,

    #[serde(default)]
    pub target: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl RouteUpdate {
    pub fn from_json(value: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(value)?)
    }
}

impl RouteRecord {
    /// Build a new record named `name` from an update. The key's name
    /// wins over any `name` in the payload.
    pub fn create(name: &str, update: RouteUpdate) -> Result<Self, RecordError> {
        if let Some(ref declared) = update.name {
            if declared != name {
                tracing::warn!(
                    route = %name,
                    declared = %declared,
                    "route value names a different route, using the key"
                );
            }
        }
        let target = update.target.ok_or_else(|| RecordError::MissingTarget {
            name: name.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            domain: update.domain.flatten(),
            path: update.path.flatten(),
            target,
        })
    }

    /// Field-wise merge: only fields present in `update` change.
    #[must_use]
    pub fn merged(&self, update: RouteUpdate) -> Self {
        Self {
            name: self.name.clone(),
            domain: update.domain.unwrap_or_else(|| self.domain.clone()),
            path: update.path.unwrap_or_else(|| self.path.clone()),
            target: update.target.unwrap_or_else(|| self.target.clone()),
        }
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The host and path a request is matched on.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    /// Hostname without port, if the request carried one.
    pub host: Option<&'a str>,
    pub path: &'a str,
}

/// A route record with its patterns compiled.
#[derive(Debug, Clone)]
pub struct Route {
    record: RouteRecord,
    domain: Option<Pattern>,
    path: Option<Pattern>,
}

impl Route {
    pub fn compile(record: RouteRecord) -> Result<Self, RecordError> {
        let domain = record
            .domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(Pattern::host)
            .transpose()
            .map_err(|source| RecordError::Pattern {
                field: "domain",
                source,
            })?;
        let path = record
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Pattern::path)
            .transpose()
            .map_err(|source| RecordError::Pattern {
                field: "path",
                source,
            })?;
        Ok(Self {
            record,
            domain,
            path,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    #[must_use]
    pub const fn record(&self) -> &RouteRecord {
        &self.record
    }

    /// Match the request against this route's patterns. Unset patterns
    /// match everything; path captures win over domain captures.
    #[must_use]
    pub fn captures(&self, input: MatchInput<'_>) -> Option<Captures> {
        let mut captures = match &self.domain {
            Some(domain) => domain.captures(input.host?)?,
            None => Captures::new(),
        };
        if let Some(path) = &self.path {
            captures.extend(path.captures(input.path)?);
        }
        Some(captures)
    }

    pub fn render_target(&self, captures: &Captures) -> Result<String, TemplateError> {
        template::render(&self.record.target, captures)
    }
}

/// Strip the port from a `Host` value. Handles bracketed IPv6 literals.
#[must_use]
pub fn host_without_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(addr, _)| addr);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
