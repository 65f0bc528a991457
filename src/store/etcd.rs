//! etcd v2 keys API client.
//!
//! [`EtcdStore`] implements [`StoreClient`] over plain HTTP with the
//! pooled hyper client. Listings are recursive `GET`s whose fencing index
//! comes from the `X-Etcd-Index` response header; watches are long-poll
//! `GET`s with `wait=true&waitIndex=<n>` bounded by a client-side
//! timeout. Error code 401 ("event index cleared") is surfaced as
//! [`StoreError::IndexCleared`] so the caller can re-snapshot.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use url::Url;

use super::{Action, Event, KeyValue, Listing, StoreClient};
use crate::error::StoreError;

const ETCD_INDEX_HEADER: &str = "x-etcd-index";
const ERROR_KEY_NOT_FOUND: u32 = 100;
const ERROR_EVENT_INDEX_CLEARED: u32 = 401;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type StoreHttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Debug, Deserialize)]
struct NodeResponse {
    action: String,
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    modified_index: u64,
    #[serde(default)]
    created_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: u64,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

pub struct EtcdStore {
    client: StoreHttpClient,
    base: Url,
}

impl EtcdStore {
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(HttpConnector::new());
        Self { client, base }
    }

    fn keys_url(&self, key: &str) -> Result<Url, StoreError> {
        self.base
            .join(&format!("v2/keys/{}", key.trim_start_matches('/')))
            .map_err(|e| StoreError::Protocol(format!("cannot build key URL: {e}")))
    }

    async fn exchange(
        &self,
        method: Method,
        url: &Url,
        body: Option<String>,
    ) -> Result<RawResponse, StoreError> {
        let mut builder = Request::builder().method(method).uri(url.as_str());
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        }
        let req = builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| StoreError::Protocol(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| StoreError::Unavailable {
                source: Box::new(e),
            })?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| StoreError::Unavailable {
                source: Box::new(e),
            })?
            .to_bytes();
        Ok(RawResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<String>,
    ) -> Result<RawResponse, StoreError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.exchange(method, url, body))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable {
                    source: format!("request to {url} timed out after {REQUEST_TIMEOUT:?}")
                        .into(),
                })
            })
    }
}

fn etcd_index(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(ETCD_INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_error(raw: &RawResponse) -> Option<ErrorResponse> {
    serde_json::from_slice(&raw.body).ok()
}

fn status_error(raw: &RawResponse) -> StoreError {
    let message = parse_error(raw).map_or_else(
        || String::from_utf8_lossy(&raw.body).into_owned(),
        |e| match e.cause {
            Some(cause) => format!("{} ({cause})", e.message),
            None => e.message,
        },
    );
    StoreError::Status {
        status: raw.status.as_u16(),
        message,
    }
}

fn parse_node(raw: &RawResponse) -> Result<NodeResponse, StoreError> {
    serde_json::from_slice(&raw.body)
        .map_err(|e| StoreError::Protocol(format!("cannot decode node response: {e}")))
}

fn collect_leaves(node: Node, out: &mut Vec<(u64, KeyValue)>) {
    if node.dir {
        for child in node.nodes {
            collect_leaves(child, out);
        }
    } else if let Some(value) = node.value {
        out.push((
            node.created_index,
            KeyValue {
                key: node.key.trim_start_matches('/').to_string(),
                value,
            },
        ));
    }
}

fn action_from_etcd(action: &str) -> Option<Action> {
    match action {
        "set" | "create" | "update" | "compareAndSwap" => Some(Action::Set),
        "delete" | "expire" | "compareAndDelete" => Some(Action::Delete),
        _ => None,
    }
}

#[async_trait]
impl StoreClient for EtcdStore {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Listing, StoreError> {
        let mut url = self.keys_url(prefix)?;
        url.query_pairs_mut().append_pair("recursive", "true");
        let raw = self.send(Method::GET, &url, None).await?;

        if raw.status == StatusCode::NOT_FOUND {
            if let Some(err) = parse_error(&raw) {
                if err.error_code == ERROR_KEY_NOT_FOUND {
                    let index = etcd_index(&raw.headers).unwrap_or(err.index);
                    return Ok(Listing {
                        entries: Vec::new(),
                        index,
                    });
                }
            }
        }
        if !raw.status.is_success() {
            return Err(status_error(&raw));
        }

        let index = etcd_index(&raw.headers).ok_or_else(|| {
            StoreError::Protocol(format!("listing response lacks {ETCD_INDEX_HEADER} header"))
        })?;
        let mut leaves = Vec::new();
        collect_leaves(parse_node(&raw)?.node, &mut leaves);
        leaves.sort_by_key(|(created, _)| *created);

        Ok(Listing {
            entries: leaves.into_iter().map(|(_, kv)| kv).collect(),
            index,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let url = self.keys_url(key)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("value", value)
            .finish();
        let raw = self.send(Method::PUT, &url, Some(body)).await?;
        if !raw.status.is_success() {
            return Err(status_error(&raw));
        }
        Ok(parse_node(&raw)?.node.modified_index)
    }

    async fn delete(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let url = self.keys_url(key)?;
        let raw = self.send(Method::DELETE, &url, None).await?;
        if raw.status == StatusCode::NOT_FOUND
            && parse_error(&raw).is_some_and(|e| e.error_code == ERROR_KEY_NOT_FOUND)
        {
            return Ok(None);
        }
        if !raw.status.is_success() {
            return Err(status_error(&raw));
        }
        Ok(Some(parse_node(&raw)?.node.modified_index))
    }

    async fn watch(
        &self,
        prefix: &str,
        index: Option<u64>,
        timeout: Duration,
    ) -> Result<Option<Event>, StoreError> {
        let mut url = self.keys_url(prefix)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wait", "true").append_pair("recursive", "true");
            if let Some(index) = index {
                query.append_pair("waitIndex", &index.to_string());
            }
        }

        // A long poll that runs out is the caller's tick, not a failure.
        let Ok(raw) = tokio::time::timeout(timeout, self.exchange(Method::GET, &url, None)).await
        else {
            return Ok(None);
        };
        let raw = raw?;

        if !raw.status.is_success() {
            if let Some(err) = parse_error(&raw) {
                if err.error_code == ERROR_EVENT_INDEX_CLEARED {
                    return Err(StoreError::IndexCleared {
                        requested: index.unwrap_or_default(),
                        current: err.index,
                    });
                }
            }
            return Err(status_error(&raw));
        }
        // etcd closes idle long polls with an empty 200 body.
        if raw.body.is_empty() {
            return Ok(None);
        }

        let response = parse_node(&raw)?;
        let Some(action) = action_from_etcd(&response.action) else {
            return Err(StoreError::Protocol(format!(
                "unknown watch action '{}'",
                response.action
            )));
        };
        Ok(Some(Event {
            action,
            key: response.node.key.trim_start_matches('/').to_string(),
            value: match action {
                Action::Set => response.node.value,
                Action::Delete => None,
            },
            index: response.node.modified_index,
        }))
    }
}
