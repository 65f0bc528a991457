//! Management API over the route store.
//!
//! Reads (`index`, `show`) are served from the local route table, so a
//! route written through [`create`] shows up once the synchronizer has
//! applied the change event. Writes go straight to the store.

pub mod pagination;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ApiError, ValidationError};
use crate::routes::validation::validate;
use crate::routes::RouteRecord;
use crate::server::ApiState;
use crate::store::route_key;

use pagination::{Collection, Page, PageQuery};

pub const ROUTE_KIND: &str = "gilliam#route";

const REQUIRED_FIELDS: [&str; 4] = ["name", "domain", "path", "target"];

/// JSON representation of a route.
#[derive(Debug, Serialize)]
pub struct RouteView {
    pub kind: &'static str,
    #[serde(flatten)]
    pub record: RouteRecord,
}

impl From<RouteRecord> for RouteView {
    fn from(record: RouteRecord) -> Self {
        Self {
            kind: ROUTE_KIND,
            record,
        }
    }
}

fn location(name: &str) -> String {
    format!("/route/{name}")
}

pub async fn index(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Collection<RouteView>>, ApiError> {
    let page = Page::from_query(&query)?;
    let views = state
        .table
        .index()
        .await
        .iter()
        .map(|route| RouteView::from(route.record().clone()))
        .collect();
    Ok(Json(page.slice(views, "/route")))
}

pub async fn show(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<RouteView>, ApiError> {
    let route = state.table.get(&name).await.ok_or(ApiError::NotFound)?;
    Ok(Json(route.record().clone().into()))
}

/// Parse a create payload. All four fields must be present; `domain` and
/// `path` may be `null`.
pub fn parse_create(body: &[u8]) -> Result<RouteRecord, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("(body)", "body", "request body is empty"));
    }
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request("(body)", "body", format!("invalid JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(ApiError::bad_request("(body)", "body", "expected a JSON object"));
    };

    let route = object
        .get("name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("(unnamed)")
        .to_string();
    let missing: Vec<_> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !object.contains_key(**field))
        .map(|field| ValidationError {
            route: route.clone(),
            field: (*field).to_string(),
            message: "field is required".into(),
            suggestion: None,
        })
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::BadRequest { errors: missing });
    }

    serde_json::from_value(value).map_err(|e| ApiError::bad_request(&route, "body", e.to_string()))
}

pub async fn create(State(state): State<Arc<ApiState>>, body: Bytes) -> Result<Response, ApiError> {
    let record = parse_create(&body)?;
    validate(&record).map_err(|errors| ApiError::BadRequest { errors })?;

    let value = record
        .to_json()
        .map_err(|e| ApiError::bad_request(&record.name, "body", e.to_string()))?;
    let index = state.store.set(&route_key(&record.name), &value).await?;
    tracing::info!(route = %record.name, index, "route stored");

    let location = location(&record.name);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(RouteView::from(record)),
    )
        .into_response())
}

pub async fn delete(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.table.get(&name).await.is_none() {
        return Err(ApiError::NotFound);
    }
    match state.store.delete(&route_key(&name)).await? {
        Some(index) => tracing::info!(route = %name, index, "route deleted"),
        None => tracing::debug!(route = %name, "route already gone from store"),
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_carries_kind_and_nullable_fields() {
        let view = RouteView::from(RouteRecord {
            name: "web".into(),
            domain: None,
            path: Some("/w".into()),
            target: "http://w/".into(),
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["kind"], "gilliam#route");
        assert_eq!(json["name"], "web");
        assert!(json["domain"].is_null());
        assert_eq!(json["path"], "/w");
    }

    #[test]
    fn create_payload_requires_every_field() {
        let err = parse_create(br#"{"name":"web","target":"http://w/"}"#).unwrap_err();
        let ApiError::BadRequest { errors } = err else {
            panic!("expected bad request");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["domain", "path"]);
    }

    #[test]
    fn create_payload_accepts_null_patterns() {
        let record =
            parse_create(br#"{"name":"web","domain":null,"path":null,"target":"http://w/"}"#)
                .unwrap();
        assert_eq!(record.domain, None);
        assert_eq!(record.path, None);
    }

    #[test]
    fn create_payload_rejects_garbage() {
        assert!(parse_create(b"").is_err());
        assert!(parse_create(b"not json").is_err());
        assert!(parse_create(b"[1,2]").is_err());
        assert!(parse_create(
            br#"{"name":"web","domain":null,"path":null,"target":"http://w/","extra":1}"#
        )
        .is_err());
    }
}
