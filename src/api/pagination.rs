//! Offset pagination for collection responses.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Query parameters as received. Parsed by [`Page::from_query`] so that a
/// bad value is reported like any other validation error.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub page_size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Links {
    #[serde(rename = "self")]
    pub this: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Collection<T> {
    pub items: Vec<T>,
    pub links: Links,
}

fn parse_param(field: &str, raw: Option<&str>, default: usize, min: usize) -> Result<usize, ApiError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(value) if value >= min => Ok(value),
        _ => Err(ApiError::bad_request(
            "(query)",
            field,
            format!("'{raw}' is not an integer >= {min}"),
        )),
    }
}

impl Page {
    pub fn from_query(query: &PageQuery) -> Result<Self, ApiError> {
        Ok(Self {
            offset: parse_param("offset", query.offset.as_deref(), 0, 0)?,
            page_size: parse_param("page_size", query.page_size.as_deref(), DEFAULT_PAGE_SIZE, 1)?,
        })
    }

    fn link(base: &str, offset: usize, page_size: usize) -> String {
        format!("{base}?offset={offset}&page_size={page_size}")
    }

    /// Cut this page out of `items` and build the navigation links
    /// relative to `base`.
    #[must_use]
    pub fn slice<T>(self, items: Vec<T>, base: &str) -> Collection<T> {
        let total = items.len();
        let links = Links {
            this: Self::link(base, self.offset, self.page_size),
            prev: (self.offset > 0).then(|| {
                Self::link(base, self.offset.saturating_sub(self.page_size), self.page_size)
            }),
            next: (self.offset.saturating_add(self.page_size) < total).then(|| {
                Self::link(base, self.offset + self.page_size, self.page_size)
            }),
        };
        let items = items
            .into_iter()
            .skip(self.offset)
            .take(self.page_size)
            .collect();
        Collection { items, links }
    }
}
