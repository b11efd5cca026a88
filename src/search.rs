//! Search results and the backends a peer answers queries from.
//!
//! [`SearchResult`] is the structured value a `Query` resolves to. Peers produce
//! it through a [`SearchBackend`]: either the built-in [`LocalIndex`] or an
//! [`HttpBackend`] that proxies a local full-text search service exposing
//! `GET /search?q=<text>&format=json`.
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

impl Hit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
        }
    }
}

/// Body of a `Query` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub q: String,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with something other than JSON; carries the raw body.
    #[error("{0}")]
    NotJson(String),

    #[error("search backend returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Source of answers for incoming queries.
pub trait SearchBackend: Send + Sync {
    fn search(&self, text: &str) -> Result<SearchResult, SearchError>;
}

/// Demo index answering every query with a single local hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIndex;

impl SearchBackend for LocalIndex {
    fn search(&self, text: &str) -> Result<SearchResult, SearchError> {
        let q = text.trim();
        let hit = if q.is_empty() {
            Hit::new(
                "pure://local/",
                "PURE Search",
                "Type a query to search local content",
            )
        } else {
            Hit::new(
                format!("pure://local/{q}"),
                format!("Local result for {q}"),
                format!("This is a demo hit for '{q}'"),
            )
        };

        Ok(SearchResult { hits: vec![hit] })
    }
}

/// Response shape of the HTTP search service.
#[derive(Debug, Deserialize)]
struct BackendResponse {
    #[serde(default)]
    results: Vec<BackendHit>,
}

#[derive(Debug, Deserialize)]
struct BackendHit {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: Option<String>,
    /// Some aggregators name the snippet `content`.
    #[serde(default)]
    content: Option<String>,
}

impl From<BackendHit> for Hit {
    fn from(value: BackendHit) -> Self {
        Hit {
            url: value.url,
            title: value.title,
            snippet: value.snippet.or(value.content).unwrap_or_default(),
        }
    }
}

/// Parse an HTTP search response body into a [`SearchResult`].
pub fn parse_backend_body(body: &str) -> Result<SearchResult, SearchError> {
    let parsed: BackendResponse =
        serde_json::from_str(body).map_err(|_| SearchError::NotJson(body.to_string()))?;

    Ok(SearchResult {
        hits: parsed.results.into_iter().map(Hit::from).collect(),
    })
}

/// Proxies queries to an HTTP search service.
pub struct HttpBackend {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl SearchBackend for HttpBackend {
    fn search(&self, text: &str) -> Result<SearchResult, SearchError> {
        let url = format!("{}/search", self.base);
        debug!("forwarding query '{text}' to {url}");

        let response = self
            .client
            .get(&url)
            .query(&[("q", text), ("format", "json")])
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_backend_body(&body)
    }
}
