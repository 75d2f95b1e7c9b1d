// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Remote store abstraction.
//!
//! Provides a trait-based boundary to the hosted database that enables:
//! - A PostgREST-style HTTP client for production
//! - An in-memory store for tests and offline demos

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use tm_core::config::RemoteConfig;

/// Error type for remote store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached or answered with a server error.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The remote refused the request (validation or constraint failure).
    #[error("remote rejected request: {0}")]
    Rejected(String),

    /// An update targeted a natural key the remote does not have.
    #[error("remote has no {table} row with key {key}")]
    NotFound { table: String, key: String },
}

impl RemoteError {
    /// True for failures worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Hosted table-per-collection store addressed by natural key.
pub trait RemoteStore: Send + Sync {
    /// Inserts `row` unless a row with the same `key_column` value exists.
    ///
    /// An existing row is left untouched and counts as success.
    fn upsert_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        row: Value,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>>;

    /// Applies `patch` to the row whose `key_column` equals `key`.
    fn update_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>>;

    /// Every row of a table, ordered by `order_by` descending.
    fn list_all(
        &self,
        table: &str,
        order_by: &str,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<Vec<Value>>> + Send + '_>>;
}

/// PostgREST-style client (`/rest/v1/{table}`).
pub struct RestRemoteStore {
    client: Client,
    base: Url,
    api_key: String,
}

impl RestRemoteStore {
    /// Builds a client with the configured timeout.
    pub fn new(config: &RemoteConfig) -> crate::Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| crate::Error::InvalidInput(format!("remote url: {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(RestRemoteStore {
            client,
            base,
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> RemoteResult<Url> {
        self.base
            .join(&format!("rest/v1/{table}"))
            .map_err(|e| RemoteError::Rejected(format!("bad table url: {e}")))
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
    }
}

impl RemoteStore for RestRemoteStore {
    fn upsert_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        row: Value,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>> {
        let url = self.table_url(table).map(|mut url| {
            url.query_pairs_mut().append_pair("on_conflict", key_column);
            url
        });
        Box::pin(async move {
            let response = self
                .authorized(self.client.post(url?))
                .header("Prefer", "resolution=ignore-duplicates")
                .json(&row)
                .send()
                .await
                .map_err(map_transport_error)?;
            check_status(response).await?;
            Ok(())
        })
    }

    fn update_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>> {
        let url = self.table_url(table).map(|mut url| {
            url.query_pairs_mut()
                .append_pair(key_column, &format!("eq.{key}"));
            url
        });
        let (table, key) = (table.to_string(), key.to_string());
        Box::pin(async move {
            let response = self
                .authorized(self.client.patch(url?))
                .header("Prefer", "return=representation")
                .json(&patch)
                .send()
                .await
                .map_err(map_transport_error)?;
            let body = check_status(response).await?;
            updated_rows(&body, table, key)
        })
    }

    fn list_all(
        &self,
        table: &str,
        order_by: &str,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<Vec<Value>>> + Send + '_>> {
        let url = self.table_url(table).map(|mut url| {
            url.query_pairs_mut()
                .append_pair("select", "*")
                .append_pair("order", &format!("{order_by}.desc"));
            url
        });
        Box::pin(async move {
            let response = self
                .authorized(self.client.get(url?))
                .send()
                .await
                .map_err(map_transport_error)?;
            let body = check_status(response).await?;
            serde_json::from_slice(&body)
                .map_err(|e| RemoteError::Rejected(format!("invalid list response: {e}")))
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Unreachable(e.to_string())
}

/// Maps non-2xx responses: server-side and throttling statuses are
/// transient, anything else is a rejection.
async fn check_status(response: reqwest::Response) -> RemoteResult<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await.map_err(map_transport_error)?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    let detail = format!("{status}: {}", String::from_utf8_lossy(&body));
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(RemoteError::Unreachable(detail))
    } else {
        Err(RemoteError::Rejected(detail))
    }
}

/// In-process remote store.
///
/// Clones share state, so a test can keep a handle to flip reachability or
/// inspect rows while a context owns another.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    offline: bool,
    tables: HashMap<String, Vec<Map<String, Value>>>,
    rejected_keys: HashSet<String>,
    next_id: i64,
    upserts: usize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().offline = !reachable;
    }

    /// Makes every write touching `key` fail with [`RemoteError::Rejected`].
    pub fn reject_key(&self, key: &str) {
        self.state().rejected_keys.insert(key.to_string());
    }

    pub fn accept_key(&self, key: &str) {
        self.state().rejected_keys.remove(key);
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Upsert calls that reached the store, including ignored duplicates.
    pub fn upsert_calls(&self) -> usize {
        self.state().upserts
    }

    fn check(state: &MemoryState, key: &str) -> RemoteResult<()> {
        if state.offline {
            return Err(RemoteError::Unreachable("remote offline".into()));
        }
        if state.rejected_keys.contains(key) {
            return Err(RemoteError::Rejected(format!("constraint violation on {key}")));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn upsert_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        row: Value,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>> {
        let (table, key_column) = (table.to_string(), key_column.to_string());
        Box::pin(async move {
            let Value::Object(mut row) = row else {
                return Err(RemoteError::Rejected("row must be a JSON object".into()));
            };
            let key = row
                .get(&key_column)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RemoteError::Rejected(format!("missing {key_column}")))?;

            let mut state = self.state();
            Self::check(&state, &key)?;
            state.upserts += 1;
            state.next_id += 1;
            let id = state.next_id;
            let rows = state.tables.entry(table).or_default();
            if rows
                .iter()
                .any(|r| r.get(&key_column).and_then(Value::as_str) == Some(key.as_str()))
            {
                return Ok(());
            }
            row.insert("id".into(), Value::from(id));
            rows.push(row);
            Ok(())
        })
    }

    fn update_by_natural_key(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<()>> + Send + '_>> {
        let (table, key_column, key) = (table.to_string(), key_column.to_string(), key.to_string());
        Box::pin(async move {
            let mut state = self.state();
            Self::check(&state, &key)?;
            let row = state
                .tables
                .get_mut(&table)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|r| r.get(&key_column).and_then(Value::as_str) == Some(key.as_str()))
                })
                .ok_or_else(|| RemoteError::NotFound {
                    table: table.clone(),
                    key: key.clone(),
                })?;
            row.extend(patch);
            Ok(())
        })
    }

    fn list_all(
        &self,
        table: &str,
        order_by: &str,
    ) -> Pin<Box<dyn Future<Output = RemoteResult<Vec<Value>>> + Send + '_>> {
        let (table, order_by) = (table.to_string(), order_by.to_string());
        Box::pin(async move {
            if self.state().offline {
                return Err(RemoteError::Unreachable("remote offline".into()));
            }
            let mut rows = self.rows(&table);
            rows.sort_by(|a, b| compare_column(b.get(&order_by), a.get(&order_by)));
            Ok(rows)
        })
    }
}

/// Checks a `return=representation` PATCH body: an empty array means no row
/// had the key. A body that does not parse says nothing about the row.
fn updated_rows(body: &[u8], table: String, key: String) -> RemoteResult<()> {
    let updated: Vec<Value> = serde_json::from_slice(body).map_err(|e| {
        RemoteError::Unreachable(format!("unreadable update response for {table} {key}: {e}"))
    })?;
    if updated.is_empty() {
        return Err(RemoteError::NotFound { table, key });
    }
    Ok(())
}

/// Orders column values: numbers numerically, strings lexically, missing
/// values first.
fn compare_column(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or_default()
                .total_cmp(&y.as_f64().unwrap_or_default()),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        // Mixed kinds fall back to their JSON text.
        _ => a.map(Value::to_string).cmp(&b.map(Value::to_string)),
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
