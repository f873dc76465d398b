//! Storage collaborator boundary.
//!
//! The attribute subsystem talks to its backend-as-a-service through the
//! [`Backend`] trait: table-level select/insert/update/delete, an atomic
//! upsert keyed on caller-chosen conflict columns, and a file upload that
//! returns a public URL. [`StoreHandle`] wraps a backend with the request
//! deadline and converts collaborator failures into [`PortalError`]s.

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::error::{BackendError, PortalError, PortalResult};
use crate::saving;

/// One stored record, as a JSON object keyed by column name.
pub type Row = serde_json::Map<String, Json>;

/// Equality conjunction over row fields, with an optional ascending sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Json)>,
    pub order_by: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: &str, value: impl ToString) -> Self {
        self.conditions
            .push((field.to_string(), Json::String(value.to_string())));
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| row.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, BackendError>;

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError>;

    /// Merges `patch` into every matching row and returns how many changed.
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<usize, BackendError>;

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, BackendError>;

    /// Inserts `row`, or if a row with the same values in every `conflict`
    /// column exists, overwrites that row's other fields. Must be atomic: two
    /// racing upserts on one key never leave two rows.
    async fn upsert(&self, table: &str, conflict: &[&str], row: Row) -> Result<Row, BackendError>;

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError>;
}

/// A backend plus the deadline every call runs under.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        StoreHandle { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn select(
        &self,
        operation: &'static str,
        table: &str,
        filter: &Filter,
    ) -> PortalResult<Vec<Row>> {
        self.call(operation, table, self.backend.select(table, filter))
            .await
    }

    pub async fn insert(
        &self,
        operation: &'static str,
        table: &str,
        rows: Vec<Row>,
    ) -> PortalResult<Vec<Row>> {
        self.call(operation, table, self.backend.insert(table, rows))
            .await
    }

    pub async fn update(
        &self,
        operation: &'static str,
        table: &str,
        filter: &Filter,
        patch: Row,
    ) -> PortalResult<usize> {
        self.call(operation, table, self.backend.update(table, filter, patch))
            .await
    }

    pub async fn delete(
        &self,
        operation: &'static str,
        table: &str,
        filter: &Filter,
    ) -> PortalResult<usize> {
        self.call(operation, table, self.backend.delete(table, filter))
            .await
    }

    pub async fn upsert(
        &self,
        operation: &'static str,
        table: &str,
        conflict: &[&str],
        row: Row,
    ) -> PortalResult<Row> {
        self.call(operation, table, self.backend.upsert(table, conflict, row))
            .await
    }

    pub async fn upload_file(
        &self,
        operation: &'static str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> PortalResult<String> {
        self.call(operation, bucket, self.backend.upload_file(bucket, path, bytes))
            .await
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        target: &str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> PortalResult<T> {
        debug!("{} on {}", operation, target);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(PortalError::Store { operation, source }),
            Err(_) => Err(PortalError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}

pub fn to_row<T: Serialize>(value: &T) -> PortalResult<Row> {
    match serde_json::to_value(value) {
        Ok(Json::Object(row)) => Ok(row),
        Ok(_) => Err(PortalError::Store {
            operation: "encode",
            source: BackendError::Decode("record did not encode to an object".to_string()),
        }),
        Err(e) => Err(PortalError::Store {
            operation: "encode",
            source: BackendError::Decode(e.to_string()),
        }),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> PortalResult<T> {
    serde_json::from_value(Json::Object(row)).map_err(|e| PortalError::Store {
        operation: "decode",
        source: BackendError::Decode(e.to_string()),
    })
}

pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> PortalResult<Vec<T>> {
    rows.into_iter().map(from_row).collect()
}

/// All tables and uploaded files held by a [`MemoryBackend`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tables {
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Uploaded objects keyed by `bucket/path`.
    pub files: BTreeMap<String, Vec<u8>>,
}

/// In-process backend used by tests and local runs.
///
/// Every operation takes the table lock once, so `upsert` is atomic with
/// respect to other callers. When a snapshot path is set the whole state is
/// written through to disk after each mutation.
pub struct MemoryBackend {
    state: RwLock<Tables>,
    public_url_base: String,
    snapshot: Option<PathBuf>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: RwLock::new(Tables::default()),
            public_url_base: "memory://storage".to_string(),
            snapshot: None,
        }
    }

    /// Opens (or starts) a backend persisted at `path`.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let path = path.into();
        let tables = if path.exists() {
            saving::load_snapshot(&path).map_err(|e| BackendError::Io(e.to_string()))?
        } else {
            Tables::default()
        };
        Ok(MemoryBackend {
            state: RwLock::new(tables),
            public_url_base: "memory://storage".to_string(),
            snapshot: Some(path),
        })
    }

    pub fn with_public_url_base(mut self, base: impl Into<String>) -> Self {
        self.public_url_base = base.into();
        self
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.read()
            .map(|state| state.tables.get(table).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn file(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.read()
            .ok()
            .and_then(|state| state.files.get(&format!("{}/{}", bucket, path)).cloned())
    }

    pub fn snapshot(&self) -> Result<Tables, BackendError> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, BackendError> {
        self.state
            .read()
            .map_err(|_| BackendError::Io("table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, BackendError> {
        self.state
            .write()
            .map_err(|_| BackendError::Io("table lock poisoned".to_string()))
    }

    /// Runs `change` against the tables. With a snapshot configured the
    /// change is made on a copy that only replaces the live tables once it
    /// has been written out; a failed write leaves the live tables as they
    /// were. `change` reports whether it modified anything.
    fn commit<T>(&self, change: impl FnOnce(&mut Tables) -> (T, bool)) -> Result<T, BackendError> {
        let mut state = self.write()?;
        if self.snapshot.is_none() {
            return Ok(change(&mut *state).0);
        }
        let mut next = state.clone();
        let (out, dirty) = change(&mut next);
        if dirty {
            self.persist(&next)?;
            *state = next;
        }
        Ok(out)
    }

    fn persist(&self, tables: &Tables) -> Result<(), BackendError> {
        match &self.snapshot {
            Some(path) => {
                saving::save_snapshot(tables, path).map_err(|e| BackendError::Io(e.to_string()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, BackendError> {
        let state = self.read()?;
        let mut rows: Vec<Row> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(field) = &filter.order_by {
            // Stable, so rows with equal keys keep insertion order.
            rows.sort_by(|a, b| compare_json(a.get(field), b.get(field)));
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        self.commit(|tables| {
            tables
                .tables
                .entry(table.to_string())
                .or_default()
                .extend(rows.iter().cloned());
            (rows, true)
        })
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<usize, BackendError> {
        self.commit(|tables| {
            let mut changed = 0;
            if let Some(rows) = tables.tables.get_mut(table) {
                for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                    for (key, value) in &patch {
                        row.insert(key.clone(), value.clone());
                    }
                    changed += 1;
                }
            }
            (changed, changed > 0)
        })
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, BackendError> {
        self.commit(|tables| {
            let mut removed = 0;
            if let Some(rows) = tables.tables.get_mut(table) {
                let before = rows.len();
                rows.retain(|r| !filter.matches(r));
                removed = before - rows.len();
            }
            (removed, removed > 0)
        })
    }

    async fn upsert(&self, table: &str, conflict: &[&str], row: Row) -> Result<Row, BackendError> {
        if conflict.is_empty() {
            return Err(BackendError::Rejected {
                status: 400,
                message: "upsert needs at least one conflict column".to_string(),
            });
        }
        self.commit(|tables| {
            let rows = tables.tables.entry(table.to_string()).or_default();
            let existing = rows
                .iter_mut()
                .find(|r| conflict.iter().all(|key| r.get(*key) == row.get(*key)));

            let stored = match existing {
                Some(current) => {
                    for (key, value) in row {
                        if key != "id" && key != "created_at" {
                            current.insert(key, value);
                        }
                    }
                    current.clone()
                }
                None => {
                    rows.push(row.clone());
                    row
                }
            };
            (stored, true)
        })
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        self.commit(|tables| {
            tables.files.insert(format!("{}/{}", bucket, path), bytes);
            ((), true)
        })?;
        Ok(format!(
            "{}/{}/{}",
            self.public_url_base.trim_end_matches('/'),
            bucket,
            path
        ))
    }
}

fn compare_json(a: Option<&Json>, b: Option<&Json>) -> Ordering {
    match (a, b) {
        (Some(Json::String(x)), Some(Json::String(y))) => {
            // Timestamps carry a variable number of fractional digits, so
            // compare them as instants rather than as text.
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(Json::Number(x)), Some(Json::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
