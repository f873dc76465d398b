use async_trait::async_trait;
use faculty_portal::{Backend, BackendError, Filter, MemoryBackend, Portal, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Memory backend whose value upserts can be switched to fail.
#[allow(dead_code)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    pub fail_upserts: AtomicBool,
}

#[allow(dead_code)]
impl FlakyBackend {
    pub fn new() -> Self {
        FlakyBackend {
            inner: MemoryBackend::new(),
            fail_upserts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, BackendError> {
        self.inner.select(table, filter).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        self.inner.insert(table, rows).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<usize, BackendError> {
        self.inner.update(table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, BackendError> {
        self.inner.delete(table, filter).await
    }

    async fn upsert(&self, table: &str, conflict: &[&str], row: Row) -> Result<Row, BackendError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        self.inner.upsert(table, conflict, row).await
    }

    async fn upload_file(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String, BackendError> {
        self.inner.upload_file(bucket, path, bytes).await
    }
}

#[allow(dead_code)]
pub fn memory_portal() -> (Arc<MemoryBackend>, Portal) {
    let backend = Arc::new(MemoryBackend::new());
    let portal = Portal::new(backend.clone(), Duration::from_secs(2), "attachments");
    (backend, portal)
}

pub fn project_fields(group: &str, title: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Group No".to_string(), group.to_string()),
        ("Title".to_string(), title.to_string()),
    ])
}
