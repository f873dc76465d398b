//! Joins column definitions with stored values and owns the write path.
//!
//! [`AttributeResolver`] is the one place the UI and API layers go through:
//! it reads the display-ready attribute list for an entity and mediates
//! every create/update/delete so that cascade cleanup always happens in the
//! order that never leaves orphaned value rows behind.

use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::column::{Column, ColumnRegistry, ColumnType};
use crate::entity::{EntityRecord, EntityStore};
use crate::error::{PortalError, PortalResult};
use crate::family::EntityFamily;
use crate::store::{Backend, StoreHandle};
use crate::value::{Value, ValueStore, newest};

lazy_static! {
    static ref UNSAFE_PATH_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
}

/// One column of an entity together with its value, if any was ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAttribute {
    pub column: Column,
    pub value: Option<Value>,
}

impl ResolvedAttribute {
    /// The display text; blank when no value exists.
    pub fn text(&self) -> &str {
        self.value.as_ref().map(Value::text).unwrap_or("")
    }
}

/// Entry point holding the shared backend handle; hands out per-family resolvers.
#[derive(Clone)]
pub struct Portal {
    store: StoreHandle,
    bucket: String,
}

impl Portal {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration, bucket: impl Into<String>) -> Self {
        Portal {
            store: StoreHandle::new(backend, timeout),
            bucket: bucket.into(),
        }
    }

    pub fn resolver(&self, family: EntityFamily) -> AttributeResolver {
        AttributeResolver::new(self.store.clone(), family, self.bucket.clone())
    }
}

#[derive(Clone)]
pub struct AttributeResolver {
    family: EntityFamily,
    store: StoreHandle,
    bucket: String,
    registry: ColumnRegistry,
    values: ValueStore,
    entities: EntityStore,
}

impl AttributeResolver {
    pub fn new(store: StoreHandle, family: EntityFamily, bucket: String) -> Self {
        AttributeResolver {
            family,
            registry: ColumnRegistry::new(store.clone(), family),
            values: ValueStore::new(store.clone(), family),
            entities: EntityStore::new(store.clone(), family),
            store,
            bucket,
        }
    }

    pub fn family(&self) -> EntityFamily {
        self.family
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// Every registered column of the family, in creation order, paired with
    /// this entity's value. Columns without a value come back blank.
    pub async fn resolve_attributes(&self, entity_id: Uuid) -> PortalResult<Vec<ResolvedAttribute>> {
        let columns = self.registry.list_columns().await?;
        self.resolve_with(&columns, entity_id).await
    }

    /// Same as [`resolve_attributes`](Self::resolve_attributes) against an
    /// already-fetched column list, for callers resolving many entities.
    pub async fn resolve_with(
        &self,
        columns: &[Column],
        entity_id: Uuid,
    ) -> PortalResult<Vec<ResolvedAttribute>> {
        // Rows left by older read-then-write clients may be duplicated.
        let mut by_column: HashMap<Uuid, Vec<Value>> = HashMap::new();
        for value in self.values.values_for_entity(entity_id).await? {
            by_column.entry(value.column_id).or_default().push(value);
        }

        Ok(columns
            .iter()
            .map(|column| ResolvedAttribute {
                column: column.clone(),
                value: by_column.remove(&column.id).and_then(newest),
            })
            .collect())
    }

    /// Stores `value` for the pair once both the column and the entity are
    /// confirmed to still exist.
    pub async fn set_attribute(
        &self,
        entity_id: Uuid,
        column_id: Uuid,
        value: &str,
    ) -> PortalResult<Value> {
        let column = self.registry.get_column(column_id).await?;
        self.set_column_value(entity_id, &column, value).await
    }

    /// [`set_attribute`](Self::set_attribute) for a caller that has just
    /// loaded `column`; only the entity is looked up again.
    pub async fn set_column_value(
        &self,
        entity_id: Uuid,
        column: &Column,
        value: &str,
    ) -> PortalResult<Value> {
        self.entities.get(entity_id).await?;
        self.values.upsert_value(entity_id, column.id, value).await
    }

    /// Uploads a file for a `pdf` column and stores its public URL as the value.
    pub async fn attach_file(
        &self,
        entity_id: Uuid,
        column_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PortalResult<Value> {
        let column = self.registry.get_column(column_id).await?;
        if column.column_type != ColumnType::Pdf {
            return Err(PortalError::validation(format!(
                "Column '{}' is a {} column and does not take files",
                column.name, column.column_type
            )));
        }
        if bytes.is_empty() {
            return Err(PortalError::validation("Uploaded file is empty"));
        }
        self.entities.get(entity_id).await?;

        let path = storage_path(self.family, entity_id, column_id, file_name);
        let url = self
            .store
            .upload_file("attach_file", &self.bucket, &path, bytes)
            .await?;
        info!("uploaded {} for {} {}", path, self.family, entity_id);
        self.values.upsert_value(entity_id, column_id, &url).await
    }

    pub async fn create_column(&self, name: &str, column_type: ColumnType) -> PortalResult<Column> {
        self.registry.create_column(name, column_type).await
    }

    pub async fn delete_column(&self, column_id: Uuid) -> PortalResult<()> {
        self.registry.delete_column(column_id).await
    }

    pub async fn create_entity(&self, fields: BTreeMap<String, String>) -> PortalResult<EntityRecord> {
        self.entities.create(fields).await
    }

    pub async fn delete_entity(&self, entity_id: Uuid) -> PortalResult<()> {
        self.entities.delete(entity_id).await
    }
}

fn storage_path(family: EntityFamily, entity_id: Uuid, column_id: Uuid, file_name: &str) -> String {
    let cleaned = UNSAFE_PATH_CHARS.replace_all(file_name.trim(), "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    let name = if cleaned.is_empty() { "upload.pdf" } else { cleaned };
    format!("{}/{}/{}/{}", family, entity_id, column_id, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::store::{Filter, MemoryBackend, Row};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn portal() -> (Arc<MemoryBackend>, Portal) {
        let backend = Arc::new(MemoryBackend::new().with_public_url_base("https://cdn.test"));
        let portal = Portal::new(backend.clone(), Duration::from_secs(1), "attachments");
        (backend, portal)
    }

    fn project(title: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("Title".to_string(), title.to_string())])
    }

    #[test]
    fn storage_paths_are_sanitised() {
        let (e, c) = (Uuid::nil(), Uuid::nil());
        let path = storage_path(EntityFamily::Project, e, c, "../Final Report (v2).pdf");
        assert!(path.ends_with("/Final_Report_v2_.pdf"));
        assert!(!path.contains(".."));
        assert!(storage_path(EntityFamily::Project, e, c, "///").ends_with("/upload.pdf"));
    }

    #[tokio::test]
    async fn setting_value_for_deleted_column_is_not_found() {
        let (_, portal) = portal();
        let resolver = portal.resolver(EntityFamily::Project);
        let entity = resolver.create_entity(project("Drone")).await.unwrap();
        let column = resolver.create_column("Status", ColumnType::Text).await.unwrap();
        resolver.delete_column(column.id).await.unwrap();

        let err = resolver
            .set_attribute(entity.id, column.id, "Ongoing")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound { kind: "column", .. }));
    }

    #[tokio::test]
    async fn families_do_not_share_columns() {
        let (_, portal) = portal();
        let projects = portal.resolver(EntityFamily::Project);
        let internships = portal.resolver(EntityFamily::Internship);
        projects.create_column("Status", ColumnType::Text).await.unwrap();

        let intern = internships
            .create_entity(BTreeMap::from([("Student".to_string(), "Asha".to_string())]))
            .await
            .unwrap();
        assert!(internships.resolve_attributes(intern.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn files_only_attach_to_pdf_columns() {
        let (backend, portal) = portal();
        let resolver = portal.resolver(EntityFamily::Project);
        let entity = resolver.create_entity(project("Drone")).await.unwrap();
        let notes = resolver.create_column("Notes", ColumnType::Text).await.unwrap();
        let report = resolver.create_column("Report", ColumnType::Pdf).await.unwrap();

        let err = resolver
            .attach_file(entity.id, notes.id, "a.pdf", b"%PDF".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));

        let value = resolver
            .attach_file(entity.id, report.id, "final.pdf", b"%PDF".to_vec())
            .await
            .unwrap();
        let url = value.text().to_string();
        assert!(url.starts_with("https://cdn.test/attachments/project/"));
        assert!(url.ends_with("/final.pdf"));

        let path = url.trim_start_matches("https://cdn.test/attachments/");
        assert_eq!(backend.file("attachments", path), Some(b"%PDF".to_vec()));
    }

    /// Memory backend that counts selects against the project column table.
    struct CountingBackend {
        inner: MemoryBackend,
        column_reads: AtomicUsize,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, BackendError> {
            if table == "project_columns" {
                self.column_reads.fetch_add(1, AtomicOrdering::SeqCst);
            }
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
            self.inner.upsert(table, conflict, row).await
        }
        async fn upload_file(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String, BackendError> {
            self.inner.upload_file(bucket, path, bytes).await
        }
    }

    #[tokio::test]
    async fn loaded_column_is_not_fetched_again() {
        let backend = Arc::new(CountingBackend {
            inner: MemoryBackend::new(),
            column_reads: AtomicUsize::new(0),
        });
        let portal = Portal::new(backend.clone(), Duration::from_secs(1), "attachments");
        let resolver = portal.resolver(EntityFamily::Project);
        let entity = resolver.create_entity(project("Drone")).await.unwrap();
        let column = resolver.create_column("Status", ColumnType::Text).await.unwrap();

        let column = resolver.registry().get_column(column.id).await.unwrap();
        let before = backend.column_reads.load(AtomicOrdering::SeqCst);
        resolver.set_column_value(entity.id, &column, "Ongoing").await.unwrap();
        assert_eq!(backend.column_reads.load(AtomicOrdering::SeqCst), before);

        let attributes = resolver.resolve_attributes(entity.id).await.unwrap();
        assert_eq!(attributes[0].text(), "Ongoing");
    }

    #[tokio::test]
    async fn duplicate_values_resolve_like_get_value() {
        let (backend, portal) = portal();
        let resolver = portal.resolver(EntityFamily::Project);
        let entity = resolver.create_entity(project("Drone")).await.unwrap();
        let column = resolver.create_column("Status", ColumnType::Text).await.unwrap();

        let older = resolver.set_attribute(entity.id, column.id, "Draft").await.unwrap();
        let mut newer = older.clone();
        newer.id = Uuid::new_v4();
        newer.value = Some("Final".to_string());
        newer.updated_at = older.updated_at + chrono::Duration::seconds(1);
        backend
            .insert("project_column_values", vec![crate::store::to_row(&newer).unwrap()])
            .await
            .unwrap();

        let attributes = resolver.resolve_attributes(entity.id).await.unwrap();
        let stored = resolver.values().get_value(entity.id, column.id).await.unwrap();
        assert_eq!(attributes[0].text(), "Final");
        assert_eq!(stored.as_ref().map(Value::text), Some("Final"));
    }

    #[tokio::test]
    async fn deleting_entity_clears_its_values() {
        let (backend, portal) = portal();
        let resolver = portal.resolver(EntityFamily::Project);
        let entity = resolver.create_entity(project("Drone")).await.unwrap();
        let column = resolver.create_column("Status", ColumnType::Text).await.unwrap();
        resolver.set_attribute(entity.id, column.id, "Done").await.unwrap();

        resolver.delete_entity(entity.id).await.unwrap();
        assert_eq!(backend.row_count("project_column_values"), 0);
        assert!(resolver.values().values_for_column(column.id).await.unwrap().is_empty());
    }
}
