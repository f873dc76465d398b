use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PortalResult;
use crate::family::EntityFamily;
use crate::store::{Filter, StoreHandle, from_row, from_rows, to_row};

const PAIR_KEY: &[&str] = &["column_id", "entity_id"];

/// Stored content of one column for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub id: Uuid,
    pub column_id: Uuid,
    pub entity_id: Uuid,
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Value {
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// Latest of several values for one pair; on equal timestamps the later row wins.
pub(crate) fn newest(values: impl IntoIterator<Item = Value>) -> Option<Value> {
    values.into_iter().max_by_key(|v| v.updated_at)
}

/// One value row per (entity, column) pair of a family.
#[derive(Clone)]
pub struct ValueStore {
    store: StoreHandle,
    family: EntityFamily,
}

impl ValueStore {
    pub fn new(store: StoreHandle, family: EntityFamily) -> Self {
        ValueStore { store, family }
    }

    /// The stored value for the pair. Should duplicate rows exist, the most
    /// recently updated one is returned.
    pub async fn get_value(&self, entity_id: Uuid, column_id: Uuid) -> PortalResult<Option<Value>> {
        let filter = Filter::all()
            .eq("column_id", column_id)
            .eq("entity_id", entity_id);
        let rows = self
            .store
            .select("get_value", self.family.values_table(), &filter)
            .await?;
        let values: Vec<Value> = from_rows(rows)?;
        Ok(newest(values))
    }

    /// Writes `value` for the pair in a single backend upsert keyed on
    /// `(column_id, entity_id)`, so there is never a window where two rows
    /// for the pair can both be inserted.
    pub async fn upsert_value(
        &self,
        entity_id: Uuid,
        column_id: Uuid,
        value: &str,
    ) -> PortalResult<Value> {
        let now = Utc::now();
        let candidate = Value {
            id: Uuid::new_v4(),
            column_id,
            entity_id,
            value: Some(value.to_string()),
            created_at: now,
            updated_at: now,
        };
        let stored = self
            .store
            .upsert(
                "upsert_value",
                self.family.values_table(),
                PAIR_KEY,
                to_row(&candidate)?,
            )
            .await?;
        from_row(stored)
    }

    pub async fn values_for_entity(&self, entity_id: Uuid) -> PortalResult<Vec<Value>> {
        let rows = self
            .store
            .select(
                "values_for_entity",
                self.family.values_table(),
                &Filter::all().eq("entity_id", entity_id),
            )
            .await?;
        from_rows(rows)
    }

    pub async fn values_for_column(&self, column_id: Uuid) -> PortalResult<Vec<Value>> {
        let rows = self
            .store
            .select(
                "values_for_column",
                self.family.values_table(),
                &Filter::all().eq("column_id", column_id),
            )
            .await?;
        from_rows(rows)
    }

    pub async fn delete_values_for_column(&self, column_id: Uuid) -> PortalResult<usize> {
        self.store
            .delete(
                "delete_values_for_column",
                self.family.values_table(),
                &Filter::all().eq("column_id", column_id),
            )
            .await
    }

    pub async fn delete_values_for_entity(&self, entity_id: Uuid) -> PortalResult<usize> {
        self.store
            .delete(
                "delete_values_for_entity",
                self.family.values_table(),
                &Filter::all().eq("entity_id", entity_id),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Backend, MemoryBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> (Arc<MemoryBackend>, ValueStore) {
        let backend = Arc::new(MemoryBackend::new());
        let handle = StoreHandle::new(backend.clone(), Duration::from_secs(1));
        (backend, ValueStore::new(handle, EntityFamily::Internship))
    }

    #[tokio::test]
    async fn sequential_upserts_keep_one_row() {
        let (backend, values) = store();
        let (entity, column) = (Uuid::new_v4(), Uuid::new_v4());

        let first = values.upsert_value(entity, column, "Draft").await.unwrap();
        let last = values.upsert_value(entity, column, "Final").await.unwrap();

        assert_eq!(backend.row_count("internship_column_values"), 1);
        assert_eq!(first.id, last.id);
        let current = values.get_value(entity, column).await.unwrap().unwrap();
        assert_eq!(current.text(), "Final");
    }

    #[tokio::test]
    async fn concurrent_upserts_do_not_duplicate() {
        let (backend, values) = store();
        let (entity, column) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let values = values.clone();
            tasks.push(tokio::spawn(async move {
                values.upsert_value(entity, column, &i.to_string()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(backend.row_count("internship_column_values"), 1);
    }

    #[tokio::test]
    async fn duplicate_rows_resolve_to_latest_write() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = StoreHandle::new(backend.clone(), Duration::from_secs(1));
        let values = ValueStore::new(handle, EntityFamily::Project);
        let (entity, column) = (Uuid::new_v4(), Uuid::new_v4());

        let written = Utc::now();
        let row = |text: &str, updated_at| Value {
            id: Uuid::new_v4(),
            column_id: column,
            entity_id: entity,
            value: Some(text.to_string()),
            created_at: written,
            updated_at,
        };
        let rows = vec![
            to_row(&row("Final", written + chrono::Duration::seconds(5))).unwrap(),
            to_row(&row("Draft", written)).unwrap(),
        ];
        backend.insert("project_column_values", rows).await.unwrap();

        let current = values.get_value(entity, column).await.unwrap().unwrap();
        assert_eq!(current.text(), "Final");
    }

    #[tokio::test]
    async fn bulk_deletes_are_scoped() {
        let (_, values) = store();
        let (e1, e2, c1, c2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        values.upsert_value(e1, c1, "a").await.unwrap();
        values.upsert_value(e1, c2, "b").await.unwrap();
        values.upsert_value(e2, c1, "c").await.unwrap();

        assert_eq!(values.delete_values_for_column(c1).await.unwrap(), 2);
        assert!(values.values_for_column(c1).await.unwrap().is_empty());
        assert_eq!(values.values_for_entity(e1).await.unwrap().len(), 1);

        assert_eq!(values.delete_values_for_entity(e1).await.unwrap(), 1);
        assert!(values.get_value(e1, c2).await.unwrap().is_none());
    }
}
