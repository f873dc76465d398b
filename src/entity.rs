use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::family::EntityFamily;
use crate::store::{Filter, Row, StoreHandle, from_row, from_rows, to_row};
use crate::value::ValueStore;

/// A base project or internship record. Dynamic values hang off `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub family: EntityFamily,
    /// Base field values keyed by field label. Blank fields are absent.
    pub fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn field(&self, label: &str) -> &str {
        self.fields.get(label).map(String::as_str).unwrap_or("")
    }
}

#[derive(Clone)]
pub struct EntityStore {
    store: StoreHandle,
    family: EntityFamily,
    values: ValueStore,
}

impl EntityStore {
    pub fn new(store: StoreHandle, family: EntityFamily) -> Self {
        let values = ValueStore::new(store.clone(), family);
        EntityStore {
            store,
            family,
            values,
        }
    }

    pub async fn create(&self, fields: BTreeMap<String, String>) -> PortalResult<EntityRecord> {
        let fields = self.check_fields(fields)?;
        let record = EntityRecord {
            id: Uuid::new_v4(),
            family: self.family,
            fields,
            created_at: Utc::now(),
        };
        self.store
            .insert("create_entity", self.family.entities_table(), vec![to_row(&record)?])
            .await?;
        info!("created {} {}", self.family, record.id);
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> PortalResult<EntityRecord> {
        let rows = self
            .store
            .select(
                "get_entity",
                self.family.entities_table(),
                &Filter::all().eq("id", id),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => from_row(row),
            None => Err(PortalError::not_found(self.family.as_str(), id)),
        }
    }

    pub async fn list(&self) -> PortalResult<Vec<EntityRecord>> {
        let rows = self
            .store
            .select(
                "list_entities",
                self.family.entities_table(),
                &Filter::all().order_by("created_at"),
            )
            .await?;
        from_rows(rows)
    }

    /// Replaces one base field. An empty value clears it, unless the field is required.
    pub async fn update_field(&self, id: Uuid, label: &str, value: &str) -> PortalResult<EntityRecord> {
        let field = self.family.base_field(label).ok_or_else(|| {
            PortalError::validation(format!("Unknown {} field: {}", self.family, label))
        })?;
        let value = value.trim();
        if field.required && value.is_empty() {
            return Err(PortalError::validation(format!("{} is required", label)));
        }

        let mut record = self.get(id).await?;
        if value.is_empty() {
            record.fields.remove(label);
        } else {
            record.fields.insert(label.to_string(), value.to_string());
        }

        let mut patch = Row::new();
        patch.insert(
            "fields".to_string(),
            serde_json::to_value(&record.fields).map_err(|e| {
                PortalError::validation(format!("Could not encode fields: {}", e))
            })?,
        );
        self.store
            .update(
                "update_entity",
                self.family.entities_table(),
                &Filter::all().eq("id", id),
                patch,
            )
            .await?;
        Ok(record)
    }

    /// Removes the record after clearing all of its dynamic values.
    pub async fn delete(&self, id: Uuid) -> PortalResult<()> {
        self.get(id).await?;
        let removed = self.values.delete_values_for_entity(id).await?;
        self.store
            .delete(
                "delete_entity",
                self.family.entities_table(),
                &Filter::all().eq("id", id),
            )
            .await?;
        info!("deleted {} {} and {} values", self.family, id, removed);
        Ok(())
    }

    fn check_fields(&self, fields: BTreeMap<String, String>) -> PortalResult<BTreeMap<String, String>> {
        let mut clean = BTreeMap::new();
        for (label, value) in fields {
            if self.family.base_field(&label).is_none() {
                return Err(PortalError::validation(format!(
                    "Unknown {} field: {}",
                    self.family, label
                )));
            }
            let value = value.trim();
            if !value.is_empty() {
                clean.insert(label, value.to_string());
            }
        }
        for field in self.family.base_fields().iter().filter(|f| f.required) {
            if !clean.contains_key(field.label) {
                return Err(PortalError::validation(format!("{} is required", field.label)));
            }
        }
        Ok(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn entities() -> EntityStore {
        let store = StoreHandle::new(Arc::new(MemoryBackend::new()), Duration::from_secs(1));
        EntityStore::new(store, EntityFamily::Project)
    }

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn project_needs_a_title() {
        let err = entities()
            .create(fields(&[("Group No", "7"), ("Title", "  ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(ref m) if m == "Title is required"));
    }

    #[tokio::test]
    async fn unknown_fields_are_rejected() {
        let err = entities()
            .create(fields(&[("Title", "Robot arm"), ("Colour", "red")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn update_field_round_trips() {
        let store = entities();
        let record = store
            .create(fields(&[("Title", "Robot arm"), ("Guide", "Dr. Rao")]))
            .await
            .unwrap();

        store.update_field(record.id, "Guide", "").await.unwrap();
        store.update_field(record.id, "Domain", "Robotics").await.unwrap();

        let reloaded = store.get(record.id).await.unwrap();
        assert_eq!(reloaded.field("Guide"), "");
        assert_eq!(reloaded.field("Domain"), "Robotics");
        assert!(store.update_field(record.id, "Title", " ").await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_entity_is_not_found() {
        let err = entities().delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortalError::NotFound { kind: "project", .. }));
    }
}
