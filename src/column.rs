use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::family::EntityFamily;
use crate::store::{Filter, StoreHandle, from_row, from_rows, to_row};
use crate::value::ValueStore;

/// Declared type of a dynamic column. Advisory: values are stored as strings
/// whatever the type, and the type only picks the widget and input check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    /// A link to an uploaded PDF (or any external file).
    Pdf,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ColumnType::Text),
            "number" => Ok(ColumnType::Number),
            "date" => Ok(ColumnType::Date),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "pdf" | "pdf-link" | "link" => Ok(ColumnType::Pdf),
            other => Err(PortalError::validation(format!(
                "Unknown column type: {}",
                other
            ))),
        }
    }
}

/// A user-defined attribute definition scoped to one entity family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: Uuid,
    pub family: EntityFamily,
    pub name: String,
    pub column_type: ColumnType,
    pub created_at: DateTime<Utc>,
}

/// Column definitions of one family.
#[derive(Clone)]
pub struct ColumnRegistry {
    store: StoreHandle,
    family: EntityFamily,
    values: ValueStore,
}

impl ColumnRegistry {
    pub fn new(store: StoreHandle, family: EntityFamily) -> Self {
        let values = ValueStore::new(store.clone(), family);
        ColumnRegistry {
            store,
            family,
            values,
        }
    }

    pub fn family(&self) -> EntityFamily {
        self.family
    }

    /// Registers a new column.
    ///
    /// Names are trimmed and must be non-empty, unique within the family, and
    /// distinct from the family's base field labels (import and export key
    /// both on the header text).
    pub async fn create_column(&self, name: &str, column_type: ColumnType) -> PortalResult<Column> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PortalError::validation("Column name cannot be empty"));
        }
        if self.family.base_field(name).is_some() {
            return Err(PortalError::validation(format!(
                "Column name '{}' is reserved for a {} field",
                name, self.family
            )));
        }
        if self.find_by_name(name).await?.is_some() {
            return Err(PortalError::validation(format!(
                "A {} column named '{}' already exists",
                self.family, name
            )));
        }

        let column = Column {
            id: Uuid::new_v4(),
            family: self.family,
            name: name.to_string(),
            column_type,
            created_at: Utc::now(),
        };
        self.store
            .insert("create_column", self.family.columns_table(), vec![to_row(&column)?])
            .await?;
        info!("created {} column '{}' ({})", self.family, column.name, column.column_type);
        Ok(column)
    }

    /// All columns of the family in creation order.
    pub async fn list_columns(&self) -> PortalResult<Vec<Column>> {
        let rows = self
            .store
            .select(
                "list_columns",
                self.family.columns_table(),
                &Filter::all().order_by("created_at"),
            )
            .await?;
        from_rows(rows)
    }

    pub async fn get_column(&self, id: Uuid) -> PortalResult<Column> {
        let rows = self
            .store
            .select(
                "get_column",
                self.family.columns_table(),
                &Filter::all().eq("id", id),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => from_row(row),
            None => Err(PortalError::not_found("column", id)),
        }
    }

    /// First column whose name matches exactly, in creation order.
    pub async fn find_by_name(&self, name: &str) -> PortalResult<Option<Column>> {
        Ok(self
            .list_columns()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    /// Removes a column and every value stored against it.
    ///
    /// Values go first: if the value cleanup fails the column is still
    /// present and the delete can be retried without leaving orphans.
    pub async fn delete_column(&self, id: Uuid) -> PortalResult<()> {
        let column = self.get_column(id).await?;
        let removed = self.values.delete_values_for_column(id).await?;
        self.store
            .delete(
                "delete_column",
                self.family.columns_table(),
                &Filter::all().eq("id", id),
            )
            .await?;
        info!(
            "deleted {} column '{}' and {} values",
            self.family, column.name, removed
        );
        Ok(())
    }
}
