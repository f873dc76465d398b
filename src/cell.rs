use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::column::{Column, ColumnType};
use crate::entity::EntityRecord;
use crate::error::{PortalError, PortalResult};
use crate::resolver::{AttributeResolver, ResolvedAttribute};
use crate::value::Value;

/// Lifecycle of one editable cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellState {
    Viewing,
    Editing {
        buffer: String,
        error: Option<String>,
    },
    Saving {
        buffer: String,
    },
}

#[derive(Debug, Error)]
pub enum CellError {
    #[error("cell is not being edited")]
    NotEditing,

    #[error("another edit is already open")]
    AlreadyEditing,

    #[error("a save is already in flight")]
    SaveInFlight,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Write(#[from] PortalError),
}

/// What the table should draw for a cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum Widget {
    Blank,
    Text { text: String },
    Link { href: String },
    Checkbox { checked: bool, editable: bool },
    TextInput { value: String },
    NumberInput { value: String },
    DateInput { value: String },
    /// Upload control plus a field for pasting a link.
    FileInput { current: Option<String>, link: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CellView {
    pub widget: Widget,
    pub busy: bool,
    pub error: Option<String>,
}

/// The write a cell wants performed once it has entered `Saving`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSave {
    pub entity_id: Uuid,
    pub column_id: Uuid,
    pub value: String,
}

/// Editor for one dynamic (entity, column) cell.
///
/// The displayed value is always the last server-confirmed one. The edit
/// buffer never leaks into it: success replaces the confirmed value with what
/// the store returned, failure reopens editing with the attempted text.
#[derive(Clone, Debug)]
pub struct CellEditor {
    entity_id: Uuid,
    column: Column,
    confirmed: String,
    state: CellState,
}

impl CellEditor {
    pub fn new(entity_id: Uuid, attribute: &ResolvedAttribute) -> Self {
        CellEditor {
            entity_id,
            column: attribute.column.clone(),
            confirmed: attribute.text().to_string(),
            state: CellState::Viewing,
        }
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn begin_edit(&mut self) -> Result<(), CellError> {
        match self.state {
            CellState::Viewing => {
                self.state = CellState::Editing {
                    buffer: self.confirmed.clone(),
                    error: None,
                };
                Ok(())
            }
            CellState::Editing { .. } => Err(CellError::AlreadyEditing),
            CellState::Saving { .. } => Err(CellError::SaveInFlight),
        }
    }

    pub fn input(&mut self, text: &str) -> Result<(), CellError> {
        match &mut self.state {
            CellState::Editing { buffer, error } => {
                *buffer = text.to_string();
                *error = None;
                Ok(())
            }
            CellState::Saving { .. } => Err(CellError::SaveInFlight),
            CellState::Viewing => Err(CellError::NotEditing),
        }
    }

    pub fn cancel(&mut self) -> Result<(), CellError> {
        match self.state {
            CellState::Saving { .. } => Err(CellError::SaveInFlight),
            _ => {
                self.state = CellState::Viewing;
                Ok(())
            }
        }
    }

    /// Validates the buffer for the column type and moves to `Saving`.
    ///
    /// Invalid input keeps the cell in `Editing` with the message attached.
    pub fn begin_save(&mut self) -> Result<PendingSave, CellError> {
        let (buffer, error) = match &mut self.state {
            CellState::Editing { buffer, error } => (buffer, error),
            CellState::Saving { .. } => return Err(CellError::SaveInFlight),
            CellState::Viewing => return Err(CellError::NotEditing),
        };

        let value = match normalize_input(self.column.column_type, buffer) {
            Ok(value) => value,
            Err(message) => {
                *error = Some(message.clone());
                return Err(CellError::Invalid(message));
            }
        };

        self.state = CellState::Saving {
            buffer: buffer.clone(),
        };
        Ok(PendingSave {
            entity_id: self.entity_id,
            column_id: self.column.id,
            value,
        })
    }

    pub fn complete_save(&mut self, outcome: &PortalResult<Value>) {
        let buffer = match &self.state {
            CellState::Saving { buffer } => buffer.clone(),
            _ => return,
        };
        self.state = match outcome {
            Ok(value) => {
                self.confirmed = value.text().to_string();
                CellState::Viewing
            }
            Err(e) => CellState::Editing {
                buffer,
                error: Some(e.to_string()),
            },
        };
    }

    /// Runs the whole `Editing -> Saving -> Viewing` cycle against the resolver.
    pub async fn save(&mut self, resolver: &AttributeResolver) -> Result<(), CellError> {
        let pending = self.begin_save()?;
        let outcome = resolver
            .set_attribute(pending.entity_id, pending.column_id, &pending.value)
            .await;
        self.complete_save(&outcome);
        outcome.map(|_| ()).map_err(CellError::from)
    }

    /// Takes a freshly resolved attribute as the new confirmed value. An open
    /// edit buffer is left alone.
    pub fn refresh(&mut self, attribute: &ResolvedAttribute) {
        if attribute.column.id == self.column.id {
            self.column = attribute.column.clone();
            self.confirmed = attribute.text().to_string();
        }
    }

    pub fn view(&self) -> CellView {
        match &self.state {
            CellState::Viewing => CellView {
                widget: display_widget(self.column.column_type, &self.confirmed),
                busy: false,
                error: None,
            },
            CellState::Saving { .. } => CellView {
                widget: display_widget(self.column.column_type, &self.confirmed),
                busy: true,
                error: None,
            },
            CellState::Editing { buffer, error } => CellView {
                widget: edit_widget(self.column.column_type, &self.confirmed, buffer),
                busy: false,
                error: error.clone(),
            },
        }
    }
}

fn display_widget(column_type: ColumnType, value: &str) -> Widget {
    match column_type {
        ColumnType::Boolean => Widget::Checkbox {
            checked: value == "true",
            editable: false,
        },
        _ if value.is_empty() => Widget::Blank,
        ColumnType::Pdf => Widget::Link {
            href: value.to_string(),
        },
        ColumnType::Text | ColumnType::Number | ColumnType::Date => Widget::Text {
            text: value.to_string(),
        },
    }
}

fn edit_widget(column_type: ColumnType, confirmed: &str, buffer: &str) -> Widget {
    let value = buffer.to_string();
    match column_type {
        ColumnType::Text => Widget::TextInput { value },
        ColumnType::Number => Widget::NumberInput { value },
        ColumnType::Date => Widget::DateInput { value },
        ColumnType::Boolean => Widget::Checkbox {
            checked: buffer == "true",
            editable: true,
        },
        ColumnType::Pdf => Widget::FileInput {
            current: (!confirmed.is_empty()).then(|| confirmed.to_string()),
            link: value,
        },
    }
}

/// Checks typed input and returns the string that will be stored.
/// Empty input is always accepted and clears the cell.
pub fn normalize_input(column_type: ColumnType, raw: &str) -> Result<String, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(String::new());
    }
    match column_type {
        ColumnType::Text => Ok(raw.to_string()),
        ColumnType::Number => text
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|_| text.to_string())
            .ok_or_else(|| format!("'{}' is not a number", text)),
        ColumnType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|_| format!("'{}' is not a date (YYYY-MM-DD)", text)),
        ColumnType::Boolean => match text.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok("true".to_string()),
            "false" | "no" | "0" => Ok("false".to_string()),
            _ => Err(format!("'{}' is not true or false", text)),
        },
        ColumnType::Pdf => {
            if text.contains("://") {
                Ok(text.to_string())
            } else {
                Err(format!("'{}' is not a link", text))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FieldEdit {
    label: String,
    buffer: String,
    saving: bool,
    error: Option<String>,
}

/// Editor for the base fields of one row. At most one field of the row holds
/// an edit buffer (or is saving) at any time.
#[derive(Clone, Debug)]
pub struct RowEditor {
    record: EntityRecord,
    active: Option<FieldEdit>,
}

impl RowEditor {
    pub fn new(record: EntityRecord) -> Self {
        RowEditor {
            record,
            active: None,
        }
    }

    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    /// Label and buffer of the field being edited, if any.
    pub fn active_field(&self) -> Option<(&str, &str)> {
        self.active
            .as_ref()
            .map(|edit| (edit.label.as_str(), edit.buffer.as_str()))
    }

    pub fn error(&self) -> Option<&str> {
        self.active.as_ref().and_then(|edit| edit.error.as_deref())
    }

    pub fn begin_edit(&mut self, label: &str) -> Result<(), CellError> {
        if let Some(edit) = &self.active {
            return Err(if edit.saving {
                CellError::SaveInFlight
            } else {
                CellError::AlreadyEditing
            });
        }
        if self.record.family.base_field(label).is_none() {
            return Err(CellError::Invalid(format!("Unknown field: {}", label)));
        }
        self.active = Some(FieldEdit {
            label: label.to_string(),
            buffer: self.record.field(label).to_string(),
            saving: false,
            error: None,
        });
        Ok(())
    }

    pub fn input(&mut self, text: &str) -> Result<(), CellError> {
        match &mut self.active {
            Some(edit) if edit.saving => Err(CellError::SaveInFlight),
            Some(edit) => {
                edit.buffer = text.to_string();
                edit.error = None;
                Ok(())
            }
            None => Err(CellError::NotEditing),
        }
    }

    pub fn cancel(&mut self) -> Result<(), CellError> {
        match &self.active {
            Some(edit) if edit.saving => Err(CellError::SaveInFlight),
            _ => {
                self.active = None;
                Ok(())
            }
        }
    }

    /// Returns `(label, value)` to write and marks the field as saving.
    pub fn begin_save(&mut self) -> Result<(String, String), CellError> {
        match &mut self.active {
            Some(edit) if edit.saving => Err(CellError::SaveInFlight),
            Some(edit) => {
                edit.saving = true;
                Ok((edit.label.clone(), edit.buffer.clone()))
            }
            None => Err(CellError::NotEditing),
        }
    }

    pub fn complete_save(&mut self, outcome: &PortalResult<EntityRecord>) {
        match outcome {
            Ok(record) => {
                self.record = record.clone();
                self.active = None;
            }
            Err(e) => {
                if let Some(edit) = &mut self.active {
                    edit.saving = false;
                    edit.error = Some(e.to_string());
                }
            }
        }
    }

    pub async fn save(&mut self, resolver: &AttributeResolver) -> Result<(), CellError> {
        let (label, value) = self.begin_save()?;
        let outcome = resolver
            .entities()
            .update_field(self.record.id, &label, &value)
            .await;
        self.complete_save(&outcome);
        outcome.map(|_| ()).map_err(CellError::from)
    }
}
