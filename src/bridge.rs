//! Maps spreadsheet rows onto entities plus dynamic columns, and back.

use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::column::Column;
use crate::error::{PortalError, PortalResult};
use crate::loader;
use crate::resolver::AttributeResolver;

/// A rectangular table of text cells with a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Builds a sheet, fitting every row to the header width and dropping rows
    /// with no content at all.
    pub fn from_parts(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Sheet { headers, rows }
    }

    /// Each row as `header -> cell`. When headers repeat, the leftmost wins.
    pub fn records(&self) -> Vec<BTreeMap<String, String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = BTreeMap::new();
                for (header, cell) in self.headers.iter().zip(row) {
                    record.entry(header.clone()).or_insert_with(|| cell.clone());
                }
                record
            })
            .collect()
    }
}

/// Why one spreadsheet row did not import cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// Row number as the user sees it in the sheet (the header is row 1).
    pub row: usize,
    /// Set when the base record was committed before the failure.
    pub entity_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    /// Entities whose base record was created, including partially imported ones.
    pub imported: Vec<Uuid>,
    pub failures: Vec<RowFailure>,
    /// Headers matching neither a base field nor a registered column.
    pub skipped_headers: Vec<String>,
}

enum Target<'a> {
    Base(&'a str),
    Dynamic(&'a Column),
}

/// Imports every row of `sheet` into the resolver's family.
///
/// Rows are processed one at a time and nothing is rolled back: a row whose
/// dynamic values fail keeps its base record. Headers that match no base
/// field and no registered column are skipped; columns are never created on
/// the fly. Any row failure turns the result into
/// [`PortalError::PartialImport`] carrying the full report.
pub async fn import_sheet(resolver: &AttributeResolver, sheet: &Sheet) -> PortalResult<ImportReport> {
    let family = resolver.family();
    let columns = resolver.registry().list_columns().await?;

    let mut targets: Vec<Option<Target<'_>>> = Vec::with_capacity(sheet.headers.len());
    let mut seen = BTreeSet::new();
    let mut report = ImportReport {
        total: sheet.rows.len(),
        ..ImportReport::default()
    };
    for header in &sheet.headers {
        if header.is_empty() || !seen.insert(header.as_str()) {
            targets.push(None);
        } else if let Some(field) = family.base_field(header) {
            targets.push(Some(Target::Base(field.label)));
        } else if let Some(column) = columns.iter().find(|c| &c.name == header) {
            targets.push(Some(Target::Dynamic(column)));
        } else {
            report.skipped_headers.push(header.clone());
            targets.push(None);
        }
    }
    if !report.skipped_headers.is_empty() {
        warn!(
            "{} import: no column for headers {:?}",
            family, report.skipped_headers
        );
    }

    for (index, row) in sheet.rows.iter().enumerate() {
        let row_number = index + 2;
        let mut fields = BTreeMap::new();
        let mut dynamic = Vec::new();
        for (target, cell) in targets.iter().zip(row) {
            match target {
                Some(Target::Base(label)) => {
                    fields.insert(label.to_string(), cell.clone());
                }
                Some(Target::Dynamic(column)) if !cell.trim().is_empty() => {
                    dynamic.push((*column, cell.trim()));
                }
                _ => {}
            }
        }

        let record = match resolver.create_entity(fields).await {
            Ok(record) => record,
            Err(e) => {
                warn!("{} import: row {} rejected: {}", family, row_number, e);
                report.failures.push(RowFailure {
                    row: row_number,
                    entity_id: None,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        report.imported.push(record.id);

        let mut reasons = Vec::new();
        for (column, cell) in dynamic {
            if let Err(e) = resolver.values().upsert_value(record.id, column.id, cell).await {
                reasons.push(format!("{}: {}", column.name, e));
            }
        }
        if !reasons.is_empty() {
            warn!(
                "{} import: row {} partially imported: {}",
                family,
                row_number,
                reasons.join("; ")
            );
            report.failures.push(RowFailure {
                row: row_number,
                entity_id: Some(record.id),
                reason: reasons.join("; "),
            });
        }
    }

    info!(
        "{} import: {} of {} rows created, {} failures",
        family,
        report.imported.len(),
        report.total,
        report.failures.len()
    );
    if report.failures.is_empty() {
        Ok(report)
    } else {
        Err(PortalError::PartialImport(report))
    }
}

/// Parses an uploaded workbook or CSV file and imports it.
pub async fn import_upload(
    resolver: &AttributeResolver,
    file_name: &str,
    bytes: &[u8],
) -> PortalResult<ImportReport> {
    let sheet = loader::parse_upload(file_name, bytes)?;
    import_sheet(resolver, &sheet).await
}

/// One row per entity: base fields first, then every registered column by name.
pub async fn export_sheet(resolver: &AttributeResolver) -> PortalResult<Sheet> {
    let family = resolver.family();
    let columns = resolver.registry().list_columns().await?;
    let entities = resolver.entities().list().await?;

    let mut headers: Vec<String> = family
        .base_fields()
        .iter()
        .map(|f| f.label.to_string())
        .collect();
    headers.extend(columns.iter().map(|c| c.name.clone()));

    let mut rows = Vec::with_capacity(entities.len());
    for entity in &entities {
        let mut row: Vec<String> = family
            .base_fields()
            .iter()
            .map(|f| entity.field(f.label).to_string())
            .collect();
        let attributes = resolver.resolve_with(&columns, entity.id).await?;
        row.extend(attributes.iter().map(|a| a.text().to_string()));
        rows.push(row);
    }

    Ok(Sheet { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_fitted_to_headers() {
        let sheet = Sheet::from_parts(
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["1".to_string()],
                vec!["2".to_string(), "3".to_string(), "extra".to_string()],
                vec![" ".to_string(), String::new()],
            ],
        );
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0], vec!["1", ""]);
        assert_eq!(sheet.rows[1], vec!["2", "3"]);
    }

    #[test]
    fn repeated_headers_keep_leftmost() {
        let sheet = Sheet::from_parts(
            vec!["Title".to_string(), "Title".to_string()],
            vec![vec!["first".to_string(), "second".to_string()]],
        );
        assert_eq!(sheet.records()[0]["Title"], "first");
    }
}
