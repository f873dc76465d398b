use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::NaiveTime;
use std::io::Cursor;
use std::path::Path;

use crate::bridge::Sheet;
use crate::error::{PortalError, PortalResult};

/// Parse the first worksheet of an Excel workbook.
///
/// The first row supplies the headers; every later row becomes one record.
/// Cell values are flattened to text (integers stay integral, booleans become
/// `true`/`false`) and completely blank rows are dropped.
///
/// # Arguments
/// * `bytes` - Raw `.xlsx`, `.xls` or `.ods` content
///
/// # Returns
/// * `PortalResult<Sheet>` - The parsed sheet or a validation error
///
/// # Examples
/// ```no_run
/// use faculty_portal::loader::parse_xlsx;
///
/// let bytes = std::fs::read("projects.xlsx").unwrap();
/// match parse_xlsx(&bytes) {
///     Ok(sheet) => println!("{} rows", sheet.rows.len()),
///     Err(e) => eprintln!("Error loading Excel: {}", e),
/// }
/// ```
pub fn parse_xlsx(bytes: &[u8]) -> PortalResult<Sheet> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| PortalError::validation(format!("Could not read workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PortalError::validation("No sheets found in workbook"))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| PortalError::validation(format!("Could not read sheet {}: {}", sheet_name, e)))?;

    let mut rows = range.rows().map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
    let headers = match rows.next() {
        Some(headers) => headers.into_iter().map(|h| h.trim().to_string()).collect(),
        None => return Err(PortalError::validation("Workbook sheet is empty")),
    };

    Ok(Sheet::from_parts(headers, rows.collect()))
}

/// Parse CSV text with a header line.
///
/// Quoted fields may contain commas, doubled quotes and line breaks.
pub fn parse_csv(bytes: &[u8]) -> PortalResult<Sheet> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| PortalError::validation("CSV file is not valid UTF-8"))?;
    let text = text.trim_start_matches('\u{feff}');

    let mut records = parse_csv_records(text).into_iter();
    let headers = match records.next() {
        Some(headers) => headers.into_iter().map(|h| h.trim().to_string()).collect(),
        None => return Err(PortalError::validation("CSV file is empty")),
    };

    Ok(Sheet::from_parts(headers, records.collect()))
}

/// Detect the format from the file name and parse accordingly.
///
/// # Examples
/// ```
/// use faculty_portal::loader::parse_upload;
///
/// let sheet = parse_upload("groups.csv", b"Group No,Title\n4,Rover\n").unwrap();
/// assert_eq!(sheet.headers, vec!["Group No", "Title"]);
/// ```
pub fn parse_upload(file_name: &str, bytes: &[u8]) -> PortalResult<Sheet> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => parse_csv(bytes),
        Some("xlsx") | Some("xls") | Some("ods") => parse_xlsx(bytes),
        Some(ext) => Err(PortalError::validation(format!(
            "Unsupported file extension: {}",
            ext
        ))),
        None => Err(PortalError::validation("File has no extension")),
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) if datetime.time() == NaiveTime::MIN => {
                datetime.format("%Y-%m-%d").to_string()
            }
            Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) => s.clone(),
        other => other.to_string(),
    }
}

// Split CSV text into records of fields
fn parse_csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Double quote inside quoted field - add a single quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current_field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                record.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut current_field));
                records.push(std::mem::take(&mut record));
            }
            _ => current_field.push(c),
        }
    }

    // Last record without a trailing newline
    if !current_field.is_empty() || !record.is_empty() {
        record.push(current_field);
        records.push(record);
    }

    records
}
