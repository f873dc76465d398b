use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::bridge::Sheet;

/// Convert a sheet to CSV format
///
/// Writes the header line followed by one line per row. Fields containing
/// commas, quotes or line breaks are quoted, with inner quotes doubled.
///
/// # Examples
/// ```
/// use faculty_portal::bridge::Sheet;
/// use faculty_portal::downloader::to_csv;
///
/// let sheet = Sheet::from_parts(
///     vec!["Title".to_string()],
///     vec![vec!["Rover, v2".to_string()]],
/// );
/// assert_eq!(to_csv(&sheet), "Title\n\"Rover, v2\"\n");
/// ```
pub fn to_csv(sheet: &Sheet) -> String {
    let mut csv_content = String::new();
    push_csv_line(&mut csv_content, &sheet.headers);
    for row in &sheet.rows {
        push_csv_line(&mut csv_content, row);
    }
    csv_content
}

/// Convert a sheet to XLSX format
///
/// Headers go in the first row in bold; every value is written as a string
/// so that what is stored is exactly what comes back on import.
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - XLSX file content as bytes or an error
pub fn to_xlsx(sheet: &Sheet) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    let bold = Format::new().set_bold();

    for (c, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, header, &bold)?;
    }
    for (r, row) in sheet.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string((r + 1) as u32, c as u16, value)?;
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer()
}

fn push_csv_line(out: &mut String, fields: &[String]) {
    for (i, value) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}
