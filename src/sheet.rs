use calamine::{open_workbook_auto_from_rs, Data, Reader};
use derive_more::{Display, Error};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;

/// A failure scoped to one spreadsheet row. `row` is the 1-indexed sheet
/// row (header row is 1, first data row is 2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Display, Error)]
pub enum SheetError {
    #[display("Unable to read workbook: {message}")]
    #[error(ignore)]
    Workbook { message: String },
    #[display("Missing columns: {}", columns.join(", "))]
    #[error(ignore)]
    MissingColumns { columns: Vec<String> },
    #[display("Validation failed")]
    #[error(ignore)]
    Validation { issues: Vec<RowIssue> },
}

/// One parsed data row, keyed by lower-cased trimmed header names.
/// Absent and blank cells both read back as the empty string.
#[derive(Clone, Debug, Default)]
pub struct RawRow {
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn insert(&mut self, header: &str, value: String) {
        self.cells.insert(header.trim().to_lowercase(), value);
    }

    pub fn get(&self, key: &str) -> &str {
        self.cells.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.cells.contains_key(&key.trim().to_lowercase())
    }
}

/// A typed row shape produced from a [`RawRow`]. `field` exposes the
/// mapped values by column name so required-field validation can run
/// after mapping.
pub trait SheetRow: Sized {
    fn from_raw(raw: &RawRow) -> Self;
    fn field(&self, name: &str) -> Option<&str>;
}

pub struct SheetSchema {
    pub sheet_index: usize,
    pub headers: &'static [&'static str],
    pub required: &'static [&'static str],
}

/// Parses an uploaded buffer into mapped rows.
///
/// Workbooks (xlsx/xls/ods) are detected by magic bytes; anything else is
/// treated as CSV. An absent sheet index yields an empty import. Header
/// validation is case-insensitive and only runs when at least one data
/// row exists; required-field validation aggregates every offending row
/// before failing.
pub fn parse_sheet<T: SheetRow>(data: &[u8], schema: &SheetSchema) -> Result<Vec<T>, SheetError> {
    let raw = if looks_like_workbook(data) {
        read_workbook_rows(data, schema.sheet_index)?
    } else {
        read_csv_rows(data, schema.sheet_index)?
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let missing: Vec<String> = schema
        .headers
        .iter()
        .filter(|h| !raw[0].has_column(h))
        .map(|h| h.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SheetError::MissingColumns { columns: missing });
    }

    let rows: Vec<T> = raw.iter().map(T::from_raw).collect();

    let mut issues = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        for key in schema.required {
            if row.field(key).map_or(true, str::is_empty) {
                issues.push(RowIssue {
                    row: i + 2,
                    message: format!("Missing required '{key}'"),
                });
            }
        }
    }
    if !issues.is_empty() {
        return Err(SheetError::Validation { issues });
    }

    Ok(rows)
}

/// ZIP (xlsx/ods) or OLE compound document (legacy xls) prefix.
fn looks_like_workbook(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
        || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Bool(b) => b.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_workbook_rows(data: &[u8], sheet_index: usize) -> Result<Vec<RawRow>, SheetError> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(data.to_vec())).map_err(|err| {
            SheetError::Workbook {
                message: err.to_string(),
            }
        })?;
    let range = match workbook.worksheet_range_at(sheet_index) {
        Some(Ok(range)) => range,
        Some(Err(err)) => {
            return Err(SheetError::Workbook {
                message: err.to_string(),
            })
        }
        None => return Ok(Vec::new()),
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };

    Ok(rows
        .map(|cells| {
            let mut row = RawRow::default();
            for (i, header) in headers.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                row.insert(header, cells.get(i).map(cell_to_string).unwrap_or_default());
            }
            row
        })
        .collect())
}

fn read_csv_rows(data: &[u8], sheet_index: usize) -> Result<Vec<RawRow>, SheetError> {
    // A CSV upload only carries one sheet worth of data.
    if sheet_index > 0 {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| SheetError::Workbook {
            message: err.to_string(),
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SheetError::Workbook {
            message: err.to_string(),
        })?;
        let mut row = RawRow::default();
        for (i, header) in headers.iter().enumerate() {
            if header.trim().is_empty() {
                continue;
            }
            row.insert(header, record.get(i).unwrap_or("").trim().to_string());
        }
        out.push(row);
    }
    Ok(out)
}
