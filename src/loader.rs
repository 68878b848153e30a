use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use rusqlite::Connection;

use crate::db::{quote_ident, table_schema};
use crate::error::{GestyError, Result};
use crate::models::{ErrorDetail, ResolvedPair, StageResult, TableOutcome, TableSchema, TableStatus};

/// Row-level messages kept per table; the failure count is always exact.
pub const SHOWN_ROW_ERRORS: usize = 3;

/// Scratch file for one export. The index keeps names unique even when two
/// source names sanitize to the same string.
pub fn csv_path_for(scratch: &Path, index: usize, source_table: &str) -> PathBuf {
    let safe: String = source_table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    scratch.join(format!("{index:03}_{safe}.csv"))
}

/// True for a zero-byte export or one holding only a header line.
pub fn is_empty_export(csv_path: &Path) -> Result<bool> {
    if std::fs::metadata(csv_path)?.len() == 0 {
        return Ok(true);
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)?;
    let mut record = csv::ByteRecord::new();
    Ok(!rdr.read_byte_record(&mut record)?)
}

/// Undo mdb-export's C-style escaping of invisible characters.
pub fn unescape_invisible(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Map export header names onto the destination's own column spelling.
fn header_columns(schema: &TableSchema, header: &csv::StringRecord) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(header.len());
    for field in header.iter() {
        let name = field.trim();
        let Some(column) = schema
            .ordered_columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
        else {
            return Err(GestyError::ColumnMismatch {
                table: schema.name.clone(),
                message: format!("source column '{name}' does not exist in the destination"),
            });
        };
        if !seen.insert(column.to_ascii_lowercase()) {
            return Err(GestyError::ColumnMismatch {
                table: schema.name.clone(),
                message: format!("column '{name}' appears twice in the export header"),
            });
        }
        columns.push(column.clone());
    }
    if columns.is_empty() {
        return Err(GestyError::ColumnMismatch {
            table: schema.name.clone(),
            message: "export header has no columns".to_string(),
        });
    }
    Ok(columns)
}

/// Insert every data row of `csv_path` into `schema.name`, one row at a time.
///
/// Empty fields become NULL. A row whose field count differs from the header
/// is rejected. Row failures are counted and never stop the load.
pub fn load_csv(conn: &Connection, schema: &TableSchema, csv_path: &Path, unescape: bool) -> Result<StageResult> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)?;
    let header = rdr.headers()?.clone();
    let columns = header_columns(schema, &header)?;

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
        quote_ident(&schema.name)
    );

    let mut result = StageResult::default();
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare(&sql)?;
        for (i, record) in rdr.records().enumerate() {
            let row_no = i + 1;
            let outcome = record.map_err(GestyError::from).and_then(|record| {
                if record.len() != columns.len() {
                    return Err(GestyError::ColumnMismatch {
                        table: schema.name.clone(),
                        message: format!("expected {} fields, found {}", columns.len(), record.len()),
                    });
                }
                let values: Vec<Option<String>> = record
                    .iter()
                    .map(|f| {
                        if f.is_empty() {
                            None
                        } else if unescape {
                            Some(unescape_invisible(f))
                        } else {
                            Some(f.to_string())
                        }
                    })
                    .collect();
                insert.execute(rusqlite::params_from_iter(values.iter()))?;
                Ok(())
            });
            match outcome {
                Ok(()) => result.success(),
                Err(e) => {
                    if result.failed < SHOWN_ROW_ERRORS {
                        warn!("{} row {row_no}: {e}", schema.name);
                        result.failure(ErrorDetail::row(&schema.name, row_no, e.to_string()));
                    } else {
                        debug!("{} row {row_no}: {e}", schema.name);
                        result.failed += 1;
                    }
                }
            }
        }
    }
    tx.commit()?;
    Ok(result)
}

/// Everything about an export that can fail for the whole table, checked
/// before the destination is touched. `None` means the export is empty.
pub fn check_export(conn: &Connection, pair: &ResolvedPair, csv_path: &Path) -> Result<Option<TableSchema>> {
    if is_empty_export(csv_path)? {
        return Ok(None);
    }
    let schema = table_schema(conn, &pair.destination)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)?;
    header_columns(&schema, rdr.headers()?)?;
    Ok(Some(schema))
}

/// Load a previously exported pair, turning every failure into a `TableOutcome`.
pub fn load_pair(conn: &Connection, pair: &ResolvedPair, csv_path: &Path, unescape: bool) -> TableOutcome {
    let attempt = || -> Result<TableOutcome> {
        let Some(schema) = check_export(conn, pair, csv_path)? else {
            return Ok(TableOutcome {
                pair: pair.clone(),
                status: TableStatus::Empty,
                rows: StageResult::default(),
            });
        };
        let rows = load_csv(conn, &schema, csv_path, unescape)?;
        Ok(TableOutcome {
            pair: pair.clone(),
            status: TableStatus::Loaded,
            rows,
        })
    };
    attempt().unwrap_or_else(|e| TableOutcome {
        pair: pair.clone(),
        status: TableStatus::Failed(e.to_string()),
        rows: StageResult::default(),
    })
}
