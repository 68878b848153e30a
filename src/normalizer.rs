use std::sync::LazyLock;

use chrono::NaiveDate;
use log::{debug, info, warn};
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::db::{quote_ident, table_schema};
use crate::error::Result;
use crate::models::{ErrorDetail, NormalizeReport, NormalizeStats};

// 1.234.567,89 / -12,5 / 42
static EUROPEAN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d{1,3}(\.\d{3})*(,\d+)?$").unwrap());

// 1234.56 / +7
static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d+(\.\d+)?$").unwrap());

const TIME_SUFFIX: &str = r"(?:[ T]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?)?";

static YEAR_FIRST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(\d{{4}})([-/.])(\d{{1,2}})([-/.])(\d{{1,2}}){TIME_SUFFIX}$")).unwrap()
});

static DAY_FIRST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(\d{{1,2}})([-/.])(\d{{1,2}})([-/.])(\d{{4}}|\d{{2}}){TIME_SUFFIX}$"
    ))
    .unwrap()
});

/// Result of normalizing one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedCell {
    Unchanged,
    Number(f64),
    /// Canonical text, currently always an ISO `YYYY-MM-DD` date.
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    pub dates: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { dates: true }
    }
}

/// A date the parser accepted, and whether another reading was possible.
#[derive(Debug, Clone, PartialEq)]
pub struct DateDecision {
    pub iso: String,
    /// Day and month were both <= 12 and distinct, so a month-first reading
    /// would have produced a different date.
    pub ambiguous: bool,
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if EUROPEAN_NUMBER.is_match(s) {
        return s.replace('.', "").replace(',', ".").parse().ok();
    }
    if PLAIN_NUMBER.is_match(s) {
        return s.parse().ok();
    }
    None
}

fn two_digit_year(y: i32) -> i32 {
    if y < 70 {
        2000 + y
    } else {
        1900 + y
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a complete calendar date, reading `a/b/y` as day/month first and
/// falling back to month/day only when the day-first reading is invalid.
pub fn parse_date_dayfirst(raw: &str) -> Option<DateDecision> {
    let s = raw.trim();

    if let Some(c) = YEAR_FIRST_DATE.captures(s) {
        if c[2] != c[4] {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[3].parse().ok()?, c[5].parse().ok()?)?;
        return Some(DateDecision {
            iso: iso(date),
            ambiguous: false,
        });
    }

    let c = DAY_FIRST_DATE.captures(s)?;
    if c[2] != c[4] {
        return None;
    }
    let a: u32 = c[1].parse().ok()?;
    let b: u32 = c[3].parse().ok()?;
    let mut year: i32 = c[5].parse().ok()?;
    if c[5].len() == 2 {
        year = two_digit_year(year);
    }

    if let Some(date) = NaiveDate::from_ymd_opt(year, b, a) {
        return Some(DateDecision {
            iso: iso(date),
            ambiguous: a <= 12 && b <= 12 && a != b,
        });
    }
    NaiveDate::from_ymd_opt(year, a, b).map(|date| DateDecision {
        iso: iso(date),
        ambiguous: false,
    })
}

/// Numeric patterns first, then dates, otherwise leave the text alone.
/// The second element is set when a date conversion was ambiguous.
pub fn normalize_text(text: &str, opts: NormalizeOptions) -> (NormalizedCell, bool) {
    if let Some(n) = parse_number(text) {
        return (NormalizedCell::Number(n), false);
    }
    if opts.dates {
        if let Some(decision) = parse_date_dayfirst(text) {
            if decision.iso == text {
                return (NormalizedCell::Unchanged, false);
            }
            return (NormalizedCell::Text(decision.iso), decision.ambiguous);
        }
    }
    (NormalizedCell::Unchanged, false)
}

pub fn normalize_value(value: &Value, opts: NormalizeOptions) -> (NormalizedCell, bool) {
    match value {
        Value::Text(text) => normalize_text(text, opts),
        _ => (NormalizedCell::Unchanged, false),
    }
}

/// The text SQLite keeps when a REAL lands in a TEXT-affinity column.
fn real_as_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

/// Rewrite every recognizable cell of `table` in place, one transaction per table.
pub fn normalize_table(conn: &Connection, table: &str, opts: NormalizeOptions) -> Result<NormalizeStats> {
    let schema = table_schema(conn, table)?;
    let column_list = schema
        .ordered_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let width = schema.ordered_columns.len();
    let mut select = conn.prepare(&format!(
        "SELECT rowid, {column_list} FROM {}",
        quote_ident(table)
    ))?;
    let rows: Vec<(i64, Vec<Value>)> = select
        .query_map([], |row| {
            let rowid: i64 = row.get(0)?;
            let values = (1..=width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((rowid, values))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(select);

    let assignments = schema
        .ordered_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let update_sql = format!(
        "UPDATE {} SET {assignments} WHERE rowid = ?{}",
        quote_ident(table),
        schema.ordered_columns.len() + 1
    );

    let mut stats = NormalizeStats {
        table: table.to_string(),
        ..Default::default()
    };

    let tx = conn.unchecked_transaction()?;
    {
        let mut update = tx.prepare(&update_sql)?;
        for (rowid, values) in rows {
            stats.rows_scanned += 1;
            let mut changed = false;
            let mut new_values = Vec::with_capacity(values.len());
            for (index, (column, value)) in schema.ordered_columns.iter().zip(values).enumerate() {
                let (cell, ambiguous) = normalize_value(&value, opts);
                let replacement = match cell {
                    NormalizedCell::Unchanged => value,
                    NormalizedCell::Number(n) if schema.has_text_affinity(index) => {
                        let rendered = real_as_text(n);
                        if matches!(&value, Value::Text(t) if *t == rendered) {
                            value
                        } else {
                            debug!("{table}.{column} rowid {rowid}: {value:?} -> {rendered}");
                            stats.numbers += 1;
                            changed = true;
                            Value::Text(rendered)
                        }
                    }
                    NormalizedCell::Number(n) => {
                        debug!("{table}.{column} rowid {rowid}: {value:?} -> {n}");
                        stats.numbers += 1;
                        changed = true;
                        Value::Real(n)
                    }
                    NormalizedCell::Text(t) => {
                        if ambiguous {
                            warn!("{table}.{column} rowid {rowid}: ambiguous date {value:?} read day-first as {t}");
                            stats.ambiguous_dates += 1;
                        } else {
                            debug!("{table}.{column} rowid {rowid}: {value:?} -> {t}");
                        }
                        stats.dates += 1;
                        changed = true;
                        Value::Text(t)
                    }
                };
                new_values.push(replacement);
            }
            if changed {
                new_values.push(Value::Integer(rowid));
                update.execute(rusqlite::params_from_iter(new_values.iter()))?;
                stats.rows_updated += 1;
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Best effort over many tables: a failing table is recorded and skipped.
pub fn normalize_tables(conn: &Connection, tables: &[String], opts: NormalizeOptions) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    for table in tables {
        match normalize_table(conn, table, opts) {
            Ok(stats) => {
                info!(
                    "normalized {table}: {} of {} rows updated ({} numbers, {} dates, {} ambiguous)",
                    stats.rows_updated, stats.rows_scanned, stats.numbers, stats.dates, stats.ambiguous_dates
                );
                report.stage.success();
                report.tables.push(stats);
            }
            Err(e) => {
                warn!("normalization skipped for {table}: {e}");
                report.stage.failure(ErrorDetail::table(table, e.to_string()));
            }
        }
    }
    report
}
