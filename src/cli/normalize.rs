use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::absolute;
use crate::db::{backup_database, list_tables, open_destination};
use crate::error::{GestyError, Result};
use crate::fmt::step_banner;
use crate::models::NormalizeReport;
use crate::normalizer::{normalize_tables, NormalizeOptions};
use crate::settings::load_settings;

pub fn run(database: &str, tables: &[String], no_dates: bool, no_backup: bool) -> Result<()> {
    let settings = load_settings();
    let db_path = absolute(database)?;
    let conn = open_destination(&db_path)?;

    let existing = list_tables(&conn, None)?;
    let targets = if tables.is_empty() {
        existing
    } else {
        if let Some(missing) = tables.iter().find(|t| !existing.contains(t)) {
            return Err(GestyError::Other(format!("no such table: {missing}")));
        }
        tables.to_vec()
    };

    println!("{}", step_banner("NORMALIZE"));
    println!("  Database: {}", db_path.display());
    if !no_backup {
        let backup = backup_database(&conn, &db_path)?;
        println!("  {} backup: {}", "\u{2713}".green(), backup.display());
    }

    let opts = NormalizeOptions {
        dates: settings.normalize_dates && !no_dates,
    };
    let report = normalize_tables(&conn, &targets, opts);
    println!("{}", normalize_summary(&report));
    for detail in &report.stage.errors {
        println!("  {} {detail}", "\u{2717}".red());
    }
    Ok(())
}

/// Per-table normalization counters.
pub(crate) fn normalize_summary(report: &NormalizeReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Table", "Rows", "Updated", "Numbers", "Dates", "Ambiguous"]);
    for stats in &report.tables {
        let ambiguous = if stats.ambiguous_dates > 0 {
            stats.ambiguous_dates.to_string().yellow().to_string()
        } else {
            "0".to_string()
        };
        table.add_row(vec![
            Cell::new(&stats.table),
            Cell::new(stats.rows_scanned),
            Cell::new(stats.rows_updated),
            Cell::new(stats.numbers),
            Cell::new(stats.dates),
            Cell::new(ambiguous),
        ]);
    }
    table
}
