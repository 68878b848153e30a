pub mod backup;
pub mod config;
pub mod convert;
pub mod normalize;
pub mod plan;
pub mod sync;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Cell, Table};
use dialoguer::Confirm;

use crate::error::{GestyError, Result};
use crate::loader::SHOWN_ROW_ERRORS;
use crate::models::{TableOutcome, TableStatus};
use crate::sync::Progress;

#[derive(Parser)]
#[command(
    name = "gesty-migrate",
    version,
    about = "Migrate the legacy Gesty Access database into SQLite."
)]
pub struct Cli {
    /// Log every normalization decision
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clear and reload every t_* table shared by the MDB file and the SQLite database.
    ///
    /// The confirmation prompt needs an interactive terminal. When stdin is
    /// piped or redirected, pass --yes, otherwise the run stops with a prompt
    /// error before anything is changed.
    Sync {
        /// Path to the .mdb file
        source: String,
        /// SQLite database to update (default: settings `destination`)
        destination: Option<String>,
        /// Skip the confirmation prompt (required when stdin is not a terminal)
        #[arg(short, long)]
        yes: bool,
        /// Do not write a timestamped backup before clearing tables
        #[arg(long = "no-backup")]
        no_backup: bool,
        /// Normalize numbers and dates in the reloaded tables
        #[arg(long)]
        normalize: bool,
        /// Only consider destination tables with this prefix (default: settings `table_prefix`)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Show which tables a sync would touch, without changing anything.
    Plan {
        /// Path to the .mdb file
        source: String,
        /// SQLite database to compare against
        destination: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Build a new SQLite database from an MDB file: schema, data, normalization.
    Convert {
        /// Path to the .mdb file
        source: String,
        /// Output database (default: output/<source stem>.db)
        #[arg(long)]
        output: Option<String>,
        /// Leave date-like text as it is
        #[arg(long = "no-dates")]
        no_dates: bool,
    },
    /// Rewrite European-format numbers and day-first dates in place.
    Normalize {
        /// SQLite database to normalize
        database: String,
        /// Restrict to these tables (repeatable; default: all tables)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Leave date-like text as it is
        #[arg(long = "no-dates")]
        no_dates: bool,
        /// Do not write a timestamped backup first
        #[arg(long = "no-backup")]
        no_backup: bool,
    },
    /// Write a timestamped backup next to a database.
    Backup {
        /// SQLite database to back up
        database: String,
    },
    /// Show the effective settings.
    Config {
        /// Write the default settings file if none exists
        #[arg(long)]
        init: bool,
    },
}

pub(crate) fn absolute(path: &str) -> Result<PathBuf> {
    Ok(std::path::absolute(Path::new(path))?)
}

/// Ask before destroying data. `false` means the user declined.
pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| GestyError::Prompt(e.to_string()))
}

/// Console narration for pipeline progress events.
pub(crate) fn narrate(event: Progress<'_>) {
    match event {
        Progress::BackupCreated(path) => {
            println!("  {} backup: {}", "\u{2713}".green(), path.display())
        }
        Progress::Exporting(pair) => println!("  exporting {}", pair.label()),
        Progress::Rejected(pair, message) => {
            println!("  {} {}: {message}", "\u{2717}".red(), pair.label())
        }
        Progress::Cleared(table, n) => println!("  {table}: {n} records deleted"),
        Progress::ClearFailed(table, message) => {
            println!("  {} {table}: could not clear ({message})", "\u{26a0}".yellow())
        }
        Progress::TableCreated(table) => println!("  {table}: created from export header"),
        Progress::Loaded(outcome) => print_outcome_line(outcome),
        Progress::Normalizing(n) => println!("  normalizing {n} tables"),
    }
}

fn print_outcome_line(outcome: &TableOutcome) {
    let label = outcome.pair.label();
    match &outcome.status {
        TableStatus::Empty => println!("  {} {label}: empty table, skipped", "\u{2713}".green()),
        TableStatus::Loaded if outcome.rows.failed == 0 => println!(
            "  {} {label}: {} records imported",
            "\u{2713}".green(),
            outcome.rows.succeeded
        ),
        TableStatus::Loaded => {
            println!(
                "  {} {label}: {} records imported, {} rows not imported",
                "\u{26a0}".yellow(),
                outcome.rows.succeeded,
                outcome.rows.failed
            );
            for detail in outcome.rows.errors.iter().take(SHOWN_ROW_ERRORS) {
                println!("      {detail}");
            }
        }
        TableStatus::Failed(message) => println!("  {} {label}: {message}", "\u{2717}".red()),
    }
}

/// Per-table summary table.
pub(crate) fn outcome_table(outcomes: &[TableOutcome], counts: &[(String, Option<i64>)]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Table", "Source", "Status", "Imported", "Failed", "Records"]);
    for outcome in outcomes {
        let status = match &outcome.status {
            TableStatus::Loaded => "loaded".green().to_string(),
            TableStatus::Empty => "empty".to_string(),
            TableStatus::Failed(_) => "failed".red().to_string(),
        };
        let records = counts
            .iter()
            .find(|(name, _)| *name == outcome.pair.destination)
            .and_then(|(_, c)| *c)
            .map(|c| c.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&outcome.pair.destination),
            Cell::new(&outcome.pair.source),
            Cell::new(status),
            Cell::new(outcome.rows.succeeded),
            Cell::new(outcome.rows.failed),
            Cell::new(records),
        ]);
    }
    table
}
