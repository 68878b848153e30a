use colored::Colorize;
use comfy_table::Table;

use crate::cli::absolute;
use crate::db::{open_destination, table_count};
use crate::error::Result;
use crate::fmt::{preview, step_banner};
use crate::mdb::{MdbTools, TableSource};
use crate::settings::load_settings;
use crate::sync::{plan, MigrationContext, SyncOptions};

pub fn run(source: &str, destination: Option<&str>, prefix: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let source_path = absolute(source)?;
    let dest_path = absolute(destination.unwrap_or(&settings.destination))?;

    let mdb = MdbTools::open(&source_path, &settings)?;
    let conn = open_destination(&dest_path)?;
    mdb.check_available()?;

    let opts = SyncOptions {
        table_prefix: prefix.unwrap_or(&settings.table_prefix).to_string(),
        mapping: settings.table_mapping.clone(),
        backup: false,
        unescape: settings.escape_newlines,
        normalize: None,
    };
    let ctx = MigrationContext::new(conn, &dest_path, mdb)?;
    let plan = plan(&ctx, &opts)?;

    println!("{}", step_banner("SYNC PLAN"));
    println!("  Source:      {}", source_path.display());
    println!("  Destination: {}", dest_path.display());
    println!(
        "  {} MDB tables, {} {}* SQLite tables",
        plan.source_tables.len(),
        plan.destination_tables.len(),
        opts.table_prefix
    );

    if plan.pairs.is_empty() {
        println!("\n  {}", "No tables in common, nothing to synchronize.".yellow());
        println!("  MDB tables:    {}", preview(&plan.source_tables, 5));
        println!("  SQLite tables: {}", preview(&plan.destination_tables, 5));
        return ctx.finish();
    }

    let mut table = Table::new();
    table.set_header(vec!["SQLite table", "MDB table", "Current records"]);
    for pair in &plan.pairs {
        let source = if pair.is_renamed() {
            pair.source.cyan().to_string()
        } else {
            pair.source.clone()
        };
        let count = table_count(&ctx.destination, &pair.destination)
            .map(|c| c.to_string())
            .unwrap_or_else(|e| format!("error: {e}"));
        table.add_row(vec![pair.destination.clone(), source, count]);
    }
    println!("{table}");

    let unmatched: Vec<String> = plan
        .destination_tables
        .iter()
        .filter(|t| !plan.pairs.iter().any(|p| p.destination == **t))
        .cloned()
        .collect();
    if !unmatched.is_empty() {
        println!(
            "  {} SQLite tables without an MDB counterpart: {}",
            unmatched.len(),
            preview(&unmatched, 10)
        );
    }
    ctx.finish()
}
