use colored::Colorize;

use crate::cli::{absolute, confirm, narrate, outcome_table};
use crate::error::{GestyError, Result};
use crate::fmt::{preview, step_banner};
use crate::mdb::{MdbTools, TableSource};
use crate::models::SyncReport;
use crate::normalizer::NormalizeOptions;
use crate::settings::load_settings;
use crate::sync::{execute, plan, MigrationContext, SyncOptions};

pub struct SyncArgs<'a> {
    pub source: &'a str,
    pub destination: Option<&'a str>,
    pub yes: bool,
    pub no_backup: bool,
    pub normalize: bool,
    pub prefix: Option<&'a str>,
}

pub fn run(args: SyncArgs<'_>) -> Result<()> {
    let settings = load_settings();
    let source_path = absolute(args.source)?;
    let dest_path = absolute(args.destination.unwrap_or(&settings.destination))?;

    let mdb = MdbTools::open(&source_path, &settings)?;
    if !dest_path.is_file() {
        return Err(GestyError::DestinationNotFound(dest_path.display().to_string()));
    }

    println!("{}", step_banner("MDB -> SQLITE SYNC"));
    println!("  Source:      {}", source_path.display());
    println!("  Destination: {}", dest_path.display());

    mdb.check_available()?;

    let opts = SyncOptions {
        table_prefix: args.prefix.unwrap_or(&settings.table_prefix).to_string(),
        mapping: settings.table_mapping.clone(),
        backup: settings.backup_before_sync && !args.no_backup,
        unescape: settings.escape_newlines,
        normalize: args.normalize.then_some(NormalizeOptions {
            dates: settings.normalize_dates,
        }),
    };

    let ctx = MigrationContext::open(&dest_path, mdb)?;

    println!("{}", step_banner("TABLES"));
    let plan = plan(&ctx, &opts)?;
    println!("  {} tables in the MDB file", plan.source_tables.len());
    println!(
        "  {} {}* tables in the SQLite database",
        plan.destination_tables.len(),
        opts.table_prefix
    );

    if plan.pairs.is_empty() {
        println!("\n  {}", "No tables in common, nothing to synchronize.".yellow());
        println!("  MDB tables:    {}", preview(&plan.source_tables, 5));
        println!("  SQLite tables: {}", preview(&plan.destination_tables, 5));
        return ctx.finish();
    }

    println!("\n  Tables to synchronize: {}", plan.pairs.len());
    for pair in &plan.pairs {
        println!("     - {}", pair.label());
    }

    if !args.yes {
        let prompt = format!(
            "All rows in these {}* tables will be deleted and replaced. Continue?",
            opts.table_prefix
        );
        if !confirm(&prompt)? {
            println!("{}", "Cancelled.".red());
            return ctx.finish();
        }
    }

    println!("{}", step_banner("SYNCHRONIZING"));
    println!("  Scratch directory: {}", ctx.scratch_path().display());
    let report = execute(&ctx, &plan.pairs, &opts, &mut narrate)?;
    print_summary(&report, ctx.source.describe());
    ctx.finish()?;
    println!("\n  Temporary files removed: {}", report.scratch_dir.display());
    Ok(())
}

fn print_summary(report: &SyncReport, source: String) {
    println!("{}", step_banner("SUMMARY"));
    println!("{}", outcome_table(&report.tables, &report.counts));
    println!();
    println!("  Source:          {source}");
    if let Some(backup) = &report.backup {
        println!("  Backup:          {}", backup.display());
    }
    println!(
        "  Tables synced:   {} of {}",
        report.tables_synced().to_string().green(),
        report.pairs.len()
    );
    let failed = report.tables_failed();
    if failed > 0 {
        println!("  Tables failed:   {}", failed.to_string().red());
    } else {
        println!("  Tables failed:   0");
    }
    println!("  Rows imported:   {}", report.rows_imported());
    println!("  Rows failed:     {}", report.rows_failed());
    if report.clear.failed > 0 {
        println!("  Clear failures:  {}", report.clear.failed);
        for detail in &report.clear.errors {
            println!("      {detail}");
        }
    }
    if let Some(normalize) = &report.normalize {
        let updated: usize = normalize.tables.iter().map(|t| t.rows_updated).sum();
        let ambiguous: usize = normalize.tables.iter().map(|t| t.ambiguous_dates).sum();
        println!(
            "  Normalized:      {} rows updated in {} tables ({} failed, {} ambiguous dates)",
            updated, normalize.stage.succeeded, normalize.stage.failed, ambiguous
        );
    }
    if failed == 0 && report.rows_failed() == 0 {
        println!("\n  {}", "SYNC COMPLETE".green().bold());
    } else {
        println!("\n  {}", "SYNC COMPLETE WITH ERRORS".yellow().bold());
    }
}
