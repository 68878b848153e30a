use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::cli::normalize::normalize_summary;
use crate::cli::{absolute, narrate, outcome_table};
use crate::converter::{convert, ConvertOptions};
use crate::error::Result;
use crate::fmt::step_banner;
use crate::mdb::{MdbTools, TableSource};
use crate::normalizer::NormalizeOptions;
use crate::settings::load_settings;

/// `output/<source stem>.db`, relative to the working directory.
fn default_output(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db_gesty".to_string());
    PathBuf::from("output").join(format!("{stem}.db"))
}

pub fn run(source: &str, output: Option<&str>, no_dates: bool) -> Result<()> {
    let settings = load_settings();
    let source_path = absolute(source)?;
    let output_path = match output {
        Some(p) => absolute(p)?,
        None => std::path::absolute(default_output(&source_path))?,
    };

    let mdb = MdbTools::open(&source_path, &settings)?;
    mdb.check_available()?;

    println!("{}", step_banner("MDB -> SQLITE CONVERT"));
    println!("  Source: {}", source_path.display());
    println!("  Output: {}", output_path.display());

    let opts = ConvertOptions {
        unescape: settings.escape_newlines,
        normalize: NormalizeOptions {
            dates: settings.normalize_dates && !no_dates,
        },
    };
    let report = convert(mdb, &output_path, opts, &mut narrate)?;

    println!("{}", step_banner("SUMMARY"));
    println!("{}", outcome_table(&report.tables, &[]));
    println!("{}", normalize_summary(&report.normalize));
    for detail in &report.normalize.stage.errors {
        println!("  {} {detail}", "\u{2717}".red());
    }
    if let Some(backup) = &report.backup {
        println!("  Previous output saved to {}", backup.display());
    }
    println!("  Temporary files removed: {}", report.scratch_dir.display());
    let failed = report.tables.iter().filter(|t| !t.is_success()).count();
    if failed == 0 {
        println!("\n  {} {}", "CONVERT COMPLETE".green().bold(), report.output.display());
    } else {
        println!(
            "\n  {} {} ({failed} tables failed)",
            "CONVERT COMPLETE WITH ERRORS".yellow().bold(),
            report.output.display()
        );
    }
    Ok(())
}
