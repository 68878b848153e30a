use std::path::{Path, PathBuf};

use log::{info, warn};
use rusqlite::Connection;

use crate::db::{backup_database, create_database, list_tables, quote_ident, ForeignKeysOff};
use crate::error::Result;
use crate::loader::{csv_path_for, is_empty_export, load_pair};
use crate::mdb::TableSource;
use crate::models::{ConvertReport, ResolvedPair, StageResult, TableOutcome, TableStatus};
use crate::normalizer::{normalize_tables, NormalizeOptions};
use crate::sync::{MigrationContext, Progress};

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub unescape: bool,
    pub normalize: NormalizeOptions,
}

/// Back up and remove an existing output database, and make sure its
/// directory exists. Returns the backup path when one was written.
pub fn prepare_output(output: &Path) -> Result<Option<PathBuf>> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if !output.exists() {
        return Ok(None);
    }
    let backup = {
        let conn = Connection::open(output)?;
        backup_database(&conn, output)?
    };
    std::fs::remove_file(output)?;
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut side = output.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            std::fs::remove_file(side)?;
        }
    }
    Ok(Some(backup))
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

/// Create `table` from the export header when the schema dump did not define
/// it. Columns are left untyped so normalized numbers keep their storage class.
fn create_table_from_header(conn: &Connection, table: &str, csv_path: &Path) -> Result<()> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(csv_path)?;
    let columns = rdr
        .headers()?
        .iter()
        .map(|c| quote_ident(c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!("CREATE TABLE {} ({columns});", quote_ident(table)))?;
    Ok(())
}

/// Build a fresh SQLite database from the source: schema, every table's rows,
/// then a normalization pass over everything.
pub fn convert<S: TableSource>(
    source: S,
    output: &Path,
    opts: ConvertOptions,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<ConvertReport> {
    // Read everything that can fail fatally before the output is touched.
    let schema_sql = source.export_schema()?;
    let tables = source.list_tables()?;
    info!("{} tables in {}", tables.len(), source.describe());

    let backup = prepare_output(output)?;
    if let Some(path) = &backup {
        progress(Progress::BackupCreated(path));
    }
    let conn = create_database(output)?;
    conn.execute_batch(&schema_sql)?;

    let ctx = MigrationContext::new(conn, output, source)?;
    let conn = &ctx.destination;
    let mut outcomes = Vec::with_capacity(tables.len());
    {
        let _fk = ForeignKeysOff::new(conn)?;
        for (i, table) in tables.iter().enumerate() {
            let pair = ResolvedPair::new(table, table);
            progress(Progress::Exporting(&pair));
            let csv_path = csv_path_for(ctx.scratch_path(), i, table);
            if let Err(e) = ctx.source.export_table(table, &csv_path) {
                let message = format!("export failed: {e}");
                progress(Progress::Rejected(&pair, &message));
                outcomes.push(TableOutcome {
                    pair,
                    status: TableStatus::Failed(message),
                    rows: StageResult::default(),
                });
                continue;
            }

            if !table_exists(conn, table)? && !is_empty_export(&csv_path)? {
                match create_table_from_header(conn, table, &csv_path) {
                    Ok(()) => progress(Progress::TableCreated(table)),
                    Err(e) => warn!("could not create {table} from its export header: {e}"),
                }
            }

            let outcome = load_pair(conn, &pair, &csv_path, opts.unescape);
            progress(Progress::Loaded(&outcome));
            outcomes.push(outcome);
        }
    }

    let all_tables = list_tables(conn, None)?;
    progress(Progress::Normalizing(all_tables.len()));
    let normalize = normalize_tables(conn, &all_tables, opts.normalize);

    let report = ConvertReport {
        output: output.to_path_buf(),
        backup,
        tables: outcomes,
        normalize,
        scratch_dir: ctx.scratch_path().to_path_buf(),
    };
    ctx.finish()?;
    Ok(report)
}
