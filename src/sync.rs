use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rusqlite::Connection;
use tempfile::TempDir;

use crate::db::{backup_database, clear_table, list_tables, open_destination, table_count, ForeignKeysOff};
use crate::error::Result;
use crate::loader::{check_export, csv_path_for, load_csv};
use crate::mdb::TableSource;
use crate::models::{
    ErrorDetail, ResolvedPair, StageResult, SyncReport, TableOutcome, TableSchema, TableStatus,
};
use crate::normalizer::{normalize_tables, NormalizeOptions};
use crate::resolver::resolve_pairs;

/// Step-by-step events for console narration.
#[derive(Debug)]
pub enum Progress<'a> {
    BackupCreated(&'a Path),
    Exporting(&'a ResolvedPair),
    Rejected(&'a ResolvedPair, &'a str),
    Cleared(&'a str, usize),
    ClearFailed(&'a str, &'a str),
    TableCreated(&'a str),
    Loaded(&'a TableOutcome),
    Normalizing(usize),
}

/// Everything one run holds: the destination connection, the source, and a
/// scratch directory for exports. Dropping the context closes the connection
/// and deletes the scratch directory, whether the run succeeded or not.
pub struct MigrationContext<S: TableSource> {
    pub destination: Connection,
    pub db_path: PathBuf,
    pub source: S,
    scratch: TempDir,
}

impl<S: TableSource> MigrationContext<S> {
    pub fn new(destination: Connection, db_path: &Path, source: S) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("mdb_migration_").tempdir()?;
        info!("scratch directory {}", scratch.path().display());
        Ok(Self {
            destination,
            db_path: db_path.to_path_buf(),
            source,
            scratch,
        })
    }

    /// Open an existing destination store. Missing or unreadable is fatal.
    pub fn open(db_path: &Path, source: S) -> Result<Self> {
        let conn = open_destination(db_path)?;
        Self::new(conn, db_path, source)
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Close the connection and remove the scratch directory.
    pub fn finish(self) -> Result<()> {
        let Self {
            destination, scratch, ..
        } = self;
        if let Err((_conn, e)) = destination.close() {
            warn!("closing destination: {e}");
        }
        scratch.close()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub table_prefix: String,
    pub mapping: BTreeMap<String, String>,
    pub backup: bool,
    pub unescape: bool,
    pub normalize: Option<NormalizeOptions>,
}

/// Both table listings and the pairs resolved from them.
#[derive(Debug, Clone)]
pub struct Plan {
    pub source_tables: Vec<String>,
    pub destination_tables: Vec<String>,
    pub pairs: Vec<ResolvedPair>,
}

/// Enumerate both schemas and resolve the pairs to synchronize.
pub fn plan<S: TableSource>(ctx: &MigrationContext<S>, opts: &SyncOptions) -> Result<Plan> {
    let source_tables = ctx.source.list_tables()?;
    let prefix = (!opts.table_prefix.is_empty()).then_some(opts.table_prefix.as_str());
    let destination_tables = list_tables(&ctx.destination, prefix)?;
    info!(
        "{} source tables, {} destination tables",
        source_tables.len(),
        destination_tables.len()
    );
    let pairs = resolve_pairs(&destination_tables, &source_tables, &opts.mapping);
    Ok(Plan {
        source_tables,
        destination_tables,
        pairs,
    })
}

/// Export, clear and reload every pair.
///
/// All exports run, and each export header is checked against its destination
/// table, before anything is deleted. A table whose export or check fails
/// keeps its current rows. Tables are cleared in reverse pair order and
/// reloaded in pair order, with foreign keys suspended for both phases.
pub fn execute<S: TableSource>(
    ctx: &MigrationContext<S>,
    pairs: &[ResolvedPair],
    opts: &SyncOptions,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<SyncReport> {
    let conn = &ctx.destination;

    let backup = if opts.backup {
        let path = backup_database(conn, &ctx.db_path)?;
        progress(Progress::BackupCreated(&path));
        Some(path)
    } else {
        None
    };

    let mut outcomes: Vec<Option<TableOutcome>> = vec![None; pairs.len()];
    // Pairs that exported cleanly and passed the table-level checks, with the
    // destination schema (`None` for an empty export).
    let mut exported: Vec<(usize, PathBuf, Option<TableSchema>)> = Vec::new();
    for (i, pair) in pairs.iter().enumerate() {
        progress(Progress::Exporting(pair));
        let csv_path = csv_path_for(ctx.scratch_path(), i, &pair.source);
        let checked = ctx
            .source
            .export_table(&pair.source, &csv_path)
            .map_err(|e| format!("export failed: {e}"))
            .and_then(|()| check_export(conn, pair, &csv_path).map_err(|e| e.to_string()));
        match checked {
            Ok(schema) => exported.push((i, csv_path, schema)),
            Err(message) => {
                progress(Progress::Rejected(pair, &message));
                outcomes[i] = Some(TableOutcome {
                    pair: pair.clone(),
                    status: TableStatus::Failed(message),
                    rows: StageResult::default(),
                });
            }
        }
    }

    let mut clear = StageResult::default();
    {
        let _fk = ForeignKeysOff::new(conn)?;

        let mut cleared = vec![false; pairs.len()];
        for (i, _, _) in exported.iter().rev() {
            let table = &pairs[*i].destination;
            match clear_table(conn, table) {
                Ok(n) => {
                    progress(Progress::Cleared(table, n));
                    clear.success();
                    cleared[*i] = true;
                }
                Err(e) => {
                    let message = e.to_string();
                    progress(Progress::ClearFailed(table, &message));
                    clear.failure(ErrorDetail::table(table, message.clone()));
                    outcomes[*i] = Some(TableOutcome {
                        pair: pairs[*i].clone(),
                        status: TableStatus::Failed(format!("clear failed: {message}")),
                        rows: StageResult::default(),
                    });
                }
            }
        }

        for (i, csv_path, schema) in &exported {
            if !cleared[*i] {
                continue;
            }
            let pair = pairs[*i].clone();
            let outcome = match schema {
                None => TableOutcome {
                    pair,
                    status: TableStatus::Empty,
                    rows: StageResult::default(),
                },
                Some(schema) => match load_csv(conn, schema, csv_path, opts.unescape) {
                    Ok(rows) => TableOutcome {
                        pair,
                        status: TableStatus::Loaded,
                        rows,
                    },
                    Err(e) => TableOutcome {
                        pair,
                        status: TableStatus::Failed(e.to_string()),
                        rows: StageResult::default(),
                    },
                },
            };
            progress(Progress::Loaded(&outcome));
            outcomes[*i] = Some(outcome);
        }
    }

    let tables: Vec<TableOutcome> = outcomes.into_iter().flatten().collect();

    let normalize = opts.normalize.map(|nopts| {
        let loaded: Vec<String> = tables
            .iter()
            .filter(|t| t.status == TableStatus::Loaded)
            .map(|t| t.pair.destination.clone())
            .collect();
        progress(Progress::Normalizing(loaded.len()));
        normalize_tables(conn, &loaded, nopts)
    });

    let counts = pairs
        .iter()
        .map(|p| (p.destination.clone(), table_count(conn, &p.destination).ok()))
        .collect();

    Ok(SyncReport {
        pairs: pairs.to_vec(),
        backup,
        clear,
        tables,
        normalize,
        counts,
        scratch_dir: ctx.scratch_path().to_path_buf(),
    })
}
