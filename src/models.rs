use std::path::PathBuf;

/// A table as reported by schema introspection at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub ordered_columns: Vec<String>,
    /// Declared column types, parallel to `ordered_columns`; empty when untyped.
    pub declared_types: Vec<String>,
}

impl TableSchema {
    /// SQLite stores anything written to a column with TEXT affinity as text.
    pub fn has_text_affinity(&self, index: usize) -> bool {
        let declared = self
            .declared_types
            .get(index)
            .map(|t| t.to_ascii_uppercase())
            .unwrap_or_default();
        !declared.contains("INT")
            && ["CHAR", "CLOB", "TEXT"].iter().any(|k| declared.contains(k))
    }
}

/// A (destination, source) table pair selected for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub destination: String,
    pub source: String,
}

impl ResolvedPair {
    pub fn new(destination: &str, source: &str) -> Self {
        Self {
            destination: destination.to_string(),
            source: source.to_string(),
        }
    }

    pub fn is_renamed(&self) -> bool {
        self.destination != self.source
    }

    /// `dest` or `dest <- source` for console output.
    pub fn label(&self) -> String {
        if self.is_renamed() {
            format!("{} <- {}", self.destination, self.source)
        } else {
            self.destination.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub table: String,
    /// 1-based data row number within the export, when the failure is row-level.
    pub row: Option<usize>,
    pub message: String,
}

impl ErrorDetail {
    pub fn table(table: &str, message: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            row: None,
            message: message.into(),
        }
    }

    pub fn row(table: &str, row: usize, message: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            row: Some(row),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.row {
            Some(row) => write!(f, "{} row {}: {}", self.table, row, self.message),
            None => write!(f, "{}: {}", self.table, self.message),
        }
    }
}

/// Outcome of one best-effort stage. Failures are data, not early returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<ErrorDetail>,
}

impl StageResult {
    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn failure(&mut self, detail: ErrorDetail) {
        self.failed += 1;
        self.errors.push(detail);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableStatus {
    /// Rows were loaded; `rows.failed` may still be non-zero.
    Loaded,
    /// The source export had no data rows.
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub pair: ResolvedPair,
    pub status: TableStatus,
    /// Per-row insert results. `succeeded` is the imported row count.
    pub rows: StageResult,
}

impl TableOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, TableStatus::Failed(_))
    }
}

/// Per-table normalization counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeStats {
    pub table: String,
    pub rows_scanned: usize,
    pub rows_updated: usize,
    pub numbers: usize,
    pub dates: usize,
    pub ambiguous_dates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub tables: Vec<NormalizeStats>,
    pub stage: StageResult,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pairs: Vec<ResolvedPair>,
    pub backup: Option<PathBuf>,
    pub clear: StageResult,
    pub tables: Vec<TableOutcome>,
    pub normalize: Option<NormalizeReport>,
    /// Final record count per destination table; `None` when the count failed.
    pub counts: Vec<(String, Option<i64>)>,
    pub scratch_dir: PathBuf,
}

impl SyncReport {
    pub fn tables_synced(&self) -> usize {
        self.tables.iter().filter(|t| t.is_success()).count()
    }

    pub fn tables_failed(&self) -> usize {
        self.tables.len() - self.tables_synced()
    }

    pub fn rows_imported(&self) -> usize {
        self.tables.iter().map(|t| t.rows.succeeded).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.tables.iter().map(|t| t.rows.failed).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub output: PathBuf,
    pub backup: Option<PathBuf>,
    pub tables: Vec<TableOutcome>,
    pub normalize: NormalizeReport,
    pub scratch_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(dest: &str, status: TableStatus, ok: usize, failed: usize) -> TableOutcome {
        TableOutcome {
            pair: ResolvedPair::new(dest, dest),
            status,
            rows: StageResult {
                succeeded: ok,
                failed,
                errors: Vec::new(),
            },
        }
    }

    #[test]
    fn test_sync_report_totals() {
        let report = SyncReport {
            pairs: Vec::new(),
            backup: None,
            clear: StageResult::default(),
            tables: vec![
                outcome("t_articoli", TableStatus::Loaded, 9, 1),
                outcome("t_iva", TableStatus::Empty, 0, 0),
                outcome("t_banche", TableStatus::Failed("export failed".into()), 0, 0),
            ],
            normalize: None,
            counts: Vec::new(),
            scratch_dir: PathBuf::from("/tmp/none"),
        };
        assert_eq!(report.tables_synced(), 2);
        assert_eq!(report.tables_failed(), 1);
        assert_eq!(report.rows_imported(), 9);
        assert_eq!(report.rows_failed(), 1);
    }

    #[test]
    fn test_text_affinity() {
        let schema = TableSchema {
            name: "t_conferme".into(),
            ordered_columns: ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
            declared_types: ["TEXT", "varchar(50)", "INTEGER", "", "POINT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        assert!(schema.has_text_affinity(0));
        assert!(schema.has_text_affinity(1));
        assert!(!schema.has_text_affinity(2));
        assert!(!schema.has_text_affinity(3));
        // "POINT" contains "INT", so SQLite gives it integer affinity.
        assert!(!schema.has_text_affinity(4));
        assert!(!schema.has_text_affinity(9));
    }

    #[test]
    fn test_pair_label() {
        assert_eq!(ResolvedPair::new("t_iva", "t_iva").label(), "t_iva");
        assert_eq!(
            ResolvedPair::new("t_venditore_offre", "t_venditori_offre").label(),
            "t_venditore_offre <- t_venditori_offre"
        );
    }

    #[test]
    fn test_error_detail_display() {
        assert_eq!(
            ErrorDetail::row("t_conferme", 3, "UNIQUE constraint failed").to_string(),
            "t_conferme row 3: UNIQUE constraint failed"
        );
        assert_eq!(ErrorDetail::table("t_iva", "locked").to_string(), "t_iva: locked");
    }
}
