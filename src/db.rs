use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, warn};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};

use crate::error::{GestyError, Result};
use crate::models::TableSchema;

/// Open an existing destination store. Never creates the file.
pub fn open_destination(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        return Err(GestyError::DestinationNotFound(db_path.display().to_string()));
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    // Fails with "file is not a database" before anything is touched.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))?;
    Ok(conn)
}

/// Create (or open) a database file for the bulk converter.
pub fn create_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Quote an identifier for interpolation into SQL. Table names come from
/// external schemas, so they are never trusted as-is.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// User tables ordered by name, optionally restricted to a name prefix.
pub fn list_tables(conn: &Connection, prefix: Option<&str>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(match prefix {
        Some(p) if !p.is_empty() => names.into_iter().filter(|n| n.starts_with(p)).collect(),
        _ => names,
    })
}

pub fn table_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(GestyError::Other(format!("no such table: {table}")));
    }
    let (ordered_columns, declared_types) = columns.into_iter().unzip();
    Ok(TableSchema {
        name: table.to_string(),
        ordered_columns,
        declared_types,
    })
}

pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Delete every row of `table`, returning the number removed.
pub fn clear_table(conn: &Connection, table: &str) -> Result<usize> {
    let deleted = conn.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;
    Ok(deleted)
}

/// Suspends foreign-key enforcement for its lifetime and restores the
/// previous setting on drop, including on early return and unwind.
pub struct ForeignKeysOff<'c> {
    conn: &'c Connection,
    restore: bool,
}

impl<'c> ForeignKeysOff<'c> {
    pub fn new(conn: &'c Connection) -> Result<Self> {
        let enabled: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        debug!("foreign key enforcement suspended");
        Ok(Self {
            conn,
            restore: enabled != 0,
        })
    }
}

impl Drop for ForeignKeysOff<'_> {
    fn drop(&mut self) {
        if !self.restore {
            return;
        }
        match self.conn.execute_batch("PRAGMA foreign_keys = ON;") {
            Ok(()) => debug!("foreign key enforcement restored"),
            Err(e) => warn!("could not re-enable foreign keys: {e}"),
        }
    }
}

/// `<dir>/<stem>_backup_<YYYYMMDD_HHMMSS>.<ext>` next to the database.
pub fn backup_path_for(db_path: &Path, at: NaiveDateTime) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let stamp = at.format("%Y%m%d_%H%M%S");
    let name = match db_path.extension() {
        Some(ext) => format!("{stem}_backup_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_backup_{stamp}"),
    };
    db_path.with_file_name(name)
}

/// Copy the live database behind `conn` to a timestamped file beside `db_path`.
pub fn backup_database(conn: &Connection, db_path: &Path) -> Result<PathBuf> {
    let dest_path = backup_path_for(db_path, chrono::Local::now().naive_local());
    let mut dest_conn = Connection::open(&dest_path)?;
    let backup = Backup::new(conn, &mut dest_conn)?;
    backup.run_to_completion(100, Duration::from_millis(10), None)?;
    debug!("backup written to {}", dest_path.display());
    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, PathBuf, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db_gesty.db");
        let conn = create_database(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t_pagamenti (id_pagamento INTEGER PRIMARY KEY, tipo_pagamento TEXT);
             CREATE TABLE t_conferme (
                 id_conferma INTEGER PRIMARY KEY,
                 condizioni_pag INTEGER,
                 FOREIGN KEY (condizioni_pag) REFERENCES t_pagamenti(id_pagamento)
             );
             CREATE TABLE utenti (id INTEGER PRIMARY KEY);
             INSERT INTO t_pagamenti VALUES (1, 'Bonifico 30gg');
             INSERT INTO t_conferme VALUES (10, 1);",
        )
        .unwrap();
        (dir, path, conn)
    }

    #[test]
    fn test_open_destination_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        let err = open_destination(&missing).unwrap_err();
        assert!(matches!(err, GestyError::DestinationNotFound(_)));
        assert!(!missing.exists(), "opening must not create the file");
    }

    #[test]
    fn test_open_destination_rejects_non_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.db");
        std::fs::write(&path, "not a sqlite file\n".repeat(512)).unwrap();
        assert!(open_destination(&path).is_err());
    }

    #[test]
    fn test_list_tables_with_prefix() {
        let (_dir, _path, conn) = test_db();
        assert_eq!(
            list_tables(&conn, Some("t_")).unwrap(),
            vec!["t_conferme".to_string(), "t_pagamenti".to_string()]
        );
        assert_eq!(list_tables(&conn, None).unwrap().len(), 3);
    }

    #[test]
    fn test_prefix_underscore_is_literal() {
        let (_dir, _path, conn) = test_db();
        conn.execute_batch("CREATE TABLE tx_log (id INTEGER);").unwrap();
        let tables = list_tables(&conn, Some("t_")).unwrap();
        assert!(!tables.contains(&"tx_log".to_string()));
    }

    #[test]
    fn test_table_schema_column_order() {
        let (_dir, _path, conn) = test_db();
        let schema = table_schema(&conn, "t_conferme").unwrap();
        assert_eq!(schema.ordered_columns, vec!["id_conferma", "condizioni_pag"]);
        assert!(table_schema(&conn, "t_nope").is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("t_iva"), "\"t_iva\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_foreign_keys_guard_restores_enforcement() {
        let (_dir, _path, conn) = test_db();
        {
            let _fk = ForeignKeysOff::new(&conn).unwrap();
            let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
            assert_eq!(on, 0);
            // Parent can be removed while enforcement is off.
            assert_eq!(clear_table(&conn, "t_pagamenti").unwrap(), 1);
        }
        let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn test_foreign_keys_guard_restores_on_error_path() {
        let (_dir, _path, conn) = test_db();
        let attempt = || -> Result<()> {
            let _fk = ForeignKeysOff::new(&conn)?;
            clear_table(&conn, "t_missing")?;
            Ok(())
        };
        assert!(attempt().is_err());
        let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn test_backup_path_pattern() {
        let at = chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 5, 30)
            .unwrap();
        assert_eq!(
            backup_path_for(Path::new("/srv/backend/db_gesty.db"), at),
            PathBuf::from("/srv/backend/db_gesty_backup_20240115_090530.db")
        );
        assert_eq!(
            backup_path_for(Path::new("/srv/data"), at),
            PathBuf::from("/srv/data_backup_20240115_090530")
        );
    }

    #[test]
    fn test_backup_database_copies_rows() {
        let (_dir, path, conn) = test_db();
        let backup = backup_database(&conn, &path).unwrap();
        assert!(backup.exists());
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("db_gesty_backup_") && name.ends_with(".db"), "{name}");
        let copy = Connection::open(&backup).unwrap();
        assert_eq!(table_count(&copy, "t_conferme").unwrap(), 1);
    }
}
