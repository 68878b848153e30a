use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;
use rusqlite::Connection;
use tempfile::{tempdir, TempDir};

/// A command isolated from the user's settings file.
fn gesty(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gesty-migrate").expect("binary exists");
    cmd.env("GESTY_CONFIG", config_dir.join("settings.json"))
        .env("HOME", config_dir)
        .env_remove("RUST_LOG");
    cmd
}

fn write_destination(dir: &Path) -> PathBuf {
    let path = dir.join("db_gesty.db");
    let conn = Connection::open(&path).expect("create destination");
    conn.execute_batch(
        "CREATE TABLE t_iva (id_iva INTEGER PRIMARY KEY, descrizione TEXT, aliquota);
         INSERT INTO t_iva VALUES (99, 'Stale', NULL);
         CREATE TABLE t_banche (id INTEGER PRIMARY KEY, nome TEXT);
         CREATE TABLE t_note (id INTEGER PRIMARY KEY, testo TEXT);
         INSERT INTO t_note VALUES (1, 'keep me');",
    )
    .expect("seed destination");
    path
}

fn write_source(dir: &Path) -> PathBuf {
    let path = dir.join("db_gesty.mdb");
    fs::write(&path, b"Standard Jet DB").expect("write mdb stub");
    path
}

#[cfg(unix)]
fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod tool");
    path.to_string_lossy().to_string()
}

/// Settings pointing at shell scripts that stand in for mdb-tools.
#[cfg(unix)]
fn fake_mdb_tools(dir: &Path) {
    fake_mdb_tools_listing(dir, "t_iva\\nt_banca\\nt_extra\\n");
}

#[cfg(unix)]
fn fake_mdb_tools_listing(dir: &Path, listing: &str) {
    let tables = fake_tool(dir, "mdb-tables", &format!("printf '{listing}'"));
    let export = fake_tool(
        dir,
        "mdb-export",
        r#"for last; do :; done
case "$last" in
  t_iva) printf 'id_iva,descrizione,aliquota\n1,Ordinaria,"22,00"\n2,Ridotta,10\n' ;;
  t_banca) printf 'id,nome\n1,Banca Sella\n2,Unicredit\n' ;;
  *) printf 'id\n' ;;
esac"#,
    );
    let settings = serde_json::json!({
        "table_mapping": { "t_banche": "t_banca" },
        "tools": { "mdb_tables": tables, "mdb_export": export },
    });
    fs::write(dir.join("settings.json"), settings.to_string()).expect("write settings");
}

fn workspace() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().expect("temp dir");
    let source = write_source(dir.path());
    let destination = write_destination(dir.path());
    (dir, source, destination)
}

#[test]
fn help_lists_subcommands() {
    let dir = tempdir().expect("temp dir");
    gesty(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("sync"))
        .stdout(contains("convert"))
        .stdout(contains("normalize"));
}

#[test]
fn sync_fails_when_source_is_missing() {
    let (dir, _source, destination) = workspace();
    gesty(dir.path())
        .args(["sync", "missing.mdb", destination.to_str().unwrap(), "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("MDB file not found"));
}

#[test]
fn sync_fails_when_destination_is_missing() {
    let (dir, source, _destination) = workspace();
    let missing = dir.path().join("nowhere.db");
    gesty(dir.path())
        .args(["sync", source.to_str().unwrap(), missing.to_str().unwrap(), "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("SQLite database not found"));
    assert!(!missing.exists());
}

#[test]
fn sync_fails_when_tools_are_missing() {
    let (dir, source, destination) = workspace();
    let settings = serde_json::json!({
        "tools": { "mdb_tables": "/nonexistent/mdb-tables", "mdb_export": "/nonexistent/mdb-export" },
    });
    fs::write(dir.path().join("settings.json"), settings.to_string()).unwrap();
    gesty(dir.path())
        .args(["sync", source.to_str().unwrap(), destination.to_str().unwrap(), "--yes"])
        .assert()
        .failure()
        .stderr(contains("is not available"));

    let conn = Connection::open(&destination).unwrap();
    let stale: i64 = conn
        .query_row("SELECT COUNT(*) FROM t_iva WHERE id_iva = 99", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stale, 1);
}

#[cfg(unix)]
#[test]
fn sync_reloads_shared_tables_through_mdb_tools() {
    let (dir, source, destination) = workspace();
    fake_mdb_tools(dir.path());
    gesty(dir.path())
        .args([
            "sync",
            source.to_str().unwrap(),
            destination.to_str().unwrap(),
            "--yes",
            "--normalize",
        ])
        .assert()
        .success()
        .stdout(contains("t_banche <- t_banca"))
        .stdout(contains("SYNC COMPLETE"));

    let conn = Connection::open(&destination).unwrap();
    let ids: Vec<i64> = conn
        .prepare("SELECT id_iva FROM t_iva ORDER BY id_iva")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids, vec![1, 2]);
    let aliquota: f64 = conn
        .query_row("SELECT aliquota FROM t_iva WHERE id_iva = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(aliquota, 22.0);
    let banche: i64 = conn
        .query_row("SELECT COUNT(*) FROM t_banche", [], |r| r.get(0))
        .unwrap();
    assert_eq!(banche, 2);
    let note: String = conn
        .query_row("SELECT testo FROM t_note", [], |r| r.get(0))
        .unwrap();
    assert_eq!(note, "keep me");

    let backups = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_backup_"))
        .count();
    assert_eq!(backups, 1);
}

#[cfg(unix)]
#[test]
fn plan_changes_nothing() {
    let (dir, source, destination) = workspace();
    fake_mdb_tools(dir.path());
    gesty(dir.path())
        .args(["plan", source.to_str().unwrap(), destination.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("t_iva"))
        .stdout(contains("t_note"));

    let conn = Connection::open(&destination).unwrap();
    let stale: i64 = conn
        .query_row("SELECT COUNT(*) FROM t_iva", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stale, 1);
}

#[test]
fn normalize_rewrites_in_place() {
    let dir = tempdir().expect("temp dir");
    let db = dir.path().join("work.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE t_fatture (id INTEGER PRIMARY KEY, importo, data_fattura TEXT);
             INSERT INTO t_fatture VALUES (1, '1.234,56', '31/12/2019');",
        )
        .unwrap();
    }
    gesty(dir.path())
        .args(["normalize", db.to_str().unwrap(), "--no-backup"])
        .assert()
        .success()
        .stdout(contains("t_fatture"));

    let conn = Connection::open(&db).unwrap();
    let (importo, data): (f64, String) = conn
        .query_row("SELECT importo, data_fattura FROM t_fatture", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(importo, 1234.56);
    assert_eq!(data, "2019-12-31");
}

#[test]
fn normalize_rejects_unknown_table() {
    let (dir, _source, destination) = workspace();
    gesty(dir.path())
        .args(["normalize", destination.to_str().unwrap(), "--table", "t_nope"])
        .assert()
        .failure()
        .stderr(contains("no such table: t_nope"));
}

#[test]
fn backup_writes_timestamped_copy() {
    let (dir, _source, destination) = workspace();
    gesty(dir.path())
        .args(["backup", destination.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Backup saved to"))
        .stdout(contains("db_gesty_backup_"));
}

#[test]
fn config_init_writes_defaults() {
    let dir = tempdir().expect("temp dir");
    gesty(dir.path())
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(contains("t_fat_studio_dett"));
    let written = fs::read_to_string(dir.path().join("settings.json")).unwrap();
    assert!(written.contains("\"table_prefix\": \"t_\""));
}

fn stale_iva_rows(destination: &Path) -> i64 {
    let conn = Connection::open(destination).unwrap();
    conn.query_row("SELECT COUNT(*) FROM t_iva WHERE id_iva = 99", [], |r| r.get(0))
        .unwrap()
}

fn backup_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_backup_"))
        .count()
}

#[cfg(unix)]
#[test]
fn sync_with_no_shared_tables_exits_cleanly() {
    let (dir, source, destination) = workspace();
    fake_mdb_tools_listing(dir.path(), "anagrafica\\nMSysObjects\\n");
    gesty(dir.path())
        .args(["sync", source.to_str().unwrap(), destination.to_str().unwrap(), "--yes"])
        .assert()
        .success()
        .stdout(contains("No tables in common"))
        .stdout(contains("anagrafica"));

    assert_eq!(stale_iva_rows(&destination), 1);
    let conn = Connection::open(&destination).unwrap();
    let note: String = conn
        .query_row("SELECT testo FROM t_note", [], |r| r.get(0))
        .unwrap();
    assert_eq!(note, "keep me");
    assert_eq!(backup_files(dir.path()), 0);
}

#[cfg(unix)]
#[test]
fn sync_without_terminal_needs_yes() {
    let (dir, source, destination) = workspace();
    fake_mdb_tools(dir.path());
    gesty(dir.path())
        .args(["sync", source.to_str().unwrap(), destination.to_str().unwrap()])
        .write_stdin("y\n")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("Prompt error"));

    assert_eq!(stale_iva_rows(&destination), 1);
    assert_eq!(backup_files(dir.path()), 0);
}

#[test]
fn sync_help_mentions_yes_for_piped_input() {
    let dir = tempdir().expect("temp dir");
    gesty(dir.path())
        .args(["sync", "--help"])
        .assert()
        .success()
        .stdout(contains("stdin is not a terminal"));
}
