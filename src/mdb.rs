use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use log::debug;

use crate::error::{GestyError, Result};
use crate::settings::{Settings, Tools};

/// Anything rows can be pulled from, table by table, as CSV with a header line.
pub trait TableSource {
    /// Human-readable origin, for console output.
    fn describe(&self) -> String;

    /// Fail fast when the backing tooling is missing.
    fn check_available(&self) -> Result<()>;

    fn list_tables(&self) -> Result<Vec<String>>;

    /// Write `table` to `dest` as comma-delimited, double-quoted CSV with a header.
    fn export_table(&self, table: &str, dest: &Path) -> Result<()>;

    /// DDL for the source schema in SQLite dialect.
    fn export_schema(&self) -> Result<String>;
}

/// An Access file read through the mdb-tools command line programs.
#[derive(Debug, Clone)]
pub struct MdbTools {
    path: PathBuf,
    tools: Tools,
    date_format: String,
    escape_newlines: bool,
}

impl MdbTools {
    pub fn open(path: &Path, settings: &Settings) -> Result<Self> {
        if !path.is_file() {
            return Err(GestyError::SourceNotFound(path.display().to_string()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            tools: settings.tools.clone(),
            date_format: settings.export_date_format.clone(),
            escape_newlines: settings.escape_newlines,
        })
    }

    fn export_args(&self, table: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-D".into(),
            self.date_format.clone().into(),
            "-R".into(),
            "\n".into(),
            "-d".into(),
            ",".into(),
            "-q".into(),
            "\"".into(),
        ];
        if self.escape_newlines {
            args.push("-e".into());
        }
        args.push(self.path.clone().into_os_string());
        args.push(table.into());
        args
    }
}

fn spawn_error(tool: &str, e: std::io::Error) -> GestyError {
    if e.kind() == std::io::ErrorKind::NotFound {
        GestyError::ToolUnavailable(tool.to_string())
    } else {
        GestyError::ToolFailed {
            tool: tool.to_string(),
            message: e.to_string(),
        }
    }
}

fn check_status(tool: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(GestyError::ToolFailed {
        tool: tool.to_string(),
        message: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        },
    })
}

fn run_captured(tool: &str, args: &[OsString]) -> Result<Output> {
    debug!("running {tool} {args:?}");
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(tool, e))?;
    check_status(tool, &output)?;
    Ok(output)
}

/// Parse `mdb-tables -1` output: one table per line, blanks ignored.
pub fn parse_table_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl TableSource for MdbTools {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn check_available(&self) -> Result<()> {
        for tool in [&self.tools.mdb_tables, &self.tools.mdb_export] {
            let probe = Command::new(tool)
                .arg("--version")
                .stdin(Stdio::null())
                .output();
            match probe {
                Ok(out) if out.status.success() => {}
                _ => return Err(GestyError::ToolUnavailable(tool.clone())),
            }
        }
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let args = [OsString::from("-1"), self.path.clone().into_os_string()];
        let output = run_captured(&self.tools.mdb_tables, &args)?;
        Ok(parse_table_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn export_table(&self, table: &str, dest: &Path) -> Result<()> {
        let tool = &self.tools.mdb_export;
        let file = File::create(dest)?;
        debug!("exporting {table} to {}", dest.display());
        let output = Command::new(tool)
            .args(self.export_args(table))
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| spawn_error(tool, e))?;
        check_status(tool, &output)
    }

    fn export_schema(&self) -> Result<String> {
        let args = [self.path.clone().into_os_string(), OsString::from("sqlite")];
        let output = run_captured(&self.tools.mdb_schema, &args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
