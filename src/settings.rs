use std::collections::BTreeMap;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{GestyError, Result};

/// Executable names for the mdb-tools suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tools {
    #[serde(default = "default_mdb_tables")]
    pub mdb_tables: String,
    #[serde(default = "default_mdb_export")]
    pub mdb_export: String,
    #[serde(default = "default_mdb_schema")]
    pub mdb_schema: String,
}

fn default_mdb_tables() -> String {
    "mdb-tables".to_string()
}

fn default_mdb_export() -> String {
    "mdb-export".to_string()
}

fn default_mdb_schema() -> String {
    "mdb-schema".to_string()
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            mdb_tables: default_mdb_tables(),
            mdb_export: default_mdb_export(),
            mdb_schema: default_mdb_schema(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// SQLite table name -> MDB table name, for tables renamed between the two schemas.
    #[serde(default = "default_table_mapping")]
    pub table_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default = "default_export_date_format")]
    pub export_date_format: String,
    #[serde(default = "default_true")]
    pub escape_newlines: bool,
    #[serde(default = "default_true")]
    pub normalize_dates: bool,
    #[serde(default = "default_true")]
    pub backup_before_sync: bool,
}

fn default_destination() -> String {
    "../backend/db_gesty.db".to_string()
}

fn default_table_prefix() -> String {
    "t_".to_string()
}

fn default_table_mapping() -> BTreeMap<String, String> {
    [
        ("t_fat_studio_det", "t_fat_studio_dett"),
        ("t_fat_studio_det_trading", "t_fat_studio_dett_trading"),
        ("t_venditore_offre", "t_venditori_offre"),
        ("t_famiglie_articoli", "t_famiglia_articoli"),
    ]
    .into_iter()
    .map(|(dest, src)| (dest.to_string(), src.to_string()))
    .collect()
}

fn default_export_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            table_prefix: default_table_prefix(),
            table_mapping: default_table_mapping(),
            tools: Tools::default(),
            export_date_format: default_export_date_format(),
            escape_newlines: true,
            normalize_dates: true,
            backup_before_sync: true,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gesty")
}

pub fn settings_path() -> PathBuf {
    match std::env::var_os("GESTY_CONFIG") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => config_dir().join("settings.json"),
    }
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("ignoring unreadable settings file {}: {e}", path.display());
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<PathBuf> {
    let path = settings_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| GestyError::Settings(e.to_string()))?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(path)
}
