use thiserror::Error;

#[derive(Error, Debug)]
pub enum GestyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MDB file not found: {0}")]
    SourceNotFound(String),

    #[error("SQLite database not found: {0}")]
    DestinationNotFound(String),

    #[error("{0} is not available (install mdb-tools, e.g. `sudo apt-get install mdb-tools`)")]
    ToolUnavailable(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Column mismatch in {table}: {message}")]
    ColumnMismatch { table: String, message: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GestyError>;
