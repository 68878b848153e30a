use crate::cli::absolute;
use crate::db::{backup_database, open_destination};
use crate::error::Result;
use crate::fmt::format_bytes;

pub fn run(database: &str) -> Result<()> {
    let db_path = absolute(database)?;
    let conn = open_destination(&db_path)?;
    let dest_path = backup_database(&conn, &db_path)?;

    let size = std::fs::metadata(&dest_path)?.len();
    println!("Backup saved to {}", dest_path.display());
    println!("Size: {}", format_bytes(size));
    Ok(())
}
