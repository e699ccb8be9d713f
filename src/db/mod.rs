// Database module

pub mod migrations;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use anyhow::Result;

use crate::constants::IDENTITY_DB_FILENAME;

/// Open or create the identity database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // WAL lets the CLI read while a running service writes hits
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// In-memory database with the full schema applied.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Identity database path inside a data directory
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(IDENTITY_DB_FILENAME)
}

/// Default identity database: ~/.securevision/faces.db
pub fn default_db_path() -> Result<PathBuf> {
    Ok(get_db_path(&crate::config::file::default_data_dir()?))
}
