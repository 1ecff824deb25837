//! Recording catalog.
//!
//! SQLite-backed store of recorded programs. Recording sessions insert an
//! entry when a recording starts and keep updating its end time and
//! duration until the recording is confirmed stopped.

mod models;
mod recorded;
mod schema;

pub use models::*;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

/// Catalog error types.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Recording not found: {0}")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Shared catalog handle.
pub type CatalogHandle = Arc<tokio::sync::Mutex<Catalog>>;

/// Catalog connection wrapper.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create a catalog at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let catalog = Self { conn };
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let catalog = Self { conn };
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    pub fn into_handle(self) -> CatalogHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        self.apply_migrations()?;
        Ok(())
    }

    /// Add a column to a table if it doesn't exist.
    fn add_column_if_not_exists(&self, table: &str, column: &str, column_type: &str) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let column_exists = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .any(|name| name == column);

        if !column_exists {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type);
            self.conn.execute(&sql, [])?;
            log::info!("Migration: Added column {} to table {}", column, table);
        }

        Ok(())
    }

    fn apply_migrations(&self) -> Result<()> {
        // Storage presence flag, added after the first catalog release.
        self.add_column_if_not_exists("recorded_programs", "stored", "INTEGER DEFAULT 1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_is_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.apply_migrations().unwrap();
        assert!(catalog.list_recordings().unwrap().is_empty());
    }
}
