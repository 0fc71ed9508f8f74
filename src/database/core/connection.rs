//! Database connection management
//!
//! This module provides the core database connection wrapper used throughout lampctl.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::{LampError, Result};

/// How long a statement waits on a lock held by another connection (e.g. the
/// served web app reading the same file) before giving up with `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// How a database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-write, creating the file if it does not exist
    Create,
    /// Read-write, failing if the file does not exist
    Existing,
    /// Read-only, failing if the file does not exist
    ReadOnly,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        match self {
            OpenMode::Create => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::Existing => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error classification.
pub struct DatabaseConn {
    pub conn: Connection,
    path: PathBuf,
}

impl DatabaseConn {
    /// Open a database file with the given mode
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        if mode != OpenMode::Create && !path.is_file() {
            return Err(LampError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(path, mode.flags())
            .map_err(|e| LampError::read(path, format!("failed to open database: {}", e)))?;

        let db = DatabaseConn {
            conn,
            path: path.to_path_buf(),
        };
        db.configure(mode)?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LampError::read(":memory:", e))?;
        let db = DatabaseConn {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.configure(OpenMode::Create)?;
        Ok(db)
    }

    /// Path of the underlying file (`:memory:` for in-memory databases)
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(&self, mode: OpenMode) -> Result<()> {
        self.conn
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(|e| LampError::read(&self.path, format!("failed to set busy timeout: {}", e)))?;

        // Enforce REFERENCES clauses so restores cannot leave dangling rows
        self.conn
            .execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| LampError::read(&self.path, format!("failed to enable foreign keys: {}", e)))?;

        if mode != OpenMode::ReadOnly {
            self.conn
                .execute("PRAGMA synchronous=FULL", [])
                .map_err(|e| {
                    LampError::read(&self.path, format!("failed to set synchronous mode: {}", e))
                })?;
        }

        Ok(())
    }

    /// Names of the user tables, in catalog order
    ///
    /// Internal `sqlite_*` tables and views are excluded.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type='table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                 ORDER BY rowid",
            )
            .map_err(|e| LampError::read(&self.path, format!("failed to list tables: {}", e)))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| LampError::read(&self.path, format!("failed to list tables: {}", e)))?;

        Ok(names)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| {
                LampError::read(&self.path, format!("failed to check table existence: {}", e))
            })?;
        Ok(count > 0)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!(
            "SELECT COUNT(*) FROM {}",
            crate::database::script::quote_identifier(table_name)
        );
        let count: i64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| LampError::read(&self.path, format!("failed to count rows: {}", e)))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_existing_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        let result = DatabaseConn::open(&path, OpenMode::Existing);
        assert!(matches!(result, Err(LampError::NotFound(_))));
        assert!(!path.exists());

        let result = DatabaseConn::open(&path, OpenMode::ReadOnly);
        assert!(matches!(result, Err(LampError::NotFound(_))));
    }

    #[test]
    fn test_open_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.db");

        let db = DatabaseConn::open(&path, OpenMode::Create).unwrap();
        assert_eq!(db.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_table_names_excludes_internal() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE b_table (id INTEGER PRIMARY KEY AUTOINCREMENT);
                 CREATE TABLE a_table (id INTEGER PRIMARY KEY);
                 CREATE VIEW v AS SELECT * FROM a_table;
                 INSERT INTO b_table DEFAULT VALUES;",
            )
            .unwrap();

        // catalog order, no sqlite_sequence, no views
        assert_eq!(db.table_names().unwrap(), vec!["b_table", "a_table"]);
    }

    #[test]
    fn test_table_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE test_table (id INTEGER PRIMARY KEY);
                 INSERT INTO test_table (id) VALUES (1), (2), (3);",
            )
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
    }
}
