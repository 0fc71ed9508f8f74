//! Database schema management
//!
//! This module provides the fixed application schema and the logic that makes
//! sure a database file carries it. The schema version lives in SQLite's
//! `user_version` header field so no bookkeeping rows end up in dumps.

use rusqlite::Connection;
use tracing::info;

use crate::error::{LampError, Result};

/// Current schema version
/// Increment this when making breaking schema changes
pub const SCHEMA_VERSION: u32 = 1;

/// Schema definitions for all application tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the messages table
    pub const MESSAGES_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
    "#;

    pub const MESSAGES_INDEXES: &'static [&'static str] =
        &["CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)"];

    /// Tables every application database must contain
    pub const REQUIRED_TABLES: &'static [&'static str] = &["messages"];
}

/// Status of the database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Fresh database without any tables
    NotInitialized,

    /// Schema is current and valid
    Current,

    /// Written by an older schema version
    Outdated { found: u32, required: u32 },

    /// Database is from a newer version (incompatible)
    Incompatible { found: u32, required: u32 },

    /// Some required tables are missing
    Missing { tables: Vec<String> },
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaStatus::NotInitialized => write!(f, "not initialized"),
            SchemaStatus::Current => write!(f, "current (v{})", SCHEMA_VERSION),
            SchemaStatus::Outdated { found, required } => {
                write!(f, "outdated (v{}, expected v{})", found, required)
            }
            SchemaStatus::Incompatible { found, required } => {
                write!(f, "incompatible (v{}, expected v{})", found, required)
            }
            SchemaStatus::Missing { tables } => {
                write!(f, "missing tables: {}", tables.join(", "))
            }
        }
    }
}

/// Schema manager for an application database
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create all required tables and indexes that do not exist yet
    ///
    /// Existing tables and their rows are left untouched. The whole
    /// initialization runs in one transaction.
    pub fn initialize(&self) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| self.error(format!("failed to begin transaction: {}", e)))?;

        tx.execute_batch(SchemaDefinitions::MESSAGES_TABLE)
            .map_err(|e| self.error(format!("failed to create messages table: {}", e)))?;

        for index_sql in SchemaDefinitions::MESSAGES_INDEXES {
            tx.execute(index_sql, [])
                .map_err(|e| self.error(format!("failed to create messages index: {}", e)))?;
        }

        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| self.error(format!("failed to set schema version: {}", e)))?;

        tx.commit()
            .map_err(|e| self.error(format!("failed to commit schema: {}", e)))?;

        Ok(())
    }

    /// Make sure the schema is present, creating whatever is missing
    ///
    /// Returns the status observed before any change was made.
    pub fn ensure(&self) -> Result<SchemaStatus> {
        let status = self.check_status()?;
        match &status {
            SchemaStatus::Current => {}
            SchemaStatus::Incompatible { found, required } => {
                return Err(self.error(format!(
                    "database schema v{} is newer than supported v{}",
                    found, required
                )));
            }
            SchemaStatus::NotInitialized => {
                info!("initializing database schema v{}", SCHEMA_VERSION);
                self.initialize()?;
            }
            SchemaStatus::Outdated { found, required } => {
                info!("upgrading database schema from v{} to v{}", found, required);
                self.initialize()?;
            }
            SchemaStatus::Missing { tables } => {
                info!("creating missing tables: {}", tables.join(", "));
                self.initialize()?;
            }
        }

        let after = self.check_status()?;
        if after != SchemaStatus::Current {
            return Err(self.error(format!("schema still {} after initialization", after)));
        }

        Ok(status)
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        let missing = self.missing_tables()?;
        let version = self.get_schema_version()?;

        if missing.len() == SchemaDefinitions::REQUIRED_TABLES.len() && version == 0 {
            return Ok(SchemaStatus::NotInitialized);
        }

        if version > SCHEMA_VERSION {
            return Ok(SchemaStatus::Incompatible {
                found: version,
                required: SCHEMA_VERSION,
            });
        }

        if !missing.is_empty() {
            return Ok(SchemaStatus::Missing { tables: missing });
        }

        if version < SCHEMA_VERSION {
            return Ok(SchemaStatus::Outdated {
                found: version,
                required: SCHEMA_VERSION,
            });
        }

        Ok(SchemaStatus::Current)
    }

    /// Get the current schema version from the database header
    pub fn get_schema_version(&self) -> Result<u32> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| self.error(format!("failed to read schema version: {}", e)))?;
        Ok(version.max(0) as u32)
    }

    fn missing_tables(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for table in SchemaDefinitions::REQUIRED_TABLES {
            let exists: i64 = self
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .map_err(|e| self.error(format!("failed to inspect schema: {}", e)))?;

            if exists == 0 {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }

    fn error(&self, message: String) -> LampError {
        let path = self.conn.path().unwrap_or(":memory:").to_string();
        LampError::schema(path, message)
    }
}
