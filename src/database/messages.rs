//! Messages repository
//!
//! The served application stores short text messages in the `messages` table.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{LampError, Result};

/// A stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub created_at: String,
}

/// Repository for the `messages` table
pub struct MessageRepository<'a> {
    conn: &'a Connection,
}

impl<'a> MessageRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a message and return its id
    pub fn add(&self, content: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO messages (content) VALUES (?1)", params![content])
            .map_err(|e| self.write_error(e))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All messages, oldest first
    pub fn list(&self) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, content, created_at FROM messages ORDER BY id")
            .map_err(|e| self.read_error(e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(|e| self.read_error(e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.read_error(e))
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(|e| self.read_error(e))?;
        Ok(count as u64)
    }

    fn path(&self) -> String {
        self.conn.path().unwrap_or(":memory:").to_string()
    }

    fn read_error(&self, e: rusqlite::Error) -> LampError {
        LampError::read(self.path(), e)
    }

    fn write_error(&self, e: rusqlite::Error) -> LampError {
        LampError::write(self.path(), e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{DatabaseConn, SchemaManager};

    #[test]
    fn test_add_and_list() {
        let db = DatabaseConn::open_in_memory().unwrap();
        SchemaManager::new(&db.conn).initialize().unwrap();
        let repo = MessageRepository::new(&db.conn);

        let first = repo.add("hello").unwrap();
        let second = repo.add("world").unwrap();
        assert!(second > first);
        assert_eq!(repo.count().unwrap(), 2);

        let messages = repo.list().unwrap();
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "world");
        assert!(messages[0].created_at.ends_with('Z'));
    }

    #[test]
    fn test_missing_table_is_read_error() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let repo = MessageRepository::new(&db.conn);
        assert!(matches!(repo.list(), Err(LampError::Read { .. })));
    }
}
