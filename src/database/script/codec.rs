//! Dump/restore codec
//!
//! `SqlScriptCodec::encode` turns the rows of every table into a
//! [`ScriptDocument`] of `INSERT` statements; `SqlScriptCodec::decode` replays
//! such a document inside one exclusive transaction.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};

use rusqlite::{ErrorCode, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::literal::{quote_identifier, value_literal};
use crate::database::core::DatabaseConn;
use crate::error::{LampError, Result};

/// One statement of a script, with the line it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 1-based line number in the script text
    pub line: usize,
    pub sql: String,
}

/// An ordered list of SQL statements representing a full data dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDocument {
    statements: Vec<Statement>,
}

impl ScriptDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement; its line number is its position in the document
    pub fn push(&mut self, sql: impl Into<String>) {
        let line = self.statements.len() + 1;
        self.statements.push(Statement {
            line,
            sql: sql.into(),
        });
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Parse script text, one statement per line
    ///
    /// Blank lines and `--` comment lines are skipped. Every other line must
    /// be a single `INSERT INTO ...;` statement.
    pub fn parse(text: &str) -> Result<Self> {
        let mut statements = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let sql = raw.trim();
            if sql.is_empty() || sql.starts_with("--") {
                continue;
            }

            let mut words = sql.split_whitespace();
            let is_insert = matches!(
                (words.next(), words.next()),
                (Some(a), Some(b)) if a.eq_ignore_ascii_case("INSERT") && b.eq_ignore_ascii_case("INTO")
            );
            if !is_insert {
                return Err(LampError::ScriptSyntax {
                    line,
                    message: "expected an INSERT INTO statement".to_string(),
                });
            }
            if !sql.ends_with(';') {
                return Err(LampError::ScriptSyntax {
                    line,
                    message: "statement is not terminated by ';'".to_string(),
                });
            }

            statements.push(Statement {
                line,
                sql: sql.to_string(),
            });
        }

        Ok(Self { statements })
    }

    /// Read and parse a script from a UTF-8 source
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut text = String::new();
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(|e| LampError::read("<script>", e))?;
            text.push_str(&line);
            text.push('\n');
        }
        Self::parse(&text)
    }

    /// Write the script, one statement per line
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for stmt in &self.statements {
            writer.write_all(stmt.sql.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

impl fmt::Display for ScriptDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            writeln!(f, "{}", stmt.sql)?;
        }
        Ok(())
    }
}

/// Encoder/decoder between a database's rows and a [`ScriptDocument`]
pub struct SqlScriptCodec;

impl SqlScriptCodec {
    /// Dump every row of every table as an `INSERT` statement
    ///
    /// Tables are visited in catalog order and all reads come from one
    /// snapshot. Schema is not part of the output.
    pub fn encode(db: &DatabaseConn) -> Result<ScriptDocument> {
        let path = db.path().to_path_buf();
        let read_err = |e: rusqlite::Error| LampError::read(&path, e);

        // one read transaction so all tables come from the same snapshot
        let tx = db.conn.unchecked_transaction().map_err(read_err)?;

        let mut doc = ScriptDocument::new();
        for table in db.table_names()? {
            let name = quote_identifier(&table);
            let (columns, skipped) = stored_columns(&tx, &table).map_err(read_err)?;
            let column_list = columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            // a generated column cannot be assigned, so name the others
            let target = if skipped {
                format!("{} ({})", name, column_list)
            } else {
                name.to_string()
            };

            let mut stmt = tx
                .prepare(&format!("SELECT {} FROM {}", column_list, name))
                .map_err(read_err)?;
            let column_count = stmt.column_count();

            let mut rows = stmt.query([]).map_err(read_err)?;
            let mut count = 0usize;
            while let Some(row) = rows.next().map_err(read_err)? {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(value_literal(row.get_ref(i).map_err(read_err)?));
                }
                doc.push(format!("INSERT INTO {} VALUES ({});", target, values.join(", ")));
                count += 1;
            }
            debug!("encoded {} rows from table {}", count, table);
        }

        tx.commit().map_err(read_err)?;
        info!("encoded {} statements from {}", doc.len(), path.display());
        Ok(doc)
    }

    /// Replay a script against `db`, all or nothing
    ///
    /// Runs inside an exclusive transaction with foreign key checks deferred to
    /// commit. Any failure rolls the whole script back. Returns the number of
    /// statements applied.
    pub fn decode(doc: &ScriptDocument, db: &DatabaseConn) -> Result<usize> {
        let path = db.path().to_path_buf();

        let tx = Transaction::new_unchecked(&db.conn, TransactionBehavior::Exclusive)
            .map_err(|e| LampError::write(&path, format!("failed to lock database: {}", e)))?;

        tx.pragma_update(None, "defer_foreign_keys", true)
            .map_err(|e| LampError::write(&path, e))?;

        for stmt in doc.statements() {
            tx.execute(&stmt.sql, [])
                .map_err(|e| classify(&path, Some(stmt.line), e))?;
        }

        // dropping the transaction on an early return above rolls it back
        tx.commit().map_err(|e| classify(&path, None, e))?;

        info!("applied {} statements to {}", doc.len(), path.display());
        Ok(doc.len())
    }
}

/// Columns of `table` that hold stored data, in declaration order
///
/// Generated and hidden columns are left out; the flag reports whether any
/// were.
fn stored_columns(tx: &Transaction<'_>, table: &str) -> rusqlite::Result<(Vec<String>, bool)> {
    let mut stmt = tx.prepare("SELECT name, hidden FROM pragma_table_xinfo(?1) ORDER BY cid")?;
    let mut columns = Vec::new();
    let mut skipped = false;
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let hidden: i64 = row.get(1)?;
        if hidden == 0 {
            columns.push(row.get(0)?);
        } else {
            skipped = true;
        }
    }
    Ok((columns, skipped))
}

fn classify(path: &std::path::Path, line: Option<usize>, err: rusqlite::Error) -> LampError {
    let location = match line {
        Some(l) => format!("line {}", l),
        None => "commit".to_string(),
    };

    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch) =>
        {
            LampError::Constraint {
                location,
                message: err.to_string(),
            }
        }
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::DatabaseCorrupt
            ) =>
        {
            LampError::write(path, format!("{}: {}", location, err))
        }
        rusqlite::Error::MultipleStatement => LampError::ScriptSyntax {
            line: line.unwrap_or(0),
            message: "more than one statement on a line".to_string(),
        },
        _ => match line {
            Some(line) => LampError::ScriptSyntax {
                line,
                message: err.to_string(),
            },
            None => LampError::write(path, format!("{}: {}", location, err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{OpenMode, SchemaManager};
    use std::path::Path;

    fn app_db(path: &Path) -> DatabaseConn {
        let db = DatabaseConn::open(path, OpenMode::Create).unwrap();
        SchemaManager::new(&db.conn).ensure().unwrap();
        db
    }

    fn messages(db: &DatabaseConn) -> Vec<(i64, String, String)> {
        let mut stmt = db
            .conn
            .prepare("SELECT id, content, created_at FROM messages ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_scenario_two_messages_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let a = app_db(&dir.path().join("a.db"));
        a.conn
            .execute_batch(
                "INSERT INTO messages (content) VALUES ('hello');
                 INSERT INTO messages (content) VALUES ('world');",
            )
            .unwrap();

        let doc = SqlScriptCodec::encode(&a).unwrap();
        let text = doc.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines
            .iter()
            .all(|l| l.starts_with("INSERT INTO messages VALUES (")));

        let b = app_db(&dir.path().join("b.db"));
        let applied = SqlScriptCodec::decode(&ScriptDocument::parse(&text).unwrap(), &b).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(messages(&a), messages(&b));
    }

    #[test]
    fn test_round_trip_preserves_awkward_values() {
        let a = DatabaseConn::open_in_memory().unwrap();
        let b = DatabaseConn::open_in_memory().unwrap();
        let ddl = "CREATE TABLE \"odd table\" (i INTEGER, r REAL, t TEXT, b BLOB, n);";
        a.conn.execute_batch(ddl).unwrap();
        b.conn.execute_batch(ddl).unwrap();

        a.conn
            .execute(
                "INSERT INTO \"odd table\" VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    i64::MIN,
                    0.1f64,
                    "it's\n'quoted'; DROP TABLE x; --",
                    vec![0u8, 1, 255],
                    rusqlite::types::Null
                ],
            )
            .unwrap();
        a.conn
            .execute(
                "INSERT INTO \"odd table\" VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![i64::MAX, 1234.5678f64, "", Vec::<u8>::new(), 7.5f64],
            )
            .unwrap();

        let doc = SqlScriptCodec::encode(&a).unwrap();
        assert_eq!(doc.len(), 2);
        let reparsed = ScriptDocument::parse(&doc.to_string()).unwrap();
        SqlScriptCodec::decode(&reparsed, &b).unwrap();

        let dump = |db: &DatabaseConn| -> Vec<Vec<rusqlite::types::Value>> {
            let mut stmt = db
                .conn
                .prepare("SELECT i, r, t, b, n, typeof(r), typeof(b) FROM \"odd table\" ORDER BY i")
                .unwrap();
            stmt.query_map([], |row| {
                (0..7).map(|i| row.get::<_, rusqlite::types::Value>(i)).collect()
            })
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
        };
        assert_eq!(dump(&a), dump(&b));
    }

    #[test]
    fn test_generated_columns_are_not_dumped() {
        let a = DatabaseConn::open_in_memory().unwrap();
        let b = DatabaseConn::open_in_memory().unwrap();
        let ddl = "CREATE TABLE g (
            a INTEGER,
            b INTEGER GENERATED ALWAYS AS (a * 2) STORED,
            c TEXT,
            d TEXT GENERATED ALWAYS AS (upper(c)) VIRTUAL
        );";
        a.conn.execute_batch(ddl).unwrap();
        b.conn.execute_batch(ddl).unwrap();
        a.conn
            .execute("INSERT INTO g (a, c) VALUES (21, 'x')", [])
            .unwrap();

        let doc = SqlScriptCodec::encode(&a).unwrap();
        assert_eq!(doc.to_string(), "INSERT INTO g (a, c) VALUES (21, 'x');\n");

        SqlScriptCodec::decode(&doc, &b).unwrap();
        let row: (i64, i64, String, String) = b
            .conn
            .query_row("SELECT a, b, c, d FROM g", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap();
        assert_eq!(row, (21, 42, "x".to_string(), "X".to_string()));
    }

    #[test]
    fn test_encode_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = app_db(&dir.path().join("empty.db"));
        let doc = SqlScriptCodec::encode(&db).unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.to_string(), "");
    }

    #[test]
    fn test_constraint_violation_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = app_db(&dir.path().join("target.db"));
        db.conn
            .execute("INSERT INTO messages (id, content) VALUES (1, 'existing')", [])
            .unwrap();

        let doc = ScriptDocument::parse(
            "INSERT INTO messages VALUES (2, 'new', '2024-01-01T00:00:00Z');\n\
             INSERT INTO messages VALUES (1, 'duplicate', '2024-01-01T00:00:00Z');\n\
             INSERT INTO messages VALUES (3, 'never', '2024-01-01T00:00:00Z');\n",
        )
        .unwrap();

        let err = SqlScriptCodec::decode(&doc, &db).unwrap_err();
        match err {
            LampError::Constraint { location, .. } => assert_eq!(location, "line 2"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.table_count("messages").unwrap(), 1);
    }

    #[test]
    fn test_not_null_violation_is_constraint_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = app_db(&dir.path().join("target.db"));
        let doc = ScriptDocument::parse(
            "INSERT INTO messages VALUES (1, NULL, '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        assert!(matches!(
            SqlScriptCodec::decode(&doc, &db),
            Err(LampError::Constraint { .. })
        ));
        assert_eq!(db.table_count("messages").unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_checked_at_commit() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));",
            )
            .unwrap();

        // child before parent is fine, the reference is satisfied by commit time
        let ok = ScriptDocument::parse(
            "INSERT INTO child VALUES (1, 10);\nINSERT INTO parent VALUES (10);",
        )
        .unwrap();
        SqlScriptCodec::decode(&ok, &db).unwrap();

        let dangling = ScriptDocument::parse(
            "INSERT INTO parent VALUES (20);\nINSERT INTO child VALUES (2, 99);",
        )
        .unwrap();
        match SqlScriptCodec::decode(&dangling, &db).unwrap_err() {
            LampError::Constraint { location, .. } => assert_eq!(location, "commit"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.table_count("parent").unwrap(), 1);
        assert_eq!(db.table_count("child").unwrap(), 1);
    }

    #[test]
    fn test_parse_rejects_non_insert_lines() {
        let err = ScriptDocument::parse(
            "-- dump\n\nINSERT INTO messages VALUES (1, 'a', 'b');\nDROP TABLE messages;\n",
        )
        .unwrap_err();
        match err {
            LampError::ScriptSyntax { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            ScriptDocument::parse("INSERT INTO messages VALUES (1, 'a', 'b')"),
            Err(LampError::ScriptSyntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_malformed_statement_is_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = app_db(&dir.path().join("target.db"));
        db.conn
            .execute("INSERT INTO messages (content) VALUES ('keep')", [])
            .unwrap();

        let doc = ScriptDocument::parse(
            "INSERT INTO messages VALUES (5, 'x', 'y');\nINSERT INTO messages VALUES (6, 'unterminated);",
        )
        .unwrap();
        assert!(matches!(
            SqlScriptCodec::decode(&doc, &db),
            Err(LampError::ScriptSyntax { line: 2, .. })
        ));

        let missing_table = ScriptDocument::parse("INSERT INTO nowhere VALUES (1);").unwrap();
        assert!(matches!(
            SqlScriptCodec::decode(&missing_table, &db),
            Err(LampError::ScriptSyntax { line: 1, .. })
        ));

        assert_eq!(db.table_count("messages").unwrap(), 1);
    }

    #[test]
    fn test_write_and_read_document() {
        let mut doc = ScriptDocument::new();
        doc.push("INSERT INTO messages VALUES (1, 'a', 'b');");
        doc.push("INSERT INTO messages VALUES (2, 'c', 'd');");

        let mut buf = Vec::new();
        doc.write_to(&mut buf).unwrap();
        let read = ScriptDocument::read_from(buf.as_slice()).unwrap();
        assert_eq!(read, doc);
    }
}
