//! Database registry
//!
//! `DatabaseRegistry` owns the notion of the *active* database and the
//! operations that create, delete, reset, import into and export from
//! database files. Every database it hands out as active carries the
//! application schema.

use std::fs;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use rusqlite::{Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LampConfig;
use crate::database::core::{DatabaseConn, OpenMode, SchemaManager, SchemaStatus};
use crate::database::script::{quote_identifier, ScriptDocument, SqlScriptCodec};
use crate::error::{LampError, Result};

/// File suffixes SQLite may leave next to a database file
const SIDE_FILE_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// File in the data directory remembering the active database
pub const ACTIVE_STATE_FILE: &str = "active_database";

/// A file-backed application database, identified by its path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open a connection to this database
    pub fn connect(&self, mode: OpenMode) -> Result<DatabaseConn> {
        DatabaseConn::open(&self.path, mode)
    }
}

/// Rows deleted from one table by [`DatabaseRegistry::clear_all_tables`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearedTable {
    pub table: String,
    pub rows_deleted: u64,
}

/// Outcome of a full reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub tables: Vec<ClearedTable>,
}

impl ClearReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_deleted).sum()
    }
}

/// Row count of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub rows: u64,
}

/// Summary of a database file
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub path: String,
    pub exists: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub tables: Vec<TableInfo>,
}

/// Tracks the active database and manages database files
pub struct DatabaseRegistry {
    databases_dir: PathBuf,
    active: Option<Database>,
    /// Where the active selection is persisted, if anywhere
    state_file: Option<PathBuf>,
}

impl DatabaseRegistry {
    /// Create a registry rooted at `databases_dir` with no active database
    pub fn new(databases_dir: impl Into<PathBuf>) -> Self {
        Self {
            databases_dir: databases_dir.into(),
            active: None,
            state_file: None,
        }
    }

    /// Persist the active selection in `state_file`
    pub fn with_state_file(mut self, state_file: impl Into<PathBuf>) -> Self {
        self.state_file = Some(state_file.into());
        self
    }

    /// Bootstrap the registry from configuration
    ///
    /// Creates the databases directory and re-selects the database that was
    /// active last time, falling back to the configured default. Whichever
    /// is chosen gets its schema applied.
    pub fn open(config: &LampConfig) -> Result<Self> {
        let databases_dir = config.databases_dir();
        fs::create_dir_all(&databases_dir).map_err(|e| {
            LampError::write(&databases_dir, format!("unable to create directory: {}", e))
        })?;

        let state_file = Path::new(&config.data_dir).join(ACTIVE_STATE_FILE);
        let mut registry = Self::new(databases_dir).with_state_file(state_file);

        let db = match registry.remembered_active() {
            Some(db) => db,
            None => registry.database(config.database_path()),
        };
        registry.set_active(db)?;
        Ok(registry)
    }

    /// Previously persisted selection, if it still exists
    fn remembered_active(&self) -> Option<Database> {
        let state_file = self.state_file.as_ref()?;
        let content = fs::read_to_string(state_file).ok()?;
        let path = content.trim();
        if path.is_empty() {
            return None;
        }
        let db = self.database(path);
        if db.exists() {
            Some(db)
        } else {
            debug!("remembered database {} is gone", db.path().display());
            None
        }
    }

    fn persist_active(&self) -> Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };
        match &self.active {
            Some(db) => fs::write(state_file, db.path().to_string_lossy().as_bytes())
                .map_err(|e| LampError::write(state_file, e)),
            None => match fs::remove_file(state_file) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(LampError::write(state_file, e)),
            },
        }
    }

    pub fn databases_dir(&self) -> &Path {
        &self.databases_dir
    }

    /// Resolve a path; relative paths live in the databases directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.databases_dir.join(path)
        }
    }

    /// Handle for the database at `path` (resolved, not checked)
    pub fn database(&self, path: impl AsRef<Path>) -> Database {
        Database::new(self.resolve(path))
    }

    /// Make sure `db` exists and carries all required tables
    ///
    /// Idempotent: existing tables and rows are never altered. Returns the
    /// schema status found before any change.
    pub fn ensure_schema(&self, db: &Database) -> Result<SchemaStatus> {
        let path = db.path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                LampError::schema(path, format!("unable to create parent directory: {}", e))
            })?;
        }

        let conn = db.connect(OpenMode::Create).map_err(|e| match e {
            LampError::Read { message, .. } => LampError::schema(path, message),
            other => other,
        })?;

        SchemaManager::new(&conn.conn).ensure()
    }

    /// Create a new database file with the application schema
    pub fn create(&self, path: impl AsRef<Path>) -> Result<Database> {
        let db = self.database(path);

        if let Some(parent) = db.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LampError::write(parent, e))?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(db.path())
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => LampError::AlreadyExists(db.path().to_path_buf()),
                _ => LampError::write(db.path(), e),
            })?;

        if let Err(e) = self.ensure_schema(&db) {
            // do not leave a half-initialized file behind
            let _ = remove_database_files(db.path());
            return Err(e);
        }

        info!("created database {}", db.path().display());
        Ok(db)
    }

    /// Delete a database file; immediate and irreversible
    pub fn delete(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let db = self.database(path);
        if !db.exists() {
            return Err(LampError::NotFound(db.path().to_path_buf()));
        }

        remove_database_files(db.path())?;

        if self.active.as_ref() == Some(&db) {
            warn!("deleted the active database {}", db.path().display());
            self.active = None;
            self.persist_active()?;
        }

        info!("deleted database {}", db.path().display());
        Ok(())
    }

    /// Select the active database, applying the schema first
    ///
    /// The previously active database is simply released.
    pub fn set_active(&mut self, db: Database) -> Result<()> {
        self.ensure_schema(&db)?;
        info!("active database is now {}", db.path().display());
        self.active = Some(db);
        self.persist_active()
    }

    pub fn get_active(&self) -> Option<&Database> {
        self.active.as_ref()
    }

    /// The active database, or `NotFound` when none is selected
    pub fn require_active(&self) -> Result<&Database> {
        self.active
            .as_ref()
            .ok_or_else(|| LampError::NotFound(self.databases_dir.join("<no active database>")))
    }

    /// Delete every row of every table, keeping the schema
    ///
    /// Runs in one exclusive transaction: either all tables are emptied or
    /// none are.
    pub fn clear_all_tables(&self, db: &Database) -> Result<ClearReport> {
        let conn = db.connect(OpenMode::Existing)?;
        let path = db.path();
        let write_err = |e: rusqlite::Error| LampError::write(path, e);

        let tx = Transaction::new_unchecked(&conn.conn, TransactionBehavior::Exclusive)
            .map_err(write_err)?;
        // rows referencing each other may be deleted in any order
        tx.pragma_update(None, "defer_foreign_keys", true)
            .map_err(write_err)?;

        let mut report = ClearReport::default();
        for table in conn.table_names()? {
            let deleted = tx
                .execute(&format!("DELETE FROM {}", quote_identifier(&table)), [])
                .map_err(write_err)?;
            report.tables.push(ClearedTable {
                table,
                rows_deleted: deleted as u64,
            });
        }

        tx.commit().map_err(write_err)?;

        info!(
            "cleared {} rows from {} tables in {}",
            report.total_rows(),
            report.tables.len(),
            path.display()
        );
        Ok(report)
    }

    /// Dump all rows of `db` into a script document
    pub fn encode(&self, db: &Database) -> Result<ScriptDocument> {
        let conn = db.connect(OpenMode::ReadOnly).map_err(|e| match e {
            LampError::NotFound(p) => LampError::read(p, "database file does not exist"),
            other => other,
        })?;
        SqlScriptCodec::encode(&conn)
    }

    /// Replay a script document into `db`, all or nothing
    pub fn decode(&self, doc: &ScriptDocument, db: &Database) -> Result<usize> {
        let conn = db.connect(OpenMode::Existing)?;
        SqlScriptCodec::decode(doc, &conn)
    }

    /// Export `db` to a script file at `dest`
    ///
    /// The file is written next to its destination and renamed into place,
    /// so a failed export never leaves a truncated script behind.
    pub fn export(&self, db: &Database, dest: impl AsRef<Path>) -> Result<usize> {
        let dest = dest.as_ref();
        let doc = self.encode(db)?;

        let tmp = tmp_path(dest);
        let write = || -> std::io::Result<()> {
            let file = fs::File::create(&tmp)?;
            doc.write_to(BufWriter::new(&file))?;
            file.sync_all()?;
            fs::rename(&tmp, dest)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(LampError::write(dest, e));
        }

        info!("exported {} statements to {}", doc.len(), dest.display());
        Ok(doc.len())
    }

    /// Import a script file at `src` into `db`
    pub fn import(&self, db: &Database, src: impl AsRef<Path>) -> Result<usize> {
        let src = src.as_ref();
        let text = fs::read_to_string(src).map_err(|e| LampError::read(src, e))?;
        let doc = ScriptDocument::parse(&text)?;
        let applied = self.decode(&doc, db)?;
        info!("imported {} statements from {}", applied, src.display());
        Ok(applied)
    }

    /// Database files (`*.db`) in the databases directory, sorted by name
    pub fn list(&self) -> Result<Vec<Database>> {
        let entries = match fs::read_dir(&self.databases_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LampError::read(&self.databases_dir, e)),
        };

        let mut databases = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LampError::read(&self.databases_dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "db") {
                databases.push(Database::new(path));
            }
        }
        databases.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(databases)
    }

    /// Describe a database file without modifying it
    pub fn info(&self, db: &Database) -> Result<DatabaseInfo> {
        let exists = db.exists();
        let size_bytes = if exists {
            fs::metadata(db.path()).ok().map(|m| m.len())
        } else {
            None
        };

        let mut info = DatabaseInfo {
            path: db.path().to_string_lossy().to_string(),
            exists,
            active: self.active.as_ref() == Some(db),
            size_bytes,
            schema: None,
            tables: Vec::new(),
        };

        if exists {
            let conn = db.connect(OpenMode::ReadOnly)?;
            info.schema = Some(SchemaManager::new(&conn.conn).check_status()?.to_string());
            for name in conn.table_names()? {
                let rows = conn.table_count(&name)?;
                info.tables.push(TableInfo { name, rows });
            }
        }

        Ok(info)
    }
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn remove_database_files(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LampError::NotFound(path.to_path_buf()),
        _ => LampError::write(path, e),
    })?;

    for suffix in SIDE_FILE_SUFFIXES {
        let mut side = path.as_os_str().to_os_string();
        side.push(suffix);
        match fs::remove_file(PathBuf::from(side)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}{}: {}", path.display(), suffix, e),
        }
    }
    Ok(())
}
