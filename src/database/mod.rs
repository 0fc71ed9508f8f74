//! Database module
//!
//! This module provides all database functionality for lampctl, organized into:
//!
//! - **core**: Core database infrastructure (SQLite connections, schema management)
//! - **script**: SQL script dump and restore
//! - **registry**: Active database selection and whole-database operations
//! - **messages**: Access to the application's `messages` table
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # Application schema definitions and management
//! │
//! ├── script/         # Portable dumps
//! │   ├── literal     # Value and identifier rendering
//! │   └── codec       # ScriptDocument and SqlScriptCodec
//! │
//! ├── registry        # DatabaseRegistry (create, delete, clear, import, export)
//! └── messages        # MessageRepository
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use lampctl::database::DatabaseRegistry;
//!
//! let mut registry = DatabaseRegistry::open(&config)?;
//! let db = registry.create("staging.db")?;
//! registry.set_active(db.clone())?;
//!
//! // dump to a script and replay it elsewhere
//! registry.export(&db, "/tmp/staging.sql")?;
//! let copy = registry.create("copy.db")?;
//! registry.import(&copy, "/tmp/staging.sql")?;
//! ```

pub mod core;
pub mod messages;
pub mod registry;
pub mod script;

// =============================================================================
// Core types
// =============================================================================

pub use core::{
    DatabaseConn, OpenMode, SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION,
};

// =============================================================================
// Script codec
// =============================================================================

pub use script::{ScriptDocument, SqlScriptCodec, Statement};

// =============================================================================
// Registry and repositories
// =============================================================================

pub use messages::{Message, MessageRepository};
pub use registry::{
    ClearReport, ClearedTable, Database, DatabaseInfo, DatabaseRegistry, TableInfo,
    ACTIVE_STATE_FILE,
};
