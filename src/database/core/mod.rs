//! Core database infrastructure
//!
//! This module provides the foundational database components used throughout lampctl:
//! - `DatabaseConn`: Core SQLite connection wrapper with configuration
//! - `SchemaManager`: Schema initialization and verification
//! - `SchemaStatus`: Schema state enumeration

mod connection;
mod schema;

pub use connection::{DatabaseConn, OpenMode, DEFAULT_BUSY_TIMEOUT};
pub use schema::{SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};
