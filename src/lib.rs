#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! lampctl - a local server and database control panel
//!
//! lampctl supervises one background web server process and manages a set of
//! SQLite databases: creating, selecting, clearing and deleting them, and
//! dumping them to (or restoring them from) portable SQL scripts. It can be
//! used as both a command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Databases, script codec, supervisor, config | `rusqlite`, `config` |
//! | `network` | Local and public address lookup | `ureq` |
//! | `web` | The HTTP app run by `lampctl serve` | `axum`, `tokio` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | Full CLI binary | All above + `clap` |
//!
//! # Architecture
//!
//! - **[`database`]**: SQLite connections, the application schema, the
//!   SQL script codec and the [`DatabaseRegistry`]
//! - **[`supervisor`]**: the [`ServerSupervisor`] state machine
//! - **[`network`]**: [`NetworkInfo`] snapshots (requires `network`)
//! - **[`web`]**: the served HTTP app (requires `web`)
//! - **[`config`]**: layered configuration
//! - **[`error`]**: the [`LampError`] taxonomy
//!
//! # Quick Start
//!
//! ## Databases
//!
//! ```rust,ignore
//! use lampctl::{DatabaseRegistry, LampConfig};
//!
//! let config = LampConfig::new(&None)?;
//! let mut registry = DatabaseRegistry::open(&config)?;
//!
//! let db = registry.create("staging.db")?;
//! registry.set_active(db.clone())?;
//! registry.export(&db, "/tmp/staging.sql")?;
//! ```
//!
//! ## Server
//!
//! ```rust,ignore
//! use lampctl::{LampConfig, ServerSupervisor};
//!
//! let config = LampConfig::new(&None)?;
//! let supervisor = ServerSupervisor::new(config.supervisor_options()?);
//!
//! let status = supervisor.start("127.0.0.1:5000")?;
//! println!("{} (pid {:?})", status.state, status.pid);
//! supervisor.stop()?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod supervisor;
pub mod utils;

#[cfg(feature = "network")]
pub mod network;

#[cfg(feature = "web")]
pub mod web;

// =============================================================================
// Configuration and errors (always available)
// =============================================================================

pub use config::LampConfig;
pub use error::{LampError, Result};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    ClearReport, Database, DatabaseInfo, DatabaseRegistry, ScriptDocument, SqlScriptCodec,
};

// =============================================================================
// Server supervision
// =============================================================================

pub use supervisor::{
    ExitInfo, ServerCommand, ServerState, ServerStatus, ServerSupervisor, SupervisorOptions,
};

// =============================================================================
// Network (feature = "network")
// =============================================================================

#[cfg(feature = "network")]
pub use network::{NetworkInfo, NetworkSnapshot, PublicAddress};

// =============================================================================
// Output formatting
// =============================================================================

pub use utils::OutputFormat;
