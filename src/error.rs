//! Error types
//!
//! Every fallible operation in lampctl returns [`LampError`]. Each variant is a
//! distinct kind with its own message so a presentation layer can report which
//! failure happened without inspecting strings.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LampError {
    #[error("Failed to start server process: {0}")]
    Spawn(String),

    #[error("Server process {pid} did not exit within {waited_ms} ms")]
    ProcessTimeout { pid: u32, waited_ms: u64 },

    #[error("Read error on '{path}': {message}")]
    Read { path: PathBuf, message: String },

    #[error("Write error on '{path}': {message}")]
    Write { path: PathBuf, message: String },

    #[error("SQL script syntax error at line {line}: {message}")]
    ScriptSyntax { line: usize, message: String },

    #[error("Constraint violation at {location}: {message}")]
    Constraint { location: String, message: String },

    #[error("Schema error on '{path}': {message}")]
    Schema { path: PathBuf, message: String },

    #[error("Database already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Database not found: {0}")]
    NotFound(PathBuf),

    #[error("Could not resolve a local network address: {0}")]
    LocalResolution(String),

    #[error("Cannot {operation} while server is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LampError {
    /// Stable name of the error kind, for structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            LampError::Spawn(_) => "spawn",
            LampError::ProcessTimeout { .. } => "process_timeout",
            LampError::Read { .. } => "read",
            LampError::Write { .. } => "write",
            LampError::ScriptSyntax { .. } => "script_syntax",
            LampError::Constraint { .. } => "constraint",
            LampError::Schema { .. } => "schema",
            LampError::AlreadyExists(_) => "already_exists",
            LampError::NotFound(_) => "not_found",
            LampError::LocalResolution(_) => "local_resolution",
            LampError::InvalidState { .. } => "invalid_state",
            LampError::Config(_) => "config",
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        LampError::Read {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        LampError::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        LampError::Schema {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LampError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = vec![
            LampError::Spawn("x".into()),
            LampError::ProcessTimeout {
                pid: 1,
                waited_ms: 10,
            },
            LampError::read("/a", "x"),
            LampError::write("/a", "x"),
            LampError::ScriptSyntax {
                line: 1,
                message: "x".into(),
            },
            LampError::Constraint {
                location: "line 1".into(),
                message: "x".into(),
            },
            LampError::schema("/a", "x"),
            LampError::AlreadyExists("/a".into()),
            LampError::NotFound("/a".into()),
            LampError::LocalResolution("x".into()),
            LampError::InvalidState {
                operation: "start",
                state: "stopping".into(),
            },
            LampError::Config("x".into()),
        ];

        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
        let mut messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        kinds.sort();
        kinds.dedup();
        messages.sort();
        messages.dedup();
        assert_eq!(kinds.len(), errors.len());
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_messages() {
        let err = LampError::ScriptSyntax {
            line: 3,
            message: "expected INSERT".into(),
        };
        assert_eq!(
            err.to_string(),
            "SQL script syntax error at line 3: expected INSERT"
        );

        let err = LampError::NotFound("/tmp/x.db".into());
        assert_eq!(err.to_string(), "Database not found: /tmp/x.db");
    }
}
