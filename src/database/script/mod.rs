//! SQL script dump/restore
//!
//! A script is UTF-8 text with one `INSERT INTO <table> VALUES (...);`
//! statement per line. Values are rendered as escaped literals so any stored
//! value survives a dump and replay unchanged.

mod codec;
mod literal;

pub use codec::{ScriptDocument, SqlScriptCodec, Statement};
pub use literal::{quote_identifier, value_literal};
