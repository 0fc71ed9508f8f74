//! SQL literal rendering
//!
//! Values read from SQLite are turned into literals that SQLite parses back to
//! the same value and storage class. Every literal stays on a single line.

use std::borrow::Cow;

use rusqlite::types::ValueRef;

/// SQLite keywords; a table named after one of these must be quoted.
const SQLITE_KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN", "WHERE",
    "WINDOW", "WITH", "WITHOUT",
];

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a table name for use in a statement
///
/// Plain non-keyword identifiers are written as-is; anything else is
/// double-quoted with embedded quotes doubled.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let keyword = SQLITE_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(name));

    if is_plain_identifier(name) && !keyword {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Render a stored value as an SQL literal
pub fn value_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => real_literal(f),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text_literal(text),
            // keep the exact bytes when the stored text is not valid UTF-8
            Err(_) => format!("CAST({} AS TEXT)", blob_literal(bytes)),
        },
        ValueRef::Blob(bytes) => blob_literal(bytes),
    }
}

fn real_literal(f: f64) -> String {
    if f.is_nan() {
        // SQLite never stores NaN; it reads back as NULL
        "NULL".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "9e999".to_string()
        } else {
            "-9e999".to_string()
        }
    } else {
        // Debug output is the shortest representation that round-trips and
        // always carries a '.' or an exponent, so it re-reads as REAL
        format!("{:?}", f)
    }
}

fn text_literal(text: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        match ch {
            '\n' | '\r' | '\0' => {
                if !current.is_empty() {
                    parts.push(quote_text(&current));
                    current.clear();
                }
                parts.push(format!("char({})", ch as u32));
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || parts.is_empty() {
        parts.push(quote_text(&current));
    }

    parts.join(" || ")
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn blob_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("X'");
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("messages"), "messages");
        assert_eq!(quote_identifier("_tmp1"), "_tmp1");
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("my table"), "\"my table\"");
        assert_eq!(quote_identifier("1st"), "\"1st\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_scalar_literals() {
        assert_eq!(value_literal(ValueRef::Null), "NULL");
        assert_eq!(value_literal(ValueRef::Integer(-42)), "-42");
        assert_eq!(value_literal(ValueRef::Real(1.0)), "1.0");
        assert_eq!(value_literal(ValueRef::Real(0.1)), "0.1");
        assert_eq!(value_literal(ValueRef::Real(1e300)), "1e300");
        assert_eq!(value_literal(ValueRef::Real(f64::INFINITY)), "9e999");
        assert_eq!(value_literal(ValueRef::Real(f64::NEG_INFINITY)), "-9e999");
        assert_eq!(value_literal(ValueRef::Blob(&[0x00, 0xAB, 0x10])), "X'00AB10'");
    }

    #[test]
    fn test_text_literals() {
        assert_eq!(value_literal(ValueRef::Text(b"hello")), "'hello'");
        assert_eq!(value_literal(ValueRef::Text(b"")), "''");
        assert_eq!(
            value_literal(ValueRef::Text(b"it's; DROP TABLE x;--")),
            "'it''s; DROP TABLE x;--'"
        );
        assert_eq!(
            value_literal(ValueRef::Text(b"a\nb")),
            "'a' || char(10) || 'b'"
        );
        assert_eq!(value_literal(ValueRef::Text(b"\r\n")), "char(13) || char(10)");
        assert_eq!(
            value_literal(ValueRef::Text(&[0x66, 0xFF])),
            "CAST(X'66FF' AS TEXT)"
        );
    }

    #[test]
    fn test_literals_never_span_lines() {
        let text = "line one\nline two\r\nline three\n";
        assert!(!value_literal(ValueRef::Text(text.as_bytes())).contains('\n'));
    }
}
