//! Output formatting shared by the command-line interface
//!
//! Commands render their results either as tables (via `tabled`, behind the
//! `display` feature), as plain text or as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    /// Markdown table format
    Markdown,
    /// Compact JSON on a single line
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
    /// Plain `key: value` lines
    Text,
}

impl OutputFormat {
    /// Check if this is a JSON variant
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty)
    }

    /// Check if this is a table variant
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table | Self::Markdown)
    }

    /// Get a list of all format names for help text
    pub fn all_names() -> &'static [&'static str] {
        &["table", "markdown", "json", "json-pretty", "text"]
    }

    /// Serialize `value` as JSON in this format's layout
    ///
    /// Non-JSON formats fall back to compact JSON.
    pub fn to_json<T: Serialize>(&self, value: &T) -> serde_json::Result<String> {
        match self {
            Self::JsonPretty => serde_json::to_string_pretty(value),
            _ => serde_json::to_string(value),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
            Self::Text => write!(f, "text"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" | "plain" => Ok(Self::Text),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("MD").unwrap(), OutputFormat::Markdown);
        assert_eq!(OutputFormat::from_str("json").unwrap(), OutputFormat::Json);
        assert_eq!(
            OutputFormat::from_str("json-pretty").unwrap(),
            OutputFormat::JsonPretty
        );
        assert_eq!(OutputFormat::from_str("plain").unwrap(), OutputFormat::Text);
        assert!(OutputFormat::from_str("psv").is_err());
    }

    #[test]
    fn test_output_format_display_round_trips() {
        for name in OutputFormat::all_names() {
            let format = OutputFormat::from_str(name).unwrap();
            assert_eq!(&format.to_string(), name);
        }
    }

    #[test]
    fn test_to_json() {
        let value = serde_json::json!({"state": "running"});
        assert_eq!(
            OutputFormat::Json.to_json(&value).unwrap(),
            r#"{"state":"running"}"#
        );
        assert!(OutputFormat::JsonPretty
            .to_json(&value)
            .unwrap()
            .contains('\n'));
        assert!(OutputFormat::Json.is_json());
        assert!(!OutputFormat::Text.is_json());
        assert!(OutputFormat::Markdown.is_table());
    }
}
