use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single nullable scalar as returned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Edited text as the write path sees it: empty means null.
    #[must_use]
    pub fn from_edit_text(text: &str) -> Self {
        if text.is_empty() {
            Self::Null
        } else {
            Self::Text(text.to_string())
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text handed to the engine for coercion; `None` only for nulls. Empty
    /// edits were already turned into nulls by [`CellValue::from_edit_text`].
    #[must_use]
    pub fn to_write_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Parquet,
    Csv,
}

impl OutputFormat {
    /// Picks a format from the destination's extension; Parquet otherwise.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv" | "tsv" | "txt") => Self::Csv,
            _ => Self::Parquet,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
}

impl ExecutorError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The embedded engine as seen by a query session.
///
/// `describe` opens the source and exposes it as table `t` for every later
/// query. Queries may nest arbitrary query text as a named subquery and quote
/// identifiers with double quotes.
#[async_trait]
pub trait TabularExecutor: Send + Sync {
    async fn describe(&self, source: &str) -> Result<Vec<ColumnInfo>, ExecutorError>;

    async fn count(&self, query: &str) -> Result<u64, ExecutorError>;

    async fn execute(&self, query: &str) -> Result<ResultSet, ExecutorError>;

    async fn write_full(
        &self,
        columns: &[String],
        rows: &[Vec<CellValue>],
        destination: &Path,
        format: OutputFormat,
    ) -> Result<u64, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{CellValue, OutputFormat, ResultSet};

    #[test]
    fn empty_edit_text_is_null_on_write() {
        assert_eq!(CellValue::from_edit_text(""), CellValue::Null);
        assert_eq!(
            CellValue::from_edit_text("12"),
            CellValue::Text("12".to_string())
        );
        assert_eq!(
            CellValue::Text(String::new()).to_write_text().as_deref(),
            Some("")
        );
        assert_eq!(CellValue::Integer(7).to_write_text().as_deref(), Some("7"));
        assert_eq!(CellValue::Float(1.5).to_write_text().as_deref(), Some("1.5"));
        assert_eq!(CellValue::Null.to_write_text(), None);
    }

    #[test]
    fn display_renders_null_as_empty() {
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::Boolean(true).to_string(), "true");
        assert_eq!(CellValue::Text("abc".to_string()).to_string(), "abc");
    }

    #[test]
    fn looks_up_values_by_column_name() {
        let result = ResultSet::new(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![CellValue::Integer(1), CellValue::Text("a".to_string())]],
        );
        assert_eq!(result.value(0, "name"), Some(&CellValue::Text("a".to_string())));
        assert_eq!(result.value(0, "missing"), None);
        assert_eq!(result.value(3, "id"), None);
    }

    #[test]
    fn output_format_follows_extension() {
        assert_eq!(OutputFormat::from_path(Path::new("out.CSV")), OutputFormat::Csv);
        assert_eq!(
            OutputFormat::from_path(Path::new("out.parquet")),
            OutputFormat::Parquet
        );
        assert_eq!(OutputFormat::from_path(Path::new("out")), OutputFormat::Parquet);
    }
}
