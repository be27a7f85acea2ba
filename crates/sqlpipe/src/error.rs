//! Error types for the transfer library.

use std::path::PathBuf;

use thiserror::Error;

/// Maximum statement length carried into error messages.
const MAX_STATEMENT_LEN: usize = 1000;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum PipeError {
    /// Configuration error (invalid YAML, missing fields, bad combinations)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection open or ping failure
    #[error("Connection error ({dialect}): {message}")]
    Connect { dialect: String, message: String },

    /// Source or target SQL failure
    #[error("Query error ({dialect}): {message}\n  Statement: {}", truncate_statement(statement))]
    Query {
        dialect: String,
        statement: String,
        message: String,
    },

    /// A native type with no canonical mapping, or a canonical type with no DDL form
    #[error("Type mapping error ({dialect}): column {column} has unsupported type {type_name}")]
    TypeMap {
        dialect: String,
        column: String,
        type_name: String,
    },

    /// A value formatter rejected its input
    #[error("Format error ({canonical}): {message} (value: {value})")]
    Format {
        canonical: String,
        value: String,
        message: String,
    },

    /// IO error (staging directories, pipe and final files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error tied to a specific staging file
    #[error("IO error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External loader exited non-zero
    #[error("Loader {tool} failed with {status}\n{output}")]
    Loader {
        tool: String,
        status: String,
        output: String,
    },

    /// Table does not exist on the target
    #[error("Table {table} not found ({dialect}): {message}")]
    TableNotFound {
        dialect: String,
        table: String,
        message: String,
    },

    /// Failure inside a pipeline stage
    #[error("{stage} failed ({dialect})")]
    Stage {
        stage: String,
        dialect: String,
        #[source]
        source: Box<PipeError>,
    },

    /// CSV reader or writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transfer was cancelled (SIGINT, SIGTERM, or a failed sibling stage)
    #[error("Transfer cancelled")]
    Cancelled,
}

impl PipeError {
    /// Create a Connect error.
    pub fn connect(dialect: impl Into<String>, message: impl ToString) -> Self {
        PipeError::Connect {
            dialect: dialect.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error carrying the offending statement.
    pub fn query(
        dialect: impl Into<String>,
        statement: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        PipeError::Query {
            dialect: dialect.into(),
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Create a TypeMap error.
    pub fn type_map(
        dialect: impl Into<String>,
        column: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        PipeError::TypeMap {
            dialect: dialect.into(),
            column: column.into(),
            type_name: type_name.into(),
        }
    }

    /// Create a Format error.
    pub fn format(
        canonical: impl ToString,
        value: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        PipeError::Format {
            canonical: canonical.to_string(),
            value: value.into(),
            message: message.to_string(),
        }
    }

    /// Create a File error for a staging path.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipeError::File {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with the pipeline stage and dialect it occurred in.
    pub fn in_stage(self, stage: impl Into<String>, dialect: impl Into<String>) -> Self {
        match self {
            // Cancellation and nested stage errors keep their original shape
            PipeError::Cancelled | PipeError::Stage { .. } => self,
            other => PipeError::Stage {
                stage: stage.into(),
                dialect: dialect.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PipeError::Cancelled => true,
            PipeError::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Process exit code for this error. Every failure maps to 1.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Truncate a statement to the length carried in error messages.
pub fn truncate_statement(statement: &str) -> String {
    if statement.chars().count() <= MAX_STATEMENT_LEN {
        return statement.to_string();
    }
    let truncated: String = statement.chars().take(MAX_STATEMENT_LEN).collect();
    format!("{}...", truncated)
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, PipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_truncates_statement() {
        let statement = "x".repeat(5000);
        let err = PipeError::query("postgresql", statement, "syntax error");
        let rendered = err.to_string();
        assert!(rendered.contains("syntax error"));
        assert!(rendered.len() < 1100);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_short_statement_is_not_truncated() {
        assert_eq!(truncate_statement("select 1"), "select 1");
    }

    #[test]
    fn test_stage_error_names_stage_and_cause() {
        let err = PipeError::query("mysql", "select 1", "boom").in_stage("source reader", "mysql");
        let detailed = err.format_detailed();
        assert!(detailed.contains("source reader failed (mysql)"));
        assert!(detailed.contains("Caused by:"));
        assert!(detailed.contains("boom"));
    }

    #[test]
    fn test_cancelled_is_not_wrapped() {
        let err = PipeError::Cancelled.in_stage("loader", "mssql");
        assert!(matches!(err, PipeError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_exit_code_is_one() {
        assert_eq!(PipeError::Config("bad".into()).exit_code(), 1);
        assert_eq!(PipeError::Cancelled.exit_code(), 1);
    }
}
