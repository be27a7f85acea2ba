//! Transfer configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::drivers::DatabaseType;
use crate::error::Result;

/// Default pipe-file field delimiter.
pub const DEFAULT_DELIMITER: &str = "{dlm}";
/// Default pipe-file row terminator.
pub const DEFAULT_NEWLINE: &str = "{nwln}";
/// Default pipe-file null placeholder.
pub const DEFAULT_NULL: &str = "{nll}";
/// Default rows per pipe file.
pub const DEFAULT_ROWS_PER_PIPE_FILE: usize = 100_000;
/// Default capacity of the channels between pipeline stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// One transfer, as delivered by the CLI or a YAML file.
///
/// Keys are kebab-case (`source-connection-string`, `keep-files`, ...).
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TransferConfig {
    /// Transfer id; a UUID v4 is generated when absent.
    pub transfer_id: Option<String>,

    /// Retain staging files and the vacuum table after the transfer.
    pub keep_files: bool,

    /// Display name of the source.
    pub source_name: String,
    /// Source engine (postgresql, mysql, mssql, oracle, snowflake, redshift).
    pub source_type: String,
    /// Driver-native source connection string.
    pub source_connection_string: String,

    /// Display name of the target.
    pub target_name: String,
    /// Target engine.
    pub target_type: String,
    /// Driver-native target connection string.
    pub target_connection_string: String,

    /// Target host for external loaders (bcp, sqlldr).
    pub target_hostname: String,
    /// Target port for external loaders.
    pub target_port: Option<u16>,
    /// Target database for external loaders.
    pub target_database: String,
    /// Target user for external loaders.
    pub target_username: String,
    /// Target password for external loaders.
    pub target_password: String,

    pub drop_target_table_if_exists: bool,
    pub create_target_schema_if_not_exists: bool,
    pub create_target_table_if_not_exists: bool,

    pub source_schema: String,
    pub source_table: String,
    pub target_schema: String,
    pub target_table: String,

    /// Ad-hoc source query (mutually exclusive with `source-table`).
    pub query: String,

    /// Pipe-file delimiter (default `{dlm}`).
    pub delimiter: Option<String>,
    /// Pipe-file newline (default `{nwln}`).
    pub newline: Option<String>,
    /// Pipe-file null placeholder (default `{nll}`, `NULL` for MySQL targets).
    pub null: Option<String>,

    /// Watermark column for incremental transfers.
    pub incremental_column: Option<String>,

    /// Delete target rows whose keys are gone from the source.
    pub vacuum: bool,

    /// Load through INSERT statements instead of the bulk loader.
    pub use_insert_statements: bool,

    /// Root of the staging tree (default: `<system tmp>/sqlpipe`).
    pub staging_dir: Option<PathBuf>,

    /// Rows per pipe file (default 100,000).
    pub rows_per_pipe_file: Option<usize>,

    /// Capacity of the inter-stage channels (default 1).
    pub channel_capacity: Option<usize>,
}

impl TransferConfig {
    /// Parsed source engine.
    pub fn source_db_type(&self) -> Result<DatabaseType> {
        self.source_type.parse()
    }

    /// Parsed target engine.
    pub fn target_db_type(&self) -> Result<DatabaseType> {
        self.target_type.parse()
    }

    /// Effective delimiter.
    pub fn delimiter(&self) -> &str {
        self.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER)
    }

    /// Effective newline.
    pub fn newline(&self) -> &str {
        self.newline.as_deref().unwrap_or(DEFAULT_NEWLINE)
    }

    /// Effective null placeholder, honoring the target's default.
    pub fn null(&self) -> &str {
        if let Some(null) = self.null.as_deref() {
            return null;
        }
        self.target_db_type()
            .ok()
            .and_then(|t| t.default_null())
            .unwrap_or(DEFAULT_NULL)
    }

    /// Effective rows per pipe file.
    pub fn rows_per_pipe_file(&self) -> usize {
        self.rows_per_pipe_file.unwrap_or(DEFAULT_ROWS_PER_PIPE_FILE)
    }

    /// Effective channel capacity.
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Effective staging root.
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sqlpipe"))
    }

    /// Whether the source is a table reference rather than a query.
    pub fn has_source_table(&self) -> bool {
        !self.source_table.is_empty()
    }

    /// Copy safe to print, with secrets replaced.
    pub fn redacted(&self) -> TransferConfig {
        let mut copy = self.clone();
        copy.source_connection_string = redact(&copy.source_connection_string).to_string();
        copy.target_connection_string = redact(&copy.target_connection_string).to_string();
        copy.target_password = redact(&copy.target_password).to_string();
        copy
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}

impl fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("transfer_id", &self.transfer_id)
            .field("keep_files", &self.keep_files)
            .field("source_name", &self.source_name)
            .field("source_type", &self.source_type)
            .field(
                "source_connection_string",
                &redact(&self.source_connection_string),
            )
            .field("target_name", &self.target_name)
            .field("target_type", &self.target_type)
            .field(
                "target_connection_string",
                &redact(&self.target_connection_string),
            )
            .field("target_hostname", &self.target_hostname)
            .field("target_port", &self.target_port)
            .field("target_database", &self.target_database)
            .field("target_username", &self.target_username)
            .field("target_password", &redact(&self.target_password))
            .field(
                "drop_target_table_if_exists",
                &self.drop_target_table_if_exists,
            )
            .field(
                "create_target_schema_if_not_exists",
                &self.create_target_schema_if_not_exists,
            )
            .field(
                "create_target_table_if_not_exists",
                &self.create_target_table_if_not_exists,
            )
            .field("source_schema", &self.source_schema)
            .field("source_table", &self.source_table)
            .field("target_schema", &self.target_schema)
            .field("target_table", &self.target_table)
            .field("query", &self.query)
            .field("delimiter", &self.delimiter())
            .field("newline", &self.newline())
            .field("null", &self.null())
            .field("incremental_column", &self.incremental_column)
            .field("vacuum", &self.vacuum)
            .field("use_insert_statements", &self.use_insert_statements)
            .field("staging_dir", &self.staging_root())
            .field("rows_per_pipe_file", &self.rows_per_pipe_file())
            .field("channel_capacity", &self.channel_capacity())
            .finish()
    }
}
