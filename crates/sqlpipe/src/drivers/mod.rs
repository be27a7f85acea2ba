//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL
//! - [`redshift`]: Amazon Redshift (PostgreSQL wire protocol)
//! - [`mysql`]: MySQL/MariaDB
//! - [`mssql`]: Microsoft SQL Server
//! - [`oracle`]: Oracle
//! - [`snowflake`]: Snowflake
//! - [`common`]: Shared utilities (TLS, external loaders)
//!
//! # Architecture
//!
//! Each driver module provides:
//! - a `Dialect`: SQL syntax and value-encoding strategy
//! - an `Engine`: pooled connection implementing query, exec and load
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect` and `Engine`
//! 3. Add a variant to [`DatabaseType`] and [`DialectImpl`]
//! 4. Open it in [`open_engine`]

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod redshift;
pub mod snowflake;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use common::{SslMode, TlsBuilder};
pub use mssql::{MssqlDialect, MssqlEngine};
pub use mysql::{MysqlDialect, MysqlEngine};
pub use oracle::{OracleDialect, OracleEngine};
pub use postgres::{PostgresDialect, PostgresEngine};
pub use redshift::{RedshiftDialect, RedshiftEngine};
pub use snowflake::{SnowflakeDialect, SnowflakeEngine};

use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect, Engine, FinalLayout, InsertForm};
use crate::core::value::SqlValue;
use crate::dialect::CanonicalType;
use crate::error::{PipeError, Result};
use crate::transfer::TransferInfo;

/// Supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgresql,
    Mysql,
    Mssql,
    Oracle,
    Snowflake,
    Redshift,
}

impl DatabaseType {
    /// Every supported engine.
    pub const ALL: [DatabaseType; 6] = [
        DatabaseType::Postgresql,
        DatabaseType::Mysql,
        DatabaseType::Mssql,
        DatabaseType::Oracle,
        DatabaseType::Snowflake,
        DatabaseType::Redshift,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Postgresql => "postgresql",
            DatabaseType::Mysql => "mysql",
            DatabaseType::Mssql => "mssql",
            DatabaseType::Oracle => "oracle",
            DatabaseType::Snowflake => "snowflake",
            DatabaseType::Redshift => "redshift",
        }
    }

    /// SQL strategy for this engine.
    pub fn dialect(&self) -> DialectImpl {
        match self {
            DatabaseType::Postgresql => DialectImpl::Postgres(PostgresDialect::new()),
            DatabaseType::Mysql => DialectImpl::Mysql(MysqlDialect::new()),
            DatabaseType::Mssql => DialectImpl::Mssql(MssqlDialect::new()),
            DatabaseType::Oracle => DialectImpl::Oracle(OracleDialect::new()),
            DatabaseType::Snowflake => DialectImpl::Snowflake(SnowflakeDialect::new()),
            DatabaseType::Redshift => DialectImpl::Redshift(RedshiftDialect::new()),
        }
    }

    /// Null placeholder this engine wants when it is the target.
    pub fn default_null(&self) -> Option<&'static str> {
        self.dialect().default_null()
    }
}

impl FromStr for DatabaseType {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(DatabaseType::Postgresql),
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            "mssql" | "sqlserver" | "sql_server" => Ok(DatabaseType::Mssql),
            "oracle" => Ok(DatabaseType::Oracle),
            "snowflake" => Ok(DatabaseType::Snowflake),
            "redshift" => Ok(DatabaseType::Redshift),
            other => Err(PipeError::Config(format!(
                "Unknown database type: '{}'. Supported types: postgresql, mysql, mssql, oracle, snowflake, redshift",
                other
            ))),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open a pooled engine for `db_type`.
pub async fn open_engine(
    db_type: DatabaseType,
    name: &str,
    connection_string: &str,
) -> Result<Arc<dyn Engine>> {
    let engine: Arc<dyn Engine> = match db_type {
        DatabaseType::Postgresql => {
            Arc::new(PostgresEngine::<PostgresDialect>::connect(name, connection_string).await?)
        }
        DatabaseType::Redshift => {
            Arc::new(RedshiftEngine::connect(name, connection_string).await?)
        }
        DatabaseType::Mysql => Arc::new(MysqlEngine::connect(name, connection_string).await?),
        DatabaseType::Mssql => Arc::new(MssqlEngine::connect(name, connection_string).await?),
        DatabaseType::Oracle => Arc::new(OracleEngine::connect(name, connection_string).await?),
        DatabaseType::Snowflake => {
            Arc::new(SnowflakeEngine::connect(name, connection_string).await?)
        }
    };
    Ok(engine)
}

/// Enum-based static dispatch for dialects.
///
/// The compiler generates a match instead of a vtable call; `&dyn Dialect`
/// is still available through [`Dialect::as_dyn`].
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    Mysql(MysqlDialect),
    Mssql(MssqlDialect),
    Oracle(OracleDialect),
    Snowflake(SnowflakeDialect),
    Redshift(RedshiftDialect),
}

impl DialectImpl {
    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns an error if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        Ok(db_type.parse::<DatabaseType>()?.dialect())
    }
}

/// Forward a `Dialect` call to the wrapped dialect.
macro_rules! dispatch {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            DialectImpl::Postgres($d) => $call,
            DialectImpl::Mysql($d) => $call,
            DialectImpl::Mssql($d) => $call,
            DialectImpl::Oracle($d) => $call,
            DialectImpl::Snowflake($d) => $call,
            DialectImpl::Redshift($d) => $call,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &'static str {
        dispatch!(self, d => d.name())
    }

    fn quote_chars(&self) -> (char, char) {
        dispatch!(self, d => d.quote_chars())
    }

    fn escape(&self, name: &str) -> String {
        dispatch!(self, d => d.escape(name))
    }

    fn is_reserved_keyword(&self, name: &str) -> bool {
        dispatch!(self, d => d.is_reserved_keyword(name))
    }

    fn schema_required(&self) -> bool {
        dispatch!(self, d => d.schema_required())
    }

    fn default_null(&self) -> Option<&'static str> {
        dispatch!(self, d => d.default_null())
    }

    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType> {
        dispatch!(self, d => d.driver_type_to_canonical(native))
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        dispatch!(self, d => d.db_type_to_canonical(catalog))
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        dispatch!(self, d => d.canonical_to_ddl(column))
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
        dispatch!(self, d => d.pipe_value(canonical, value))
    }

    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        dispatch!(self, d => d.final_value(canonical, value))
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        dispatch!(self, d => d.sql_value(canonical, value))
    }

    fn final_null(&self, null_placeholder: &str) -> String {
        dispatch!(self, d => d.final_null(null_placeholder))
    }

    fn final_layout(&self) -> FinalLayout {
        dispatch!(self, d => d.final_layout())
    }

    fn bulk_loader(&self) -> Option<&'static str> {
        dispatch!(self, d => d.bulk_loader())
    }

    fn insert_form(&self) -> InsertForm {
        dispatch!(self, d => d.insert_form())
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        dispatch!(self, d => d.insert_batch_limit())
    }

    fn supports_row_values(&self) -> bool {
        dispatch!(self, d => d.supports_row_values())
    }

    fn create_schema_sql(&self, schema: &str) -> String {
        dispatch!(self, d => d.create_schema_sql(schema))
    }

    fn drop_table_sql(&self, schema: &str, table: &str) -> String {
        dispatch!(self, d => d.drop_table_sql(schema, table))
    }

    fn create_table_sql(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        incremental: bool,
    ) -> Result<String> {
        dispatch!(self, d => d.create_table_sql(schema, table, columns, incremental))
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        dispatch!(self, d => d.primary_keys_sql(schema, table))
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        dispatch!(self, d => d.column_infos_sql(schema, table))
    }

    fn incremental_time_sql(&self, schema: &str, table: &str, column: &str) -> String {
        dispatch!(self, d => d.incremental_time_sql(schema, table, column))
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        dispatch!(self, d => d.is_table_not_found_error(message))
    }

    fn load_sidecar(
        &self,
        final_file: &Path,
        contents: &str,
        columns: &[ColumnInfo],
        info: &TransferInfo,
        schema: &str,
        table: &str,
    ) -> Result<Option<(PathBuf, String)>> {
        dispatch!(self, d => d.load_sidecar(final_file, contents, columns, info, schema, table))
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}
