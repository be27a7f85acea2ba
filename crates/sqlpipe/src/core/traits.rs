//! Core traits for dialect-polymorphic transfers.
//!
//! - [`Dialect`]: pure per-engine strategy (quoting, type maps, DDL text,
//!   value formatters, load shape). No I/O.
//! - [`Engine`]: a live connection to one engine. Required methods are the
//!   operations every engine must implement; provided methods are the shared
//!   DDL/introspection paths that engines override only when their SQL differs.
//!
//! # Design Patterns
//!
//! - **Strategy**: each engine's `Dialect` supplies interchangeable SQL rules
//! - **Template Method**: provided `Engine` methods build statements from the
//!   dialect and run them through the engine's required `exec`/`query`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::cursor::RowCursor;
use crate::core::identifier::{escape_if_needed, quote_with, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::value::{Row, SqlValue};
use crate::dialect::{ddl, CanonicalType};
use crate::error::{PipeError, Result};
use crate::transfer::TransferInfo;

/// How final files are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalLayout {
    /// RFC-4180 style: `,` between fields, `\n` between rows, `"` quoting
    /// when needed, nulls written unquoted as the dialect's null token.
    Csv,
    /// Transfer delimiter and newline, no quoting (the loader is told the
    /// terminators explicitly).
    Delimited,
}

/// Statement shape used by the generic INSERT path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertForm {
    /// `INSERT INTO t (cols) VALUES (...),(...)`
    RowVector,
    /// `INSERT INTO t (cols) WITH t_to_insert (cols) AS (SELECT ... FROM dual UNION ALL ...) SELECT * FROM t_to_insert`
    SelectUnion,
    /// `INSERT INTO t (cols) SELECT PARSE_JSON(column1), column2 FROM VALUES (...)`
    /// when a JSON column is present, row-vector otherwise.
    ValuesParseJson,
}

/// When the INSERT builder flushes a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    /// Flush after this many rows.
    Rows(usize),
    /// Flush once the statement text exceeds this many characters.
    Chars(usize),
}

/// SQL syntax and value-encoding strategy for one engine.
///
/// Every method that is keyed on [`CanonicalType`] is implemented with an
/// exhaustive `match`, so a new canonical type does not compile until each
/// dialect handles it.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "postgresql", "mssql").
    fn name(&self) -> &'static str;

    // ===== Identifiers =====

    /// Opening and closing identifier quote characters.
    fn quote_chars(&self) -> (char, char);

    /// Quote an identifier unconditionally.
    ///
    /// - PostgreSQL, Oracle, Snowflake, Redshift: `"identifier"`
    /// - MySQL: `` `identifier` ``
    /// - MSSQL: `[identifier]`
    fn escape(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        quote_with(name, open, close)
    }

    /// Whether `name` is a reserved keyword that must always be quoted.
    fn is_reserved_keyword(&self, _name: &str) -> bool {
        false
    }

    /// Whether tables are addressed as `schema.table`.
    fn schema_required(&self) -> bool;

    /// Null placeholder used when this dialect is the target and the user
    /// did not choose one.
    fn default_null(&self) -> Option<&'static str> {
        None
    }

    // ===== Type mapping =====

    /// Map a driver-reported type name (uppercase) to a canonical type.
    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType>;

    /// Map an information-schema type name to a canonical type.
    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType>;

    /// DDL type for a column in CREATE TABLE.
    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String>;

    // ===== Value formatting =====

    /// Pipe-file text for a non-null driver value (source side).
    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String>;

    /// Final-file field for a non-null pipe value (target side, bulk path).
    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String>;

    /// SQL literal for a non-null pipe value.
    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String>;

    /// How a null is written to a final file on the bulk path.
    fn final_null(&self, _null_placeholder: &str) -> String {
        String::new()
    }

    /// Final-file layout expected by the bulk loader.
    fn final_layout(&self) -> FinalLayout {
        FinalLayout::Csv
    }

    /// Name of the bulk loader, or `None` when the engine always loads
    /// through INSERT statements.
    fn bulk_loader(&self) -> Option<&'static str> {
        None
    }

    /// INSERT statement form.
    fn insert_form(&self) -> InsertForm {
        InsertForm::RowVector
    }

    /// INSERT batch boundary.
    fn insert_batch_limit(&self) -> BatchLimit;

    /// Whether `(a, b) IN ((1, 2), ...)` row-value comparisons parse.
    fn supports_row_values(&self) -> bool {
        true
    }

    // ===== DDL =====

    /// Statement creating `schema` when absent.
    fn create_schema_sql(&self, schema: &str) -> String {
        format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            escape_if_needed(schema, self.as_dyn())
        )
    }

    /// Statement dropping a table when present.
    fn drop_table_sql(&self, schema: &str, table: &str) -> String {
        format!(
            "drop table if exists {}",
            schema_period_table(schema, table, self.as_dyn(), true)
        )
    }

    /// Statement creating a table when absent. Primary keys are embedded
    /// only for incremental transfers.
    fn create_table_sql(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        incremental: bool,
    ) -> Result<String> {
        let body = ddl::column_definitions(columns, incremental, self.as_dyn())?;
        Ok(format!(
            "create table if not exists {} ({})",
            schema_period_table(schema, table, self.as_dyn(), true),
            body
        ))
    }

    /// Query yielding one primary-key column name per row.
    fn primary_keys_sql(&self, schema: &str, table: &str) -> String;

    /// Query yielding `(name, type, precision, scale, length, is_primary)`
    /// per column, with `-1` for unknown numbers.
    fn column_infos_sql(&self, schema: &str, table: &str) -> String;

    /// Query yielding the high-watermark of an incremental column.
    fn incremental_time_sql(&self, schema: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT max({}) FROM {}",
            escape_if_needed(column, self.as_dyn()),
            schema_period_table(schema, table, self.as_dyn(), true)
        )
    }

    /// Whether a driver error message means the table does not exist.
    fn is_table_not_found_error(&self, message: &str) -> bool;

    /// Extra file the bulk loader needs next to a final file, as a path and
    /// its contents (Oracle's `.ctl`). Built from the final file's text so the
    /// caller owns all file IO.
    fn load_sidecar(
        &self,
        _final_file: &Path,
        _contents: &str,
        _columns: &[ColumnInfo],
        _info: &TransferInfo,
        _schema: &str,
        _table: &str,
    ) -> Result<Option<(PathBuf, String)>> {
        Ok(None)
    }

    /// Upcast helper for provided methods.
    fn as_dyn(&self) -> &dyn Dialect;
}

/// A live connection to one engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// SQL strategy for this engine.
    fn dialect(&self) -> &dyn Dialect;

    /// Display name recorded at open time.
    fn display_name(&self) -> &str;

    /// Execute a DQL statement and stream its rows.
    async fn query(&self, sql: &str) -> Result<RowCursor>;

    /// Execute DDL/DML.
    async fn exec(&self, sql: &str) -> Result<()>;

    /// Execute a single-row probe; `None` when no row comes back.
    async fn query_row(&self, sql: &str) -> Result<Option<Row>> {
        let mut cursor = self.query(sql).await?;
        cursor.next().await.transpose()
    }

    /// Release resources. Failures are logged, never returned.
    async fn close(&self, print_error: bool);

    /// Apply one final file to `schema.table`. Engines without an external
    /// loader build INSERT batches from the file.
    async fn run_insert_cmd(
        &self,
        final_file: &Path,
        info: &TransferInfo,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Result<()>;

    /// Prepare per-transfer load state (e.g. Snowflake stage and file format).
    async fn begin_load(&self, _info: &TransferInfo, _schema: &str) -> Result<()> {
        Ok(())
    }

    /// Tear down per-transfer load state.
    async fn end_load(&self, _info: &TransferInfo, _schema: &str) -> Result<()> {
        Ok(())
    }

    // ===== Shared DDL paths =====

    /// Create `schema` if it does not exist.
    async fn create_schema_if_not_exists(&self, schema: &str) -> Result<()> {
        self.exec(&self.dialect().create_schema_sql(schema)).await?;
        info!(
            "schema {} created if not exists in {}",
            schema,
            self.display_name()
        );
        Ok(())
    }

    /// Drop a table if it exists.
    async fn drop_table_if_exists(&self, schema: &str, table: &str) -> Result<()> {
        self.exec(&self.dialect().drop_table_sql(schema, table)).await?;
        info!(
            "dropped {} if exists in {}",
            schema_period_table(schema, table, self.dialect(), true),
            self.display_name()
        );
        Ok(())
    }

    /// Create a table if it does not exist.
    async fn create_table_if_not_exists(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        incremental: bool,
    ) -> Result<()> {
        let sql = self
            .dialect()
            .create_table_sql(schema, table, columns, incremental)?;
        self.exec(&sql).await?;
        info!(
            "created {} if not exists in {}",
            schema_period_table(schema, table, self.dialect(), true),
            self.display_name()
        );
        Ok(())
    }

    // ===== Introspection =====

    /// Primary-key column names of a table, in key order.
    async fn primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let sql = self.dialect().primary_keys_sql(schema, table);
        let mut cursor = self.query(&sql).await?;
        let mut keys = Vec::new();
        while let Some(row) = cursor.next().await {
            let row = row?;
            if let Some(name) = row.first().and_then(value_as_string) {
                keys.push(name);
            }
        }
        debug!("primary keys of {}.{}: {:?}", schema, table, keys);
        Ok(keys)
    }

    /// Column descriptors of a table read from the catalog.
    async fn table_column_infos(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = self.dialect().column_infos_sql(schema, table);
        let mut cursor = self.query(&sql).await?;
        let mut columns = Vec::new();
        while let Some(row) = cursor.next().await {
            columns.push(catalog_row_to_column(&row?, self.dialect())?);
        }
        if columns.is_empty() {
            return Err(PipeError::TableNotFound {
                dialect: self.dialect().name().to_string(),
                table: schema_period_table(schema, table, self.dialect(), false),
                message: "no columns found in catalog".to_string(),
            });
        }
        Ok(columns)
    }

    /// High-watermark of `column` in the target table rendered as a pipe
    /// value, or `None` when this must be an initial load (table absent or
    /// empty).
    async fn incremental_time(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        canonical: CanonicalType,
    ) -> Result<Option<String>> {
        let sql = self.dialect().incremental_time_sql(schema, table, column);
        let row = match self.query_row(&sql).await {
            Ok(row) => row,
            Err(e) if is_table_not_found(&e, self.dialect()) => {
                info!(
                    "{} not found in {}, running initial load",
                    table,
                    self.display_name()
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match row.as_ref().and_then(|r| r.first()) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(value) => Ok(Some(self.dialect().pipe_value(canonical, value)?)),
        }
    }
}

/// Whether `err` means the table does not exist, per the dialect predicate.
pub fn is_table_not_found(err: &PipeError, dialect: &dyn Dialect) -> bool {
    match err {
        PipeError::TableNotFound { .. } => true,
        PipeError::Query { message, .. } => dialect.is_table_not_found_error(message),
        PipeError::Stage { source, .. } => is_table_not_found(source, dialect),
        _ => false,
    }
}

/// Read a catalog value as text.
pub fn value_as_string(value: &SqlValue<'_>) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.to_string()),
        other => Some(other.to_string()),
    }
}

/// Read a catalog value as an integer; `-1` and unparsable values are `None`.
pub fn value_as_i64(value: &SqlValue<'_>) -> Option<i64> {
    let n = match value {
        SqlValue::I16(v) => *v as i64,
        SqlValue::I32(v) => *v as i64,
        SqlValue::I64(v) => *v,
        SqlValue::U64(v) => i64::try_from(*v).ok()?,
        SqlValue::Decimal(d) => d.trunc().to_string().parse().ok()?,
        SqlValue::F64(f) => *f as i64,
        SqlValue::Text(s) => s.trim().parse::<f64>().ok()? as i64,
        SqlValue::Bool(b) => *b as i64,
        _ => return None,
    };
    (n >= 0).then_some(n)
}

/// Build a [`ColumnInfo`] from a `(name, type, precision, scale, length, is_primary)` row.
pub fn catalog_row_to_column(row: &[SqlValue<'_>], dialect: &dyn Dialect) -> Result<ColumnInfo> {
    let get = |i: usize| row.get(i).unwrap_or(&SqlValue::Null);

    let name = value_as_string(get(0))
        .ok_or_else(|| PipeError::Config("catalog row is missing a column name".into()))?;
    let type_name = value_as_string(get(1)).unwrap_or_default();

    let canonical = dialect
        .db_type_to_canonical(type_name.trim())
        .ok_or_else(|| PipeError::type_map(dialect.name(), &name, &type_name))?;

    let precision = value_as_i64(get(2));
    let scale = value_as_i64(get(3));
    let length = value_as_i64(get(4));
    let is_primary = match get(5) {
        SqlValue::Bool(b) => *b,
        SqlValue::Text(s) => matches!(s.trim(), "1" | "true" | "t" | "YES" | "Y"),
        other => value_as_i64(other).unwrap_or(0) == 1,
    };

    Ok(ColumnInfo {
        name,
        canonical,
        length,
        decimal: precision.zip(scale),
        is_primary_key: is_primary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DialectImpl;

    #[test]
    fn test_catalog_row_to_column() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        let row = vec![
            SqlValue::text("amount"),
            SqlValue::text("numeric"),
            SqlValue::I32(12),
            SqlValue::I32(2),
            SqlValue::I32(-1),
            SqlValue::Bool(true),
        ];
        let col = catalog_row_to_column(&row, &pg).unwrap();
        assert_eq!(col.canonical, CanonicalType::Decimal);
        assert_eq!(col.decimal, Some((12, 2)));
        assert_eq!(col.length, None);
        assert!(col.is_primary_key);
    }

    #[test]
    fn test_catalog_row_unknown_type_is_type_map_error() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        let row = vec![
            SqlValue::text("shape"),
            SqlValue::text("hypercube"),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::I32(0),
        ];
        let err = catalog_row_to_column(&row, &pg).unwrap_err();
        assert!(matches!(err, PipeError::TypeMap { ref column, .. } if column == "shape"));
    }

    #[test]
    fn test_is_table_not_found_uses_dialect_predicate() {
        let mysql = DialectImpl::from_db_type("mysql").unwrap();
        let err = PipeError::query("mysql", "select max(x) from t", "Table 'db.t' doesn't exist");
        assert!(is_table_not_found(&err, &mysql));
        let other = PipeError::query("mysql", "select 1", "Access denied");
        assert!(!is_table_not_found(&other, &mysql));
    }

    #[test]
    fn test_value_as_i64_treats_negative_as_unknown() {
        assert_eq!(value_as_i64(&SqlValue::I32(-1)), None);
        assert_eq!(value_as_i64(&SqlValue::text("38")), Some(38));
        assert_eq!(value_as_i64(&SqlValue::Null), None);
    }
}
