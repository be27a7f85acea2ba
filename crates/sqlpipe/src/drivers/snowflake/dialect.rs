//! Snowflake SQL dialect.
//!
//! Bulk loads stage final CSV files with `PUT` in chunks of at most
//! [`MAX_UPLOAD_BYTES`] and apply them with one `COPY INTO`. The INSERT path wraps JSON columns in `PARSE_JSON`, which
//! Snowflake only accepts in a `SELECT ... FROM VALUES` form.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::identifier::{escape_if_needed, quote_literal, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect, InsertForm};
use crate::core::value::SqlValue;
use crate::dialect::{format, CanonicalType};
use crate::error::{PipeError, Result};

/// Largest NUMBER precision.
const MAX_DECIMAL_PRECISION: i64 = 38;

/// Fractional-second digits Snowflake keeps.
const FRACTION_DIGITS: usize = 9;

/// Name of the CSV file format created in the target schema.
pub const FILE_FORMAT_NAME: &str = "sqlpipe_csv";

/// Largest staged upload. Bigger final files are split at row boundaries.
pub const MAX_UPLOAD_BYTES: usize = 10_000;

/// Snowflake reserved keywords.
const RESERVED_KEYWORDS: &[&str] = &[
    "ACCOUNT", "ALL", "ALTER", "AND", "ANY", "AS", "BETWEEN", "BY", "CASE", "CAST", "CHECK",
    "COLUMN", "CONNECT", "CONNECTION", "CONSTRAINT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DELETE",
    "DISTINCT", "DROP", "ELSE", "EXISTS", "FALSE", "FOLLOWING", "FOR", "FROM", "FULL", "GRANT",
    "GROUP", "GSCLUSTER", "HAVING", "ILIKE", "IN", "INCREMENT", "INNER", "INSERT", "INTERSECT",
    "INTO", "IS", "ISSUE", "JOIN", "LATERAL", "LEFT", "LIKE", "LOCALTIME", "LOCALTIMESTAMP",
    "MINUS", "NATURAL", "NOT", "NULL", "OF", "ON", "OR", "ORDER", "ORGANIZATION", "QUALIFY",
    "REGEXP", "REVOKE", "RIGHT", "RLIKE", "ROW", "ROWS", "SAMPLE", "SCHEMA", "SELECT", "SET",
    "SOME", "START", "TABLE", "TABLESAMPLE", "THEN", "TO", "TRIGGER", "TRUE", "TRY_CAST",
    "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHENEVER", "WHERE", "WITH",
];

/// Snowflake dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct SnowflakeDialect;

impl SnowflakeDialect {
    /// Create a new Snowflake dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Stage name for a transfer: `sqlpipe_` plus 10 hex chars of
    /// SHA-256 of the transfer id.
    pub fn stage_name(transfer_id: &str) -> String {
        let digest = hex::encode(Sha256::digest(transfer_id.as_bytes()));
        format!("sqlpipe_{}", &digest[..10])
    }

    /// `CREATE OR REPLACE FILE FORMAT <schema>.sqlpipe_csv ...`
    pub fn file_format_sql(&self, schema: &str) -> String {
        format!(
            "CREATE OR REPLACE FILE FORMAT {} TYPE=CSV FIELD_OPTIONALLY_ENCLOSED_BY='\"' COMPRESSION=NONE",
            schema_period_table(schema, FILE_FORMAT_NAME, self, true)
        )
    }

    /// `CREATE STAGE IF NOT EXISTS <schema>.<stage>`
    pub fn create_stage_sql(&self, schema: &str, stage: &str) -> String {
        format!(
            "CREATE STAGE IF NOT EXISTS {}",
            schema_period_table(schema, stage, self, true)
        )
    }

    /// `DROP STAGE IF EXISTS <schema>.<stage>`
    pub fn drop_stage_sql(&self, schema: &str, stage: &str) -> String {
        format!(
            "DROP STAGE IF EXISTS {}",
            schema_period_table(schema, stage, self, true)
        )
    }

    /// `PUT file://<path> @<schema>.<stage> ...`
    pub fn put_sql(&self, final_file: &Path, schema: &str, stage: &str) -> String {
        format!(
            "PUT 'file://{}' @{} SOURCE_COMPRESSION=NONE AUTO_COMPRESS=FALSE OVERWRITE=TRUE",
            final_file.to_string_lossy().replace('\\', "/"),
            schema_period_table(schema, stage, self, true)
        )
    }

    /// `COPY INTO` for staged files. JSON columns are parsed on the way
    /// in; a plain CSV copy would store them as strings.
    pub fn copy_sql(
        &self,
        files: &[PathBuf],
        schema: &str,
        table: &str,
        stage: &str,
        columns: &[ColumnInfo],
    ) -> String {
        let file_names: Vec<String> = files
            .iter()
            .map(|f| {
                let name = f
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                quote_literal(&name)
            })
            .collect();
        let stage = format!("@{}", schema_period_table(schema, stage, self, true));
        let source = if columns.iter().any(|c| c.canonical == CanonicalType::Json) {
            let projection: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| match c.canonical {
                    CanonicalType::Json => format!("PARSE_JSON(${})", i + 1),
                    _ => format!("${}", i + 1),
                })
                .collect();
            format!("(SELECT {} FROM {})", projection.join(", "), stage)
        } else {
            stage
        };
        format!(
            "COPY INTO {} FROM {} FILES = ({}) FILE_FORMAT = (FORMAT_NAME = '{}')",
            schema_period_table(schema, table, self, true),
            source,
            file_names.join(", "),
            schema_period_table(schema, FILE_FORMAT_NAME, self, true)
        )
    }

    /// One `PUT` per staged file followed by the `COPY INTO` reading them all.
    pub fn upload_statements(
        &self,
        files: &[PathBuf],
        schema: &str,
        table: &str,
        stage: &str,
        columns: &[ColumnInfo],
    ) -> Vec<String> {
        let mut statements: Vec<String> = files
            .iter()
            .map(|f| self.put_sql(f, schema, stage))
            .collect();
        statements.push(self.copy_sql(files, schema, table, stage, columns));
        statements
    }
}

/// Split a final CSV into `<stem>-partNNN.<ext>` siblings of at most
/// `limit` bytes each. Rows are never broken, so a single row longer than
/// `limit` gets a chunk of its own. Files within the limit come back as is.
pub fn split_for_upload(final_file: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let data = fs::read(final_file).map_err(|e| PipeError::file(final_file, e))?;
    if data.len() <= limit {
        return Ok(vec![final_file.to_path_buf()]);
    }

    let stem = final_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = final_file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut parts = Vec::new();
    let mut write_part = |chunk: &[u8]| -> Result<()> {
        let path = final_file.with_file_name(format!("{}-part{:03}{}", stem, parts.len() + 1, ext));
        fs::write(&path, chunk).map_err(|e| PipeError::file(&path, e))?;
        parts.push(path);
        Ok(())
    };

    let mut chunk_start = 0;
    let mut row_start = 0;
    let mut quoted = false;
    for (i, &b) in data.iter().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'\n' if !quoted => {
                let row_end = i + 1;
                if row_end - chunk_start > limit && row_start > chunk_start {
                    write_part(&data[chunk_start..row_start])?;
                    chunk_start = row_start;
                }
                row_start = row_end;
            }
            _ => {}
        }
    }
    if data.len() - chunk_start > limit && row_start > chunk_start && row_start < data.len() {
        write_part(&data[chunk_start..row_start])?;
        chunk_start = row_start;
    }
    if chunk_start < data.len() {
        write_part(&data[chunk_start..])?;
    }
    Ok(parts)
}

impl Dialect for SnowflakeDialect {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    fn is_reserved_keyword(&self, name: &str) -> bool {
        RESERVED_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(name))
    }

    fn schema_required(&self) -> bool {
        true
    }

    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType> {
        match native {
            "FIXED" => Some(CanonicalType::Decimal),
            "REAL" => Some(CanonicalType::Float64),
            "BIGINT" => Some(CanonicalType::Int64),
            other => self.db_type_to_canonical(other),
        }
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        use CanonicalType::*;
        let canonical = match catalog.to_uppercase().as_str() {
            "TEXT" | "VARCHAR" | "CHAR" | "STRING" | "GEOGRAPHY" | "GEOMETRY" => Nvarchar,
            "NUMBER" | "DECIMAL" | "NUMERIC" => Decimal,
            "FLOAT" | "DOUBLE" | "REAL" => Float64,
            "TIMESTAMP_NTZ" | "DATETIME" | "TIMESTAMP" => Datetime,
            "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => Datetimetz,
            "DATE" => Date,
            "TIME" => Time,
            "BINARY" | "VARBINARY" => Varbinary,
            "BOOLEAN" => Bool,
            "VARIANT" | "OBJECT" | "ARRAY" => Json,
            _ => return None,
        };
        Some(canonical)
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Varchar | Ntext | Text | Xml | Varbit => "text".to_string(),
            Int64 | Int32 | Int16 => "number".to_string(),
            Float64 | Float32 => "real".to_string(),
            Decimal => match column.decimal {
                Some((p, s)) if p > 0 && p <= MAX_DECIMAL_PRECISION && s >= 0 && s <= p => {
                    format!("number({},{})", p, s)
                }
                _ => "float".to_string(),
            },
            Money => "number(19,4)".to_string(),
            Datetime => "timestamp_ntz".to_string(),
            Datetimetz => "timestamp_tz".to_string(),
            Date => "date".to_string(),
            Time => "time".to_string(),
            Varbinary | Blob | Uuid => "binary".to_string(),
            Bool => "boolean".to_string(),
            Json => "variant".to_string(),
        };
        Ok(ddl)
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Xml | Varbit => format::text(canonical, value),
            Int16 | Int32 | Int64 => format::integer(canonical, value),
            Float32 | Float64 => format::float(canonical, value),
            Decimal | Money => format::decimal(canonical, value),
            Datetime => format::timestamp(canonical, value),
            Datetimetz => format::timestamptz(canonical, value),
            Date => format::date(canonical, value),
            Time => format::time(canonical, value),
            Varbinary | Blob => format::hex(canonical, value),
            Uuid => format::uuid(canonical, value),
            Bool => format::boolean(canonical, value),
            Json => format::json(canonical, value),
        }
    }

    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Datetime => Ok(format::datetime_trimmed(
                &format::wall_clock(&format::parse_timestamp(canonical, value)?),
                FRACTION_DIGITS,
            )),
            Datetimetz => Ok(format!(
                "{} +00:00",
                format::datetime_trimmed(
                    &format::utc(&format::parse_timestamp(canonical, value)?),
                    FRACTION_DIGITS
                )
            )),
            Date => Ok(format::parse_date(canonical, value)?
                .format("%Y-%m-%d")
                .to_string()),
            Time => Ok(format::time_trimmed(
                &format::parse_time(canonical, value)?,
                FRACTION_DIGITS,
            )),
            Uuid => Ok(value.replace('-', "")),
            Bool => Ok(format::parse_bool(canonical, value)?.to_string()),
            Nvarchar | Varchar | Ntext | Text | Int16 | Int32 | Int64 | Float32 | Float64
            | Decimal | Money | Varbinary | Blob | Json | Xml | Varbit => Ok(value.to_string()),
        }
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Varbit => Ok(quote_literal(value)),
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal | Money => Ok(value.to_string()),
            Datetime | Datetimetz | Date | Time => {
                Ok(quote_literal(&self.final_value(canonical, value)?))
            }
            Varbinary | Blob => Ok(format!("to_binary({})", quote_literal(value))),
            Uuid => Ok(format!("to_binary({})", quote_literal(&value.replace('-', "")))),
            Bool => Ok(format::parse_bool(canonical, value)?.to_string()),
        }
    }

    fn bulk_loader(&self) -> Option<&'static str> {
        Some("snowflake PUT/COPY")
    }

    fn insert_form(&self) -> InsertForm {
        InsertForm::ValuesParseJson
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        BatchLimit::Rows(3000)
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        format!(
            "SHOW PRIMARY KEYS IN TABLE {}",
            schema_period_table(schema, table, self, true)
        )
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        // Key membership is filled in from SHOW PRIMARY KEYS
        format!(
            "SELECT column_name, data_type, \
coalesce(numeric_precision, -1), coalesce(numeric_scale, -1), \
coalesce(character_maximum_length, -1), 0 \
FROM information_schema.columns \
WHERE table_schema = upper({}) AND table_name = upper({}) \
ORDER BY ordinal_position",
            quote_literal(schema),
            quote_literal(table)
        )
    }

    fn incremental_time_sql(&self, schema: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT max({}) FROM {}",
            escape_if_needed(column, self),
            schema_period_table(schema, table, self, true)
        )
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        message.contains("does not exist or not authorized")
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_is_stable() {
        let a = SnowflakeDialect::stage_name("transfer-1");
        assert_eq!(a, SnowflakeDialect::stage_name("transfer-1"));
        assert_ne!(a, SnowflakeDialect::stage_name("transfer-2"));
        assert!(a.starts_with("sqlpipe_"));
        assert_eq!(a.len(), "sqlpipe_".len() + 10);
    }

    #[test]
    fn test_load_statements() {
        let d = SnowflakeDialect::new();
        assert_eq!(
            d.file_format_sql("analytics"),
            "CREATE OR REPLACE FILE FORMAT analytics.sqlpipe_csv TYPE=CSV FIELD_OPTIONALLY_ENCLOSED_BY='\"' COMPRESSION=NONE"
        );
        let file = Path::new("/tmp/x/final-csv/0001.csv");
        assert_eq!(
            d.put_sql(file, "analytics", "sqlpipe_ab"),
            "PUT 'file:///tmp/x/final-csv/0001.csv' @analytics.sqlpipe_ab SOURCE_COMPRESSION=NONE AUTO_COMPRESS=FALSE OVERWRITE=TRUE"
        );
        let files = vec![file.to_path_buf()];
        let plain = vec![ColumnInfo::new("id", CanonicalType::Int32)];
        let copy = d.copy_sql(&files, "analytics", "wide", "sqlpipe_ab", &plain);
        assert!(copy.starts_with("COPY INTO analytics.wide FROM @analytics.sqlpipe_ab"));
        assert!(copy.ends_with("FILE_FORMAT = (FORMAT_NAME = 'analytics.sqlpipe_csv')"));

        let with_json = vec![
            ColumnInfo::new("id", CanonicalType::Int32),
            ColumnInfo::new("doc", CanonicalType::Json),
        ];
        let copy = d.copy_sql(&files, "analytics", "wide", "sqlpipe_ab", &with_json);
        assert!(copy.contains("FROM (SELECT $1, PARSE_JSON($2) FROM @analytics.sqlpipe_ab)"));
        assert!(copy.contains("FILES = ('0001.csv')"));
    }

    #[test]
    fn test_large_final_file_is_uploaded_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("0001.csv");
        let mut contents = String::new();
        for i in 0..400 {
            contents.push_str(&format!("{},\"line one\nline two {}\"\n", i, "x".repeat(20)));
        }
        assert!(contents.len() > MAX_UPLOAD_BYTES);
        std::fs::write(&file, &contents).unwrap();

        let parts = split_for_upload(&file, MAX_UPLOAD_BYTES).unwrap();
        assert!(parts.len() > 1);
        let mut joined = String::new();
        for part in &parts {
            let chunk = std::fs::read_to_string(part).unwrap();
            assert!(chunk.len() <= MAX_UPLOAD_BYTES);
            // Every chunk starts on a row and holds whole quoted fields
            assert!(chunk.ends_with("\"\n"));
            assert_eq!(chunk.matches('"').count() % 2, 0);
            joined.push_str(&chunk);
        }
        assert_eq!(joined, contents);

        let d = SnowflakeDialect::new();
        let columns = vec![
            ColumnInfo::new("id", CanonicalType::Int32),
            ColumnInfo::new("note", CanonicalType::Ntext),
        ];
        let statements = d.upload_statements(&parts, "analytics", "wide", "sqlpipe_ab", &columns);
        let puts = statements.iter().filter(|s| s.starts_with("PUT ")).count();
        assert_eq!(puts, parts.len());
        let copy = statements.last().unwrap();
        assert!(copy.starts_with("COPY INTO analytics.wide"));
        assert!(copy.contains("'0001-part001.csv', '0001-part002.csv'"));
    }

    #[test]
    fn test_small_final_file_is_uploaded_whole() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("0001.csv");
        std::fs::write(&file, "1,a\n2,b\n").unwrap();
        assert_eq!(split_for_upload(&file, MAX_UPLOAD_BYTES).unwrap(), vec![file]);
    }

    #[test]
    fn test_final_values() {
        let d = SnowflakeDialect::new();
        assert_eq!(
            d.final_value(CanonicalType::Uuid, "0a1b2c3d-0000-4000-8000-000000000001").unwrap(),
            "0a1b2c3d000040008000000000000001"
        );
        assert_eq!(
            d.final_value(CanonicalType::Datetimetz, "2024-01-01T05:00:00+05:00").unwrap(),
            "2024-01-01 00:00:00 +00:00"
        );
        assert_eq!(
            d.final_value(CanonicalType::Datetime, "2024-06-15T12:34:56.789Z").unwrap(),
            "2024-06-15 12:34:56.789"
        );
    }

    #[test]
    fn test_sql_values() {
        let d = SnowflakeDialect::new();
        assert_eq!(d.sql_value(CanonicalType::Json, "{\"a\":1}").unwrap(), "'{\"a\":1}'");
        assert_eq!(d.sql_value(CanonicalType::Blob, "dead").unwrap(), "to_binary('dead')");
        assert_eq!(d.sql_value(CanonicalType::Bool, "1").unwrap(), "true");
    }

    #[test]
    fn test_type_maps() {
        let d = SnowflakeDialect::new();
        assert_eq!(d.db_type_to_canonical("VARIANT"), Some(CanonicalType::Json));
        assert_eq!(d.driver_type_to_canonical("FIXED"), Some(CanonicalType::Decimal));
        assert_eq!(d.db_type_to_canonical("timestamp_tz"), Some(CanonicalType::Datetimetz));
        let col = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(12, 2);
        assert_eq!(d.canonical_to_ddl(&col).unwrap(), "number(12,2)");
        assert_eq!(
            d.canonical_to_ddl(&ColumnInfo::new("c", CanonicalType::Json)).unwrap(),
            "variant"
        );
    }
}
