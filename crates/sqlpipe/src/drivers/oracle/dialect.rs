//! Oracle SQL dialect and SQL*Loader control files.
//!
//! A "schema" is an Oracle user. Final files are plain CSV read by
//! `sqlldr` through a control file written next to each one.

use std::path::{Path, PathBuf};

use crate::core::identifier::{escape_if_needed, quote_literal, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect, InsertForm};
use crate::core::value::SqlValue;
use crate::dialect::{ddl, format, CanonicalType};
use crate::error::Result;
use crate::transfer::TransferInfo;

/// Largest VARCHAR2 in bytes.
const MAX_VARCHAR2_BYTES: i64 = 4000;

/// Largest RAW in bytes.
const MAX_RAW_BYTES: i64 = 2000;

/// Worst-case AL32UTF8 bytes per character.
const BYTES_PER_CHAR: i64 = 4;

/// Largest NUMBER precision.
const MAX_DECIMAL_PRECISION: i64 = 38;

/// Oracle reserved words (`V$RESERVED_WORDS` with `RESERVED = 'Y'`).
const RESERVED_KEYWORDS: &[&str] = &[
    "ACCESS", "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUDIT", "BETWEEN", "BY",
    "CHAR", "CHECK", "CLUSTER", "COLUMN", "COMMENT", "COMPRESS", "CONNECT", "CREATE", "CURRENT",
    "DATE", "DECIMAL", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "EXCLUSIVE",
    "EXISTS", "FILE", "FLOAT", "FOR", "FROM", "GRANT", "GROUP", "HAVING", "IDENTIFIED",
    "IMMEDIATE", "IN", "INCREMENT", "INDEX", "INITIAL", "INSERT", "INTEGER", "INTERSECT", "INTO",
    "IS", "LEVEL", "LIKE", "LOCK", "LONG", "MAXEXTENTS", "MINUS", "MLSLABEL", "MODE", "MODIFY",
    "NOAUDIT", "NOCOMPRESS", "NOT", "NOWAIT", "NULL", "NUMBER", "OF", "OFFLINE", "ON", "ONLINE",
    "OPTION", "OR", "ORDER", "PCTFREE", "PRIOR", "PUBLIC", "RAW", "RENAME", "RESOURCE", "REVOKE",
    "ROW", "ROWID", "ROWNUM", "ROWS", "SELECT", "SESSION", "SET", "SHARE", "SIZE", "SMALLINT",
    "START", "SUCCESSFUL", "SYNONYM", "SYSDATE", "TABLE", "THEN", "TO", "TRIGGER", "UID",
    "UNION", "UNIQUE", "UPDATE", "USER", "VALIDATE", "VALUES", "VARCHAR", "VARCHAR2", "VIEW",
    "WHENEVER", "WHERE", "WITH",
];

/// Oracle dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl OracleDialect {
    /// Create a new Oracle dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Path of the control file for a final file.
    pub fn ctl_path(final_file: &Path) -> PathBuf {
        final_file.with_extension("ctl")
    }

    /// Control file text for one final file.
    ///
    /// `max_lengths` holds the widest value, in bytes, of each column.
    pub fn control_file(
        &self,
        final_file: &Path,
        columns: &[ColumnInfo],
        max_lengths: &[usize],
        null: &str,
        schema: &str,
        table: &str,
    ) -> String {
        let target = if schema.is_empty() {
            escape_if_needed(table, self)
        } else {
            schema_period_table(schema, table, self, true)
        };

        let fields: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let name = escape_if_needed(&column.name, self);
                let datatype = match column.canonical {
                    CanonicalType::Date => "DATE 'YYYY-MM-DD'".to_string(),
                    CanonicalType::Datetime => "TIMESTAMP 'YYYY-MM-DD HH24:MI:SS.FF'".to_string(),
                    CanonicalType::Datetimetz => {
                        "TIMESTAMP WITH TIME ZONE 'YYYY-MM-DD HH24:MI:SS.FF TZH:TZM'".to_string()
                    }
                    _ => format!(
                        "CHAR({}) PRESERVE BLANKS",
                        max_lengths.get(i).copied().unwrap_or(1).max(1)
                    ),
                };
                format!("{} {} NULLIF {}='{}'", name, datatype, name, null)
            })
            .collect();

        format!(
            "LOAD DATA CHARACTERSET 'AL32UTF8' INFILE '{}' APPEND INTO TABLE {} \
FIELDS CSV WITH EMBEDDED TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"' ({})",
            final_file.display(),
            target,
            fields.join(", ")
        )
    }
}

/// Widest field of each column in final CSV text, in bytes.
pub(crate) fn max_column_byte_lengths(contents: &str, columns: usize) -> Result<Vec<usize>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let mut widths = vec![0usize; columns];
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        for (width, field) in widths.iter_mut().zip(record.iter()) {
            *width = (*width).max(field.len());
        }
    }
    Ok(widths)
}

/// `varchar2(n bytes)` for a character length, `clob` past the limit.
fn varchar2(length: Option<i64>) -> String {
    match length {
        Some(n) if n > 0 && n * BYTES_PER_CHAR <= MAX_VARCHAR2_BYTES => {
            format!("varchar2({})", n * BYTES_PER_CHAR)
        }
        Some(n) if n > 0 => "clob".to_string(),
        _ => format!("varchar2({})", MAX_VARCHAR2_BYTES),
    }
}

/// Random 20-character password for users created as schemas.
fn generated_password() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    let tail: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(19)
        .map(char::from)
        .collect();
    // Oracle passwords must start with a letter
    format!("P{}", tail)
}

/// `SELECT COUNT(1)` over users named `schema`.
pub(crate) fn user_exists_sql(schema: &str) -> String {
    format!(
        "SELECT COUNT(1) FROM dba_users WHERE username = {}",
        upper_literal(schema)
    )
}

fn upper_literal(value: &str) -> String {
    format!("upper({})", quote_literal(value))
}

impl Dialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
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
        self.db_type_to_canonical(native)
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        use CanonicalType::*;
        let canonical = match catalog {
            "VARCHAR2" | "NVARCHAR2" | "CHAR" | "NCHAR" | "ROWID" | "UROWID" | "INTERVAL" => {
                Nvarchar
            }
            "CLOB" | "NCLOB" | "LONG" => Ntext,
            "NUMBER" => Decimal,
            "FLOAT" | "BINARY_DOUBLE" => Float64,
            "BINARY_FLOAT" => Float32,
            "DATE" => Date,
            "TIMESTAMP" => Datetime,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => Datetimetz,
            "RAW" => Varbinary,
            "BLOB" | "BFILE" | "LONG RAW" => Blob,
            "BOOLEAN" => Bool,
            "JSON" => Json,
            _ => return None,
        };
        Some(canonical)
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Varchar | Xml | Varbit => varchar2(column.length),
            Ntext | Text | Json => "clob".to_string(),
            Int64 => "number(19)".to_string(),
            Int32 => "number(10)".to_string(),
            Int16 => "number(5)".to_string(),
            Float64 => "binary_double".to_string(),
            Float32 => "binary_float".to_string(),
            Decimal => match column.decimal {
                Some((p, s)) if p > 0 && p <= MAX_DECIMAL_PRECISION && s >= 0 && s <= p => {
                    format!("number({},{})", p, s)
                }
                // Unconstrained NUMBER keeps every digit
                _ => "number".to_string(),
            },
            Money => match column.decimal {
                Some((p, s)) if p > 0 && p <= MAX_DECIMAL_PRECISION && s >= 0 && s <= p => {
                    format!("number({},{})", p, s)
                }
                _ => "number(38,4)".to_string(),
            },
            Datetime => "timestamp".to_string(),
            Datetimetz => "timestamp with time zone".to_string(),
            Date => "date".to_string(),
            // No time-of-day type; kept as text
            Time => "varchar2(32)".to_string(),
            Varbinary => match column.length {
                Some(n) if n > 0 && n <= MAX_RAW_BYTES => format!("raw({})", n),
                Some(n) if n > 0 => "blob".to_string(),
                _ => format!("raw({})", MAX_RAW_BYTES),
            },
            Blob => "blob".to_string(),
            Uuid => "raw(16)".to_string(),
            Bool => "number(1)".to_string(),
        };
        Ok(ddl)
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Xml => format::text(canonical, value),
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
            Varbit => format::bits(canonical, value),
        }
    }

    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Datetime => Ok(format::datetime_micros(&format::wall_clock(
                &format::parse_timestamp(canonical, value)?,
            ))),
            Datetimetz => Ok(format!(
                "{} +00:00",
                format::datetime_micros(&format::utc(&format::parse_timestamp(canonical, value)?))
            )),
            Date => Ok(format::parse_date(canonical, value)?
                .format("%Y-%m-%d")
                .to_string()),
            Time => Ok(format::time_trimmed(&format::parse_time(canonical, value)?, 6)),
            Uuid => Ok(value.replace('-', "")),
            Bool => Ok(if format::parse_bool(canonical, value)? { "1" } else { "0" }.to_string()),
            Nvarchar | Varchar | Ntext | Text | Int16 | Int32 | Int64 | Float32 | Float64
            | Decimal | Money | Varbinary | Blob | Json | Xml | Varbit => Ok(value.to_string()),
        }
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Varbit => Ok(quote_literal(value)),
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal | Money => Ok(value.to_string()),
            Datetime => Ok(format!(
                "TO_TIMESTAMP('{}', 'YYYY-MM-DD HH24:MI:SS.FF6')",
                self.final_value(canonical, value)?
            )),
            Datetimetz => Ok(format!(
                "TO_TIMESTAMP_TZ('{}', 'YYYY-MM-DD HH24:MI:SS.FF6 TZH:TZM')",
                self.final_value(canonical, value)?
            )),
            Date => Ok(format!(
                "TO_DATE('{}', 'YYYY-MM-DD')",
                self.final_value(canonical, value)?
            )),
            Time => Ok(quote_literal(&self.final_value(canonical, value)?)),
            Varbinary | Blob => Ok(format!("HEXTORAW('{}')", value)),
            Uuid => Ok(format!("HEXTORAW('{}')", self.final_value(canonical, value)?)),
            Bool => self.final_value(canonical, value),
        }
    }

    fn final_null(&self, null_placeholder: &str) -> String {
        // Matched by the NULLIF clauses of the control file
        null_placeholder.to_string()
    }

    fn bulk_loader(&self) -> Option<&'static str> {
        Some("sqlldr")
    }

    fn insert_form(&self) -> InsertForm {
        InsertForm::SelectUnion
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        BatchLimit::Chars(10_000)
    }

    /// Creates the owning user with a generated password.
    fn create_schema_sql(&self, schema: &str) -> String {
        format!(
            "CREATE USER {} IDENTIFIED BY \"{}\"",
            escape_if_needed(schema, self),
            generated_password()
        )
    }

    fn drop_table_sql(&self, schema: &str, table: &str) -> String {
        format!("drop table {}", schema_period_table(schema, table, self, true))
    }

    fn create_table_sql(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        incremental: bool,
    ) -> Result<String> {
        let create = format!(
            "create table {} ({})",
            schema_period_table(schema, table, self, true),
            ddl::column_definitions(columns, incremental, self)?
        );
        Ok(format!(
            "declare v_exists number(1); begin \
select count(*) into v_exists from all_tables where table_name = {} and owner = {}; \
if v_exists = 0 then execute immediate {}; end if; end;",
            upper_literal(table),
            upper_literal(schema),
            quote_literal(&create)
        ))
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        format!(
            "SELECT acc.column_name \
FROM all_constraints ac \
JOIN all_cons_columns acc ON ac.constraint_name = acc.constraint_name AND ac.owner = acc.owner \
WHERE ac.constraint_type = 'P' AND ac.owner = {} AND ac.table_name = {} \
ORDER BY acc.position",
            upper_literal(schema),
            upper_literal(table)
        )
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        let schema = upper_literal(schema);
        let table = upper_literal(table);
        format!(
            "WITH pks AS ( \
SELECT cols.column_name FROM all_constraints cons \
JOIN all_cons_columns cols ON cons.constraint_name = cols.constraint_name AND cons.owner = cols.owner \
WHERE cons.constraint_type = 'P' AND cons.owner = {schema} AND cons.table_name = {table}) \
SELECT col.column_name AS col_name, \
CASE \
WHEN col.data_type LIKE 'TIMESTAMP(%) WITH%' OR col.data_type LIKE 'TIMESTAMP(%)' THEN \
REGEXP_REPLACE(col.data_type, '\\(\\d+\\)', '') \
WHEN col.data_type LIKE 'INTERVAL%' THEN 'INTERVAL' \
ELSE col.data_type END AS col_type, \
COALESCE(col.data_precision, -1) AS col_precision, \
COALESCE(col.data_scale, -1) AS col_scale, \
CASE WHEN col.char_length > 0 THEN col.char_length ELSE COALESCE(col.data_length, -1) END AS col_length, \
CASE WHEN pks.column_name IS NOT NULL THEN 1 ELSE 0 END AS col_is_primary \
FROM all_tab_columns col \
LEFT JOIN pks ON col.column_name = pks.column_name \
WHERE col.owner = {schema} AND col.table_name = {table} \
ORDER BY col.column_id"
        )
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        message.contains("ORA-00942") || message.contains("does not exist")
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
        if info.uses_insert_statements() {
            return Ok(None);
        }
        let widths = max_column_byte_lengths(contents, columns.len())?;
        let ctl = self.control_file(final_file, columns, &widths, &info.null, schema, table);
        Ok(Some((Self::ctl_path(final_file), ctl)))
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}
