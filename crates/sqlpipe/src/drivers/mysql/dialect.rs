//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! MySQL has no schemas in the PostgreSQL sense: a "schema" is a database,
//! created with `CREATE DATABASE IF NOT EXISTS`, and tables are addressed
//! without a prefix.

use crate::core::identifier::escape_if_needed;
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect};
use crate::core::value::SqlValue;
use crate::dialect::format;
use crate::dialect::CanonicalType;
use crate::error::{PipeError, Result};

/// Largest DECIMAL precision MySQL accepts.
const MAX_DECIMAL_PRECISION: i64 = 65;

/// Largest DECIMAL scale MySQL accepts.
const MAX_DECIMAL_SCALE: i64 = 30;

/// MySQL 8.0 reserved words.
const RESERVED_KEYWORDS: &[&str] = &[
    "ACCESSIBLE", "ADD", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "ASENSITIVE", "BEFORE",
    "BETWEEN", "BIGINT", "BINARY", "BLOB", "BOTH", "BY", "CALL", "CASCADE", "CASE", "CHANGE",
    "CHAR", "CHARACTER", "CHECK", "COLLATE", "COLUMN", "CONDITION", "CONSTRAINT", "CONTINUE",
    "CONVERT", "CREATE", "CROSS", "CUBE", "CUME_DIST", "CURRENT_DATE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DATABASE", "DATABASES", "DAY_HOUR",
    "DAY_MICROSECOND", "DAY_MINUTE", "DAY_SECOND", "DEC", "DECIMAL", "DECLARE", "DEFAULT",
    "DELAYED", "DELETE", "DENSE_RANK", "DESC", "DESCRIBE", "DETERMINISTIC", "DISTINCT",
    "DISTINCTROW", "DIV", "DOUBLE", "DROP", "DUAL", "EACH", "ELSE", "ELSEIF", "EMPTY",
    "ENCLOSED", "ESCAPED", "EXCEPT", "EXISTS", "EXIT", "EXPLAIN", "FALSE", "FETCH",
    "FIRST_VALUE", "FLOAT", "FLOAT4", "FLOAT8", "FOR", "FORCE", "FOREIGN", "FROM", "FULLTEXT",
    "FUNCTION", "GENERATED", "GET", "GRANT", "GROUP", "GROUPING", "GROUPS", "HAVING",
    "HIGH_PRIORITY", "HOUR_MICROSECOND", "HOUR_MINUTE", "HOUR_SECOND", "IF", "IGNORE", "IN",
    "INDEX", "INFILE", "INNER", "INOUT", "INSENSITIVE", "INSERT", "INT", "INT1", "INT2", "INT3",
    "INT4", "INT8", "INTEGER", "INTERSECT", "INTERVAL", "INTO", "IO_AFTER_GTIDS",
    "IO_BEFORE_GTIDS", "IS", "ITERATE", "JOIN", "JSON_TABLE", "KEY", "KEYS", "KILL", "LAG",
    "LAST_VALUE", "LATERAL", "LEAD", "LEADING", "LEAVE", "LEFT", "LIKE", "LIMIT", "LINEAR",
    "LINES", "LOAD", "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LONG", "LONGBLOB", "LONGTEXT",
    "LOOP", "LOW_PRIORITY", "MATCH", "MAXVALUE", "MEDIUMBLOB", "MEDIUMINT", "MEDIUMTEXT",
    "MIDDLEINT", "MINUTE_MICROSECOND", "MINUTE_SECOND", "MOD", "MODIFIES", "NATURAL", "NOT",
    "NO_WRITE_TO_BINLOG", "NTH_VALUE", "NTILE", "NULL", "NUMERIC", "OF", "ON", "OPTIMIZE",
    "OPTIMIZER_COSTS", "OPTION", "OPTIONALLY", "OR", "ORDER", "OUT", "OUTER", "OUTFILE", "OVER",
    "PARTITION", "PERCENT_RANK", "PRECISION", "PRIMARY", "PROCEDURE", "PURGE", "RANGE", "RANK",
    "READ", "READS", "READ_WRITE", "REAL", "RECURSIVE", "REFERENCES", "REGEXP", "RELEASE",
    "RENAME", "REPEAT", "REPLACE", "REQUIRE", "RESIGNAL", "RESTRICT", "RETURN", "REVOKE",
    "RIGHT", "RLIKE", "ROW", "ROWS", "ROW_NUMBER", "SCHEMA", "SCHEMAS", "SECOND_MICROSECOND",
    "SELECT", "SENSITIVE", "SEPARATOR", "SET", "SHOW", "SIGNAL", "SMALLINT", "SPATIAL",
    "SPECIFIC", "SQL", "SQLEXCEPTION", "SQLSTATE", "SQLWARNING", "SQL_BIG_RESULT",
    "SQL_CALC_FOUND_ROWS", "SQL_SMALL_RESULT", "SSL", "STARTING", "STORED", "STRAIGHT_JOIN",
    "SYSTEM", "TABLE", "TERMINATED", "THEN", "TINYBLOB", "TINYINT", "TINYTEXT", "TO",
    "TRAILING", "TRIGGER", "TRUE", "UNDO", "UNION", "UNIQUE", "UNLOCK", "UNSIGNED", "UPDATE",
    "USAGE", "USE", "USING", "UTC_DATE", "UTC_TIME", "UTC_TIMESTAMP", "VALUES", "VARBINARY",
    "VARCHAR", "VARCHARACTER", "VARYING", "VIRTUAL", "WHEN", "WHERE", "WHILE", "WINDOW", "WITH",
    "WRITE", "XOR", "YEAR_MONTH", "ZEROFILL",
];

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

/// String literal with MySQL's backslash escaping.
pub(crate) fn mysql_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// `TABLE_SCHEMA` predicate: the named database, or the connection's default.
fn schema_predicate(schema: &str) -> String {
    if schema.is_empty() {
        "DATABASE()".to_string()
    } else {
        format!("'{}'", schema.replace('\'', "''"))
    }
}

impl MysqlDialect {
    /// `LOAD DATA LOCAL INFILE` for one final file.
    ///
    /// Binary columns are staged as hex, so they are read into user
    /// variables and decoded with `UNHEX` on the way in.
    pub fn load_data_sql(&self, path: &str, table: &str, columns: &[ColumnInfo]) -> String {
        let mut targets = Vec::with_capacity(columns.len());
        let mut assignments = Vec::new();
        for (i, column) in columns.iter().enumerate() {
            let name = escape_if_needed(&column.name, self);
            if column.canonical.is_binary() {
                targets.push(format!("@v{}", i));
                assignments.push(format!("{} = UNHEX(@v{})", name, i));
            } else {
                targets.push(name);
            }
        }

        let mut sql = format!(
            "LOAD DATA LOCAL INFILE '{}' INTO TABLE {} FIELDS ESCAPED BY '' TERMINATED BY ',' \
OPTIONALLY ENCLOSED BY '\"' LINES TERMINATED BY '\\n' ({})",
            path.replace('\\', "\\\\").replace('\'', "''"),
            escape_if_needed(table, self),
            targets.join(", ")
        );
        if !assignments.is_empty() {
            sql.push_str(" SET ");
            sql.push_str(&assignments.join(", "));
        }
        sql
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn is_reserved_keyword(&self, name: &str) -> bool {
        RESERVED_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(name))
    }

    fn schema_required(&self) -> bool {
        false
    }

    fn default_null(&self) -> Option<&'static str> {
        Some("NULL")
    }

    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType> {
        use CanonicalType::*;
        let canonical = match native {
            "VARCHAR" | "CHAR" | "ENUM" | "SET" => Nvarchar,
            "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => Ntext,
            "BIGINT UNSIGNED" | "UNSIGNED BIGINT" | "BIGINT" | "INT UNSIGNED" | "UNSIGNED INT" => {
                Int64
            }
            "INT" | "MEDIUMINT" | "MEDIUMINT UNSIGNED" | "SMALLINT UNSIGNED"
            | "UNSIGNED SMALLINT" => Int32,
            "YEAR" | "SMALLINT" | "TINYINT UNSIGNED" | "UNSIGNED TINYINT" | "TINYINT" => Int16,
            "BOOLEAN" => Bool,
            "DOUBLE" => Float64,
            "FLOAT" => Float32,
            "DECIMAL" => Decimal,
            "DATETIME" => Datetime,
            "TIMESTAMP" => Datetimetz,
            "DATE" => Date,
            "TIME" => Time,
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "GEOMETRY" => Blob,
            "JSON" => Json,
            "BIT" => Varbit,
            _ => return None,
        };
        Some(canonical)
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        use CanonicalType::*;
        let canonical = match catalog {
            "char" | "varchar" | "enum" | "set" => Nvarchar,
            "longtext" | "mediumtext" | "text" | "tinytext" => Ntext,
            "bigint" => Int64,
            "int" | "mediumint" => Int32,
            "smallint" | "tinyint" | "year" => Int16,
            "double" => Float64,
            "float" => Float32,
            "decimal" => Decimal,
            "datetime" => Datetime,
            "timestamp" => Datetimetz,
            "date" => Date,
            "time" => Time,
            "binary" | "varbinary" => Varbinary,
            "longblob" | "mediumblob" | "blob" | "tinyblob" | "geometry" => Blob,
            "bit" => Varbit,
            "json" => Json,
            _ => return None,
        };
        Some(canonical)
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Varchar | Ntext | Text | Xml | Varbit => "longtext".to_string(),
            Int64 => "bigint".to_string(),
            Int32 => "integer".to_string(),
            Int16 => "smallint".to_string(),
            Float64 => "double".to_string(),
            Float32 => "float".to_string(),
            Decimal => match column.decimal {
                Some((p, s))
                    if s > 0 && s <= MAX_DECIMAL_PRECISION && p > 0
                        && p <= MAX_DECIMAL_PRECISION && p > s =>
                {
                    format!("decimal({},{})", p, s)
                }
                _ => "double".to_string(),
            },
            Money => match column.decimal {
                Some((p, s)) if p > MAX_DECIMAL_PRECISION || s > MAX_DECIMAL_SCALE => {
                    return Err(PipeError::type_map(
                        self.name(),
                        &column.name,
                        format!("money({},{})", p, s),
                    ));
                }
                Some((p, s)) => format!("decimal({},{})", p, s),
                None => "decimal(19,4)".to_string(),
            },
            Datetime | Datetimetz => "datetime(6)".to_string(),
            Date => "date".to_string(),
            Time => "time(6)".to_string(),
            Varbinary | Blob => "longblob".to_string(),
            Uuid => "char(36)".to_string(),
            Bool => "tinyint(1)".to_string(),
            Json => "json".to_string(),
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
            Datetime => Ok(format::datetime_trimmed(
                &format::wall_clock(&format::parse_timestamp(canonical, value)?),
                6,
            )),
            Datetimetz => Ok(format::datetime_trimmed(
                &format::utc(&format::parse_timestamp(canonical, value)?),
                6,
            )),
            Date => Ok(format::parse_date(canonical, value)?
                .format("%Y-%m-%d")
                .to_string()),
            Time => Ok(format::time_trimmed(&format::parse_time(canonical, value)?, 6)),
            Bool => Ok(if format::parse_bool(canonical, value)? { "1" } else { "0" }.to_string()),
            Nvarchar | Varchar | Ntext | Text | Int16 | Int32 | Int64 | Float32 | Float64
            | Decimal | Money | Varbinary | Blob | Uuid | Json | Xml | Varbit => {
                Ok(value.to_string())
            }
        }
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Uuid | Varbit => {
                Ok(mysql_literal(value))
            }
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal | Money => Ok(value.to_string()),
            Datetime | Datetimetz | Date | Time => {
                Ok(mysql_literal(&self.final_value(canonical, value)?))
            }
            Varbinary | Blob => Ok(format!("UNHEX('{}')", value)),
            Bool => self.final_value(canonical, value),
        }
    }

    fn final_null(&self, _null_placeholder: &str) -> String {
        "NULL".to_string()
    }

    fn bulk_loader(&self) -> Option<&'static str> {
        Some("LOAD DATA LOCAL INFILE")
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        BatchLimit::Chars(4_000_000)
    }

    fn create_schema_sql(&self, schema: &str) -> String {
        format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            escape_if_needed(schema, self)
        )
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        format!(
            "SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME \
FROM information_schema.KEY_COLUMN_USAGE \
WHERE TABLE_SCHEMA = {} AND TABLE_NAME = '{}' AND CONSTRAINT_NAME = 'PRIMARY' \
ORDER BY ORDINAL_POSITION",
            schema_predicate(schema),
            table.replace('\'', "''")
        )
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        let schema = schema_predicate(schema);
        let table = table.replace('\'', "''");
        format!(
            "SELECT CAST(c.COLUMN_NAME AS CHAR(255)) AS col_name, \
CAST(c.DATA_TYPE AS CHAR(255)) AS col_type, \
CAST(COALESCE(c.NUMERIC_PRECISION, -1) AS SIGNED) AS col_precision, \
CAST(COALESCE(c.NUMERIC_SCALE, -1) AS SIGNED) AS col_scale, \
CAST(CASE WHEN c.CHARACTER_MAXIMUM_LENGTH IS NULL THEN -1 \
WHEN c.CHARACTER_MAXIMUM_LENGTH > 2147483647 THEN -1 \
ELSE c.CHARACTER_MAXIMUM_LENGTH END AS SIGNED) AS col_length, \
CAST(IF(c.COLUMN_KEY = 'PRI', 1, 0) AS SIGNED) AS col_is_primary \
FROM information_schema.COLUMNS AS c \
WHERE c.TABLE_SCHEMA = {schema} AND c.TABLE_NAME = '{table}' \
ORDER BY c.ORDINAL_POSITION"
        )
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        message.contains("doesn't exist")
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}
