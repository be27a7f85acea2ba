//! Oracle engine.
//!
//! The `oracle` crate is blocking, so every call runs on Tokio's blocking
//! pool with a connection checked out of an r2d2 pool. Bulk loads shell
//! out to `sqlldr`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use oracle::sql_type::OracleType;
use oracle::Connection;
use r2d2::{ManageConnection, Pool};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::cursor::{RowCursor, CURSOR_BUFFER};
use crate::core::identifier::schema_period_table;
use crate::core::schema::{ColumnInfo, CursorColumn};
use crate::core::traits::{value_as_i64, Dialect, Engine};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::run_loader;
use crate::drivers::oracle::{user_exists_sql, OracleDialect};
use crate::error::{truncate_statement, PipeError, Result};
use crate::pipeline::insert::insert_final_file;
use crate::transfer::TransferInfo;

/// Connections kept per engine.
const POOL_SIZE: u32 = 4;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows fetched per round trip.
const PREFETCH_ROWS: u32 = 1000;

/// r2d2 manager for Oracle connections.
#[derive(Debug)]
struct OracleConnectionManager {
    user: String,
    pass: String,
    conn_str: String,
}

impl ManageConnection for OracleConnectionManager {
    type Connection = Connection;
    type Error = oracle::Error;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let mut conn = Connection::connect(&self.user, &self.pass, &self.conn_str)?;
        conn.set_autocommit(true);
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.ping()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Split `user/password@connect_string`.
fn parse_connection_string(s: &str) -> Result<(String, String, String)> {
    let (credentials, connect) = s
        .rsplit_once('@')
        .ok_or_else(|| PipeError::connect("oracle", "expected user/password@//host:port/service"))?;
    let (user, pass) = credentials
        .split_once('/')
        .ok_or_else(|| PipeError::connect("oracle", "expected user/password before '@'"))?;
    Ok((user.to_string(), pass.to_string(), connect.to_string()))
}

/// How one result column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Text,
    I64,
    F32,
    F64,
    Timestamp,
    TimestampTz,
    Bytes,
    Bool,
}

/// Catalog-style type name and decoder for a result column.
fn describe(ty: &OracleType) -> (&'static str, Decoder) {
    match ty {
        OracleType::Varchar2(..) => ("VARCHAR2", Decoder::Text),
        OracleType::NVarchar2(..) => ("NVARCHAR2", Decoder::Text),
        OracleType::Char(..) => ("CHAR", Decoder::Text),
        OracleType::NChar(..) => ("NCHAR", Decoder::Text),
        OracleType::Rowid => ("ROWID", Decoder::Text),
        OracleType::CLOB => ("CLOB", Decoder::Text),
        OracleType::NCLOB => ("NCLOB", Decoder::Text),
        OracleType::Long => ("LONG", Decoder::Text),
        // NUMBER text keeps full precision
        OracleType::Number(..) => ("NUMBER", Decoder::Text),
        OracleType::Int64 => ("NUMBER", Decoder::I64),
        OracleType::Float(..) => ("FLOAT", Decoder::F64),
        OracleType::BinaryDouble => ("BINARY_DOUBLE", Decoder::F64),
        OracleType::BinaryFloat => ("BINARY_FLOAT", Decoder::F32),
        OracleType::Date => ("DATE", Decoder::Timestamp),
        OracleType::Timestamp(..) => ("TIMESTAMP", Decoder::Timestamp),
        OracleType::TimestampTZ(..) => ("TIMESTAMP WITH TIME ZONE", Decoder::TimestampTz),
        OracleType::TimestampLTZ(..) => ("TIMESTAMP WITH LOCAL TIME ZONE", Decoder::TimestampTz),
        OracleType::IntervalDS(..) | OracleType::IntervalYM(..) => ("INTERVAL", Decoder::Text),
        OracleType::Raw(..) => ("RAW", Decoder::Bytes),
        OracleType::BLOB => ("BLOB", Decoder::Bytes),
        OracleType::LongRaw => ("LONG RAW", Decoder::Bytes),
        OracleType::Boolean => ("BOOLEAN", Decoder::Bool),
        _ => ("UNSUPPORTED", Decoder::Text),
    }
}

fn decode_row(row: &oracle::Row, plan: &[Decoder]) -> oracle::Result<Row> {
    let mut values = Vec::with_capacity(plan.len());
    for (i, decoder) in plan.iter().enumerate() {
        let value = match decoder {
            Decoder::Text => row.get::<usize, Option<String>>(i)?.map(SqlValue::text),
            Decoder::I64 => row.get::<usize, Option<i64>>(i)?.map(SqlValue::I64),
            Decoder::F32 => row.get::<usize, Option<f32>>(i)?.map(SqlValue::F32),
            Decoder::F64 => row.get::<usize, Option<f64>>(i)?.map(SqlValue::F64),
            Decoder::Timestamp => row
                .get::<usize, Option<chrono::NaiveDateTime>>(i)?
                .map(SqlValue::DateTime),
            Decoder::TimestampTz => row
                .get::<usize, Option<chrono::DateTime<chrono::FixedOffset>>>(i)?
                .map(SqlValue::DateTimeOffset),
            Decoder::Bytes => row.get::<usize, Option<Vec<u8>>>(i)?.map(SqlValue::bytes),
            Decoder::Bool => row.get::<usize, Option<bool>>(i)?.map(SqlValue::Bool),
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(values)
}

/// Oracle engine.
pub struct OracleEngine {
    dialect: OracleDialect,
    name: String,
    pool: Pool<OracleConnectionManager>,
}

impl OracleEngine {
    /// Open a pool from `user/password@//host:port/service`.
    pub async fn connect(name: &str, connection_string: &str) -> Result<Self> {
        let (user, pass, conn_str) = parse_connection_string(connection_string)?;
        let manager = OracleConnectionManager {
            user,
            pass,
            conn_str,
        };

        // r2d2 opens connections eagerly
        let pool = tokio::task::spawn_blocking(move || {
            Pool::builder()
                .max_size(POOL_SIZE)
                .connection_timeout(POOL_CONNECTION_TIMEOUT)
                .build(manager)
        })
        .await
        .map_err(|e| PipeError::connect("oracle", e))?
        .map_err(|e| PipeError::connect("oracle", e))?;

        let name = if name.is_empty() { "oracle" } else { name };
        info!("Connected to {} (oracle)", name);

        Ok(Self {
            dialect: OracleDialect::new(),
            name: name.to_string(),
            pool,
        })
    }

    /// Run `f` on the blocking pool with a pooled connection.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| PipeError::connect("oracle", e))?;
            f(&conn)
        })
        .await
        .map_err(|e| PipeError::connect("oracle", e))?
    }

    /// `sqlldr` arguments for one final file.
    fn sqlldr_args(final_file: &Path, info: &TransferInfo) -> Vec<String> {
        let config = &info.config;
        let userid = format!(
            "{}/{}@{}:{}/{}",
            config.target_username,
            config.target_password,
            config.target_hostname,
            config.target_port.unwrap_or(1521),
            config.target_database
        );
        let sibling = |ext: &str| final_file.with_extension(ext).to_string_lossy().into_owned();
        vec![
            userid,
            format!("control={}", sibling("ctl")),
            format!("LOG={}", sibling("log")),
            format!("BAD={}", sibling("bad")),
            format!("DISCARD={}", sibling("discard")),
        ]
    }
}

#[async_trait]
impl Engine for OracleEngine {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str) -> Result<RowCursor> {
        debug!("dql on {}: {}", self.name, truncate_statement(sql));

        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        let (columns_tx, columns_rx) = oneshot::channel::<Result<Vec<CursorColumn>>>();
        let pool = self.pool.clone();
        let sql = sql.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let query_error = |e: oracle::Error| PipeError::query("oracle", sql.as_str(), e);

            let conn = match pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = columns_tx.send(Err(PipeError::connect("oracle", e)));
                    return;
                }
            };
            let mut stmt = match conn.statement(&sql).prefetch_rows(PREFETCH_ROWS).build() {
                Ok(stmt) => stmt,
                Err(e) => {
                    let _ = columns_tx.send(Err(query_error(e)));
                    return;
                }
            };
            let rows = match stmt.query(&[]) {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = columns_tx.send(Err(query_error(e)));
                    return;
                }
            };

            let mut columns = Vec::new();
            let mut plan = Vec::new();
            for info in rows.column_info() {
                let (type_name, decoder) = describe(info.oracle_type());
                columns.push(CursorColumn::new(info.name(), type_name));
                plan.push(decoder);
            }
            if columns_tx.send(Ok(columns)).is_err() {
                return;
            }

            for row in rows {
                let row = row
                    .and_then(|r| decode_row(&r, &plan))
                    .map_err(query_error);
                let failed = row.is_err();
                if tx.blocking_send(row).is_err() || failed {
                    return;
                }
            }
        });

        let columns = columns_rx.await.map_err(|_| PipeError::Cancelled)??;
        Ok(RowCursor::with_task(columns, rx, task))
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        debug!("ddl/dml on {}: {}", self.name, truncate_statement(sql));
        let sql = sql.to_string();
        self.blocking(move |conn| {
            conn.execute(&sql, &[])
                .map(|_| ())
                .map_err(|e| PipeError::query("oracle", sql.as_str(), e))
        })
        .await
    }

    async fn close(&self, _print_error: bool) {
        // r2d2 closes connections when the pool is dropped
        debug!("closing {} pool", self.name);
    }

    async fn run_insert_cmd(
        &self,
        final_file: &Path,
        info: &TransferInfo,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        if info.uses_insert_statements() {
            return insert_final_file(self, final_file, info, schema, table, columns).await;
        }

        let result = run_loader(
            "sqlldr",
            &Self::sqlldr_args(final_file, info),
            &[info.config.target_password.as_str()],
            &info.cancel,
        )
        .await;

        if !info.config.keep_files {
            for ext in ["ctl", "log", "bad", "discard"] {
                let path = final_file.with_extension(ext);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("could not remove {}: {}", path.display(), e);
                    }
                }
            }
        }
        result
    }

    /// Schemas are users; a missing one is created with a random password.
    async fn create_schema_if_not_exists(&self, schema: &str) -> Result<()> {
        let row = self.query_row(&user_exists_sql(schema)).await?;
        let count = row
            .as_ref()
            .and_then(|r| r.first())
            .and_then(value_as_i64)
            .unwrap_or(0);
        if count == 0 {
            self.exec(&self.dialect.create_schema_sql(schema)).await?;
            info!("created user {} in {} with a generated password", schema, self.name);
        }
        Ok(())
    }

    /// `drop table` that treats ORA-00942 as already dropped.
    async fn drop_table_if_exists(&self, schema: &str, table: &str) -> Result<()> {
        let dropped = schema_period_table(schema, table, &self.dialect, true);
        match self.exec(&self.dialect.drop_table_sql(schema, table)).await {
            Ok(()) => info!("dropped {} in {}", dropped, self.name),
            Err(PipeError::Query { ref message, .. }) if message.contains("ORA-00942") => {
                debug!("{} did not exist in {}", dropped, self.name)
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_connection_string() {
        let (user, pass, connect) =
            parse_connection_string("scott/ti@ger@//db.internal:1521/ORCLPDB1").unwrap();
        assert_eq!(user, "scott");
        assert_eq!(pass, "ti@ger");
        assert_eq!(connect, "//db.internal:1521/ORCLPDB1");
        assert!(parse_connection_string("no-credentials").is_err());
    }

    #[test]
    fn test_described_types_map_to_canonical() {
        let d = OracleDialect::new();
        for ty in [
            OracleType::Varchar2(10),
            OracleType::Number(10, 2),
            OracleType::BinaryDouble,
            OracleType::Date,
            OracleType::Timestamp(6),
            OracleType::TimestampTZ(6),
            OracleType::Raw(16),
            OracleType::BLOB,
            OracleType::CLOB,
        ] {
            let (name, _) = describe(&ty);
            assert!(d.driver_type_to_canonical(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_sqlldr_args() {
        let config = TransferConfig {
            target_type: "oracle".into(),
            target_username: "app".into(),
            target_password: "secret".into(),
            target_hostname: "db".into(),
            target_port: Some(1522),
            target_database: "ORCL".into(),
            ..Default::default()
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        let args = OracleEngine::sqlldr_args(Path::new("/s/final-csv/0001.csv"), &info);
        assert_eq!(args[0], "app/secret@db:1522/ORCL");
        assert_eq!(args[1], "control=/s/final-csv/0001.ctl");
        assert_eq!(args[4], "DISCARD=/s/final-csv/0001.discard");
    }
}
