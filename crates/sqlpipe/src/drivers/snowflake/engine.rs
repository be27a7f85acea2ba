//! Snowflake engine over ODBC.
//!
//! ODBC calls block, so they run on Tokio's blocking pool. Each call opens
//! its own connection from a shared environment; DDL/DML is serialized.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::{ConnectionOptions, Cursor, DataType, Environment, ResultSetMetadata};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::core::cursor::{RowCursor, CURSOR_BUFFER};
use crate::core::schema::{ColumnInfo, CursorColumn};
use crate::core::traits::{value_as_i64, value_as_string, Dialect, Engine};
use crate::core::value::{Row, SqlValue};
use crate::drivers::snowflake::SnowflakeDialect;
use crate::error::{truncate_statement, PipeError, Result};
use crate::pipeline::insert::insert_final_file;
use crate::transfer::TransferInfo;

use super::dialect::{split_for_upload, MAX_UPLOAD_BYTES};

/// Rows fetched per ODBC round trip.
const FETCH_BATCH: usize = 1000;

/// Longest text value fetched per cell.
const MAX_TEXT_LEN: usize = 16 * 1024 * 1024;

/// How one text cell is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Text,
    Integer,
    Float,
    Date,
    Time,
    Timestamp,
    Bool,
}

/// Snowflake type name and decoder for an ODBC column type.
fn describe(ty: &DataType) -> (&'static str, Decoder) {
    match ty {
        DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => {
            ("BIGINT", Decoder::Integer)
        }
        DataType::Decimal { .. } | DataType::Numeric { .. } => ("FIXED", Decoder::Text),
        DataType::Real | DataType::Float { .. } | DataType::Double => ("REAL", Decoder::Float),
        DataType::Date => ("DATE", Decoder::Date),
        DataType::Time { .. } => ("TIME", Decoder::Time),
        DataType::Timestamp { .. } => ("TIMESTAMP_NTZ", Decoder::Timestamp),
        DataType::Bit => ("BOOLEAN", Decoder::Bool),
        // Binary cells arrive as hex text
        DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. } => {
            ("BINARY", Decoder::Text)
        }
        _ => ("TEXT", Decoder::Text),
    }
}

/// Decode one text cell; values that do not parse stay text.
fn decode_cell(text: &str, decoder: Decoder) -> SqlValue<'static> {
    let parsed = match decoder {
        Decoder::Text => None,
        Decoder::Integer => text.trim().parse().ok().map(SqlValue::I64),
        Decoder::Float => text.trim().parse().ok().map(SqlValue::F64),
        Decoder::Date => chrono::NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        Decoder::Time => chrono::NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")
            .ok()
            .map(SqlValue::Time),
        Decoder::Timestamp => {
            chrono::NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(SqlValue::DateTime)
        }
        Decoder::Bool => match text.trim() {
            "1" | "true" | "TRUE" => Some(SqlValue::Bool(true)),
            "0" | "false" | "FALSE" => Some(SqlValue::Bool(false)),
            _ => None,
        },
    };
    parsed.unwrap_or_else(|| SqlValue::text(text))
}

/// Snowflake engine.
pub struct SnowflakeEngine {
    dialect: SnowflakeDialect,
    name: String,
    env: Arc<Environment>,
    connection_string: String,
    /// Serializes DDL/DML; ODBC handles are not shared across threads
    exec_lock: Mutex<()>,
}

impl SnowflakeEngine {
    /// Open an ODBC environment and test the connection string.
    pub async fn connect(name: &str, connection_string: &str) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            PipeError::connect(
                "snowflake",
                format!("failed to create ODBC environment: {}. Is the Snowflake ODBC driver installed?", e),
            )
        })?;
        let env = Arc::new(env);

        let probe_env = Arc::clone(&env);
        let conn_str = connection_string.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = probe_env
                .connect_with_connection_string(&conn_str, ConnectionOptions::default())
                .map_err(|e| PipeError::connect("snowflake", e))?;
            conn.execute("SELECT 1", ())
                .map_err(|e| PipeError::connect("snowflake", e))?;
            Ok(())
        })
        .await
        .map_err(|e| PipeError::connect("snowflake", e))??;

        let name = if name.is_empty() { "snowflake" } else { name };
        info!("Connected to {} (snowflake)", name);

        Ok(Self {
            dialect: SnowflakeDialect::new(),
            name: name.to_string(),
            env,
            connection_string: connection_string.to_string(),
            exec_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl Engine for SnowflakeEngine {
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
        let env = Arc::clone(&self.env);
        let conn_str = self.connection_string.clone();
        let sql = sql.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let query_error = |e: odbc_api::Error| PipeError::query("snowflake", sql.as_str(), e);

            let conn = match env.connect_with_connection_string(&conn_str, ConnectionOptions::default()) {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = columns_tx.send(Err(PipeError::connect("snowflake", e)));
                    return;
                }
            };
            let mut cursor = match conn.execute(&sql, ()) {
                Ok(Some(cursor)) => cursor,
                Ok(None) => {
                    let _ = columns_tx.send(Ok(Vec::new()));
                    return;
                }
                Err(e) => {
                    let _ = columns_tx.send(Err(query_error(e)));
                    return;
                }
            };

            let described = (|| -> std::result::Result<_, odbc_api::Error> {
                let count = cursor.num_result_cols()? as u16;
                let mut columns = Vec::with_capacity(count as usize);
                let mut plan = Vec::with_capacity(count as usize);
                for i in 1..=count {
                    let name = cursor.col_name(i)?;
                    let (type_name, decoder) = describe(&cursor.col_data_type(i)?);
                    columns.push(CursorColumn::new(name, type_name));
                    plan.push(decoder);
                }
                Ok((columns, plan))
            })();
            let (columns, plan) = match described {
                Ok(described) => described,
                Err(e) => {
                    let _ = columns_tx.send(Err(query_error(e)));
                    return;
                }
            };
            if columns_tx.send(Ok(columns)).is_err() {
                return;
            }

            let mut buffers = match TextRowSet::for_cursor(FETCH_BATCH, &mut cursor, Some(MAX_TEXT_LEN)) {
                Ok(buffers) => buffers,
                Err(e) => {
                    let _ = tx.blocking_send(Err(query_error(e)));
                    return;
                }
            };
            let mut rows = match cursor.bind_buffer(&mut buffers) {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = tx.blocking_send(Err(query_error(e)));
                    return;
                }
            };

            loop {
                let batch = match rows.fetch() {
                    Ok(Some(batch)) => batch,
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(query_error(e)));
                        return;
                    }
                };
                for row_idx in 0..batch.num_rows() {
                    let row: Row = plan
                        .iter()
                        .enumerate()
                        .map(|(col_idx, decoder)| match batch.at(col_idx, row_idx) {
                            Some(bytes) => decode_cell(&String::from_utf8_lossy(bytes), *decoder),
                            None => SqlValue::Null,
                        })
                        .collect();
                    if tx.blocking_send(Ok(row)).is_err() {
                        return;
                    }
                }
            }
        });

        let columns = columns_rx.await.map_err(|_| PipeError::Cancelled)??;
        Ok(RowCursor::with_task(columns, rx, task))
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        debug!("ddl/dml on {}: {}", self.name, truncate_statement(sql));
        let _guard = self.exec_lock.lock().await;

        let env = Arc::clone(&self.env);
        let conn_str = self.connection_string.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = env
                .connect_with_connection_string(&conn_str, ConnectionOptions::default())
                .map_err(|e| PipeError::connect("snowflake", e))?;
            conn.execute(&sql, ())
                .map(|_| ())
                .map_err(|e| PipeError::query("snowflake", sql.as_str(), e))
        })
        .await
        .map_err(|e| PipeError::connect("snowflake", e))?
    }

    async fn close(&self, _print_error: bool) {
        debug!("closing {} ODBC environment", self.name);
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
        if info.cancel.is_cancelled() {
            return Err(PipeError::Cancelled);
        }

        let stage = SnowflakeDialect::stage_name(&info.id);
        let path = final_file.to_path_buf();
        let files = tokio::task::spawn_blocking(move || split_for_upload(&path, MAX_UPLOAD_BYTES))
            .await
            .map_err(|e| PipeError::file(final_file, std::io::Error::other(e)))??;
        debug!("{}: {} staged upload(s)", final_file.display(), files.len());
        for sql in self
            .dialect
            .upload_statements(&files, schema, table, &stage, columns)
        {
            self.exec(&sql).await?;
        }
        Ok(())
    }

    /// Create the CSV file format and the transfer's stage.
    async fn begin_load(&self, info: &TransferInfo, schema: &str) -> Result<()> {
        if info.uses_insert_statements() {
            return Ok(());
        }
        let stage = SnowflakeDialect::stage_name(&info.id);
        self.exec(&self.dialect.file_format_sql(schema)).await?;
        self.exec(&self.dialect.create_stage_sql(schema, &stage)).await?;
        info!("created stage {} in {}", stage, self.name);
        Ok(())
    }

    async fn end_load(&self, info: &TransferInfo, schema: &str) -> Result<()> {
        if info.uses_insert_statements() {
            return Ok(());
        }
        let stage = SnowflakeDialect::stage_name(&info.id);
        if let Err(e) = self.exec(&self.dialect.drop_stage_sql(schema, &stage)).await {
            warn!("error dropping snowflake stage {}: {}", stage, e);
            return Err(e);
        }
        Ok(())
    }

    /// `SHOW PRIMARY KEYS` returns one row per key column with its position.
    async fn primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let mut cursor = self
            .query(&self.dialect.primary_keys_sql(schema, table))
            .await?;
        let position = |name: &str| {
            cursor
                .columns()
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
        };
        let (name_idx, seq_idx) = match (position("column_name"), position("key_sequence")) {
            (Some(n), Some(s)) => (n, s),
            _ => return Ok(Vec::new()),
        };

        let mut keys = Vec::new();
        while let Some(row) = cursor.next().await {
            let row = row?;
            let name = row.get(name_idx).and_then(value_as_string);
            let seq = row.get(seq_idx).and_then(value_as_i64).unwrap_or(0);
            if let Some(name) = name {
                keys.push((seq, name));
            }
        }
        keys.sort();
        Ok(keys.into_iter().map(|(_, name)| name).collect())
    }
}
