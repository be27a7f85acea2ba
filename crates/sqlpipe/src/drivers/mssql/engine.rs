//! SQL Server engine over Tiberius with bb8 pooling.
//!
//! Bulk loads shell out to `bcp`; the INSERT path is used when the
//! transfer asks for it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use tiberius::{Client, ColumnData, ColumnType, Config, FromSql, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::core::cursor::{RowCursor, CURSOR_BUFFER};
use crate::core::identifier::schema_period_table;
use crate::core::schema::{ColumnInfo, CursorColumn};
use crate::core::traits::{Dialect, Engine};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::run_loader;
use crate::drivers::mssql::MssqlDialect;
use crate::error::{truncate_statement, PipeError, Result};
use crate::pipeline::insert::insert_final_file;
use crate::transfer::TransferInfo;

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connections kept per engine.
const POOL_SIZE: u32 = 4;

type TdsClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: Config,
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting"))?;
        tcp.set_nodelay(true).ok();

        // Enable TCP keepalives
        let std_tcp = tcp.into_std().map_err(|e| io_error(e, "detaching socket"))?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }
        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        let tcp = TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "converting socket"))?;

        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Native type name reported for a result column.
fn type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Bit | ColumnType::Bitn => "BIT",
        ColumnType::Int1 => "TINYINT",
        ColumnType::Int2 => "SMALLINT",
        ColumnType::Int4 => "INT",
        // Nullable integers do not carry their width
        ColumnType::Int8 | ColumnType::Intn => "BIGINT",
        ColumnType::Float4 => "REAL",
        ColumnType::Float8 | ColumnType::Floatn => "FLOAT",
        ColumnType::Money | ColumnType::Money4 => "MONEY",
        ColumnType::Decimaln => "DECIMAL",
        ColumnType::Numericn => "NUMERIC",
        ColumnType::Datetime4 => "SMALLDATETIME",
        ColumnType::Datetime | ColumnType::Datetimen => "DATETIME",
        ColumnType::Datetime2 => "DATETIME2",
        ColumnType::DatetimeOffsetn => "DATETIMEOFFSET",
        ColumnType::Daten => "DATE",
        ColumnType::Timen => "TIME",
        ColumnType::Guid => "UNIQUEIDENTIFIER",
        ColumnType::BigVarBin => "VARBINARY",
        ColumnType::BigBinary => "BINARY",
        ColumnType::Image => "IMAGE",
        ColumnType::BigVarChar => "VARCHAR",
        ColumnType::BigChar => "CHAR",
        ColumnType::NVarchar => "NVARCHAR",
        ColumnType::NChar => "NCHAR",
        ColumnType::Text => "TEXT",
        ColumnType::NText => "NTEXT",
        ColumnType::Xml => "XML",
        _ => "SQL_VARIANT",
    }
}

fn decode_value(data: ColumnData<'static>) -> tiberius::Result<SqlValue<'static>> {
    // Temporal values go through Tiberius' chrono conversions
    let temporal = match &data {
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            Some(NaiveDateTime::from_sql(&data)?.map(SqlValue::DateTime))
        }
        ColumnData::DateTimeOffset(_) => {
            Some(DateTime::<FixedOffset>::from_sql(&data)?.map(SqlValue::DateTimeOffset))
        }
        ColumnData::Date(_) => Some(NaiveDate::from_sql(&data)?.map(SqlValue::Date)),
        ColumnData::Time(_) => Some(NaiveTime::from_sql(&data)?.map(SqlValue::Time)),
        _ => None,
    };
    if let Some(value) = temporal {
        return Ok(value.unwrap_or(SqlValue::Null));
    }

    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::I16(v as i16)),
        ColumnData::I16(v) => v.map(SqlValue::I16),
        ColumnData::I32(v) => v.map(SqlValue::I32),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(SqlValue::F32),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.map(|s| SqlValue::text(s.into_owned())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.map(|b| SqlValue::bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| SqlValue::text(n.to_string())),
        ColumnData::Xml(v) => v.map(|x| SqlValue::text(x.into_owned().into_string())),
        _ => None,
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn decode_row(row: tiberius::Row) -> tiberius::Result<Row> {
    row.into_iter().map(decode_value).collect()
}

/// SQL Server engine.
pub struct MssqlEngine {
    dialect: MssqlDialect,
    name: String,
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlEngine {
    /// Open a pool from an ADO connection string
    /// (`Server=tcp:host,1433;Database=db;User Id=u;Password=p;TrustServerCertificate=true`).
    pub async fn connect(name: &str, connection_string: &str) -> Result<Self> {
        let mut config =
            Config::from_ado_string(connection_string).map_err(|e| PipeError::connect("mssql", e))?;
        config.packet_size(TDS_MAX_PACKET_SIZE);

        let manager = TiberiusConnectionManager { config };
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| PipeError::connect("mssql", e))?;

        // Test connection
        {
            let mut conn = pool.get().await.map_err(|e| PipeError::connect("mssql", e))?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| PipeError::connect("mssql", e))?
                .into_row()
                .await
                .map_err(|e| PipeError::connect("mssql", e))?;
        }

        let name = if name.is_empty() { "mssql" } else { name };
        info!("Connected to {} (mssql)", name);

        Ok(Self {
            dialect: MssqlDialect::new(),
            name: name.to_string(),
            pool,
        })
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| PipeError::connect("mssql", e))
    }

    /// `bcp` arguments for one final file.
    fn bcp_args(&self, final_file: &Path, info: &TransferInfo, schema: &str, table: &str) -> Vec<String> {
        let config = &info.config;
        let server = match config.target_port {
            Some(port) => format!("{},{}", config.target_hostname, port),
            None => config.target_hostname.clone(),
        };
        vec![
            format!(
                "{}.{}",
                config.target_database,
                schema_period_table(schema, table, &self.dialect, true)
            ),
            "in".to_string(),
            final_file.to_string_lossy().into_owned(),
            "-c".to_string(),
            "-S".to_string(),
            server,
            "-U".to_string(),
            config.target_username.clone(),
            "-P".to_string(),
            config.target_password.clone(),
            "-t".to_string(),
            info.delimiter.clone(),
            "-r".to_string(),
            info.newline.clone(),
            "-e".to_string(),
            final_file.with_extension("err").to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Engine for MssqlEngine {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str) -> Result<RowCursor> {
        debug!("dql on {}: {}", self.name, truncate_statement(sql));
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| PipeError::connect("mssql", e))?;

        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        let (columns_tx, columns_rx) = oneshot::channel::<Result<Vec<CursorColumn>>>();
        let sql = sql.to_string();

        // Columns arrive with the first metadata token, so the driver task
        // reports them back before streaming rows.
        let task = tokio::spawn(async move {
            let mut conn = conn;
            let mut columns_tx = Some(columns_tx);
            let query_error = |e: tiberius::error::Error| PipeError::query("mssql", sql.as_str(), e);

            let mut stream = match conn.simple_query(sql.as_str()).await {
                Ok(stream) => stream,
                Err(e) => {
                    if let Some(columns_tx) = columns_tx.take() {
                        let _ = columns_tx.send(Err(query_error(e)));
                    }
                    return;
                }
            };

            loop {
                let item = match stream.try_next().await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(e) => {
                        let err = query_error(e);
                        match columns_tx.take() {
                            Some(columns_tx) => {
                                let _ = columns_tx.send(Err(err));
                            }
                            None => {
                                let _ = tx.send(Err(err)).await;
                            }
                        }
                        return;
                    }
                };

                match item {
                    QueryItem::Metadata(meta) => {
                        if let Some(columns_tx) = columns_tx.take() {
                            let columns = meta
                                .columns()
                                .iter()
                                .map(|c| CursorColumn::new(c.name(), type_name(c.column_type())))
                                .collect();
                            if columns_tx.send(Ok(columns)).is_err() {
                                return;
                            }
                        }
                    }
                    QueryItem::Row(row) => {
                        let row = decode_row(row).map_err(query_error);
                        let failed = row.is_err();
                        if tx.send(row).await.is_err() || failed {
                            return;
                        }
                    }
                }
            }

            // Statements without a result set
            if let Some(columns_tx) = columns_tx.take() {
                let _ = columns_tx.send(Ok(Vec::new()));
            }
        });

        let columns = columns_rx.await.map_err(|_| PipeError::Cancelled)??;
        Ok(RowCursor::with_task(columns, rx, task))
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        debug!("ddl/dml on {}: {}", self.name, truncate_statement(sql));
        let mut conn = self.client().await?;
        conn.simple_query(sql)
            .await
            .map_err(|e| PipeError::query("mssql", sql, e))?
            .into_results()
            .await
            .map_err(|e| PipeError::query("mssql", sql, e))?;
        Ok(())
    }

    async fn close(&self, _print_error: bool) {
        // bb8 closes idle connections when the pool is dropped
        debug!("closing {} pool ({} connections)", self.name, self.pool.state().connections);
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

        let args = self.bcp_args(final_file, info, schema, table);
        run_loader(
            "bcp",
            &args,
            &[info.config.target_password.as_str()],
            &info.cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_map_to_canonical() {
        let d = MssqlDialect::new();
        for ty in [
            ColumnType::Bitn,
            ColumnType::Intn,
            ColumnType::Int1,
            ColumnType::Floatn,
            ColumnType::Moneyn,
            ColumnType::Numericn,
            ColumnType::Datetime2,
            ColumnType::DatetimeOffsetn,
            ColumnType::Guid,
            ColumnType::BigVarBin,
            ColumnType::NVarchar,
            ColumnType::Xml,
        ] {
            assert!(d.driver_type_to_canonical(type_name(ty)).is_some(), "{ty:?}");
        }
        assert!(d.driver_type_to_canonical(type_name(ColumnType::SSVariant)).is_none());
    }

    #[test]
    fn test_decode_value() {
        assert!(matches!(
            decode_value(ColumnData::I32(Some(7))).unwrap(),
            SqlValue::I32(7)
        ));
        assert!(decode_value(ColumnData::String(None)).unwrap().is_null());
        assert!(matches!(
            decode_value(ColumnData::U8(Some(200))).unwrap(),
            SqlValue::I16(200)
        ));
    }
}
