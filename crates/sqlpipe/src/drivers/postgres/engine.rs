//! PostgreSQL wire protocol engine, shared by PostgreSQL and Redshift.
//!
//! Uses deadpool-postgres for pooling. Result sets are streamed with
//! `query_raw`; columns whose wire type has no typed decoder here are
//! re-selected as `::text` so the dialect formatters receive strings.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::StreamExt;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::core::cursor::RowCursor;
use crate::core::schema::{ColumnInfo, CursorColumn};
use crate::core::traits::{Dialect, Engine};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{truncate_statement, PipeError, Result};
use crate::pipeline::insert::insert_final_file;
use crate::transfer::TransferInfo;

/// Connections kept per engine.
const POOL_SIZE: usize = 4;

/// How one result column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    Timestamptz,
    Date,
    Time,
    Json,
    /// Re-selected as `::text`.
    Cast,
}

impl Decoder {
    fn for_type(ty: &Type) -> Self {
        match *ty {
            Type::BOOL => Decoder::Bool,
            Type::INT2 => Decoder::I16,
            Type::INT4 => Decoder::I32,
            Type::INT8 => Decoder::I64,
            Type::FLOAT4 => Decoder::F32,
            Type::FLOAT8 => Decoder::F64,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Decoder::Text
            }
            Type::BYTEA => Decoder::Bytes,
            Type::UUID => Decoder::Uuid,
            Type::TIMESTAMP => Decoder::Timestamp,
            Type::TIMESTAMPTZ => Decoder::Timestamptz,
            Type::DATE => Decoder::Date,
            Type::TIME => Decoder::Time,
            Type::JSON | Type::JSONB => Decoder::Json,
            // numeric, money, interval, xml, bit strings, network and geometric types
            _ => Decoder::Cast,
        }
    }
}

/// Engine over the PostgreSQL wire protocol, parameterized by dialect.
pub struct PostgresEngine<D> {
    dialect: D,
    name: String,
    pool: Pool,
}

impl<D> PostgresEngine<D>
where
    D: Dialect + Default + 'static,
{
    /// Open a pool from a `postgres://` URL or key/value connection string.
    pub async fn connect(name: &str, connection_string: &str) -> Result<Self> {
        let dialect = D::default();
        let dialect_name = dialect.name();

        let (connection_string, ssl_mode) = SslMode::split_from(connection_string)?;
        let pg_config: PgConfig = connection_string
            .parse()
            .map_err(|e| PipeError::connect(dialect_name, e))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!(
                    "{} TLS is disabled. Credentials will be transmitted in plaintext.",
                    dialect_name
                );
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr).max_size(POOL_SIZE).build()
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr).max_size(POOL_SIZE).build()
            }
        }
        .map_err(|e| PipeError::connect(dialect_name, e))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| PipeError::connect(dialect_name, e))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| PipeError::connect(dialect_name, e))?;

        let name = if name.is_empty() { dialect_name } else { name };
        info!("Connected to {} ({})", name, dialect_name);

        Ok(Self {
            dialect,
            name: name.to_string(),
            pool,
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| PipeError::connect(self.dialect.name(), e))
    }

    fn query_error(&self, sql: &str, e: impl ToString) -> PipeError {
        PipeError::query(self.dialect.name(), sql, e)
    }
}

/// `SELECT sqlpipe_src."a", sqlpipe_src."b"::text FROM (<sql>) AS sqlpipe_src`
fn wrap_with_text_casts(sql: &str, names: &[&str], plan: &[Decoder]) -> Result<String> {
    let mut seen = HashSet::new();
    if names.iter().any(|n| !seen.insert(*n)) {
        return Err(PipeError::query(
            "postgresql",
            sql,
            "result columns need text conversion but their names are not unique; alias them",
        ));
    }

    let select_list = names
        .iter()
        .zip(plan)
        .map(|(name, decoder)| {
            let quoted = format!("sqlpipe_src.\"{}\"", name.replace('"', "\"\""));
            if *decoder == Decoder::Cast {
                format!("{}::text", quoted)
            } else {
                quoted
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let inner = sql.trim().trim_end_matches(';');
    Ok(format!(
        "SELECT {} FROM ({}) AS sqlpipe_src",
        select_list, inner
    ))
}

fn no_params<'a>() -> impl ExactSizeIterator<Item = &'a (dyn ToSql + Sync)> {
    std::iter::empty()
}

fn decode_row(
    row: &tokio_postgres::Row,
    plan: &[Decoder],
) -> std::result::Result<Row, tokio_postgres::Error> {
    fn get<'a, T>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> std::result::Result<Option<T>, tokio_postgres::Error>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx)
    }

    let mut values = Vec::with_capacity(plan.len());
    for (idx, decoder) in plan.iter().enumerate() {
        let value = match decoder {
            Decoder::Bool => get::<bool>(row, idx)?.map(SqlValue::Bool),
            Decoder::I16 => get::<i16>(row, idx)?.map(SqlValue::I16),
            Decoder::I32 => get::<i32>(row, idx)?.map(SqlValue::I32),
            Decoder::I64 => get::<i64>(row, idx)?.map(SqlValue::I64),
            Decoder::F32 => get::<f32>(row, idx)?.map(SqlValue::F32),
            Decoder::F64 => get::<f64>(row, idx)?.map(SqlValue::F64),
            Decoder::Text | Decoder::Cast => get::<String>(row, idx)?.map(SqlValue::text),
            Decoder::Bytes => get::<Vec<u8>>(row, idx)?.map(SqlValue::bytes),
            Decoder::Uuid => get::<uuid::Uuid>(row, idx)?.map(SqlValue::Uuid),
            Decoder::Timestamp => get::<chrono::NaiveDateTime>(row, idx)?.map(SqlValue::DateTime),
            Decoder::Timestamptz => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
                .map(|dt| SqlValue::DateTimeOffset(dt.fixed_offset())),
            Decoder::Date => get::<chrono::NaiveDate>(row, idx)?.map(SqlValue::Date),
            Decoder::Time => get::<chrono::NaiveTime>(row, idx)?.map(SqlValue::Time),
            Decoder::Json => get::<serde_json::Value>(row, idx)?.map(SqlValue::Json),
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(values)
}

#[async_trait]
impl<D> Engine for PostgresEngine<D>
where
    D: Dialect + Default + 'static,
{
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str) -> Result<RowCursor> {
        debug!("dql on {}: {}", self.name, truncate_statement(sql));
        let client = self.client().await?;

        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| self.query_error(sql, e))?;

        let columns: Vec<CursorColumn> = statement
            .columns()
            .iter()
            .map(|c| CursorColumn::new(c.name(), c.type_().name().to_uppercase()))
            .collect();
        let plan: Vec<Decoder> = statement
            .columns()
            .iter()
            .map(|c| Decoder::for_type(c.type_()))
            .collect();

        let statement = if plan.contains(&Decoder::Cast) {
            let names: Vec<&str> = statement.columns().iter().map(|c| c.name()).collect();
            let wrapped = wrap_with_text_casts(sql, &names, &plan)?;
            client
                .prepare(&wrapped)
                .await
                .map_err(|e| self.query_error(&wrapped, e))?
        } else {
            statement
        };

        let stream = client
            .query_raw(&statement, no_params())
            .await
            .map_err(|e| self.query_error(sql, e))?;

        let dialect = self.dialect.name();
        let sql = sql.to_string();
        Ok(RowCursor::spawn(columns, move |tx| async move {
            // The pooled client must outlive the stream
            let _client = client;
            futures::pin_mut!(stream);
            while let Some(row) = stream.next().await {
                let row = row
                    .and_then(|r| decode_row(&r, &plan))
                    .map_err(|e| PipeError::query(dialect, sql.as_str(), e));
                let failed = row.is_err();
                if tx.send(row).await.is_err() || failed {
                    return;
                }
            }
        }))
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        debug!("ddl/dml on {}: {}", self.name, truncate_statement(sql));
        let client = self.client().await?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| self.query_error(sql, e))
    }

    async fn close(&self, _print_error: bool) {
        self.pool.close();
        debug!("closed {} pool", self.name);
    }

    async fn run_insert_cmd(
        &self,
        final_file: &Path,
        info: &TransferInfo,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Result<()> {
        insert_final_file(self, final_file, info, schema, table, columns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_for_type() {
        assert_eq!(Decoder::for_type(&Type::INT4), Decoder::I32);
        assert_eq!(Decoder::for_type(&Type::JSONB), Decoder::Json);
        assert_eq!(Decoder::for_type(&Type::NUMERIC), Decoder::Cast);
        assert_eq!(Decoder::for_type(&Type::INTERVAL), Decoder::Cast);
        assert_eq!(Decoder::for_type(&Type::INET), Decoder::Cast);
    }

    #[test]
    fn test_wrap_with_text_casts() {
        let sql = wrap_with_text_casts(
            "select id, amount from t;",
            &["id", "amount"],
            &[Decoder::I32, Decoder::Cast],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT sqlpipe_src.\"id\", sqlpipe_src.\"amount\"::text FROM (select id, amount from t) AS sqlpipe_src"
        );
    }

    #[test]
    fn test_wrap_rejects_duplicate_names() {
        let err = wrap_with_text_casts(
            "select 1::numeric, 2::numeric",
            &["numeric", "numeric"],
            &[Decoder::Cast, Decoder::Cast],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }
}
