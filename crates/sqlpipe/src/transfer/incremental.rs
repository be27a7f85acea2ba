//! High-watermark incremental loads.

use tracing::info;

use crate::core::identifier::{escape_if_needed, schema_period_table};
use crate::core::schema::{find_column, ColumnInfo};
use crate::core::traits::{Dialect, Engine};
use crate::error::{PipeError, Result};
use crate::transfer::TransferInfo;

/// Outcome of the watermark probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watermark {
    /// Target table absent or empty: copy everything.
    InitialLoad,
    /// Copy rows whose column is strictly greater than this pipe value.
    After(String),
}

/// Probe the target for the incremental column's current maximum.
pub async fn probe_watermark(
    target: &dyn Engine,
    info: &TransferInfo,
    column: &ColumnInfo,
) -> Result<Watermark> {
    let config = &info.config;
    let watermark = target
        .incremental_time(
            &config.target_schema,
            &config.target_table,
            &column.name,
            column.canonical,
        )
        .await?;

    Ok(match watermark {
        None => {
            info!("transfer {}: initial incremental load", info.id);
            Watermark::InitialLoad
        }
        Some(value) => {
            info!(
                "transfer {}: loading rows with {} > {}",
                info.id, column.name, value
            );
            Watermark::After(value)
        }
    })
}

/// The incremental column among `columns`, matched ignoring case.
pub fn incremental_column<'a>(columns: &'a [ColumnInfo], name: &str) -> Result<&'a ColumnInfo> {
    find_column(columns, name).ok_or_else(|| {
        PipeError::Config(format!(
            "incremental-column '{}' is not a column of the source table",
            name
        ))
    })
}

/// `SELECT * FROM src WHERE col > <watermark>` with the source's literal syntax.
pub fn incremental_query(
    source: &dyn Dialect,
    schema: &str,
    table: &str,
    column: &ColumnInfo,
    watermark: &str,
) -> Result<String> {
    Ok(format!(
        "SELECT * FROM {} WHERE {} > {}",
        schema_period_table(schema, table, source, true),
        escape_if_needed(&column.name, source),
        source.sql_value(column.canonical, watermark)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::core::schema::CursorColumn;
    use crate::core::value::SqlValue;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;
    use crate::pipeline::testing::RecordingEngine;
    use chrono::NaiveDate;
    use tokio_util::sync::CancellationToken;

    fn info() -> TransferInfo {
        let config = TransferConfig {
            source_type: "postgresql".into(),
            target_type: "mysql".into(),
            source_table: "src".into(),
            target_table: "dst".into(),
            incremental_column: Some("updated_at".into()),
            ..Default::default()
        };
        TransferInfo::new(config, CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_incremental_query_uses_source_formatter() {
        let pg = DatabaseType::Postgresql.dialect();
        let col = ColumnInfo::new("updated_at", CanonicalType::Int64);
        let sql = incremental_query(&pg, "public", "src", &col, "41").unwrap();
        assert_eq!(sql, "SELECT * FROM public.src WHERE updated_at > 41");
    }

    #[test]
    fn test_incremental_column_matches_case_insensitively() {
        let cols = vec![ColumnInfo::new("Updated_At", CanonicalType::Datetime)];
        assert_eq!(incremental_column(&cols, "updated_at").unwrap().name, "Updated_At");
        assert!(incremental_column(&cols, "missing").is_err());
    }

    #[tokio::test]
    async fn test_missing_target_table_means_initial_load() {
        let target = RecordingEngine::new(DatabaseType::Mysql.dialect())
            .with_error("max(updated_at)", "Table 'db.dst' doesn't exist");
        let col = ColumnInfo::new("updated_at", CanonicalType::Datetime);
        let w = probe_watermark(&target, &info(), &col).await.unwrap();
        assert_eq!(w, Watermark::InitialLoad);
    }

    #[tokio::test]
    async fn test_existing_maximum_becomes_watermark() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let target = RecordingEngine::new(DatabaseType::Mysql.dialect()).with_rows(
            "max(updated_at)",
            vec![CursorColumn::new("m", "DATETIME")],
            vec![vec![SqlValue::DateTime(ts)]],
        );
        let col = ColumnInfo::new("updated_at", CanonicalType::Datetime);
        match probe_watermark(&target, &info(), &col).await.unwrap() {
            Watermark::After(v) => assert!(v.starts_with("2024-01-02T03:04:05")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_probe_errors_propagate() {
        let target = RecordingEngine::new(DatabaseType::Mysql.dialect())
            .with_error("max(updated_at)", "Access denied");
        let col = ColumnInfo::new("updated_at", CanonicalType::Datetime);
        assert!(probe_watermark(&target, &info(), &col).await.is_err());
    }
}
