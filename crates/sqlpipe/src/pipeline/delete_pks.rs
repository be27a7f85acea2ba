//! Deletes rows about to be reloaded by an incremental transfer.
//!
//! The writer records the primary keys of every pipe file in a side file;
//! before the matching final file is loaded those keys are deleted from the
//! target so changed rows are replaced rather than duplicated.

use std::path::Path;

use tracing::debug;

use crate::core::identifier::{column_list, escape_if_needed, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{Dialect, Engine};
use crate::error::{PipeError, Result};
use crate::transfer::TransferInfo;

/// Key tuples per DELETE statement.
pub const DELETE_BATCH_ROWS: usize = 5;

/// `DELETE FROM t WHERE (k1, k2) IN ((...),(...))`, or an OR of key
/// equalities for composite keys on dialects without row values.
pub fn delete_statement(
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
    pk_columns: &[ColumnInfo],
    tuples: &[Vec<String>],
) -> String {
    let table = schema_period_table(schema, table, dialect, true);
    if pk_columns.len() > 1 && !dialect.supports_row_values() {
        let predicates: Vec<String> = tuples
            .iter()
            .map(|tuple| {
                let terms: Vec<String> = pk_columns
                    .iter()
                    .zip(tuple)
                    .map(|(column, literal)| {
                        format!("{} = {}", escape_if_needed(&column.name, dialect), literal)
                    })
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();
        return format!("DELETE FROM {} WHERE {}", table, predicates.join(" OR "));
    }

    let tuples: Vec<String> = tuples
        .iter()
        .map(|tuple| format!("({})", tuple.join(", ")))
        .collect();
    format!(
        "DELETE FROM {} WHERE ({}) IN ({})",
        table,
        column_list(pk_columns.iter().map(|c| c.name.as_str()), dialect),
        tuples.join(",")
    )
}

/// Delete every key listed in `pk_file` from the target. Returns the number
/// of keys processed.
pub async fn delete_listed_keys(
    engine: &dyn Engine,
    pk_file: &Path,
    info: &TransferInfo,
    schema: &str,
    table: &str,
    pk_columns: &[ColumnInfo],
) -> Result<usize> {
    let text = tokio::fs::read_to_string(pk_file)
        .await
        .map_err(|e| PipeError::file(pk_file, e))?;
    let dialect = engine.dialect();
    let format = info.pipe_format();

    let mut tuples = Vec::with_capacity(DELETE_BATCH_ROWS);
    let mut keys = 0usize;
    for row in format.rows(&text) {
        let literals = row?
            .iter()
            .zip(pk_columns)
            .map(|(field, column)| match field {
                None => Ok("null".to_string()),
                Some(value) => dialect.sql_value(column.canonical, value),
            })
            .collect::<Result<Vec<_>>>()?;
        tuples.push(literals);
        keys += 1;

        if tuples.len() >= DELETE_BATCH_ROWS {
            flush(engine, info, schema, table, pk_columns, &mut tuples).await?;
        }
    }
    flush(engine, info, schema, table, pk_columns, &mut tuples).await?;

    debug!("deleted up to {} changed rows listed in {}", keys, pk_file.display());
    Ok(keys)
}

async fn flush(
    engine: &dyn Engine,
    info: &TransferInfo,
    schema: &str,
    table: &str,
    pk_columns: &[ColumnInfo],
    tuples: &mut Vec<Vec<String>>,
) -> Result<()> {
    if tuples.is_empty() {
        return Ok(());
    }
    if info.cancel.is_cancelled() {
        return Err(PipeError::Cancelled);
    }
    let sql = delete_statement(engine.dialect(), schema, table, pk_columns, tuples);
    tuples.clear();
    engine.exec(&sql).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;
    use crate::pipeline::testing::RecordingEngine;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_delete_statement_shape() {
        let pg = DatabaseType::Postgresql.dialect();
        let pks = vec![
            ColumnInfo::new("a", CanonicalType::Int32),
            ColumnInfo::new("b", CanonicalType::Text),
        ];
        let tuples = vec![
            vec!["1".to_string(), "'x'".to_string()],
            vec!["2".to_string(), "'y'".to_string()],
        ];
        let sql = delete_statement(&pg, "public", "t", &pks, &tuples);
        assert_eq!(
            sql,
            "DELETE FROM public.t WHERE (a, b) IN ((1, 'x'),(2, 'y'))"
        );

        let mssql = DatabaseType::Mssql.dialect();
        assert_eq!(
            delete_statement(&mssql, "dbo", "t", &pks, &tuples),
            "DELETE FROM dbo.t WHERE (a = 1 AND b = 'x') OR (a = 2 AND b = 'y')"
        );
        // Single keys keep the IN form
        let single = vec![vec!["1".to_string()]];
        assert_eq!(
            delete_statement(&mssql, "dbo", "t", &pks[..1], &single),
            "DELETE FROM dbo.t WHERE (a) IN ((1))"
        );
    }

    #[tokio::test]
    async fn test_flushes_every_five_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pk_file = dir.path().join("0pk.pipe");
        let keys: String = (1..=7).map(|i| format!("{}{{nwln}}", i)).collect();
        std::fs::write(&pk_file, keys).unwrap();

        let config = TransferConfig {
            source_type: "postgresql".into(),
            target_type: "postgresql".into(),
            target_table: "t".into(),
            ..Default::default()
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        let engine = RecordingEngine::new(DatabaseType::Postgresql.dialect());
        let pks = vec![ColumnInfo::new("id", CanonicalType::Int64)];

        let n = delete_listed_keys(&engine, &pk_file, &info, "public", "t", &pks)
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(
            engine.statements(),
            vec![
                "DELETE FROM public.t WHERE (id) IN ((1),(2),(3),(4),(5))",
                "DELETE FROM public.t WHERE (id) IN ((6),(7))",
            ]
        );
    }
}
