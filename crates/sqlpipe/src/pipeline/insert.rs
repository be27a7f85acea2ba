//! Generic batched INSERT path.
//!
//! Final files on this path hold one SQL literal per field (see
//! [`FinalEncoding::SqlLiterals`](crate::pipeline::converter::FinalEncoding)).
//! [`InsertBuilder`] groups rows into statements of the target's
//! [`InsertForm`] and flushes at its [`BatchLimit`].

use std::path::Path;

use tracing::debug;

use crate::core::identifier::{column_list, escape_if_needed, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect, Engine, InsertForm};
use crate::dialect::CanonicalType;
use crate::error::{PipeError, Result};
use crate::transfer::TransferInfo;

/// Accumulates rows of SQL literals into INSERT statements.
pub struct InsertBuilder {
    target: String,
    cte_name: String,
    column_names: String,
    json_columns: Vec<bool>,
    form: InsertForm,
    limit: BatchLimit,
    rows: Vec<String>,
    chars: usize,
}

impl InsertBuilder {
    pub fn new(dialect: &dyn Dialect, schema: &str, table: &str, columns: &[ColumnInfo]) -> Self {
        let json_columns: Vec<bool> = columns
            .iter()
            .map(|c| c.canonical == CanonicalType::Json)
            .collect();
        let form = match dialect.insert_form() {
            InsertForm::ValuesParseJson if !json_columns.contains(&true) => InsertForm::RowVector,
            form => form,
        };
        Self {
            target: schema_period_table(schema, table, dialect, true),
            cte_name: escape_if_needed(&format!("{}_to_insert", table), dialect),
            column_names: column_list(columns.iter().map(|c| c.name.as_str()), dialect),
            json_columns,
            form,
            limit: dialect.insert_batch_limit(),
            rows: Vec::new(),
            chars: 0,
        }
    }

    /// Add a row; returns a statement when the batch limit is reached.
    pub fn push<S: AsRef<str>>(&mut self, literals: &[S]) -> Option<String> {
        let joined = literals
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ");
        let row = match self.form {
            InsertForm::SelectUnion => format!("SELECT {} FROM dual", joined),
            InsertForm::RowVector | InsertForm::ValuesParseJson => format!("({})", joined),
        };
        self.chars += row.len();
        self.rows.push(row);

        let full = match self.limit {
            BatchLimit::Rows(n) => self.rows.len() >= n,
            BatchLimit::Chars(n) => self.chars >= n,
        };
        if full {
            self.finish()
        } else {
            None
        }
    }

    /// Statement for the buffered rows, if any; resets the builder.
    pub fn finish(&mut self) -> Option<String> {
        if self.rows.is_empty() {
            return None;
        }
        let rows = std::mem::take(&mut self.rows);
        self.chars = 0;

        let sql = match self.form {
            InsertForm::RowVector => format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.target,
                self.column_names,
                rows.join(",")
            ),
            InsertForm::SelectUnion => format!(
                "INSERT INTO {} ({}) WITH {} ({}) AS ({}) SELECT * FROM {}",
                self.target,
                self.column_names,
                self.cte_name,
                self.column_names,
                rows.join(" UNION ALL "),
                self.cte_name
            ),
            InsertForm::ValuesParseJson => {
                let select = self
                    .json_columns
                    .iter()
                    .enumerate()
                    .map(|(i, json)| {
                        if *json {
                            format!("PARSE_JSON(column{})", i + 1)
                        } else {
                            format!("column{}", i + 1)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) SELECT {} FROM VALUES {}",
                    self.target,
                    self.column_names,
                    select,
                    rows.join(",")
                )
            }
        };
        Some(sql)
    }
}

/// Apply a final file of SQL literals through batched INSERT statements.
pub async fn insert_final_file<E: Engine + ?Sized>(
    engine: &E,
    final_file: &Path,
    info: &TransferInfo,
    schema: &str,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<()> {
    let text = tokio::fs::read_to_string(final_file)
        .await
        .map_err(|e| PipeError::file(final_file, e))?;
    let format = info.pipe_format();
    let mut builder = InsertBuilder::new(engine.dialect(), schema, table, columns);
    let mut statements = 0usize;

    for row in format.rows(&text) {
        let literals: Vec<String> = row?
            .into_iter()
            .map(|field| field.unwrap_or_else(|| "NULL".to_string()))
            .collect();
        if let Some(sql) = builder.push(&literals) {
            exec_batch(engine, &sql, info).await?;
            statements += 1;
        }
    }
    if let Some(sql) = builder.finish() {
        exec_batch(engine, &sql, info).await?;
        statements += 1;
    }

    debug!(
        "inserted {} with {} statements into {}",
        final_file.display(),
        statements,
        engine.display_name()
    );
    Ok(())
}

async fn exec_batch<E: Engine + ?Sized>(engine: &E, sql: &str, info: &TransferInfo) -> Result<()> {
    if info.cancel.is_cancelled() {
        return Err(PipeError::Cancelled);
    }
    engine.exec(sql).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DatabaseType;

    #[test]
    fn test_row_vector_form() {
        let pg = DatabaseType::Postgresql.dialect();
        let columns = vec![
            ColumnInfo::new("id", CanonicalType::Int32),
            ColumnInfo::new("name", CanonicalType::Text),
        ];
        let mut b = InsertBuilder::new(&pg, "public", "t", &columns);
        assert!(b.push(&["1", "'a'"]).is_none());
        assert!(b.push(&["2", "NULL"]).is_none());
        assert_eq!(
            b.finish().unwrap(),
            "INSERT INTO public.t (id, name) VALUES (1, 'a'),(2, NULL)"
        );
        assert!(b.finish().is_none());
    }

    #[test]
    fn test_select_union_form_for_oracle() {
        let oracle = DatabaseType::Oracle.dialect();
        let columns = vec![
            ColumnInfo::new("ID", CanonicalType::Int32),
            ColumnInfo::new("NAME", CanonicalType::Text),
        ];
        let mut b = InsertBuilder::new(&oracle, "APP", "T", &columns);
        b.push(&["1", "'a'"]);
        b.push(&["2", "'b'"]);
        assert_eq!(
            b.finish().unwrap(),
            "INSERT INTO APP.T (ID, NAME) WITH T_to_insert (ID, NAME) AS \
(SELECT 1, 'a' FROM dual UNION ALL SELECT 2, 'b' FROM dual) SELECT * FROM T_to_insert"
        );
    }

    #[test]
    fn test_snowflake_parse_json_form() {
        let sf = DatabaseType::Snowflake.dialect();
        let columns = vec![ColumnInfo::new("c", CanonicalType::Json)];
        let mut b = InsertBuilder::new(&sf, "", "t", &columns);
        b.push(&["'{\"a\":1}'"]);
        assert_eq!(
            b.finish().unwrap(),
            "INSERT INTO t (c) SELECT PARSE_JSON(column1) FROM VALUES ('{\"a\":1}')"
        );
    }

    #[test]
    fn test_snowflake_without_json_uses_row_vector() {
        let sf = DatabaseType::Snowflake.dialect();
        let columns = vec![ColumnInfo::new("c", CanonicalType::Int64)];
        let mut b = InsertBuilder::new(&sf, "", "t", &columns);
        b.push(&["7"]);
        assert_eq!(b.finish().unwrap(), "INSERT INTO t (c) VALUES (7)");
    }

    #[test]
    fn test_mssql_flushes_every_thousand_rows() {
        let mssql = DatabaseType::Mssql.dialect();
        let columns = vec![ColumnInfo::new("n", CanonicalType::Int32)];
        let mut b = InsertBuilder::new(&mssql, "dbo", "t", &columns);
        let mut flushed = 0;
        for i in 0..2500 {
            if b.push(&[i.to_string()]).is_some() {
                flushed += 1;
            }
        }
        assert_eq!(flushed, 2);
        let tail = b.finish().unwrap();
        assert_eq!(tail.matches("),(").count(), 499);
    }

    #[test]
    fn test_char_limit_flush() {
        let oracle = DatabaseType::Oracle.dialect();
        let columns = vec![ColumnInfo::new("S", CanonicalType::Text)];
        let mut b = InsertBuilder::new(&oracle, "APP", "T", &columns);
        let big = format!("'{}'", "x".repeat(20_000));
        // A single oversized row flushes immediately
        assert!(b.push(&[big.as_str()]).is_some());
    }
}
