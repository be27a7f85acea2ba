//! Stage 2b: pipe files to final files in the target's load format.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::schema::ColumnInfo;
use crate::core::traits::{Dialect, FinalLayout};
use crate::error::{PipeError, Result};
use crate::pipeline::{FinalFile, PipeFile, PipeFormat};
use crate::transfer::TransferInfo;

/// Shape of a final file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalEncoding {
    /// Bulk loader input in the dialect's layout.
    Bulk(FinalLayout),
    /// SQL literals in pipe-file framing, read back by the INSERT builder.
    SqlLiterals,
}

impl FinalEncoding {
    pub fn for_target(target: &dyn Dialect, info: &TransferInfo) -> Self {
        if info.uses_insert_statements() {
            FinalEncoding::SqlLiterals
        } else {
            FinalEncoding::Bulk(target.final_layout())
        }
    }
}

/// Convert every pipe file received on `rx`, publishing final files on `tx`.
pub async fn convert_pipe_files(
    mut rx: mpsc::Receiver<PipeFile>,
    tx: mpsc::Sender<FinalFile>,
    columns: &[ColumnInfo],
    target: &dyn Dialect,
    info: &TransferInfo,
    schema: &str,
    table: &str,
) -> Result<u32> {
    let format = info.pipe_format();
    let encoding = FinalEncoding::for_target(target, info);
    let mut converted = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = info.cancel.cancelled() => return Err(PipeError::Cancelled),
            next = rx.recv() => next,
        };
        let Some(pipe) = next else { break };

        let text = tokio::fs::read_to_string(&pipe.path)
            .await
            .map_err(|e| PipeError::file(&pipe.path, e))?;
        let output = convert(&text, columns, target, &format, encoding)?;

        let path = info.dirs.final_file(pipe.ordinal);
        tokio::fs::write(&path, output.as_bytes())
            .await
            .map_err(|e| PipeError::file(&path, e))?;
        if let Some((sidecar, contents)) =
            target.load_sidecar(&path, &output, columns, info, schema, table)?
        {
            tokio::fs::write(&sidecar, contents)
                .await
                .map_err(|e| PipeError::file(&sidecar, e))?;
        }

        if !info.config.keep_files {
            if let Err(e) = tokio::fs::remove_file(&pipe.path).await {
                warn!("error removing {}: {}", pipe.path.display(), e);
            }
        }
        debug!("converted {} -> {}", pipe.path.display(), path.display());

        let file = FinalFile {
            ordinal: pipe.ordinal,
            path,
            pk_path: pipe.pk_path,
            rows: pipe.rows,
        };
        tokio::select! {
            biased;
            _ = info.cancel.cancelled() => return Err(PipeError::Cancelled),
            sent = tx.send(file) => sent.map_err(|_| PipeError::Cancelled)?,
        }
        converted += 1;
    }

    Ok(converted)
}

/// Re-encode one pipe file's text.
pub fn convert(
    text: &str,
    columns: &[ColumnInfo],
    target: &dyn Dialect,
    format: &PipeFormat,
    encoding: FinalEncoding,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let final_null = target.final_null(&format.null);

    for row in format.rows(text) {
        let row = row?;
        if row.len() != columns.len() {
            return Err(PipeError::format(
                "pipe file",
                format!("{} fields", row.len()),
                format!("expected {} columns", columns.len()),
            ));
        }

        match encoding {
            FinalEncoding::SqlLiterals => {
                let literals = row
                    .iter()
                    .zip(columns)
                    .map(|(field, column)| match field {
                        None => Ok("NULL".to_string()),
                        Some(value) => target.sql_value(column.canonical, value),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let literals: Vec<Option<String>> = literals.into_iter().map(Some).collect();
                format.write_row(&mut out, &literals);
            }
            FinalEncoding::Bulk(FinalLayout::Csv) => {
                for (i, (field, column)) in row.iter().zip(columns).enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match field {
                        None => out.push_str(&final_null),
                        Some(value) => {
                            let value = target.final_value(column.canonical, value)?;
                            push_csv_field(&mut out, &value, &final_null);
                        }
                    }
                }
                out.push('\n');
            }
            FinalEncoding::Bulk(FinalLayout::Delimited) => {
                for (i, (field, column)) in row.iter().zip(columns).enumerate() {
                    if i > 0 {
                        out.push_str(&format.delimiter);
                    }
                    match field {
                        None => out.push_str(&final_null),
                        Some(value) => out.push_str(&target.final_value(column.canonical, value)?),
                    }
                }
                out.push_str(&format.newline);
            }
        }
    }

    Ok(out)
}

/// RFC 4180 field. Empty values and values equal to the null token are
/// quoted so loaders can tell them from nulls.
fn push_csv_field(out: &mut String, value: &str, null_token: &str) {
    let quote = value.is_empty()
        || value == null_token
        || value.contains([',', '"', '\n', '\r']);
    if quote {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;

    fn format() -> PipeFormat {
        PipeFormat::new("{dlm}", "{nwln}", "{nll}")
    }

    #[test]
    fn test_mysql_csv_distinguishes_empty_from_null() {
        let mysql = DatabaseType::Mysql.dialect();
        let columns = vec![
            ColumnInfo::new("a", CanonicalType::Text),
            ColumnInfo::new("b", CanonicalType::Text),
            ColumnInfo::new("ok", CanonicalType::Bool),
        ];
        let f = PipeFormat::new("{dlm}", "{nwln}", "NULL");
        let out = convert(
            "{dlm}NULL{dlm}true{nwln}x, y{dlm}\"NULL\"{dlm}false{nwln}",
            &columns,
            &mysql,
            &f,
            FinalEncoding::Bulk(FinalLayout::Csv),
        )
        .unwrap();
        assert_eq!(out, "\"\",NULL,1\n\"x, y\",\"NULL\",0\n");
    }

    #[test]
    fn test_mssql_delimited_uses_transfer_tokens() {
        let mssql = DatabaseType::Mssql.dialect();
        let columns = vec![
            ColumnInfo::new("s", CanonicalType::Nvarchar),
            ColumnInfo::new("n", CanonicalType::Int32),
            ColumnInfo::new("e", CanonicalType::Nvarchar),
        ];
        let out = convert(
            "a{dlm}{nll}{dlm}{nwln}",
            &columns,
            &mssql,
            &format(),
            FinalEncoding::Bulk(FinalLayout::Delimited),
        )
        .unwrap();
        // Null is empty for bcp, the empty string becomes NUL
        assert_eq!(out, "a{dlm}{dlm}\u{0}{nwln}");
    }

    #[test]
    fn test_sql_literals_use_target_formatter() {
        let pg = DatabaseType::Postgresql.dialect();
        let columns = vec![
            ColumnInfo::new("id", CanonicalType::Int32),
            ColumnInfo::new("name", CanonicalType::Text),
        ];
        let out = convert(
            "1{dlm}O'Brien{nwln}2{dlm}{nll}{nwln}",
            &columns,
            &pg,
            &format(),
            FinalEncoding::SqlLiterals,
        )
        .unwrap();
        assert_eq!(out, "1{dlm}'O''Brien'{nwln}2{dlm}NULL{nwln}");
    }

    #[test]
    fn test_column_count_mismatch_is_error() {
        let pg = DatabaseType::Postgresql.dialect();
        let columns = vec![ColumnInfo::new("id", CanonicalType::Int32)];
        let err = convert(
            "1{dlm}2{nwln}",
            &columns,
            &pg,
            &format(),
            FinalEncoding::SqlLiterals,
        )
        .unwrap_err();
        assert!(matches!(err, PipeError::Format { .. }));
    }
}
