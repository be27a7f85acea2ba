//! Stage 2a: source cursor rows to pipe files.

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::cursor::RowCursor;
use crate::core::schema::ColumnInfo;
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::error::{PipeError, Result};
use crate::pipeline::PipeFile;
use crate::transfer::TransferInfo;

/// A pipe file is also closed once its text reaches this size.
pub const MAX_PIPE_FILE_BYTES: usize = 10_000_000;

#[derive(Default)]
struct Batch {
    data: String,
    pks: String,
    rows: usize,
}

/// Drain `cursor` into pipe files, publishing each on `tx`.
///
/// Nulls become the null placeholder without reaching the source formatter.
/// Returns `(rows, files)`.
pub async fn write_pipe_files(
    mut cursor: RowCursor,
    columns: &[ColumnInfo],
    source: &dyn Dialect,
    info: &TransferInfo,
    with_pk_files: bool,
    tx: mpsc::Sender<PipeFile>,
) -> Result<(u64, u32)> {
    let format = info.pipe_format();
    let rows_per_file = info.config.rows_per_pipe_file().max(1);
    let pk_indices: Vec<usize> = if with_pk_files {
        columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key)
            .map(|(i, _)| i)
            .collect()
    } else {
        Vec::new()
    };

    let mut batch = Batch::default();
    let mut ordinal = 0u32;
    let mut total = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = info.cancel.cancelled() => return Err(PipeError::Cancelled),
            next = cursor.next() => next,
        };
        let Some(row) = next else { break };
        let row = row?;

        if row.len() != columns.len() {
            return Err(PipeError::format(
                "row",
                format!("{} values", row.len()),
                format!("expected {} columns", columns.len()),
            ));
        }

        let fields = row
            .iter()
            .zip(columns)
            .map(|(value, column)| match value {
                SqlValue::Null => Ok(None),
                value => source.pipe_value(column.canonical, value).map(Some),
            })
            .collect::<Result<Vec<Option<String>>>>()?;

        format.write_row(&mut batch.data, &fields);
        if with_pk_files {
            let keys: Vec<Option<&str>> = pk_indices.iter().map(|&i| fields[i].as_deref()).collect();
            format.write_row(&mut batch.pks, &keys);
        }
        batch.rows += 1;
        total += 1;

        if batch.rows >= rows_per_file || batch.data.len() >= MAX_PIPE_FILE_BYTES {
            publish(std::mem::take(&mut batch), ordinal, info, with_pk_files, &tx).await?;
            ordinal += 1;
        }
    }

    if batch.rows > 0 {
        publish(batch, ordinal, info, with_pk_files, &tx).await?;
        ordinal += 1;
    }

    debug!("transfer {}: wrote {} rows to {} pipe files", info.id, total, ordinal);
    Ok((total, ordinal))
}

async fn publish(
    batch: Batch,
    ordinal: u32,
    info: &TransferInfo,
    with_pk_files: bool,
    tx: &mpsc::Sender<PipeFile>,
) -> Result<()> {
    let path = info.dirs.pipe_file(ordinal);
    tokio::fs::write(&path, batch.data.as_bytes())
        .await
        .map_err(|e| PipeError::file(&path, e))?;

    let pk_path = if with_pk_files {
        let pk_path = info.dirs.pk_file(ordinal);
        tokio::fs::write(&pk_path, batch.pks.as_bytes())
            .await
            .map_err(|e| PipeError::file(&pk_path, e))?;
        Some(pk_path)
    } else {
        None
    };

    debug!("wrote pipe file {} ({} rows)", path.display(), batch.rows);
    let file = PipeFile {
        ordinal,
        path,
        pk_path,
        rows: batch.rows,
    };
    tokio::select! {
        biased;
        _ = info.cancel.cancelled() => Err(PipeError::Cancelled),
        sent = tx.send(file) => sent.map_err(|_| PipeError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::core::schema::CursorColumn;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;
    use tokio_util::sync::CancellationToken;

    fn info(root: &std::path::Path, rows_per_file: usize) -> TransferInfo {
        let config = TransferConfig {
            transfer_id: Some("writer".into()),
            source_type: "mssql".into(),
            target_type: "postgresql".into(),
            target_table: "t".into(),
            query: "select 1".into(),
            staging_dir: Some(root.to_path_buf()),
            rows_per_pipe_file: Some(rows_per_file),
            ..Default::default()
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        info.dirs.create().unwrap();
        info
    }

    #[tokio::test]
    async fn test_mssql_uuid_pipe_form_and_pk_side_file() {
        let root = tempfile::tempdir().unwrap();
        let info = info(root.path(), 10);
        let columns = vec![
            ColumnInfo::new("id", CanonicalType::Uuid).primary_key(),
            ColumnInfo::new("flag", CanonicalType::Bool),
        ];
        let bytes: Vec<u8> = (1..=16).collect();
        let cursor = RowCursor::from_rows(
            vec![
                CursorColumn::new("id", "UNIQUEIDENTIFIER"),
                CursorColumn::new("flag", "BIT"),
            ],
            vec![vec![SqlValue::bytes(bytes), SqlValue::Bool(true)]],
        );

        let (tx, mut rx) = mpsc::channel(4);
        let source = DatabaseType::Mssql.dialect();
        let (rows, files) = write_pipe_files(cursor, &columns, &source, &info, true, tx)
            .await
            .unwrap();
        assert_eq!((rows, files), (1, 1));

        let file = rx.recv().await.unwrap();
        let text = std::fs::read_to_string(&file.path).unwrap();
        assert_eq!(text, "04030201-0605-0807-090A-0B0C0D0E0F10{dlm}true{nwln}");
        let pks = std::fs::read_to_string(file.pk_path.unwrap()).unwrap();
        assert_eq!(pks, "04030201-0605-0807-090A-0B0C0D0E0F10{nwln}");
    }

    #[tokio::test]
    async fn test_rotates_on_row_count() {
        let root = tempfile::tempdir().unwrap();
        let info = info(root.path(), 2);
        let columns = vec![ColumnInfo::new("n", CanonicalType::Int64)];
        let rows = (0..5).map(|i| vec![SqlValue::I64(i)]).collect();
        let cursor = RowCursor::from_rows(vec![CursorColumn::new("n", "INT8")], rows);

        let (tx, mut rx) = mpsc::channel(8);
        let source = DatabaseType::Postgresql.dialect();
        let (rows, files) = write_pipe_files(cursor, &columns, &source, &info, false, tx)
            .await
            .unwrap();
        assert_eq!((rows, files), (5, 3));

        let mut ordinals = Vec::new();
        while let Some(file) = rx.recv().await {
            assert!(file.pk_path.is_none());
            ordinals.push((file.ordinal, file.rows));
        }
        assert_eq!(ordinals, vec![(0, 2), (1, 2), (2, 1)]);
    }

    #[tokio::test]
    async fn test_formatter_error_publishes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let info = info(root.path(), 10);
        let columns = vec![ColumnInfo::new("d", CanonicalType::Date)];
        let cursor = RowCursor::from_rows(
            vec![CursorColumn::new("d", "DATE")],
            vec![vec![SqlValue::Bool(true)]],
        );

        let (tx, mut rx) = mpsc::channel(4);
        let source = DatabaseType::Postgresql.dialect();
        let err = write_pipe_files(cursor, &columns, &source, &info, false, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::Format { .. }));
        assert!(rx.recv().await.is_none());
    }
}
