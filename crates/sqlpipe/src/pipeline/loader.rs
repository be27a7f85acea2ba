//! Stage 3: apply final files to the target, one at a time and in order.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::schema::ColumnInfo;
use crate::core::traits::Engine;
use crate::error::{PipeError, Result};
use crate::pipeline::delete_pks::delete_listed_keys;
use crate::pipeline::FinalFile;
use crate::transfer::TransferInfo;

/// Load every final file received on `rx`. Returns the number loaded.
pub async fn load_final_files(
    mut rx: mpsc::Receiver<FinalFile>,
    target: &dyn Engine,
    info: &TransferInfo,
    schema: &str,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<u32> {
    let pk_columns: Vec<ColumnInfo> = columns.iter().filter(|c| c.is_primary_key).cloned().collect();
    let mut loaded = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = info.cancel.cancelled() => return Err(PipeError::Cancelled),
            next = rx.recv() => next,
        };
        let Some(file) = next else { break };

        if let Some(pk_path) = &file.pk_path {
            delete_listed_keys(target, pk_path, info, schema, table, &pk_columns).await?;
        }

        tokio::select! {
            biased;
            _ = info.cancel.cancelled() => return Err(PipeError::Cancelled),
            result = target.run_insert_cmd(&file.path, info, schema, table, columns) => result?,
        }
        info!(
            "transfer {}: loaded {} rows from {} into {}",
            info.id,
            file.rows,
            file.path.display(),
            target.display_name()
        );

        if !info.config.keep_files {
            remove_quietly(&file.path).await;
            if let Some(pk_path) = &file.pk_path {
                remove_quietly(pk_path).await;
            }
        }
        loaded += 1;
    }

    Ok(loaded)
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("error removing {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;
    use crate::pipeline::testing::RecordingEngine;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_deletes_changed_keys_before_each_load() {
        let root = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            transfer_id: Some("loader".into()),
            source_type: "postgresql".into(),
            target_type: "mysql".into(),
            target_table: "t".into(),
            staging_dir: Some(root.path().to_path_buf()),
            keep_files: true,
            ..Default::default()
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        info.dirs.create().unwrap();

        let final_path = info.dirs.final_file(0);
        let pk_path = info.dirs.pk_file(0);
        std::fs::write(&final_path, "1,a\n").unwrap();
        std::fs::write(&pk_path, "1{nwln}").unwrap();

        let (tx, rx) = mpsc::channel(1);
        tx.send(FinalFile {
            ordinal: 0,
            path: final_path.clone(),
            pk_path: Some(pk_path.clone()),
            rows: 1,
        })
        .await
        .unwrap();
        drop(tx);

        let engine = RecordingEngine::new(DatabaseType::Mysql.dialect());
        let columns = vec![
            ColumnInfo::new("id", CanonicalType::Int32).primary_key(),
            ColumnInfo::new("v", CanonicalType::Text),
        ];
        let loaded = load_final_files(rx, &engine, &info, "", "t", &columns)
            .await
            .unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(engine.statements(), vec!["DELETE FROM t WHERE (id) IN ((1))"]);
        assert_eq!(engine.loads(), vec!["1,a\n"]);
        // keep-files leaves staging in place
        assert!(final_path.exists());
        assert!(pk_path.exists());
    }
}
