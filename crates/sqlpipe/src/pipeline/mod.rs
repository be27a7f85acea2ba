//! Three-stage transfer pipeline.
//!
//! ```text
//! RowCursor ──► writer ──PipeFile──► converter ──FinalFile──► loader ──► target
//! ```
//!
//! - [`writer`]: stage 2a, cursor rows to pipe files (source formatters)
//! - [`converter`]: stage 2b, pipe files to final files (target formatters)
//! - [`loader`]: stage 3, final files applied through `Engine::run_insert_cmd`
//! - [`insert`]: generic batched INSERT path used by engines without a loader
//! - [`delete_pks`]: incremental deletes of changed rows before each load
//! - [`pipe_file`]: the delimiter/newline/null codec shared by the stages
//! - [`staging`]: per-transfer directory tree
//!
//! Stages run concurrently and hand each other file metadata over bounded
//! channels, never row payloads. The first failing stage ends the pipeline;
//! the others are dropped at their next suspension point.

pub mod converter;
pub mod delete_pks;
pub mod insert;
pub mod loader;
pub mod pipe_file;
pub mod staging;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

pub use pipe_file::PipeFormat;
pub use staging::StagingDirs;

use crate::core::cursor::RowCursor;
use crate::core::schema::ColumnInfo;
use crate::core::traits::{Dialect, Engine};
use crate::drivers::DialectImpl;
use crate::error::Result;
use crate::transfer::TransferInfo;

/// A pipe file published by the writer.
#[derive(Debug, Clone)]
pub struct PipeFile {
    /// Position in the transfer, starting at 0.
    pub ordinal: u32,
    pub path: PathBuf,
    /// Primary keys of the rows in `path`, when changed rows must be deleted
    /// before the load.
    pub pk_path: Option<PathBuf>,
    pub rows: usize,
}

/// A final file published by the converter.
#[derive(Debug, Clone)]
pub struct FinalFile {
    pub ordinal: u32,
    pub path: PathBuf,
    pub pk_path: Option<PathBuf>,
    pub rows: usize,
}

/// Counters of a completed pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub rows: u64,
    pub pipe_files: u32,
    pub final_files: u32,
}

/// Everything one pipeline run reads from and writes to.
pub struct PipelineInput {
    pub cursor: RowCursor,
    pub columns: Vec<ColumnInfo>,
    pub source: DialectImpl,
    pub target: Arc<dyn Engine>,
    pub target_schema: String,
    pub target_table: String,
    /// Write primary-key side files and delete those rows on the target
    /// before each load (incremental, non-initial runs).
    pub delete_changed_rows: bool,
}

/// Run writer, converter and loader to completion.
pub async fn run_pipeline(input: PipelineInput, info: &TransferInfo) -> Result<PipelineStats> {
    let PipelineInput {
        cursor,
        columns,
        source,
        target,
        target_schema,
        target_table,
        delete_changed_rows,
    } = input;

    let capacity = info.config.channel_capacity().max(1);
    let (pipe_tx, pipe_rx) = mpsc::channel(capacity);
    let (final_tx, final_rx) = mpsc::channel(capacity);
    let target_dialect = target.dialect();

    info!(
        "transfer {}: starting pipeline {} -> {} ({} columns)",
        info.id,
        source.name(),
        target_dialect.name(),
        columns.len()
    );

    let write = async {
        writer::write_pipe_files(cursor, &columns, &source, info, delete_changed_rows, pipe_tx)
            .await
            .map_err(|e| e.in_stage("pipe-file writer", source.name()))
    };
    let convert = async {
        converter::convert_pipe_files(
            pipe_rx,
            final_tx,
            &columns,
            target_dialect,
            info,
            &target_schema,
            &target_table,
        )
        .await
        .map_err(|e| e.in_stage("final-file converter", target_dialect.name()))
    };
    let load = async {
        loader::load_final_files(
            final_rx,
            target.as_ref(),
            info,
            &target_schema,
            &target_table,
            &columns,
        )
        .await
        .map_err(|e| e.in_stage("target loader", target_dialect.name()))
    };

    let ((rows, pipe_files), final_files, loaded) = tokio::try_join!(write, convert, load)?;

    info!(
        "transfer {}: pipeline finished, {} rows in {} files ({} loaded)",
        info.id, rows, pipe_files, loaded
    );
    Ok(PipelineStats {
        rows,
        pipe_files,
        final_files,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Engine double that records statements and loads.

    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::core::cursor::RowCursor;
    use crate::core::schema::{ColumnInfo, CursorColumn};
    use crate::core::traits::{Dialect, Engine};
    use crate::core::value::Row;
    use crate::drivers::DialectImpl;
    use crate::error::{PipeError, Result};
    use crate::pipeline::insert::insert_final_file;
    use crate::transfer::TransferInfo;

    /// Canned answer for queries containing a substring.
    enum Scripted {
        Rows(Vec<CursorColumn>, Vec<Row>),
        Error(String),
    }

    pub struct RecordingEngine {
        pub dialect: DialectImpl,
        pub statements: Mutex<Vec<String>>,
        /// Contents of every final file handed to `run_insert_cmd`.
        pub loads: Mutex<Vec<String>>,
        pub fail_loads: bool,
        script: Vec<(String, Scripted)>,
    }

    impl RecordingEngine {
        pub fn new(dialect: DialectImpl) -> Self {
            Self {
                dialect,
                statements: Mutex::new(Vec::new()),
                loads: Mutex::new(Vec::new()),
                fail_loads: false,
                script: Vec::new(),
            }
        }

        /// Answer queries containing `needle` with `rows`.
        pub fn with_rows(mut self, needle: &str, columns: Vec<CursorColumn>, rows: Vec<Row>) -> Self {
            self.script
                .push((needle.to_string(), Scripted::Rows(columns, rows)));
            self
        }

        /// Fail queries containing `needle` with a driver error `message`.
        pub fn with_error(mut self, needle: &str, message: &str) -> Self {
            self.script
                .push((needle.to_string(), Scripted::Error(message.to_string())));
            self
        }

        pub fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }

        pub fn loads(&self) -> Vec<String> {
            self.loads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Engine for RecordingEngine {
        fn dialect(&self) -> &dyn Dialect {
            &self.dialect
        }

        fn display_name(&self) -> &str {
            "recording"
        }

        async fn query(&self, sql: &str) -> Result<RowCursor> {
            self.statements.lock().unwrap().push(sql.to_string());
            match self.script.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
                Some((_, Scripted::Rows(columns, rows))) => {
                    Ok(RowCursor::from_rows(columns.clone(), rows.clone()))
                }
                Some((_, Scripted::Error(message))) => {
                    Err(PipeError::query(self.dialect.name(), sql, message))
                }
                None => Ok(RowCursor::from_rows(vec![], vec![])),
            }
        }

        async fn exec(&self, sql: &str) -> Result<()> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        async fn close(&self, _print_error: bool) {}

        async fn run_insert_cmd(
            &self,
            final_file: &Path,
            info: &TransferInfo,
            schema: &str,
            table: &str,
            columns: &[ColumnInfo],
        ) -> Result<()> {
            if self.fail_loads {
                return Err(PipeError::Loader {
                    tool: "test".into(),
                    status: "exit status: 1".into(),
                    output: "rejected".into(),
                });
            }
            let contents = std::fs::read_to_string(final_file)?;
            self.loads.lock().unwrap().push(contents);
            if info.uses_insert_statements() {
                insert_final_file(self, final_file, info, schema, table, columns).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingEngine;
    use super::*;
    use crate::config::TransferConfig;
    use crate::core::schema::CursorColumn;
    use crate::core::value::SqlValue;
    use crate::dialect::CanonicalType;
    use crate::drivers::DatabaseType;
    use crate::error::PipeError;
    use tokio_util::sync::CancellationToken;

    fn info_for(target: &str, root: &std::path::Path) -> TransferInfo {
        let config = TransferConfig {
            transfer_id: Some("pipeline-test".into()),
            source_type: "postgresql".into(),
            target_type: target.into(),
            target_table: "wide".into(),
            query: "select 1".into(),
            staging_dir: Some(root.to_path_buf()),
            rows_per_pipe_file: Some(2),
            ..Default::default()
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        info.dirs.create().unwrap();
        info
    }

    fn wide_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", CanonicalType::Int32),
            ColumnInfo::new("name", CanonicalType::Text),
        ]
    }

    fn wide_cursor(n: i32) -> RowCursor {
        let rows = (1..=n)
            .map(|i| {
                let name = if i == 2 {
                    SqlValue::Null
                } else {
                    SqlValue::text(format!("n{}", i))
                };
                vec![SqlValue::I32(i), name]
            })
            .collect();
        RowCursor::from_rows(
            vec![CursorColumn::new("id", "INT4"), CursorColumn::new("name", "TEXT")],
            rows,
        )
    }

    #[tokio::test]
    async fn test_pipeline_to_bulk_target_writes_csv_final_files() {
        let root = tempfile::tempdir().unwrap();
        let info = info_for("mysql", root.path());
        let engine = Arc::new(RecordingEngine::new(DatabaseType::Mysql.dialect()));

        let stats = run_pipeline(
            PipelineInput {
                cursor: wide_cursor(3),
                columns: wide_columns(),
                source: DatabaseType::Postgresql.dialect(),
                target: engine.clone(),
                target_schema: String::new(),
                target_table: "wide".into(),
                delete_changed_rows: false,
            },
            &info,
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            PipelineStats {
                rows: 3,
                pipe_files: 2,
                final_files: 2
            }
        );
        assert_eq!(engine.loads(), vec!["1,n1\n2,NULL\n", "3,n3\n"]);
        assert!(engine.statements().is_empty());
        // Staging files are removed once loaded
        assert_eq!(std::fs::read_dir(&info.dirs.final_csv).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_insert_path_runs_statements() {
        let root = tempfile::tempdir().unwrap();
        let info = info_for("postgresql", root.path());
        let engine = Arc::new(RecordingEngine::new(DatabaseType::Postgresql.dialect()));

        run_pipeline(
            PipelineInput {
                cursor: wide_cursor(2),
                columns: wide_columns(),
                source: DatabaseType::Postgresql.dialect(),
                target: engine.clone(),
                target_schema: "public".into(),
                target_table: "wide".into(),
                delete_changed_rows: false,
            },
            &info,
        )
        .await
        .unwrap();

        assert_eq!(
            engine.statements(),
            vec!["INSERT INTO public.wide (id, name) VALUES (1, 'n1'),(2, NULL)"]
        );
    }

    #[tokio::test]
    async fn test_loader_failure_names_stage() {
        let root = tempfile::tempdir().unwrap();
        let info = info_for("mysql", root.path());
        let mut engine = RecordingEngine::new(DatabaseType::Mysql.dialect());
        engine.fail_loads = true;

        let err = run_pipeline(
            PipelineInput {
                cursor: wide_cursor(5),
                columns: wide_columns(),
                source: DatabaseType::Postgresql.dialect(),
                target: Arc::new(engine),
                target_schema: String::new(),
                target_table: "wide".into(),
                delete_changed_rows: false,
            },
            &info,
        )
        .await
        .unwrap_err();

        match err {
            PipeError::Stage { stage, source, .. } => {
                assert_eq!(stage, "target loader");
                assert!(matches!(*source, PipeError::Loader { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_returns_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let info = info_for("mysql", root.path());
        info.cancel.cancel();
        let engine = Arc::new(RecordingEngine::new(DatabaseType::Mysql.dialect()));

        let err = run_pipeline(
            PipelineInput {
                cursor: wide_cursor(3),
                columns: wide_columns(),
                source: DatabaseType::Postgresql.dialect(),
                target: engine.clone(),
                target_schema: String::new(),
                target_table: "wide".into(),
                delete_changed_rows: false,
            },
            &info,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.loads().is_empty());
    }
}
