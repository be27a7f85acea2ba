//! Transfer orchestration.
//!
//! [`run_transfer`] opens both engines, applies the target DDL policy,
//! opens the source cursor ([`reader`]), runs the [`pipeline`](crate::pipeline)
//! and finishes [`vacuum`] mode. [`incremental`] resolves high-watermark
//! loads.

pub mod incremental;
pub mod reader;
pub mod vacuum;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::core::traits::{Dialect, Engine};
use crate::drivers::{open_engine, DatabaseType};
use crate::error::Result;
use crate::pipeline::{run_pipeline, PipeFormat, PipelineInput, PipelineStats, StagingDirs};
use crate::transfer::reader::{open_source, SourcePlan};

/// The unit of work shared by every stage.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    pub id: String,
    pub config: TransferConfig,
    /// Effective pipe-file tokens.
    pub delimiter: String,
    pub newline: String,
    pub null: String,
    pub dirs: StagingDirs,
    /// Shared by all stages and loader subprocesses.
    pub cancel: CancellationToken,
    insert_statements: bool,
}

impl TransferInfo {
    /// Resolve defaults from `config`. Touches no files.
    pub fn new(config: TransferConfig, cancel: CancellationToken) -> Result<Self> {
        let target = config.target_db_type()?;
        let id = config
            .transfer_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let insert_statements =
            config.use_insert_statements || target.dialect().bulk_loader().is_none();

        Ok(Self {
            dirs: StagingDirs::new(&config.staging_root(), &id),
            delimiter: config.delimiter().to_string(),
            newline: config.newline().to_string(),
            null: config.null().to_string(),
            id,
            config,
            cancel,
            insert_statements,
        })
    }

    /// Whether final files are applied through INSERT statements rather
    /// than the target's bulk loader.
    pub fn uses_insert_statements(&self) -> bool {
        self.insert_statements
    }

    /// Codec for this transfer's pipe files.
    pub fn pipe_format(&self) -> PipeFormat {
        PipeFormat::new(&self.delimiter, &self.newline, &self.null)
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSummary {
    pub transfer_id: String,
    pub rows: u64,
    pub pipe_files: u32,
    pub final_files: u32,
    pub initial_load: bool,
    pub duration_ms: u64,
}

/// Run one transfer end to end.
pub async fn run_transfer(config: TransferConfig, cancel: CancellationToken) -> Result<TransferSummary> {
    let started = Instant::now();
    config.validate()?;
    let info = TransferInfo::new(config, cancel)?;
    let source_type = info.config.source_db_type()?;
    let target_type = info.config.target_db_type()?;
    info!(
        "transfer {}: {} -> {}",
        info.id, source_type, target_type
    );

    let source = open_engine(
        source_type,
        &display_name(&info.config.source_name, source_type),
        &info.config.source_connection_string,
    )
    .await?;
    let target = match open_engine(
        target_type,
        &display_name(&info.config.target_name, target_type),
        &info.config.target_connection_string,
    )
    .await
    {
        Ok(target) => target,
        Err(e) => {
            source.close(true).await;
            return Err(e);
        }
    };

    let result = execute(&info, source.as_ref(), target.clone()).await;
    source.close(true).await;
    target.close(true).await;

    let (stats, initial_load) = result?;
    let summary = TransferSummary {
        transfer_id: info.id.clone(),
        rows: stats.rows,
        pipe_files: stats.pipe_files,
        final_files: stats.final_files,
        initial_load,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        "transfer {}: finished, {} rows in {} ms",
        summary.transfer_id, summary.rows, summary.duration_ms
    );
    Ok(summary)
}

/// Everything between opening the engines and closing them.
pub async fn execute(
    info: &TransferInfo,
    source: &dyn Engine,
    target: Arc<dyn Engine>,
) -> Result<(PipelineStats, bool)> {
    let config = &info.config;
    let (schema, table) = (config.target_schema.as_str(), config.target_table.as_str());

    if config.create_target_schema_if_not_exists && target.dialect().schema_required() {
        target
            .create_schema_if_not_exists(schema)
            .await
            .map_err(|e| e.in_stage("target schema", target.dialect().name()))?;
    }
    if config.drop_target_table_if_exists {
        target
            .drop_table_if_exists(schema, table)
            .await
            .map_err(|e| e.in_stage("target schema", target.dialect().name()))?;
    }

    let SourcePlan {
        cursor,
        columns,
        table_columns,
        incremental,
        initial_load,
        vacuum,
    } = open_source(source, target.as_ref(), info)
        .await
        .map_err(|e| e.in_stage("source reader", source.dialect().name()))?;

    if config.create_target_table_if_not_exists {
        target
            .create_table_if_not_exists(schema, table, &table_columns, incremental)
            .await
            .map_err(|e| e.in_stage("target schema", target.dialect().name()))?;
    }
    if let Some(vacuum) = &vacuum {
        vacuum
            .prepare(target.as_ref(), info)
            .await
            .map_err(|e| e.in_stage("vacuum", target.dialect().name()))?;
    }
    let load_table = vacuum.as_ref().map_or(table, |v| v.table.as_str());

    info.dirs.create()?;
    let result = load(
        info,
        PipelineInput {
            cursor,
            columns,
            source: source_dialect(info)?,
            target: target.clone(),
            target_schema: schema.to_string(),
            target_table: load_table.to_string(),
            delete_changed_rows: incremental && !initial_load,
        },
    )
    .await;
    info.dirs.cleanup(config.keep_files);
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            if let Some(vacuum) = &vacuum {
                vacuum.abandon(target.as_ref(), info).await;
            }
            return Err(e);
        }
    };

    if let Some(vacuum) = &vacuum {
        vacuum
            .finish(target.as_ref(), info)
            .await
            .map_err(|e| e.in_stage("vacuum", target.dialect().name()))?;
    }
    Ok((stats, initial_load))
}

/// Bracket the pipeline with the target's per-transfer load state.
async fn load(info: &TransferInfo, input: PipelineInput) -> Result<PipelineStats> {
    let target = input.target.clone();
    let schema = input.target_schema.clone();

    target
        .begin_load(info, &schema)
        .await
        .map_err(|e| e.in_stage("target loader", target.dialect().name()))?;
    let stats = run_pipeline(input, info).await;
    let ended = target.end_load(info, &schema).await;

    let stats = stats?;
    if let Err(e) = ended {
        warn!("transfer {}: error ending load: {}", info.id, e);
        return Err(e.in_stage("target loader", target.dialect().name()));
    }
    Ok(stats)
}

fn source_dialect(info: &TransferInfo) -> Result<crate::drivers::DialectImpl> {
    Ok(info.config.source_db_type()?.dialect())
}

fn display_name(name: &str, db_type: DatabaseType) -> String {
    if name.is_empty() {
        db_type.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::CursorColumn;
    use crate::core::value::SqlValue;
    use crate::pipeline::testing::RecordingEngine;

    fn config(target: &str) -> TransferConfig {
        TransferConfig {
            source_type: "postgresql".into(),
            target_type: target.into(),
            query: "select id, name from src".into(),
            target_schema: "public".into(),
            target_table: "wide".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_transfer_info_defaults() {
        let info = TransferInfo::new(config("mysql"), CancellationToken::new()).unwrap();
        assert_eq!(info.id.len(), 36);
        assert_eq!(info.delimiter, "{dlm}");
        assert_eq!(info.newline, "{nwln}");
        assert_eq!(info.null, "NULL");
        assert!(!info.uses_insert_statements());
        assert!(info.dirs.tmp.ends_with(&info.id));
    }

    #[test]
    fn test_insert_statements_without_bulk_loader() {
        let pg = TransferInfo::new(config("postgresql"), CancellationToken::new()).unwrap();
        assert!(pg.uses_insert_statements());

        let forced = TransferConfig {
            use_insert_statements: true,
            transfer_id: Some("fixed".into()),
            ..config("mssql")
        };
        let info = TransferInfo::new(forced, CancellationToken::new()).unwrap();
        assert!(info.uses_insert_statements());
        assert_eq!(info.id, "fixed");
    }

    #[test]
    fn test_unknown_target_type_fails() {
        assert!(TransferInfo::new(config("db2"), CancellationToken::new()).is_err());
    }

    #[tokio::test]
    async fn test_execute_wide_copy_to_postgres() {
        let root = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            transfer_id: Some("exec".into()),
            staging_dir: Some(root.path().to_path_buf()),
            drop_target_table_if_exists: true,
            create_target_table_if_not_exists: true,
            ..config("postgresql")
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();

        let source = RecordingEngine::new(DatabaseType::Postgresql.dialect()).with_rows(
            "select id, name",
            vec![CursorColumn::new("id", "INT4"), CursorColumn::new("name", "TEXT")],
            vec![vec![SqlValue::I32(1), SqlValue::text("a")]],
        );
        let target = Arc::new(RecordingEngine::new(DatabaseType::Postgresql.dialect()));

        let (stats, initial_load) = execute(&info, &source, target.clone()).await.unwrap();
        assert_eq!(stats.rows, 1);
        assert!(initial_load);

        let statements = target.statements();
        assert_eq!(statements[0], "drop table if exists public.wide");
        assert!(statements[1].starts_with("create table if not exists public.wide"));
        assert_eq!(
            statements[2],
            "INSERT INTO public.wide (id, name) VALUES (1, 'a')"
        );
        // Staging tree removed
        assert!(!info.dirs.tmp.exists());
    }

    #[tokio::test]
    async fn test_source_failure_creates_no_staging() {
        let root = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            staging_dir: Some(root.path().to_path_buf()),
            ..config("postgresql")
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        let source = RecordingEngine::new(DatabaseType::Postgresql.dialect())
            .with_error("select", "relation \"src\" does not exist");
        let target = Arc::new(RecordingEngine::new(DatabaseType::Postgresql.dialect()));

        let err = execute(&info, &source, target).await.unwrap_err();
        assert!(err.format_detailed().contains("source reader failed"));
        assert!(!info.dirs.tmp.exists());
    }

    fn vacuum_config(staging: &std::path::Path) -> TransferConfig {
        TransferConfig {
            staging_dir: Some(staging.to_path_buf()),
            source_schema: "public".into(),
            source_table: "src".into(),
            query: String::new(),
            vacuum: true,
            ..config("postgresql")
        }
    }

    /// A source with one primary key column `id` holding the key 7.
    fn vacuum_source() -> RecordingEngine {
        RecordingEngine::new(DatabaseType::Postgresql.dialect())
            .with_rows(
                "information_schema.columns",
                ["n", "t", "p", "s", "l", "k"]
                    .iter()
                    .map(|c| CursorColumn::new(*c, "TEXT"))
                    .collect(),
                vec![vec![
                    SqlValue::text("id"),
                    SqlValue::text("bigint"),
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::Bool(true),
                ]],
            )
            .with_rows(
                "SELECT id FROM",
                vec![CursorColumn::new("id", "INT8")],
                vec![vec![SqlValue::I64(7)]],
            )
    }

    #[tokio::test]
    async fn test_vacuum_runs_anti_join_on_target() {
        let root = tempfile::tempdir().unwrap();
        let info = TransferInfo::new(vacuum_config(root.path()), CancellationToken::new()).unwrap();
        let source = vacuum_source();
        let target = Arc::new(RecordingEngine::new(DatabaseType::Postgresql.dialect()));

        execute(&info, &source, target.clone()).await.unwrap();

        let statements = target.statements();
        let vacuum_table = statements[0]
            .trim_start_matches("create table if not exists public.")
            .split(' ')
            .next()
            .unwrap()
            .to_string();
        assert!(vacuum_table.starts_with("sqlpipe_vacuum_"));
        assert_eq!(statements[1], format!("DELETE FROM public.{}", vacuum_table));
        assert_eq!(
            statements[2],
            format!("INSERT INTO public.{} (id) VALUES (7)", vacuum_table)
        );
        assert_eq!(
            statements[3],
            format!(
                "DELETE FROM public.wide WHERE (id) NOT IN (SELECT id FROM public.{})",
                vacuum_table
            )
        );
        assert_eq!(
            statements[4],
            format!("drop table if exists public.{}", vacuum_table)
        );
    }

    #[tokio::test]
    async fn test_failed_load_drops_vacuum_table() {
        let root = tempfile::tempdir().unwrap();
        let info = TransferInfo::new(vacuum_config(root.path()), CancellationToken::new()).unwrap();
        let source = vacuum_source();
        let mut target = RecordingEngine::new(DatabaseType::Postgresql.dialect());
        target.fail_loads = true;
        let target = Arc::new(target);

        assert!(execute(&info, &source, target.clone()).await.is_err());

        let statements = target.statements();
        let created = statements
            .iter()
            .find(|s| s.starts_with("create table if not exists public.sqlpipe_vacuum_"))
            .unwrap();
        let vacuum_table = created
            .trim_start_matches("create table if not exists public.")
            .split(' ')
            .next()
            .unwrap();
        assert_eq!(
            statements.last().unwrap(),
            &format!("drop table if exists public.{}", vacuum_table)
        );
        assert!(!statements.iter().any(|s| s.contains("NOT IN")));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_vacuum_table_with_keep_files() {
        let root = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            keep_files: true,
            ..vacuum_config(root.path())
        };
        let info = TransferInfo::new(config, CancellationToken::new()).unwrap();
        let mut target = RecordingEngine::new(DatabaseType::Postgresql.dialect());
        target.fail_loads = true;
        let target = Arc::new(target);

        assert!(execute(&info, &vacuum_source(), target.clone()).await.is_err());
        assert!(!target
            .statements()
            .iter()
            .any(|s| s.starts_with("drop table")));
    }
}
