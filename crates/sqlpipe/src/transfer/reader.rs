//! Stage 1: resolve columns, incremental and vacuum modes, and open the
//! source cursor.

use tracing::{debug, info};

use crate::core::cursor::RowCursor;
use crate::core::identifier::{column_list, schema_period_table};
use crate::core::schema::{ColumnInfo, CursorColumn};
use crate::core::traits::{Dialect, Engine};
use crate::error::{PipeError, Result};
use crate::transfer::incremental::{self, Watermark};
use crate::transfer::vacuum::VacuumPlan;
use crate::transfer::TransferInfo;

/// An open source cursor and everything derived while opening it.
#[derive(Debug)]
pub struct SourcePlan {
    pub cursor: RowCursor,
    /// Columns written to pipe files.
    pub columns: Vec<ColumnInfo>,
    /// Columns of the target table (all source columns, even in vacuum mode).
    pub table_columns: Vec<ColumnInfo>,
    pub incremental: bool,
    pub initial_load: bool,
    pub vacuum: Option<VacuumPlan>,
}

/// Descriptor for a column reported by the source driver.
pub fn cursor_column_info(column: &CursorColumn, dialect: &dyn Dialect) -> Result<ColumnInfo> {
    let canonical = dialect
        .driver_type_to_canonical(&column.type_name)
        .ok_or_else(|| PipeError::type_map(dialect.name(), &column.name, &column.type_name))?;
    Ok(ColumnInfo {
        name: column.name.clone(),
        canonical,
        length: column.length,
        decimal: column.decimal,
        is_primary_key: false,
    })
}

/// Flag columns named in `keys`, ignoring case.
pub fn mark_primary_keys(columns: &mut [ColumnInfo], keys: &[String]) {
    for column in columns.iter_mut() {
        if keys.iter().any(|k| k.eq_ignore_ascii_case(&column.name)) {
            column.is_primary_key = true;
        }
    }
}

/// Open the source cursor for `info`.
pub async fn open_source(
    source: &dyn Engine,
    target: &dyn Engine,
    info: &TransferInfo,
) -> Result<SourcePlan> {
    let config = &info.config;
    let dialect = source.dialect();

    if !config.has_source_table() {
        debug!("transfer {}: running source query", info.id);
        let cursor = source.query(&config.query).await?;
        let columns = cursor
            .columns()
            .iter()
            .map(|c| cursor_column_info(c, dialect))
            .collect::<Result<Vec<_>>>()?;
        return Ok(SourcePlan {
            cursor,
            table_columns: columns.clone(),
            columns,
            incremental: false,
            initial_load: true,
            vacuum: None,
        });
    }

    let (schema, table) = (&config.source_schema, &config.source_table);
    let mut table_columns = source.table_column_infos(schema, table).await?;
    let keys = source.primary_keys(schema, table).await?;
    mark_primary_keys(&mut table_columns, &keys);
    let pk_columns: Vec<ColumnInfo> = table_columns
        .iter()
        .filter(|c| c.is_primary_key)
        .cloned()
        .collect();

    let source_table = schema_period_table(schema, table, dialect, true);
    let mut query = format!("SELECT * FROM {}", source_table);
    let mut columns = table_columns.clone();
    let mut initial_load = true;
    let mut vacuum = None;

    let incremental = config.incremental_column.is_some();
    if let Some(name) = &config.incremental_column {
        if pk_columns.is_empty() {
            return Err(PipeError::Config(format!(
                "incremental transfers need a primary key on {}",
                source_table
            )));
        }
        let column = incremental::incremental_column(&table_columns, name)?;
        if let Watermark::After(value) = incremental::probe_watermark(target, info, column).await? {
            query = incremental::incremental_query(dialect, schema, table, column, &value)?;
            initial_load = false;
        }
    }

    if config.vacuum {
        if pk_columns.is_empty() {
            return Err(PipeError::Config(format!(
                "vacuum needs a primary key on {}",
                source_table
            )));
        }
        query = format!(
            "SELECT {} FROM {}",
            column_list(pk_columns.iter().map(|c| c.name.as_str()), dialect),
            source_table
        );
        columns = pk_columns.clone();
        vacuum = Some(VacuumPlan::new(&config.target_table, pk_columns));
    }

    info!("transfer {}: reading {} columns from {}", info.id, columns.len(), source_table);
    let cursor = source.query(&query).await?;
    if cursor.columns().len() != columns.len() {
        return Err(PipeError::Config(format!(
            "{} returned {} columns but the catalog lists {}",
            source_table,
            cursor.columns().len(),
            columns.len()
        )));
    }

    Ok(SourcePlan {
        cursor,
        columns,
        table_columns,
        incremental,
        initial_load,
        vacuum,
    })
}
