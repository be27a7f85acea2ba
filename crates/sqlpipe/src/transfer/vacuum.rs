//! Vacuum mode: delete target rows whose keys no longer exist in the source.
//!
//! The source's primary keys are loaded into a disposable table on the
//! target, then `DELETE FROM t WHERE (pks) NOT IN (SELECT pks FROM vacuum)`
//! runs on the target. Dialects without row-value comparisons get a
//! correlated `NOT EXISTS` for composite keys instead.

use rand::Rng;
use tracing::{info, warn};

use crate::core::identifier::{column_list, escape_if_needed, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{Dialect, Engine};
use crate::error::Result;
use crate::transfer::TransferInfo;

const VACUUM_PREFIX: &str = "sqlpipe_vacuum_";
const MAX_VACUUM_TABLE_LEN: usize = 64;

/// The disposable key table of one vacuum run.
#[derive(Debug, Clone)]
pub struct VacuumPlan {
    pub table: String,
    pub pk_columns: Vec<ColumnInfo>,
}

impl VacuumPlan {
    pub fn new(target_table: &str, pk_columns: Vec<ColumnInfo>) -> Self {
        Self {
            table: vacuum_table_name(target_table),
            pk_columns,
        }
    }

    /// Create the key table if needed and empty it.
    pub async fn prepare(&self, target: &dyn Engine, info: &TransferInfo) -> Result<()> {
        let schema = &info.config.target_schema;
        target
            .create_table_if_not_exists(schema, &self.table, &self.pk_columns, false)
            .await?;
        let table = schema_period_table(schema, &self.table, target.dialect(), true);
        target.exec(&format!("DELETE FROM {}", table)).await?;
        info!("transfer {}: prepared vacuum table {}", info.id, table);
        Ok(())
    }

    /// Run the anti-join delete, then drop the key table unless files are kept.
    pub async fn finish(&self, target: &dyn Engine, info: &TransferInfo) -> Result<()> {
        let config = &info.config;
        let sql = anti_join_sql(
            target.dialect(),
            &config.target_schema,
            &config.target_table,
            &self.table,
            &self.pk_columns,
        );
        target.exec(&sql).await?;
        info!(
            "transfer {}: removed rows missing from the source in {}",
            info.id, config.target_table
        );

        if !config.keep_files {
            target
                .drop_table_if_exists(&config.target_schema, &self.table)
                .await?;
        }
        Ok(())
    }

    /// Drop the key table after a failed load unless files are kept.
    /// A failed drop is logged so the load error still surfaces.
    pub async fn abandon(&self, target: &dyn Engine, info: &TransferInfo) {
        if info.config.keep_files {
            return;
        }
        if let Err(e) = target
            .drop_table_if_exists(&info.config.target_schema, &self.table)
            .await
        {
            warn!(
                "transfer {}: could not drop vacuum table {}: {}",
                info.id, self.table, e
            );
        }
    }
}

/// `sqlpipe_vacuum_<16 random letters>_<table>`, cut to 64 characters.
pub fn vacuum_table_name(target_table: &str) -> String {
    let mut rng = rand::thread_rng();
    let letters: String = (0..16)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    format!("{}{}_{}", VACUUM_PREFIX, letters, target_table)
        .chars()
        .take(MAX_VACUUM_TABLE_LEN)
        .collect()
}

/// Delete target rows whose keys are absent from the vacuum table.
pub fn anti_join_sql(
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
    vacuum_table: &str,
    pk_columns: &[ColumnInfo],
) -> String {
    let target = schema_period_table(schema, table, dialect, true);
    let vacuum = schema_period_table(schema, vacuum_table, dialect, true);

    if pk_columns.len() > 1 && !dialect.supports_row_values() {
        let matches: Vec<String> = pk_columns
            .iter()
            .map(|c| {
                let col = escape_if_needed(&c.name, dialect);
                format!("{}.{} = {}.{}", vacuum, col, target, col)
            })
            .collect();
        return format!(
            "DELETE FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {})",
            target,
            vacuum,
            matches.join(" AND ")
        );
    }

    let keys = column_list(pk_columns.iter().map(|c| c.name.as_str()), dialect);
    format!(
        "DELETE FROM {} WHERE ({}) NOT IN (SELECT {} FROM {})",
        target, keys, keys, vacuum
    )
}
