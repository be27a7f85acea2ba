//! Shared CREATE TABLE body builder.

use crate::core::identifier::{column_list, escape_if_needed};
use crate::core::schema::{primary_key_names, ColumnInfo};
use crate::core::traits::Dialect;
use crate::error::{PipeError, Result};

/// `col type, col type[, primary key (a, b)]`.
///
/// Primary keys are only embedded for incremental transfers, where the
/// key drives the delete-before-load step.
pub fn column_definitions(
    columns: &[ColumnInfo],
    incremental: bool,
    dialect: &dyn Dialect,
) -> Result<String> {
    if columns.is_empty() {
        return Err(PipeError::Config(
            "cannot create a table without columns".to_string(),
        ));
    }

    let mut defs = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        defs.push(format!(
            "{} {}",
            escape_if_needed(&column.name, dialect),
            dialect.canonical_to_ddl(column)?
        ));
    }

    let pks = primary_key_names(columns);
    if incremental && !pks.is_empty() {
        defs.push(format!("primary key ({})", column_list(pks, dialect)));
    }

    Ok(defs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::CanonicalType;
    use crate::drivers::DialectImpl;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", CanonicalType::Int64).primary_key(),
            ColumnInfo::new("order", CanonicalType::Text),
        ]
    }

    #[test]
    fn test_primary_key_only_when_incremental() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        let plain = column_definitions(&columns(), false, &pg).unwrap();
        assert_eq!(plain, "id bigint, \"order\" text");
        let inc = column_definitions(&columns(), true, &pg).unwrap();
        assert!(inc.ends_with("primary key (id)"));
    }

    #[test]
    fn test_empty_columns_rejected() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        assert!(column_definitions(&[], false, &pg).is_err());
    }
}
