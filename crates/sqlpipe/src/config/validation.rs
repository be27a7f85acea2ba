//! Configuration validation.

use super::TransferConfig;
use crate::core::identifier::validate_identifier;
use crate::core::traits::Dialect;
use crate::drivers::DatabaseType;
use crate::error::{PipeError, Result};

/// Validate the configuration.
pub fn validate(config: &TransferConfig) -> Result<()> {
    let source = config.source_db_type()?;
    let target = config.target_db_type()?;

    if config.source_connection_string.is_empty() {
        return Err(PipeError::Config(
            "source-connection-string is required".into(),
        ));
    }
    if config.target_connection_string.is_empty() {
        return Err(PipeError::Config(
            "target-connection-string is required".into(),
        ));
    }

    // Source shape
    match (config.query.trim().is_empty(), config.source_table.is_empty()) {
        (true, true) => {
            return Err(PipeError::Config(
                "either query or source-table is required".into(),
            ))
        }
        (false, false) => {
            return Err(PipeError::Config(
                "query and source-table are mutually exclusive".into(),
            ))
        }
        _ => {}
    }
    if config.has_source_table() {
        validate_identifier(&config.source_table)?;
        if source.dialect().schema_required() && config.source_schema.is_empty() {
            return Err(PipeError::Config(format!(
                "source-schema is required for {} sources",
                source
            )));
        }
    }

    // Target table
    if config.target_table.is_empty() {
        return Err(PipeError::Config("target-table is required".into()));
    }
    validate_identifier(&config.target_table)?;
    if target.dialect().schema_required() && config.target_schema.is_empty() {
        return Err(PipeError::Config(format!(
            "target-schema is required for {} targets",
            target
        )));
    }

    // Incremental and vacuum
    if let Some(column) = &config.incremental_column {
        validate_identifier(column)?;
        if !config.has_source_table() {
            return Err(PipeError::Config(
                "incremental-column requires source-table".into(),
            ));
        }
    }
    if config.vacuum && !config.has_source_table() {
        return Err(PipeError::Config("vacuum requires source-table".into()));
    }
    if config.vacuum && config.incremental_column.is_some() {
        return Err(PipeError::Config(
            "vacuum and incremental-column are mutually exclusive".into(),
        ));
    }

    // External loader parameters
    if !config.use_insert_statements {
        match target {
            DatabaseType::Mssql => require_loader_params(config, target, false)?,
            DatabaseType::Oracle => require_loader_params(config, target, true)?,
            _ => {}
        }
    }

    // Pipe-file tokens
    let tokens = [
        ("delimiter", config.delimiter()),
        ("newline", config.newline()),
        ("null", config.null()),
    ];
    for (key, value) in tokens {
        if value.is_empty() {
            return Err(PipeError::Config(format!("{} cannot be empty", key)));
        }
        if value.contains('"') {
            return Err(PipeError::Config(format!(
                "{} cannot contain a double quote",
                key
            )));
        }
    }
    if tokens[0].1 == tokens[1].1 || tokens[0].1 == tokens[2].1 || tokens[1].1 == tokens[2].1 {
        return Err(PipeError::Config(
            "delimiter, newline and null must be distinct".into(),
        ));
    }

    if config.rows_per_pipe_file == Some(0) {
        return Err(PipeError::Config(
            "rows-per-pipe-file must be at least 1".into(),
        ));
    }
    if config.channel_capacity == Some(0) {
        return Err(PipeError::Config(
            "channel-capacity must be at least 1".into(),
        ));
    }

    Ok(())
}

fn require_loader_params(config: &TransferConfig, target: DatabaseType, port: bool) -> Result<()> {
    let required = [
        ("target-hostname", config.target_hostname.is_empty()),
        ("target-username", config.target_username.is_empty()),
        ("target-password", config.target_password.is_empty()),
        ("target-database", config.target_database.is_empty()),
        ("target-port", port && config.target_port.is_none()),
    ];
    for (key, missing) in required {
        if missing {
            return Err(PipeError::Config(format!(
                "{} is required for {} targets unless use-insert-statements is set",
                key, target
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> TransferConfig {
        TransferConfig {
            source_name: "src".to_string(),
            source_type: "postgresql".to_string(),
            source_connection_string: "postgres://u:p@localhost:5432/db".to_string(),
            target_name: "dst".to_string(),
            target_type: "mysql".to_string(),
            target_connection_string: "mysql://u:p@localhost:3306/db".to_string(),
            source_schema: "public".to_string(),
            source_table: "wide".to_string(),
            target_table: "wide".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut config = valid_config();
        config.target_type = "db2".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_query_and_table_mutually_exclusive() {
        let mut config = valid_config();
        config.query = "select 1".to_string();
        assert!(validate(&config).is_err());

        config.source_table.clear();
        assert!(validate(&config).is_ok());

        config.query.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_table() {
        let mut config = valid_config();
        config.target_table.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target-table"));
    }

    #[test]
    fn test_schema_required_for_schema_dialects() {
        let mut config = valid_config();
        config.target_type = "postgresql".to_string();
        assert!(validate(&config).is_err());
        config.target_schema = "public".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_incremental_requires_table_and_excludes_vacuum() {
        let mut config = valid_config();
        config.incremental_column = Some("updated_at".to_string());
        assert!(validate(&config).is_ok());

        config.vacuum = true;
        assert!(validate(&config).is_err());

        config.vacuum = false;
        config.source_table.clear();
        config.query = "select * from wide".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_mssql_target_needs_loader_params() {
        let mut config = valid_config();
        config.target_type = "mssql".to_string();
        config.target_schema = "dbo".to_string();
        assert!(validate(&config).is_err());

        config.use_insert_statements = true;
        assert!(validate(&config).is_ok());

        config.use_insert_statements = false;
        config.target_hostname = "localhost".to_string();
        config.target_username = "sa".to_string();
        config.target_password = "pw".to_string();
        config.target_database = "db".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_oracle_target_needs_port() {
        let mut config = valid_config();
        config.target_type = "oracle".to_string();
        config.target_schema = "APP".to_string();
        config.target_hostname = "localhost".to_string();
        config.target_username = "system".to_string();
        config.target_password = "pw".to_string();
        config.target_database = "XE".to_string();
        assert!(validate(&config).is_err());
        config.target_port = Some(1521);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_tokens_must_be_distinct_and_unquoted() {
        let mut config = valid_config();
        config.delimiter = Some("|".to_string());
        config.newline = Some("|".to_string());
        assert!(validate(&config).is_err());

        config.newline = Some("\"".to_string());
        assert!(validate(&config).is_err());

        config.newline = Some("\n".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_rows_per_pipe_file_rejected() {
        let mut config = valid_config();
        config.rows_per_pipe_file = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = valid_config();
        config.target_password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
        assert!(!debug_output.contains("u:p@localhost"));
    }
}
