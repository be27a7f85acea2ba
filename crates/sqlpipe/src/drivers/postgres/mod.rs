//! PostgreSQL driver.

mod dialect;
mod engine;

pub use dialect::PostgresDialect;
pub(crate) use dialect::{
    is_pg_reserved, pg_column_infos_sql, pg_date_literal, pg_db_type_to_canonical,
    pg_driver_type_to_canonical, pg_pipe_value, pg_primary_keys_sql, pg_time_literal,
    pg_timestamp_literal,
};
pub use engine::PostgresEngine;
