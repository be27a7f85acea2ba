//! Oracle driver.

mod dialect;
mod engine;

pub use dialect::OracleDialect;
pub(crate) use dialect::user_exists_sql;
pub use engine::OracleEngine;
