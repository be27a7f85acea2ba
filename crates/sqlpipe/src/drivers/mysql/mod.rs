//! MySQL/MariaDB driver.

mod dialect;
mod engine;

pub use dialect::MysqlDialect;
pub use engine::MysqlEngine;
