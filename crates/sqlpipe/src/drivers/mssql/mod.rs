//! Microsoft SQL Server driver.

mod dialect;
mod engine;

pub use dialect::MssqlDialect;
pub use engine::MssqlEngine;
