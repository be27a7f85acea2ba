//! Snowflake driver.

mod dialect;
mod engine;

pub use dialect::{SnowflakeDialect, FILE_FORMAT_NAME};
pub use engine::SnowflakeEngine;
