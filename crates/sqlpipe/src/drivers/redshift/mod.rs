//! Amazon Redshift driver.
//!
//! Redshift speaks the PostgreSQL wire protocol, so the engine is the
//! PostgreSQL engine with the Redshift dialect plugged in.

mod dialect;

pub use dialect::RedshiftDialect;

/// Redshift engine.
pub type RedshiftEngine = crate::drivers::postgres::PostgresEngine<RedshiftDialect>;
