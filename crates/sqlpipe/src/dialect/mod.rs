//! Canonical type model and helpers shared by every dialect.

pub mod canonical;
pub mod ddl;
pub mod format;

pub use canonical::CanonicalType;
