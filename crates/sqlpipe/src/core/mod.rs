//! Core abstractions for dialect-polymorphic transfers.
//!
//! - [`schema`]: column descriptors
//! - [`value`]: driver-native scalar values
//! - [`cursor`]: forward-only row cursor fed by a driver task
//! - [`identifier`]: quoting and qualification of identifiers
//! - [`traits`]: the `Dialect` strategy and the `Engine` connection contract

pub mod cursor;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use cursor::RowCursor;
pub use schema::{ColumnInfo, CursorColumn};
pub use traits::{BatchLimit, Dialect, Engine, FinalLayout, InsertForm};
pub use value::{Row, SqlValue};
