//! # sqlpipe
//!
//! Heterogeneous table transfers between PostgreSQL, MySQL, SQL Server,
//! Oracle, Snowflake and Redshift.
//!
//! Rows stream from a source cursor through two kinds of staging files:
//!
//! - **Pipe files** hold source rows rendered by the source dialect in a
//!   neutral delimiter/newline/null framing
//! - **Final files** hold the same rows rendered for the target's bulk
//!   loader, or as SQL literals for batched INSERT statements
//!
//! The writer, converter and loader stages run concurrently, so the
//! source read overlaps the target load. Incremental (high-watermark) and
//! vacuum (delete rows missing from the source) modes build on the same
//! pipeline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlpipe::{run_transfer, TransferConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqlpipe::Result<()> {
//!     let config = TransferConfig::load("transfer.yaml")?;
//!     let summary = run_transfer(config, CancellationToken::new()).await?;
//!     println!("Transferred {} rows", summary.rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod pipeline;
pub mod transfer;

// Re-exports for convenient access
pub use crate::config::TransferConfig;
pub use crate::core::{ColumnInfo, Dialect, Engine};
pub use crate::dialect::CanonicalType;
pub use crate::drivers::{open_engine, DatabaseType};
pub use crate::error::{PipeError, Result};
pub use crate::transfer::{run_transfer, TransferInfo, TransferSummary};
