//! Utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL wire protocol connections
//! - [`process`]: external loader invocation bound to the transfer's cancellation token

pub mod process;
pub mod tls;

pub use process::run_loader;
pub use tls::{SslMode, TlsBuilder};
