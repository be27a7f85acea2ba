//! sqlpipe CLI - move a table or query result between databases.

use clap::{Args, Parser, Subcommand};
use sqlpipe::{
    run_transfer, CanonicalType, ColumnInfo, DatabaseType, Dialect, PipeError, TransferConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlpipe")]
#[command(about = "Transfer tables between PostgreSQL, MySQL, SQL Server, Oracle, Snowflake and Redshift")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a transfer
    Transfer(TransferArgs),

    /// Load and validate the configuration, then print it with secrets redacted
    Validate,

    /// Print the canonical type to DDL mapping of a database type
    Types {
        /// Database type, e.g. postgresql, mysql, mssql
        db_type: String,
    },
}

/// Flags overriding values from the configuration file.
#[derive(Args, Default)]
struct TransferArgs {
    /// Identifier used for staging directories and logs
    #[arg(long)]
    transfer_id: Option<String>,

    #[arg(long)]
    source_type: Option<String>,

    #[arg(long)]
    source_connection_string: Option<String>,

    #[arg(long)]
    source_schema: Option<String>,

    #[arg(long)]
    source_table: Option<String>,

    /// Source query, used when no source table is given
    #[arg(long)]
    query: Option<String>,

    #[arg(long)]
    target_type: Option<String>,

    #[arg(long)]
    target_connection_string: Option<String>,

    #[arg(long)]
    target_schema: Option<String>,

    #[arg(long)]
    target_table: Option<String>,

    /// Only copy rows whose value in this column exceeds the target's maximum
    #[arg(long)]
    incremental_column: Option<String>,

    /// Delete target rows whose primary key no longer exists in the source
    #[arg(long)]
    vacuum: bool,

    #[arg(long)]
    drop_target_table_if_exists: bool,

    #[arg(long)]
    create_target_schema_if_not_exists: bool,

    #[arg(long)]
    create_target_table_if_not_exists: bool,

    /// Load through INSERT statements instead of the bulk loader
    #[arg(long)]
    use_insert_statements: bool,

    /// Keep staging files after the transfer
    #[arg(long)]
    keep_files: bool,

    /// Root directory for staging files
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

impl TransferArgs {
    fn apply(self, config: &mut TransferConfig) {
        fn set(field: &mut String, value: Option<String>) {
            if let Some(value) = value {
                *field = value;
            }
        }

        if self.transfer_id.is_some() {
            config.transfer_id = self.transfer_id;
        }
        set(&mut config.source_type, self.source_type);
        set(&mut config.source_connection_string, self.source_connection_string);
        set(&mut config.source_schema, self.source_schema);
        set(&mut config.source_table, self.source_table);
        set(&mut config.query, self.query);
        set(&mut config.target_type, self.target_type);
        set(&mut config.target_connection_string, self.target_connection_string);
        set(&mut config.target_schema, self.target_schema);
        set(&mut config.target_table, self.target_table);
        if self.incremental_column.is_some() {
            config.incremental_column = self.incremental_column;
        }
        if self.staging_dir.is_some() {
            config.staging_dir = self.staging_dir;
        }

        // Boolean flags can only switch features on
        config.vacuum |= self.vacuum;
        config.drop_target_table_if_exists |= self.drop_target_table_if_exists;
        config.create_target_schema_if_not_exists |= self.create_target_schema_if_not_exists;
        config.create_target_table_if_not_exists |= self.create_target_table_if_not_exists;
        config.use_insert_statements |= self.use_insert_statements;
        config.keep_files |= self.keep_files;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), PipeError> {
    let cli = Cli::parse();

    // Type tables need neither config nor logging
    if let Commands::Types { db_type } = &cli.command {
        let db_type: DatabaseType = db_type.parse()?;
        print!("{}", type_table(db_type)?);
        return Ok(());
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Types { .. } => unreachable!(), // Handled above
        Commands::Validate => {
            let path = cli
                .config
                .ok_or_else(|| PipeError::Config("--config is required for validate".into()))?;
            let config = TransferConfig::load(&path)?;
            info!("Loaded configuration from {:?}", path);
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }

        Commands::Transfer(args) => {
            let mut config = match &cli.config {
                Some(path) => {
                    let config = TransferConfig::load(path)?;
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                None => TransferConfig::default(),
            };
            args.apply(&mut config);
            config.validate()?;

            let cancel_token = setup_signal_handler(cli.shutdown_timeout)?;
            let summary = run_transfer(config, cancel_token).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\nTransfer completed!");
                println!("  Transfer ID: {}", summary.transfer_id);
                println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
                println!("  Rows: {}", summary.rows);
                println!("  Files: {}", summary.final_files);
                if !summary.initial_load {
                    println!("  Mode: incremental");
                }
            }
        }
    }

    Ok(())
}

/// Canonical type, DDL pairs for `db_type`, one per line.
fn type_table(db_type: DatabaseType) -> Result<String, PipeError> {
    let dialect = db_type.dialect();
    let mut out = format!("{:<10} {}\n", "canonical", db_type);
    for canonical in CanonicalType::ALL {
        let ddl = dialect.canonical_to_ddl(&ColumnInfo::new("c", canonical))?;
        out.push_str(&format!("{:<10} {}\n", canonical.as_str(), ddl));
    }
    Ok(out)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the token on the first signal and exit with code 1 if the
/// transfer has not stopped `shutdown_timeout` seconds later.
fn shutdown_after(token: CancellationToken, name: &'static str, shutdown_timeout: u64) {
    eprintln!(
        "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
        name, shutdown_timeout
    );
    token.cancel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout expired");
        std::process::exit(1);
    });
}

/// Handles both SIGINT (Ctrl-C) and SIGTERM.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, PipeError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        shutdown_after(token, name, shutdown_timeout);
    });

    Ok(cancel_token)
}

/// Windows only delivers Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, PipeError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_after(token, "Ctrl-C", shutdown_timeout);
        }
    });

    Ok(cancel_token)
}
