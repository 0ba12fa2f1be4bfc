//! sqlite-queue - run SQL against a database through the serial queue.

mod app;
mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use queue_config_and_utils::{init_logging, Config, Paths};
use sqlite_serial_queue::CheckpointMode;

/// sqlite-queue command-line interface.
#[derive(Parser)]
#[command(name = "sqlite-queue")]
#[command(about = "Run SQL through a serialized single-writer SQLite queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and the default database. Defaults to ~/.sqlite-queue
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Database to open (`:memory:` for in-memory, empty for a temporary file)
    #[arg(short, long, global = true, env = "SQLITE_QUEUE_DB_PATH")]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one update statement
    Exec {
        sql: String,
        /// Positional parameter (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Run a query and print each row as JSON
    Query {
        sql: String,
        /// Positional parameter (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Execute every statement in a file inside one transaction
    Batch { file: PathBuf },
    /// Print the schema, or the columns of one table
    Schema { table: Option<String> },
    /// Checkpoint the write-ahead log
    Checkpoint {
        #[arg(long, default_value = "passive")]
        mode: CheckpointMode,
    },
    /// Print database and library information
    Info,
    /// Run the concurrent Persons walkthrough on an in-memory database
    Demo {
        /// Writer threads
        #[arg(long, default_value_t = 4)]
        threads: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    // Initialize logging
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let open = || {
        let location = app::resolve_database(cli.database.as_deref(), &config, &paths);
        app::open_queue(location, &config)
    };

    match cli.command {
        Commands::Exec { sql, params } => app::run_exec(&open()?, sql, &params)?,
        Commands::Query { sql, params } => app::run_query(&open()?, sql, &params)?,
        Commands::Batch { file } => app::run_batch(&open()?, &file)?,
        Commands::Schema { table } => app::run_schema(&open()?, table)?,
        Commands::Checkpoint { mode } => app::run_checkpoint(&open()?, mode)?,
        Commands::Info => app::run_info(&open()?)?,
        Commands::Demo { threads } => demo::run(&config, threads)?,
    }

    Ok(())
}
