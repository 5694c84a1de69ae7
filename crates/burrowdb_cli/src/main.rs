//! burrowdb CLI
//!
//! Command-line tools for inspecting burrowdb environment files.
//!
//! # Commands
//!
//! - `info` - Display file parameters and the database catalog
//! - `verify` - Check the B-tree of every database
//! - `dump` - Print the entries of one database
//! - `select` - Run a UQI query

mod commands;
mod format;

use clap::{Parser, Subcommand};
use format::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// burrowdb command-line tools.
#[derive(Parser)]
#[command(name = "burrowdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the environment file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Key of an encrypted environment
    #[arg(global = true, short = 'k', long)]
    key: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display file parameters and the database catalog
    Info {
        /// Count the entries of every database
        #[arg(short, long)]
        counts: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check the B-tree of every database
    Verify {
        /// Only check this database
        #[arg(short, long)]
        db: Option<u16>,
    },

    /// Print the entries of one database
    Dump {
        /// Database name
        db: u16,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run a UQI query, e.g. `COUNT($key) FROM DATABASE 1`
    Select {
        /// Query text
        query: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let key = cli.key.as_deref();
    match cli.command {
        Commands::Info { counts, format } => {
            let path = cli.path.ok_or("environment path required for info")?;
            commands::info::run(&path, key, counts, format)?;
        }
        Commands::Verify { db } => {
            let path = cli.path.ok_or("environment path required for verify")?;
            commands::verify::run(&path, key, db)?;
        }
        Commands::Dump { db, limit, format } => {
            let path = cli.path.ok_or("environment path required for dump")?;
            commands::dump::run(&path, key, db, limit, format)?;
        }
        Commands::Select { query, format } => {
            let path = cli.path.ok_or("environment path required for select")?;
            commands::select::run(&path, key, &query, format)?;
        }
        Commands::Version => {
            println!("burrowdb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
