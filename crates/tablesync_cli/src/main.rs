//! Tablesync CLI
//!
//! Command-line tools for looking inside a tablesync store file.
//!
//! # Commands
//!
//! - `inspect` - Display table row counts and sync bookkeeping
//! - `pending` - List queued operations in replay order
//! - `errors` - List recorded push errors

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tablesync command-line store tools.
#[derive(Parser)]
#[command(name = "tablesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display table row counts and sync bookkeeping
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations in replay order
    Pending {
        /// Only show operations on this table
        #[arg(short, long)]
        table: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List recorded push errors
    Errors {
        /// Only show errors on this table
        #[arg(short, long)]
        table: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            runtime.block_on(commands::inspect::run(&path, &format))?;
        }
        Commands::Pending { table, format } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            runtime.block_on(commands::pending::run(&path, table.as_deref(), &format))?;
        }
        Commands::Errors { table, format } => {
            let path = cli.path.ok_or("Store path required for errors")?;
            runtime.block_on(commands::errors::run(&path, table.as_deref(), &format))?;
        }
        Commands::Version => {
            println!("Tablesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
