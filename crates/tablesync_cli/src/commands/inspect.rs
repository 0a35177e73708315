//! Inspect command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use tablesync_protocol::system;
use tablesync_store::{LocalStore, Query};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// User tables and their row counts.
    pub tables: Vec<TableStats>,
    /// Number of queued operations.
    pub pending_operations: u64,
    /// Number of recorded push errors.
    pub operation_errors: u64,
    /// Number of saved incremental pull tokens.
    pub delta_tokens: u64,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of rows.
    pub rows: u64,
}

/// Runs the inspect command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let mut tables = Vec::new();
    for name in store.tables().await? {
        if system::is_system_table(&name) {
            continue;
        }
        let rows = store.count(&Query::new(name.clone())).await?;
        tables.push(TableStats { name, rows });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        tables,
        pending_operations: store.count(&Query::new(system::OPERATIONS_TABLE)).await?,
        operation_errors: store.count(&Query::new(system::ERRORS_TABLE)).await?,
        delta_tokens: store.count(&Query::new(system::INCREMENTAL_PULL_TABLE)).await?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        println!("  {:<24} {:>8} rows", table.name, table.rows);
    }
    println!();
    println!("Sync:");
    println!("  Pending operations: {}", result.pending_operations);
    println!("  Operation errors:   {}", result.operation_errors);
    println!("  Delta tokens:       {}", result.delta_tokens);
}
