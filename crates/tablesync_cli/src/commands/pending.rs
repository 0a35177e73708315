//! Pending command implementation.

use super::open_store;
use std::path::Path;
use tablesync_protocol::{system, TableOperation};
use tablesync_store::{LocalStore, Query, SortDirection};

/// Loads queued operations in replay order.
pub async fn load(
    store: &impl LocalStore,
    table: Option<&str>,
) -> Result<Vec<TableOperation>, Box<dyn std::error::Error>> {
    let query = Query::new(system::OPERATIONS_TABLE).order_by("sequence", SortDirection::Ascending);
    let mut operations = Vec::new();
    for row in store.read(&query).await? {
        let operation = TableOperation::from_record(&row)?;
        if table.map_or(true, |t| t == operation.table_name) {
            operations.push(operation);
        }
    }
    Ok(operations)
}

/// Runs the pending command.
pub async fn run(
    path: &Path,
    table: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let operations = load(&store, table).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&operations)?);
        }
        _ => {
            if operations.is_empty() {
                println!("No pending operations");
            }
            for op in &operations {
                println!(
                    "#{:<6} {:<7} {}/{}  v{}  queued {}",
                    op.sequence,
                    op.kind,
                    op.table_name,
                    op.item_id,
                    op.version,
                    op.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }

    Ok(())
}
