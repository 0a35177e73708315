//! Errors command implementation.

use super::open_store;
use std::path::Path;
use tablesync_protocol::{system, TableOperationError};
use tablesync_store::{LocalStore, Query, SortDirection};

/// Runs the errors command.
pub async fn run(
    path: &Path,
    table: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let mut query = Query::new(system::ERRORS_TABLE).order_by("__createdat", SortDirection::Ascending);
    if let Some(table) = table {
        query = query.where_eq("tablename", table);
    }

    let errors = store
        .read(&query)
        .await?
        .iter()
        .map(TableOperationError::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&errors)?);
        }
        _ => {
            if errors.is_empty() {
                println!("No operation errors");
            }
            for error in &errors {
                let status = error
                    .status
                    .map_or_else(|| "---".to_string(), |s| s.to_string());
                println!(
                    "{} {:<7} {}/{}  {}",
                    status, error.kind, error.table_name, error.item_id, error.message
                );
            }
        }
    }

    Ok(())
}
