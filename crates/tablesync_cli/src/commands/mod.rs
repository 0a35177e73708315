//! CLI command implementations.

pub mod errors;
pub mod inspect;
pub mod pending;

use std::path::Path;
use tablesync_store::FileStore;

/// Opens an existing store file.
pub(crate) fn open_store(path: &Path) -> Result<FileStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    tracing::debug!(path = %path.display(), "opening store");
    Ok(FileStore::open(path)?)
}
