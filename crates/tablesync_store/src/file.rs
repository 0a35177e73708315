//! File-backed local store.

use crate::error::{StoreError, StoreResult};
use crate::memory::TableSet;
use crate::query::Query;
use crate::record::Record;
use crate::store::LocalStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A local store persisted as a single JSON document.
///
/// Every mutation rewrites the whole document to a sibling temporary file
/// and renames it over the original, so a crash leaves either the old or
/// the new contents on disk.
///
/// # Thread Safety
///
/// Reads share a lock; writes are serialized.
///
/// # Example
///
/// ```no_run
/// use tablesync_store::FileStore;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("local.json")).unwrap();
/// assert_eq!(store.path(), Path::new("local.json"));
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tables: RwLock<TableSet>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the file exists but is not a
    /// store document, or an I/O error.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let tables = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                TableSet::default()
            } else {
                serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))?
            }
        } else {
            TableSet::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            tables: RwLock::new(tables),
        })
    }

    /// Opens the store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be read.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the tables, persists it and publishes it.
    fn mutate<R>(&self, change: impl FnOnce(&mut TableSet) -> R) -> StoreResult<R> {
        let mut guard = self.tables.write();
        let mut next = guard.clone();
        let result = change(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(result)
    }

    fn persist(&self, tables: &TableSet) -> StoreResult<()> {
        let bytes = serde_json::to_vec(tables)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        Ok(self.tables.read().lookup(table, id))
    }

    async fn read(&self, query: &Query) -> StoreResult<Vec<Record>> {
        Ok(self.tables.read().read(query))
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.tables.read().count(query))
    }

    async fn upsert(&self, table: &str, records: &[Record]) -> StoreResult<()> {
        let keyed = TableSet::keyed(table, records)?;
        self.mutate(|tables| tables.upsert(table, keyed))
    }

    async fn delete(&self, table: &str, ids: &[String]) -> StoreResult<()> {
        self.mutate(|tables| {
            tables.delete(table, ids);
        })
    }

    async fn delete_query(&self, query: &Query) -> StoreResult<u64> {
        self.mutate(|tables| tables.delete_query(query))
    }

    async fn tables(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.read().tables())
    }
}
