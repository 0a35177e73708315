//! Record and context fixtures.
//!
//! Provides convenience functions for setting up sync contexts and
//! common test records.

use crate::service::FakeTableService;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tablesync_engine::{RemoteRequest, SyncConfig, SyncContext, SyncHandler};
use tablesync_store::{FileStore, MemoryStore, Record};
use tempfile::TempDir;

/// Base URL used by test contexts.
pub const TEST_BASE_URL: &str = "https://tables.example.test";

/// A context over the fake service and an in-memory store.
pub type MemoryContext = SyncContext<FakeTableService, MemoryStore>;

/// A context over the fake service and a file store.
pub type FileContext = SyncContext<FakeTableService, FileStore>;

/// Converts a JSON object literal into a record.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(record) => record,
        other => panic!("fixture must be a JSON object, got {other}"),
    }
}

/// A `todo` style record with an id and a text property.
pub fn todo(id: &str, text: &str) -> Record {
    record(json!({ "id": id, "text": text }))
}

/// Configuration pointing at [`TEST_BASE_URL`].
pub fn test_config() -> SyncConfig {
    SyncConfig::new(TEST_BASE_URL)
}

/// Creates a context with default configuration and an empty memory store.
pub async fn memory_context(service: FakeTableService) -> MemoryContext {
    SyncContext::new(test_config(), service, MemoryStore::new())
        .await
        .expect("Failed to create memory context")
}

/// Creates a context with a custom configuration and handler.
pub async fn memory_context_with(
    config: SyncConfig,
    service: FakeTableService,
    handler: Arc<dyn SyncHandler>,
) -> MemoryContext {
    SyncContext::with_handler(config, service, MemoryStore::new(), handler)
        .await
        .expect("Failed to create memory context")
}

/// A store file in a temporary directory, removed on drop.
pub struct TempStore {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TempStore {
    /// Creates a temporary directory for a store file.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("store.json"),
            _temp_dir: temp_dir,
        }
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the store file, creating it if needed.
    pub fn open(&self) -> FileStore {
        FileStore::open(&self.path).expect("Failed to open file store")
    }

    /// Opens a context over the store file.
    pub async fn context(&self, service: FakeTableService) -> FileContext {
        SyncContext::new(test_config(), service, self.open())
            .await
            .expect("Failed to create file context")
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Summarizes requests as `METHOD path`, without base URL or query string.
///
/// `POST https://host/tables/todo` becomes `POST todo`.
pub fn request_summary(requests: &[RemoteRequest]) -> Vec<String> {
    requests
        .iter()
        .map(|r| {
            let path = r.url.split('?').next().unwrap_or_default();
            let path = path.split_once("/tables/").map_or(path, |(_, p)| p);
            format!("{} {}", r.method, path)
        })
        .collect()
}
