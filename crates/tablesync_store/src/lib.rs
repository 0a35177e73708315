//! # Tablesync Store
//!
//! Local record store contract and implementations for tablesync.
//!
//! The sync engine never talks to a database directly. It goes through the
//! [`LocalStore`] trait, which models a set of named tables holding
//! JSON records keyed by their `id` property.
//!
//! ## Design Principles
//!
//! - Stores hold opaque records and never interpret business fields
//! - Tables are created implicitly on first write
//! - Every call is awaited to completion before the engine proceeds
//! - Stores must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - A JSON snapshot on disk, rewritten after each change
//!
//! ## Example
//!
//! ```rust
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! use tablesync_store::{LocalStore, MemoryStore, Query};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let record = json!({"id": "a", "text": "hello"});
//! store.upsert("todo", &[record.as_object().unwrap().clone()]).await.unwrap();
//!
//! let rows = store.read(&Query::new("todo")).await.unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod query;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use query::{Filter, FilterOp, OrderBy, Query, SortDirection};
pub use record::{item_id, Record, ID_FIELD};
pub use store::LocalStore;
