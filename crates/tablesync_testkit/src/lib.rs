//! # Tablesync Testkit
//!
//! Test utilities for tablesync.
//!
//! This crate provides:
//! - [`FakeTableService`], an in-process remote table service
//! - Record and context fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tablesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_an_insert() {
//!     let context = memory_context(FakeTableService::new()).await;
//!     context.insert("todo", todo("a", "buy milk")).await.unwrap();
//!     context.push().await.unwrap();
//!     assert!(context.transport().item("todo", "a").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod service;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::service::*;
}

pub use fixtures::*;
pub use generators::*;
pub use service::*;
