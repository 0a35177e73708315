//! Configuration for the sync engine.

/// Which pending operations a pull flushes before querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushScope {
    /// Push every pending operation, whatever its table.
    #[default]
    All,
    /// Push only the pulled table's operations.
    Table,
}

/// Configuration for a sync context.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root URL of the remote service. Tables live under `{base_url}/tables/`.
    pub base_url: String,
    /// Header that marks sync-originated requests.
    pub feature_header: String,
    /// Value of the feature header.
    pub feature_value: String,
    /// Maximum number of records requested per pull page.
    pub pull_page_size: u64,
    /// Pending operations a pull flushes first.
    pub pull_push_scope: PushScope,
}

impl SyncConfig {
    /// Creates a configuration for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            feature_header: "X-ZUMO-FEATURES".to_string(),
            feature_value: "OL".to_string(),
            pull_page_size: 50,
            pull_push_scope: PushScope::All,
        }
    }

    /// Sets the feature marker header name and value.
    pub fn with_feature_marker(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.feature_header = header.into();
        self.feature_value = value.into();
        self
    }

    /// Sets the pull page size. Zero is treated as one.
    pub fn with_pull_page_size(mut self, size: u64) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Sets which pending operations a pull flushes first.
    pub fn with_pull_push_scope(mut self, scope: PushScope) -> Self {
        self.pull_push_scope = scope;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
