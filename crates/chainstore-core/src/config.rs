//! Store configuration: bookkeeping key layout and window bound.

use serde::{Deserialize, Serialize};

/// Configuration for a [`ChainStore`](crate::ChainStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Scalar key holding the finalized height (decimal).
    pub head_height_key: String,
    /// Scalar key holding the finalized hash.
    pub head_hash_key: String,
    /// List key holding the hot window as `"height:hash"` entries.
    pub top_blocks_key: String,
    /// Optional namespace prepended (with `:`) to the three keys above.
    pub key_prefix: Option<String>,
    /// Hash reported before anything has been committed.
    pub sentinel_hash: String,
    /// Maximum number of entries kept by finalized appends. `None` = unbounded.
    pub top_window_limit: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            head_height_key: "lastProcessedBlock".into(),
            head_hash_key: "lastProcessedHash".into(),
            top_blocks_key: "topBlocks".into(),
            key_prefix: None,
            sentinel_hash: "0x".into(),
            top_window_limit: Some(1024),
        }
    }
}

impl StoreConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_top_window_limit(mut self, limit: Option<usize>) -> Self {
        self.top_window_limit = limit;
        self
    }

    pub fn height_key(&self) -> String {
        self.scoped(&self.head_height_key)
    }

    pub fn hash_key(&self) -> String {
        self.scoped(&self.head_hash_key)
    }

    pub fn top_key(&self) -> String {
        self.scoped(&self.top_blocks_key)
    }

    fn scoped(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }
}
