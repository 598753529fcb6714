//! Shared types for the commit protocols.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ─── HashAndHeight ────────────────────────────────────────────────────────────

/// A block reference: height plus hash.
///
/// Height `-1` paired with the sentinel hash means "nothing processed yet".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashAndHeight {
    pub height: i64,
    pub hash: String,
}

impl HashAndHeight {
    pub fn new(height: i64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Encode as a hot-window list entry (`"height:hash"`).
    pub fn encode(&self) -> String {
        format!("{}:{}", self.height, self.hash)
    }

    /// Decode a hot-window list entry. The hash is everything after the first `:`.
    pub fn decode(key: &str, entry: &str) -> Result<Self, StoreError> {
        let (height, hash) = entry
            .split_once(':')
            .ok_or_else(|| StoreError::validation(key, format!("malformed entry '{entry}'")))?;
        let height = height
            .parse::<i64>()
            .map_err(|e| StoreError::validation(key, format!("bad height in '{entry}': {e}")))?;
        Ok(Self::new(height, hash))
    }
}

impl fmt::Display for HashAndHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

// ─── Commit inputs ────────────────────────────────────────────────────────────

/// Input of the finalized-append protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTxInfo {
    pub prev_head: HashAndHeight,
    pub next_head: HashAndHeight,
    /// `true` if `next_head` extends the previously finalized chain.
    /// `false` for non-contiguous jumps, e.g. initial backfill.
    pub is_on_top: bool,
}

/// Input of the hot-window protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotTxInfo {
    pub base_head: HashAndHeight,
    /// The caller's reconciled chain suffix, ascending by height.
    pub new_blocks: Vec<HashAndHeight>,
    pub finalized_head: HashAndHeight,
}

impl HotTxInfo {
    /// Index range covering every block of `new_blocks`.
    pub fn block_range(&self) -> Range<usize> {
        0..self.new_blocks.len()
    }

    /// Returns `true` if `new_blocks` heights strictly increase.
    pub fn is_ascending(&self) -> bool {
        self.new_blocks.windows(2).all(|w| w[0].height < w[1].height)
    }
}

// ─── DatabaseState ────────────────────────────────────────────────────────────

/// The durable bookkeeping recovered by `connect()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseState {
    /// Finalized head height (`-1` when nothing has been committed).
    pub height: i64,
    /// Finalized head hash.
    pub hash: String,
    /// Hot window, ascending by height.
    pub top: Vec<HashAndHeight>,
}

impl DatabaseState {
    /// State of a store that has never been written to.
    pub fn empty(sentinel_hash: impl Into<String>) -> Self {
        Self {
            height: -1,
            hash: sentinel_hash.into(),
            top: Vec::new(),
        }
    }

    pub fn head(&self) -> HashAndHeight {
        HashAndHeight::new(self.height, self.hash.clone())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
