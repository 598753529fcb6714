//! Block-processing callbacks invoked inside a commit.

use std::ops::Range;

use async_trait::async_trait;

use crate::buffer::WriteBuffer;
use crate::error::StoreError;
use crate::types::HashAndHeight;

/// Callback of the finalized-append protocol.
///
/// Queue the application writes for the finalized batch into `store`.
#[async_trait]
pub trait FinalizedHandler: Send + Sync {
    async fn process(&self, store: &mut WriteBuffer<'_>) -> Result<(), StoreError>;
}

/// Per-block callback of the hot-window protocol.
///
/// Called once per block, in ascending order, before any bookkeeping is queued.
#[async_trait]
pub trait HotBlockHandler: Send + Sync {
    async fn process_block(
        &self,
        store: &mut WriteBuffer<'_>,
        block: &HashAndHeight,
    ) -> Result<(), StoreError>;
}

/// Batched callback of the hot-window protocol.
///
/// Called exactly once with the index range of `blocks` to process.
#[async_trait]
pub trait HotRangeHandler: Send + Sync {
    async fn process_range(
        &self,
        store: &mut WriteBuffer<'_>,
        blocks: &[HashAndHeight],
        range: Range<usize>,
    ) -> Result<(), StoreError>;
}

/// Handler that writes nothing. Useful when only bookkeeping should change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl FinalizedHandler for NoopHandler {
    async fn process(&self, _store: &mut WriteBuffer<'_>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl HotBlockHandler for NoopHandler {
    async fn process_block(
        &self,
        _store: &mut WriteBuffer<'_>,
        _block: &HashAndHeight,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl HotRangeHandler for NoopHandler {
    async fn process_range(
        &self,
        _store: &mut WriteBuffer<'_>,
        _blocks: &[HashAndHeight],
        _range: Range<usize>,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}
