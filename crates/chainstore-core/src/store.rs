//! ChainStore: atomic commit protocols and startup recovery.
//!
//! Three ways to commit, all sharing one shape: open a [`Transaction`], let the
//! caller's handler fill a [`WriteBuffer`], flush it, queue the head pointer and
//! hot-window bookkeeping into the same transaction, then execute it as a
//! single atomic batch.
//!
//! | protocol          | handler calls             | hot window            |
//! |-------------------|---------------------------|-----------------------|
//! | `transact`        | once                      | append `next_head`    |
//! | `transact_hot`    | once per new block        | replaced by new batch |
//! | `transact_hot2`   | once, with the full range | replaced by new batch |
//!
//! Every method takes `&mut self`, so commits on one store never interleave.

use tracing::{debug, info, warn};

use crate::backend::{Backend, Transaction};
use crate::buffer::WriteBuffer;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::handler::{FinalizedHandler, HotBlockHandler, HotRangeHandler};
use crate::types::{DatabaseState, FinalTxInfo, HashAndHeight, HotTxInfo};

/// Reorg-aware persistence for a single-writer indexing pipeline.
pub struct ChainStore {
    backend: Box<dyn Backend>,
    config: StoreConfig,
    connected: bool,
}

impl ChainStore {
    pub fn new(backend: Box<dyn Backend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            connected: false,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Direct access to the backend, e.g. to query application data.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Open the backend and recover the persisted head and hot window.
    ///
    /// A store that was never written to reports height `-1`, the sentinel
    /// hash and an empty window. Can be called again after [`disconnect`](Self::disconnect).
    pub async fn connect(&mut self) -> Result<DatabaseState, StoreError> {
        self.backend.connect().await?;
        let state = self.read_state().await?;
        self.connected = true;
        info!(
            height = state.height,
            hash = %state.hash,
            hot_blocks = state.top.len(),
            "chain store connected"
        );
        Ok(state)
    }

    /// Re-read the persisted state without reopening the connection.
    pub async fn state(&self) -> Result<DatabaseState, StoreError> {
        self.ensure_connected()?;
        self.read_state().await
    }

    pub async fn disconnect(&mut self) -> Result<(), StoreError> {
        self.connected = false;
        self.backend.disconnect().await?;
        debug!("chain store disconnected");
        Ok(())
    }

    /// Finalized append: commit the handler's writes and move the head to
    /// `info.next_head`, appending it to the window when it is on top.
    pub async fn transact<H>(&mut self, info: &FinalTxInfo, handler: &H) -> Result<(), StoreError>
    where
        H: FinalizedHandler + ?Sized,
    {
        self.ensure_connected()?;

        let mut store = WriteBuffer::new(Transaction::new(self.backend.as_ref()));
        handler.process(&mut store).await?;
        let mut tx = store.into_transaction()?;

        self.queue_head(&mut tx, &info.next_head)?;
        if info.is_on_top {
            let key = self.config.top_key();
            tx.rpush(key.as_str(), vec![info.next_head.encode()])?;
            match self.config.top_window_limit {
                Some(0) => tx.del(key)?,
                Some(limit) => {
                    // A limit past i64::MAX can never be reached.
                    if let Ok(limit) = i64::try_from(limit) {
                        tx.ltrim(key, -limit, -1)?;
                    }
                }
                None => {}
            }
        }

        let ops = tx.exec().await?;
        debug!(
            kind = "finalized",
            height = info.next_head.height,
            on_top = info.is_on_top,
            ops,
            "commit applied"
        );
        Ok(())
    }

    /// Hot replace: call the handler for each of `info.new_blocks` in order,
    /// move the head to `info.finalized_head` and replace the window with
    /// `info.new_blocks`.
    pub async fn transact_hot<H>(&mut self, info: &HotTxInfo, handler: &H) -> Result<(), StoreError>
    where
        H: HotBlockHandler + ?Sized,
    {
        self.ensure_connected()?;
        self.check_batch(info);

        let mut store = WriteBuffer::new(Transaction::new(self.backend.as_ref()));
        for block in &info.new_blocks {
            handler.process_block(&mut store, block).await?;
        }
        let mut tx = store.into_transaction()?;
        self.queue_hot_window(&mut tx, info)?;

        let ops = tx.exec().await?;
        debug!(
            kind = "hot",
            finalized = info.finalized_head.height,
            blocks = info.new_blocks.len(),
            ops,
            "commit applied"
        );
        Ok(())
    }

    /// Like [`transact_hot`](Self::transact_hot), but the handler is called
    /// once with the whole `0..new_blocks.len()` range.
    pub async fn transact_hot2<H>(&mut self, info: &HotTxInfo, handler: &H) -> Result<(), StoreError>
    where
        H: HotRangeHandler + ?Sized,
    {
        self.ensure_connected()?;
        self.check_batch(info);

        let mut store = WriteBuffer::new(Transaction::new(self.backend.as_ref()));
        handler
            .process_range(&mut store, &info.new_blocks, info.block_range())
            .await?;
        let mut tx = store.into_transaction()?;
        self.queue_hot_window(&mut tx, info)?;

        let ops = tx.exec().await?;
        debug!(
            kind = "hot-range",
            finalized = info.finalized_head.height,
            blocks = info.new_blocks.len(),
            ops,
            "commit applied"
        );
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::Connection(
                "store is not connected; call connect() first".into(),
            ))
        }
    }

    fn check_batch(&self, info: &HotTxInfo) {
        if !info.is_ascending() {
            warn!(
                blocks = info.new_blocks.len(),
                "hot batch heights are not strictly ascending"
            );
        }
    }

    fn queue_head(&self, tx: &mut Transaction<'_>, head: &HashAndHeight) -> Result<(), StoreError> {
        tx.set(self.config.height_key(), head.height.to_string())?;
        tx.set(self.config.hash_key(), head.hash.as_str())
    }

    fn queue_hot_window(&self, tx: &mut Transaction<'_>, info: &HotTxInfo) -> Result<(), StoreError> {
        self.queue_head(tx, &info.finalized_head)?;
        let key = self.config.top_key();
        tx.del(key.as_str())?;
        if !info.new_blocks.is_empty() {
            let entries = info.new_blocks.iter().map(HashAndHeight::encode).collect();
            tx.rpush(key, entries)?;
        }
        Ok(())
    }

    async fn read_state(&self) -> Result<DatabaseState, StoreError> {
        let height_key = self.config.height_key();
        let top_key = self.config.top_key();

        let height = match self.backend.get(&height_key).await? {
            Some(raw) => raw.parse::<i64>().map_err(|e| {
                StoreError::validation(height_key.as_str(), format!("bad height '{raw}': {e}"))
            })?,
            None => -1,
        };
        let hash = self
            .backend
            .get(&self.config.hash_key())
            .await?
            .unwrap_or_else(|| self.config.sentinel_hash.clone());
        let top = self
            .backend
            .lrange(&top_key, 0, -1)
            .await?
            .iter()
            .map(|entry| HashAndHeight::decode(&top_key, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DatabaseState { height, hash, top })
    }
}
