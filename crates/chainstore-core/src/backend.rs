//! Backend contract and the atomic execution context built on it.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::op::WriteOp;

/// A key-value engine with strings, maps and lists plus all-or-nothing batches.
///
/// Implementations include `InMemoryBackend` and `SqliteBackend` in
/// `chainstore-storage`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open (or re-open) the connection.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Close the connection. Later calls other than `connect` fail with
    /// [`StoreError::Connection`].
    async fn disconnect(&self) -> Result<(), StoreError>;

    /// Read a scalar value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read every field of a map (empty if the key is missing).
    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Read the inclusive `start..=stop` slice of a list; negative indices
    /// count from the end.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Apply `ops` in order as one atomic unit.
    ///
    /// Either every operation lands or none does. A type conflict is reported
    /// as [`StoreError::Validation`], any other failure as
    /// [`StoreError::Commit`].
    async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// Atomic execution context: a client-side command queue sent to the backend
/// as a single batch by [`Transaction::exec`].
///
/// Reads go straight to the backend, so nothing queued here is visible to
/// them until the transaction has been executed.
pub struct Transaction<'a> {
    backend: &'a dyn Backend,
    ops: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            ops: Vec::new(),
        }
    }

    /// Validate `op` and append it to the batch.
    pub fn push(&mut self, op: WriteOp) -> Result<(), StoreError> {
        self.ops.push(op.resolve()?);
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), StoreError> {
        self.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> Result<(), StoreError> {
        self.push(WriteOp::Del { key: key.into() })
    }

    pub fn rpush(&mut self, key: impl Into<String>, values: Vec<String>) -> Result<(), StoreError> {
        self.push(WriteOp::RPush {
            key: key.into(),
            values,
        })
    }

    pub fn ltrim(&mut self, key: impl Into<String>, start: i64, stop: i64) -> Result<(), StoreError> {
        self.push(WriteOp::LTrim {
            key: key.into(),
            start,
            stop,
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.get(key).await
    }

    pub async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.backend.hget_all(key).await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.backend.lrange(key, start, stop).await
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Send the whole batch to the backend. Returns the number of operations applied.
    pub async fn exec(self) -> Result<usize, StoreError> {
        let n = self.ops.len();
        self.backend.exec(self.ops).await?;
        Ok(n)
    }
}
