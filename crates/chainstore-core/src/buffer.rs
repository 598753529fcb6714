//! Write buffer handed to block handlers.
//!
//! Handlers queue writes synchronously; nothing reaches the backend until the
//! buffer is flushed into its [`Transaction`] and that transaction executes.
//!
//! Reads made through the buffer go to the backend directly and do **not**
//! observe writes queued in the same commit.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::Transaction;
use crate::error::StoreError;
use crate::op::WriteOp;

/// Ordered, in-memory queue of pending writes bound to one transaction.
pub struct WriteBuffer<'a> {
    tx: Transaction<'a>,
    pending: Vec<WriteOp>,
}

impl<'a> WriteBuffer<'a> {
    pub fn new(tx: Transaction<'a>) -> Self {
        Self {
            tx,
            pending: Vec::new(),
        }
    }

    /// Append an operation. Never fails and performs no I/O.
    pub fn queue(&mut self, op: WriteOp) {
        self.pending.push(op);
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.queue(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Set one field of a map.
    pub fn set_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.queue(WriteOp::SetField {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
    }

    /// Set several fields of a map.
    pub fn set_fields<I, F, V>(&mut self, key: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        self.queue(WriteOp::SetFields {
            key: key.into(),
            fields: fields
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        });
    }

    /// Store a serializable struct as map fields.
    ///
    /// String values are stored as-is, every other JSON value as its JSON text.
    /// Fails only if `record` does not serialize to a JSON object.
    pub fn set_record<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        record: &T,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let value = serde_json::to_value(record)
            .map_err(|e| StoreError::validation(key.as_str(), e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(StoreError::validation(key, "record must serialize to an object"));
        };
        let fields = map.into_iter().map(|(field, v)| match v {
            serde_json::Value::String(s) => (field, s),
            other => (field, other.to_string()),
        });
        self.set_fields(key, fields);
        Ok(())
    }

    pub fn del(&mut self, key: impl Into<String>) {
        self.queue(WriteOp::Del { key: key.into() });
    }

    pub fn rpush<I, V>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.queue(WriteOp::RPush {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    pub fn hdel<I, F>(&mut self, key: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.queue(WriteOp::HDel {
            key: key.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
    }

    pub fn ltrim(&mut self, key: impl Into<String>, start: i64, stop: i64) {
        self.queue(WriteOp::LTrim {
            key: key.into(),
            start,
            stop,
        });
    }

    pub fn incr_by(&mut self, key: impl Into<String>, delta: i64) {
        self.queue(WriteOp::IncrBy {
            key: key.into(),
            delta,
        });
    }

    /// Queue an untyped command such as `("HSET", ["k", "f", "v"])`.
    /// Unknown commands are rejected at flush time.
    pub fn exec<I, S>(&mut self, command: impl Into<String>, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue(WriteOp::raw(command, args));
    }

    // ─── Pass-through reads ──────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.tx.get(key).await
    }

    pub async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.tx.hget_all(key).await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.tx.lrange(key, start, stop).await
    }

    // ─── Flush ───────────────────────────────────────────────────────────────

    /// Number of queued, not yet flushed operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Replay every queued operation, in order, into the transaction and clear
    /// the buffer.
    ///
    /// On the first rejected operation the rest are dropped and the error is
    /// returned; the surrounding commit must then be abandoned.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        for op in self.pending.drain(..) {
            self.tx.push(op)?;
        }
        Ok(())
    }

    /// Flush and give back the transaction for bookkeeping writes.
    pub fn into_transaction(mut self) -> Result<Transaction<'a>, StoreError> {
        self.flush()?;
        Ok(self.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scalar-only backend that records each executed batch.
    #[derive(Default)]
    struct Recorder {
        scalars: Mutex<BTreeMap<String, String>>,
        batches: Mutex<Vec<Vec<WriteOp>>>,
    }

    #[async_trait]
    impl Backend for Recorder {
        async fn connect(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.scalars.lock().unwrap().get(key).cloned())
        }
        async fn hget_all(&self, _key: &str) -> Result<BTreeMap<String, String>, StoreError> {
            Ok(BTreeMap::new())
        }
        async fn lrange(&self, _key: &str, _s: i64, _e: i64) -> Result<Vec<String>, StoreError> {
            Ok(vec![])
        }
        async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
            let mut scalars = self.scalars.lock().unwrap();
            for op in &ops {
                match op {
                    WriteOp::Set { key, value } => {
                        scalars.insert(key.clone(), value.clone());
                    }
                    WriteOp::Del { key } => {
                        scalars.remove(key);
                    }
                    _ => {}
                }
            }
            self.batches.lock().unwrap().push(ops);
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_preserves_queue_order() {
        let backend = Recorder::default();
        let mut buf = WriteBuffer::new(Transaction::new(&backend));
        buf.set("k", "1");
        buf.del("k");
        buf.set("k", "2");
        assert_eq!(buf.len(), 3);

        let tx = buf.into_transaction().unwrap();
        assert_eq!(tx.exec().await.unwrap(), 3);

        let batches = backend.batches.lock().unwrap();
        let names: Vec<_> = batches[0].iter().map(WriteOp::name).collect();
        assert_eq!(names, ["SET", "DEL", "SET"]);
        assert_eq!(backend.scalars.lock().unwrap().get("k").unwrap(), "2");
    }

    #[tokio::test]
    async fn reads_do_not_see_queued_writes() {
        let backend = Recorder::default();
        backend
            .scalars
            .lock()
            .unwrap()
            .insert("k".into(), "old".into());

        let mut buf = WriteBuffer::new(Transaction::new(&backend));
        buf.set("k", "new");
        assert_eq!(buf.get("k").await.unwrap().as_deref(), Some("old"));

        buf.flush().unwrap();
        assert_eq!(buf.get("k").await.unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn flush_empty_is_noop() {
        let backend = Recorder::default();
        let mut buf = WriteBuffer::new(Transaction::new(&backend));
        buf.flush().unwrap();
        buf.flush().unwrap();
        let tx = buf.into_transaction().unwrap();
        assert!(tx.is_empty());
    }

    #[test]
    fn flush_stops_at_invalid_op_and_clears() {
        let backend = Recorder::default();
        let mut buf = WriteBuffer::new(Transaction::new(&backend));
        buf.set("a", "1");
        buf.exec("NOSUCHCMD", ["a"]);
        buf.set("b", "2");

        let err = buf.flush().unwrap_err();
        assert!(err.is_validation());
        assert!(buf.is_empty());
    }

    #[test]
    fn set_record_flattens_fields() {
        #[derive(Serialize)]
        struct Transfer {
            id: &'static str,
            value: u64,
        }

        let backend = Recorder::default();
        let mut buf = WriteBuffer::new(Transaction::new(&backend));
        buf.set_record("transfer:1", &Transfer { id: "1", value: 100 })
            .unwrap();

        match &buf.pending[0] {
            WriteOp::SetFields { key, fields } => {
                assert_eq!(key, "transfer:1");
                assert!(fields.contains(&("id".to_string(), "1".to_string())));
                assert!(fields.contains(&("value".to_string(), "100".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(buf.set_record("x", &42u32).unwrap_err().is_validation());
    }
}
