//! In-memory storage backend.
//!
//! Holds strings, maps and lists in RAM with batch-atomic `exec`.
//! Useful for testing and short-lived indexers that don't need persistence.
//! Clones share the same data, so a clone kept by a test can inspect what a
//! `ChainStore` committed.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use chainstore_core::backend::Backend;
use chainstore_core::error::StoreError;
use chainstore_core::op::{list_range, WriteOp};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
        }
    }
}

fn wrong_type(key: &str, expected: &str, found: &Value) -> StoreError {
    StoreError::validation(
        key,
        format!("WRONGTYPE expected {expected}, key holds a {}", found.kind()),
    )
}

#[derive(Default)]
struct Inner {
    data: Mutex<HashMap<String, Value>>,
    connected: AtomicBool,
}

/// In-memory key-value backend.
///
/// All data is lost when the last clone is dropped. Starts disconnected.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn key_count(&self) -> usize {
        self.inner.data.lock().unwrap().len()
    }

    fn data(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, StoreError> {
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(StoreError::Connection("in-memory backend is not connected".into()));
        }
        self.inner
            .data
            .lock()
            .map_err(|_| StoreError::Backend("in-memory backend lock poisoned".into()))
    }
}

/// Uncommitted view of the keys touched by one batch. `None` marks a deletion.
type Staged = HashMap<String, Option<Value>>;

fn slot<'s>(staged: &'s mut Staged, base: &HashMap<String, Value>, key: &str) -> &'s mut Option<Value> {
    staged
        .entry(key.to_string())
        .or_insert_with(|| base.get(key).cloned())
}

fn apply(staged: &mut Staged, base: &HashMap<String, Value>, op: WriteOp) -> Result<(), StoreError> {
    match op.resolve()? {
        WriteOp::Set { key, value } => {
            *slot(staged, base, &key) = Some(Value::Str(value));
        }
        WriteOp::SetField { key, field, value } => {
            set_fields(slot(staged, base, &key), &key, [(field, value)])?;
        }
        WriteOp::SetFields { key, fields } => {
            set_fields(slot(staged, base, &key), &key, fields)?;
        }
        WriteOp::Del { key } => {
            *slot(staged, base, &key) = None;
        }
        WriteOp::RPush { key, values } => {
            let entry = slot(staged, base, &key);
            match entry {
                None => *entry = Some(Value::List(values)),
                Some(Value::List(list)) => list.extend(values),
                Some(other) => return Err(wrong_type(&key, "list", other)),
            }
        }
        WriteOp::HDel { key, fields } => {
            let entry = slot(staged, base, &key);
            match entry {
                None => {}
                Some(Value::Hash(map)) => {
                    for f in &fields {
                        map.remove(f);
                    }
                    if map.is_empty() {
                        *entry = None;
                    }
                }
                Some(other) => return Err(wrong_type(&key, "hash", other)),
            }
        }
        WriteOp::LTrim { key, start, stop } => {
            let entry = slot(staged, base, &key);
            match entry {
                None => {}
                Some(Value::List(list)) => {
                    let keep = list_range(list.len(), start, stop);
                    *list = list[keep].to_vec();
                    if list.is_empty() {
                        *entry = None;
                    }
                }
                Some(other) => return Err(wrong_type(&key, "list", other)),
            }
        }
        WriteOp::IncrBy { key, delta } => {
            let entry = slot(staged, base, &key);
            let current = match entry {
                None => 0,
                Some(Value::Str(s)) => s
                    .parse::<i64>()
                    .map_err(|_| StoreError::validation(key.as_str(), "value is not an integer"))?,
                Some(other) => return Err(wrong_type(&key, "string", other)),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| StoreError::validation(key.as_str(), "increment would overflow"))?;
            *entry = Some(Value::Str(next.to_string()));
        }
        WriteOp::Raw { command, args } => {
            return Err(StoreError::validation(
                args.first().cloned().unwrap_or_default(),
                format!("unresolved raw command '{command}'"),
            ));
        }
    }
    Ok(())
}

fn set_fields<I>(entry: &mut Option<Value>, key: &str, fields: I) -> Result<(), StoreError>
where
    I: IntoIterator<Item = (String, String)>,
{
    match entry {
        None => *entry = Some(Value::Hash(fields.into_iter().collect())),
        Some(Value::Hash(map)) => map.extend(fields),
        Some(other) => return Err(wrong_type(key, "hash", other)),
    }
    Ok(())
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn connect(&self) -> Result<(), StoreError> {
        self.inner.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return Err(StoreError::Connection("in-memory backend already closed".into()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.data()?.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        match self.data()?.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(other) => Err(wrong_type(key, "hash", other)),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        match self.data()?.get(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list[list_range(list.len(), start, stop)].to_vec()),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }

    async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut data = self.data()?;
        let count = ops.len();

        let mut staged = Staged::new();
        for op in ops {
            apply(&mut staged, &data, op)?;
        }

        for (key, value) in staged {
            match value {
                Some(v) => {
                    data.insert(key, v);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        debug!(ops = count, "in-memory batch applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, value: &str) -> WriteOp {
        WriteOp::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    fn rpush(key: &str, values: &[&str]) -> WriteOp {
        WriteOp::RPush {
            key: key.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    async fn connected() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.connect().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn requires_connect() {
        let backend = InMemoryBackend::new();
        assert!(backend.get("k").await.unwrap_err().is_connection());
        assert!(backend.exec(vec![set("k", "v")]).await.unwrap_err().is_connection());

        backend.connect().await.unwrap();
        backend.exec(vec![set("k", "v")]).await.unwrap();
        backend.disconnect().await.unwrap();
        assert!(backend.get("k").await.unwrap_err().is_connection());
        assert!(backend.disconnect().await.unwrap_err().is_connection());

        // Data survives a reconnect.
        backend.connect().await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn batch_applies_in_order() {
        let backend = connected().await;
        backend
            .exec(vec![set("k", "1"), WriteOp::Del { key: "k".into() }, set("k", "2")])
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn wrong_type_rolls_back_whole_batch() {
        let backend = connected().await;
        backend.exec(vec![set("s", "x")]).await.unwrap();

        let err = backend
            .exec(vec![set("a", "1"), rpush("s", &["boom"]), set("b", "2")])
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.get("b").await.unwrap(), None);
        assert_eq!(backend.key_count(), 1);
    }

    #[tokio::test]
    async fn list_ops() {
        let backend = connected().await;
        backend
            .exec(vec![
                rpush("l", &["a", "b"]),
                rpush("l", &["c", "d", "e"]),
                WriteOp::LTrim {
                    key: "l".into(),
                    start: -3,
                    stop: -1,
                },
            ])
            .await
            .unwrap();
        assert_eq!(backend.lrange("l", 0, -1).await.unwrap(), ["c", "d", "e"]);
        assert_eq!(backend.lrange("l", 1, 1).await.unwrap(), ["d"]);
        assert!(backend.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hash_ops() {
        let backend = connected().await;
        backend
            .exec(vec![
                WriteOp::SetFields {
                    key: "h".into(),
                    fields: vec![("a".into(), "1".into()), ("b".into(), "2".into())],
                },
                WriteOp::SetField {
                    key: "h".into(),
                    field: "a".into(),
                    value: "10".into(),
                },
                WriteOp::HDel {
                    key: "h".into(),
                    fields: vec!["b".into()],
                },
            ])
            .await
            .unwrap();
        let all = backend.hget_all("h").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["a"], "10");
        assert!(backend.get("h").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn incr_by() {
        let backend = connected().await;
        backend
            .exec(vec![
                WriteOp::IncrBy {
                    key: "n".into(),
                    delta: 5,
                },
                WriteOp::raw("INCR", ["n"]),
            ])
            .await
            .unwrap();
        assert_eq!(backend.get("n").await.unwrap().as_deref(), Some("6"));

        backend.exec(vec![set("t", "text")]).await.unwrap();
        let err = backend
            .exec(vec![WriteOp::IncrBy {
                key: "t".into(),
                delta: 1,
            }])
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
