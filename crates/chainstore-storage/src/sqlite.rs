//! SQLite storage backend for ChainStore.
//!
//! Maps the string / map / list data model onto three tables and applies each
//! `exec` batch inside a single SQL transaction, so a batch is durable as a
//! whole or not at all. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainstore_core::{ChainStore, StoreConfig};
//! use chainstore_storage::sqlite::SqliteBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = ChainStore::new(
//!     Box::new(SqliteBackend::open("./chain.db")),
//!     StoreConfig::default(),
//! );
//! let state = store.connect().await?;
//! println!("resuming after block {}", state.height);
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//! - `kv_keys`: one row per key: its kind and, for strings, the value
//! - `kv_hash`: map fields (key + field → value)
//! - `kv_list`: list items (key + position → value)

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use chainstore_core::backend::Backend;
use chainstore_core::error::StoreError;
use chainstore_core::op::{list_range, WriteOp};

const STRING: &str = "string";
const HASH: &str = "hash";
const LIST: &str = "list";

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection options for the SQLite backend.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Maximum number of connections in the pool (default: 4).
    pub max_connections: u32,
    /// How long a statement waits on a locked database, in seconds (default: 30).
    pub busy_timeout_secs: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout_secs: 30,
        }
    }
}

// ─── SqliteBackend ───────────────────────────────────────────────────────────

fn sql_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// SQLite-backed key-value store.
///
/// The pool is created by `connect()` and closed by `disconnect()`.
pub struct SqliteBackend {
    url: String,
    options: SqliteOptions,
    in_memory: bool,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteBackend {
    /// Backend for a SQLite file at `path` (created on connect if missing).
    ///
    /// The path may be a plain file path (`"./chain.db"`) or a full
    /// SQLite URL (`"sqlite:./chain.db"`).
    pub fn open(path: &str) -> Self {
        Self::with_options(path, SqliteOptions::default())
    }

    pub fn with_options(path: &str, options: SqliteOptions) -> Self {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        Self {
            url,
            options,
            in_memory: false,
            pool: Mutex::new(None),
        }
    }

    /// In-memory SQLite database on a single pooled connection.
    ///
    /// All data is lost on `disconnect()`. Ideal for tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            options: SqliteOptions {
                max_connections: 1,
                ..SqliteOptions::default()
            },
            in_memory: true,
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool
            .lock()
            .map_err(|_| StoreError::Backend("sqlite pool lock poisoned".into()))?
            .clone()
            .ok_or_else(|| StoreError::Connection("sqlite backend is not connected".into()))
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        // WAL mode for concurrent readers
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(pool)
            .await
            .map_err(sql_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_keys (
                key   TEXT PRIMARY KEY,
                kind  TEXT NOT NULL,
                value TEXT
            );",
        )
        .execute(pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_hash (
                key   TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );",
        )
        .execute(pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_list (
                key   TEXT    NOT NULL,
                pos   INTEGER NOT NULL,
                value TEXT    NOT NULL,
                PRIMARY KEY (key, pos)
            );",
        )
        .execute(pool)
        .await
        .map_err(sql_err)?;

        Ok(())
    }
}

// ─── Per-key helpers ─────────────────────────────────────────────────────────

async fn kind_of(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, StoreError> {
    let row = sqlx::query("SELECT kind FROM kv_keys WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(sql_err)?;
    Ok(row.map(|r| r.get::<String, _>("kind")))
}

/// Ensure `key` is absent or of `kind`, creating the key row when absent.
async fn claim(conn: &mut SqliteConnection, key: &str, kind: &str) -> Result<(), StoreError> {
    match kind_of(conn, key).await? {
        Some(found) if found == kind => Ok(()),
        Some(found) => Err(StoreError::validation(
            key,
            format!("WRONGTYPE expected {kind}, key holds a {found}"),
        )),
        None => {
            sqlx::query("INSERT INTO kv_keys (key, kind, value) VALUES (?, ?, NULL)")
                .bind(key)
                .bind(kind)
                .execute(&mut *conn)
                .await
                .map_err(sql_err)?;
            Ok(())
        }
    }
}

/// Returns `Ok(false)` if the key is absent, errors if it is not of `kind`.
async fn expect(conn: &mut SqliteConnection, key: &str, kind: &str) -> Result<bool, StoreError> {
    match kind_of(conn, key).await? {
        None => Ok(false),
        Some(found) if found == kind => Ok(true),
        Some(found) => Err(StoreError::validation(
            key,
            format!("WRONGTYPE expected {kind}, key holds a {found}"),
        )),
    }
}

async fn delete_key(conn: &mut SqliteConnection, key: &str) -> Result<(), StoreError> {
    for sql in [
        "DELETE FROM kv_keys WHERE key = ?",
        "DELETE FROM kv_hash WHERE key = ?",
        "DELETE FROM kv_list WHERE key = ?",
    ] {
        sqlx::query(sql)
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(sql_err)?;
    }
    Ok(())
}

async fn write_string(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query("INSERT OR REPLACE INTO kv_keys (key, kind, value) VALUES (?, ?, ?)")
        .bind(key)
        .bind(STRING)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(sql_err)?;
    Ok(())
}

async fn list_positions(conn: &mut SqliteConnection, key: &str) -> Result<Vec<i64>, StoreError> {
    let rows = sqlx::query("SELECT pos FROM kv_list WHERE key = ? ORDER BY pos")
        .bind(key)
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_err)?;
    Ok(rows.iter().map(|r| r.get::<i64, _>("pos")).collect())
}

async fn apply(conn: &mut SqliteConnection, op: WriteOp) -> Result<(), StoreError> {
    match op.resolve()? {
        WriteOp::Set { key, value } => {
            delete_key(conn, &key).await?;
            write_string(conn, &key, &value).await?;
        }
        WriteOp::SetField { key, field, value } => {
            claim(conn, &key, HASH).await?;
            upsert_field(conn, &key, &field, &value).await?;
        }
        WriteOp::SetFields { key, fields } => {
            claim(conn, &key, HASH).await?;
            for (field, value) in &fields {
                upsert_field(conn, &key, field, value).await?;
            }
        }
        WriteOp::Del { key } => delete_key(conn, &key).await?,
        WriteOp::RPush { key, values } => {
            claim(conn, &key, LIST).await?;
            let row = sqlx::query("SELECT COALESCE(MAX(pos) + 1, 0) AS next FROM kv_list WHERE key = ?")
                .bind(&key)
                .fetch_one(&mut *conn)
                .await
                .map_err(sql_err)?;
            let mut pos: i64 = row.get("next");
            for value in &values {
                sqlx::query("INSERT INTO kv_list (key, pos, value) VALUES (?, ?, ?)")
                    .bind(&key)
                    .bind(pos)
                    .bind(value)
                    .execute(&mut *conn)
                    .await
                    .map_err(sql_err)?;
                pos += 1;
            }
        }
        WriteOp::HDel { key, fields } => {
            if expect(conn, &key, HASH).await? {
                for field in &fields {
                    sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
                        .bind(&key)
                        .bind(field)
                        .execute(&mut *conn)
                        .await
                        .map_err(sql_err)?;
                }
                let row = sqlx::query("SELECT COUNT(*) AS cnt FROM kv_hash WHERE key = ?")
                    .bind(&key)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(sql_err)?;
                if row.get::<i64, _>("cnt") == 0 {
                    delete_key(conn, &key).await?;
                }
            }
        }
        WriteOp::LTrim { key, start, stop } => {
            if expect(conn, &key, LIST).await? {
                let positions = list_positions(conn, &key).await?;
                let keep = list_range(positions.len(), start, stop);
                if keep.is_empty() {
                    delete_key(conn, &key).await?;
                } else {
                    sqlx::query("DELETE FROM kv_list WHERE key = ? AND (pos < ? OR pos > ?)")
                        .bind(&key)
                        .bind(positions[keep.start])
                        .bind(positions[keep.end - 1])
                        .execute(&mut *conn)
                        .await
                        .map_err(sql_err)?;
                }
            }
        }
        WriteOp::IncrBy { key, delta } => {
            let current = if expect(conn, &key, STRING).await? {
                let row = sqlx::query("SELECT value FROM kv_keys WHERE key = ?")
                    .bind(&key)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(sql_err)?;
                row.get::<Option<String>, _>("value")
                    .unwrap_or_default()
                    .parse::<i64>()
                    .map_err(|_| StoreError::validation(key.as_str(), "value is not an integer"))?
            } else {
                0
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| StoreError::validation(key.as_str(), "increment would overflow"))?;
            write_string(conn, &key, &next.to_string()).await?;
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

async fn upsert_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
    value: &str,
) -> Result<(), StoreError> {
    sqlx::query("INSERT OR REPLACE INTO kv_hash (key, field, value) VALUES (?, ?, ?)")
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(sql_err)?;
    Ok(())
}

// ─── Backend impl ────────────────────────────────────────────────────────────

#[async_trait]
impl Backend for SqliteBackend {
    async fn connect(&self) -> Result<(), StoreError> {
        if self.pool().is_ok() {
            return Ok(());
        }

        let connect_opts = SqliteConnectOptions::from_str(&self.url)
            .map_err(|e| StoreError::Connection(format!("sqlite url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(self.options.busy_timeout_secs));

        let mut pool_opts = SqlitePoolOptions::new().max_connections(self.options.max_connections);
        if self.in_memory {
            // The database lives only as long as its single connection.
            pool_opts = pool_opts
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }
        let pool = pool_opts
            .connect_with(connect_opts)
            .await
            .map_err(|e| StoreError::Connection(format!("sqlite connect: {e}")))?;

        Self::init_schema(&pool).await?;
        info!(url = %self.url, "sqlite backend connected");

        *self
            .pool
            .lock()
            .map_err(|_| StoreError::Backend("sqlite pool lock poisoned".into()))? = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        let pool = self
            .pool
            .lock()
            .map_err(|_| StoreError::Backend("sqlite pool lock poisoned".into()))?
            .take()
            .ok_or_else(|| StoreError::Connection("sqlite backend already closed".into()))?;
        pool.close().await;
        debug!(url = %self.url, "sqlite backend closed");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT kind, value FROM kv_keys WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool()?)
            .await
            .map_err(sql_err)?;

        match row {
            None => Ok(None),
            Some(r) => {
                let kind: String = r.get("kind");
                if kind != STRING {
                    return Err(StoreError::validation(
                        key,
                        format!("WRONGTYPE expected string, key holds a {kind}"),
                    ));
                }
                Ok(r.get::<Option<String>, _>("value"))
            }
        }
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.pool()?.acquire().await.map_err(sql_err)?;
        if !expect(&mut conn, key, HASH).await? {
            return Ok(BTreeMap::new());
        }
        let rows = sqlx::query("SELECT field, value FROM kv_hash WHERE key = ?")
            .bind(key)
            .fetch_all(&mut *conn)
            .await
            .map_err(sql_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("field"), r.get::<String, _>("value")))
            .collect())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool()?.acquire().await.map_err(sql_err)?;
        if !expect(&mut conn, key, LIST).await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT value FROM kv_list WHERE key = ? ORDER BY pos")
            .bind(key)
            .fetch_all(&mut *conn)
            .await
            .map_err(sql_err)?;
        let values: Vec<String> = rows.iter().map(|r| r.get::<String, _>("value")).collect();
        Ok(values[list_range(values.len(), start, stop)].to_vec())
    }

    async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let pool = self.pool()?;
        let count = ops.len();
        let as_commit = |e: StoreError| match e {
            StoreError::Backend(msg) => StoreError::Commit(msg),
            other => other,
        };

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))?;
        for op in ops {
            // Dropping `tx` on error rolls the batch back.
            apply(&mut tx, op).await.map_err(as_commit)?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))?;

        debug!(ops = count, "sqlite batch committed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
