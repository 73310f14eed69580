//! Durable string-keyed storage the conversation store persists into.
//!
//! `LibsqlKeyValueStore` keeps values in the `app_state` table of a libSQL
//! database: remote Turso when `TURSO_DATABASE_URL` (+ token) is configured,
//! otherwise a local `history.db` file in the data directory.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libsql::{params, Builder, Database};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::services::config::{DatabaseLocation, StorageConfig};

use super::{now_ms, HistoryError};

const HISTORY_DB_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, HistoryError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), HistoryError>;

    async fn remove(&self, key: &str) -> Result<(), HistoryError>;
}

async fn retry_db_locked<T, Fut, F>(mut op: F) -> Result<T, HistoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HistoryError>>,
{
    let mut delay = Duration::from_millis(25);
    for attempt in 0..5 {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= 4 || !matches!(err, HistoryError::Locked { .. }) {
                    return Err(err);
                }
                log::debug!("History DB locked, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(400));
            }
        }
    }
    Err(HistoryError::locked("History DB retry exhausted"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbMode {
    Remote,
    Local,
}

#[derive(Clone)]
pub struct LibsqlKeyValueStore {
    inner: Arc<LibsqlInner>,
}

struct LibsqlInner {
    db: Database,
    db_mode: DbMode,
    /// Serialize writes for local file databases to reduce SQLITE_BUSY contention.
    write_gate: Option<Arc<Semaphore>>,
}

impl LibsqlKeyValueStore {
    pub async fn open(config: &StorageConfig) -> Result<Self, HistoryError> {
        match &config.database {
            DatabaseLocation::Remote { url, token } => {
                log::info!("History DB: using remote Turso/libSQL");
                let db = Builder::new_remote(url.clone(), token.clone())
                    .build()
                    .await?;
                Self::from_database(db, DbMode::Remote).await
            }
            DatabaseLocation::Local(path) => Self::open_local(path).await,
        }
    }

    pub async fn open_local(path: &Path) -> Result<Self, HistoryError> {
        let path_str = path.to_string_lossy().to_string();
        log::info!("History DB: using local file {}", path_str);
        let db = Builder::new_local(path_str).build().await?;
        Self::from_database(db, DbMode::Local).await
    }

    async fn from_database(db: Database, db_mode: DbMode) -> Result<Self, HistoryError> {
        let write_gate = match db_mode {
            DbMode::Remote => None,
            DbMode::Local => Some(Arc::new(Semaphore::new(1))),
        };
        let store = Self {
            inner: Arc::new(LibsqlInner {
                db,
                db_mode,
                write_gate,
            }),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn connect(&self) -> Result<libsql::Connection, HistoryError> {
        let conn = self.inner.db.connect()?;

        // Best-effort per-connection pragmas; remote mode may ignore them.
        if self.inner.db_mode == DbMode::Local {
            let _ = conn.busy_timeout(HISTORY_DB_BUSY_TIMEOUT);
            let _ = conn.query("PRAGMA journal_mode = WAL;", ()).await;
            let _ = conn.query("PRAGMA synchronous = NORMAL;", ()).await;
        }

        Ok(conn)
    }

    async fn write_permit(&self) -> Result<Option<OwnedSemaphorePermit>, HistoryError> {
        let Some(gate) = self.inner.write_gate.as_ref() else {
            return Ok(None);
        };
        gate.clone()
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| HistoryError::internal("History DB write gate closed"))
    }

    async fn migrate(&self) -> Result<(), HistoryError> {
        let conn = self.connect().await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS app_state (\n  key TEXT PRIMARY KEY NOT NULL,\n  value TEXT NOT NULL,\n  updated_at_ms INTEGER NOT NULL DEFAULT 0\n);",
            (),
        )
        .await?;

        Ok(())
    }

    async fn set_once(&self, key: &str, value: &str) -> Result<(), HistoryError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO app_state (key, value, updated_at_ms)\n VALUES (?1, ?2, ?3)\n ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms;",
            params![key, value, now_ms() as i64],
        )
        .await?;
        Ok(())
    }

    async fn remove_once(&self, key: &str) -> Result<(), HistoryError> {
        let conn = self.connect().await?;
        conn.execute("DELETE FROM app_state WHERE key = ?1;", params![key])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for LibsqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, HistoryError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT value FROM app_state WHERE key = ?1 LIMIT 1;",
                params![key],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let value: String = row.get(0)?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), HistoryError> {
        let _permit = self.write_permit().await?;
        retry_db_locked(|| self.set_once(key, value)).await
    }

    async fn remove(&self, key: &str) -> Result<(), HistoryError> {
        let _permit = self.write_permit().await?;
        retry_db_locked(|| self.remove_once(key)).await
    }
}

/// Process-local medium; nothing survives the process.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, HistoryError> {
        self.values
            .lock()
            .map_err(|_| HistoryError::internal("Memory store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, HistoryError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), HistoryError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), HistoryError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
