//! Durable key/value stores backing the persistent cache tier.
//! `SqliteStore` keeps entries across sessions; `InMemoryStore` is process-local.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::TranslateError;

/// Asynchronous string key/value store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, TranslateError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), TranslateError>;
    async fn remove_item(&self, key: &str) -> Result<(), TranslateError>;
    async fn get_all_keys(&self) -> Result<Vec<String>, TranslateError>;
    /// Values are returned in the order of `keys`; missing keys map to `None`.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, TranslateError>;
    async fn multi_remove(&self, keys: &[String]) -> Result<(), TranslateError>;
}

/// Process-local store. Keys enumerate in sorted order.
#[derive(Default)]
pub struct InMemoryStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, TranslateError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), TranslateError> {
        self.items.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), TranslateError> {
        self.items.lock().remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, TranslateError> {
        Ok(self.items.lock().keys().cloned().collect())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, TranslateError> {
        let items = self.items.lock();
        Ok(keys.iter().map(|k| (k.clone(), items.get(k).cloned())).collect())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), TranslateError> {
        let mut items = self.items.lock();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}

/// SQLite-backed store. Queries run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, TranslateError> {
        let conn = Connection::open(db_path)
            .map_err(|e| TranslateError::Persistence(format!("failed to open SQLite store: {e}")))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TranslateError::Persistence(format!("PRAGMA failed: {e}")))?;

        let store = Self::with_connection(conn)?;
        info!(path = %db_path.display(), "SQLite cache store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, TranslateError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TranslateError::Persistence(format!("failed to open SQLite store: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, TranslateError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| TranslateError::Persistence(format!("create table failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, TranslateError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await
        .map_err(|e| TranslateError::Persistence(format!("SQLite task failed: {e}")))?
        .map_err(|e| TranslateError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, TranslateError> {
        let key = key.to_owned();
        self.run(move |conn| {
            conn.query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), TranslateError> {
        let (key, value) = (key.to_owned(), value.to_owned());
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, now_unix()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> Result<(), TranslateError> {
        let key = key.to_owned();
        self.run(move |conn| conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key]).map(|_| ()))
            .await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, TranslateError> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, TranslateError> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let value: Option<String> =
                    stmt.query_row(params![key], |row| row.get(0)).optional()?;
                out.push((key, value));
            }
            Ok(out)
        })
        .await
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), TranslateError> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM kv_store WHERE key = ?1")?;
                for key in &keys {
                    stmt.execute(params![key])?;
                }
            }
            tx.commit()
        })
        .await
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn DurableStore) {
        assert_eq!(store.get_item("missing").await.unwrap(), None);

        store.set_item("b", "2").await.unwrap();
        store.set_item("a", "1").await.unwrap();
        store.set_item("c", "3").await.unwrap();
        store.set_item("a", "1-updated").await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().as_deref(), Some("1-updated"));
        assert_eq!(store.get_all_keys().await.unwrap(), vec!["a", "b", "c"]);

        let got = store
            .multi_get(&["c".to_string(), "zzz".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![
                ("c".to_string(), Some("3".to_string())),
                ("zzz".to_string(), None),
                ("b".to_string(), Some("2".to_string())),
            ]
        );

        store.remove_item("b").await.unwrap();
        store.remove_item("never-existed").await.unwrap();
        store.multi_remove(&["a".to_string(), "c".to_string()]).await.unwrap();
        assert!(store.get_all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_store_contract() {
        let store = InMemoryStore::new();
        exercise(&store).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise(&store).await;
    }
}
