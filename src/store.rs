use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

/// Partition holding per-course configuration records (JSON).
pub const TENANTS: &str = "class";
/// Partition mapping content id → chat message handle.
pub const HANDLES: &str = "ts";

/// Partition holding one course's identity → display-name aliases.
pub fn alias_partition(course: &str) -> String {
    format!("alias:{course}")
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend failure: {0}")] Backend(String),
    #[error("store lock poisoned")] Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// String key-value store addressed by (partition, key).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, partition: &str, key: &str) -> StoreResult<Option<String>>;
    /// Missing keys are simply absent from the returned map.
    async fn batch_get(&self, partition: &str, keys: &[String]) -> StoreResult<HashMap<String, String>>;
    async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()>;
    /// Write only when no value exists yet. Returns the value that is stored
    /// afterwards: `value` itself if this call won, otherwise the prior one.
    async fn put_if_absent(&self, partition: &str, key: &str, value: &str) -> StoreResult<String>;
}

pub mod inmem {
    use super::*;
    use std::path::{Path, PathBuf};

    type State = HashMap<String, HashMap<String, String>>;

    /// Map-backed store. With a snapshot path every write is flushed to a
    /// JSON file and the file is reloaded on start.
    #[derive(Clone, Default)]
    pub struct InMemStore {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store persisted under `dir/state.json`.
        pub fn with_snapshot_dir(dir: impl Into<PathBuf>) -> Self {
            let mut path = dir.into();
            path.push("state.json");
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("[inmem] loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("[inmem] failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("[inmem] no snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self, state: &State) -> StoreResult<()> {
            let Some(path) = self.snapshot_path.as_deref() else { return Ok(()) };
            let bytes = serde_json::to_vec_pretty(state).map_err(|e| StoreError::Backend(e.to_string()))?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            std::fs::write(path, bytes).map_err(|e| {
                log::error!("[inmem] failed to write snapshot '{}': {e}", path.display());
                StoreError::Backend(e.to_string())
            })
        }
    }

    #[async_trait]
    impl KvStore for InMemStore {
        async fn get(&self, partition: &str, key: &str) -> StoreResult<Option<String>> {
            let s = self.state.read().map_err(|_| StoreError::Poisoned)?;
            Ok(s.get(partition).and_then(|p| p.get(key)).cloned())
        }

        async fn batch_get(&self, partition: &str, keys: &[String]) -> StoreResult<HashMap<String, String>> {
            let s = self.state.read().map_err(|_| StoreError::Poisoned)?;
            let Some(p) = s.get(partition) else { return Ok(HashMap::new()) };
            Ok(keys.iter().filter_map(|k| p.get(k).map(|v| (k.clone(), v.clone()))).collect())
        }

        async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()> {
            let mut s = self.state.write().map_err(|_| StoreError::Poisoned)?;
            s.entry(partition.to_string()).or_default().insert(key.to_string(), value.to_string());
            self.persist(&s)
        }

        async fn put_if_absent(&self, partition: &str, key: &str, value: &str) -> StoreResult<String> {
            let mut s = self.state.write().map_err(|_| StoreError::Poisoned)?;
            let p = s.entry(partition.to_string()).or_default();
            if let Some(existing) = p.get(key) {
                return Ok(existing.clone());
            }
            p.insert(key.to_string(), value.to_string());
            self.persist(&s)?;
            Ok(value.to_string())
        }
    }
}

pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgStore { pool: Pool<Postgres> }

    impl PgStore {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    fn backend(e: sqlx::Error) -> StoreError {
        log::error!("postgres store error: {e}");
        StoreError::Backend(e.to_string())
    }

    #[async_trait]
    impl KvStore for PgStore {
        async fn get(&self, partition: &str, key: &str) -> StoreResult<Option<String>> {
            sqlx::query_scalar::<_, String>("SELECT val FROM kv WHERE partition = $1 AND key = $2")
                .bind(partition)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        }

        async fn batch_get(&self, partition: &str, keys: &[String]) -> StoreResult<HashMap<String, String>> {
            if keys.is_empty() {
                return Ok(HashMap::new());
            }
            let rows = sqlx::query_as::<_, (String, String)>(
                "SELECT key, val FROM kv WHERE partition = $1 AND key = ANY($2)",
            )
            .bind(partition)
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            Ok(rows.into_iter().collect())
        }

        async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()> {
            sqlx::query(
                "INSERT INTO kv (partition, key, val) VALUES ($1, $2, $3)
                 ON CONFLICT (partition, key) DO UPDATE SET val = EXCLUDED.val",
            )
            .bind(partition)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        }

        async fn put_if_absent(&self, partition: &str, key: &str, value: &str) -> StoreResult<String> {
            let inserted = sqlx::query(
                "INSERT INTO kv (partition, key, val) VALUES ($1, $2, $3)
                 ON CONFLICT (partition, key) DO NOTHING",
            )
            .bind(partition)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
            if inserted == 1 {
                return Ok(value.to_string());
            }
            self.get(partition, key)
                .await?
                .ok_or_else(|| StoreError::Backend(format!("{partition}/{key} vanished after conflict")))
        }
    }
}
