//!
//! src/storage.rs
//!
//! Scoped key-value storage for serialized snapshots. The sqlite store is
//! the default; the disk store keeps one zstd-compressed file per key and
//! the memory store backs tests.
//!

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use tokio::sync::Mutex;

use crate::config::{PersistenceConfig, StorageBackend};
use crate::errors::DeckError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DeckError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), DeckError>;
    async fn delete(&self, key: &str) -> Result<(), DeckError>;
}

/// Opens whichever backend the config names
pub async fn open_store(cfg: &PersistenceConfig) -> Result<Arc<dyn KeyValueStore>, DeckError> {
    let store: Arc<dyn KeyValueStore> = match cfg.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::init(&cfg.db_url).await?),
        StorageBackend::Disk   => Arc::new(DiskStore::new(&cfg.disk_root, cfg.compression_level)),
        StorageBackend::Memory => Arc::new(MemoryStore::default()),
    };
    Ok(store)
}

pub struct SqliteStore {
    pool: Pool<Sqlite>
}

impl SqliteStore {
    pub async fn init(database_url: &str) -> Result<Self, DeckError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| DeckError::Storage(
                format!("connecting to sqlite at {database_url}: {e}")
            ))?;

        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL;").execute(&pool).await?;

        Self::ensure_schema(&pool).await?;
        Ok( Self { pool } )
    }

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), DeckError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS kv (
              key         TEXT PRIMARY KEY,
              value       TEXT NOT NULL,
              updated_at  INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;
        Ok(())
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeckError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeckError> {
        sqlx::query(
            r"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;
            "
        )
        .bind(key)
        .bind(value)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DeckError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1;")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct DiskStore {
    root: PathBuf,
    level: i32
}

impl DiskStore {
    pub fn new(root: impl AsRef<Path>, level: i32) -> Self {
        Self { root: root.as_ref().to_path_buf(), level: level.clamp(0, 21) }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json.zst", Self::sanitize_key(key)))
    }

    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl KeyValueStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeckError> {
        let path = self.path(key);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DeckError::Storage(format!("open {}: {e}", path.display()))),
        };

        let mut dec = zstd::stream::read::Decoder::new(file)
            .map_err(|e| DeckError::Storage(format!("zstd decoder: {e}")))?;
        let mut out = String::new();
        dec.read_to_string(&mut out)
            .map_err(|e| DeckError::Storage(format!("read {}: {e}", path.display())))?;
        Ok(Some(out))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeckError> {
        fs::create_dir_all(&self.root).map_err(|e|
            DeckError::Storage(format!("create dir {}: {e}", self.root.display()))
        )?;

        // written beside the target then renamed over it
        let temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| DeckError::Storage(
                format!("tempfile in {}: {e}", self.root.display())
            ))?;

        {
            let mut enc = zstd::stream::write::Encoder::new(temp.as_file(), self.level)
                .map_err(|e| DeckError::Storage(format!("zstd encoder: {e}")))?;
            enc.write_all(value.as_bytes())
                .map_err(|e| DeckError::Storage(format!("write snapshot: {e}")))?;
            enc.finish()
                .map_err(|e| DeckError::Storage(format!("zstd finish: {e}")))?;
        }

        let path = self.path(key);
        temp.persist(&path).map_err(|e|
            DeckError::Storage(format!("persist {}: {e}", path.display())))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DeckError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeckError::Storage(format!("remove {}: {e}", path.display()))),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeckError> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeckError> {
        self.map.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DeckError> {
        self.map.lock().await.remove(key);
        Ok(())
    }
}
