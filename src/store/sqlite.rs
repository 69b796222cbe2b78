//! SQLite-backed key-value store.
//!
//! One `kv` table keyed by (namespace, key). Connections are opened per
//! operation against a path whose schema was initialized at construction.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::error::StoreError;
use crate::store::KvStore;

pub struct SqliteStore {
    db_path: PathBuf,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database and initializes the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    namespace TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (namespace, key)
                );",
            )?;
        }

        Ok(Self { db_path })
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (namespace, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![namespace, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
