//! Persistent plugin storage.
//!
//! The pipeline only ever talks to a namespaced key-value interface with
//! three logical partitions: plugin source by identifier, plugin metadata
//! by identifier, and a single enabled-identifier list. [`MemoryStore`]
//! backs tests and embedders without persistence; [`sqlite::SqliteStore`]
//! survives restarts.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::plugin::schema::{Plugin, PluginMeta};

/// Namespace for plugin source blobs.
pub const NS_SOURCE: &str = "plugin.source";
/// Namespace for plugin metadata records.
pub const NS_META: &str = "plugin.meta";
/// Namespace for pipeline state; holds the enabled-identifier list.
pub const NS_STATE: &str = "plugin.state";
/// Key of the enabled-identifier list inside [`NS_STATE`].
pub const KEY_ENABLED: &str = "enabled";

/// A namespaced key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError>;
}

/// Typed view over the three plugin partitions.
pub struct PluginStore {
    inner: Arc<dyn KvStore>,
}

impl PluginStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self { inner }
    }

    /// Persists a plugin's source and metadata.
    pub async fn save(&self, plugin: &Plugin) -> Result<(), StoreError> {
        let meta = serde_json::to_string(&plugin.meta())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.inner
            .set(NS_SOURCE, &plugin.name, &plugin.source)
            .await?;
        self.inner.set(NS_META, &plugin.name, &meta).await
    }

    /// Reconstructs a plugin from its persisted parts. A missing source
    /// (code-less entry) or missing metadata record yields `Ok(None)`;
    /// corrupt metadata is an error the caller logs and skips.
    pub async fn load(&self, name: &str) -> Result<Option<Plugin>, StoreError> {
        let Some(source) = self.inner.get(NS_SOURCE, name).await? else {
            return Ok(None);
        };
        let Some(meta_json) = self.inner.get(NS_META, name).await? else {
            return Ok(None);
        };

        let meta: PluginMeta =
            serde_json::from_str(&meta_json).map_err(|e| StoreError::Corrupt {
                key: name.to_string(),
                reason: e.to_string(),
            })?;

        Plugin::from_parts(meta, source)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: name.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.remove(NS_SOURCE, name).await?;
        self.inner.remove(NS_META, name).await
    }

    /// All persisted plugin identifiers, whether or not they are enabled.
    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys(NS_META).await
    }

    /// Updates only the metadata record (the dedicated sites update path).
    pub async fn save_meta(&self, meta: &PluginMeta) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(meta).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.inner.set(NS_META, &meta.name, &json).await
    }

    pub async fn enabled_ids(&self) -> Result<Vec<String>, StoreError> {
        match self.inner.get(NS_STATE, KEY_ENABLED).await? {
            None => Ok(Vec::new()),
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                key: KEY_ENABLED.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn set_enabled_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(ids).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.inner.set(NS_STATE, KEY_ENABLED, &json).await
    }

    pub async fn add_enabled(&self, name: &str) -> Result<(), StoreError> {
        let mut ids = self.enabled_ids().await?;
        if !ids.iter().any(|id| id == name) {
            ids.push(name.to_string());
            self.set_enabled_ids(&ids).await?;
        }
        Ok(())
    }

    pub async fn remove_enabled(&self, name: &str) -> Result<(), StoreError> {
        let mut ids = self.enabled_ids().await?;
        let before = ids.len();
        ids.retain(|id| id != name);
        if ids.len() != before {
            self.set_enabled_ids(&ids).await?;
        }
        Ok(())
    }
}

/// In-memory store for tests and non-persistent embeddings.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
