//! Plugin registry: the in-memory plugin set, its generated pipeline
//! units, and synchronization with the persistent store.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{PluginError, Result};
use crate::pipeline::Pipeline;
use crate::plugin::runner::{middleware_for, Runner};
use crate::plugin::schema::Plugin;
use crate::store::{KvStore, PluginStore};

const DEFAULT_MAX_SOURCE_BYTES: usize = 1 << 20;

/// Listing row for management callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub sites: Vec<String>,
    pub enabled: bool,
}

pub struct PluginRegistry {
    store: PluginStore,
    plugins: DashMap<String, Plugin>,
    pipeline: Arc<Pipeline>,
    runner: Arc<Runner>,
    max_source_bytes: usize,
}

impl PluginRegistry {
    pub fn new(store: Arc<dyn KvStore>, pipeline: Arc<Pipeline>, runner: Arc<Runner>) -> Self {
        Self {
            store: PluginStore::new(store),
            plugins: DashMap::new(),
            pipeline,
            runner,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    pub fn with_max_source_bytes(mut self, limit: usize) -> Self {
        self.max_source_bytes = limit;
        self
    }

    /// Rebuilds the registry from the store: clears the in-memory plugin
    /// and unit maps, re-fetches persisted identifiers and the enabled
    /// set, and regenerates a unit for every identifier present in both.
    /// Disabled or code-less entries are skipped, not removed from
    /// storage. Storage faults are logged and the load proceeds with
    /// whatever was successfully read.
    pub async fn load(&self) -> usize {
        let stale: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        for name in stale {
            self.pipeline.remove(&name);
        }
        self.plugins.clear();

        let ids = match self.store.ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list persisted plugins");
                Vec::new()
            }
        };
        let enabled = match self.store.enabled_ids().await {
            Ok(enabled) => enabled,
            Err(e) => {
                error!(error = %e, "failed to read enabled plugin list");
                Vec::new()
            }
        };

        let mut count = 0;
        for id in ids.iter().filter(|id| enabled.contains(*id)) {
            match self.store.load(id).await {
                Ok(Some(plugin)) => {
                    self.register(plugin);
                    count += 1;
                }
                Ok(None) => debug!(plugin = %id, "skipping code-less plugin entry"),
                Err(e) => error!(plugin = %id, error = %e, "failed to load plugin"),
            }
        }

        info!(count, "plugin registry loaded");
        count
    }

    /// Creates (or replaces) a plugin: validates, persists source and
    /// metadata, marks it enabled, and registers its pipeline unit.
    pub async fn add_plugin(
        &self,
        name: impl Into<String>,
        sites: Vec<String>,
        source: impl Into<String>,
    ) -> Result<()> {
        let plugin = Plugin::new(name, sites, source)?;
        if plugin.source.len() > self.max_source_bytes {
            return Err(PluginError::SourceTooLarge {
                name: plugin.name,
                limit: self.max_source_bytes,
            }
            .into());
        }

        self.store.save(&plugin).await?;
        self.store.add_enabled(&plugin.name).await?;
        info!(plugin = %plugin.name, sites = ?plugin.sites, "plugin registered");
        self.register(plugin);
        Ok(())
    }

    /// Destroys a plugin: removes it from storage, strips it from the
    /// enabled set, and drops its unit. Lenient about unknown names;
    /// returns whether anything was removed.
    pub async fn remove_plugin(&self, name: &str) -> Result<bool> {
        self.store.delete(name).await?;
        self.store.remove_enabled(name).await?;
        let existed = self.plugins.remove(name).is_some();
        let dropped = self.pipeline.remove(name);
        if existed || dropped {
            info!(plugin = %name, "plugin removed");
        }
        Ok(existed || dropped)
    }

    /// The dedicated sites-update call: everything else about the plugin
    /// is replace-in-whole via [`add_plugin`](Self::add_plugin).
    pub async fn update_sites(&self, name: &str, sites: Vec<String>) -> Result<()> {
        if sites.is_empty() {
            return Err(PluginError::EmptyScope {
                name: name.to_string(),
            }
            .into());
        }

        let current = match self.plugins.get(name) {
            Some(p) => p.clone(),
            None => self
                .store
                .load(name)
                .await?
                .ok_or_else(|| PluginError::NotFound {
                    name: name.to_string(),
                })?,
        };

        let mut updated = current;
        updated.sites = sites;
        self.store.save_meta(&updated.meta()).await?;

        // Regenerate the unit so the new scope takes effect immediately,
        // preserving a disabled unit's flag.
        if self.plugins.contains_key(name) {
            let enabled = self
                .store
                .enabled_ids()
                .await?
                .iter()
                .any(|id| id == name);
            self.register(updated);
            if !enabled {
                self.pipeline.set_enabled(name, false);
            }
        }
        Ok(())
    }

    /// Persists the enabled flag and applies it to the live unit. Enabling
    /// a plugin that is not resident loads it from the store.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        if enabled {
            self.store.add_enabled(name).await?;
            if self.plugins.contains_key(name) {
                self.pipeline.set_enabled(name, true);
            } else {
                let plugin =
                    self.store
                        .load(name)
                        .await?
                        .ok_or_else(|| PluginError::NotFound {
                            name: name.to_string(),
                        })?;
                self.register(plugin);
            }
        } else {
            self.store.remove_enabled(name).await?;
            self.pipeline.set_enabled(name, false);
        }
        Ok(())
    }

    /// Lists every persisted plugin with its enabled flag.
    pub async fn list(&self) -> Result<Vec<PluginInfo>> {
        let ids = self.store.ids().await?;
        let enabled = self.store.enabled_ids().await?;

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            let sites = match self.plugins.get(&id) {
                Some(p) => p.sites.clone(),
                None => match self.store.load(&id).await? {
                    Some(p) => p.sites,
                    None => Vec::new(),
                },
            };
            infos.push(PluginInfo {
                enabled: enabled.contains(&id),
                name: id,
                sites,
            });
        }
        Ok(infos)
    }

    pub fn get(&self, name: &str) -> Option<Plugin> {
        self.plugins.get(name).map(|p| p.clone())
    }

    pub fn resident_count(&self) -> usize {
        self.plugins.len()
    }

    fn register(&self, plugin: Plugin) {
        let unit = middleware_for(&plugin, self.runner.clone());
        self.pipeline.add(unit);
        self.plugins.insert(plugin.name.clone(), plugin);
    }
}
