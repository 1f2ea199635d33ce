//! Plugin contract (`spec.md` §4.8, §9 REDESIGN FLAGS: "an explicit
//! `Plugin` trait plus a typed event bus, not duck-typed objects").
//!
//! Registration order is irrelevant; dependency order is derived by
//! topological sort, the same shape as the teacher's table/index creation
//! ordering in `ruststack-dynamodb-core` but applied to plugin startup.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An error raised while registering or starting plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Two or more plugins' declared dependencies form a cycle.
    #[error("plugin dependency cycle detected among: {0:?}")]
    Cycle(Vec<String>),
    /// A plugin declared a dependency that was never registered.
    #[error("plugin {plugin} depends on unregistered plugin {dependency}")]
    MissingDependency {
        /// The dependent plugin's name.
        plugin: String,
        /// The missing dependency's name.
        dependency: String,
    },
    /// A plugin's `start` hook failed.
    #[error("plugin {name} failed to start: {source}")]
    StartFailed {
        /// Plugin name.
        name: String,
        /// Underlying error.
        source: anyhow::Error,
    },
}

/// A database plugin: named, with declared startup dependencies, given a
/// chance to initialize against the owning database and to clean up on
/// disconnect.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable, unique plugin name.
    fn name(&self) -> &str;

    /// Names of other registered plugins that must `start` before this one.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Called once, in dependency order, when the owning database connects.
    async fn start(&self, database_id: &str) -> anyhow::Result<()>;

    /// Called once, in reverse dependency order, when the database disconnects.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Holds the registered plugins for one database and drives their
/// dependency-ordered start/stop lifecycle.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").field("plugins", &self.plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>()).finish()
    }
}

impl PluginRegistry {
    /// Register a plugin. Order of registration does not matter; startup
    /// order is derived from declared dependencies.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Compute a valid startup order (a topological sort of the
    /// dependency graph), or reject it as [`PluginError::Cycle`] /
    /// [`PluginError::MissingDependency`].
    pub fn startup_order(&self) -> Result<Vec<Arc<dyn Plugin>>, PluginError> {
        let by_name: HashMap<&str, &Arc<dyn Plugin>> = self.plugins.iter().map(|p| (p.name(), p)).collect();
        for plugin in &self.plugins {
            for dep in plugin.dependencies() {
                if !by_name.contains_key(dep.as_str()) {
                    return Err(PluginError::MissingDependency { plugin: plugin.name().to_string(), dependency: dep.clone() });
                }
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();
        let mut order: Vec<Arc<dyn Plugin>> = Vec::with_capacity(self.plugins.len());

        for plugin in &self.plugins {
            visit(plugin.name(), &by_name, &mut visited, &mut in_progress, &mut order)?;
        }

        Ok(order)
    }

    /// Start every plugin in dependency order.
    pub async fn start_all(&self, database_id: &str) -> Result<(), PluginError> {
        for plugin in self.startup_order()? {
            plugin
                .start(database_id)
                .await
                .map_err(|source| PluginError::StartFailed { name: plugin.name().to_string(), source })?;
        }
        Ok(())
    }

    /// Stop every plugin in reverse dependency order, collecting (rather
    /// than short-circuiting on) the first failure so every plugin gets a
    /// chance to clean up.
    pub async fn stop_all(&self) {
        let order = self.startup_order().unwrap_or_else(|_| self.plugins.clone());
        for plugin in order.into_iter().rev() {
            if let Err(err) = plugin.stop().await {
                tracing::warn!(plugin = plugin.name(), error = %err, "plugin failed to stop cleanly");
            }
        }
    }
}

fn visit<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a Arc<dyn Plugin>>,
    visited: &mut HashSet<&'a str>,
    in_progress: &mut HashSet<&'a str>,
    order: &mut Vec<Arc<dyn Plugin>>,
) -> Result<(), PluginError> {
    if visited.contains(name) {
        return Ok(());
    }
    if in_progress.contains(name) {
        return Err(PluginError::Cycle(vec![name.to_string()]));
    }
    in_progress.insert(name);

    let plugin = by_name[name];
    for dep in plugin.dependencies() {
        visit(dep.as_str(), by_name, visited, in_progress, order).map_err(|err| match err {
            PluginError::Cycle(mut chain) => {
                chain.push(name.to_string());
                PluginError::Cycle(chain)
            }
            other => other,
        })?;
    }

    in_progress.remove(name);
    visited.insert(name);
    order.push(Arc::clone(plugin));
    Ok(())
}
