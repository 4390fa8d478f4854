//! Plugin registration and lookup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::AsyncPlugin;
use crate::error::{Error, Result};

/// Maps task types to the plugins that serve them.
///
/// Built once at startup and then shared read-only.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn AsyncPlugin>>,
    task_types: HashMap<String, String>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("task_types", &self.task_types)
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin for all of its task types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePlugin`] if the id or any task type is
    /// already registered, and a configuration error if the plugin serves no
    /// task types. Nothing is registered on error.
    pub fn register(&mut self, plugin: Arc<dyn AsyncPlugin>) -> Result<()> {
        let id = plugin.id().to_string();
        if self.plugins.contains_key(&id) {
            return Err(Error::DuplicatePlugin { id });
        }

        let task_types = plugin.task_types();
        if task_types.is_empty() {
            return Err(Error::configuration(format!(
                "plugin {id} serves no task types"
            )));
        }
        for (i, task_type) in task_types.iter().enumerate() {
            if self.task_types.contains_key(task_type) || task_types[..i].contains(task_type) {
                return Err(Error::DuplicatePlugin {
                    id: task_type.clone(),
                });
            }
        }

        info!(plugin = %id, ?task_types, "registered plugin");
        for task_type in task_types {
            self.task_types.insert(task_type, id.clone());
        }
        self.plugins.insert(id, plugin);
        Ok(())
    }

    /// Finds the plugin for a task type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginNotFound`] if no plugin serves `task_type`.
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn AsyncPlugin>> {
        self.task_types
            .get(task_type)
            .and_then(|id| self.plugins.get(id))
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                task_type: task_type.to_string(),
            })
    }

    /// Finds a plugin by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn AsyncPlugin>> {
        self.plugins.get(id).cloned()
    }

    /// Registered plugin ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
