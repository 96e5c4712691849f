// =============================================================================
// Plugin registry — name -> constructor, alongside discovered manifests
// =============================================================================
//
// Per the "dynamic dispatch -> tagged variants and interfaces" redesign
// note: strategy plugins are polymorphic in their implementation, so each is
// represented as a `StrategyPlugin` trait object, registered at startup in a
// map from name to constructor closure. There is no `dlopen`-style dynamic
// loading here — plugins are Rust types compiled into this binary and
// registered by name, the same way `strategy_plugin_manager.py` maps a
// manifest's declared name to a Python class to instantiate. The manifest
// (discovered separately from a plugin directory on disk, see
// `strategy::manifest`) still drives parameter validation at `load` time;
// the registry only supplies "given this name, build me an instance".

use std::collections::HashMap;

use crate::errors::CoreError;
use crate::strategy::manifest::PluginManifest;
use crate::strategy::plugin::StrategyPlugin;

type Constructor = Box<dyn Fn() -> Box<dyn StrategyPlugin + Send> + Send + Sync>;

/// Maps a plugin name to both its manifest (parameter schema, metadata) and
/// a constructor for fresh instances.
#[derive(Default)]
pub struct PluginRegistry {
    manifests: HashMap<String, PluginManifest>,
    constructors: HashMap<String, Constructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `manifest.name`, replacing any previous
    /// registration of the same name (used by `reload_plugins`).
    pub fn register(
        &mut self,
        manifest: PluginManifest,
        constructor: impl Fn() -> Box<dyn StrategyPlugin + Send> + Send + Sync + 'static,
    ) {
        self.constructors.insert(manifest.name.clone(), Box::new(constructor));
        self.manifests.insert(manifest.name.clone(), manifest);
    }

    pub fn manifest(&self, name: &str) -> Option<&PluginManifest> {
        self.manifests.get(name)
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn StrategyPlugin + Send>, CoreError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| CoreError::validation(format!("unknown plugin '{name}'")))?;
        Ok(constructor())
    }

    pub fn names(&self) -> Vec<&str> {
        self.manifests.keys().map(|s| s.as_str()).collect()
    }
}
