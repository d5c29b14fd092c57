//! `MachineRegistry`: compile-once, share-everywhere cache of compiled
//! `MachineDefinition`s: a definition is compiled once and shared immutably
//! across every instance. Holds the long-lived, process-wide compiled
//! definitions behind a small synchronous API that the facade and
//! `hsm-cli` both drive directly.

use hsm_core::{compile, BehaviorRegistry, ConfigError, MachineDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct MachineRegistry {
    definitions: RwLock<HashMap<String, Arc<MachineDefinition>>>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and compiles `config` against `behavior`, registers the
    /// result under its own `id`, and returns it. Compiling the same machine
    /// id twice replaces the previous definition; existing `RuntimeState`s
    /// built against the old one keep working since they only hold
    /// `StateId`s and an `Arc` clone of the definition they were restored
    /// against, not a registry lookup.
    pub fn compile(&self, config: &Value, behavior: Arc<BehaviorRegistry>) -> Result<Arc<MachineDefinition>, ConfigError> {
        let def = Arc::new(compile(config, behavior)?);
        self.definitions.write().expect("registry lock poisoned").insert(def.id.clone(), def.clone());
        Ok(def)
    }

    pub fn get(&self, machine_id: &str) -> Option<Arc<MachineDefinition>> {
        self.definitions.read().expect("registry lock poisoned").get(machine_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.definitions.read().expect("registry lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsm_core::BehaviorRegistry;
    use serde_json::json;

    fn toggle_config() -> Value {
        json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": { "on": { "FLIP": "on" } },
                "on": { "on": { "FLIP": "off" } }
            }
        })
    }

    #[test]
    fn compile_registers_and_get_returns_it() {
        let registry = MachineRegistry::new();
        let behavior = Arc::new(BehaviorRegistry::default());
        let def = registry.compile(&toggle_config(), behavior).expect("compiles");
        assert_eq!(def.id, "toggle");
        assert!(registry.get("toggle").is_some());
        assert_eq!(registry.ids(), vec!["toggle".to_string()]);
    }

    #[test]
    fn get_is_none_for_unregistered_id() {
        let registry = MachineRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
