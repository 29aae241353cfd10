use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::components::ComponentGate;
use super::events::{EventBus, EventType};
use super::pipeline::{RecomputePipeline, RecomputeSubscription, RolloverSubscription};
use super::plugin::EligibilityPlugin;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin {0} is already registered")]
    DuplicatePlugin(String),
    #[error("category {category} is already owned by plugin {owner}; {plugin} cannot claim it")]
    DuplicateCategory {
        category: String,
        owner: String,
        plugin: String,
    },
    #[error("component enablement cache has not been initialized")]
    GateNotInitialized,
}

/// Registered plugins plus the category ownership map.
///
/// Built once at startup. Registering a plugin subscribes its declared event
/// interests on the bus, each routed to the recompute pipeline.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn EligibilityPlugin>>,
    by_id: HashMap<String, usize>,
    by_category: HashMap<String, usize>,
    bus: EventBus,
    pipeline: Arc<RecomputePipeline>,
}

impl PluginRegistry {
    pub fn new(bus: EventBus, pipeline: Arc<RecomputePipeline>) -> Self {
        Self {
            plugins: Vec::new(),
            by_id: HashMap::new(),
            by_category: HashMap::new(),
            bus,
            pipeline,
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn EligibilityPlugin>) -> Result<(), RegistryError> {
        let id = plugin.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicatePlugin(id));
        }

        let category = plugin.category().as_str().to_string();
        if let Some(&owner) = self.by_category.get(&category) {
            return Err(RegistryError::DuplicateCategory {
                category,
                owner: self.plugins[owner].id().to_string(),
                plugin: id,
            });
        }

        let interests = plugin.event_interests();
        for interest in &interests {
            self.bus.subscribe(
                interest.event_type,
                Arc::new(RecomputeSubscription::new(
                    Arc::clone(&plugin),
                    interest.event_type,
                    interest.worker_id,
                    Arc::clone(&self.pipeline),
                )),
            );
        }

        let index = self.plugins.len();
        self.by_id.insert(id.clone(), index);
        self.by_category.insert(category.clone(), index);
        self.plugins.push(plugin);

        info!(
            plugin = %id,
            category = %category,
            subscriptions = interests.len(),
            "eligibility plugin registered"
        );
        Ok(())
    }

    /// Route `DailyRollover` to a full reconciliation backfill.
    ///
    /// Holds the registry weakly so the bus does not keep it alive.
    pub fn attach_rollover(self: &Arc<Self>) {
        self.bus.subscribe(
            EventType::DailyRollover,
            Arc::new(RolloverSubscription::new(Arc::downgrade(self))),
        );
    }

    pub fn plugin_ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.id()).collect()
    }

    pub fn plugins(&self) -> &[Arc<dyn EligibilityPlugin>] {
        &self.plugins
    }

    pub fn plugin(&self, id: &str) -> Option<&Arc<dyn EligibilityPlugin>> {
        self.by_id.get(id).map(|&index| &self.plugins[index])
    }

    pub fn owner_of(&self, category: &str) -> Option<&Arc<dyn EligibilityPlugin>> {
        self.by_category.get(category).map(|&index| &self.plugins[index])
    }

    /// Plugins whose component is enabled, in registration order.
    pub fn active_plugins(&self) -> Result<Vec<Arc<dyn EligibilityPlugin>>, RegistryError> {
        let gate = self.gate();
        if !gate.is_initialized() {
            return Err(RegistryError::GateNotInitialized);
        }

        Ok(self
            .plugins
            .iter()
            .filter(|plugin| gate.is_enabled(plugin.component_id()) == Some(true))
            .cloned()
            .collect())
    }

    pub fn gate(&self) -> &ComponentGate {
        self.pipeline.gate()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn pipeline(&self) -> &Arc<RecomputePipeline> {
        &self.pipeline
    }
}
