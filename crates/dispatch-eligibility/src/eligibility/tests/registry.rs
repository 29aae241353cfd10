use super::common::*;
use std::sync::Arc;

use crate::eligibility::clock::FixedClock;
use crate::eligibility::components::{ComponentGate, StaticComponentSource};
use crate::eligibility::domain::{Category, EligibilityCondition};
use crate::eligibility::events::{EventBus, EventType};
use crate::eligibility::plugin::{EligibilityPlugin, PluginError, QueryContext};
use crate::eligibility::pipeline::RecomputePipeline;
use crate::eligibility::plugins::{
    BanEligibilityPlugin, HoldForEmployerPlugin, WorkStatusEligibilityPlugin, BAN_PLUGIN_ID,
};
use crate::eligibility::records::{DispatchRecords, InMemoryDispatchRecords, PluginJobConfig};
use crate::eligibility::registry::{PluginRegistry, RegistryError};
use crate::eligibility::store::InMemoryFactStore;

fn empty_registry() -> (PluginRegistry, EventBus) {
    let bus = EventBus::new();
    let pipeline = Arc::new(RecomputePipeline::new(
        Arc::new(InMemoryFactStore::new()),
        Arc::new(ComponentGate::new()),
        Arc::new(FixedClock::new(today())),
    ));
    (PluginRegistry::new(bus.clone(), pipeline), bus)
}

fn records() -> Arc<dyn DispatchRecords> {
    Arc::new(InMemoryDispatchRecords::new())
}

#[test]
fn rejects_duplicate_plugin_ids() {
    let (mut registry, _) = empty_registry();
    registry
        .register(Arc::new(BanEligibilityPlugin::new(records())))
        .expect("first registration succeeds");

    match registry.register(Arc::new(BanEligibilityPlugin::new(records()))) {
        Err(RegistryError::DuplicatePlugin(id)) => assert_eq!(id, BAN_PLUGIN_ID),
        other => panic!("expected duplicate plugin error, got {other:?}"),
    }
    assert_eq!(registry.plugin_ids(), vec![BAN_PLUGIN_ID]);
}

#[test]
fn rejects_second_owner_of_a_category() {
    let (mut registry, _) = empty_registry();
    registry
        .register(Arc::new(FlakyPlugin::new()))
        .expect("first registration succeeds");

    struct Imposter(FlakyPlugin);

    #[async_trait::async_trait]
    impl EligibilityPlugin for Imposter {
        fn id(&self) -> &str {
            "imposter"
        }
        fn name(&self) -> &str {
            "Imposter"
        }
        fn description(&self) -> &str {
            "Claims the flaky category."
        }
        fn component_id(&self) -> &str {
            self.0.component_id()
        }
        fn category(&self) -> &Category {
            self.0.category()
        }
        fn eligibility_condition(
            &self,
            _context: &QueryContext,
            _config: Option<&PluginJobConfig>,
        ) -> Result<Option<EligibilityCondition>, PluginError> {
            Ok(None)
        }
    }

    match registry.register(Arc::new(Imposter(FlakyPlugin::new()))) {
        Err(RegistryError::DuplicateCategory {
            category,
            owner,
            plugin,
        }) => {
            assert_eq!(category, "flaky");
            assert_eq!(owner, "flaky");
            assert_eq!(plugin, "imposter");
        }
        other => panic!("expected duplicate category error, got {other:?}"),
    }
}

#[test]
fn registration_subscribes_declared_event_interests() {
    let (mut registry, bus) = empty_registry();
    registry
        .register(Arc::new(BanEligibilityPlugin::new(records())))
        .expect("ban registers");
    registry
        .register(Arc::new(HoldForEmployerPlugin::new(records())))
        .expect("hfe registers");
    registry
        .register(Arc::new(WorkStatusEligibilityPlugin::new()))
        .expect("work status registers");

    assert_eq!(bus.subscriber_count(EventType::WorkerBanSaved), 1);
    assert_eq!(bus.subscriber_count(EventType::WorkerBanDeleted), 1);
    assert_eq!(bus.subscriber_count(EventType::WorkerHoldSaved), 1);
    assert_eq!(bus.subscriber_count(EventType::WorkerDncSaved), 0);

    let registry = Arc::new(registry);
    registry.attach_rollover();
    assert_eq!(bus.subscriber_count(EventType::DailyRollover), 1);
    assert_eq!(
        registry.owner_of("hfe").map(|plugin| plugin.id()),
        Some("hfe")
    );
    assert!(registry.plugin("dnc").is_none());
}

#[tokio::test]
async fn active_plugins_requires_initialised_gate() {
    let harness = harness_with(Vec::new());
    let registry = harness.engine.registry();

    assert!(matches!(
        registry.active_plugins(),
        Err(RegistryError::GateNotInitialized)
    ));

    harness
        .engine
        .initialize(&StaticComponentSource::new(["dispatch.ban", "dispatch.hfe"]))
        .await
        .expect("gate initializes");

    let active: Vec<String> = registry
        .active_plugins()
        .expect("gate initialized")
        .iter()
        .map(|plugin| plugin.id().to_string())
        .collect();
    assert_eq!(active, vec!["ban".to_string(), "hfe".to_string()]);
}
