//! Startup wiring for the eligibility engine.
//!
//! Construction order matters: the registry must exist (and have subscribed
//! every plugin's event interests) before anything is published, and the
//! component gate must be initialised before the first backfill or query.

use std::sync::Arc;
use std::time::Duration;

use sqlx::AnyPool;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::components::{ComponentError, ComponentGate, ComponentSource};
use super::events::{Delivery, DomainEvent, EventBus};
use super::pipeline::{RecomputePipeline, DEFAULT_BACKFILL_CONCURRENCY};
use super::plugin::EligibilityPlugin;
use super::plugins::default_plugins;
use super::query::{EligibleWorkerQuery, InMemoryEligibleWorkerQuery};
use super::records::DispatchRecords;
use super::registry::{PluginRegistry, RegistryError};
use super::service::{EligibilityService, QueryLimits};
use super::sql::{SqlDispatchRecords, SqlEligibleWorkerQuery, SqlFactStore};
use super::store::FactStore;

pub struct EligibilityEngineBuilder {
    records: Arc<dyn DispatchRecords>,
    store: Arc<dyn FactStore>,
    clock: Arc<dyn Clock>,
    plugins: Option<Vec<Arc<dyn EligibilityPlugin>>>,
    query: Option<Arc<dyn EligibleWorkerQuery>>,
    limits: QueryLimits,
    backfill_concurrency: usize,
}

impl EligibilityEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the built-in plugin set.
    pub fn plugins(mut self, plugins: Vec<Arc<dyn EligibilityPlugin>>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Listing executor. Without one the in-process evaluator is used, which
    /// only suits tests.
    pub fn query(mut self, query: Arc<dyn EligibleWorkerQuery>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn backfill_concurrency(mut self, concurrency: usize) -> Self {
        self.backfill_concurrency = concurrency;
        self
    }

    pub fn build(self) -> Result<EligibilityEngine, RegistryError> {
        let gate = Arc::new(ComponentGate::new());
        let pipeline = Arc::new(
            RecomputePipeline::new(Arc::clone(&self.store), gate, Arc::clone(&self.clock))
                .with_backfill_concurrency(self.backfill_concurrency),
        );

        let bus = EventBus::new();
        let mut registry = PluginRegistry::new(bus.clone(), pipeline);
        let plugins = self
            .plugins
            .unwrap_or_else(|| default_plugins(Arc::clone(&self.records)));
        for plugin in plugins {
            registry.register(plugin)?;
        }
        let registry = Arc::new(registry);
        registry.attach_rollover();

        let query: Arc<dyn EligibleWorkerQuery> = match self.query {
            Some(query) => query,
            None => Arc::new(InMemoryEligibleWorkerQuery::new(
                Arc::clone(&self.records),
                Arc::clone(&self.store),
            )),
        };
        let service = Arc::new(EligibilityService::new(
            self.records,
            Arc::clone(&registry),
            query,
            self.limits,
        ));

        Ok(EligibilityEngine {
            bus,
            registry,
            service,
            clock: self.clock,
        })
    }
}

/// Assembled engine: event bus, plugin registry and service facade.
pub struct EligibilityEngine {
    bus: EventBus,
    registry: Arc<PluginRegistry>,
    service: Arc<EligibilityService>,
    clock: Arc<dyn Clock>,
}

impl EligibilityEngine {
    pub fn builder(
        records: Arc<dyn DispatchRecords>,
        store: Arc<dyn FactStore>,
    ) -> EligibilityEngineBuilder {
        EligibilityEngineBuilder {
            records,
            store,
            clock: Arc::new(SystemClock),
            plugins: None,
            query: None,
            limits: QueryLimits::default(),
            backfill_concurrency: DEFAULT_BACKFILL_CONCURRENCY,
        }
    }

    /// Records, facts and listing queries all served from `pool`.
    pub fn sql_builder(pool: AnyPool) -> EligibilityEngineBuilder {
        let records: Arc<dyn DispatchRecords> = Arc::new(SqlDispatchRecords::new(pool.clone()));
        let store: Arc<dyn FactStore> = Arc::new(SqlFactStore::new(pool.clone()));
        Self::builder(records, store).query(Arc::new(SqlEligibleWorkerQuery::new(pool)))
    }

    /// Load component enablement. Recompute and queries are unavailable until
    /// this succeeds.
    pub async fn initialize(&self, source: &dyn ComponentSource) -> Result<(), ComponentError> {
        self.registry.gate().initialize(source).await
    }

    pub fn publish(&self, event: DomainEvent) -> Delivery {
        self.bus.publish(event)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn service(&self) -> &Arc<EligibilityService> {
        &self.service
    }

    /// Poll the clock and publish `DailyRollover` whenever the date changes.
    pub fn spawn_rollover_watch(&self, every: Duration) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let clock = Arc::clone(&self.clock);
        let mut current = clock.today();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let today = clock.today();
                if today == current {
                    continue;
                }
                debug!(from = %current, to = %today, "business date changed");
                current = today;
                info!(date = %today, "publishing daily rollover");
                bus.publish(DomainEvent::DailyRollover { date: today })
                    .settled()
                    .await;
            }
        })
    }
}
