//! Event-driven and backfill recomputation of eligibility facts.
//!
//! Events are treated as a dirty bit: the handler extracts a worker id and
//! asks the owning plugin to re-read its upstream records, so deliveries for
//! the same worker may arrive in any order and still converge.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::components::ComponentGate;
use super::domain::{Category, WorkerId};
use super::events::{DomainEvent, EventSubscriber, EventType};
use super::plugin::{
    EligibilityPlugin, PluginError, RecomputeContext, RecomputeOutcome, WorkerProjection,
};
use super::registry::PluginRegistry;
use super::store::FactStore;

pub const DEFAULT_BACKFILL_CONCURRENCY: usize = 8;

/// Backfill result for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginBackfill {
    pub plugin: String,
    pub workers_processed: usize,
    pub entries_created: usize,
    pub entries_removed: usize,
    pub failures: usize,
    pub skipped: bool,
}

impl PluginBackfill {
    fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            ..Self::default()
        }
    }

    fn skipped(plugin: &str) -> Self {
        Self {
            skipped: true,
            ..Self::new(plugin)
        }
    }
}

/// Summary returned by a full backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub plugins: Vec<PluginBackfill>,
    pub workers_processed: usize,
    pub entries_created: usize,
}

impl BackfillReport {
    fn from_plugins(plugins: Vec<PluginBackfill>) -> Self {
        let workers_processed = plugins.iter().map(|entry| entry.workers_processed).sum();
        let entries_created = plugins.iter().map(|entry| entry.entries_created).sum();
        Self {
            plugins,
            workers_processed,
            entries_created,
        }
    }
}

type RecomputeKey = (WorkerId, Category);

pub struct RecomputePipeline {
    store: Arc<dyn FactStore>,
    gate: Arc<ComponentGate>,
    clock: Arc<dyn Clock>,
    locks: DashMap<RecomputeKey, Arc<Mutex<()>>>,
    backfill_concurrency: usize,
}

impl RecomputePipeline {
    pub fn new(store: Arc<dyn FactStore>, gate: Arc<ComponentGate>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            gate,
            clock,
            locks: DashMap::new(),
            backfill_concurrency: DEFAULT_BACKFILL_CONCURRENCY,
        }
    }

    pub fn with_backfill_concurrency(mut self, concurrency: usize) -> Self {
        self.backfill_concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    pub fn gate(&self) -> &ComponentGate {
        &self.gate
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Recompute one worker for one plugin.
    ///
    /// Calls for the same `(worker, category)` are serialised; the context is
    /// built after the lock is taken so each run reads current upstream state.
    pub async fn recompute(
        &self,
        plugin: &dyn EligibilityPlugin,
        worker_id: &WorkerId,
    ) -> Result<RecomputeOutcome, PluginError> {
        let key = (worker_id.clone(), plugin.category().clone());
        let lock = Arc::clone(&*self.locks.entry(key.clone()).or_default());

        let result = {
            let _guard = lock.lock().await;
            let context = RecomputeContext {
                store: Arc::clone(&self.store),
                gate: Arc::clone(&self.gate),
                today: self.clock.today(),
            };
            plugin.recompute_worker(&context, worker_id).await
        };

        drop(lock);
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        match &result {
            Ok(RecomputeOutcome::Skipped) => debug!(
                plugin = plugin.id(),
                worker_id = %worker_id,
                "component enablement unknown; recompute skipped"
            ),
            Ok(outcome) => {
                let delta = outcome.delta();
                debug!(
                    plugin = plugin.id(),
                    worker_id = %worker_id,
                    category = %plugin.category(),
                    created = delta.created,
                    removed = delta.removed,
                    "worker facts recomputed"
                );
            }
            Err(_) => {}
        }

        result
    }

    /// Full reconciliation for every plugin that supports backfill.
    ///
    /// Targets are workers with a currently relevant upstream record plus
    /// workers still holding facts in the category, so expired records are
    /// cleaned up too.
    pub async fn backfill(&self, registry: &PluginRegistry) -> BackfillReport {
        let plugins = registry
            .plugins()
            .iter()
            .filter(|plugin| plugin.supports_backfill());

        if !self.gate.is_initialized() {
            warn!("component enablement cache not initialized; backfill skipped");
            return BackfillReport::from_plugins(
                plugins.map(|plugin| PluginBackfill::skipped(plugin.id())).collect(),
            );
        }

        let mut results = Vec::new();
        for plugin in plugins {
            results.push(self.backfill_plugin(plugin.as_ref()).await);
        }

        let report = BackfillReport::from_plugins(results);
        info!(
            workers_processed = report.workers_processed,
            entries_created = report.entries_created,
            "eligibility backfill complete"
        );
        report
    }

    pub async fn backfill_plugin(&self, plugin: &dyn EligibilityPlugin) -> PluginBackfill {
        if self.gate.is_enabled(plugin.component_id()) != Some(true) {
            debug!(plugin = plugin.id(), "component disabled or unknown; backfill skipped");
            return PluginBackfill::skipped(plugin.id());
        }

        let targets = match self.reconciliation_targets(plugin).await {
            Ok(targets) => targets,
            Err(err) => {
                error!(plugin = plugin.id(), error = %err, "backfill candidate scan failed");
                return PluginBackfill {
                    failures: 1,
                    ..PluginBackfill::new(plugin.id())
                };
            }
        };

        self.recompute_all(plugin, targets).await
    }

    /// Bring every plugin owned by `component_id` in line with the gate.
    ///
    /// Enabled components are backfilled; disabled ones have every worker that
    /// still holds facts in their category recomputed, which empties it.
    pub async fn reconcile_component(
        &self,
        registry: &PluginRegistry,
        component_id: &str,
    ) -> Vec<PluginBackfill> {
        let mut results = Vec::new();
        for plugin in registry
            .plugins()
            .iter()
            .filter(|plugin| plugin.component_id() == component_id)
        {
            let plugin = plugin.as_ref();
            let result = match self.gate.is_enabled(component_id) {
                Some(true) if plugin.supports_backfill() => self.backfill_plugin(plugin).await,
                Some(true) | None => PluginBackfill::skipped(plugin.id()),
                Some(false) => match self.store.workers_with_category(plugin.category()).await {
                    Ok(workers) => self.recompute_all(plugin, workers).await,
                    Err(err) => {
                        error!(plugin = plugin.id(), error = %err, "fact scan for disabled component failed");
                        PluginBackfill {
                            failures: 1,
                            ..PluginBackfill::new(plugin.id())
                        }
                    }
                },
            };
            results.push(result);
        }
        results
    }

    async fn reconciliation_targets(
        &self,
        plugin: &dyn EligibilityPlugin,
    ) -> Result<BTreeSet<WorkerId>, PluginError> {
        let mut targets: BTreeSet<WorkerId> = plugin
            .backfill_candidates(self.clock.today())
            .await?
            .into_iter()
            .collect();
        targets.extend(self.store.workers_with_category(plugin.category()).await?);
        Ok(targets)
    }

    async fn recompute_all<I>(&self, plugin: &dyn EligibilityPlugin, workers: I) -> PluginBackfill
    where
        I: IntoIterator<Item = WorkerId>,
        I::IntoIter: Send,
    {
        let outcomes: Vec<_> = stream::iter(workers)
            .map(move |worker_id| async move {
                let outcome = self.recompute(plugin, &worker_id).await;
                (worker_id, outcome)
            })
            .buffer_unordered(self.backfill_concurrency)
            .collect()
            .await;

        let mut summary = PluginBackfill::new(plugin.id());
        for (worker_id, outcome) in outcomes {
            match outcome {
                Ok(RecomputeOutcome::Skipped) => summary.skipped = true,
                Ok(outcome) => {
                    let delta = outcome.delta();
                    summary.workers_processed += 1;
                    summary.entries_created += delta.created;
                    summary.entries_removed += delta.removed;
                }
                Err(err) => {
                    summary.failures += 1;
                    error!(
                        plugin = plugin.id(),
                        worker_id = %worker_id,
                        error = %err,
                        "backfill recompute failed; facts left at last known state"
                    );
                }
            }
        }
        summary
    }
}

/// Bus subscriber wiring one plugin's event interest to the pipeline.
pub(crate) struct RecomputeSubscription {
    plugin: Arc<dyn EligibilityPlugin>,
    event_type: EventType,
    projection: WorkerProjection,
    pipeline: Arc<RecomputePipeline>,
}

impl RecomputeSubscription {
    pub(crate) fn new(
        plugin: Arc<dyn EligibilityPlugin>,
        event_type: EventType,
        projection: WorkerProjection,
        pipeline: Arc<RecomputePipeline>,
    ) -> Self {
        Self {
            plugin,
            event_type,
            projection,
            pipeline,
        }
    }
}

#[async_trait]
impl EventSubscriber for RecomputeSubscription {
    fn name(&self) -> String {
        format!("recompute:{}", self.plugin.id())
    }

    async fn handle(&self, event: Arc<DomainEvent>) {
        let Some(worker_id) = (self.projection)(&event) else {
            warn!(
                plugin = self.plugin.id(),
                event_type = ?self.event_type,
                "event payload carried no worker id; nothing recomputed"
            );
            return;
        };

        if let Err(err) = self.pipeline.recompute(self.plugin.as_ref(), &worker_id).await {
            error!(
                plugin = self.plugin.id(),
                worker_id = %worker_id,
                event_type = ?self.event_type,
                error = %err,
                "recompute failed; facts left at last known state"
            );
        }
    }
}

pub(crate) struct RolloverSubscription {
    registry: Weak<PluginRegistry>,
}

impl RolloverSubscription {
    pub(crate) fn new(registry: Weak<PluginRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventSubscriber for RolloverSubscription {
    fn name(&self) -> String {
        "daily-rollover".to_string()
    }

    async fn handle(&self, event: Arc<DomainEvent>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let DomainEvent::DailyRollover { date } = event.as_ref() {
            info!(%date, "day rolled over; reconciling eligibility facts");
        }
        registry.pipeline().backfill(&registry).await;
    }
}
