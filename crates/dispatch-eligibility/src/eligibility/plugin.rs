//! Contract every eligibility rule family implements.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::components::ComponentGate;
use super::domain::{Category, EligibilityCondition, EligibilityFact, EmployerId, JobId, WorkerId};
use super::events::{DomainEvent, EventType};
use super::records::{PluginJobConfig, RecordsError};
use super::store::{FactDelta, FactStore, StoreError};

/// Job-level facts available while building a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub job_id: JobId,
    pub employer_id: EmployerId,
    pub today: NaiveDate,
}

/// Pure projection from an event payload to the worker it concerns.
pub type WorkerProjection = fn(&DomainEvent) -> Option<WorkerId>;

/// One `(event type, worker projection)` pair declared by a plugin.
#[derive(Debug, Clone, Copy)]
pub struct EventInterest {
    pub event_type: EventType,
    pub worker_id: WorkerProjection,
}

impl EventInterest {
    pub fn new(event_type: EventType, worker_id: WorkerProjection) -> Self {
        Self {
            event_type,
            worker_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {plugin} has invalid job configuration: {reason}")]
    InvalidJobConfig { plugin: String, reason: String },
    #[error("plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },
    #[error(transparent)]
    Records(#[from] RecordsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dependencies handed to a recompute by the pipeline.
#[derive(Clone)]
pub struct RecomputeContext {
    pub store: Arc<dyn FactStore>,
    pub gate: Arc<ComponentGate>,
    pub today: NaiveDate,
}

/// What a single recompute did to the fact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// Component enabled; the category was replaced with freshly derived facts.
    Replaced(FactDelta),
    /// Component disabled; the category was emptied.
    Cleared(FactDelta),
    /// Enablement unknown; nothing was touched.
    Skipped,
}

impl RecomputeOutcome {
    pub fn delta(&self) -> FactDelta {
        match self {
            RecomputeOutcome::Replaced(delta) | RecomputeOutcome::Cleared(delta) => *delta,
            RecomputeOutcome::Skipped => FactDelta::default(),
        }
    }
}

/// Shared applicability rule: a plugin only restricts jobs that opt into it.
pub fn applies_to_job(config: Option<&PluginJobConfig>) -> Option<&PluginJobConfig> {
    config.filter(|config| config.enabled)
}

#[async_trait]
pub trait EligibilityPlugin: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn component_id(&self) -> &str;
    fn category(&self) -> &Category;

    fn event_interests(&self) -> Vec<EventInterest> {
        Vec::new()
    }

    fn supports_backfill(&self) -> bool {
        false
    }

    /// Describe this plugin's predicate for one query. `Ok(None)` imposes no restriction.
    ///
    /// Must not read the fact store.
    fn eligibility_condition(
        &self,
        context: &QueryContext,
        config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError>;

    /// Current facts for one worker, re-read from the authoritative source.
    async fn derive_facts(
        &self,
        _worker_id: &WorkerId,
        _today: NaiveDate,
    ) -> Result<Vec<EligibilityFact>, PluginError> {
        Ok(Vec::new())
    }

    /// Workers with a currently relevant upstream record, for backfill.
    async fn backfill_candidates(&self, _today: NaiveDate) -> Result<Vec<WorkerId>, PluginError> {
        Ok(Vec::new())
    }

    /// Replace this worker's facts in this plugin's category.
    ///
    /// A disabled component leaves the category empty. Derivation failures
    /// return before the store is touched, so the previous facts survive.
    async fn recompute_worker(
        &self,
        context: &RecomputeContext,
        worker_id: &WorkerId,
    ) -> Result<RecomputeOutcome, PluginError> {
        match context.gate.is_enabled(self.component_id()) {
            None => Ok(RecomputeOutcome::Skipped),
            Some(false) => {
                let delta = context
                    .store
                    .replace_worker_category(worker_id, self.category(), Vec::new())
                    .await?;
                Ok(RecomputeOutcome::Cleared(delta))
            }
            Some(true) => {
                let facts = self.derive_facts(worker_id, context.today).await?;
                let delta = context
                    .store
                    .replace_worker_category(worker_id, self.category(), facts)
                    .await?;
                Ok(RecomputeOutcome::Replaced(delta))
            }
        }
    }
}
