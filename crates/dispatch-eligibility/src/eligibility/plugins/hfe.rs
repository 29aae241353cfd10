use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::eligibility::domain::{
    Category, ConditionKind, EligibilityCondition, EligibilityFact, WorkerId,
};
use crate::eligibility::events::{DomainEvent, EventType};
use crate::eligibility::plugin::{
    applies_to_job, EligibilityPlugin, EventInterest, PluginError, QueryContext,
};
use crate::eligibility::records::{DispatchRecords, PluginJobConfig};

use super::employer_value;

pub const HFE_PLUGIN_ID: &str = "hfe";
pub const HFE_COMPONENT_ID: &str = "dispatch.hfe";
pub const HFE_CATEGORY: &str = "hfe";

/// Hold-for-employer: a held worker may only be offered the holding employer's jobs.
pub struct HoldForEmployerPlugin {
    records: Arc<dyn DispatchRecords>,
    category: Category,
}

impl HoldForEmployerPlugin {
    pub fn new(records: Arc<dyn DispatchRecords>) -> Self {
        Self {
            records,
            category: Category::new(HFE_CATEGORY),
        }
    }
}

fn worker_from_hold_event(event: &DomainEvent) -> Option<WorkerId> {
    match event {
        DomainEvent::WorkerHoldSaved { worker_id, .. }
        | DomainEvent::WorkerHoldDeleted { worker_id, .. } => Some(worker_id.clone()),
        _ => None,
    }
}

#[async_trait]
impl EligibilityPlugin for HoldForEmployerPlugin {
    fn id(&self) -> &str {
        HFE_PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Hold for employer"
    }

    fn description(&self) -> &str {
        "Workers held for an employer are withheld from every other employer's jobs."
    }

    fn component_id(&self) -> &str {
        HFE_COMPONENT_ID
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn event_interests(&self) -> Vec<EventInterest> {
        vec![
            EventInterest::new(EventType::WorkerHoldSaved, worker_from_hold_event),
            EventInterest::new(EventType::WorkerHoldDeleted, worker_from_hold_event),
        ]
    }

    fn supports_backfill(&self) -> bool {
        true
    }

    fn eligibility_condition(
        &self,
        context: &QueryContext,
        config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError> {
        Ok(applies_to_job(config).map(|_| {
            EligibilityCondition::new(
                HFE_CATEGORY,
                ConditionKind::NotExistsOther,
                employer_value(&context.employer_id),
            )
        }))
    }

    async fn derive_facts(
        &self,
        worker_id: &WorkerId,
        today: NaiveDate,
    ) -> Result<Vec<EligibilityFact>, PluginError> {
        let holds = self.records.holds_for_worker(worker_id).await?;
        let employers: BTreeSet<_> = holds
            .iter()
            .filter(|hold| hold.is_active_on(today))
            .map(|hold| employer_value(&hold.employer_id))
            .collect();

        Ok(employers
            .into_iter()
            .map(|value| EligibilityFact::new(worker_id.clone(), self.category.clone(), value))
            .collect())
    }

    async fn backfill_candidates(&self, today: NaiveDate) -> Result<Vec<WorkerId>, PluginError> {
        let holds = self.records.holds().await?;
        Ok(holds
            .into_iter()
            .filter(|hold| hold.is_active_on(today))
            .map(|hold| hold.worker_id)
            .collect())
    }
}
