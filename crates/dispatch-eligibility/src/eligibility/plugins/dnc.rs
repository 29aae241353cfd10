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

pub const DNC_PLUGIN_ID: &str = "dnc";
pub const DNC_COMPONENT_ID: &str = "dispatch.dnc";
pub const DNC_CATEGORY: &str = "dnc";

/// Excludes workers an employer has asked not to be called for its jobs.
pub struct DoNotCallEligibilityPlugin {
    records: Arc<dyn DispatchRecords>,
    category: Category,
}

impl DoNotCallEligibilityPlugin {
    pub fn new(records: Arc<dyn DispatchRecords>) -> Self {
        Self {
            records,
            category: Category::new(DNC_CATEGORY),
        }
    }
}

fn worker_from_dnc_event(event: &DomainEvent) -> Option<WorkerId> {
    match event {
        DomainEvent::WorkerDncSaved { worker_id, .. }
        | DomainEvent::WorkerDncDeleted { worker_id, .. } => Some(worker_id.clone()),
        _ => None,
    }
}

#[async_trait]
impl EligibilityPlugin for DoNotCallEligibilityPlugin {
    fn id(&self) -> &str {
        DNC_PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Do not call"
    }

    fn description(&self) -> &str {
        "Workers flagged do-not-call by the job's employer are not offered its jobs."
    }

    fn component_id(&self) -> &str {
        DNC_COMPONENT_ID
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn event_interests(&self) -> Vec<EventInterest> {
        vec![
            EventInterest::new(EventType::WorkerDncSaved, worker_from_dnc_event),
            EventInterest::new(EventType::WorkerDncDeleted, worker_from_dnc_event),
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
                DNC_CATEGORY,
                ConditionKind::NotExists,
                employer_value(&context.employer_id),
            )
        }))
    }

    async fn derive_facts(
        &self,
        worker_id: &WorkerId,
        today: NaiveDate,
    ) -> Result<Vec<EligibilityFact>, PluginError> {
        let records = self.records.do_not_call_for_worker(worker_id).await?;
        // Several records against the same employer collapse into one fact.
        let employers: BTreeSet<_> = records
            .iter()
            .filter(|record| record.is_active_on(today))
            .map(|record| employer_value(&record.employer_id))
            .collect();

        Ok(employers
            .into_iter()
            .map(|value| EligibilityFact::new(worker_id.clone(), self.category.clone(), value))
            .collect())
    }

    async fn backfill_candidates(&self, today: NaiveDate) -> Result<Vec<WorkerId>, PluginError> {
        let records = self.records.do_not_call().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.is_active_on(today))
            .map(|record| record.worker_id)
            .collect())
    }
}
