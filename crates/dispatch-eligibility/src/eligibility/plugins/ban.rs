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

pub const BAN_PLUGIN_ID: &str = "ban";
pub const BAN_COMPONENT_ID: &str = "dispatch.ban";
pub const BAN_CATEGORY: &str = "ban";

const DISPATCH_PREFIX: &str = "dispatch:";

/// Excludes workers with an active dispatch ban.
///
/// Each active ban is stored as its own fact (`dispatch:<banId>`) so the fact
/// can be traced back to the ban record that produced it.
pub struct BanEligibilityPlugin {
    records: Arc<dyn DispatchRecords>,
    category: Category,
}

impl BanEligibilityPlugin {
    pub fn new(records: Arc<dyn DispatchRecords>) -> Self {
        Self {
            records,
            category: Category::new(BAN_CATEGORY),
        }
    }
}

pub fn ban_fact_value(ban_id: &str) -> String {
    format!("{DISPATCH_PREFIX}{ban_id}")
}

fn worker_from_ban_event(event: &DomainEvent) -> Option<WorkerId> {
    match event {
        DomainEvent::WorkerBanSaved { worker_id, .. }
        | DomainEvent::WorkerBanDeleted { worker_id, .. } => Some(worker_id.clone()),
        _ => None,
    }
}

#[async_trait]
impl EligibilityPlugin for BanEligibilityPlugin {
    fn id(&self) -> &str {
        BAN_PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Dispatch ban"
    }

    fn description(&self) -> &str {
        "Workers with an active dispatch ban cannot be offered jobs."
    }

    fn component_id(&self) -> &str {
        BAN_COMPONENT_ID
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn event_interests(&self) -> Vec<EventInterest> {
        vec![
            EventInterest::new(EventType::WorkerBanSaved, worker_from_ban_event),
            EventInterest::new(EventType::WorkerBanDeleted, worker_from_ban_event),
        ]
    }

    fn supports_backfill(&self) -> bool {
        true
    }

    fn eligibility_condition(
        &self,
        _context: &QueryContext,
        config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError> {
        Ok(applies_to_job(config).map(|_| {
            EligibilityCondition::new(
                BAN_CATEGORY,
                ConditionKind::NotExistsCategory,
                format!("{DISPATCH_PREFIX}*"),
            )
        }))
    }

    async fn derive_facts(
        &self,
        worker_id: &WorkerId,
        today: NaiveDate,
    ) -> Result<Vec<EligibilityFact>, PluginError> {
        let bans = self.records.bans_for_worker(worker_id).await?;
        Ok(bans
            .iter()
            .filter(|ban| ban.blocks_dispatch_on(today))
            .map(|ban| {
                EligibilityFact::new(
                    worker_id.clone(),
                    self.category.clone(),
                    ban_fact_value(&ban.id),
                )
            })
            .collect())
    }

    async fn backfill_candidates(&self, today: NaiveDate) -> Result<Vec<WorkerId>, PluginError> {
        let bans = self.records.bans().await?;
        Ok(bans
            .into_iter()
            .filter(|ban| ban.blocks_dispatch_on(today))
            .map(|ban| ban.worker_id)
            .collect())
    }
}
