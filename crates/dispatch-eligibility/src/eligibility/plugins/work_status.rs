use async_trait::async_trait;
use tracing::warn;

use crate::eligibility::domain::{Category, ConditionKind, EligibilityCondition};
use crate::eligibility::plugin::{applies_to_job, EligibilityPlugin, PluginError, QueryContext};
use crate::eligibility::records::PluginJobConfig;

pub const WORK_STATUS_PLUGIN_ID: &str = "work_status";
pub const WORK_STATUS_COMPONENT_ID: &str = "dispatch.work_status";
pub const WORK_STATUS_CATEGORY: &str = "work_status";

/// Restricts a job to workers in a configured work status.
///
/// Reads the scalar `work_status` column of the worker table, so it
/// materialises no facts and subscribes to no events.
pub struct WorkStatusEligibilityPlugin {
    category: Category,
}

impl WorkStatusEligibilityPlugin {
    pub fn new() -> Self {
        Self {
            category: Category::new(WORK_STATUS_CATEGORY),
        }
    }
}

impl Default for WorkStatusEligibilityPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EligibilityPlugin for WorkStatusEligibilityPlugin {
    fn id(&self) -> &str {
        WORK_STATUS_PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Work status"
    }

    fn description(&self) -> &str {
        "Only workers whose work status matches the job's required status are eligible."
    }

    fn component_id(&self) -> &str {
        WORK_STATUS_COMPONENT_ID
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn eligibility_condition(
        &self,
        context: &QueryContext,
        config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError> {
        let Some(config) = applies_to_job(config) else {
            return Ok(None);
        };

        match config.setting_str("status") {
            Some(status) if !status.trim().is_empty() => Ok(Some(EligibilityCondition::new(
                WORK_STATUS_CATEGORY,
                ConditionKind::Equals,
                status.trim(),
            ))),
            _ => {
                warn!(
                    job_id = %context.job_id,
                    plugin = WORK_STATUS_PLUGIN_ID,
                    "work status rule enabled without a status setting; no restriction applied"
                );
                Ok(None)
            }
        }
    }
}
