//! Built-in rule families.

pub mod ban;
pub mod dnc;
pub mod hfe;
pub mod work_status;

use std::sync::Arc;

pub use ban::{BanEligibilityPlugin, BAN_CATEGORY, BAN_COMPONENT_ID, BAN_PLUGIN_ID};
pub use dnc::{DoNotCallEligibilityPlugin, DNC_CATEGORY, DNC_COMPONENT_ID, DNC_PLUGIN_ID};
pub use hfe::{HoldForEmployerPlugin, HFE_CATEGORY, HFE_COMPONENT_ID, HFE_PLUGIN_ID};
pub use work_status::{
    WorkStatusEligibilityPlugin, WORK_STATUS_CATEGORY, WORK_STATUS_COMPONENT_ID,
    WORK_STATUS_PLUGIN_ID,
};

use super::domain::EmployerId;
use super::plugin::EligibilityPlugin;
use super::records::DispatchRecords;

/// Component ids of every built-in plugin.
pub const DEFAULT_COMPONENTS: [&str; 4] = [
    BAN_COMPONENT_ID,
    DNC_COMPONENT_ID,
    HFE_COMPONENT_ID,
    WORK_STATUS_COMPONENT_ID,
];

pub(crate) fn employer_value(employer_id: &EmployerId) -> String {
    format!("employer:{employer_id}")
}

/// The built-in plugins in registration order.
pub fn default_plugins(records: Arc<dyn DispatchRecords>) -> Vec<Arc<dyn EligibilityPlugin>> {
    vec![
        Arc::new(BanEligibilityPlugin::new(records.clone())),
        Arc::new(DoNotCallEligibilityPlugin::new(records.clone())),
        Arc::new(HoldForEmployerPlugin::new(records)),
        Arc::new(WorkStatusEligibilityPlugin::new()),
    ]
}
