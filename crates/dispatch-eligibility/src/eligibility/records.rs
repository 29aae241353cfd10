//! Authoritative upstream records that plugins derive facts from.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{EmployerId, JobId, WorkerId};

/// Physical names of the worker table joined by compiled queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTable {
    pub table: &'static str,
    pub id_column: &'static str,
    pub display_name_column: &'static str,
    pub work_status_column: &'static str,
}

pub const WORKER_TABLE: WorkerTable = WorkerTable {
    table: "workers",
    id_column: "id",
    display_name_column: "display_name",
    work_status_column: "work_status",
};

/// Day-granularity window check shared by every dated record.
///
/// Active when `today >= start` and the end date is absent or `today <= end`.
pub fn active_on(start: NaiveDate, end: Option<NaiveDate>, today: NaiveDate) -> bool {
    today >= start && end.map_or(true, |end| today <= end)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub display_name: String,
    pub work_status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanType {
    Dispatch,
    Benefits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBan {
    pub id: String,
    pub worker_id: WorkerId,
    pub ban_type: BanType,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl WorkerBan {
    pub fn blocks_dispatch_on(&self, today: NaiveDate) -> bool {
        self.ban_type == BanType::Dispatch && active_on(self.start_date, self.end_date, today)
    }
}

/// Employer request that a worker not be offered its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoNotCall {
    pub id: String,
    pub worker_id: WorkerId,
    pub employer_id: EmployerId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl DoNotCall {
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        active_on(self.start_date, self.end_date, today)
    }
}

/// Worker reserved for one employer; other employers cannot be offered them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerHold {
    pub id: String,
    pub worker_id: WorkerId,
    pub employer_id: EmployerId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl EmployerHold {
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        active_on(self.start_date, self.end_date, today)
    }
}

/// Per-plugin settings for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginJobConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn enabled_by_default() -> bool {
    true
}

impl PluginJobConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_settings(settings: serde_json::Value) -> Self {
        Self {
            enabled: true,
            settings,
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Which eligibility rules apply to a job, keyed by plugin id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobEligibilityConfig {
    plugins: BTreeMap<String, PluginJobConfig>,
}

impl JobEligibilityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin_id: impl Into<String>, config: PluginJobConfig) -> Self {
        self.plugins.insert(plugin_id.into(), config);
        self
    }

    pub fn set(&mut self, plugin_id: impl Into<String>, config: PluginJobConfig) {
        self.plugins.insert(plugin_id.into(), config);
    }

    pub fn remove(&mut self, plugin_id: &str) -> Option<PluginJobConfig> {
        self.plugins.remove(plugin_id)
    }

    pub fn for_plugin(&self, plugin_id: &str) -> Option<&PluginJobConfig> {
        self.plugins.get(plugin_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: JobId,
    pub employer_id: EmployerId,
    pub title: String,
    #[serde(default)]
    pub eligibility: JobEligibilityConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{table} row {id} is malformed: {reason}")]
    Corrupt {
        table: &'static str,
        id: String,
        reason: String,
    },
}

/// Read access to the upstream tables owned by the rest of the system.
#[async_trait]
pub trait DispatchRecords: Send + Sync {
    async fn worker(&self, id: &WorkerId) -> Result<Option<Worker>, RecordsError>;
    async fn workers(&self) -> Result<Vec<Worker>, RecordsError>;
    async fn job(&self, id: &JobId) -> Result<Option<DispatchJob>, RecordsError>;
    async fn bans_for_worker(&self, id: &WorkerId) -> Result<Vec<WorkerBan>, RecordsError>;
    async fn bans(&self) -> Result<Vec<WorkerBan>, RecordsError>;
    async fn do_not_call_for_worker(&self, id: &WorkerId) -> Result<Vec<DoNotCall>, RecordsError>;
    async fn do_not_call(&self) -> Result<Vec<DoNotCall>, RecordsError>;
    async fn holds_for_worker(&self, id: &WorkerId) -> Result<Vec<EmployerHold>, RecordsError>;
    async fn holds(&self) -> Result<Vec<EmployerHold>, RecordsError>;
}

#[derive(Debug, Default)]
struct RecordTables {
    workers: BTreeMap<WorkerId, Worker>,
    jobs: HashMap<JobId, DispatchJob>,
    bans: BTreeMap<String, WorkerBan>,
    do_not_call: BTreeMap<String, DoNotCall>,
    holds: BTreeMap<String, EmployerHold>,
}

/// In-memory record tables with the write helpers upstream CRUD would provide.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDispatchRecords {
    tables: Arc<RwLock<RecordTables>>,
}

impl InMemoryDispatchRecords {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RecordTables> {
        self.tables.write().expect("record tables lock poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RecordTables> {
        self.tables.read().expect("record tables lock poisoned")
    }

    pub fn upsert_worker(&self, worker: Worker) {
        self.write().workers.insert(worker.id.clone(), worker);
    }

    pub fn remove_worker(&self, id: &WorkerId) -> Option<Worker> {
        self.write().workers.remove(id)
    }

    pub fn upsert_job(&self, job: DispatchJob) {
        self.write().jobs.insert(job.id.clone(), job);
    }

    pub fn save_ban(&self, ban: WorkerBan) {
        self.write().bans.insert(ban.id.clone(), ban);
    }

    pub fn delete_ban(&self, id: &str) -> Option<WorkerBan> {
        self.write().bans.remove(id)
    }

    pub fn save_do_not_call(&self, record: DoNotCall) {
        self.write().do_not_call.insert(record.id.clone(), record);
    }

    pub fn delete_do_not_call(&self, id: &str) -> Option<DoNotCall> {
        self.write().do_not_call.remove(id)
    }

    pub fn save_hold(&self, hold: EmployerHold) {
        self.write().holds.insert(hold.id.clone(), hold);
    }

    pub fn delete_hold(&self, id: &str) -> Option<EmployerHold> {
        self.write().holds.remove(id)
    }
}

#[async_trait]
impl DispatchRecords for InMemoryDispatchRecords {
    async fn worker(&self, id: &WorkerId) -> Result<Option<Worker>, RecordsError> {
        Ok(self.read().workers.get(id).cloned())
    }

    async fn workers(&self) -> Result<Vec<Worker>, RecordsError> {
        Ok(self.read().workers.values().cloned().collect())
    }

    async fn job(&self, id: &JobId) -> Result<Option<DispatchJob>, RecordsError> {
        Ok(self.read().jobs.get(id).cloned())
    }

    async fn bans_for_worker(&self, id: &WorkerId) -> Result<Vec<WorkerBan>, RecordsError> {
        Ok(self
            .read()
            .bans
            .values()
            .filter(|ban| &ban.worker_id == id)
            .cloned()
            .collect())
    }

    async fn bans(&self) -> Result<Vec<WorkerBan>, RecordsError> {
        Ok(self.read().bans.values().cloned().collect())
    }

    async fn do_not_call_for_worker(&self, id: &WorkerId) -> Result<Vec<DoNotCall>, RecordsError> {
        Ok(self
            .read()
            .do_not_call
            .values()
            .filter(|record| &record.worker_id == id)
            .cloned()
            .collect())
    }

    async fn do_not_call(&self) -> Result<Vec<DoNotCall>, RecordsError> {
        Ok(self.read().do_not_call.values().cloned().collect())
    }

    async fn holds_for_worker(&self, id: &WorkerId) -> Result<Vec<EmployerHold>, RecordsError> {
        Ok(self
            .read()
            .holds
            .values()
            .filter(|hold| &hold.worker_id == id)
            .cloned()
            .collect())
    }

    async fn holds(&self) -> Result<Vec<EmployerHold>, RecordsError> {
        Ok(self.read().holds.values().cloned().collect())
    }
}
