use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::AnyPool;

use crate::eligibility::clock::FixedClock;
use crate::eligibility::components::StaticComponentSource;
use crate::eligibility::domain::{
    Category, ConditionKind, EligibilityCondition, EligibilityFact, EmployerId, JobId, WorkerId,
};
use crate::eligibility::engine::EligibilityEngine;
use crate::eligibility::plugin::{EligibilityPlugin, PluginError, QueryContext};
use crate::eligibility::plugins::{default_plugins, DEFAULT_COMPONENTS};
use crate::eligibility::records::{
    BanType, DispatchJob, DispatchRecords, DoNotCall, EmployerHold, InMemoryDispatchRecords,
    JobEligibilityConfig, PluginJobConfig, Worker, WorkerBan,
};
use crate::eligibility::sql::{connect, ensure_schema, SqlDispatchRecords, SqlFactStore};
use crate::eligibility::store::InMemoryFactStore;

pub(super) const FLAKY_COMPONENT: &str = "dispatch.flaky";

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date")
}

pub(super) fn days_from_today(days: i64) -> NaiveDate {
    today() + chrono::Duration::days(days)
}

pub(super) fn worker_id(id: &str) -> WorkerId {
    WorkerId::new(id)
}

pub(super) fn worker(id: &str, display_name: &str, work_status: &str) -> Worker {
    Worker {
        id: WorkerId::new(id),
        display_name: display_name.to_string(),
        work_status: work_status.to_string(),
    }
}

pub(super) fn dispatch_ban(id: &str, worker: &str, end_date: Option<NaiveDate>) -> WorkerBan {
    WorkerBan {
        id: id.to_string(),
        worker_id: WorkerId::new(worker),
        ban_type: BanType::Dispatch,
        start_date: days_from_today(-5),
        end_date,
    }
}

pub(super) fn do_not_call(id: &str, worker: &str, employer: &str) -> DoNotCall {
    DoNotCall {
        id: id.to_string(),
        worker_id: WorkerId::new(worker),
        employer_id: EmployerId::new(employer),
        start_date: days_from_today(-30),
        end_date: None,
    }
}

pub(super) fn hold(id: &str, worker: &str, employer: &str) -> EmployerHold {
    EmployerHold {
        id: id.to_string(),
        worker_id: WorkerId::new(worker),
        employer_id: EmployerId::new(employer),
        start_date: days_from_today(-1),
        end_date: Some(days_from_today(7)),
    }
}

/// Job opted into every built-in rule, requiring `active` workers.
pub(super) fn strict_job(id: &str, employer: &str) -> DispatchJob {
    DispatchJob {
        id: JobId::new(id),
        employer_id: EmployerId::new(employer),
        title: "Warehouse picker".to_string(),
        eligibility: JobEligibilityConfig::new()
            .with_plugin("ban", PluginJobConfig::enabled())
            .with_plugin("dnc", PluginJobConfig::enabled())
            .with_plugin("hfe", PluginJobConfig::enabled())
            .with_plugin(
                "work_status",
                PluginJobConfig::with_settings(json!({ "status": "active" })),
            ),
    }
}

pub(super) fn open_job(id: &str, employer: &str) -> DispatchJob {
    DispatchJob {
        id: JobId::new(id),
        employer_id: EmployerId::new(employer),
        title: "Event staff".to_string(),
        eligibility: JobEligibilityConfig::new(),
    }
}

pub(super) fn query_context(employer: &str) -> QueryContext {
    QueryContext {
        job_id: JobId::new("job-1"),
        employer_id: EmployerId::new(employer),
        today: today(),
    }
}

/// Roster used by most tests: two active workers and one inactive.
pub(super) fn seed_workers(records: &InMemoryDispatchRecords) {
    records.upsert_worker(worker("w-1", "Avery Stone", "active"));
    records.upsert_worker(worker("w-2", "Blake Rivers", "active"));
    records.upsert_worker(worker("w-3", "Casey Moore", "inactive"));
}

pub(super) struct Harness {
    pub(super) records: InMemoryDispatchRecords,
    pub(super) store: Arc<InMemoryFactStore>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) engine: EligibilityEngine,
}

impl Harness {
    pub(super) fn records_handle(&self) -> Arc<dyn DispatchRecords> {
        Arc::new(self.records.clone())
    }

    pub(super) fn facts(&self) -> Vec<EligibilityFact> {
        self.store.facts()
    }
}

/// Engine with the built-in plugins plus any `extra` plugins, not yet initialised.
pub(super) fn harness_with(extra: Vec<Arc<dyn EligibilityPlugin>>) -> Harness {
    let records = InMemoryDispatchRecords::new();
    seed_workers(&records);
    records.upsert_job(strict_job("job-1", "e-1"));
    records.upsert_job(open_job("job-open", "e-1"));

    let store = Arc::new(InMemoryFactStore::new());
    let clock = Arc::new(FixedClock::new(today()));
    let handle: Arc<dyn DispatchRecords> = Arc::new(records.clone());
    let mut plugins = default_plugins(handle.clone());
    plugins.extend(extra);

    let engine = EligibilityEngine::builder(handle, store.clone())
        .clock(clock.clone())
        .plugins(plugins)
        .backfill_concurrency(4)
        .build()
        .expect("engine builds");

    Harness {
        records,
        store,
        clock,
        engine,
    }
}

/// Built-in plugins, every default component enabled and the gate initialised.
pub(super) async fn harness() -> Harness {
    let harness = harness_with(Vec::new());
    harness
        .engine
        .initialize(&StaticComponentSource::new(DEFAULT_COMPONENTS))
        .await
        .expect("gate initializes");
    harness
}

/// Names that sort differently by byte order and by case-folded order.
pub(super) fn mixed_case_roster() -> Vec<Worker> {
    vec![
        worker("w-1", "avery Stone", "active"),
        worker("w-2", "Blake Rivers", "active"),
        worker("w-3", "casey Moore", "inactive"),
        worker("w-4", "Drew Adams", "active"),
        worker("w-5", "erin Fox", "active"),
        worker("w-6", "Finn Ortiz", "active"),
        worker("w-7", "Avery Stone", "active"),
    ]
}

pub(super) struct SqlHarness {
    pub(super) pool: AnyPool,
    pub(super) records: SqlDispatchRecords,
    pub(super) store: SqlFactStore,
    pub(super) engine: EligibilityEngine,
}

pub(super) async fn memory_pool() -> AnyPool {
    let pool = connect("sqlite::memory:", 1).await.expect("sqlite pool");
    ensure_schema(&pool).await.expect("schema created");
    pool
}

/// Engine on an in-memory SQLite database holding `roster` and the usual
/// jobs, gate initialised.
pub(super) async fn sql_harness(roster: &[Worker]) -> SqlHarness {
    let pool = memory_pool().await;
    let records = SqlDispatchRecords::new(pool.clone());
    for worker in roster {
        records.upsert_worker(worker).await.expect("worker saved");
    }
    records
        .upsert_job(&strict_job("job-1", "e-1"))
        .await
        .expect("job saved");
    records
        .upsert_job(&open_job("job-open", "e-1"))
        .await
        .expect("job saved");

    let engine = EligibilityEngine::sql_builder(pool.clone())
        .clock(Arc::new(FixedClock::new(today())))
        .backfill_concurrency(4)
        .build()
        .expect("engine builds");
    engine
        .initialize(&StaticComponentSource::new(DEFAULT_COMPONENTS))
        .await
        .expect("gate initializes");

    SqlHarness {
        store: SqlFactStore::new(pool.clone()),
        pool,
        records,
        engine,
    }
}

/// Plugin whose condition and fact derivation can be made to fail on demand.
pub(super) struct FlakyPlugin {
    category: Category,
    fail_condition: AtomicBool,
    fail_derive: AtomicBool,
}

impl FlakyPlugin {
    pub(super) fn new() -> Self {
        Self {
            category: Category::new("flaky"),
            fail_condition: AtomicBool::new(false),
            fail_derive: AtomicBool::new(false),
        }
    }

    pub(super) fn fail_condition(&self, fail: bool) {
        self.fail_condition.store(fail, Ordering::SeqCst);
    }

    pub(super) fn fail_derive(&self, fail: bool) {
        self.fail_derive.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EligibilityPlugin for FlakyPlugin {
    fn id(&self) -> &str {
        "flaky"
    }

    fn name(&self) -> &str {
        "Flaky"
    }

    fn description(&self) -> &str {
        "Test plugin with switchable failures."
    }

    fn component_id(&self) -> &str {
        FLAKY_COMPONENT
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn supports_backfill(&self) -> bool {
        true
    }

    fn eligibility_condition(
        &self,
        _context: &QueryContext,
        _config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError> {
        if self.fail_condition.load(Ordering::SeqCst) {
            return Err(PluginError::Failed {
                plugin: "flaky".to_string(),
                reason: "condition source offline".to_string(),
            });
        }
        Ok(Some(EligibilityCondition::new(
            "flaky",
            ConditionKind::NotExists,
            "blocked",
        )))
    }

    async fn derive_facts(
        &self,
        worker_id: &WorkerId,
        _today: NaiveDate,
    ) -> Result<Vec<EligibilityFact>, PluginError> {
        if self.fail_derive.load(Ordering::SeqCst) {
            return Err(PluginError::Failed {
                plugin: "flaky".to_string(),
                reason: "upstream read failed".to_string(),
            });
        }
        Ok(vec![EligibilityFact::new(
            worker_id.clone(),
            self.category.clone(),
            "blocked",
        )])
    }

    async fn backfill_candidates(&self, _today: NaiveDate) -> Result<Vec<WorkerId>, PluginError> {
        Ok(vec![WorkerId::new("w-2")])
    }
}

/// Plugin that tries to constrain a category it does not own.
pub(super) struct TrespassingPlugin {
    category: Category,
}

impl TrespassingPlugin {
    pub(super) fn new() -> Self {
        Self {
            category: Category::new("trespass"),
        }
    }
}

#[async_trait]
impl EligibilityPlugin for TrespassingPlugin {
    fn id(&self) -> &str {
        "trespass"
    }

    fn name(&self) -> &str {
        "Trespass"
    }

    fn description(&self) -> &str {
        "Test plugin referencing another plugin's category."
    }

    fn component_id(&self) -> &str {
        "dispatch.trespass"
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn eligibility_condition(
        &self,
        _context: &QueryContext,
        _config: Option<&PluginJobConfig>,
    ) -> Result<Option<EligibilityCondition>, PluginError> {
        Ok(Some(EligibilityCondition::new(
            "ban",
            ConditionKind::NotExists,
            "dispatch:b-1",
        )))
    }
}

pub(super) fn names(workers: &[crate::eligibility::query::EligibleWorker]) -> Vec<&str> {
    workers
        .iter()
        .map(|worker| worker.display_name.as_str())
        .collect()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
