use chrono::{Duration, NaiveDate};
use dispatch_eligibility::config::{AppConfig, DatabaseConfig, EligibilityConfig};
use dispatch_eligibility::eligibility::sql::{connect, ensure_schema};
use dispatch_eligibility::eligibility::{
    BanType, Clock, DispatchJob, DoNotCall, EligibilityEngine, EmployerHold, EmployerId,
    FixedClock, JobEligibilityConfig, JobId, PluginJobConfig, QueryLimits, RecordsError,
    SqlDispatchRecords, SqlFactStore, StaticComponentSource, SystemClock, Worker, WorkerBan,
    WorkerId,
};
use dispatch_eligibility::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use sqlx::AnyPool;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Engine plus the handles the CLI and server poke at directly.
pub(crate) struct EngineHandles {
    pub(crate) engine: EligibilityEngine,
    pub(crate) records: SqlDispatchRecords,
    pub(crate) store: SqlFactStore,
}

const DEMO_DATABASE_URL: &str = "sqlite::memory:";

/// Engine over the configured database. Records are never seeded here.
pub(crate) async fn build_database_engine(
    database: &DatabaseConfig,
    eligibility: &EligibilityConfig,
    today: Option<NaiveDate>,
) -> Result<EngineHandles, AppError> {
    let url = database.require_url()?;
    let pool = connect(url, database.max_connections).await?;
    ensure_schema(&pool).await?;
    info!(
        max_connections = database.max_connections,
        "eligibility database connected"
    );
    assemble(pool, eligibility, clock_for(today)).await
}

/// Engine over a throwaway in-memory database holding the demo roster.
///
/// `today` pins the business date; otherwise the local wall clock is used.
pub(crate) async fn build_demo_engine(
    config: &EligibilityConfig,
    today: Option<NaiveDate>,
) -> Result<EngineHandles, AppError> {
    let pool = connect(DEMO_DATABASE_URL, 1).await?;
    ensure_schema(&pool).await?;
    let clock = clock_for(today);
    let seeded_on = clock.today();
    let handles = assemble(pool, config, clock).await?;
    seed_demo_records(&handles.records, seeded_on).await?;
    Ok(handles)
}

/// Backfill and preview read the configured database when there is one and
/// fall back to the demo roster otherwise.
pub(crate) async fn build_cli_engine(
    config: &AppConfig,
    today: Option<NaiveDate>,
) -> Result<EngineHandles, AppError> {
    if config.database.url.is_some() {
        return build_database_engine(&config.database, &config.eligibility, today).await;
    }
    build_demo_engine(&config.eligibility, today).await
}

fn clock_for(today: Option<NaiveDate>) -> Arc<dyn Clock> {
    match today {
        Some(date) => Arc::new(FixedClock::new(date)),
        None => Arc::new(SystemClock),
    }
}

async fn assemble(
    pool: AnyPool,
    config: &EligibilityConfig,
    clock: Arc<dyn Clock>,
) -> Result<EngineHandles, AppError> {
    let engine = EligibilityEngine::sql_builder(pool.clone())
        .clock(clock)
        .limits(QueryLimits {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        })
        .backfill_concurrency(config.backfill_concurrency)
        .build()?;

    engine
        .initialize(&StaticComponentSource::new(config.components.iter().cloned()))
        .await?;

    Ok(EngineHandles {
        engine,
        records: SqlDispatchRecords::new(pool.clone()),
        store: SqlFactStore::new(pool),
    })
}

pub(crate) const DEMO_EMPLOYER: &str = "northwind";
pub(crate) const OTHER_EMPLOYER: &str = "contoso";

/// Small roster covering each rule family.
pub(crate) async fn seed_demo_records(
    records: &SqlDispatchRecords,
    today: NaiveDate,
) -> Result<(), RecordsError> {
    let roster = [
        ("w-100", "Alex Rivera", "active"),
        ("w-101", "Bailey Chen", "active"),
        ("w-102", "Cameron Ortiz", "active"),
        ("w-103", "Dana Whitfield", "active"),
        ("w-104", "Emerson Hale", "inactive"),
        ("w-105", "Finley Brooks", "active"),
    ];
    for (id, name, status) in roster {
        records
            .upsert_worker(&Worker {
                id: WorkerId::new(id),
                display_name: name.to_string(),
                work_status: status.to_string(),
            })
            .await?;
    }

    records
        .save_ban(&WorkerBan {
            id: "ban-1".to_string(),
            worker_id: WorkerId::new("w-101"),
            ban_type: BanType::Dispatch,
            start_date: today - Duration::days(10),
            end_date: Some(today + Duration::days(20)),
        })
        .await?;
    records
        .save_ban(&WorkerBan {
            id: "ban-2".to_string(),
            worker_id: WorkerId::new("w-105"),
            ban_type: BanType::Benefits,
            start_date: today - Duration::days(3),
            end_date: None,
        })
        .await?;
    records
        .save_do_not_call(&DoNotCall {
            id: "dnc-1".to_string(),
            worker_id: WorkerId::new("w-102"),
            employer_id: EmployerId::new(DEMO_EMPLOYER),
            start_date: today - Duration::days(30),
            end_date: None,
        })
        .await?;
    records
        .save_hold(&EmployerHold {
            id: "hold-1".to_string(),
            worker_id: WorkerId::new("w-103"),
            employer_id: EmployerId::new(OTHER_EMPLOYER),
            start_date: today,
            end_date: Some(today + Duration::days(2)),
        })
        .await?;

    records
        .upsert_job(&DispatchJob {
            id: JobId::new("job-100"),
            employer_id: EmployerId::new(DEMO_EMPLOYER),
            title: "Night shift loader".to_string(),
            eligibility: JobEligibilityConfig::new()
                .with_plugin("ban", PluginJobConfig::enabled())
                .with_plugin("dnc", PluginJobConfig::enabled())
                .with_plugin("hfe", PluginJobConfig::enabled())
                .with_plugin(
                    "work_status",
                    PluginJobConfig::with_settings(json!({ "status": "active" })),
                ),
        })
        .await?;
    records
        .upsert_job(&DispatchJob {
            id: JobId::new("job-200"),
            employer_id: EmployerId::new(OTHER_EMPLOYER),
            title: "Event setup crew".to_string(),
            eligibility: JobEligibilityConfig::new()
                .with_plugin("ban", PluginJobConfig::enabled())
                .with_plugin("hfe", PluginJobConfig::enabled()),
        })
        .await?;
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
