//! End-to-end scenarios for the dispatch eligibility engine.
//!
//! Everything goes through the public engine, service facade and HTTP router:
//! upstream records change, events are published, and the eligible-worker
//! listing is checked against what the records say.

mod common {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    use dispatch_eligibility::eligibility::{
        default_plugins, BanType, Category, DispatchJob, DispatchRecords, EligibilityCondition,
        EligibilityEngine, EligibilityPlugin, EmployerHold, EmployerId, FixedClock,
        InMemoryDispatchRecords, InMemoryFactStore, JobEligibilityConfig, JobId, PluginError,
        PluginJobConfig, QueryContext, StaticComponentSource, Worker, WorkerBan, WorkerId,
        DEFAULT_COMPONENTS,
    };

    pub(super) fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 3).expect("valid date")
    }

    pub(super) fn ban(id: &str, worker: &str, end_date: Option<NaiveDate>) -> WorkerBan {
        WorkerBan {
            id: id.to_string(),
            worker_id: WorkerId::new(worker),
            ban_type: BanType::Dispatch,
            start_date: today() - chrono::Duration::days(3),
            end_date,
        }
    }

    pub(super) fn hold(id: &str, worker: &str, employer: &str, days: i64) -> EmployerHold {
        EmployerHold {
            id: id.to_string(),
            worker_id: WorkerId::new(worker),
            employer_id: EmployerId::new(employer),
            start_date: today(),
            end_date: Some(today() + chrono::Duration::days(days)),
        }
    }

    pub(super) fn job(id: &str, employer: &str) -> DispatchJob {
        DispatchJob {
            id: JobId::new(id),
            employer_id: EmployerId::new(employer),
            title: "Forklift operator".to_string(),
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

    pub(super) struct World {
        pub(super) records: InMemoryDispatchRecords,
        pub(super) store: Arc<InMemoryFactStore>,
        pub(super) clock: Arc<FixedClock>,
        pub(super) engine: EligibilityEngine,
    }

    pub(super) fn world_with(extra: Vec<Arc<dyn EligibilityPlugin>>) -> World {
        let records = InMemoryDispatchRecords::new();
        for (id, name, status) in [
            ("w-1", "Jordan Ames", "active"),
            ("w-2", "Kai Brooks", "active"),
            ("w-3", "Lee Chen", "active"),
            ("w-4", "Morgan Diaz", "on_leave"),
        ] {
            records.upsert_worker(Worker {
                id: WorkerId::new(id),
                display_name: name.to_string(),
                work_status: status.to_string(),
            });
        }
        records.upsert_job(job("job-1", "acme"));
        records.upsert_job(job("job-2", "globex"));

        let store = Arc::new(InMemoryFactStore::new());
        let clock = Arc::new(FixedClock::new(today()));
        let handle: Arc<dyn DispatchRecords> = Arc::new(records.clone());
        let mut plugins = default_plugins(handle.clone());
        plugins.extend(extra);

        let engine = EligibilityEngine::builder(handle, store.clone())
            .clock(clock.clone())
            .plugins(plugins)
            .build()
            .expect("engine builds");

        World {
            records,
            store,
            clock,
            engine,
        }
    }

    pub(super) async fn world() -> World {
        let world = world_with(Vec::new());
        world
            .engine
            .initialize(&StaticComponentSource::new(DEFAULT_COMPONENTS))
            .await
            .expect("gate initializes");
        world
    }

    pub(super) async fn eligible(world: &World, job: &str) -> Vec<String> {
        world
            .engine
            .service()
            .eligible_workers(&JobId::new(job), None, None)
            .await
            .expect("query runs")
            .workers
            .into_iter()
            .map(|worker| worker.id.to_string())
            .collect()
    }

    /// Plugin whose condition source is down.
    pub(super) struct OfflinePlugin {
        category: Category,
    }

    impl OfflinePlugin {
        pub(super) fn new() -> Self {
            Self {
                category: Category::new("offline"),
            }
        }
    }

    #[async_trait]
    impl EligibilityPlugin for OfflinePlugin {
        fn id(&self) -> &str {
            "offline"
        }

        fn name(&self) -> &str {
            "Offline"
        }

        fn description(&self) -> &str {
            "Always fails to describe its condition."
        }

        fn component_id(&self) -> &str {
            "dispatch.offline"
        }

        fn category(&self) -> &Category {
            &self.category
        }

        fn eligibility_condition(
            &self,
            _context: &QueryContext,
            _config: Option<&PluginJobConfig>,
        ) -> Result<Option<EligibilityCondition>, PluginError> {
            Err(PluginError::Failed {
                plugin: "offline".to_string(),
                reason: "settings service unreachable".to_string(),
            })
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use dispatch_eligibility::eligibility::sql::{self, bind_params};
use dispatch_eligibility::eligibility::{
    eligibility_router, DoNotCall, DomainEvent, EligibilityEngine, EligibilityPlugin,
    EligibilityServiceError, EmployerId, FixedClock, JobId, SqlDispatchRecords, SqlParam,
    StaticComponentSource, Worker, WorkerId, DEBUG_TOKEN_HEADER, DEFAULT_COMPONENTS,
};
use sqlx::Row;
use tower::ServiceExt;

fn ban_saved(worker: &str, ban_id: &str) -> DomainEvent {
    DomainEvent::WorkerBanSaved {
        worker_id: WorkerId::new(worker),
        ban_id: ban_id.to_string(),
    }
}

#[tokio::test]
async fn ban_lifecycle_moves_worker_out_of_and_back_into_the_pool() {
    let world = world().await;
    assert_eq!(eligible(&world, "job-1").await, vec!["w-1", "w-2", "w-3"]);

    world.records.save_ban(ban("b-1", "w-2", None));
    world.engine.publish(ban_saved("w-2", "b-1")).settled().await;
    assert_eq!(eligible(&world, "job-1").await, vec!["w-1", "w-3"]);

    world.records.delete_ban("b-1");
    world
        .engine
        .publish(DomainEvent::WorkerBanDeleted {
            worker_id: WorkerId::new("w-2"),
            ban_id: "b-1".to_string(),
        })
        .settled()
        .await;
    assert_eq!(eligible(&world, "job-1").await, vec!["w-1", "w-2", "w-3"]);
}

#[tokio::test]
async fn rules_combine_with_and_semantics() {
    let world = world().await;
    world.records.save_ban(ban("b-1", "w-1", None));
    world.records.save_do_not_call(DoNotCall {
        id: "d-1".to_string(),
        worker_id: WorkerId::new("w-2"),
        employer_id: EmployerId::new("acme"),
        start_date: today(),
        end_date: None,
    });
    world.records.save_hold(hold("h-1", "w-3", "globex", 5));
    world.engine.service().backfill().await;

    // w-4 is on leave; every other worker trips exactly one rule for acme.
    assert!(eligible(&world, "job-1").await.is_empty());
    // globex: the ban still applies, the acme DNC does not, the hold is theirs.
    assert_eq!(eligible(&world, "job-2").await, vec!["w-2", "w-3"]);
}

#[tokio::test]
async fn backfill_twice_changes_nothing() {
    let world = world().await;
    world.records.save_ban(ban("b-1", "w-1", None));
    world.records.save_ban(ban("b-2", "w-1", None));
    world.records.save_hold(hold("h-1", "w-2", "acme", 2));

    let first = world.engine.service().backfill().await;
    let facts = world.store.facts();
    let second = world.engine.service().backfill().await;

    assert_eq!(first.entries_created, 3);
    assert_eq!(second.entries_created, 0);
    assert_eq!(world.store.facts(), facts);
}

#[tokio::test]
async fn reordered_events_converge_on_current_records() {
    let world = world().await;
    world.records.save_ban(ban("b-1", "w-3", None));
    world.records.delete_ban("b-1");

    let late_delete = world.engine.publish(DomainEvent::WorkerBanDeleted {
        worker_id: WorkerId::new("w-3"),
        ban_id: "b-1".to_string(),
    });
    let early_save = world.engine.publish(ban_saved("w-3", "b-1"));
    early_save.settled().await;
    late_delete.settled().await;

    assert!(world.store.is_empty());
    assert!(eligible(&world, "job-1").await.contains(&"w-3".to_string()));
}

#[tokio::test]
async fn categories_stay_isolated_between_plugins() {
    let world = world().await;
    world.records.save_ban(ban("b-1", "w-1", None));
    world.records.save_hold(hold("h-1", "w-1", "acme", 3));
    world.engine.service().backfill().await;
    assert_eq!(world.store.len(), 2);

    world.records.delete_hold("h-1");
    world
        .engine
        .publish(DomainEvent::WorkerHoldDeleted {
            worker_id: WorkerId::new("w-1"),
            hold_id: "h-1".to_string(),
        })
        .settled()
        .await;

    let remaining = world.store.facts();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].category.as_str(), "ban");
}

#[tokio::test]
async fn disabling_a_component_lifts_its_restriction_and_clears_facts() {
    let world = world().await;
    world.records.save_ban(ban("b-1", "w-1", None));
    world.engine.service().backfill().await;
    assert!(!eligible(&world, "job-1").await.contains(&"w-1".to_string()));

    world
        .engine
        .service()
        .set_component("dispatch.ban", false)
        .await
        .expect("toggle succeeds");

    assert!(world.store.is_empty());
    assert!(eligible(&world, "job-1").await.contains(&"w-1".to_string()));
}

async fn get_json(router: &axum::Router, uri: &str) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(
            Request::get(uri)
                .header(DEBUG_TOKEN_HEADER, "let-me-in")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK, "{uri}");
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

fn params_from_json(params: &serde_json::Value) -> Vec<SqlParam> {
    params
        .as_array()
        .expect("params array")
        .iter()
        .map(|param| match param {
            serde_json::Value::String(text) => SqlParam::Text(text.clone()),
            other => SqlParam::Integer(other.as_i64().expect("integer param")),
        })
        .collect()
}

#[tokio::test]
async fn sql_preview_returns_the_rows_the_listing_serves() {
    let pool = sql::connect("sqlite::memory:", 1).await.expect("sqlite pool");
    sql::ensure_schema(&pool).await.expect("schema created");
    let records = SqlDispatchRecords::new(pool.clone());
    for (id, name, status) in [
        ("w-1", "jordan Ames", "active"),
        ("w-2", "Kai Brooks", "active"),
        ("w-3", "lee Chen", "active"),
        ("w-4", "Morgan Diaz", "on_leave"),
        ("w-5", "Avery Fox", "active"),
        ("w-6", "blair Grey", "active"),
    ] {
        records
            .upsert_worker(&Worker {
                id: WorkerId::new(id),
                display_name: name.to_string(),
                work_status: status.to_string(),
            })
            .await
            .expect("worker saved");
    }
    records.upsert_job(&job("job-1", "e-1")).await.expect("job saved");
    records
        .save_ban(&ban("b-1", "w-2", None))
        .await
        .expect("ban saved");
    records
        .save_hold(&hold("h-1", "w-6", "e-2", 5))
        .await
        .expect("hold saved");

    let engine = EligibilityEngine::sql_builder(pool.clone())
        .clock(Arc::new(FixedClock::new(today())))
        .build()
        .expect("engine builds");
    engine
        .initialize(&StaticComponentSource::new(DEFAULT_COMPONENTS))
        .await
        .expect("gate initializes");
    engine.service().backfill().await;
    let router = eligibility_router(engine.service().clone(), Some("let-me-in".to_string()));

    let listing = get_json(
        &router,
        "/api/v1/dispatch/jobs/job-1/eligible-workers?limit=2&offset=1",
    )
    .await;
    let preview = get_json(
        &router,
        "/api/v1/dispatch/jobs/job-1/eligible-workers/sql?limit=2&offset=1",
    )
    .await;

    let select = preview["sql"].as_str().expect("sql text");
    let rows = bind_params(sqlx::query(select), &params_from_json(&preview["params"]))
        .fetch_all(&pool)
        .await
        .expect("previewed select runs");
    let direct: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "id": row.try_get::<String, _>(0).expect("id"),
                "display_name": row.try_get::<String, _>(1).expect("display_name"),
                "work_status": row.try_get::<String, _>(2).expect("work_status"),
            })
        })
        .collect();
    assert_eq!(listing["workers"], serde_json::Value::Array(direct));
    assert_eq!(
        listing["workers"][0]["display_name"],
        serde_json::json!("jordan Ames")
    );

    let count = preview["count"]["sql"].as_str().expect("count text");
    let total: i64 = bind_params(
        sqlx::query(count),
        &params_from_json(&preview["count"]["params"]),
    )
    .fetch_one(&pool)
    .await
    .expect("previewed count runs")
    .try_get(0)
    .expect("count column");
    assert_eq!(total, 3);
    assert_eq!(listing["total"], serde_json::json!(total));
    assert_eq!(preview["applied_conditions"], listing["applied_conditions"]);
}

#[tokio::test]
async fn nothing_is_written_before_components_load() {
    let world = world_with(Vec::new());
    world.records.save_ban(ban("b-1", "w-1", None));

    world.engine.publish(ban_saved("w-1", "b-1")).settled().await;
    let report = world.engine.service().backfill().await;

    assert!(world.store.is_empty());
    assert!(report.plugins.iter().all(|entry| entry.skipped));
    assert!(matches!(
        world
            .engine
            .service()
            .eligible_workers(&JobId::new("job-1"), None, None)
            .await,
        Err(EligibilityServiceError::Compile(_))
    ));
}

#[tokio::test]
async fn failing_plugin_fails_the_query_closed() {
    let world = world_with(vec![Arc::new(OfflinePlugin::new()) as Arc<dyn EligibilityPlugin>]);
    world
        .engine
        .initialize(&StaticComponentSource::new([
            "dispatch.ban",
            "dispatch.offline",
        ]))
        .await
        .expect("gate initializes");

    let result = world
        .engine
        .service()
        .eligible_workers(&JobId::new("job-1"), None, None)
        .await;

    assert!(matches!(result, Err(EligibilityServiceError::Compile(_))));
}

#[tokio::test]
async fn rollover_watch_expires_holds_when_the_date_changes() {
    let world = world().await;
    world.records.save_hold(hold("h-1", "w-1", "globex", 1));
    world.engine.service().backfill().await;
    assert!(!eligible(&world, "job-1").await.contains(&"w-1".to_string()));

    let watch = world.engine.spawn_rollover_watch(Duration::from_millis(10));
    world.clock.advance_days(2);

    let mut cleared = false;
    for _ in 0..200 {
        if world.store.is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    watch.abort();

    assert!(cleared, "rollover should reconcile expired holds");
    assert!(eligible(&world, "job-1").await.contains(&"w-1".to_string()));
}
