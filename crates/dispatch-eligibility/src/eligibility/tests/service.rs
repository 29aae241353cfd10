use super::common::*;

use crate::eligibility::compiler::{CompileError, Page};
use crate::eligibility::domain::JobId;
use crate::eligibility::registry::RegistryError;
use crate::eligibility::service::{EligibilityServiceError, QueryLimits};

#[tokio::test]
async fn eligible_workers_applies_every_rule_together() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.upsert_worker(worker("w-4", "Devon Park", "active"));
    harness
        .records
        .save_do_not_call(do_not_call("d-1", "w-4", "e-1"));
    harness.engine.service().backfill().await;

    let service = harness.engine.service();
    let job = JobId::new("job-1");
    let response = service
        .eligible_workers(&job, None, None)
        .await
        .expect("query runs");

    assert_eq!(names(&response.workers), vec!["Blake Rivers"]);
    assert_eq!(response.total, 1);
    assert_eq!(response.applied_conditions.len(), 4);

    harness.records.save_hold(hold("h-1", "w-2", "e-2"));
    harness.engine.service().backfill().await;
    let response = service
        .eligible_workers(&job, None, None)
        .await
        .expect("query runs");
    assert!(response.workers.is_empty());
    assert_eq!(response.total, 0);
}

#[tokio::test]
async fn held_worker_stays_eligible_for_the_holding_employer() {
    let harness = harness().await;
    harness.records.save_hold(hold("h-1", "w-2", "e-1"));
    harness.engine.service().backfill().await;

    let response = harness
        .engine
        .service()
        .eligible_workers(&JobId::new("job-1"), None, None)
        .await
        .expect("query runs");

    assert_eq!(names(&response.workers), vec!["Avery Stone", "Blake Rivers"]);
}

#[tokio::test]
async fn listing_is_ordered_and_paged() {
    let harness = harness().await;
    let service = harness.engine.service();
    let job = JobId::new("job-open");

    let everyone = service
        .eligible_workers(&job, None, None)
        .await
        .expect("query runs");
    assert_eq!(
        names(&everyone.workers),
        vec!["Avery Stone", "Blake Rivers", "Casey Moore"]
    );
    assert!(everyone.applied_conditions.is_empty());

    let page = service
        .eligible_workers(&job, Some(1), Some(1))
        .await
        .expect("query runs");
    assert_eq!(names(&page.workers), vec!["Blake Rivers"]);
    assert_eq!(page.total, 3);

    let past_end = service
        .eligible_workers(&job, Some(10), Some(5))
        .await
        .expect("query runs");
    assert!(past_end.workers.is_empty());
    assert_eq!(past_end.total, 3);
}

#[test]
fn limits_apply_default_and_cap() {
    let limits = QueryLimits {
        default_limit: 25,
        max_limit: 50,
    };

    assert_eq!(
        limits.page(None, None),
        Page {
            limit: 25,
            offset: 0
        }
    );
    assert_eq!(
        limits.page(Some(500), Some(7)),
        Page {
            limit: 50,
            offset: 7
        }
    );
}

#[tokio::test]
async fn preview_uses_the_same_compiled_query_as_the_listing() {
    let harness = harness().await;
    let service = harness.engine.service();
    let job = JobId::new("job-1");

    let preview = service
        .preview_sql(&job, Some(5), Some(10))
        .await
        .expect("preview builds");
    let listing = service
        .eligible_workers(&job, Some(5), Some(10))
        .await
        .expect("query runs");
    let (query, page) = service
        .prepare(&job, Some(5), Some(10))
        .await
        .expect("prepares");

    assert_eq!(preview.applied_conditions, listing.applied_conditions);
    assert_eq!(preview.sql, query.select_sql(page).sql);
    assert_eq!(preview.count, query.count_sql());
    assert_eq!(preview.count.params.len(), 7);
    assert_eq!(preview.explain, query.explain());
    assert!(preview.sql.ends_with("LIMIT $8 OFFSET $9"));
}

#[tokio::test]
async fn unknown_job_is_reported() {
    let harness = harness().await;

    match harness
        .engine
        .service()
        .eligible_workers(&JobId::new("missing"), None, None)
        .await
    {
        Err(EligibilityServiceError::JobNotFound(id)) => assert_eq!(id.as_str(), "missing"),
        other => panic!("expected job not found, got {other:?}"),
    }
}

#[tokio::test]
async fn queries_fail_until_components_are_loaded() {
    let harness = harness_with(Vec::new());

    let result = harness
        .engine
        .service()
        .eligible_workers(&JobId::new("job-1"), None, None)
        .await;

    assert!(matches!(
        result,
        Err(EligibilityServiceError::Compile(CompileError::Registry(
            RegistryError::GateNotInitialized
        )))
    ));
}

#[tokio::test]
async fn toggling_an_unknown_component_is_rejected() {
    let harness = harness().await;

    assert!(matches!(
        harness
            .engine
            .service()
            .set_component("dispatch.unknown", true)
            .await,
        Err(EligibilityServiceError::UnknownComponent(_))
    ));
}

#[tokio::test]
async fn worker_facts_lists_every_category() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness
        .records
        .save_do_not_call(do_not_call("d-1", "w-1", "e-3"));
    harness.engine.service().backfill().await;

    let facts = harness
        .engine
        .service()
        .worker_facts(&worker_id("w-1"))
        .await
        .expect("facts load");

    let categories: Vec<&str> = facts.iter().map(|fact| fact.category.as_str()).collect();
    assert_eq!(categories, vec!["ban", "dnc"]);
}
