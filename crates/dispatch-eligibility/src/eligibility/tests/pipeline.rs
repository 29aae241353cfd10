use super::common::*;
use std::sync::Arc;

use crate::eligibility::components::StaticComponentSource;
use crate::eligibility::domain::{Category, EligibilityFact, WorkerId};
use crate::eligibility::events::DomainEvent;
use crate::eligibility::plugin::{EligibilityPlugin, RecomputeOutcome};
use crate::eligibility::store::FactDelta;

fn ban_fact(worker: &str, ban_id: &str) -> EligibilityFact {
    EligibilityFact::new(
        WorkerId::new(worker),
        Category::new("ban"),
        format!("dispatch:{ban_id}"),
    )
}

fn ban_saved(worker: &str, ban_id: &str) -> DomainEvent {
    DomainEvent::WorkerBanSaved {
        worker_id: WorkerId::new(worker),
        ban_id: ban_id.to_string(),
    }
}

#[tokio::test]
async fn ban_event_materialises_and_removes_facts() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));

    harness
        .engine
        .publish(ban_saved("w-1", "b-1"))
        .settled()
        .await;
    assert_eq!(harness.facts(), vec![ban_fact("w-1", "b-1")]);

    harness.records.delete_ban("b-1");
    harness
        .engine
        .publish(DomainEvent::WorkerBanDeleted {
            worker_id: worker_id("w-1"),
            ban_id: "b-1".to_string(),
        })
        .settled()
        .await;
    assert!(harness.facts().is_empty());
}

#[tokio::test]
async fn recompute_rereads_records_regardless_of_event_order() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.save_ban(dispatch_ban("b-2", "w-1", None));
    harness.records.delete_ban("b-1");

    // Delivered out of order: the stale save arrives after the delete.
    let deleted = harness.engine.publish(DomainEvent::WorkerBanDeleted {
        worker_id: worker_id("w-1"),
        ban_id: "b-1".to_string(),
    });
    let saved_second = harness.engine.publish(ban_saved("w-1", "b-2"));
    let saved_first = harness.engine.publish(ban_saved("w-1", "b-1"));
    deleted.settled().await;
    saved_second.settled().await;
    saved_first.settled().await;

    assert_eq!(harness.facts(), vec![ban_fact("w-1", "b-2")]);
}

#[tokio::test]
async fn recompute_is_skipped_while_gate_is_uninitialised() {
    let harness = harness_with(Vec::new());
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));

    let registry = harness.engine.registry();
    let ban = registry.plugin("ban").expect("ban registered");
    let outcome = registry
        .pipeline()
        .recompute(ban.as_ref(), &worker_id("w-1"))
        .await
        .expect("recompute does not fail");

    assert_eq!(outcome, RecomputeOutcome::Skipped);
    assert!(harness.facts().is_empty());

    let report = harness.engine.service().backfill().await;
    assert!(report.plugins.iter().all(|entry| entry.skipped));
    assert_eq!(report.entries_created, 0);
}

#[tokio::test]
async fn failed_derivation_keeps_previous_facts() {
    let flaky = Arc::new(FlakyPlugin::new());
    let harness = harness_with(vec![flaky.clone() as Arc<dyn EligibilityPlugin>]);
    harness
        .engine
        .initialize(&StaticComponentSource::new([FLAKY_COMPONENT]))
        .await
        .expect("gate initializes");

    let pipeline = harness.engine.registry().pipeline();
    let outcome = pipeline
        .recompute(flaky.as_ref(), &worker_id("w-1"))
        .await
        .expect("first recompute succeeds");
    assert_eq!(
        outcome,
        RecomputeOutcome::Replaced(FactDelta {
            created: 1,
            removed: 0
        })
    );

    flaky.fail_derive(true);
    assert!(pipeline
        .recompute(flaky.as_ref(), &worker_id("w-1"))
        .await
        .is_err());
    assert_eq!(harness.facts().len(), 1, "last known facts survive");
}

#[tokio::test]
async fn backfill_is_idempotent() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.save_do_not_call(do_not_call("d-1", "w-2", "e-1"));
    harness.records.save_do_not_call(do_not_call("d-2", "w-2", "e-1"));
    harness.records.save_hold(hold("h-1", "w-3", "e-2"));

    let first = harness.engine.service().backfill().await;
    assert_eq!(first.entries_created, 3);
    let snapshot = harness.facts();

    let second = harness.engine.service().backfill().await;
    assert_eq!(second.entries_created, 0);
    assert_eq!(harness.facts(), snapshot);
    assert!(second.plugins.iter().all(|entry| entry.failures == 0));
}

#[tokio::test]
async fn backfill_cleans_up_expired_records() {
    let harness = harness().await;
    harness
        .records
        .save_ban(dispatch_ban("b-1", "w-1", Some(days_from_today(1))));
    harness.engine.service().backfill().await;
    assert_eq!(harness.facts(), vec![ban_fact("w-1", "b-1")]);

    harness.clock.advance_days(2);
    let report = harness.engine.service().backfill().await;

    assert!(harness.facts().is_empty());
    let ban = report
        .plugins
        .iter()
        .find(|entry| entry.plugin == "ban")
        .expect("ban reported");
    assert_eq!(ban.entries_removed, 1);
}

#[tokio::test]
async fn daily_rollover_reconciles_expired_facts() {
    let harness = harness().await;
    harness.records.save_hold(hold("h-1", "w-2", "e-9"));
    harness.engine.service().backfill().await;
    assert_eq!(harness.facts().len(), 1);

    harness.clock.advance_days(8);
    harness
        .engine
        .publish(DomainEvent::DailyRollover {
            date: days_from_today(8),
        })
        .settled()
        .await;

    assert!(harness.facts().is_empty());
}

#[tokio::test]
async fn disabling_a_component_clears_its_category_only() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.save_do_not_call(do_not_call("d-1", "w-2", "e-1"));
    harness.engine.service().backfill().await;
    assert_eq!(harness.facts().len(), 2);

    let results = harness
        .engine
        .service()
        .set_component("dispatch.ban", false)
        .await
        .expect("component toggles");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entries_removed, 1);

    let remaining = harness.facts();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].category.as_str(), "dnc");

    // Events for a disabled component leave the category empty.
    harness
        .engine
        .publish(ban_saved("w-1", "b-1"))
        .settled()
        .await;
    assert_eq!(harness.facts().len(), 1);

    harness
        .engine
        .service()
        .set_component("dispatch.ban", true)
        .await
        .expect("component toggles");
    assert_eq!(harness.facts().len(), 2);
}

#[tokio::test]
async fn concurrent_recomputes_for_one_worker_converge() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.save_ban(dispatch_ban("b-2", "w-1", None));

    let deliveries: Vec<_> = (0..16)
        .map(|round| {
            let ban_id = if round % 2 == 0 { "b-1" } else { "b-2" };
            harness.engine.publish(ban_saved("w-1", ban_id))
        })
        .collect();
    for delivery in deliveries {
        delivery.settled().await;
    }

    assert_eq!(
        harness.facts(),
        vec![ban_fact("w-1", "b-1"), ban_fact("w-1", "b-2")]
    );
}

#[tokio::test]
async fn events_for_one_worker_leave_other_workers_untouched() {
    let harness = harness().await;
    harness.records.save_ban(dispatch_ban("b-1", "w-1", None));
    harness.records.save_ban(dispatch_ban("b-2", "w-2", None));
    harness.engine.service().backfill().await;

    harness.records.delete_ban("b-1");
    harness
        .engine
        .publish(DomainEvent::WorkerBanDeleted {
            worker_id: worker_id("w-1"),
            ban_id: "b-1".to_string(),
        })
        .settled()
        .await;

    assert_eq!(harness.facts(), vec![ban_fact("w-2", "b-2")]);
}

#[tokio::test]
async fn backfill_reports_each_plugin_that_supports_it() {
    let harness = harness().await;
    let report = harness.engine.service().backfill().await;

    let plugins: Vec<&str> = report
        .plugins
        .iter()
        .map(|entry| entry.plugin.as_str())
        .collect();
    assert_eq!(plugins, vec!["ban", "dnc", "hfe"]);
}
