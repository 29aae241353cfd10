use crate::infra::{build_cli_engine, build_demo_engine, parse_date, EngineHandles, DEMO_EMPLOYER};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use dispatch_eligibility::config::AppConfig;
use dispatch_eligibility::eligibility::{
    BackfillReport, BanType, DomainEvent, EligibleWorkersResponse, JobId, WorkerBan, WorkerId,
};
use dispatch_eligibility::error::AppError;
use dispatch_eligibility::telemetry;

#[derive(Args, Debug, Default)]
pub(crate) struct BackfillArgs {
    /// Business date for active-window checks (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct PreviewArgs {
    /// Job to compile the eligibility query for
    #[arg(long)]
    pub(crate) job: String,
    /// Page size (capped by ELIGIBILITY_MAX_LIMIT)
    #[arg(long)]
    pub(crate) limit: Option<usize>,
    /// Rows to skip
    #[arg(long)]
    pub(crate) offset: Option<usize>,
    /// Business date for active-window checks (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Business date the demo starts on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

pub(crate) async fn run_backfill(args: BackfillArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let handles = build_cli_engine(&config, args.today).await?;
    let report = handles.engine.service().backfill().await;
    render_backfill(&report);
    println!("{} facts stored", handles.store.count().await?);
    Ok(())
}

pub(crate) async fn run_preview(args: PreviewArgs) -> Result<(), AppError> {
    let PreviewArgs {
        job,
        limit,
        offset,
        today,
    } = args;
    let config = AppConfig::load()?;

    let handles = build_cli_engine(&config, today).await?;
    let service = handles.engine.service();
    service.backfill().await;

    let job_id = JobId::new(job);
    let preview = service.preview_sql(&job_id, limit, offset).await?;
    println!("Eligibility query for job {}", job_id);
    for line in &preview.explain {
        println!("  - {line}");
    }
    println!("\n{}", preview.sql);
    let params = serde_json::to_string(&preview.params).unwrap_or_else(|_| "[]".to_string());
    println!("params: {params}");
    println!("\n{}", preview.count.sql);
    let params =
        serde_json::to_string(&preview.count.params).unwrap_or_else(|_| "[]".to_string());
    println!("params: {params}");

    let listing = service.eligible_workers(&job_id, limit, offset).await?;
    println!();
    render_listing(&listing);
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let config = AppConfig::load()?;

    println!("Dispatch eligibility demo ({today})");
    let handles = build_demo_engine(&config.eligibility, Some(today)).await?;
    let EngineHandles {
        engine, records, ..
    } = &handles;
    let service = engine.service();
    let loader = JobId::new("job-100");
    let setup = JobId::new("job-200");

    println!("\nInitial backfill");
    render_backfill(&service.backfill().await);

    println!("\nStarting pools");
    render_listing(&service.eligible_workers(&loader, None, None).await?);
    render_listing(&service.eligible_workers(&setup, None, None).await?);

    println!("\nBan saved for Alex Rivera (w-100)");
    records
        .save_ban(&WorkerBan {
            id: "ban-demo".to_string(),
            worker_id: WorkerId::new("w-100"),
            ban_type: BanType::Dispatch,
            start_date: today,
            end_date: Some(today + Duration::days(1)),
        })
        .await?;
    engine
        .publish(DomainEvent::WorkerBanSaved {
            worker_id: WorkerId::new("w-100"),
            ban_id: "ban-demo".to_string(),
        })
        .settled()
        .await;
    render_listing(&service.eligible_workers(&loader, None, None).await?);

    println!("\nBan lifted");
    records.delete_ban("ban-demo").await?;
    engine
        .publish(DomainEvent::WorkerBanDeleted {
            worker_id: WorkerId::new("w-100"),
            ban_id: "ban-demo".to_string(),
        })
        .settled()
        .await;
    render_listing(&service.eligible_workers(&loader, None, None).await?);

    println!("\nDo-not-call component switched off");
    let reconciled = service.set_component("dispatch.dnc", false).await?;
    for entry in &reconciled {
        println!(
            "- {}: {} facts removed",
            entry.plugin, entry.entries_removed
        );
    }
    render_listing(&service.eligible_workers(&loader, None, None).await?);
    service.set_component("dispatch.dnc", true).await?;

    println!("\nCompiled query for {loader}");
    let preview = service.preview_sql(&loader, None, None).await?;
    println!("{}", preview.sql);
    for line in &preview.explain {
        println!("  - {line}");
    }

    println!(
        "\nWorkers for {DEMO_EMPLOYER} must be active, unbanned, not on the employer's do-not-call list and not held elsewhere."
    );
    Ok(())
}

fn render_backfill(report: &BackfillReport) {
    for entry in &report.plugins {
        if entry.skipped {
            println!("- {}: skipped (component disabled)", entry.plugin);
            continue;
        }
        println!(
            "- {}: {} workers | +{} / -{} facts | {} failures",
            entry.plugin,
            entry.workers_processed,
            entry.entries_created,
            entry.entries_removed,
            entry.failures
        );
    }
    println!(
        "Total: {} workers processed, {} facts created",
        report.workers_processed, report.entries_created
    );
}

fn render_listing(listing: &EligibleWorkersResponse) {
    println!(
        "Job {}: {} eligible worker(s)",
        listing.job_id, listing.total
    );
    for worker in &listing.workers {
        println!(
            "  - {} ({}) [{}]",
            worker.display_name, worker.id, worker.work_status
        );
    }
    if listing.applied_conditions.is_empty() {
        println!("  no eligibility rules applied");
    } else {
        let rules: Vec<String> = listing
            .applied_conditions
            .iter()
            .map(|applied| format!("{}={}", applied.plugin_id, applied.condition.summary()))
            .collect();
        println!("  rules: {}", rules.join(", "));
    }
}
