use crate::cli::ServeArgs;
use crate::infra::{build_database_engine, AppState};
use crate::routes::with_eligibility_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use dispatch_eligibility::config::AppConfig;
use dispatch_eligibility::error::AppError;
use dispatch_eligibility::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let handles =
        build_database_engine(&config.database, &config.eligibility, None).await?;
    if config.eligibility.backfill_on_start {
        let report = handles.engine.service().backfill().await;
        info!(
            workers_processed = report.workers_processed,
            entries_created = report.entries_created,
            "startup backfill finished"
        );
    }
    let _rollover = handles
        .engine
        .spawn_rollover_watch(config.eligibility.rollover_check);

    let app = with_eligibility_routes(
        handles.engine.service().clone(),
        config.eligibility.debug_token.clone(),
    )
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        components = ?config.eligibility.components,
        "dispatch eligibility service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
