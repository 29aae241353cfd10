use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

use super::compiler::CompileError;
use super::components::ComponentError;
use super::domain::{JobId, WorkerId};
use super::events::DomainEvent;
use super::registry::RegistryError;
use super::service::{EligibilityService, EligibilityServiceError};

/// Header carrying the token that unlocks the SQL preview endpoint.
pub const DEBUG_TOKEN_HEADER: &str = "x-eligibility-debug";

#[derive(Clone)]
struct RouterState {
    service: Arc<EligibilityService>,
    debug_token: Option<Arc<str>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComponentToggle {
    enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PublishParams {
    /// Wait for every subscriber before answering.
    #[serde(default)]
    wait: bool,
}

/// Router builder exposing eligibility queries, event ingest, backfill and
/// component toggles.
///
/// With no `debug_token` the SQL preview endpoint always answers 403.
pub fn eligibility_router(service: Arc<EligibilityService>, debug_token: Option<String>) -> Router {
    let state = RouterState {
        service,
        debug_token: debug_token.map(Arc::from),
    };

    Router::new()
        .route(
            "/api/v1/dispatch/jobs/:job_id/eligible-workers",
            get(eligible_workers_handler),
        )
        .route(
            "/api/v1/dispatch/jobs/:job_id/eligible-workers/sql",
            get(sql_preview_handler),
        )
        .route("/api/v1/dispatch/events", post(publish_event_handler))
        .route(
            "/api/v1/dispatch/eligibility/backfill",
            post(backfill_handler),
        )
        .route(
            "/api/v1/dispatch/eligibility/components/:component_id",
            put(component_handler),
        )
        .route(
            "/api/v1/dispatch/workers/:worker_id/facts",
            get(worker_facts_handler),
        )
        .with_state(state)
}

async fn eligible_workers_handler(
    State(state): State<RouterState>,
    Path(job_id): Path<String>,
    Query(page): Query<PageParams>,
) -> Response {
    let job_id = JobId::new(job_id);
    match state
        .service
        .eligible_workers(&job_id, page.limit, page.offset)
        .await
    {
        Ok(body) => (StatusCode::OK, axum::Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn sql_preview_handler(
    State(state): State<RouterState>,
    Path(job_id): Path<String>,
    Query(page): Query<PageParams>,
    headers: HeaderMap,
) -> Response {
    let authorized = match (&state.debug_token, headers.get(DEBUG_TOKEN_HEADER)) {
        (Some(expected), Some(provided)) => {
            bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
        }
        _ => false,
    };
    if !authorized {
        let payload = json!({
            "error": "sql preview requires a valid debug token",
        });
        return (StatusCode::FORBIDDEN, axum::Json(payload)).into_response();
    }

    let job_id = JobId::new(job_id);
    match state
        .service
        .preview_sql(&job_id, page.limit, page.offset)
        .await
    {
        Ok(body) => (StatusCode::OK, axum::Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Upstream writers post here after committing a change to bans, do-not-call
/// records or holds.
async fn publish_event_handler(
    State(state): State<RouterState>,
    Query(params): Query<PublishParams>,
    axum::Json(event): axum::Json<DomainEvent>,
) -> Response {
    let event_type = event.event_type();
    let delivery = state.service.publish(event);
    let subscribers = delivery.subscriber_count();

    if params.wait {
        delivery.settled().await;
        let payload = json!({
            "event_type": event_type,
            "subscribers": subscribers,
            "settled": true,
        });
        return (StatusCode::OK, axum::Json(payload)).into_response();
    }

    drop(delivery);
    let payload = json!({
        "event_type": event_type,
        "subscribers": subscribers,
        "settled": false,
    });
    (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
}

async fn backfill_handler(State(state): State<RouterState>) -> Response {
    let report = state.service.backfill().await;
    (StatusCode::OK, axum::Json(report)).into_response()
}

async fn component_handler(
    State(state): State<RouterState>,
    Path(component_id): Path<String>,
    axum::Json(toggle): axum::Json<ComponentToggle>,
) -> Response {
    match state
        .service
        .set_component(&component_id, toggle.enabled)
        .await
    {
        Ok(reconciled) => {
            let payload = json!({
                "component_id": component_id,
                "enabled": toggle.enabled,
                "reconciled": reconciled,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn worker_facts_handler(
    State(state): State<RouterState>,
    Path(worker_id): Path<String>,
) -> Response {
    let worker_id = WorkerId::new(worker_id);
    match state.service.worker_facts(&worker_id).await {
        Ok(facts) => {
            let payload = json!({
                "worker_id": worker_id,
                "facts": facts,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// HTTP status for a service failure; shared with `AppError`.
pub fn status_for(err: &EligibilityServiceError) -> StatusCode {
    match err {
        EligibilityServiceError::JobNotFound(_) | EligibilityServiceError::UnknownComponent(_) => {
            StatusCode::NOT_FOUND
        }
        EligibilityServiceError::Compile(CompileError::Registry(
            RegistryError::GateNotInitialized,
        ))
        | EligibilityServiceError::Component(ComponentError::NotInitialized)
        | EligibilityServiceError::Component(ComponentError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EligibilityServiceError) -> Response {
    let status = status_for(&err);
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
