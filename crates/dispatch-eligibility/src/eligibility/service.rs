use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::compiler::{CompileError, CompiledQuery, EligibilityQueryCompiler, Page};
use super::compiler::render::{RenderedSql, SqlParam};
use super::components::ComponentError;
use super::domain::{AppliedCondition, EligibilityFact, JobId, WorkerId};
use super::events::{Delivery, DomainEvent};
use super::pipeline::{BackfillReport, PluginBackfill};
use super::query::{EligibleWorker, EligibleWorkerQuery, QueryError};
use super::records::{DispatchRecords, RecordsError};
use super::registry::PluginRegistry;
use super::store::StoreError;

pub const DEFAULT_RESULT_LIMIT: usize = 100;
pub const MAX_RESULT_LIMIT: usize = 1000;

/// Caller-facing result size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_RESULT_LIMIT,
            max_limit: MAX_RESULT_LIMIT,
        }
    }
}

impl QueryLimits {
    pub fn page(&self, limit: Option<usize>, offset: Option<usize>) -> Page {
        Page {
            limit: limit.unwrap_or(self.default_limit).min(self.max_limit),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibleWorkersResponse {
    pub job_id: JobId,
    pub workers: Vec<EligibleWorker>,
    pub total: usize,
    pub applied_conditions: Vec<AppliedCondition>,
}

/// The statements the list endpoint executes for one job and page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlPreview {
    pub job_id: JobId,
    pub sql: String,
    pub params: Vec<SqlParam>,
    /// Total-count statement with its own parameter list.
    pub count: RenderedSql,
    pub applied_conditions: Vec<AppliedCondition>,
    pub explain: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EligibilityServiceError {
    #[error("dispatch job {0} not found")]
    JobNotFound(JobId),
    #[error("no registered plugin belongs to component {0}")]
    UnknownComponent(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Records(#[from] RecordsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// Facade over compilation, execution, backfill and component toggles.
pub struct EligibilityService {
    records: Arc<dyn DispatchRecords>,
    registry: Arc<PluginRegistry>,
    compiler: EligibilityQueryCompiler,
    query: Arc<dyn EligibleWorkerQuery>,
    limits: QueryLimits,
}

impl EligibilityService {
    pub fn new(
        records: Arc<dyn DispatchRecords>,
        registry: Arc<PluginRegistry>,
        query: Arc<dyn EligibleWorkerQuery>,
        limits: QueryLimits,
    ) -> Self {
        let compiler = EligibilityQueryCompiler::new(Arc::clone(&registry));
        Self {
            records,
            registry,
            compiler,
            query,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// The single compilation step shared by listing and preview.
    pub async fn prepare(
        &self,
        job_id: &JobId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<(CompiledQuery, Page), EligibilityServiceError> {
        let job = self
            .records
            .job(job_id)
            .await?
            .ok_or_else(|| EligibilityServiceError::JobNotFound(job_id.clone()))?;
        let query = self.compiler.compile(&job)?;
        Ok((query, self.limits.page(limit, offset)))
    }

    pub async fn eligible_workers(
        &self,
        job_id: &JobId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<EligibleWorkersResponse, EligibilityServiceError> {
        let (query, page) = self.prepare(job_id, limit, offset).await?;
        let result = self.query.fetch(&query, page).await?;
        Ok(EligibleWorkersResponse {
            job_id: job_id.clone(),
            workers: result.workers,
            total: result.total,
            applied_conditions: query.applied_conditions(),
        })
    }

    pub async fn preview_sql(
        &self,
        job_id: &JobId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<SqlPreview, EligibilityServiceError> {
        let (query, page) = self.prepare(job_id, limit, offset).await?;
        let select = query.select_sql(page);
        Ok(SqlPreview {
            job_id: job_id.clone(),
            sql: select.sql,
            params: select.params,
            count: query.count_sql(),
            applied_conditions: query.applied_conditions(),
            explain: query.explain(),
        })
    }

    /// Hand an upstream change to the plugins subscribed to it.
    pub fn publish(&self, event: DomainEvent) -> Delivery {
        self.registry.bus().publish(event)
    }

    pub async fn backfill(&self) -> BackfillReport {
        self.registry.pipeline().backfill(&self.registry).await
    }

    /// Toggle a component and reconcile the facts of every plugin it owns.
    pub async fn set_component(
        &self,
        component_id: &str,
        enabled: bool,
    ) -> Result<Vec<PluginBackfill>, EligibilityServiceError> {
        if !self
            .registry
            .plugins()
            .iter()
            .any(|plugin| plugin.component_id() == component_id)
        {
            return Err(EligibilityServiceError::UnknownComponent(
                component_id.to_string(),
            ));
        }

        let changed = self.registry.gate().set_enabled(component_id, enabled)?;
        info!(component = component_id, enabled, changed, "component toggle requested");
        Ok(self
            .registry
            .pipeline()
            .reconcile_component(&self.registry, component_id)
            .await)
    }

    pub async fn worker_facts(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Vec<EligibilityFact>, EligibilityServiceError> {
        Ok(self
            .registry
            .pipeline()
            .store()
            .get_by_worker(worker_id)
            .await?)
    }
}
