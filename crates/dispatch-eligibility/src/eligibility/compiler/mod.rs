//! Compiles the active plugins' conditions for a job into one query.
//!
//! The list endpoint and the SQL preview both go through
//! [`EligibilityQueryCompiler::compile`], so the statement shown for debugging
//! is the statement that runs.

pub mod ir;
pub mod render;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::domain::{AppliedCondition, EligibilityCondition, EligibilityFact, JobId};
use super::plugin::{PluginError, QueryContext};
use super::records::{DispatchJob, Worker, WorkerTable, WORKER_TABLE};
use super::registry::{PluginRegistry, RegistryError};
use super::store::FactTable;
use ir::{LoweringError, Predicate};
use render::{render_count, render_select, RenderedSql};

/// Window over the ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("plugin {plugin} failed to build its eligibility condition: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
    #[error("plugin {plugin} returned invalid condition {condition}: {reason}")]
    InvalidCondition {
        plugin: String,
        condition: String,
        reason: LoweringError,
    },
    #[error("plugin {plugin} referenced category {category}, which it does not own")]
    ForeignCategory { plugin: String, category: String },
}

/// One plugin's contribution after lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledClause {
    pub plugin_id: String,
    pub condition: EligibilityCondition,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub job_id: JobId,
    pub clauses: Vec<CompiledClause>,
    fact_table: FactTable,
    worker_table: WorkerTable,
}

impl CompiledQuery {
    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.clauses.iter().map(|clause| &clause.predicate)
    }

    pub fn applied_conditions(&self) -> Vec<AppliedCondition> {
        self.clauses
            .iter()
            .map(|clause| AppliedCondition {
                plugin_id: clause.plugin_id.clone(),
                condition: clause.condition.clone(),
            })
            .collect()
    }

    pub fn select_sql(&self, page: Page) -> RenderedSql {
        render_select(self.predicates(), page, &self.fact_table, &self.worker_table)
    }

    pub fn count_sql(&self) -> RenderedSql {
        render_count(self.predicates(), &self.fact_table, &self.worker_table)
    }

    /// Human-readable line per clause.
    pub fn explain(&self) -> Vec<String> {
        self.clauses
            .iter()
            .map(|clause| format!("{}: {}", clause.plugin_id, clause.predicate.describe()))
            .collect()
    }

    /// All clauses hold for this worker.
    pub fn matches(&self, worker: &Worker, facts: &[EligibilityFact]) -> bool {
        self.predicates()
            .all(|predicate| predicate.matches(worker, facts))
    }
}

pub struct EligibilityQueryCompiler {
    registry: Arc<PluginRegistry>,
    fact_table: FactTable,
    worker_table: WorkerTable,
}

impl EligibilityQueryCompiler {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        let fact_table = registry.pipeline().store().table();
        Self {
            registry,
            fact_table,
            worker_table: WORKER_TABLE,
        }
    }

    /// Gather every active plugin's condition for `job` and lower them.
    ///
    /// Fails closed: any plugin error or invalid condition aborts the query.
    pub fn compile(&self, job: &DispatchJob) -> Result<CompiledQuery, CompileError> {
        let context = QueryContext {
            job_id: job.id.clone(),
            employer_id: job.employer_id.clone(),
            today: self.registry.pipeline().today(),
        };

        let mut clauses = Vec::new();
        for plugin in self.registry.active_plugins()? {
            let config = job.eligibility.for_plugin(plugin.id());
            let condition = match plugin.eligibility_condition(&context, config) {
                Ok(Some(condition)) => condition,
                Ok(None) => continue,
                Err(source) => {
                    error!(
                        job_id = %job.id,
                        plugin = plugin.id(),
                        error = %source,
                        "eligibility condition failed; query aborted"
                    );
                    return Err(CompileError::Plugin {
                        plugin: plugin.id().to_string(),
                        source,
                    });
                }
            };

            let predicate =
                Predicate::lower(&condition).map_err(|reason| CompileError::InvalidCondition {
                    plugin: plugin.id().to_string(),
                    condition: condition.summary(),
                    reason,
                })?;

            if let Some(category) = predicate.fact_category() {
                if category != plugin.category().as_str() {
                    return Err(CompileError::ForeignCategory {
                        plugin: plugin.id().to_string(),
                        category: category.to_string(),
                    });
                }
            }

            clauses.push(CompiledClause {
                plugin_id: plugin.id().to_string(),
                condition,
                predicate,
            });
        }

        debug!(job_id = %job.id, clauses = clauses.len(), "eligibility query compiled");

        Ok(CompiledQuery {
            job_id: job.id.clone(),
            clauses,
            fact_table: self.fact_table,
            worker_table: self.worker_table,
        })
    }
}
