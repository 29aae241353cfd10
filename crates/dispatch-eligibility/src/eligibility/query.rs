use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::compiler::{CompiledQuery, Page};
use super::domain::WorkerId;
use super::records::{DispatchRecords, RecordsError, Worker};
use super::store::{FactStore, StoreError};

/// Row of an eligible-worker listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleWorker {
    pub id: WorkerId,
    pub display_name: String,
    pub work_status: String,
}

impl From<Worker> for EligibleWorker {
    fn from(worker: Worker) -> Self {
        Self {
            id: worker.id,
            display_name: worker.display_name,
            work_status: worker.work_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibleWorkerPage {
    pub workers: Vec<EligibleWorker>,
    pub total: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Records(#[from] RecordsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("eligibility query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("eligibility query returned a negative count: {0}")]
    InvalidCount(i64),
}

/// Executes a compiled query against wherever workers and facts live.
///
/// The production implementation is [`SqlEligibleWorkerQuery`](super::sql::SqlEligibleWorkerQuery),
/// which runs `query.count_sql()` and `query.select_sql(page)` verbatim.
#[async_trait]
pub trait EligibleWorkerQuery: Send + Sync {
    async fn fetch(
        &self,
        query: &CompiledQuery,
        page: Page,
    ) -> Result<EligibleWorkerPage, QueryError>;
}

/// Test double that evaluates the compiled predicates in process.
///
/// Orders by byte comparison of `display_name`, which matches the rendered
/// `ORDER BY` only under a binary collation.
pub struct InMemoryEligibleWorkerQuery {
    records: Arc<dyn DispatchRecords>,
    store: Arc<dyn FactStore>,
}

impl InMemoryEligibleWorkerQuery {
    pub fn new(records: Arc<dyn DispatchRecords>, store: Arc<dyn FactStore>) -> Self {
        Self { records, store }
    }
}

#[async_trait]
impl EligibleWorkerQuery for InMemoryEligibleWorkerQuery {
    async fn fetch(
        &self,
        query: &CompiledQuery,
        page: Page,
    ) -> Result<EligibleWorkerPage, QueryError> {
        let mut workers = self.records.workers().await?;
        workers.sort_by(|left, right| {
            left.display_name
                .cmp(&right.display_name)
                .then_with(|| left.id.cmp(&right.id))
        });

        let mut eligible = Vec::new();
        for worker in workers {
            let facts = self.store.get_by_worker(&worker.id).await?;
            if query.matches(&worker, &facts) {
                eligible.push(worker);
            }
        }

        let total = eligible.len();
        let workers = eligible
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(EligibleWorker::from)
            .collect();

        Ok(EligibleWorkerPage { workers, total })
    }
}
