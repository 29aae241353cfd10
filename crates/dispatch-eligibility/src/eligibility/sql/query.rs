use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::Row;
use tracing::debug;

use super::bind_params;
use crate::eligibility::compiler::{CompiledQuery, Page};
use crate::eligibility::domain::WorkerId;
use crate::eligibility::query::{EligibleWorker, EligibleWorkerPage, EligibleWorkerQuery, QueryError};

/// Runs the compiled count and select statements against the database.
///
/// No filtering happens in process: the statement text and parameters are
/// exactly what [`CompiledQuery::count_sql`] and [`CompiledQuery::select_sql`]
/// render, which is also what the SQL preview returns.
#[derive(Debug, Clone)]
pub struct SqlEligibleWorkerQuery {
    pool: AnyPool,
}

impl SqlEligibleWorkerQuery {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EligibleWorkerQuery for SqlEligibleWorkerQuery {
    async fn fetch(
        &self,
        query: &CompiledQuery,
        page: Page,
    ) -> Result<EligibleWorkerPage, QueryError> {
        let count = query.count_sql();
        let total: i64 = bind_params(sqlx::query(&count.sql), &count.params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        let total = usize::try_from(total).map_err(|_| QueryError::InvalidCount(total))?;

        let select = query.select_sql(page);
        let rows = bind_params(sqlx::query(&select.sql), &select.params)
            .fetch_all(&self.pool)
            .await?;
        let workers = rows
            .iter()
            .map(|row| -> Result<EligibleWorker, QueryError> {
                Ok(EligibleWorker {
                    id: WorkerId::new(row.try_get::<String, _>(0)?),
                    display_name: row.try_get(1)?,
                    work_status: row.try_get(2)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            job_id = %query.job_id,
            total,
            returned = workers.len(),
            "eligibility query executed"
        );
        Ok(EligibleWorkerPage { workers, total })
    }
}
