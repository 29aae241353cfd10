use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::Row;
use tracing::debug;

use crate::eligibility::domain::{Category, EligibilityFact, WorkerId};
use crate::eligibility::store::{ensure_owned, FactDelta, FactStore, FactTable, StoreError, FACT_TABLE};

/// Fact table in the service database. `replace_worker_category` runs in one
/// transaction, so readers see the old set or the new set.
#[derive(Debug, Clone)]
pub struct SqlFactStore {
    pool: AnyPool,
    table: FactTable,
}

impl SqlFactStore {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            table: FACT_TABLE,
        }
    }

    /// Number of stored facts, across every worker and category.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.table);
        let total: i64 = sqlx::query(&sql).fetch_one(&self.pool).await?.try_get(0)?;
        Ok(usize::try_from(total).unwrap_or(0))
    }

    fn insert_sql(&self) -> String {
        let FactTable {
            table,
            worker_column,
            category_column,
            value_column,
        } = self.table;
        format!(
            "INSERT INTO {table} ({worker_column}, {category_column}, {value_column}) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
        )
    }
}

#[async_trait]
impl FactStore for SqlFactStore {
    fn table(&self) -> FactTable {
        self.table
    }

    async fn delete_by_worker_and_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
    ) -> Result<usize, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            self.table.table, self.table.worker_column, self.table.category_column
        );
        let result = sqlx::query(&sql)
            .bind(worker_id.as_str().to_string())
            .bind(category.as_str().to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn create_many(&self, facts: Vec<EligibilityFact>) -> Result<usize, StoreError> {
        let sql = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for fact in facts {
            let result = sqlx::query(&sql)
                .bind(fact.worker_id.0)
                .bind(fact.category.0)
                .bind(fact.value)
                .execute(&mut *tx)
                .await?;
            created += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn get_by_worker(&self, worker_id: &WorkerId) -> Result<Vec<EligibilityFact>, StoreError> {
        let FactTable {
            table,
            worker_column,
            category_column,
            value_column,
        } = self.table;
        let sql = format!(
            "SELECT {category_column}, {value_column} FROM {table} WHERE {worker_column} = $1 ORDER BY {category_column}, {value_column}"
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id.as_str().to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<EligibilityFact, StoreError> {
                Ok(EligibilityFact::new(
                    worker_id.clone(),
                    Category::new(row.try_get::<String, _>(0)?),
                    row.try_get::<String, _>(1)?,
                ))
            })
            .collect()
    }

    async fn workers_with_category(&self, category: &Category) -> Result<Vec<WorkerId>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT {worker} FROM {table} WHERE {category} = $1 ORDER BY {worker}",
            table = self.table.table,
            worker = self.table.worker_column,
            category = self.table.category_column,
        );
        let rows = sqlx::query(&sql)
            .bind(category.as_str().to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<WorkerId, StoreError> {
                Ok(WorkerId::new(row.try_get::<String, _>(0)?))
            })
            .collect()
    }

    async fn replace_worker_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
        facts: Vec<EligibilityFact>,
    ) -> Result<FactDelta, StoreError> {
        ensure_owned(&facts, worker_id, category)?;
        let next: BTreeSet<String> = facts.into_iter().map(|fact| fact.value).collect();

        let FactTable {
            table,
            worker_column,
            category_column,
            value_column,
        } = self.table;
        let select = format!(
            "SELECT {value_column} FROM {table} WHERE {worker_column} = $1 AND {category_column} = $2"
        );
        let delete = format!(
            "DELETE FROM {table} WHERE {worker_column} = $1 AND {category_column} = $2 AND {value_column} = $3"
        );
        let insert = self.insert_sql();

        let mut tx = self.pool.begin().await?;
        let previous: BTreeSet<String> = sqlx::query(&select)
            .bind(worker_id.as_str().to_string())
            .bind(category.as_str().to_string())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<_, _>>()?;

        let stale: Vec<&String> = previous.difference(&next).collect();
        let fresh: Vec<&String> = next.difference(&previous).collect();
        for value in &stale {
            sqlx::query(&delete)
                .bind(worker_id.as_str().to_string())
                .bind(category.as_str().to_string())
                .bind((*value).clone())
                .execute(&mut *tx)
                .await?;
        }
        for value in &fresh {
            sqlx::query(&insert)
                .bind(worker_id.as_str().to_string())
                .bind(category.as_str().to_string())
                .bind((*value).clone())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let delta = FactDelta {
            created: fresh.len(),
            removed: stale.len(),
        };
        debug!(
            worker_id = %worker_id,
            category = %category,
            created = delta.created,
            removed = delta.removed,
            "facts replaced"
        );
        Ok(delta)
    }
}
