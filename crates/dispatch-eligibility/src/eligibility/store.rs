//! Persistence boundary for denormalised eligibility facts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use super::domain::{Category, EligibilityFact, WorkerId};

/// Physical names the query renderer needs to reference the fact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactTable {
    pub table: &'static str,
    pub worker_column: &'static str,
    pub category_column: &'static str,
    pub value_column: &'static str,
}

pub const FACT_TABLE: FactTable = FactTable {
    table: "worker_dispatch_eligibility",
    worker_column: "worker_id",
    category_column: "category",
    value_column: "value",
};

/// Net change produced by replacing one worker's facts in one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactDelta {
    pub created: usize,
    pub removed: usize,
}

impl FactDelta {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.removed == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("fact for worker {worker_id} category {category} does not belong to replace target {expected_worker}/{expected_category}")]
    ForeignFact {
        worker_id: WorkerId,
        category: Category,
        expected_worker: WorkerId,
        expected_category: Category,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Storage for eligibility facts. Holds no business logic.
#[async_trait]
pub trait FactStore: Send + Sync {
    fn table(&self) -> FactTable {
        FACT_TABLE
    }

    async fn delete_by_worker_and_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
    ) -> Result<usize, StoreError>;

    async fn create_many(&self, facts: Vec<EligibilityFact>) -> Result<usize, StoreError>;

    async fn get_by_worker(&self, worker_id: &WorkerId) -> Result<Vec<EligibilityFact>, StoreError>;

    async fn workers_with_category(&self, category: &Category) -> Result<Vec<WorkerId>, StoreError>;

    /// Atomically delete every fact for `(worker_id, category)` and insert `facts`.
    ///
    /// Implementations must run this as one transaction: readers observe either
    /// the old set or the new set, never a mix.
    async fn replace_worker_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
        facts: Vec<EligibilityFact>,
    ) -> Result<FactDelta, StoreError>;
}

type FactKey = (WorkerId, Category);

/// Mutex-guarded fact table used by tests, demos and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    facts: Mutex<BTreeMap<FactKey, BTreeSet<String>>>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored fact in `(worker, category, value)` order.
    pub fn facts(&self) -> Vec<EligibilityFact> {
        let guard = self.facts.lock().expect("fact store mutex poisoned");
        guard
            .iter()
            .flat_map(|((worker_id, category), values)| {
                values.iter().map(move |value| {
                    EligibilityFact::new(worker_id.clone(), category.clone(), value.clone())
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        let guard = self.facts.lock().expect("fact store mutex poisoned");
        guard.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn ensure_owned(
    facts: &[EligibilityFact],
    worker_id: &WorkerId,
    category: &Category,
) -> Result<(), StoreError> {
    match facts
        .iter()
        .find(|fact| &fact.worker_id != worker_id || &fact.category != category)
    {
        Some(fact) => Err(StoreError::ForeignFact {
            worker_id: fact.worker_id.clone(),
            category: fact.category.clone(),
            expected_worker: worker_id.clone(),
            expected_category: category.clone(),
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn delete_by_worker_and_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
    ) -> Result<usize, StoreError> {
        let mut guard = self.facts.lock().expect("fact store mutex poisoned");
        Ok(guard
            .remove(&(worker_id.clone(), category.clone()))
            .map(|values| values.len())
            .unwrap_or(0))
    }

    async fn create_many(&self, facts: Vec<EligibilityFact>) -> Result<usize, StoreError> {
        let mut guard = self.facts.lock().expect("fact store mutex poisoned");
        let mut created = 0;
        for fact in facts {
            if guard
                .entry((fact.worker_id, fact.category))
                .or_default()
                .insert(fact.value)
            {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn get_by_worker(&self, worker_id: &WorkerId) -> Result<Vec<EligibilityFact>, StoreError> {
        let guard = self.facts.lock().expect("fact store mutex poisoned");
        Ok(guard
            .iter()
            .filter(|((owner, _), _)| owner == worker_id)
            .flat_map(|((owner, category), values)| {
                values.iter().map(move |value| {
                    EligibilityFact::new(owner.clone(), category.clone(), value.clone())
                })
            })
            .collect())
    }

    async fn workers_with_category(&self, category: &Category) -> Result<Vec<WorkerId>, StoreError> {
        let guard = self.facts.lock().expect("fact store mutex poisoned");
        Ok(guard
            .iter()
            .filter(|((_, owned), values)| owned == category && !values.is_empty())
            .map(|((worker_id, _), _)| worker_id.clone())
            .collect())
    }

    async fn replace_worker_category(
        &self,
        worker_id: &WorkerId,
        category: &Category,
        facts: Vec<EligibilityFact>,
    ) -> Result<FactDelta, StoreError> {
        ensure_owned(&facts, worker_id, category)?;

        let next: BTreeSet<String> = facts.into_iter().map(|fact| fact.value).collect();
        let key = (worker_id.clone(), category.clone());

        let mut guard = self.facts.lock().expect("fact store mutex poisoned");
        let previous = guard.remove(&key).unwrap_or_default();
        let delta = FactDelta {
            created: next.difference(&previous).count(),
            removed: previous.difference(&next).count(),
        };
        if !next.is_empty() {
            guard.insert(key, next);
        }
        Ok(delta)
    }
}
