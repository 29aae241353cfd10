//! Typed predicate nodes that plugin conditions are lowered into.

use serde::Serialize;

use crate::eligibility::domain::{ConditionKind, EligibilityCondition, EligibilityFact};
use crate::eligibility::records::{Worker, WorkerTable};

const WILDCARD: char = '*';

/// Scalar worker columns a condition may compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAttribute {
    WorkStatus,
}

impl WorkerAttribute {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "work_status" => Some(WorkerAttribute::WorkStatus),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerAttribute::WorkStatus => "work_status",
        }
    }

    pub fn column(&self, table: &WorkerTable) -> &'static str {
        match self {
            WorkerAttribute::WorkStatus => table.work_status_column,
        }
    }

    pub fn value_of<'a>(&self, worker: &'a Worker) -> &'a str {
        match self {
            WorkerAttribute::WorkStatus => &worker.work_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoweringError {
    #[error("condition category must not be empty")]
    EmptyCategory,
    #[error("wildcard values are only supported by not_exists_category")]
    UnexpectedWildcard,
    #[error("unknown worker attribute {0}")]
    UnknownAttribute(String),
}

fn in_category<'a>(
    facts: &'a [EligibilityFact],
    category: &'a str,
) -> impl Iterator<Item = &'a EligibilityFact> + 'a {
    facts
        .iter()
        .filter(move |fact| fact.category.as_str() == category)
}

/// One AND-ed clause of an eligibility query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Predicate {
    HasFact { category: String, value: String },
    LacksFact { category: String, value: String },
    /// An empty prefix excludes any fact in the category.
    LacksFactWithPrefix { category: String, prefix: String },
    LacksOtherFact { category: String, value: String },
    AttributeEquals { attribute: WorkerAttribute, value: String },
}

impl Predicate {
    pub fn lower(condition: &EligibilityCondition) -> Result<Self, LoweringError> {
        let category = condition.category.trim();
        if category.is_empty() {
            return Err(LoweringError::EmptyCategory);
        }
        let category = category.to_string();
        let value = condition.value.clone();
        let has_wildcard = value.contains(WILDCARD);

        match condition.kind {
            ConditionKind::NotExistsCategory => {
                Ok(match value.split_once(WILDCARD) {
                    Some((prefix, _)) => Predicate::LacksFactWithPrefix {
                        category,
                        prefix: prefix.to_string(),
                    },
                    // No wildcard: the whole value must match.
                    None => Predicate::LacksFact { category, value },
                })
            }
            _ if has_wildcard => Err(LoweringError::UnexpectedWildcard),
            ConditionKind::Exists => Ok(Predicate::HasFact { category, value }),
            ConditionKind::NotExists => Ok(Predicate::LacksFact { category, value }),
            ConditionKind::NotExistsOther => Ok(Predicate::LacksOtherFact { category, value }),
            ConditionKind::Equals => {
                let attribute = WorkerAttribute::from_name(&category)
                    .ok_or(LoweringError::UnknownAttribute(category))?;
                Ok(Predicate::AttributeEquals { attribute, value })
            }
        }
    }

    /// Fact category read by this node, if it reads the fact table at all.
    pub fn fact_category(&self) -> Option<&str> {
        match self {
            Predicate::HasFact { category, .. }
            | Predicate::LacksFact { category, .. }
            | Predicate::LacksFactWithPrefix { category, .. }
            | Predicate::LacksOtherFact { category, .. } => Some(category),
            Predicate::AttributeEquals { .. } => None,
        }
    }

    /// Evaluate against one worker and that worker's facts.
    pub fn matches(&self, worker: &Worker, facts: &[EligibilityFact]) -> bool {
        match self {
            Predicate::HasFact { category, value } => {
                in_category(facts, category).any(|fact| &fact.value == value)
            }
            Predicate::LacksFact { category, value } => {
                !in_category(facts, category).any(|fact| &fact.value == value)
            }
            Predicate::LacksFactWithPrefix { category, prefix } => {
                !in_category(facts, category).any(|fact| fact.value.starts_with(prefix.as_str()))
            }
            Predicate::LacksOtherFact { category, value } => {
                in_category(facts, category).all(|fact| &fact.value == value)
            }
            Predicate::AttributeEquals { attribute, value } => {
                attribute.value_of(worker) == value.as_str()
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Predicate::HasFact { category, value } => {
                format!("worker has fact {category}={value}")
            }
            Predicate::LacksFact { category, value } => {
                format!("worker has no fact {category}={value}")
            }
            Predicate::LacksFactWithPrefix { category, prefix } if prefix.is_empty() => {
                format!("worker has no fact in category {category}")
            }
            Predicate::LacksFactWithPrefix { category, prefix } => {
                format!("worker has no fact in category {category} starting with '{prefix}'")
            }
            Predicate::LacksOtherFact { category, value } => {
                format!("worker has no fact in category {category} other than {value}")
            }
            Predicate::AttributeEquals { attribute, value } => {
                format!("worker {} is {value}", attribute.name())
            }
        }
    }
}
