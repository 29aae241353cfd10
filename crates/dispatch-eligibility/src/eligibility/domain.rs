use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a worker record.
    WorkerId
);
string_id!(
    /// Identifier of a dispatch job.
    JobId
);
string_id!(
    /// Identifier of an employer.
    EmployerId
);
string_id!(
    /// Fact namespace owned by exactly one plugin.
    Category
);

/// Denormalised `(worker, category, value)` assertion used to answer eligibility queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EligibilityFact {
    pub worker_id: WorkerId,
    pub category: Category,
    pub value: String,
}

impl EligibilityFact {
    pub fn new(worker_id: WorkerId, category: Category, value: impl Into<String>) -> Self {
        Self {
            worker_id,
            category,
            value: value.into(),
        }
    }
}

/// Semantic operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Worker must hold a fact with exactly this category and value.
    Exists,
    /// Worker must not hold a fact with exactly this category and value.
    NotExists,
    /// Worker must not hold any fact in the category whose value starts with the text before `*`.
    NotExistsCategory,
    /// Worker must not hold any fact in the category whose value differs from this value.
    NotExistsOther,
    /// A scalar worker attribute (named by `category`) must equal the value.
    Equals,
}

impl ConditionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConditionKind::Exists => "exists",
            ConditionKind::NotExists => "not_exists",
            ConditionKind::NotExistsCategory => "not_exists_category",
            ConditionKind::NotExistsOther => "not_exists_other",
            ConditionKind::Equals => "equals",
        }
    }
}

/// Query-time predicate contributed by a plugin. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCondition {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub value: String,
}

impl EligibilityCondition {
    pub fn new(category: impl Into<String>, kind: ConditionKind, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            kind,
            value: value.into(),
        }
    }

    pub fn summary(&self) -> String {
        format!("{}({}, {})", self.kind.label(), self.category, self.value)
    }
}

/// Condition recorded against the plugin that contributed it, for audit display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCondition {
    pub plugin_id: String,
    pub condition: EligibilityCondition,
}
