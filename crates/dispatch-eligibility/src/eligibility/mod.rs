//! Dispatch eligibility: materialised worker facts, pluggable rule families
//! and the compiled query that decides which workers a job may reach.
//!
//! Plugins own one fact category each. Domain events mark a worker dirty and
//! the owning plugin re-derives that worker's facts from authoritative
//! records; queries AND together the conditions of every active plugin.

pub mod clock;
pub mod compiler;
pub mod components;
pub mod domain;
pub mod engine;
pub mod events;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod query;
pub mod records;
pub mod registry;
pub mod router;
pub mod service;
pub mod sql;
pub mod store;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use compiler::render::{RenderedSql, SqlParam};
pub use compiler::{CompileError, CompiledQuery, EligibilityQueryCompiler, Page};
pub use components::{ComponentError, ComponentGate, ComponentSource, StaticComponentSource};
pub use domain::{
    AppliedCondition, Category, ConditionKind, EligibilityCondition, EligibilityFact, EmployerId,
    JobId, WorkerId,
};
pub use engine::{EligibilityEngine, EligibilityEngineBuilder};
pub use events::{Delivery, DomainEvent, EventBus, EventSubscriber, EventType};
pub use pipeline::{BackfillReport, PluginBackfill, RecomputePipeline};
pub use plugin::{
    EligibilityPlugin, EventInterest, PluginError, QueryContext, RecomputeContext,
    RecomputeOutcome,
};
pub use plugins::{default_plugins, DEFAULT_COMPONENTS};
pub use query::{
    EligibleWorker, EligibleWorkerPage, EligibleWorkerQuery, InMemoryEligibleWorkerQuery, QueryError,
};
pub use records::{
    BanType, DispatchJob, DispatchRecords, DoNotCall, EmployerHold, InMemoryDispatchRecords,
    JobEligibilityConfig, PluginJobConfig, RecordsError, Worker, WorkerBan,
};
pub use registry::{PluginRegistry, RegistryError};
pub use router::{eligibility_router, status_for, DEBUG_TOKEN_HEADER};
pub use service::{
    EligibilityService, EligibilityServiceError, EligibleWorkersResponse, QueryLimits, SqlPreview,
};
pub use sql::{SqlDispatchRecords, SqlEligibleWorkerQuery, SqlFactStore};
pub use store::{FactDelta, FactStore, InMemoryFactStore, StoreError};
