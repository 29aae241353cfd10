//! Dispatch eligibility engine.
//!
//! Decides which workers may be dispatched to a job by combining rule
//! families that each materialise per-worker facts and contribute one
//! condition to a compiled eligibility query.

pub mod config;
pub mod eligibility;
pub mod error;
pub mod telemetry;
