//! Rule-change driven cache invalidation.
//!
//! - [`diff`]: pure diffing of rule versions and planning of the keys to evict
//! - [`InvalidationEngine`]: runs a plan against the store (targeted or bulk)
//! - [`InvalidationQueue`]: non-blocking hand-off to the background worker

pub mod diff;
mod engine;
mod worker;

pub use diff::{plan_invalidation, InvalidationPlan, RuleDiff};
pub use engine::{InvalidationEngine, InvalidationReport};
pub use worker::{backoff_delay, start_invalidation_worker, InvalidationQueue};
