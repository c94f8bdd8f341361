//! Mapping cache models
//!
//! This module contains the core data types shared by every tier:
//! - `direction` - The mandatory mapping direction (MappingDirection)
//! - `rule` - Mapping rules, rule sets and the rule-change notification
//! - `batch` - Batch mapping results, public and stored shapes
//! - `tier` - Cache tier labels (CacheTier)

mod batch;
mod direction;
mod rule;
mod tier;

pub use batch::BatchMappingResult;
pub(crate) use batch::StoredBatchResult;
pub use direction::MappingDirection;
pub use rule::{ApiType, MappingRule, MappingRuleSet, RuleChange};
pub use tier::CacheTier;
