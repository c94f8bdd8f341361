//! Fault-tolerance helpers for store-wide operations.
//!
//! - Circuit breaking for key enumeration
//! - Deadline- and cap-bounded progressive scanning
//! - Partial-failure-tolerant bulk deletion

mod batch_delete;
mod circuit_breaker;
mod scanner;

pub use batch_delete::{BatchDeleteReport, BatchDeleter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use scanner::{next_batch_size, KeyScanner, ScanOutcome};
