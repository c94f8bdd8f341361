//! Error types and retry classification for the mapping cache.
//!
//! This module provides:
//! - [`CacheError`]: The main error enum for all cache and invalidation operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during mapping, caching and invalidation.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed key or request input. Never coerced, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing key-value store could not be reached or rejected the call.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Key enumeration ran past its wall-clock deadline.
    /// Counts as a circuit breaker failure.
    #[error("Scan timed out after {elapsed_ms}ms (pattern: {pattern})")]
    ScanTimeout {
        /// The scan pattern being enumerated
        pattern: String,
        /// Time spent before giving up
        elapsed_ms: u64,
    },

    /// Repeated capped scans still left keys behind in a namespace.
    #[error("Scan of '{pattern}' still truncated after {passes} passes")]
    ScanIncomplete {
        /// The scan pattern being cleared
        pattern: String,
        /// Number of scan-and-delete passes attempted
        passes: u32,
    },

    /// The scan circuit breaker is open; the store was not contacted.
    #[error("Scan circuit open")]
    CircuitOpen,

    /// More than half of the deletion chunks failed.
    #[error("Batch delete failed for {failed_chunks}/{total_chunks} chunks")]
    PartialBatchFailure {
        /// Number of chunks whose delete call failed
        failed_chunks: usize,
        /// Total number of chunks attempted
        total_chunks: usize,
    },

    /// No rule exists for the given identifier.
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// The authoritative rule store failed while resolving rules.
    #[error("Rule source error: {0}")]
    RuleSource(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use tickermap_cache::errors::{CacheError, RetryClass};
    ///
    /// let error = CacheError::CircuitOpen;
    /// assert_eq!(error.retry_class(), RetryClass::Retryable);
    ///
    /// let error = CacheError::RuleNotFound("r-1".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Validation(_)
            | Self::RuleNotFound(_)
            | Self::RuleSource(_)
            | Self::Serialization(_) => RetryClass::Never,

            Self::CacheUnavailable(_)
            | Self::ScanTimeout { .. }
            | Self::CircuitOpen
            | Self::ScanIncomplete { .. }
            | Self::PartialBatchFailure { .. } => RetryClass::Retryable,
        }
    }

    /// Whether this failure should be reported to the scan circuit breaker.
    pub fn counts_as_scan_failure(&self) -> bool {
        matches!(self, Self::ScanTimeout { .. } | Self::CacheUnavailable(_))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable(message.into())
    }
}
