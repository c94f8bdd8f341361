/// Classification for retry policy.
///
/// Used by the invalidation worker (and by callers of the public invalidation
/// operations) to decide whether a failed operation is worth repeating.
///
/// # Behavior Summary
///
/// | Class | Retry? | Typical cause |
/// |-------|--------|---------------|
/// | `Never` | No | Malformed input, unknown rule |
/// | `Retryable` | Yes, with backoff | Store unreachable, scan deadline, open circuit |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - the request is fundamentally invalid and retrying won't help.
    Never,

    /// The failure is transient. Retrying later may succeed once the backing
    /// store recovers or the scan circuit closes again.
    Retryable,
}

impl RetryClass {
    /// Returns true for classes worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}
