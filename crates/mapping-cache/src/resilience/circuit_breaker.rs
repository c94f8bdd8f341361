//! Circuit breaker guarding key enumeration.
//!
//! Scans are the only expensive store operation the cache issues, so they
//! are the only calls routed through the breaker. The circuit has three states:
//!
//! - **Closed**: Normal operation, scans are allowed through.
//! - **Open**: Scans keep failing, calls fail fast without reaching the store.
//! - **HalfOpen**: Recovery timeout elapsed; exactly one trial scan is admitted.
//!
//! The breaker is in-memory and resets on restart.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation - scans are allowed.
    Closed,
    /// Scans are failing - calls are rejected.
    Open,
    /// Testing recovery - a single trial call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Number of consecutive failures.
    failure_count: u32,
    /// Time of the last failure (for recovery timeout).
    last_failure: Option<Instant>,
    /// Set while the single HalfOpen trial call is outstanding.
    trial_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before admitting a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Thread-safe circuit breaker for scan operations.
pub struct CircuitBreaker {
    circuit: Mutex<Circuit>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuit: Mutex::new(Circuit::new()),
            config,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly wrong state, which
    /// is preferable to panicking on the invalidation path.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check whether a scan may proceed, claiming the trial slot if needed.
    ///
    /// - Closed: always true.
    /// - Open: false until the recovery timeout elapses, then transitions to
    ///   HalfOpen and admits this call as the trial.
    /// - HalfOpen: true only if no trial is outstanding.
    ///
    /// Every `true` must be followed by `record_success` or `record_failure`.
    pub fn try_acquire(&self) -> bool {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    debug!("Circuit breaker: trial already in flight, rejecting");
                    false
                } else {
                    circuit.trial_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let recovered = circuit
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    info!("Circuit breaker: transitioning from OPEN to HALF_OPEN");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful scan.
    ///
    /// In Closed state: resets the failure count.
    /// In HalfOpen state: closes the circuit.
    pub fn record_success(&self) {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker: trial succeeded, closing circuit");
                *circuit = Circuit::new();
            }
            CircuitState::Open => {
                debug!("Circuit breaker: unexpected success in OPEN state");
            }
        }
    }

    /// Record a failed scan.
    ///
    /// Increments the failure count and may open the circuit.
    /// In HalfOpen state, the failed trial reopens the circuit immediately.
    pub fn record_failure(&self) {
        let mut circuit = self.lock_circuit();

        circuit.failure_count += 1;
        circuit.last_failure = Some(Instant::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker: opening circuit after {} consecutive scan failures",
                        circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: scan failure ({}/{})",
                        circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker: trial failed, reopening circuit");
                circuit.state = CircuitState::Open;
                circuit.trial_in_flight = false;
            }
            CircuitState::Open => {
                debug!("Circuit breaker: additional failure (already open)");
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_circuit().failure_count
    }

    /// Force the circuit back to Closed.
    pub fn reset(&self) {
        info!("Circuit breaker: manually resetting circuit");
        *self.lock_circuit() = Circuit::new();
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let circuit = self.lock_circuit();
        CircuitMetrics {
            state: circuit.state,
            failure_count: circuit.failure_count,
            last_failure: circuit.last_failure,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}
