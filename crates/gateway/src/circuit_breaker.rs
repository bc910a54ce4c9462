//! Circuit breaker for the chain RPC endpoint.
//!
//! When the node is unreachable every ledger read would otherwise walk the
//! full retry ladder before failing. The breaker counts consecutive
//! transient failures, fails fast while open, and lets probes through after
//! a cool-down.
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐  recovery_timeout  ┌──────────┐
//! │ Closed │ ──────reached─────→ │ Open │ ────elapsed─────→  │ HalfOpen │
//! └────────┘                     └──────┘ ←──probe fails──── └──────────┘
//!      ↑                                                          │
//!      └──────────────── success_threshold probes ────────────────┘
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use certledger_core::{CertError, CertResult, ConfigError, Dependency};
use parking_lot::Mutex;

/// Default consecutive transient failures before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default open duration before probing.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default successful probes needed to close again.
pub const DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until `until`.
    Open {
        /// When probing may start.
        until: Instant,
    },
    /// Calls pass through as probes.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_success_threshold: DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

#[bon::bon]
impl CircuitBreakerConfig {
    /// Creates a breaker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any threshold or the recovery timeout is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_FAILURE_THRESHOLD)] failure_threshold: u32,
        #[builder(default = DEFAULT_RECOVERY_TIMEOUT)] recovery_timeout: Duration,
        #[builder(default = DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD)] half_open_success_threshold: u32,
    ) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("failure_threshold", failure_threshold),
            ("half_open_success_threshold", half_open_success_threshold),
        ] {
            if value == 0 {
                return Err(ConfigError::BelowMinimum { field, min: "1".into(), value: "0".into() });
            }
        }
        if recovery_timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "recovery_timeout",
                value: "0s".into(),
            });
        }
        Ok(Self { failure_threshold, recovery_timeout, half_open_success_threshold })
    }

    /// Consecutive failures before opening.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Open duration before probing.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    fast_failures: u64,
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                fast_failures: 0,
            })),
        }
    }

    /// Admits or rejects a call.
    ///
    /// # Errors
    ///
    /// Returns a non-transient [`CertError::ExternalDependency`] while open,
    /// so retry loops stop instead of spinning against a dead node.
    pub fn check(&self) -> CertResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { until } if Instant::now() >= until => {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                tracing::info!(new_state = "half_open", "circuit breaker probing ledger endpoint");
                Ok(())
            },
            CircuitState::Open { .. } => {
                inner.fast_failures += 1;
                Err(CertError::external(Dependency::Ledger, "circuit breaker open"))
            },
        }
    }

    /// Records the outcome of an admitted call.
    ///
    /// Only transient errors count against the endpoint; a deterministic
    /// error means the node answered.
    pub fn record<T>(&self, outcome: &CertResult<T>) {
        match outcome {
            Err(err) if err.is_transient() => self.record_failure(),
            _ => self.record_success(),
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    tracing::info!(new_state = "closed", "circuit breaker closed");
                }
            },
            CircuitState::Open { .. } => {},
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let reopen = match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.consecutive_failures >= self.config.failure_threshold
            },
            CircuitState::HalfOpen => true,
            CircuitState::Open { .. } => false,
        };
        if reopen {
            inner.state = CircuitState::Open { until: Instant::now() + self.config.recovery_timeout };
            inner.half_open_successes = 0;
            tracing::warn!(
                consecutive_failures = inner.consecutive_failures,
                recovery_timeout_secs = self.config.recovery_timeout.as_secs(),
                "circuit breaker opened",
            );
        }
    }

    /// Current state; an expired open state reads as half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            other => other,
        }
    }

    /// Calls rejected while open.
    #[must_use]
    pub fn fast_failures(&self) -> u64 {
        self.inner.lock().fast_failures
    }
}
