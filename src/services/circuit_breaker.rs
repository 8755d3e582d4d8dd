//! Circuit breaker guarding database lookups on the request hot path.
//!
//! Three states: Closed (calls flow), Open (calls short-circuit with
//! [`CircuitBreakerError::Open`]), HalfOpen (a bounded number of trial calls
//! probe recovery). Consecutive failures open the circuit; after the reset
//! timeout it half-opens; enough trial successes close it and any trial
//! failure reopens it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Successful trial calls in half-open needed to close.
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::seconds(30),
            half_open_trials: 2,
        }
    }
}

/// State of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Error from a breaker-protected operation.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Call short-circuited because the circuit is open.
    Open { retry_after: DateTime<Utc> },
    /// The underlying operation ran and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { retry_after } => {
                write!(f, "Circuit breaker open, retry after {retry_after}")
            }
            Self::Inner(e) => write!(f, "Operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().map(|inner| inner.state).unwrap_or(CircuitState::Closed)
    }

    /// Run `op` under the breaker. Returns `Open` without invoking `op` while
    /// the circuit is open, records the outcome otherwise.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Some(retry_after) = self.check_open() {
            return Err(CircuitBreakerError::Open { retry_after });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }

    /// `Some(retry_after)` when the call must be short-circuited. Flips the
    /// breaker to half-open once the reset timeout has elapsed.
    fn check_open(&self) -> Option<DateTime<Utc>> {
        let mut inner = self.inner.lock().ok()?;
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        let retry_after = opened_at + self.config.reset_timeout;
        if Utc::now() >= retry_after {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            None
        } else {
            Some(retry_after)
        }
    }

    fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            match inner.state {
                CircuitState::Closed => inner.consecutive_failures = 0,
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_trials {
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                        inner.opened_at = None;
                    }
                }
                CircuitState::Open => {}
            }
        }
    }

    fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Utc::now());
                    }
                }
                // Any failure during probing reopens immediately.
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Utc::now());
                    inner.half_open_successes = 0;
                }
                CircuitState::Open => {}
            }
        }
    }
}
