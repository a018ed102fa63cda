//! Circuit breaker guarding tool execution.
//!
//! State machine:
//!
//! ```text
//! Closed ── failure_threshold consecutive failures ──▶ Open
//! Open ── open_timeout elapsed ──▶ HalfOpen (bounded probe quota)
//! HalfOpen ── success_threshold successes ──▶ Closed
//! HalfOpen ── any failure ──▶ Open
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CircuitBreakerConfig;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen {
        in_flight: u32,
        successes: u32,
    },
}

/// Verdict for an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with the call.
    Permitted,
    /// Short-circuit: the breaker is open.  `retry_after` is the remaining
    /// hold time.
    ShortCircuit { retry_after: Duration },
}

/// Failure-rate-triggered short circuit for tool calls.  All mutation goes
/// through one internal lock; shared via `Arc`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask whether a call may proceed.  In half-open state this consumes a
    /// probe slot which must be released by `record_success` /
    /// `record_failure`.
    pub fn admit(&self) -> Admission {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let open_timeout = Duration::from_secs(self.config.open_timeout_s);
        match &mut *inner {
            Inner::Closed { .. } => Admission::Permitted,
            Inner::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= open_timeout {
                    tracing::info!("circuit breaker half-open: probing");
                    *inner = Inner::HalfOpen {
                        in_flight: 1,
                        successes: 0,
                    };
                    Admission::Permitted
                } else {
                    Admission::ShortCircuit {
                        retry_after: open_timeout - elapsed,
                    }
                }
            }
            Inner::HalfOpen {
                in_flight,
                successes: _,
            } => {
                if *in_flight < self.config.half_open_max_calls {
                    *in_flight += 1;
                    Admission::Permitted
                } else {
                    Admission::ShortCircuit {
                        retry_after: open_timeout,
                    }
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            Inner::HalfOpen {
                in_flight,
                successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    tracing::info!("circuit breaker closed");
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                }
            }
            Inner::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, reason: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!("circuit breaker opened: {reason}");
                    *inner = Inner::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                tracing::warn!("circuit breaker re-opened from half-open: {reason}");
                *inner = Inner::Open {
                    opened_at: Instant::now(),
                };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Current state, for the health snapshot.
    pub fn state(&self) -> CircuitState {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &*inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
