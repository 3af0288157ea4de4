// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Circuit breaker gating calls to the identity provider.
//!
//! One breaker instance is shared by every concurrent validation call to
//! the same provider endpoint. When the provider fails repeatedly the
//! breaker opens and short-circuits further calls, then probes for
//! recovery after a cooldown.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ threshold failures  ┌──────┐   cooldown elapsed  ┌──────────┐
//! │ Closed │ ──within window───→ │ Open │ ──────────────────→ │ HalfOpen │
//! └────────┘                     └──────┘ ←───probe fails──── └──────────┘
//!      ↑                                                           │
//!      └────────────────────── probe succeeds ─────────────────────┘
//! ```
//!
//! The re-open cooldown is fixed (not exponential): an identity provider
//! that is still down after a probe gets the same cooldown again.
//!
//! Exactly one probe is in flight while half-open; concurrent callers are
//! short-circuited until the probe resolves. A probe abandoned before
//! completion (caller cancelled) releases the probe slot without counting
//! as a failure, since its outcome is unknown.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Returned when the breaker short-circuits a call without attempting it.
///
/// Internal signal: the validator surfaces it upward as a transient
/// [`Authentication`](crate::error::AuthError::Authentication) failure,
/// never as an invalid-token error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open")]
pub struct BreakerOpenError;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window before the breaker opens.
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted.
    pub failure_window: Duration,
    /// How long the breaker stays open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Current breaker state, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed {
        window_start: Instant,
        failures: u32,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

#[derive(Debug)]
struct Inner {
    state: State,
    config: BreakerConfig,
    short_circuited: u64,
}

/// Thread-safe circuit breaker.
///
/// All state sits behind a mutex with short critical sections and no I/O
/// under the lock. Cloning shares the same breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed {
                    window_start: Instant::now(),
                    failures: 0,
                },
                config,
                short_circuited: 0,
            })),
        }
    }

    /// Request permission for one provider call.
    ///
    /// On success the returned guard must be resolved with
    /// [`BreakerGuard::success`] or [`BreakerGuard::failure`]; dropping it
    /// unresolved records an unknown outcome (cancellation).
    pub fn acquire(&self) -> Result<BreakerGuard, BreakerOpenError> {
        let mut inner = self.lock();
        match inner.state {
            State::Closed { .. } => Ok(self.guard(false)),
            State::Open { until } => {
                if Instant::now() >= until {
                    // Cooldown elapsed: this caller becomes the probe.
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    tracing::info!(
                        previous_state = "open",
                        new_state = "half_open",
                        "circuit breaker allowing a recovery probe"
                    );
                    Ok(self.guard(true))
                } else {
                    inner.short_circuited += 1;
                    Err(BreakerOpenError)
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    inner.short_circuited += 1;
                    Err(BreakerOpenError)
                } else {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(self.guard(true))
                }
            }
        }
    }

    /// Current state. An open breaker whose cooldown has elapsed reads as
    /// half-open; the transition itself happens in [`acquire`](Self::acquire).
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { until } if Instant::now() >= until => BreakerState::HalfOpen,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Number of calls rejected without reaching the provider.
    pub fn short_circuited(&self) -> u64 {
        self.lock().short_circuited
    }

    fn guard(&self, is_probe: bool) -> BreakerGuard {
        BreakerGuard {
            breaker: self.clone(),
            is_probe,
            resolved: false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_success(&self, is_probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            State::Closed { .. } => {
                inner.state = State::Closed {
                    window_start: Instant::now(),
                    failures: 0,
                };
            }
            State::HalfOpen { .. } if is_probe => {
                inner.state = State::Closed {
                    window_start: Instant::now(),
                    failures: 0,
                };
                tracing::info!(
                    previous_state = "half_open",
                    new_state = "closed",
                    "circuit breaker closed after successful probe"
                );
            }
            // A success landing in any other state belongs to a call that
            // started before the last transition; it carries no signal.
            _ => {}
        }
    }

    fn record_failure(&self, is_probe: bool) {
        let mut inner = self.lock();
        let config = inner.config.clone();
        match inner.state {
            State::Closed {
                window_start,
                failures,
            } => {
                let now = Instant::now();
                let (window_start, failures) =
                    if now.duration_since(window_start) > config.failure_window {
                        (now, 1)
                    } else {
                        (window_start, failures + 1)
                    };
                if failures >= config.failure_threshold {
                    inner.state = State::Open {
                        until: now + config.cooldown,
                    };
                    tracing::warn!(
                        failures,
                        cooldown_secs = config.cooldown.as_secs(),
                        "circuit breaker opened after repeated provider failures"
                    );
                } else {
                    inner.state = State::Closed {
                        window_start,
                        failures,
                    };
                }
            }
            State::HalfOpen { .. } if is_probe => {
                inner.state = State::Open {
                    until: Instant::now() + config.cooldown,
                };
                tracing::warn!(
                    previous_state = "half_open",
                    new_state = "open",
                    cooldown_secs = config.cooldown.as_secs(),
                    "circuit breaker re-opened after probe failure"
                );
            }
            _ => {}
        }
    }

    fn record_abandoned(&self, is_probe: bool) {
        if !is_probe {
            return;
        }
        let mut inner = self.lock();
        if let State::HalfOpen {
            probe_in_flight: true,
        } = inner.state
        {
            // Unknown outcome: free the probe slot so the next caller can
            // probe, but do not count a failure.
            inner.state = State::HalfOpen {
                probe_in_flight: false,
            };
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Permission for one in-flight provider call.
///
/// Must be resolved exactly once; dropping it unresolved is interpreted
/// as a cancelled call with unknown outcome.
#[derive(Debug)]
pub struct BreakerGuard {
    breaker: CircuitBreaker,
    is_probe: bool,
    resolved: bool,
}

impl BreakerGuard {
    /// The call reached the provider and the provider answered.
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.is_probe);
    }

    /// The call failed to reach the provider (network error, timeout).
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.is_probe);
    }
}

impl Drop for BreakerGuard {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.record_abandoned(self.is_probe);
        }
    }
}
