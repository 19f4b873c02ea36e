//! Circuit breaker for operations that need remote instances.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │ failures │ (reject) │ backoff  │ (trial)  │       │
//! │      └──────────┘          └──────────┘ elapsed  └──────────┘       │
//! │            ▲                     ▲                     │            │
//! │            │                     └──── trial fails ────┤            │
//! │            └──────────────── trial succeeds ───────────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The open period doubles with every consecutive opening, capped at
//! `max_backoff`. Only one trial call is let through while half-open.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Open period after the first opening.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub total_calls: u64,
    pub total_failures: u64,
    pub short_circuited: u64,
    pub times_opened: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    /// Openings since the last close; drives the backoff exponent.
    consecutive_opens: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
    trial_in_flight: bool,
    stats: CircuitBreakerStats,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            consecutive_opens: 0,
            last_failure: None,
            next_retry: None,
            trial_in_flight: false,
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn next_retry(&self) -> Option<Instant> {
        self.next_retry
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.stats.clone()
    }

    /// Ask to run one call. `Err` carries the time left until a trial.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => {
                self.stats.total_calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                let next_retry = self.next_retry.unwrap_or(now);
                if now >= next_retry {
                    info!("[em-05] Circuit breaker half-open, allowing trial call");
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    self.stats.total_calls += 1;
                    Ok(())
                } else {
                    self.stats.short_circuited += 1;
                    Err(next_retry - now)
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    self.stats.short_circuited += 1;
                    return Err(Duration::ZERO);
                }
                self.trial_in_flight = true;
                self.stats.total_calls += 1;
                Ok(())
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!(previous = %self.state, "[em-05] Circuit breaker closed after successful trial");
        }
        self.close();
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.stats.total_failures += 1;
        self.last_failure = Some(now);

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("[em-05] Trial call failed, reopening circuit");
                self.failure_count += 1;
                self.open(now);
            }
            CircuitState::Open => {
                self.failure_count += 1;
            }
        }
    }

    /// End a call whose outcome says nothing about the link, such as a
    /// rejected payload. A half-open circuit lets the next trial through.
    pub fn release(&mut self) {
        self.trial_in_flight = false;
    }

    /// Force the circuit closed.
    pub fn reset(&mut self) {
        if self.state != CircuitState::Closed {
            info!(previous = %self.state, "[em-05] Circuit breaker reset");
        }
        self.close();
    }

    /// Open period for the current opening.
    pub fn current_backoff(&self) -> Duration {
        let exponent = self.consecutive_opens.saturating_sub(1).min(16);
        self.config
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_backoff)
    }

    fn open(&mut self, now: Instant) {
        self.consecutive_opens += 1;
        self.state = CircuitState::Open;
        self.trial_in_flight = false;
        self.stats.times_opened += 1;
        let backoff = self.current_backoff();
        self.next_retry = Some(now + backoff);
        warn!(
            failures = self.failure_count,
            backoff_ms = backoff.as_millis() as u64,
            "[em-05] Circuit breaker opened"
        );
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.consecutive_opens = 0;
        self.next_retry = None;
        self.trial_in_flight = false;
    }
}
