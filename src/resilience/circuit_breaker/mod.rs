//! Count-based circuit breaker.
//!
//! States:
//! - **Closed**: calls proceed; the last `sliding_window_size` outcomes are
//!   kept and the breaker trips once the failure rate reaches the threshold
//! - **Open**: calls are rejected without running until the wait elapses
//! - **Half-Open**: a fixed number of trial calls run; one failure reopens,
//!   all trials succeeding closes with a fresh window

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{Next, Policy, PolicyError};

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100) at or above which the breaker trips.
    pub failure_rate_threshold: f64,
    /// Number of most recent calls the failure rate is computed over.
    pub sliding_window_size: usize,
    /// Calls required before the rate is evaluated. Defaults to the window size.
    pub minimum_number_of_calls: Option<usize>,
    pub wait_duration_open_state_secs: u64,
    pub permitted_calls_in_half_open_state: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_number_of_calls: None,
            wait_duration_open_state_secs: 10,
            permitted_calls_in_half_open_state: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn wait_duration_open_state(&self) -> Duration {
        Duration::from_secs(self.wait_duration_open_state_secs)
    }

    fn window_size(&self) -> usize {
        self.sliding_window_size.max(1)
    }

    fn minimum_calls(&self) -> usize {
        self.minimum_number_of_calls
            .unwrap_or(self.sliding_window_size)
            .clamp(1, self.window_size())
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    /// `true` entries are failures.
    Closed { window: VecDeque<bool> },
    Open { until: Instant },
    HalfOpen { issued: u32, succeeded: u32 },
}

/// Circuit breaker policy. Shared across calls; state sits behind a mutex
/// that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State::Closed {
                window: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open breaker whose wait has elapsed still reports
    /// `Open` until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a call may run, moving Open to HalfOpen when due.
    fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { .. } => true,
            State::Open { until } => {
                if Instant::now() < *until {
                    return false;
                }
                info!(breaker = %self.name, "Circuit breaker half-open");
                *state = State::HalfOpen {
                    issued: 1,
                    succeeded: 0,
                };
                true
            }
            State::HalfOpen { issued, .. } => {
                if *issued >= self.config.permitted_calls_in_half_open_state {
                    return false;
                }
                *issued += 1;
                true
            }
        }
    }

    fn record(&self, failed: bool) {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { window } => {
                window.push_back(failed);
                while window.len() > self.config.window_size() {
                    window.pop_front();
                }
                if window.len() < self.config.minimum_calls() {
                    return;
                }
                let failures = window.iter().filter(|&&f| f).count();
                let rate = failures as f64 * 100.0 / window.len() as f64;
                if rate >= self.config.failure_rate_threshold {
                    warn!(
                        breaker = %self.name,
                        failure_rate = rate,
                        threshold = self.config.failure_rate_threshold,
                        "Circuit breaker opened"
                    );
                    *state = self.open();
                }
            }
            State::HalfOpen { succeeded, .. } => {
                if failed {
                    warn!(breaker = %self.name, "Trial call failed, circuit breaker reopened");
                    *state = self.open();
                    return;
                }
                *succeeded += 1;
                if *succeeded >= self.config.permitted_calls_in_half_open_state {
                    info!(breaker = %self.name, "Circuit breaker closed");
                    *state = State::Closed {
                        window: VecDeque::new(),
                    };
                }
            }
            // Outcome of a call admitted before the breaker opened.
            State::Open { .. } => {}
        }
    }

    fn open(&self) -> State {
        State::Open {
            until: Instant::now() + self.config.wait_duration_open_state(),
        }
    }
}

#[async_trait]
impl<E: Send + 'static> Policy<E> for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, next: Next<'_, E>) -> Result<(), PolicyError<E>> {
        if !self.try_acquire() {
            return Err(PolicyError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        let result = next.run().await;
        match &result {
            Ok(()) => self.record(false),
            Err(PolicyError::Call(_)) => self.record(true),
            Err(PolicyError::CircuitOpen { .. }) => {}
        }
        result
    }
}
