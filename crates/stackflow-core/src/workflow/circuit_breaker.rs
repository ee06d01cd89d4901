//! Per-resource circuit breaker.
//!
//! A breaker counts consecutive failures of calls to one downstream resource.
//! After `failure_threshold` of them it opens and rejects calls without
//! running them. Once `reset_timeout` has elapsed a single probe call is let
//! through: success closes the breaker, failure reopens it and restarts the
//! timeout.
//!
//! Breakers are shared by every execution that targets the same resource.
//! All transitions happen under one `std::sync::Mutex` that is never held
//! across an await point.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stackflow_types::circuit::{CircuitSnapshot, CircuitStatus};
use stackflow_types::config::CircuitBreakerSettings;
use thiserror::Error;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Outcome of a call routed through a breaker that did not succeed.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit breaker open for resource '{resource}'")]
    Open { resource: String },

    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    /// Normal operation. Counts consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Rejecting calls until `reset_timeout` has passed since `opened_at`.
    Open { opened_at: Instant },
    /// One probe call allowed to test whether the resource recovered.
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Results of calls admitted while closed are ignored once the breaker has
/// left the closed state; only the probe decides a half-open breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CircuitBreaker {
    resource: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(resource: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            resource: resource.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed {
                    consecutive_failures: 0,
                },
                failure_count: 0,
                last_failure_time: None,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    pub fn from_settings(resource: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        Self::new(resource, settings.failure_threshold, settings.reset_timeout())
    }

    /// Run `operation` if the breaker admits it, recording the outcome.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or_else(|| CircuitError::Open {
            resource: self.resource.clone(),
        })?;

        // Releases the probe slot if the call is dropped before completing.
        let mut guard = ProbeGuard {
            breaker: self,
            permit,
            settled: false,
        };

        let result = operation().await;
        guard.settled = true;
        match &result {
            Ok(_) => self.record_success(permit),
            Err(_) => self.record_failure(permit),
        }
        result.map_err(CircuitError::Inner)
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let state = match inner.state {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen { .. } => CircuitStatus::HalfOpen,
        };
        CircuitSnapshot {
            resource: self.resource.clone(),
            state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State is plain data, so a poisoned lock still holds a usable value.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen when the
    /// reset timeout has elapsed.
    fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.lock();
        let permit = match inner.state {
            CircuitState::Closed { .. } => Some(Permit::Normal),
            CircuitState::Open { opened_at } if opened_at.elapsed() >= self.reset_timeout => {
                inner.state = CircuitState::HalfOpen {
                    probe_in_flight: true,
                };
                tracing::info!(resource = %self.resource, "circuit half-open, allowing probe");
                Some(Permit::Probe)
            }
            CircuitState::Open { .. } => None,
            CircuitState::HalfOpen {
                probe_in_flight: false,
            } => {
                inner.state = CircuitState::HalfOpen {
                    probe_in_flight: true,
                };
                Some(Permit::Probe)
            }
            CircuitState::HalfOpen {
                probe_in_flight: true,
            } => None,
        };

        match permit {
            Some(_) => inner.total_calls += 1,
            None => {
                inner.total_rejections += 1;
                tracing::debug!(resource = %self.resource, "circuit open, rejecting call");
            }
        }
        permit
    }

    fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match (inner.state, permit) {
            (CircuitState::Closed { .. }, _) => {
                inner.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
                inner.failure_count = 0;
            }
            (CircuitState::HalfOpen { .. }, Permit::Probe) => {
                inner.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
                inner.failure_count = 0;
                tracing::info!(resource = %self.resource, "probe succeeded, circuit closed");
            }
            // Late result of a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn record_failure(&self, permit: Permit) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(Utc::now());

        match (inner.state, permit) {
            (CircuitState::Closed { consecutive_failures }, _) => {
                let count = consecutive_failures + 1;
                inner.failure_count = count;
                if count >= self.failure_threshold {
                    inner.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        resource = %self.resource,
                        failures = count,
                        reset_timeout_ms = super::saturating_millis(self.reset_timeout),
                        "circuit opened"
                    );
                } else {
                    inner.state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            (CircuitState::HalfOpen { .. }, Permit::Probe) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(resource = %self.resource, "probe failed, circuit reopened");
            }
            _ => {}
        }
    }

    fn abandon(&self, permit: Permit) {
        if permit != Permit::Probe {
            return;
        }
        let mut inner = self.lock();
        if let CircuitState::HalfOpen { .. } = inner.state {
            inner.state = CircuitState::HalfOpen {
                probe_in_flight: false,
            };
        }
    }
}

struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.permit);
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerRegistry
// ---------------------------------------------------------------------------

/// Process-wide map of resource name to breaker, created lazily.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    settings: CircuitBreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    /// The breaker guarding `resource`, created on first use.
    pub fn get_or_create(&self, resource: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(resource) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::from_settings(resource, &self.settings)))
            .clone()
    }

    pub fn snapshot(&self, resource: &str) -> Option<CircuitSnapshot> {
        self.breakers.get(resource).map(|b| b.snapshot())
    }

    /// Snapshots of every known breaker, sorted by resource name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource));
        all
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
