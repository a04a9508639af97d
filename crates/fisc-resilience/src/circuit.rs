//! Circuit Breaker: per-source failure isolation
//!
//! ```text
//! CLOSED --N consecutive failures--> OPEN --cooldown--> HALF_OPEN
//!   ^                                  ^                    |
//!   +------M consecutive successes-----|--------------------+
//!                                      +----any failure-----+
//! ```
//!
//! Every transition happens under the breaker's lock, so concurrent
//! investigations observe one consistent state.

use dashmap::DashMap;
use fisc_core::{CircuitBreakerSettings, CircuitThresholds};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Answer to "may this call go out?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed
    Allowed,
    /// Half-open trial; the outcome decides the next state
    Probe,
    /// Circuit open, or every half-open trial slot is taken
    Rejected { retry_in: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    trial_count: u32,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub source_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub trial_count: u32,
    /// Milliseconds until an open circuit admits a probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
    pub rejected_calls: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    source_id: String,
    thresholds: CircuitThresholds,
    inner: Mutex<Inner>,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(source_id: impl Into<String>, thresholds: CircuitThresholds) -> Self {
        Self {
            source_id: source_id.into(),
            thresholds,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                trial_count: 0,
            }),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn thresholds(&self) -> &CircuitThresholds {
        &self.thresholds
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may proceed. OPEN moves to HALF_OPEN here once
    /// the cooldown has elapsed.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed < self.thresholds.cooldown {
                drop(inner);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Admission::Rejected {
                    retry_in: self.thresholds.cooldown - elapsed,
                };
            }
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            inner.trial_count = 0;
            info!(source_id = %self.source_id, "Circuit half-open after cooldown");
        }

        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen if inner.trial_count < self.thresholds.half_open_max_trials => {
                inner.trial_count += 1;
                Admission::Probe
            }
            _ => {
                drop(inner);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Admission::Rejected {
                    retry_in: Duration::ZERO,
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.trial_count = inner.trial_count.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.thresholds.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    info!(source_id = %self.source_id, "Circuit closed");
                }
            }
            // A call admitted before the circuit opened; it cannot close it
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.thresholds.failure_threshold {
                    Self::open(&mut inner);
                    warn!(
                        source_id = %self.source_id,
                        failures = inner.failure_count,
                        cooldown_ms = self.thresholds.cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                Self::open(&mut inner);
                warn!(source_id = %self.source_id, "Probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Return a probe slot whose call was cancelled before it could succeed or fail
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_count = inner.trial_count.saturating_sub(1);
        }
    }

    fn open(inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        inner.trial_count = 0;
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let cooldown_remaining_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.thresholds
                    .cooldown
                    .saturating_sub(opened_at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        CircuitSnapshot {
            source_id: self.source_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            trial_count: inner.trial_count,
            cooldown_remaining_ms,
            rejected_calls: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide breakers, one per source, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    settings: CircuitBreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, source_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(source_id) {
            return existing.clone();
        }
        self.breakers
            .entry(source_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    source_id,
                    self.settings.thresholds_for(source_id),
                ))
            })
            .clone()
    }

    /// Snapshots of every breaker created so far, ordered by source id
    pub fn snapshot_all(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> =
            self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(failures: u32, successes: u32, cooldown_ms: u64) -> CircuitThresholds {
        CircuitThresholds {
            failure_threshold: failures,
            success_threshold: successes,
            cooldown: Duration::from_millis(cooldown_ms),
            half_open_max_trials: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exact_threshold() {
        let cb = CircuitBreaker::new("tce", thresholds(3, 1, 1_000));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_acquire(), Admission::Allowed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("tce", thresholds(3, 1, 1_000));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_only_after_cooldown() {
        let cb = CircuitBreaker::new("tce", thresholds(1, 2, 1_000));
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(999)).await;
        match cb.try_acquire() {
            Admission::Rejected { retry_in } => assert_eq!(retry_in, Duration::from_millis(1)),
            other => panic!("expected rejection, got {other:?}"),
        }

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cb.try_acquire(), Admission::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // One trial slot only
        assert!(!cb.try_acquire().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("tce", thresholds(1, 2, 1_000));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.try_acquire(), Admission::Probe);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Cooldown restarts from the re-open
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!cb.try_acquire().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_after_m_successes() {
        let cb = CircuitBreaker::new("tce", thresholds(1, 2, 1_000));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(cb.try_acquire(), Admission::Probe);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(cb.try_acquire(), Admission::Probe);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_acquire(), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_frees_slot() {
        let cb = CircuitBreaker::new("tce", thresholds(1, 1, 10));
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.try_acquire(), Admission::Probe);
        cb.release_probe();
        assert_eq!(cb.try_acquire(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shares_breakers() {
        let breakers = CircuitBreakers::new(CircuitBreakerSettings {
            failure_threshold: 1,
            ..Default::default()
        });
        breakers.get("a").record_failure();
        assert_eq!(breakers.get("a").state(), CircuitState::Open);
        assert_eq!(breakers.get("b").state(), CircuitState::Closed);

        let snapshots = breakers.snapshot_all();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].source_id, "a");
        assert_eq!(snapshots[0].cooldown_remaining_ms, Some(60_000));
    }
}
