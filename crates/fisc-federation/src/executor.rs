//! Data Federation Executor
//!
//! Runs one stage's calls on a fixed-size pool. Per call, in order:
//!
//! 1. fresh cache entry → served without touching circuit or rate budget
//! 2. circuit open → `circuit_open`, no network attempt
//! 3. rate budget denied → `rate_limited`, no network attempt
//! 4. adapter attempts, bounded by the adapter timeout and the stage
//!    deadline; transient failures retry with capped backoff, permanent
//!    failures are recorded at once
//!
//! Circuit accounting is per call, after retries: one success or one
//! failure. Calls cut short by cancellation of the investigation release
//! their probe slot and leave the circuit untouched.

use fisc_core::{
    AdapterError, EngineConfig, FetchOutcome, SourceAdapter, SourceAdapterResult, SourceCall,
    SourceError, SourceStatus, Stage,
};
use fisc_registry::SourceRegistry;
use fisc_resilience::{Admission, Backoff, CircuitBreaker, CircuitBreakers, RateLimiter};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;

const CANCELLED: &str = "cancelled";

/// Results of one stage, in call order
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub index: usize,
    pub results: Vec<SourceAdapterResult>,
    /// The stage deadline cut at least one call short
    pub deadline_exceeded: bool,
    #[serde(with = "fisc_core::data_model::duration_ms")]
    pub elapsed: Duration,
}

impl StageOutcome {
    pub fn usable(&self) -> impl Iterator<Item = &SourceAdapterResult> {
        self.results.iter().filter(|r| r.status.is_usable())
    }

    pub fn usable_count(&self) -> usize {
        self.usable().count()
    }

    /// Some call produced no usable data, or the deadline was hit
    pub fn is_degraded(&self) -> bool {
        self.deadline_exceeded || self.results.iter().any(|r| !r.status.is_usable())
    }

    /// Every call failed (an empty stage has not failed)
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.usable_count() == 0
    }
}

/// Frees a half-open probe slot unless the call's outcome was recorded
struct ProbeGuard {
    breaker: Arc<CircuitBreaker>,
    armed: bool,
}

impl ProbeGuard {
    fn new(breaker: Arc<CircuitBreaker>, admission: Admission) -> Self {
        Self {
            breaker,
            armed: admission == Admission::Probe,
        }
    }

    fn success(mut self) {
        self.armed = false;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.armed = false;
        self.breaker.record_failure();
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}

enum Attempt {
    Done(FetchOutcome),
    Failed(AdapterError),
    DeadlineHit,
    Cancelled,
}

pub struct DataFederationExecutor {
    registry: Arc<SourceRegistry>,
    breakers: Arc<CircuitBreakers>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<ResponseCache>>,
    backoff: Backoff,
    pool_size: usize,
    grace: Duration,
}

impl DataFederationExecutor {
    /// Executor over shared breakers and rate budget. Retry, pool size and
    /// grace come from `config`; the cache is off until [`Self::with_cache`].
    pub fn new(
        registry: Arc<SourceRegistry>,
        breakers: Arc<CircuitBreakers>,
        limiter: Arc<RateLimiter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            limiter,
            cache: None,
            backoff: Backoff::from_settings(&config.retry),
            pool_size: config.investigation.worker_pool_size.max(1),
            grace: config.investigation.deadline_grace(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run every call of `stage`. Never fails; returns within the stage
    /// deadline plus grace.
    pub async fn execute(&self, stage: &Stage, cancel: &CancellationToken) -> StageOutcome {
        let started = Instant::now();
        let deadline = started + stage.deadline;
        let token = cancel.child_token();

        let mut finished: HashMap<String, SourceAdapterResult> = HashMap::new();
        let collect = async {
            let mut results = stream::iter(stage.calls.iter())
                .map(|call| self.run_call(call, deadline, &token))
                .buffer_unordered(self.pool_size);
            while let Some(result) = results.next().await {
                finished.insert(result.call_id.clone(), result);
            }
        };
        let completed = tokio::time::timeout_at(deadline + self.grace, collect)
            .await
            .is_ok();
        // Anything still running is dropped with the stream above
        token.cancel();

        if !completed {
            warn!(stage = stage.index, "Stage overran its deadline grace");
        }

        let timed_out = SourceError::StageDeadlineExceeded.to_string();
        let results: Vec<SourceAdapterResult> = stage
            .calls
            .iter()
            .map(|call| {
                finished.remove(&call.call_id).unwrap_or_else(|| {
                    SourceAdapterResult::failure(call, SourceStatus::TransientError, &timed_out)
                })
            })
            .collect();

        let deadline_exceeded =
            !completed || results.iter().any(|r| r.reason.as_deref() == Some(timed_out.as_str()));

        let outcome = StageOutcome {
            index: stage.index,
            results,
            deadline_exceeded,
            elapsed: started.elapsed(),
        };
        info!(
            stage = stage.index,
            calls = stage.calls.len(),
            usable = outcome.usable_count(),
            deadline_exceeded,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Stage executed"
        );
        outcome
    }

    async fn run_call(
        &self,
        call: &SourceCall,
        deadline: Instant,
        token: &CancellationToken,
    ) -> SourceAdapterResult {
        // Queued behind the pool until the deadline passed
        if Instant::now() >= deadline {
            return SourceAdapterResult::failure(
                call,
                SourceStatus::TransientError,
                SourceError::StageDeadlineExceeded.to_string(),
            );
        }
        if token.is_cancelled() {
            return SourceAdapterResult::failure(call, SourceStatus::TransientError, CANCELLED);
        }

        let result = match &self.cache {
            Some(cache) => {
                let mut result = cache
                    .get_or_fetch(&call.fingerprint(), || self.guarded_fetch(call, deadline, token))
                    .await;
                result.call_id = call.call_id.clone();
                result
            }
            None => self.guarded_fetch(call, deadline, token).await,
        };

        debug!(
            source_id = %call.source_id,
            call_id = %call.call_id,
            status = %result.status,
            attempts = result.attempts,
            latency_ms = result.latency.as_millis() as u64,
            from_cache = result.from_cache,
            "Call finished"
        );
        result
    }

    /// Circuit check, rate admission, then attempts with retry
    async fn guarded_fetch(
        &self,
        call: &SourceCall,
        deadline: Instant,
        token: &CancellationToken,
    ) -> SourceAdapterResult {
        let Some(adapter) = self.registry.adapter(&call.source_id) else {
            return SourceAdapterResult::failure(
                call,
                SourceStatus::PermanentError,
                "no adapter registered",
            );
        };

        let breaker = self.breakers.get(&call.source_id);
        let admission = breaker.try_acquire();
        if let Admission::Rejected { retry_in } = admission {
            return SourceAdapterResult::failure(
                call,
                SourceStatus::CircuitOpen,
                format!("{}; retry in {}ms", SourceError::CircuitOpen, retry_in.as_millis()),
            );
        }
        let probe = ProbeGuard::new(breaker, admission);

        let decision = self.limiter.decide(&call.source_id).await;
        if !decision.admitted {
            return SourceAdapterResult::failure(
                call,
                SourceStatus::RateLimited,
                format!(
                    "{}; retry after {}ms",
                    SourceError::RateLimited,
                    decision.retry_after_ms
                ),
            );
        }

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let attempt = self.attempt(adapter.as_ref(), call, deadline, token).await;

            let error = match attempt {
                Attempt::Done(outcome) => {
                    probe.success();
                    let latency = started.elapsed();
                    let result = if outcome.partial {
                        SourceAdapterResult::partial(call, outcome.payload, latency)
                    } else {
                        SourceAdapterResult::success(call, outcome.payload, latency)
                    };
                    return result.with_attempts(attempts);
                }
                Attempt::Cancelled => {
                    // Probe slot is released by the guard
                    return SourceAdapterResult::failure(
                        call,
                        SourceStatus::TransientError,
                        CANCELLED,
                    )
                    .with_attempts(attempts)
                    .with_latency(started.elapsed());
                }
                Attempt::DeadlineHit => SourceError::StageDeadlineExceeded,
                Attempt::Failed(e) => SourceError::from(e),
            };

            let retry = match &error {
                SourceError::Transient(reason) => self
                    .backoff
                    .next_delay_within(attempts - 1, deadline)
                    .map(|delay| (delay, reason.clone())),
                _ => None,
            };

            let Some((delay, reason)) = retry else {
                probe.failure();
                return SourceAdapterResult::failure(call, error.status(), failure_reason(&error))
                    .with_attempts(attempts)
                    .with_latency(started.elapsed());
            };

            debug!(
                source_id = %call.source_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "Retrying after transient failure"
            );
            tokio::select! {
                _ = token.cancelled() => {
                    return SourceAdapterResult::failure(
                        call,
                        SourceStatus::TransientError,
                        CANCELLED,
                    )
                    .with_attempts(attempts)
                    .with_latency(started.elapsed());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Every network attempt spends rate budget
            let decision = self.limiter.decide(&call.source_id).await;
            if !decision.admitted {
                probe.failure();
                return SourceAdapterResult::failure(
                    call,
                    SourceStatus::TransientError,
                    format!("{}; retry not admitted by rate limit", reason),
                )
                .with_attempts(attempts)
                .with_latency(started.elapsed());
            }
        }
    }

    async fn attempt(
        &self,
        adapter: &dyn SourceAdapter,
        call: &SourceCall,
        deadline: Instant,
        token: &CancellationToken,
    ) -> Attempt {
        let attempt_timeout = adapter.timeout();
        let attempt_deadline = deadline.min(Instant::now() + attempt_timeout);

        tokio::select! {
            biased;
            _ = token.cancelled() => Attempt::Cancelled,
            fetched = tokio::time::timeout_at(
                attempt_deadline,
                adapter.fetch(&call.params, token),
            ) => {
                match fetched {
                    Ok(Ok(outcome)) => Attempt::Done(outcome),
                    Ok(Err(e)) => Attempt::Failed(e),
                    Err(_) if attempt_deadline >= deadline => Attempt::DeadlineHit,
                    Err(_) => Attempt::Failed(AdapterError::Transient(format!(
                        "attempt timed out after {}ms",
                        attempt_timeout.as_millis()
                    ))),
                }
            }
        }
    }
}

/// Reason text without the status prefix already carried by the status
fn failure_reason(error: &SourceError) -> String {
    match error {
        SourceError::Transient(r) | SourceError::Permanent(r) => r.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for DataFederationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFederationExecutor")
            .field("sources", &self.registry.len())
            .field("pool_size", &self.pool_size)
            .field("grace", &self.grace)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}
