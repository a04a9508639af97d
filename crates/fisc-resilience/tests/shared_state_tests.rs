//! Shared breaker and budget state under concurrent use

use fisc_core::{CircuitBreakerSettings, RateLimitStrategy, RateLimitTier};
use fisc_resilience::{Admission, CircuitBreakers, CircuitState, RateLimiter};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_share_one_budget() {
    let tier = RateLimitTier::new(RateLimitStrategy::FixedWindow, 25, Duration::from_secs(3600));
    let limiter = Arc::new(RateLimiter::new(Some(tier)));

    let tasks = (0..200).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.admit("siafi").await })
    });
    let admitted = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(admitted, 25);
    assert_eq!(limiter.remaining("siafi").await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_open_once() {
    let breakers = Arc::new(CircuitBreakers::new(CircuitBreakerSettings {
        failure_threshold: 3,
        ..Default::default()
    }));

    let tasks = (0..50).map(|_| {
        let breakers = breakers.clone();
        tokio::spawn(async move { breakers.get("tce-sp").record_failure() })
    });
    join_all(tasks).await;

    let breaker = breakers.get("tce-sp");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(matches!(breaker.try_acquire(), Admission::Rejected { .. }));
    // Failures after opening do not keep counting
    assert_eq!(breaker.snapshot().failure_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_limited_probes_across_tasks() {
    let breakers = Arc::new(CircuitBreakers::new(CircuitBreakerSettings {
        failure_threshold: 1,
        cooldown_ms: 1_000,
        half_open_max_trials: 2,
        ..Default::default()
    }));
    breakers.get("ibge").record_failure();
    tokio::time::advance(Duration::from_millis(1_000)).await;

    let tasks = (0..10).map(|_| {
        let breakers = breakers.clone();
        tokio::spawn(async move { breakers.get("ibge").try_acquire() })
    });
    let probes = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Admission::Probe)))
        .count();

    assert_eq!(probes, 2);
    assert_eq!(breakers.get("ibge").state(), CircuitState::HalfOpen);
}
