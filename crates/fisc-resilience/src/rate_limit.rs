//! Rate Limiter: per-source admission control
//!
//! Four strategies share one contract: decide whether a call may go out now
//! and, if so, consume budget in the same step. Budget lives in a
//! [`BudgetStore`]. A shared store lets several workers or processes agree
//! on budget; when it fails, the limiter keeps going on its local store and
//! says so in the logs.
//!
//! All state machines take an explicit `now_ms` so they stay deterministic
//! under test. Arithmetic is integer-only:
//!
//! - token bucket: one token = `window_ms` credit units, refilled at `limit`
//!   units per millisecond
//! - leaky bucket: GCRA over time scaled by `limit`, so the emission
//!   interval is exactly `window_ms` scaled units

use async_trait::async_trait;
use dashmap::DashMap;
use fisc_core::{EngineConfig, RateLimitStrategy, RateLimitTier};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub admitted: bool,
    /// Calls still admissible right now, after this decision
    pub remaining: u32,
    /// Wait before the next call could be admitted (0 when admitted)
    pub retry_after_ms: u64,
}

impl Decision {
    fn admit(remaining: u32) -> Self {
        Self {
            admitted: true,
            remaining,
            retry_after_ms: 0,
        }
    }

    fn deny(retry_after_ms: u64) -> Self {
        Self {
            admitted: false,
            remaining: 0,
            retry_after_ms: retry_after_ms.max(1),
        }
    }
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Budget state of one key under one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyState {
    FixedWindow { window_index: u64, count: u32 },
    /// Exact log of admission times inside the trailing window
    SlidingWindow { log: VecDeque<u64> },
    TokenBucket { credit: u64, last_ms: u64 },
    /// Theoretical arrival time in scaled units
    LeakyBucket { tat: u64 },
}

impl StrategyState {
    /// Fresh state: empty windows, full buckets
    pub fn new(tier: &RateLimitTier, now_ms: u64) -> Self {
        match tier.strategy {
            RateLimitStrategy::FixedWindow => StrategyState::FixedWindow {
                window_index: now_ms / tier.window_ms.max(1),
                count: 0,
            },
            RateLimitStrategy::SlidingWindow => StrategyState::SlidingWindow {
                log: VecDeque::new(),
            },
            RateLimitStrategy::TokenBucket => StrategyState::TokenBucket {
                credit: bucket_size(tier),
                last_ms: now_ms,
            },
            RateLimitStrategy::LeakyBucket => StrategyState::LeakyBucket { tat: 0 },
        }
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        match self {
            StrategyState::FixedWindow { .. } => RateLimitStrategy::FixedWindow,
            StrategyState::SlidingWindow { .. } => RateLimitStrategy::SlidingWindow,
            StrategyState::TokenBucket { .. } => RateLimitStrategy::TokenBucket,
            StrategyState::LeakyBucket { .. } => RateLimitStrategy::LeakyBucket,
        }
    }

    /// Decide and, when admitted, consume one unit of budget
    pub fn admit(&mut self, tier: &RateLimitTier, now_ms: u64) -> Decision {
        let window = tier.window_ms.max(1);
        let limit = tier.limit.max(1);

        match self {
            StrategyState::FixedWindow {
                window_index,
                count,
            } => {
                let index = now_ms / window;
                if index != *window_index {
                    *window_index = index;
                    *count = 0;
                }
                if *count < limit {
                    *count += 1;
                    Decision::admit(limit - *count)
                } else {
                    Decision::deny((index + 1) * window - now_ms)
                }
            }
            StrategyState::SlidingWindow { log } => {
                evict(log, window, now_ms);
                if (log.len() as u32) < limit {
                    log.push_back(now_ms);
                    Decision::admit(limit - log.len() as u32)
                } else {
                    let oldest = log.front().copied().unwrap_or(now_ms);
                    Decision::deny(oldest + window - now_ms)
                }
            }
            StrategyState::TokenBucket { credit, last_ms } => {
                refill(credit, last_ms, tier, now_ms);
                if *credit >= window {
                    *credit -= window;
                    Decision::admit((*credit / window) as u32)
                } else {
                    Decision::deny((window - *credit).div_ceil(limit as u64))
                }
            }
            StrategyState::LeakyBucket { tat } => {
                let now = now_ms * limit as u64;
                let tolerance = leaky_tolerance(tier);
                let start = (*tat).max(now);
                if start <= now + tolerance {
                    *tat = start + window;
                    let remaining = (now + tolerance + window).saturating_sub(*tat) / window;
                    Decision::admit(remaining as u32)
                } else {
                    Decision::deny((start - now - tolerance).div_ceil(limit as u64))
                }
            }
        }
    }

    /// Calls admissible right now, without consuming anything
    pub fn remaining(&self, tier: &RateLimitTier, now_ms: u64) -> u32 {
        let window = tier.window_ms.max(1);
        let limit = tier.limit.max(1);

        match self {
            StrategyState::FixedWindow {
                window_index,
                count,
            } => {
                if now_ms / window != *window_index {
                    limit
                } else {
                    limit.saturating_sub(*count)
                }
            }
            StrategyState::SlidingWindow { log } => {
                let live = log.iter().filter(|t| **t + window > now_ms).count() as u32;
                limit.saturating_sub(live)
            }
            StrategyState::TokenBucket { credit, last_ms } => {
                let (mut credit, mut last_ms) = (*credit, *last_ms);
                refill(&mut credit, &mut last_ms, tier, now_ms);
                (credit / window) as u32
            }
            StrategyState::LeakyBucket { tat } => {
                let now = now_ms * limit as u64;
                let start = (*tat).max(now);
                ((now + leaky_tolerance(tier) + window).saturating_sub(start) / window) as u32
            }
        }
    }
}

fn bucket_size(tier: &RateLimitTier) -> u64 {
    tier.capacity().max(1) as u64 * tier.window_ms.max(1)
}

fn refill(credit: &mut u64, last_ms: &mut u64, tier: &RateLimitTier, now_ms: u64) {
    if now_ms > *last_ms {
        let earned = (now_ms - *last_ms) * tier.limit.max(1) as u64;
        *credit = (*credit + earned).min(bucket_size(tier));
        *last_ms = now_ms;
    }
}

/// Burst allowance beyond the first call, in scaled units
fn leaky_tolerance(tier: &RateLimitTier) -> u64 {
    (tier.capacity().max(1) as u64 - 1) * tier.window_ms.max(1)
}

fn evict(log: &mut VecDeque<u64>, window: u64, now_ms: u64) {
    while log.front().is_some_and(|t| t + window <= now_ms) {
        log.pop_front();
    }
}

// ============================================================================
// STORES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("STORE/unavailable: {0}")]
    Unavailable(String),

    #[error("STORE/corrupt state for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Where rate budget lives. Implementations must make `admit` atomic per key.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    fn name(&self) -> &str;

    async fn admit(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now_ms: u64,
    ) -> Result<Decision, StoreError>;

    async fn remaining(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now_ms: u64,
    ) -> Result<u32, StoreError>;
}

/// In-process budget; the decision runs under the map entry's lock
#[derive(Debug, Default)]
pub struct LocalBudgetStore {
    states: DashMap<String, StrategyState>,
}

impl LocalBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit_now(&self, key: &str, tier: &RateLimitTier, now_ms: u64) -> Decision {
        let mut state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| StrategyState::new(tier, now_ms));
        // Tier changed strategy since the state was created
        if state.strategy() != tier.strategy {
            *state = StrategyState::new(tier, now_ms);
        }
        state.admit(tier, now_ms)
    }

    pub fn remaining_now(&self, key: &str, tier: &RateLimitTier, now_ms: u64) -> u32 {
        match self.states.get(key) {
            Some(state) if state.strategy() == tier.strategy => state.remaining(tier, now_ms),
            _ => StrategyState::new(tier, now_ms).remaining(tier, now_ms),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl BudgetStore for LocalBudgetStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn admit(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now_ms: u64,
    ) -> Result<Decision, StoreError> {
        Ok(self.admit_now(key, tier, now_ms))
    }

    async fn remaining(
        &self,
        key: &str,
        tier: &RateLimitTier,
        now_ms: u64,
    ) -> Result<u32, StoreError> {
        Ok(self.remaining_now(key, tier, now_ms))
    }
}

// ============================================================================
// LIMITER
// ============================================================================

/// Process-wide limiter, one budget per source
pub struct RateLimiter {
    tiers: HashMap<String, RateLimitTier>,
    default_tier: Option<RateLimitTier>,
    local: LocalBudgetStore,
    shared: Option<Arc<dyn BudgetStore>>,
    degraded: AtomicBool,
    epoch: Instant,
}

impl RateLimiter {
    /// Limiter applying `default_tier` to every source without its own tier
    pub fn new(default_tier: Option<RateLimitTier>) -> Self {
        Self {
            tiers: HashMap::new(),
            default_tier,
            local: LocalBudgetStore::new(),
            shared: None,
            degraded: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let default_tier = config
            .rate_limits
            .tiers
            .get(&config.rate_limits.default_tier)
            .cloned();
        let mut limiter = Self::new(default_tier);
        for source in &config.sources {
            if let Some(tier) = config.tier_for(&source.id) {
                limiter.tiers.insert(source.id.clone(), tier.clone());
            }
        }
        limiter
    }

    pub fn with_source_tier(mut self, source_id: impl Into<String>, tier: RateLimitTier) -> Self {
        self.tiers.insert(source_id.into(), tier);
        self
    }

    pub fn with_shared_store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.shared = Some(store);
        self
    }

    pub fn tier(&self, source_id: &str) -> Option<&RateLimitTier> {
        self.tiers.get(source_id).or(self.default_tier.as_ref())
    }

    /// True while the shared store is failing and local budget is in use
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// May a call to `source_id` go out now? Consumes budget when it may.
    pub async fn admit(&self, source_id: &str) -> bool {
        self.decide(source_id).await.admitted
    }

    pub async fn decide(&self, source_id: &str) -> Decision {
        self.decide_at(source_id, self.now_ms()).await
    }

    pub async fn decide_at(&self, source_id: &str, now_ms: u64) -> Decision {
        let Some(tier) = self.tier(source_id) else {
            return Decision::admit(u32::MAX);
        };
        let key = store_key(source_id);

        let decision = match &self.shared {
            Some(store) => match store.admit(&key, tier, now_ms).await {
                Ok(decision) => {
                    self.mark_recovered(store.name());
                    decision
                }
                Err(e) => {
                    self.mark_degraded(store.name(), &e);
                    self.local.admit_now(&key, tier, now_ms)
                }
            },
            None => self.local.admit_now(&key, tier, now_ms),
        };

        if !decision.admitted {
            debug!(
                source_id,
                retry_after_ms = decision.retry_after_ms,
                "Rate limit reached"
            );
        }
        decision
    }

    /// Calls admissible right now; `None` when the source is unlimited
    pub async fn remaining(&self, source_id: &str) -> Option<u32> {
        let tier = self.tier(source_id)?;
        let key = store_key(source_id);
        let now_ms = self.now_ms();
        if let Some(store) = &self.shared {
            match store.remaining(&key, tier, now_ms).await {
                Ok(n) => return Some(n),
                Err(e) => self.mark_degraded(store.name(), &e),
            }
        }
        Some(self.local.remaining_now(&key, tier, now_ms))
    }

    fn mark_degraded(&self, store: &str, error: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(store, error = %error, "Shared rate budget unavailable, using local budget");
        }
    }

    fn mark_recovered(&self, store: &str) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(store, "Shared rate budget restored");
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tiers", &self.tiers.len())
            .field("shared", &self.shared.as_ref().map(|s| s.name().to_string()))
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn store_key(source_id: &str) -> String {
    format!("ratelimit:{}", source_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn tier(strategy: RateLimitStrategy, limit: u32, window_ms: u64) -> RateLimitTier {
        RateLimitTier::new(strategy, limit, Duration::from_millis(window_ms))
    }

    fn admitted(state: &mut StrategyState, tier: &RateLimitTier, now_ms: u64, n: usize) -> usize {
        (0..n).filter(|_| state.admit(tier, now_ms).admitted).count()
    }

    #[test]
    fn test_fixed_window_resets_on_boundary() {
        let t = tier(RateLimitStrategy::FixedWindow, 3, 1_000);
        let mut s = StrategyState::new(&t, 0);
        assert_eq!(admitted(&mut s, &t, 10, 5), 3);
        let denied = s.admit(&t, 400);
        assert!(!denied.admitted);
        assert_eq!(denied.retry_after_ms, 600);
        assert_eq!(admitted(&mut s, &t, 1_000, 5), 3);
    }

    #[test]
    fn test_sliding_window_counts_trailing_calls() {
        let t = tier(RateLimitStrategy::SlidingWindow, 2, 1_000);
        let mut s = StrategyState::new(&t, 0);
        assert!(s.admit(&t, 0).admitted);
        assert!(s.admit(&t, 600).admitted);
        let denied = s.admit(&t, 900);
        assert!(!denied.admitted);
        assert_eq!(denied.retry_after_ms, 100);
        // The call at 0 has left the window, the one at 600 has not
        assert!(s.admit(&t, 1_000).admitted);
        assert!(!s.admit(&t, 1_500).admitted);
    }

    #[test]
    fn test_token_bucket_burst_then_refill() {
        let t = tier(RateLimitStrategy::TokenBucket, 10, 1_000).with_burst(3);
        let mut s = StrategyState::new(&t, 0);
        assert_eq!(admitted(&mut s, &t, 0, 10), 3);
        // One token every 100ms
        assert!(!s.admit(&t, 99).admitted);
        assert!(s.admit(&t, 100).admitted);
        assert_eq!(s.remaining(&t, 100_000), 3);
    }

    #[test]
    fn test_leaky_bucket_spaces_calls() {
        let t = tier(RateLimitStrategy::LeakyBucket, 4, 1_000).with_burst(2);
        let mut s = StrategyState::new(&t, 0);
        assert_eq!(admitted(&mut s, &t, 0, 5), 2);
        let denied = s.admit(&t, 0);
        assert_eq!(denied.retry_after_ms, 250);
        assert!(s.admit(&t, 250).admitted);
        assert!(!s.admit(&t, 300).admitted);
        assert!(s.admit(&t, 500).admitted);
    }

    #[test]
    fn test_remaining_does_not_consume() {
        let t = tier(RateLimitStrategy::FixedWindow, 2, 1_000);
        let store = LocalBudgetStore::new();
        assert_eq!(store.remaining_now("k", &t, 0), 2);
        assert_eq!(store.remaining_now("k", &t, 0), 2);
        assert_eq!(store.admit_now("k", &t, 0).remaining, 1);
        assert_eq!(store.remaining_now("k", &t, 0), 1);
    }

    #[test]
    fn test_strategy_change_resets_state() {
        let store = LocalBudgetStore::new();
        let fixed = tier(RateLimitStrategy::FixedWindow, 1, 1_000);
        assert!(store.admit_now("k", &fixed, 0).admitted);
        assert!(!store.admit_now("k", &fixed, 0).admitted);
        let sliding = tier(RateLimitStrategy::SlidingWindow, 1, 1_000);
        assert!(store.admit_now("k", &sliding, 0).admitted);
    }

    struct FlakyStore {
        up: AtomicBool,
        calls: AtomicU32,
        inner: LocalBudgetStore,
    }

    #[async_trait]
    impl BudgetStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn admit(
            &self,
            key: &str,
            tier: &RateLimitTier,
            now_ms: u64,
        ) -> Result<Decision, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(self.inner.admit_now(key, tier, now_ms))
            } else {
                Err(StoreError::Unavailable("connection refused".into()))
            }
        }

        async fn remaining(
            &self,
            key: &str,
            tier: &RateLimitTier,
            now_ms: u64,
        ) -> Result<u32, StoreError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(self.inner.remaining_now(key, tier, now_ms))
            } else {
                Err(StoreError::Unavailable("connection refused".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_shared_store_failure_falls_back_to_local() {
        let store = Arc::new(FlakyStore {
            up: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            inner: LocalBudgetStore::new(),
        });
        let limiter = RateLimiter::new(Some(tier(RateLimitStrategy::FixedWindow, 2, 60_000)))
            .with_shared_store(store.clone());

        assert!(limiter.decide_at("siafi", 0).await.admitted);
        assert!(limiter.is_degraded());
        assert!(limiter.decide_at("siafi", 1).await.admitted);
        // Local budget still enforced while degraded
        assert!(!limiter.decide_at("siafi", 2).await.admitted);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);

        store.up.store(true, Ordering::SeqCst);
        assert!(limiter.decide_at("siafi", 3).await.admitted);
        assert!(!limiter.is_degraded());
    }

    #[tokio::test]
    async fn test_per_source_tiers() {
        let limiter = RateLimiter::new(Some(tier(RateLimitStrategy::FixedWindow, 1, 60_000)))
            .with_source_tier("ibge", tier(RateLimitStrategy::FixedWindow, 3, 60_000));
        assert_eq!(limiter.remaining("ibge").await, Some(3));
        assert_eq!(limiter.remaining("siafi").await, Some(1));
        assert!(limiter.decide_at("siafi", 0).await.admitted);
        assert!(!limiter.decide_at("siafi", 0).await.admitted);
        assert!(limiter.decide_at("ibge", 0).await.admitted);
    }

    #[tokio::test]
    async fn test_no_tier_is_unlimited() {
        let limiter = RateLimiter::new(None);
        assert!(limiter.admit("anything").await);
        assert_eq!(limiter.remaining("anything").await, None);
    }
}
