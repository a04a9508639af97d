use fisc_core::{RateLimitStrategy, RateLimitTier};
use fisc_resilience::{LocalBudgetStore, StrategyState};
use proptest::prelude::*;
use std::time::Duration;

fn arb_strategy() -> impl Strategy<Value = RateLimitStrategy> {
    prop_oneof![
        Just(RateLimitStrategy::FixedWindow),
        Just(RateLimitStrategy::SlidingWindow),
        Just(RateLimitStrategy::TokenBucket),
        Just(RateLimitStrategy::LeakyBucket),
    ]
}

fn arb_tier() -> impl Strategy<Value = RateLimitTier> {
    (
        arb_strategy(),
        1u32..20,
        50u64..2_000,
        proptest::option::of(1u32..30),
    )
        .prop_map(|(strategy, limit, window_ms, burst)| {
            let tier = RateLimitTier::new(strategy, limit, Duration::from_millis(window_ms));
            match burst {
                Some(b) => tier.with_burst(b),
                None => tier,
            }
        })
}

/// Request times as a non-decreasing sequence built from gaps
fn arb_times() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::vec(0u64..120, 1..400).prop_map(|gaps| {
        let mut now = 0;
        gaps.into_iter()
            .map(|g| {
                now += g;
                now
            })
            .collect()
    })
}

fn budget_bound(tier: &RateLimitTier) -> usize {
    let limit = tier.limit as usize;
    match tier.strategy {
        RateLimitStrategy::SlidingWindow => limit,
        RateLimitStrategy::FixedWindow => 2 * limit,
        RateLimitStrategy::TokenBucket | RateLimitStrategy::LeakyBucket => {
            tier.capacity() as usize + limit
        }
    }
}

proptest! {
    #[test]
    fn admissions_in_any_window_stay_within_budget(tier in arb_tier(), times in arb_times()) {
        let mut state = StrategyState::new(&tier, 0);
        let admitted: Vec<u64> = times
            .iter()
            .copied()
            .filter(|now| state.admit(&tier, *now).admitted)
            .collect();

        let bound = budget_bound(&tier);
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| **t < start + tier.window_ms)
                .count();
            prop_assert!(
                in_window <= bound,
                "{:?}: {} admissions in window starting at {}, bound {}",
                tier.strategy, in_window, start, bound
            );
        }
    }

    #[test]
    fn first_call_on_fresh_budget_is_admitted(tier in arb_tier(), now in 0u64..1_000_000) {
        let store = LocalBudgetStore::new();
        let decision = store.admit_now("ratelimit:any", &tier, now);
        prop_assert!(decision.admitted);
        prop_assert_eq!(decision.retry_after_ms, 0);
    }

    #[test]
    fn denial_carries_a_positive_wait(tier in arb_tier(), times in arb_times()) {
        let mut state = StrategyState::new(&tier, 0);
        for now in times {
            let decision = state.admit(&tier, now);
            if !decision.admitted {
                prop_assert!(decision.retry_after_ms > 0);
                prop_assert_eq!(decision.remaining, 0);
            }
        }
    }
}
