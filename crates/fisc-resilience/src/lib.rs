//! Fisc Resilience: shared per-source protection
//!
//! Circuit state and rate budgets are shared by every concurrent
//! investigation hitting the same source, so each type here is meant to be
//! built once and handed around behind an `Arc`.

pub mod backoff;
pub mod circuit;
pub mod rate_limit;

pub use backoff::Backoff;
pub use circuit::{Admission, CircuitBreaker, CircuitBreakers, CircuitSnapshot, CircuitState};
pub use rate_limit::{
    BudgetStore, Decision, LocalBudgetStore, RateLimiter, StoreError, StrategyState,
};
