//! Investigation Context: budget, deadline and cancellation for one run
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct InvestigationContext {
    pub investigation_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub total_budget: Duration,
    deadline: Instant,
    cancel: CancellationToken,
    pub metadata: HashMap<String, Value>,
}

impl InvestigationContext {
    pub fn new(session_id: impl Into<String>, total_budget: Duration) -> Self {
        Self {
            investigation_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            total_budget,
            deadline: Instant::now() + total_budget,
            cancel: CancellationToken::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Budget left before the overall deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Token cancelled when the whole investigation is aborted
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Child token for one stage; cancelling it leaves siblings untouched
    pub fn stage_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_remaining_budget_shrinks() {
        let ctx = InvestigationContext::new("s-1", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(ctx.remaining(), Duration::from_secs(6));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_stage_token_follows_parent() {
        let ctx = InvestigationContext::new("s-1", Duration::from_secs(10));
        let stage = ctx.stage_token();
        assert!(!stage.is_cancelled());
        ctx.cancel();
        assert!(stage.is_cancelled());
    }
}
