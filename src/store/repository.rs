use anyhow::Result;
use async_trait::async_trait;

use crate::store::model::{
    Autopilot, MarketSignal, MemoryEntry, RunRecord, Strategy, UpsertAutopilotInput,
};

/// Persistence façade. Every method is atomic at the row level and may fail
/// only with the fatal "backend unreachable" kind (propagated as `anyhow::Error`,
/// surfaced to callers as `AppError::BackendUnreachable`).
#[async_trait]
pub trait StoreRepository: Send + Sync {
    // ---- Autopilots ----

    async fn upsert_enabled(&self, input: &UpsertAutopilotInput, now_ms: i64) -> Result<()>;

    async fn disable(
        &self,
        chain: &str,
        token_id: i64,
        reason: &str,
        tx_hash: Option<&str>,
        now_ms: i64,
    ) -> Result<()>;

    async fn get_autopilot(&self, chain: &str, token_id: i64) -> Result<Option<Autopilot>>;

    async fn list_autopilots(&self, chain: &str) -> Result<Vec<Autopilot>>;

    async fn list_enabled_token_ids(&self, chain: &str) -> Result<Vec<i64>>;

    /// Join of enabled strategies and enabled autopilots, ordered by
    /// `COALESCE(next_check_at, 0)` ascending.
    async fn list_schedulable_token_ids(&self, chain: &str) -> Result<Vec<i64>>;

    /// MIN `next_check_at` over the same join; `None` when nothing is schedulable.
    async fn get_earliest_next_check_at(&self, chain: &str) -> Result<Option<i64>>;

    /// Conditional update requiring `enabled AND (locked_until IS NULL OR locked_until <= now)`.
    async fn try_acquire_autopilot_lock(
        &self,
        chain: &str,
        token_id: i64,
        lease_ms: u64,
        now_ms: i64,
    ) -> Result<bool>;

    async fn release_autopilot_lock(&self, chain: &str, token_id: i64) -> Result<()>;

    async fn count_active_autopilot_locks(&self, chain: &str, now_ms: i64) -> Result<i64>;

    // ---- Strategies ----

    async fn get_strategy(&self, chain: &str, token_id: i64) -> Result<Option<Strategy>>;

    async fn list_strategies(&self, chain: &str) -> Result<Vec<Strategy>>;

    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()>;

    /// Moves a non-empty `tradingGoal` into `goalHistory`, then clears
    /// `tradingGoal`/`goalSetAt`. No-op if there was no live goal.
    async fn clear_trading_goal(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()>;

    async fn update_next_check_at(&self, chain: &str, token_id: i64, when_ms: i64) -> Result<()>;

    async fn get_next_check_at(&self, chain: &str, token_id: i64) -> Result<Option<i64>>;

    /// Resets `daily_runs_used`/`daily_value_used` when `budget_day` has rolled over.
    async fn refresh_daily_budget(&self, chain: &str, token_id: i64, today: chrono::NaiveDate) -> Result<()>;

    async fn check_budget(
        &self,
        chain: &str,
        token_id: i64,
        proposed_value: &str,
    ) -> Result<bool>;

    async fn consume_budget(&self, chain: &str, token_id: i64, value: &str) -> Result<()>;

    async fn record_success(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()>;

    /// Increments `failure_count`; auto-disables the autopilot once
    /// `failure_count >= max_failures`.
    async fn record_failure(
        &self,
        chain: &str,
        token_id: i64,
        error: &str,
        now_ms: i64,
    ) -> Result<()>;

    // ---- Runs & memory ----

    /// Inserts the run and, in the same commit path, trims rows beyond
    /// `retention` oldest-first for the chain.
    async fn record_run(&self, run: &RunRecord, retention: i64) -> Result<()>;

    async fn list_runs(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<RunRecord>>;

    /// Newest-first, excludes `type = 'goal'`.
    async fn recall(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<MemoryEntry>>;

    async fn store_memory(&self, entry: &MemoryEntry) -> Result<()>;

    async fn upsert_goal(&self, chain: &str, token_id: i64, goal: &str, now_ms: i64) -> Result<()>;

    async fn complete_goal(&self, chain: &str, token_id: i64, goal_id: &str, now_ms: i64) -> Result<()>;

    async fn list_goals(&self, chain: &str, token_id: i64) -> Result<Vec<MemoryEntry>>;

    // ---- Market signals ----

    async fn upsert_market_signal(&self, signal: &MarketSignal) -> Result<()>;

    async fn get_market_signal(&self, chain: &str, pair: &str) -> Result<Option<MarketSignal>>;
}
