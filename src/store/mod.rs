pub mod model;
pub mod repository;
pub mod sqlx_backend;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::logger::warn_if_slow;
use crate::store::model::{
    Autopilot, MarketSignal, MemoryEntry, RunRecord, Strategy, UpsertAutopilotInput,
};
use crate::store::repository::StoreRepository;

/// Scheduler-facing persistence façade. Thin pass-through over the repository
/// with latency instrumentation on the paths the tick loop hits every cycle.
#[derive(Clone)]
pub struct Store {
    repo: Arc<dyn StoreRepository>,
}

impl Store {
    pub fn new(repo: Arc<dyn StoreRepository>) -> Self {
        Self { repo }
    }

    // ---- Autopilots ----

    pub async fn upsert_enabled(&self, input: &UpsertAutopilotInput, now_ms: i64) -> Result<()> {
        self.repo.upsert_enabled(input, now_ms).await
    }

    pub async fn disable(&self, chain: &str, token_id: i64, reason: &str, tx_hash: Option<&str>, now_ms: i64) -> Result<()> {
        self.repo.disable(chain, token_id, reason, tx_hash, now_ms).await
    }

    pub async fn get_autopilot(&self, chain: &str, token_id: i64) -> Result<Option<Autopilot>> {
        self.repo.get_autopilot(chain, token_id).await
    }

    pub async fn list_autopilots(&self, chain: &str) -> Result<Vec<Autopilot>> {
        self.repo.list_autopilots(chain).await
    }

    pub async fn list_enabled_token_ids(&self, chain: &str) -> Result<Vec<i64>> {
        self.repo.list_enabled_token_ids(chain).await
    }

    #[instrument(skip(self), target = "store", fields(chain = %chain))]
    pub async fn list_schedulable_token_ids(&self, chain: &str) -> Result<Vec<i64>> {
        let ids = warn_if_slow("db_list_schedulable", Duration::from_millis(200), async {
            self.repo.list_schedulable_token_ids(chain).await
        })
        .await?;
        debug!(count = ids.len(), "schedulable tokens fetched");
        Ok(ids)
    }

    pub async fn get_earliest_next_check_at(&self, chain: &str) -> Result<Option<i64>> {
        self.repo.get_earliest_next_check_at(chain).await
    }

    #[instrument(skip(self), target = "store", fields(chain = %chain, token_id))]
    pub async fn try_acquire_autopilot_lock(&self, chain: &str, token_id: i64, lease_ms: u64, now_ms: i64) -> Result<bool> {
        let acquired = self.repo.try_acquire_autopilot_lock(chain, token_id, lease_ms, now_ms).await?;
        debug!(acquired, "autopilot lock attempt");
        Ok(acquired)
    }

    pub async fn release_autopilot_lock(&self, chain: &str, token_id: i64) -> Result<()> {
        self.repo.release_autopilot_lock(chain, token_id).await
    }

    pub async fn count_active_autopilot_locks(&self, chain: &str, now_ms: i64) -> Result<i64> {
        self.repo.count_active_autopilot_locks(chain, now_ms).await
    }

    // ---- Strategies ----

    pub async fn get_strategy(&self, chain: &str, token_id: i64) -> Result<Option<Strategy>> {
        self.repo.get_strategy(chain, token_id).await
    }

    pub async fn list_strategies(&self, chain: &str) -> Result<Vec<Strategy>> {
        self.repo.list_strategies(chain).await
    }

    pub async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.repo.upsert_strategy(strategy).await
    }

    pub async fn clear_trading_goal(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()> {
        self.repo.clear_trading_goal(chain, token_id, now_ms).await
    }

    pub async fn update_next_check_at(&self, chain: &str, token_id: i64, when_ms: i64) -> Result<()> {
        self.repo.update_next_check_at(chain, token_id, when_ms).await
    }

    pub async fn get_next_check_at(&self, chain: &str, token_id: i64) -> Result<Option<i64>> {
        self.repo.get_next_check_at(chain, token_id).await
    }

    pub async fn refresh_daily_budget(&self, chain: &str, token_id: i64, today: chrono::NaiveDate) -> Result<()> {
        self.repo.refresh_daily_budget(chain, token_id, today).await
    }

    pub async fn check_budget(&self, chain: &str, token_id: i64, proposed_value: &str) -> Result<bool> {
        self.repo.check_budget(chain, token_id, proposed_value).await
    }

    pub async fn consume_budget(&self, chain: &str, token_id: i64, value: &str) -> Result<()> {
        self.repo.consume_budget(chain, token_id, value).await
    }

    pub async fn record_success(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()> {
        self.repo.record_success(chain, token_id, now_ms).await
    }

    pub async fn record_failure(&self, chain: &str, token_id: i64, error: &str, now_ms: i64) -> Result<()> {
        self.repo.record_failure(chain, token_id, error, now_ms).await
    }

    // ---- Runs & memory ----

    #[instrument(skip(self, run), target = "store", fields(chain = %run.chain, token_id = run.token_id))]
    pub async fn record_run(&self, run: &RunRecord, retention: i64) -> Result<()> {
        warn_if_slow("db_record_run", Duration::from_millis(150), async {
            self.repo.record_run(run, retention).await
        })
        .await
    }

    pub async fn list_runs(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<RunRecord>> {
        self.repo.list_runs(chain, token_id, limit).await
    }

    pub async fn recall(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.repo.recall(chain, token_id, limit).await
    }

    pub async fn store_memory(&self, entry: &MemoryEntry) -> Result<()> {
        self.repo.store_memory(entry).await
    }

    pub async fn upsert_goal(&self, chain: &str, token_id: i64, goal: &str, now_ms: i64) -> Result<()> {
        self.repo.upsert_goal(chain, token_id, goal, now_ms).await
    }

    pub async fn complete_goal(&self, chain: &str, token_id: i64, goal_id: &str, now_ms: i64) -> Result<()> {
        self.repo.complete_goal(chain, token_id, goal_id, now_ms).await
    }

    pub async fn list_goals(&self, chain: &str, token_id: i64) -> Result<Vec<MemoryEntry>> {
        self.repo.list_goals(chain, token_id).await
    }

    // ---- Market signals ----

    pub async fn upsert_market_signal(&self, signal: &MarketSignal) -> Result<()> {
        self.repo.upsert_market_signal(signal).await
    }

    pub async fn get_market_signal(&self, chain: &str, pair: &str) -> Result<Option<MarketSignal>> {
        self.repo.get_market_signal(chain, pair).await
    }
}
