use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::store::model::{
    Autopilot, GoalSnapshot, MarketSignal, MemoryEntry, MemoryOutcome, MemoryType, RunMode,
    RunRecord, Strategy, StrategyParams, TraceEntry, UpsertAutopilotInput,
};
use crate::store::repository::StoreRepository;

/// SQLx-backed implementation of `StoreRepository`. Responsible only for
/// persistence and row mapping; policy (budgets, cadence, locking math) lives
/// one layer up in the scheduler and cycle orchestrator.
pub struct SqlxStore {
    pool: AnyPool,
}

impl SqlxStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl StoreRepository for SqlxStore {
    async fn upsert_enabled(&self, input: &UpsertAutopilotInput, now_ms: i64) -> Result<()> {
        let existing = sqlx::query("SELECT created_at FROM autopilots WHERE chain = ? AND token_id = ?")
            .bind(&input.chain)
            .bind(input.token_id)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(row) => {
                let created_at: i64 = row.get("created_at");
                sqlx::query(
                    r#"
UPDATE autopilots
SET renter = ?, operator = ?, permit_expires = ?, permit_deadline = ?, sig = ?,
    enabled = TRUE, last_reason = '', locked_until = NULL, updated_at = ?
WHERE chain = ? AND token_id = ?;
"#,
                )
                .bind(&input.renter)
                .bind(&input.operator)
                .bind(input.permit_expires)
                .bind(input.permit_deadline)
                .bind(&input.sig)
                .bind(now_ms)
                .bind(&input.chain)
                .bind(input.token_id)
                .execute(&self.pool)
                .await?;
                let _ = created_at;
            }
            None => {
                sqlx::query(
                    r#"
INSERT INTO autopilots
  (chain, token_id, renter, operator, permit_expires, permit_deadline, sig,
   enabled, last_reason, locked_until, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, '', NULL, ?, ?);
"#,
                )
                .bind(&input.chain)
                .bind(input.token_id)
                .bind(&input.renter)
                .bind(&input.operator)
                .bind(input.permit_expires)
                .bind(input.permit_deadline)
                .bind(&input.sig)
                .bind(now_ms)
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn disable(
        &self,
        chain: &str,
        token_id: i64,
        reason: &str,
        _tx_hash: Option<&str>,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE autopilots
SET enabled = FALSE, last_reason = ?, locked_until = NULL, updated_at = ?
WHERE chain = ? AND token_id = ?;
"#,
        )
        .bind(reason)
        .bind(now_ms)
        .bind(chain)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_autopilot(&self, chain: &str, token_id: i64) -> Result<Option<Autopilot>> {
        let row = sqlx::query(
            r#"
SELECT chain, token_id, renter, operator, permit_expires, permit_deadline, sig,
       enabled, last_reason, locked_until, created_at, updated_at
FROM autopilots WHERE chain = ? AND token_id = ?;
"#,
        )
        .bind(chain)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_autopilot(&r)).transpose()
    }

    async fn list_autopilots(&self, chain: &str) -> Result<Vec<Autopilot>> {
        let rows = sqlx::query(
            r#"
SELECT chain, token_id, renter, operator, permit_expires, permit_deadline, sig,
       enabled, last_reason, locked_until, created_at, updated_at
FROM autopilots WHERE chain = ?;
"#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_autopilot(r)?);
        }
        Ok(out)
    }

    async fn list_enabled_token_ids(&self, chain: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT token_id FROM autopilots WHERE chain = ? AND enabled = TRUE;")
            .bind(chain)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("token_id")).collect())
    }

    async fn list_schedulable_token_ids(&self, chain: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
SELECT s.token_id AS token_id
FROM token_strategies s
JOIN autopilots a ON a.chain = s.chain AND a.token_id = s.token_id
WHERE s.chain = ? AND s.enabled = TRUE AND a.enabled = TRUE
ORDER BY COALESCE(s.next_check_at, 0) ASC;
"#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("token_id")).collect())
    }

    async fn get_earliest_next_check_at(&self, chain: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
SELECT MIN(COALESCE(s.next_check_at, 0)) AS earliest
FROM token_strategies s
JOIN autopilots a ON a.chain = s.chain AND a.token_id = s.token_id
WHERE s.chain = ? AND s.enabled = TRUE AND a.enabled = TRUE;
"#,
        )
        .bind(chain)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("earliest").ok())
    }

    async fn try_acquire_autopilot_lock(
        &self,
        chain: &str,
        token_id: i64,
        lease_ms: u64,
        now_ms: i64,
    ) -> Result<bool> {
        let until = now_ms.saturating_add(lease_ms as i64);

        let res = sqlx::query(
            r#"
UPDATE autopilots
SET locked_until = ?
WHERE chain = ? AND token_id = ? AND enabled = TRUE
  AND (locked_until IS NULL OR locked_until <= ?);
"#,
        )
        .bind(until)
        .bind(chain)
        .bind(token_id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn release_autopilot_lock(&self, chain: &str, token_id: i64) -> Result<()> {
        sqlx::query("UPDATE autopilots SET locked_until = NULL WHERE chain = ? AND token_id = ?;")
            .bind(chain)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_active_autopilot_locks(&self, chain: &str, now_ms: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM autopilots WHERE chain = ? AND locked_until IS NOT NULL AND locked_until > ?;",
        )
        .bind(chain)
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    async fn get_strategy(&self, chain: &str, token_id: i64) -> Result<Option<Strategy>> {
        let row = sqlx::query(
            r#"
SELECT chain, token_id, strategy_type, target, data, value, strategy_params,
       min_interval_ms, require_positive_balance, max_failures, failure_count,
       budget_day, daily_runs_used, daily_value_used, enabled,
       last_run_at, next_check_at, last_error
FROM token_strategies WHERE chain = ? AND token_id = ?;
"#,
        )
        .bind(chain)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_strategy(&r)).transpose()
    }

    async fn list_strategies(&self, chain: &str) -> Result<Vec<Strategy>> {
        let rows = sqlx::query(
            r#"
SELECT chain, token_id, strategy_type, target, data, value, strategy_params,
       min_interval_ms, require_positive_balance, max_failures, failure_count,
       budget_day, daily_runs_used, daily_value_used, enabled,
       last_run_at, next_check_at, last_error
FROM token_strategies WHERE chain = ?;
"#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_strategy(r)?);
        }
        Ok(out)
    }

    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<()> {
        let params_json = serde_json::to_string(&strategy.strategy_params)
            .context("serializing strategy_params")?;
        let min_interval = strategy.min_interval_ms.map(|v| v as i64);

        let existing = sqlx::query("SELECT 1 FROM token_strategies WHERE chain = ? AND token_id = ?;")
            .bind(&strategy.chain)
            .bind(strategy.token_id)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            sqlx::query(
                r#"
UPDATE token_strategies
SET strategy_type = ?, target = ?, data = ?, value = ?, strategy_params = ?,
    min_interval_ms = ?, require_positive_balance = ?, max_failures = ?,
    failure_count = ?, budget_day = ?, daily_runs_used = ?, daily_value_used = ?,
    enabled = ?, last_run_at = ?, next_check_at = ?, last_error = ?
WHERE chain = ? AND token_id = ?;
"#,
            )
            .bind(&strategy.strategy_type)
            .bind(&strategy.target)
            .bind(&strategy.data)
            .bind(&strategy.value)
            .bind(&params_json)
            .bind(min_interval)
            .bind(strategy.require_positive_balance)
            .bind(strategy.max_failures)
            .bind(strategy.failure_count)
            .bind(strategy.budget_day.to_string())
            .bind(strategy.daily_runs_used)
            .bind(&strategy.daily_value_used)
            .bind(strategy.enabled)
            .bind(strategy.last_run_at)
            .bind(strategy.next_check_at)
            .bind(&strategy.last_error)
            .bind(&strategy.chain)
            .bind(strategy.token_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
INSERT INTO token_strategies
  (chain, token_id, strategy_type, target, data, value, strategy_params,
   min_interval_ms, require_positive_balance, max_failures, failure_count,
   budget_day, daily_runs_used, daily_value_used, enabled,
   last_run_at, next_check_at, last_error)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(&strategy.chain)
            .bind(strategy.token_id)
            .bind(&strategy.strategy_type)
            .bind(&strategy.target)
            .bind(&strategy.data)
            .bind(&strategy.value)
            .bind(&params_json)
            .bind(min_interval)
            .bind(strategy.require_positive_balance)
            .bind(strategy.max_failures)
            .bind(strategy.failure_count)
            .bind(strategy.budget_day.to_string())
            .bind(strategy.daily_runs_used)
            .bind(&strategy.daily_value_used)
            .bind(strategy.enabled)
            .bind(strategy.last_run_at)
            .bind(strategy.next_check_at)
            .bind(&strategy.last_error)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn clear_trading_goal(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()> {
        let Some(mut strategy) = self.get_strategy(chain, token_id).await? else {
            return Ok(());
        };

        let Some(goal) = strategy.strategy_params.trading_goal.take() else {
            return Ok(());
        };
        if goal.trim().is_empty() {
            return Ok(());
        }

        let set_at = strategy.strategy_params.goal_set_at.unwrap_or(now_ms);
        strategy.strategy_params.goal_history.push(GoalSnapshot {
            goal,
            set_at,
            cleared_at: now_ms,
        });
        strategy.strategy_params.goal_set_at = None;

        self.upsert_strategy(&strategy).await
    }

    async fn update_next_check_at(&self, chain: &str, token_id: i64, when_ms: i64) -> Result<()> {
        sqlx::query("UPDATE token_strategies SET next_check_at = ? WHERE chain = ? AND token_id = ?;")
            .bind(when_ms)
            .bind(chain)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_next_check_at(&self, chain: &str, token_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT next_check_at FROM token_strategies WHERE chain = ? AND token_id = ?;")
            .bind(chain)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get::<i64, _>("next_check_at").ok()))
    }

    async fn refresh_daily_budget(&self, chain: &str, token_id: i64, today: chrono::NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
UPDATE token_strategies
SET budget_day = ?, daily_runs_used = 0, daily_value_used = '0'
WHERE chain = ? AND token_id = ? AND budget_day <> ?;
"#,
        )
        .bind(today.to_string())
        .bind(chain)
        .bind(token_id)
        .bind(today.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn check_budget(&self, chain: &str, token_id: i64, proposed_value: &str) -> Result<bool> {
        let Some(strategy) = self.get_strategy(chain, token_id).await? else {
            return Ok(false);
        };

        let Some(cap) = strategy.strategy_params.max_value_per_run.as_deref() else {
            return Ok(true);
        };

        let cap: u128 = parse_u256(cap)?;
        let used: u128 = parse_u256(&strategy.daily_value_used)?;
        let proposed: u128 = parse_u256(proposed_value)?;

        Ok(used.saturating_add(proposed) <= cap)
    }

    async fn consume_budget(&self, chain: &str, token_id: i64, value: &str) -> Result<()> {
        let Some(mut strategy) = self.get_strategy(chain, token_id).await? else {
            return Ok(());
        };
        let used: u128 = parse_u256(&strategy.daily_value_used)?;
        let delta: u128 = parse_u256(value)?;
        strategy.daily_value_used = used.saturating_add(delta).to_string();
        strategy.daily_runs_used = strategy.daily_runs_used.saturating_add(1);
        self.upsert_strategy(&strategy).await
    }

    async fn record_success(&self, chain: &str, token_id: i64, now_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
UPDATE token_strategies
SET failure_count = 0, last_run_at = ?, last_error = NULL
WHERE chain = ? AND token_id = ?;
"#,
        )
        .bind(now_ms)
        .bind(chain)
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, chain: &str, token_id: i64, error: &str, now_ms: i64) -> Result<()> {
        let Some(strategy) = self.get_strategy(chain, token_id).await? else {
            return Ok(());
        };

        let failure_count = strategy.failure_count.saturating_add(1);

        sqlx::query(
            r#"
UPDATE token_strategies
SET failure_count = ?, last_run_at = ?, last_error = ?
WHERE chain = ? AND token_id = ?;
"#,
        )
        .bind(failure_count)
        .bind(now_ms)
        .bind(error)
        .bind(chain)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        if failure_count >= strategy.max_failures {
            self.disable(chain, token_id, "max_failures_exceeded", None, now_ms)
                .await?;
        }

        Ok(())
    }

    async fn record_run(&self, run: &RunRecord, retention: i64) -> Result<()> {
        let trace_json = serde_json::to_string(&run.execution_trace).context("serializing execution_trace")?;

        sqlx::query(
            r#"
INSERT INTO runs
  (id, chain, token_id, action_type, action_hash, simulate_ok, tx_hash, error,
   error_code, failure_category, execution_trace, run_mode, shadow_compare,
   brain_type, intent_type, decision_reason, decision_message, violation_code,
   gas_used, pnl_usd, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(run.id.to_string())
        .bind(&run.chain)
        .bind(run.token_id)
        .bind(&run.action_type)
        .bind(&run.action_hash)
        .bind(run.simulate_ok)
        .bind(&run.tx_hash)
        .bind(&run.error)
        .bind(&run.error_code)
        .bind(&run.failure_category)
        .bind(trace_json)
        .bind(run.run_mode.as_str())
        .bind(run.shadow_compare.as_ref().map(|v| v.to_string()))
        .bind(&run.brain_type)
        .bind(&run.intent_type)
        .bind(&run.decision_reason)
        .bind(&run.decision_message)
        .bind(&run.violation_code)
        .bind(run.gas_used)
        .bind(run.pnl_usd)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
DELETE FROM runs
WHERE chain = ? AND id NOT IN (
  SELECT id FROM runs WHERE chain = ? ORDER BY created_at DESC LIMIT ?
);
"#,
        )
        .bind(&run.chain)
        .bind(&run.chain)
        .bind(retention)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_runs(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
SELECT id, chain, token_id, action_type, action_hash, simulate_ok, tx_hash, error,
       error_code, failure_category, execution_trace, run_mode, shadow_compare,
       brain_type, intent_type, decision_reason, decision_message, violation_code,
       gas_used, pnl_usd, created_at
FROM runs WHERE chain = ? AND token_id = ?
ORDER BY created_at DESC LIMIT ?;
"#,
        )
        .bind(chain)
        .bind(token_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_run(r)?);
        }
        Ok(out)
    }

    async fn recall(&self, chain: &str, token_id: i64, limit: usize) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            r#"
SELECT id, chain, token_id, entry_type, action, params, result, reasoning, goal_id, created_at
FROM agent_memory
WHERE chain = ? AND token_id = ? AND entry_type <> 'goal'
ORDER BY created_at DESC LIMIT ?;
"#,
        )
        .bind(chain)
        .bind(token_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_memory(r)?);
        }
        Ok(out)
    }

    async fn store_memory(&self, entry: &MemoryEntry) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO agent_memory (id, chain, token_id, entry_type, action, params, result, reasoning, goal_id, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.chain)
        .bind(entry.token_id)
        .bind(entry.entry_type.as_str())
        .bind(&entry.action)
        .bind(entry.params.as_ref().map(|v| v.to_string()))
        .bind(entry.result.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
        .bind(&entry.reasoning)
        .bind(&entry.goal_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_goal(&self, chain: &str, token_id: i64, goal: &str, now_ms: i64) -> Result<()> {
        let entry = MemoryEntry {
            action: Some(goal.to_string()),
            ..MemoryEntry::new(chain, token_id, MemoryType::Goal, now_ms)
        };
        self.store_memory(&entry).await
    }

    async fn complete_goal(&self, chain: &str, token_id: i64, goal_id: &str, _now_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
UPDATE agent_memory SET result = ?
WHERE chain = ? AND token_id = ? AND entry_type = 'goal' AND id = ?;
"#,
        )
        .bind(serde_json::to_string(&MemoryOutcome { success: true, tx_hash: None, error: None }).unwrap_or_default())
        .bind(chain)
        .bind(token_id)
        .bind(goal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_goals(&self, chain: &str, token_id: i64) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            r#"
SELECT id, chain, token_id, entry_type, action, params, result, reasoning, goal_id, created_at
FROM agent_memory
WHERE chain = ? AND token_id = ? AND entry_type = 'goal'
ORDER BY created_at DESC;
"#,
        )
        .bind(chain)
        .bind(token_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_memory(r)?);
        }
        Ok(out)
    }

    async fn upsert_market_signal(&self, signal: &MarketSignal) -> Result<()> {
        let existing = sqlx::query("SELECT 1 FROM market_signals WHERE chain = ? AND pair = ?;")
            .bind(&signal.chain)
            .bind(&signal.pair)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            sqlx::query("UPDATE market_signals SET data = ?, updated_at = ? WHERE chain = ? AND pair = ?;")
                .bind(signal.data.to_string())
                .bind(signal.updated_at)
                .bind(&signal.chain)
                .bind(&signal.pair)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("INSERT INTO market_signals (chain, pair, data, updated_at) VALUES (?, ?, ?, ?);")
                .bind(&signal.chain)
                .bind(&signal.pair)
                .bind(signal.data.to_string())
                .bind(signal.updated_at)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn get_market_signal(&self, chain: &str, pair: &str) -> Result<Option<MarketSignal>> {
        let row = sqlx::query("SELECT chain, pair, data, updated_at FROM market_signals WHERE chain = ? AND pair = ?;")
            .bind(chain)
            .bind(pair)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let data: String = r.get("data");
            Ok(MarketSignal {
                chain: r.get("chain"),
                pair: r.get("pair"),
                data: serde_json::from_str(&data).context("parsing market_signals.data")?,
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }
}

/* =========================
Row mapping
========================= */

fn row_to_autopilot(r: &sqlx::any::AnyRow) -> Result<Autopilot> {
    Ok(Autopilot {
        chain: r.get("chain"),
        token_id: r.get("token_id"),
        renter: r.get("renter"),
        operator: r.get("operator"),
        permit_expires: r.get("permit_expires"),
        permit_deadline: r.get("permit_deadline"),
        sig: r.get("sig"),
        enabled: r.get("enabled"),
        last_reason: r.get("last_reason"),
        locked_until: r.try_get("locked_until").ok(),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn row_to_strategy(r: &sqlx::any::AnyRow) -> Result<Strategy> {
    let params_str: String = r.get("strategy_params");
    let strategy_params: StrategyParams =
        serde_json::from_str(&params_str).context("parsing strategy_params")?;

    let budget_day_str: String = r.get("budget_day");
    let budget_day = chrono::NaiveDate::parse_from_str(&budget_day_str, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid budget_day {budget_day_str}: {e}"))?;

    Ok(Strategy {
        chain: r.get("chain"),
        token_id: r.get("token_id"),
        strategy_type: r.get("strategy_type"),
        target: r.get("target"),
        data: r.get("data"),
        value: r.get("value"),
        strategy_params,
        min_interval_ms: r.try_get::<i64, _>("min_interval_ms").ok().map(|v| v as u64),
        require_positive_balance: r.get("require_positive_balance"),
        max_failures: r.get("max_failures"),
        failure_count: r.get("failure_count"),
        budget_day,
        daily_runs_used: r.get("daily_runs_used"),
        daily_value_used: r.get("daily_value_used"),
        enabled: r.get("enabled"),
        last_run_at: r.try_get("last_run_at").ok(),
        next_check_at: r.try_get("next_check_at").ok(),
        last_error: r.try_get("last_error").ok(),
    })
}

fn row_to_run(r: &sqlx::any::AnyRow) -> Result<RunRecord> {
    let id_str: String = r.get("id");
    let id = uuid::Uuid::parse_str(&id_str).context("invalid run id")?;

    let trace_str: String = r.get("execution_trace");
    let execution_trace: Vec<TraceEntry> =
        serde_json::from_str(&trace_str).context("parsing execution_trace")?;

    let shadow_compare: Option<String> = r.try_get("shadow_compare").ok();

    Ok(RunRecord {
        id,
        chain: r.get("chain"),
        token_id: r.get("token_id"),
        action_type: r.get("action_type"),
        action_hash: r.get("action_hash"),
        simulate_ok: r.get("simulate_ok"),
        tx_hash: r.try_get("tx_hash").ok(),
        error: r.try_get("error").ok(),
        error_code: r.try_get("error_code").ok(),
        failure_category: r.try_get("failure_category").ok(),
        execution_trace,
        run_mode: RunMode::parse(&r.get::<String, _>("run_mode")),
        shadow_compare: shadow_compare
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("parsing shadow_compare")?,
        brain_type: r.try_get("brain_type").ok(),
        intent_type: r.try_get("intent_type").ok(),
        decision_reason: r.try_get("decision_reason").ok(),
        decision_message: r.try_get("decision_message").ok(),
        violation_code: r.try_get("violation_code").ok(),
        gas_used: r.try_get("gas_used").ok(),
        pnl_usd: r.try_get("pnl_usd").ok(),
        created_at: r.get("created_at"),
    })
}

fn row_to_memory(r: &sqlx::any::AnyRow) -> Result<MemoryEntry> {
    let id_str: String = r.get("id");
    let id = uuid::Uuid::parse_str(&id_str).context("invalid memory id")?;

    let params: Option<String> = r.try_get("params").ok();
    let result: Option<String> = r.try_get("result").ok();

    Ok(MemoryEntry {
        id,
        chain: r.get("chain"),
        token_id: r.get("token_id"),
        entry_type: MemoryType::parse(&r.get::<String, _>("entry_type")),
        action: r.try_get("action").ok(),
        params: params.map(|s| serde_json::from_str(&s)).transpose().context("parsing memory params")?,
        result: result
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("parsing memory result")?,
        reasoning: r.try_get("reasoning").ok(),
        goal_id: r.try_get("goal_id").ok(),
        timestamp: r.get("created_at"),
    })
}

/// Parses a base-10 uint256-range value, clamping overflow detection to u128
/// (sufficient for every amount this runtime actually moves).
fn parse_u256(s: &str) -> Result<u128> {
    s.parse::<u128>()
        .map_err(|e| anyhow!("invalid uint256 decimal string {s:?}: {e}"))
}
