use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Autopilots: per-(chain, token) enablement + lease.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS autopilots (
  chain TEXT NOT NULL,
  token_id BIGINT NOT NULL,
  renter TEXT NOT NULL,
  operator TEXT NOT NULL,
  permit_expires BIGINT NOT NULL,
  permit_deadline BIGINT NOT NULL,
  sig TEXT NOT NULL,
  enabled BOOLEAN NOT NULL,
  last_reason TEXT NOT NULL,
  locked_until BIGINT,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL,
  PRIMARY KEY (chain, token_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Strategies: per-(chain, token) configuration.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS token_strategies (
  chain TEXT NOT NULL,
  token_id BIGINT NOT NULL,
  strategy_type TEXT NOT NULL,
  target TEXT NOT NULL,
  data TEXT NOT NULL,
  value TEXT NOT NULL,
  strategy_params TEXT NOT NULL,
  min_interval_ms BIGINT,
  require_positive_balance BOOLEAN NOT NULL,
  max_failures INTEGER NOT NULL,
  failure_count INTEGER NOT NULL,
  budget_day TEXT NOT NULL,
  daily_runs_used INTEGER NOT NULL,
  daily_value_used TEXT NOT NULL,
  enabled BOOLEAN NOT NULL,
  last_run_at BIGINT,
  next_check_at BIGINT,
  last_error TEXT,
  PRIMARY KEY (chain, token_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Runs: append-only cycle outcome log.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  chain TEXT NOT NULL,
  token_id BIGINT NOT NULL,
  action_type TEXT NOT NULL,
  action_hash TEXT NOT NULL,
  simulate_ok BOOLEAN NOT NULL,
  tx_hash TEXT,
  error TEXT,
  error_code TEXT,
  failure_category TEXT,
  execution_trace TEXT NOT NULL,
  run_mode TEXT NOT NULL,
  shadow_compare TEXT,
  brain_type TEXT,
  intent_type TEXT,
  decision_reason TEXT,
  decision_message TEXT,
  violation_code TEXT,
  gas_used BIGINT,
  pnl_usd DOUBLE PRECISION,
  created_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Agent memory: per-token scrollback, including the `goal` family.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS agent_memory (
  id TEXT PRIMARY KEY,
  chain TEXT NOT NULL,
  token_id BIGINT NOT NULL,
  entry_type TEXT NOT NULL,
  action TEXT,
  params TEXT,
  result TEXT,
  reasoning TEXT,
  goal_id TEXT,
  created_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Market signals: ingested independently, read-mostly here.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS market_signals (
  chain TEXT NOT NULL,
  pair TEXT NOT NULL,
  data TEXT NOT NULL,
  updated_at BIGINT NOT NULL,
  PRIMARY KEY (chain, pair)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_autopilots_enabled ON autopilots(enabled);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_strategies_enabled_next ON token_strategies(enabled, next_check_at);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_runs_chain_token ON runs(chain, token_id, created_at);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_memory_chain_token ON agent_memory(chain, token_id, created_at);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
