fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    // =========================
    // Scheduler configuration
    // =========================
    /// Size of the bounded semaphore gating concurrent per-token cycles.
    pub scheduler_concurrency: usize,

    /// Base backoff (ms) applied on the first consecutive blocked cycle;
    /// doubles per consecutive block, capped at `max_backoff_ms`.
    pub blocked_backoff_ms: u64,

    /// Upper bound on exponential blocked-backoff (ms).
    pub max_backoff_ms: u64,

    /// Consecutive blocked/business-rejected cycles before a token is
    /// auto-paused (goal cleared, agent stopped).
    pub max_blocked_retries: u32,

    /// Poll interval used both as the tick cadence and as the default
    /// `nextCheckMs` when a strategy has no `minIntervalMs` override.
    pub poll_interval_ms: u64,

    /// Floor under which the adaptive loop sleep never drops, to avoid a
    /// busy-loop when `next_check_at` values are already in the past.
    pub loop_floor_ms: u64,

    /// Consecutive tick-wide failures before the scheduler applies a fixed
    /// global backoff and resets its error counter.
    pub max_tick_retries: u32,

    /// Duration (ms) an autopilot lease is held once acquired.
    pub autopilot_lease_ms: u64,

    // =========================
    // Execution configuration
    // =========================
    /// Max local retry attempts for executeAction/executeBatchAction.
    pub execute_max_attempts: u32,
    /// Base delay (ms) for the execute retry backoff.
    pub execute_retry_base_ms: u64,

    // =========================
    // Persistence configuration
    // =========================
    /// Number of most recent run rows retained per chain; older rows are
    /// trimmed as part of `recordRun`.
    pub run_retention_count: i64,

    // =========================
    // Shadow mode
    // =========================
    /// When true, eligible tokens are run through the full cycle but the
    /// resulting payload is never submitted on-chain.
    pub shadow_mode: bool,
    /// When true (and `shadow_mode` is set), the payload is submitted as if
    /// primary but the run is still tagged `runMode = "shadow"`.
    pub shadow_execute_tx: bool,

    // =========================
    // Brain configuration
    // =========================
    /// Decisions below this confidence are treated as zero-confidence waits
    /// eligible for the fallback model.
    pub llm_min_confidence: f64,
    /// Base URL of the OpenAI-chat-completions-compatible endpoint.
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// Retried once, at zero confidence, against this model if set.
    pub llm_fallback_model: Option<String>,
    /// Fixed environment block baked into every LLM brain's system prompt.
    pub chain_id: String,
    pub router_address: String,
    pub wrapped_native: String,
    pub stablecoins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://autopilot_dev.db".to_string());

        Self {
            database_url,

            scheduler_concurrency: env_usize("SCHEDULER_CONCURRENCY", 3),
            blocked_backoff_ms: env_u64("BLOCKED_BACKOFF_MS", 65_000),
            max_backoff_ms: env_u64("MAX_BACKOFF_MS", 10 * 60 * 1000),
            max_blocked_retries: env_usize("MAX_BLOCKED_RETRIES", 5) as u32,
            poll_interval_ms: env_u64("SCHEDULER_POLL_INTERVAL_MS", 15_000),
            loop_floor_ms: env_u64("SCHEDULER_LOOP_FLOOR_MS", 1_000),
            max_tick_retries: env_usize("SCHEDULER_MAX_TICK_RETRIES", 5) as u32,
            autopilot_lease_ms: env_u64("AUTOPILOT_LEASE_MS", 30_000),

            execute_max_attempts: env_usize("EXECUTE_MAX_ATTEMPTS", 2) as u32,
            execute_retry_base_ms: env_u64("EXECUTE_RETRY_BASE_MS", 2_000),

            run_retention_count: env_usize("RUN_RETENTION_COUNT", 5_000) as i64,

            shadow_mode: env_bool("SHADOW_MODE", false),
            shadow_execute_tx: env_bool("SHADOW_EXECUTE_TX", false),

            llm_min_confidence: env_f64("LLM_MIN_CONFIDENCE", 0.35),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_fallback_model: std::env::var("LLM_FALLBACK_MODEL").ok(),
            chain_id: std::env::var("CHAIN_ID").unwrap_or_else(|_| "bsc".to_string()),
            router_address: std::env::var("ROUTER_ADDRESS").unwrap_or_default(),
            wrapped_native: std::env::var("WRAPPED_NATIVE").unwrap_or_default(),
            stablecoins: std::env::var("STABLECOINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Cadence constants that are not (per spec) environment-configurable.
pub mod cadence {
    /// Lower bound applied to a "wait" decision's `nextCheckMs` hint.
    pub const WAIT_CADENCE_MIN_MS: u64 = 5_000;
    /// Lower bound applied to an acted-decision's fast-followup hint.
    pub const FAST_FOLLOWUP_MIN_MS: u64 = 10_000;
}
