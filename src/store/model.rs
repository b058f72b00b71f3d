use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-(chain, token) enablement + lease record.
#[derive(Clone, Debug)]
pub struct Autopilot {
    pub chain: String,
    pub token_id: i64,
    pub renter: String,
    pub operator: String,
    pub permit_expires: i64,
    pub permit_deadline: i64,
    pub sig: String,
    pub enabled: bool,
    pub last_reason: String,
    /// `None` or `<= now` both mean "not currently leased".
    pub locked_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input to `upsertEnabled`.
#[derive(Clone, Debug)]
pub struct UpsertAutopilotInput {
    pub chain: String,
    pub token_id: i64,
    pub renter: String,
    pub operator: String,
    pub permit_expires: i64,
    pub permit_deadline: i64,
    pub sig: String,
}

/// A single historical trading-goal snapshot, appended to when a live goal
/// is cleared (see `Store::clear_trading_goal`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GoalSnapshot {
    pub goal: String,
    pub set_at: i64,
    pub cleared_at: i64,
}

/// The discriminated fields of `strategy_params` the cycle boundary reads;
/// anything else the caller stored rides along in `extra` untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_set_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goal_history: Vec<GoalSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_per_run: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-(chain, token) configuration of what the agent should do.
#[derive(Clone, Debug)]
pub struct Strategy {
    pub chain: String,
    pub token_id: i64,
    pub strategy_type: String,
    pub target: String,
    pub data: String,
    pub value: String,
    pub strategy_params: StrategyParams,
    pub min_interval_ms: Option<u64>,
    pub require_positive_balance: bool,
    pub max_failures: i32,
    pub failure_count: i32,
    pub budget_day: chrono::NaiveDate,
    pub daily_runs_used: i32,
    pub daily_value_used: String,
    pub enabled: bool,
    pub last_run_at: Option<i64>,
    pub next_check_at: Option<i64>,
    pub last_error: Option<String>,
}

impl Strategy {
    /// Strategies of the `llm_*` family require an explicit `tradingGoal`
    /// before the scheduler will dispatch them (the "standby" gate, §4.7-e).
    pub fn is_llm(&self) -> bool {
        self.strategy_type.starts_with("llm_")
    }

    pub fn has_goal(&self) -> bool {
        self.strategy_params
            .trading_goal
            .as_deref()
            .is_some_and(|g| !g.trim().is_empty())
    }
}

/// `"primary"` runs submit a transaction; `"shadow"` runs never do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Primary,
    Shadow,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Primary => "primary",
            RunMode::Shadow => "shadow",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shadow" => RunMode::Shadow,
            _ => RunMode::Primary,
        }
    }
}

/// A single step of a cycle's execution trace (`{stage, status, at, note?, meta?}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub status: String,
    pub at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(stage: &str, status: &str, at: i64) -> Self {
        Self {
            stage: stage.to_string(),
            status: status.to_string(),
            at,
            note: None,
            meta: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Append-only log of cycle outcomes.
#[derive(Clone, Debug)]
pub struct RunRecord {
    pub id: Uuid,
    pub chain: String,
    pub token_id: i64,
    pub action_type: String,
    pub action_hash: String,
    pub simulate_ok: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub failure_category: Option<String>,
    pub execution_trace: Vec<TraceEntry>,
    pub run_mode: RunMode,
    pub shadow_compare: Option<serde_json::Value>,
    pub brain_type: Option<String>,
    pub intent_type: Option<String>,
    pub decision_reason: Option<String>,
    pub decision_message: Option<String>,
    pub violation_code: Option<String>,
    pub gas_used: Option<i64>,
    pub pnl_usd: Option<f64>,
    pub created_at: i64,
}

/// Builder covering the fields the scheduler fills in on every code path;
/// this keeps `recordRun` call sites from repeating every field name.
impl RunRecord {
    pub fn new(chain: impl Into<String>, token_id: i64, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain: chain.into(),
            token_id,
            action_type: "auto".to_string(),
            action_hash: String::new(),
            simulate_ok: false,
            tx_hash: None,
            error: None,
            error_code: None,
            failure_category: None,
            execution_trace: Vec::new(),
            run_mode: RunMode::Primary,
            shadow_compare: None,
            brain_type: None,
            intent_type: None,
            decision_reason: None,
            decision_message: None,
            violation_code: None,
            gas_used: None,
            pnl_usd: None,
            created_at,
        }
    }
}

/// Memory entry family. `Goal` entries are excluded from `recall`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryType {
    Decision,
    Observation,
    Execution,
    Blocked,
    Goal,
    Trigger,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Observation => "observation",
            MemoryType::Execution => "execution",
            MemoryType::Blocked => "blocked",
            MemoryType::Goal => "goal",
            MemoryType::Trigger => "trigger",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "observation" => MemoryType::Observation,
            "execution" => MemoryType::Execution,
            "blocked" => MemoryType::Blocked,
            "goal" => MemoryType::Goal,
            "trigger" => MemoryType::Trigger,
            _ => MemoryType::Decision,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub chain: String,
    pub token_id: i64,
    pub entry_type: MemoryType,
    pub action: Option<String>,
    pub params: Option<serde_json::Value>,
    pub result: Option<MemoryOutcome>,
    pub reasoning: Option<String>,
    pub goal_id: Option<String>,
    pub timestamp: i64,
}

impl MemoryEntry {
    pub fn new(chain: impl Into<String>, token_id: i64, entry_type: MemoryType, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain: chain.into(),
            token_id,
            entry_type,
            action: None,
            params: None,
            result: None,
            reasoning: None,
            goal_id: None,
            timestamp,
        }
    }
}

/// Per-(chain, pair) observed market datum; ingested independently of the
/// scheduler's hot path (spec.md §3, "MarketSignal").
#[derive(Clone, Debug)]
pub struct MarketSignal {
    pub chain: String,
    pub pair: String,
    pub data: serde_json::Value,
    pub updated_at: i64,
}
