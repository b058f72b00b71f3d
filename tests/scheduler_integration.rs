use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use uuid::Uuid;

use autopilot_runtime::actions::builtin::default_registry;
use autopilot_runtime::actions::ActionRegistry;
use autopilot_runtime::agent::{Agent, AgentFactory, AgentManager, ConfiguredBlueprintResolver};
use autopilot_runtime::brain::{Brain, Decision};
use autopilot_runtime::chain::mock::MockChainClient;
use autopilot_runtime::chain::{ChainClient, Observation};
use autopilot_runtime::config::AppConfig;
use autopilot_runtime::db::schema::migrate;
use autopilot_runtime::guardrails::DefaultGuardrails;
use autopilot_runtime::scheduler::Scheduler;
use autopilot_runtime::store::model::{Strategy, StrategyParams, UpsertAutopilotInput};
use autopilot_runtime::store::sqlx_backend::SqlxStore;
use autopilot_runtime::store::Store;
use autopilot_runtime::time::now_ms;

const CHAIN: &str = "bsc";

/// Isolated in-memory DB per test, schema from the crate's own migration.
async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();
    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    migrate(&pool).await.expect("run migrations");
    pool
}

/// A brain that returns a fixed script of decisions, one per `think` call,
/// repeating the last entry once the queue drains.
#[derive(Default)]
struct ScriptedBrain {
    decisions: Mutex<VecDeque<Decision>>,
}

impl ScriptedBrain {
    fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
        }
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    async fn think(
        &self,
        _observation: &Observation,
        _memories: &[autopilot_runtime::store::model::MemoryEntry],
        _actions: &ActionRegistry,
        _tool_context: &serde_json::Map<String, serde_json::Value>,
    ) -> Decision {
        let mut q = self.decisions.lock();
        if q.len() > 1 {
            q.pop_front().unwrap()
        } else {
            q.front().cloned().unwrap_or_else(Decision::wait)
        }
    }
}

struct ScriptedAgentFactory {
    brain: Arc<dyn Brain>,
    chain: Arc<dyn ChainClient>,
}

impl AgentFactory for ScriptedAgentFactory {
    fn build(&self, token_id: i64, agent_type: &str, vault: &str, _strategy: &Strategy) -> Agent {
        Agent {
            token_id,
            agent_type: agent_type.to_string(),
            vault: vault.to_string(),
            brain: self.brain.clone(),
            actions: default_registry(self.chain.clone()),
        }
    }
}

fn test_strategy(token_id: i64) -> Strategy {
    Strategy {
        chain: CHAIN.to_string(),
        token_id,
        strategy_type: "dca".to_string(),
        target: "0xtarget".to_string(),
        data: "0x".to_string(),
        value: "0".to_string(),
        strategy_params: StrategyParams::default(),
        min_interval_ms: Some(15_000),
        require_positive_balance: false,
        max_failures: 5,
        failure_count: 0,
        budget_day: chrono::Utc::now().date_naive(),
        daily_runs_used: 0,
        daily_value_used: "0".to_string(),
        enabled: true,
        last_run_at: None,
        next_check_at: None,
        last_error: None,
    }
}

async fn seed_token(store: &Store, token_id: i64) {
    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert autopilot");

    store
        .upsert_strategy(&test_strategy(token_id))
        .await
        .expect("upsert strategy");
}

fn harness(
    pool: AnyPool,
    chain: Arc<dyn ChainClient>,
    brain: Arc<dyn Brain>,
    config: AppConfig,
) -> Scheduler {
    let store = Store::new(Arc::new(SqlxStore::new(pool)));
    let guardrails = Arc::new(DefaultGuardrails);
    let agents = AgentManager::new();
    let blueprint = Arc::new(ConfiguredBlueprintResolver::new(vec!["dca".to_string()], "dca"));
    let agent_factory = Arc::new(ScriptedAgentFactory { brain, chain: chain.clone() });

    Scheduler::new(store, chain, guardrails, agents, blueprint, agent_factory, config, CHAIN)
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::from_env();
    cfg.scheduler_concurrency = 3;
    cfg.blocked_backoff_ms = 65_000;
    cfg.max_backoff_ms = 600_000;
    cfg.max_blocked_retries = 5;
    cfg.poll_interval_ms = 15_000;
    cfg.autopilot_lease_ms = 30_000;
    cfg.execute_max_attempts = 2;
    cfg.execute_retry_base_ms = 10;
    cfg.run_retention_count = 5_000;
    cfg
}

fn swap_decision() -> Decision {
    Decision {
        action: "swap".to_string(),
        params: serde_json::json!({
            "tokenIn": "0xin",
            "tokenOut": "0xout",
            "amountIn": "1000000000000000000",
            "minOut": "1",
        })
        .as_object()
        .unwrap()
        .clone(),
        reasoning: "swap into target".to_string(),
        message: None,
        confidence: 0.9,
        done: None,
        next_check_ms: None,
        blocked: None,
        block_reason: None,
    }
}

// -----------------------
// Happy path: swap submits and records a run.
// -----------------------

#[tokio::test]
async fn happy_dca_cycle_submits_and_records_run() {
    let pool = setup_db().await;
    let token_id = 1;

    let chain: Arc<dyn ChainClient> = Arc::new(MockChainClient::new());
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![swap_decision()]));
    let sched = harness(pool.clone(), chain, brain, test_config());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    seed_token(&store, token_id).await;

    sched.run_single_token(token_id, true).await.expect("run token");

    let runs = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].simulate_ok);
    assert!(runs[0].tx_hash.is_some());
}

// -----------------------
// Blocked-then-recover: guardrails reject every cycle, backoff doubles each
// time, and the 5th consecutive block auto-pauses the token.
// -----------------------

#[tokio::test]
async fn blocked_cycles_back_off_exponentially_then_autopause() {
    let pool = setup_db().await;
    let token_id = 2;

    // Vault reports a zero balance and the strategy requires a positive one,
    // so DefaultGuardrails rejects every cycle with HARD_BALANCE.
    let blocked_decision = swap_decision();

    let chain_client = MockChainClient::new();
    chain_client.seed_observation(
        token_id,
        Observation {
            token_id,
            agent_status: "active".to_string(),
            owner: "0xowner".to_string(),
            vault: "0xvault".to_string(),
            renter: "0xrenter".to_string(),
            operator: "0xoperator".to_string(),
            renter_expires: now_ms() + 3_600_000,
            operator_expires: now_ms() + 3_600_000,
            block_number: 1,
            block_timestamp: now_ms() / 1000,
            observed_at: now_ms(),
            paused: false,
            vault_tokens: Vec::new(),
            native_balance: Some("0".to_string()),
            prices: serde_json::Map::new(),
            gas_price: Some("1000000000".to_string()),
        },
    );
    let chain: Arc<dyn ChainClient> = Arc::new(chain_client);
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![blocked_decision]));
    let cfg = test_config();
    let sched = harness(pool.clone(), chain, brain, cfg.clone());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    let mut strategy = test_strategy(token_id);
    strategy.require_positive_balance = true;
    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert autopilot");
    store.upsert_strategy(&strategy).await.expect("upsert strategy");

    let mut observed_deltas = Vec::new();
    for _ in 0..cfg.max_blocked_retries {
        let before = now_ms();
        sched.run_single_token(token_id, true).await.expect("run token");
        let next = store
            .get_next_check_at(CHAIN, token_id)
            .await
            .expect("get next check");
        if let Some(next) = next {
            observed_deltas.push(next - before);
        }
        store
            .update_next_check_at(CHAIN, token_id, now_ms())
            .await
            .expect("force re-eligible");
    }

    // Exponential growth: each delta roughly doubles the previous one.
    for window in observed_deltas.windows(2) {
        assert!(window[1] >= window[0], "backoff must not shrink between consecutive blocks");
    }

    assert_eq!(sched.active_blocked_count(token_id), 0, "counter must reset after autopause");

    let runs = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    let autopause = runs
        .iter()
        .find(|r| r.error_code.as_deref() == Some("BUSINESS_AUTOPAUSE_THRESHOLD"));
    assert!(autopause.is_some(), "expected an autopause run row on the 5th blocked cycle");
}

// -----------------------
// Cooldown: backoff is `cooldownSeconds * 1000 + 5000` regardless of the
// consecutive-blocked counter.
// -----------------------

#[tokio::test]
async fn cooldown_backoff_uses_chain_reported_seconds() {
    let pool = setup_db().await;
    let token_id = 3;

    let chain_client = MockChainClient::new();
    chain_client.seed_cooldown(token_id, 120);
    let chain: Arc<dyn ChainClient> = Arc::new(chain_client);

    let decision = Decision {
        action: "wait".to_string(),
        params: serde_json::Map::new(),
        reasoning: "waiting out cooldown".to_string(),
        message: None,
        confidence: 0.5,
        done: None,
        next_check_ms: None,
        blocked: Some(true),
        block_reason: Some("action blocked: on-chain cooldown is active".to_string()),
    };
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![decision]));
    let sched = harness(pool.clone(), chain, brain, test_config());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    seed_token(&store, token_id).await;

    let before = now_ms();
    sched.run_single_token(token_id, true).await.expect("run token");
    let next = store
        .get_next_check_at(CHAIN, token_id)
        .await
        .expect("get next check")
        .expect("next check set");

    let delta = next - before;
    assert!((119_900..=125_100).contains(&delta), "expected ~125000ms, got {delta}");
}

// -----------------------
// Conversational no-op: a "wait" decision records nothing blocked and just
// reschedules.
// -----------------------

#[tokio::test]
async fn conversational_wait_reschedules_without_acting() {
    let pool = setup_db().await;
    let token_id = 4;

    let chain: Arc<dyn ChainClient> = Arc::new(MockChainClient::new());
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![Decision {
        message: Some("Not a good time to trade, standing by.".to_string()),
        ..Decision::wait()
    }]));
    let sched = harness(pool.clone(), chain, brain, test_config());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    seed_token(&store, token_id).await;

    sched.run_single_token(token_id, true).await.expect("run token");

    let runs = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].tx_hash.is_none());
    assert!(runs[0].error.is_none());
}

// -----------------------
// Invalid token id on-chain permanently disables the autopilot.
// -----------------------

struct InvalidTokenChainClient {
    inner: MockChainClient,
}

#[async_trait]
impl ChainClient for InvalidTokenChainClient {
    async fn observe(&self, _token_id: i64) -> anyhow::Result<Observation> {
        Err(anyhow::anyhow!("execution reverted: ERC721: invalid token ID"))
    }
    async fn read_agent_type(&self, token_id: i64) -> anyhow::Result<String> {
        self.inner.read_agent_type(token_id).await
    }
    async fn read_subscription_status(
        &self,
        token_id: i64,
    ) -> anyhow::Result<autopilot_runtime::chain::SubscriptionStatus> {
        self.inner.read_subscription_status(token_id).await
    }
    async fn read_allowance(&self, token: &str, owner: &str, spender: &str) -> anyhow::Result<String> {
        self.inner.read_allowance(token, owner, spender).await
    }
    async fn get_amounts_out(&self, router: &str, amount_in: &str, path: &[String]) -> Vec<String> {
        self.inner.get_amounts_out(router, amount_in, path).await
    }
    async fn read_cooldown_seconds(&self, token_id: i64) -> anyhow::Result<u64> {
        self.inner.read_cooldown_seconds(token_id).await
    }
    async fn execute_action(
        &self,
        token_id: i64,
        payload: &autopilot_runtime::chain::ActionPayload,
    ) -> anyhow::Result<autopilot_runtime::chain::TxReceipt> {
        self.inner.execute_action(token_id, payload).await
    }
    async fn execute_batch_action(
        &self,
        token_id: i64,
        payloads: &[autopilot_runtime::chain::ActionPayload],
    ) -> anyhow::Result<autopilot_runtime::chain::TxReceipt> {
        self.inner.execute_batch_action(token_id, payloads).await
    }
    async fn enable_operator_with_permit(
        &self,
        token_id: i64,
        operator: &str,
        deadline: i64,
        sig: &str,
    ) -> anyhow::Result<autopilot_runtime::chain::TxReceipt> {
        self.inner.enable_operator_with_permit(token_id, operator, deadline, sig).await
    }
    async fn clear_operator(&self, token_id: i64) -> anyhow::Result<autopilot_runtime::chain::TxReceipt> {
        self.inner.clear_operator(token_id).await
    }
}

#[tokio::test]
async fn invalid_token_id_permanently_disables_autopilot() {
    let pool = setup_db().await;
    let token_id = 5;

    let chain: Arc<dyn ChainClient> = Arc::new(InvalidTokenChainClient {
        inner: MockChainClient::new(),
    });
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![Decision::wait()]));
    let sched = harness(pool.clone(), chain, brain, test_config());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    seed_token(&store, token_id).await;

    sched.run_single_token(token_id, true).await.expect("run token");

    let autopilot = store
        .get_autopilot(CHAIN, token_id)
        .await
        .expect("get autopilot")
        .expect("autopilot row exists");
    assert!(!autopilot.enabled, "autopilot must be permanently disabled");

    let runs = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].failure_category.as_deref(), Some("business_rejected"));
    assert_eq!(runs[0].error_code.as_deref(), Some("INVALID_TOKEN_ID"));
}

// -----------------------
// Immediate trigger bypasses the cadence gate.
// -----------------------

#[tokio::test]
async fn skip_cadence_check_runs_before_next_check_at() {
    let pool = setup_db().await;
    let token_id = 6;

    let chain: Arc<dyn ChainClient> = Arc::new(MockChainClient::new());
    let brain: Arc<dyn Brain> = Arc::new(ScriptedBrain::new(vec![Decision::wait()]));
    let sched = harness(pool.clone(), chain, brain, test_config());

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    seed_token(&store, token_id).await;
    store
        .update_next_check_at(CHAIN, token_id, now_ms() + 3_600_000)
        .await
        .expect("push next check far into the future");

    // Without skip_cadence_check this would be a no-op.
    sched.run_single_token(token_id, false).await.expect("run token");
    let runs_without_skip = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert!(runs_without_skip.is_empty(), "cadence gate must block the dispatch");

    sched.run_single_token(token_id, true).await.expect("run token");
    let runs_with_skip = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert_eq!(runs_with_skip.len(), 1, "skip_cadence_check must bypass the gate");
}
