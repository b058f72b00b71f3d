use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument};

use crate::actions::validate_params;
use crate::agent::Agent;
use crate::chain::{ActionPayload, ChainClient};
use crate::guardrails::{GuardrailContext, GuardrailsDispatcher};
use crate::store::model::{MemoryEntry, MemoryOutcome, MemoryType, Strategy};
use crate::store::Store;
use crate::time::now_ms;

/// One execution of perceive -> remember -> decide -> encode -> guard ->
/// return payload -> record (§4.6). Insertion into `runs`/`agent_memory`
/// happens one layer up, in the scheduler, which has the retention/chain
/// context this type doesn't need.
#[derive(Clone, Debug, Default)]
pub struct RunResult {
    pub acted: bool,
    pub action: String,
    pub reasoning: String,
    pub message: Option<String>,
    pub params: serde_json::Map<String, Value>,
    pub payload: Option<Vec<ActionPayload>>,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub done: Option<bool>,
    pub next_check_ms: Option<u64>,
    pub failure_category: Option<String>,
    pub error_code: Option<String>,
    pub execution_trace: Vec<crate::store::model::TraceEntry>,
    pub intent_type: Option<String>,
}

fn build_tool_context(observation: &crate::chain::Observation, vault: &str) -> serde_json::Map<String, Value> {
    let mut ctx = serde_json::Map::new();
    ctx.insert("__vaultAddress".to_string(), Value::String(vault.to_string()));
    ctx.insert(
        "__vaultTokens".to_string(),
        Value::Array(observation.vault_tokens.iter().cloned().map(Value::String).collect()),
    );
    if let Some(balance) = &observation.native_balance {
        ctx.insert("__nativeBalance".to_string(), Value::String(balance.clone()));
    }
    ctx.insert("__marketData".to_string(), Value::Object(observation.prices.clone()));
    ctx.insert(
        "__portfolio".to_string(),
        serde_json::json!({
            "vaultTokens": observation.vault_tokens,
            "nativeBalance": observation.native_balance,
        }),
    );
    ctx
}

fn collect_action_tokens(params: &serde_json::Map<String, Value>) -> Vec<String> {
    ["tokenIn", "tokenOut", "token"]
        .iter()
        .filter_map(|k| params.get(*k).and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[instrument(skip(agent, chain, store, guardrails, strategy), fields(token_id = agent.token_id))]
pub async fn run_agent_cycle(
    agent: &Agent,
    chain: &Arc<dyn ChainClient>,
    store: &Store,
    guardrails: &Arc<dyn GuardrailsDispatcher>,
    chain_name: &str,
    strategy: &Strategy,
) -> anyhow::Result<RunResult> {
    let token_id = agent.token_id;
    let mut trace = Vec::new();

    // 1. observe
    let observation = chain.observe(token_id).await?;
    trace.push(crate::store::model::TraceEntry::new("observe", "ok", now_ms()));

    if observation.paused {
        let entry = MemoryEntry {
            reasoning: Some("observed paused flag".to_string()),
            ..MemoryEntry::new(chain_name, token_id, MemoryType::Blocked, now_ms())
        };
        store.store_memory(&entry).await?;

        return Ok(RunResult {
            acted: false,
            action: "wait".to_string(),
            blocked: true,
            block_reason: Some("Agent is paused on-chain".to_string()),
            execution_trace: trace,
            ..Default::default()
        });
    }

    // 2. recall
    let memories = store.recall(chain_name, token_id, 20).await?;

    // 3. think
    let tool_context = build_tool_context(&observation, &agent.vault);
    let decision = agent.brain.think(&observation, &memories, &agent.actions, &tool_context).await;
    trace.push(crate::store::model::TraceEntry::new("think", "ok", now_ms()));

    let decision_memory = MemoryEntry {
        action: Some(decision.action.clone()),
        reasoning: Some(decision.reasoning.clone()),
        ..MemoryEntry::new(chain_name, token_id, MemoryType::Decision, now_ms())
    };
    store.store_memory(&decision_memory).await?;

    // 4. wait short-circuit
    if decision.action == "wait" {
        return Ok(RunResult {
            acted: false,
            action: "wait".to_string(),
            reasoning: decision.reasoning,
            message: decision.message,
            blocked: decision.blocked.unwrap_or(false),
            block_reason: decision.block_reason,
            done: decision.done,
            next_check_ms: decision.next_check_ms,
            execution_trace: trace,
            ..Default::default()
        });
    }

    // 5. resolve action
    let Some(action) = agent.actions.get(&decision.action) else {
        let entry = MemoryEntry {
            action: Some(decision.action.clone()),
            reasoning: Some(format!("unknown action: {}", decision.action)),
            ..MemoryEntry::new(chain_name, token_id, MemoryType::Blocked, now_ms())
        };
        store.store_memory(&entry).await?;

        return Ok(RunResult {
            acted: false,
            action: decision.action.clone(),
            reasoning: decision.reasoning,
            blocked: true,
            block_reason: Some(format!("Unknown action: {}", decision.action)),
            execution_trace: trace,
            ..Default::default()
        });
    };

    if let Err(errors) = validate_params(action.schema(), &decision.params) {
        let joined = errors.join("; ");
        let entry = MemoryEntry {
            action: Some(decision.action.clone()),
            reasoning: Some(format!("parameter validation failed: {joined}")),
            ..MemoryEntry::new(chain_name, token_id, MemoryType::Blocked, now_ms())
        };
        store.store_memory(&entry).await?;

        return Ok(RunResult {
            acted: false,
            action: decision.action.clone(),
            reasoning: decision.reasoning,
            blocked: true,
            block_reason: Some(joined),
            execution_trace: trace,
            ..Default::default()
        });
    }

    // 6. readonly short-circuit
    if action.readonly() {
        let mut exec_params = decision.params.clone();
        for (k, v) in &tool_context {
            exec_params.insert(k.clone(), v.clone());
        }
        let outcome = match action.execute(&exec_params).await {
            Ok(_) => MemoryOutcome { success: true, tx_hash: None, error: None },
            Err(e) => MemoryOutcome { success: false, tx_hash: None, error: Some(e.to_string()) },
        };

        let entry = MemoryEntry {
            action: Some(decision.action.clone()),
            params: Some(Value::Object(decision.params.clone())),
            result: Some(outcome),
            reasoning: Some(decision.reasoning.clone()),
            ..MemoryEntry::new(chain_name, token_id, MemoryType::Observation, now_ms())
        };
        store.store_memory(&entry).await?;

        return Ok(RunResult {
            acted: true,
            action: decision.action.clone(),
            reasoning: decision.reasoning,
            params: decision.params,
            done: decision.done,
            next_check_ms: decision.next_check_ms,
            execution_trace: trace,
            intent_type: Some(decision.action),
            ..Default::default()
        });
    }

    // 7. encode
    let mut encode_params = decision.params.clone();
    encode_params.insert("vault".to_string(), Value::String(agent.vault.clone()));
    for (k, v) in &tool_context {
        encode_params.insert(k.clone(), v.clone());
    }

    let payloads = action.encode(&encode_params).await?;
    trace.push(crate::store::model::TraceEntry::new("encode", "ok", now_ms()));

    // 8. guardrails context
    let last = payloads.last().cloned().unwrap_or(ActionPayload {
        target: String::new(),
        value: "0".to_string(),
        data: "0x".to_string(),
    });

    let spend_amount: u128 = {
        let from_value = last.value.parse::<u128>().unwrap_or(0);
        if from_value > 0 {
            from_value
        } else {
            decision
                .params
                .get("amountIn")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u128>().ok())
                .unwrap_or(0)
        }
    };

    let vault_has_positive_balance = observation
        .native_balance
        .as_deref()
        .and_then(|b| b.parse::<u128>().ok())
        .is_some_and(|b| b > 0)
        || !observation.vault_tokens.is_empty();

    let cooldown_seconds = chain.read_cooldown_seconds(token_id).await.unwrap_or(0);

    let guardrail_ctx = GuardrailContext {
        token_id,
        agent_type: agent.agent_type.clone(),
        vault: agent.vault.clone(),
        timestamp: now_ms(),
        action_name: decision.action.clone(),
        spend_amount,
        action_tokens: collect_action_tokens(&decision.params),
        amount_in: decision.params.get("amountIn").and_then(Value::as_str).map(str::to_string),
        min_out: decision.params.get("minOut").and_then(Value::as_str).map(str::to_string),
        allowed_targets: strategy.strategy_params.allowed_targets.clone(),
        allowed_selectors: strategy.strategy_params.allowed_selectors.clone(),
        max_value_per_run: strategy
            .strategy_params
            .max_value_per_run
            .as_deref()
            .and_then(|s| s.parse::<u128>().ok()),
        require_positive_balance: strategy.require_positive_balance,
        vault_has_positive_balance,
        cooldown_active: cooldown_seconds > 0,
    };

    let guard_result = guardrails.check(&last, &guardrail_ctx).await;
    trace.push(crate::store::model::TraceEntry::new("guard", if guard_result.ok { "ok" } else { "blocked" }, now_ms()));

    if !guard_result.ok {
        let block_reason = guard_result
            .violations
            .first()
            .map(|v| v.message.clone())
            .unwrap_or_else(|| "policy violation".to_string());

        let entry = MemoryEntry {
            action: Some(decision.action.clone()),
            params: Some(Value::Object(decision.params.clone())),
            result: Some(MemoryOutcome {
                success: false,
                tx_hash: None,
                error: Some(block_reason.clone()),
            }),
            reasoning: Some(decision.reasoning.clone()),
            ..MemoryEntry::new(chain_name, token_id, MemoryType::Blocked, now_ms())
        };
        store.store_memory(&entry).await?;

        info!(token_id, %block_reason, "action blocked by guardrails");

        return Ok(RunResult {
            acted: false,
            action: decision.action.clone(),
            reasoning: decision.reasoning,
            message: Some(format!("Action blocked by safety policy: {block_reason}")),
            params: decision.params,
            payload: Some(payloads),
            blocked: true,
            block_reason: Some(block_reason),
            error_code: guard_result.violations.first().and_then(|v| v.code.clone()),
            execution_trace: trace,
            intent_type: Some(decision.action),
            ..Default::default()
        });
    }

    // 10. acted
    let mut out_params = decision.params.clone();
    out_params.insert("vault".to_string(), Value::String(agent.vault.clone()));
    out_params.insert("txValue".to_string(), Value::String(last.value.clone()));

    Ok(RunResult {
        acted: true,
        action: decision.action.clone(),
        reasoning: decision.reasoning,
        params: out_params,
        payload: Some(payloads),
        done: decision.done,
        next_check_ms: decision.next_check_ms,
        execution_trace: trace,
        intent_type: Some(decision.action),
        ..Default::default()
    })
}
