pub mod classify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::payload::action_hash;
use crate::agent::{AgentFactory, AgentManager, BlueprintResolver};
use crate::chain::{ActionPayload, ChainClient};
use crate::config::{cadence, AppConfig};
use crate::cycle::{self, RunResult};
use crate::guardrails::GuardrailsDispatcher;
use crate::metrics::Counters;
use crate::store::model::{MemoryEntry, MemoryOutcome, MemoryType, RunMode, RunRecord, Strategy, TraceEntry};
use crate::store::Store;
use crate::time::now_ms;

/// Actions whose successful submission completes the user's instruction on
/// its own, even if the brain didn't say `done: true` explicitly (§4.7-l).
const ONE_SHOT_ACTIONS: [&str; 2] = ["swap", "wrap"];

/// Releases the autopilot lease on drop if it hasn't already been released
/// explicitly, so a panic mid-cycle never leaves a token permanently leased
/// (§4.7-c: "always release in a finally, even on panics").
struct LeaseGuard {
    store: Store,
    chain: String,
    token_id: i64,
    released: bool,
}

impl LeaseGuard {
    fn new(store: Store, chain: String, token_id: i64) -> Self {
        Self {
            store,
            chain,
            token_id,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.release_autopilot_lock(&self.chain, self.token_id).await {
            warn!(token_id = self.token_id, error = %e, "failed to release autopilot lease");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            let store = self.store.clone();
            let chain = self.chain.clone();
            let token_id = self.token_id;
            tokio::spawn(async move {
                let _ = store.release_autopilot_lock(&chain, token_id).await;
            });
        }
    }
}

/// The tick loop and single-token pipeline (§4.7). Owns every piece of
/// mutable scheduler state as fields rather than module-level statics (§9).
pub struct Scheduler {
    store: Store,
    chain: Arc<dyn ChainClient>,
    guardrails: Arc<dyn GuardrailsDispatcher>,
    agents: AgentManager,
    blueprint: Arc<dyn BlueprintResolver>,
    agent_factory: Arc<dyn AgentFactory>,
    config: AppConfig,
    chain_name: String,
    blocked_counts: Mutex<HashMap<i64, u32>>,
    last_loop_at: Mutex<i64>,
    counters: Counters,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        chain: Arc<dyn ChainClient>,
        guardrails: Arc<dyn GuardrailsDispatcher>,
        agents: AgentManager,
        blueprint: Arc<dyn BlueprintResolver>,
        agent_factory: Arc<dyn AgentFactory>,
        config: AppConfig,
        chain_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain,
            guardrails,
            agents,
            blueprint,
            agent_factory,
            config,
            chain_name: chain_name.into(),
            blocked_counts: Mutex::new(HashMap::new()),
            last_loop_at: Mutex::new(0),
            counters: Counters::new(),
        }
    }

    pub fn last_loop_at(&self) -> i64 {
        *self.last_loop_at.lock()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn active_blocked_count(&self, token_id: i64) -> u32 {
        self.blocked_counts.lock().get(&token_id).copied().unwrap_or(0)
    }

    /// Runs the tick loop forever. Intended to be spawned as a background
    /// task; the process exits via the caller's own shutdown-signal wait.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut consecutive_errors: u32 = 0;

        loop {
            *self.last_loop_at.lock() = now_ms();

            match self.tick().await {
                Ok(()) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "scheduler tick failed");
                    if consecutive_errors >= self.config.max_tick_retries {
                        warn!("consecutive tick failures exceeded threshold, backing off 60s");
                        Counters::inc(&self.counters.tick_backoffs);
                        tokio::time::sleep(Duration::from_millis(60_000)).await;
                        consecutive_errors = 0;
                        continue;
                    }
                }
            }

            let sleep_ms = self.adaptive_sleep_ms().await.unwrap_or(self.config.poll_interval_ms);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    async fn adaptive_sleep_ms(&self) -> anyhow::Result<u64> {
        let now = now_ms();
        let earliest = self.store.get_earliest_next_check_at(&self.chain_name).await?;
        Ok(match earliest {
            Some(at) => {
                let until = (at - now).max(self.config.loop_floor_ms as i64) as u64;
                self.config.poll_interval_ms.min(until)
            }
            None => self.config.poll_interval_ms,
        })
    }

    #[instrument(skip(self), fields(chain = %self.chain_name))]
    async fn tick(&self) -> anyhow::Result<()> {
        let token_ids = self.store.list_schedulable_token_ids(&self.chain_name).await?;
        debug!(count = token_ids.len(), "tick dispatching tokens");
        Counters::inc(&self.counters.ticks);
        self.counters
            .tokens_dispatched
            .fetch_add(token_ids.len() as u64, std::sync::atomic::Ordering::Relaxed);

        // All-settled: every token's pipeline is independent and its own
        // errors are handled inside `run_single_token`, so one failing token
        // never aborts the rest of the batch.
        stream::iter(token_ids)
            .map(|token_id| self.run_single_token(token_id, false))
            .buffer_unordered(self.config.scheduler_concurrency)
            .for_each(|outcome| async move {
                if let Err(e) = outcome {
                    error!(error = %e, "run_single_token returned an error");
                }
            })
            .await;

        Ok(())
    }

    /// The single-token pipeline (§4.7 a-m). `skip_cadence_check` is set by
    /// the HTTP collaborator's immediate-trigger path.
    #[instrument(skip(self), fields(chain = %self.chain_name, token_id))]
    pub async fn run_single_token(&self, token_id: i64, skip_cadence_check: bool) -> anyhow::Result<()> {
        // a. Cadence gate.
        if !skip_cadence_check {
            if let Some(next) = self.store.get_next_check_at(&self.chain_name, token_id).await? {
                if next > now_ms() {
                    return Ok(());
                }
            }
        }

        // b. Enablement check.
        let Some(autopilot) = self.store.get_autopilot(&self.chain_name, token_id).await? else {
            return Ok(());
        };
        if !autopilot.enabled {
            return Ok(());
        }

        // c. Lease acquire; always released, even on panic.
        let acquired = self
            .store
            .try_acquire_autopilot_lock(&self.chain_name, token_id, self.config.autopilot_lease_ms, now_ms())
            .await?;
        if !acquired {
            Counters::inc(&self.counters.lease_contended);
            return Ok(());
        }
        let guard = LeaseGuard::new(self.store.clone(), self.chain_name.clone(), token_id);

        let outcome = self.run_leased(token_id).await;
        guard.release().await;

        if let Err(e) = outcome {
            self.handle_cycle_error(token_id, e).await?;
        }

        Ok(())
    }

    /// Steps d-l, run under the held lease.
    async fn run_leased(&self, token_id: i64) -> anyhow::Result<()> {
        // d. Subscription gate.
        let subscription = self.chain.read_subscription_status(token_id).await?;
        if subscription.blocks_dispatch() {
            self.agents.stop(token_id);
            return Ok(());
        }

        // e. Standby gate.
        let Some(strategy) = self.store.get_strategy(&self.chain_name, token_id).await? else {
            return Ok(());
        };
        if strategy.is_llm() && !strategy.has_goal() {
            return Ok(());
        }

        // f. Agent ensure.
        let agent = match self.agents.get(token_id) {
            Some(existing) => existing,
            None => {
                let chain_tag = self
                    .chain
                    .read_agent_type(token_id)
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                let observation = self.chain.observe(token_id).await?;
                let Some(blueprint_name) = self.blueprint.resolve(&chain_tag, &strategy.strategy_type) else {
                    warn!(token_id, chain_tag, strategy_type = %strategy.strategy_type, "unknown agent blueprint");
                    return Ok(());
                };
                let vault = observation.vault.clone();
                self.agents
                    .ensure(token_id, || self.agent_factory.build(token_id, &blueprint_name, &vault, &strategy))
            }
        };

        // g. Run the cognitive cycle.
        let result =
            cycle::run_agent_cycle(&agent, &self.chain, &self.store, &self.guardrails, &self.chain_name, &strategy).await?;

        self.apply_run_result(token_id, &strategy, result).await
    }

    /// Steps h-l: record the outcome, apply backoff/cadence, submit if
    /// there's a payload to submit, and apply done semantics.
    async fn apply_run_result(&self, token_id: i64, strategy: &Strategy, result: RunResult) -> anyhow::Result<()> {
        let now = now_ms();
        let has_tx_path = result.acted && result.payload.is_some() && !result.blocked;

        // h. Record the non-TX path.
        if !has_tx_path {
            let mut trace = result.execution_trace.clone();
            trace.push(TraceEntry::new("record", if result.blocked { "blocked" } else { "ok" }, now));

            let mut run = RunRecord::new(&self.chain_name, token_id, now);
            run.simulate_ok = !result.blocked;
            run.execution_trace = trace;
            run.intent_type = result.intent_type.clone();
            run.decision_reason = Some(result.reasoning.clone());
            run.decision_message = result.message.clone();
            run.error = if result.blocked { result.block_reason.clone() } else { None };
            run.error_code = result.error_code.clone();
            if result.blocked {
                let classification =
                    classify::classify_blocked_reason(result.block_reason.as_deref().unwrap_or(""), result.error_code.as_deref());
                run.failure_category = Some(classification.failure_category);
                run.error_code = classification.error_code.or(run.error_code);
            }
            self.store.record_run(&run, self.config.run_retention_count).await?;

            if result.done.unwrap_or(false) {
                self.finish_goal(token_id).await?;
                return Ok(());
            }
        }

        // i. Blocked backoff.
        if result.blocked {
            Counters::inc(&self.counters.blocked_total);
            self.handle_blocked_backoff(token_id, &result).await?;
            return Ok(());
        }

        // Any non-blocked outcome resets the consecutive-blocked counter.
        self.blocked_counts.lock().remove(&token_id);

        // j. Success-path cadence.
        let min_interval = strategy.min_interval_ms.unwrap_or(self.config.poll_interval_ms);
        let next_hint = result.next_check_ms;
        let next_ms = match next_hint {
            Some(hint) if result.action == "wait" && !result.done.unwrap_or(false) => {
                hint.max(cadence::WAIT_CADENCE_MIN_MS)
            }
            Some(hint) if result.acted && hint < min_interval => hint.max(cadence::FAST_FOLLOWUP_MIN_MS),
            _ => next_hint.unwrap_or(min_interval).max(min_interval),
        };
        self.store.update_next_check_at(&self.chain_name, token_id, now + next_ms as i64).await?;

        // k. Submit, if there is anything to submit.
        if !has_tx_path {
            return Ok(());
        }
        let payloads = result.payload.clone().unwrap_or_default();
        if payloads.is_empty() {
            return Ok(());
        }

        let run_mode = if self.config.shadow_mode { RunMode::Shadow } else { RunMode::Primary };

        if self.config.shadow_mode && !self.config.shadow_execute_tx {
            let mut trace = result.execution_trace.clone();
            trace.push(TraceEntry::new("submit", "skip", now).with_note("shadow mode"));

            let mut run = RunRecord::new(&self.chain_name, token_id, now);
            run.simulate_ok = true;
            run.run_mode = RunMode::Shadow;
            run.intent_type = result.intent_type.clone();
            run.decision_reason = Some(result.reasoning.clone());
            run.decision_message = result.message.clone();
            run.execution_trace = trace;
            self.store.record_run(&run, self.config.run_retention_count).await?;
            Counters::inc(&self.counters.submits_shadow_skipped);
            return Ok(());
        }

        let receipt = match self.submit_with_retry(token_id, &payloads).await {
            Ok(receipt) => {
                Counters::inc(&self.counters.submits_ok);
                receipt
            }
            Err(e) => {
                Counters::inc(&self.counters.submits_failed);
                return Err(e);
            }
        };

        let memory = MemoryEntry {
            result: Some(MemoryOutcome {
                success: true,
                tx_hash: Some(receipt.hash.clone()),
                error: None,
            }),
            ..MemoryEntry::new(&self.chain_name, token_id, MemoryType::Execution, now)
        };
        self.store.store_memory(&memory).await?;

        let mut trace = result.execution_trace.clone();
        trace.push(TraceEntry::new("execute", "ok", now));
        trace.push(TraceEntry::new("verify", "ok", now));
        trace.push(TraceEntry::new("record", "ok", now));

        let mut run = RunRecord::new(&self.chain_name, token_id, now);
        run.simulate_ok = true;
        run.tx_hash = Some(receipt.hash);
        run.action_hash = action_hash(&payloads);
        run.gas_used = receipt.gas_used;
        run.run_mode = run_mode;
        run.intent_type = result.intent_type.clone();
        run.decision_reason = Some(result.reasoning.clone());
        run.decision_message = result.message.clone();
        run.execution_trace = trace;
        self.store.record_run(&run, self.config.run_retention_count).await?;

        // l. Done semantics.
        let one_shot = ONE_SHOT_ACTIONS.contains(&result.action.as_str()) && result.done != Some(false);
        if result.done == Some(true) || (result.acted && one_shot) {
            self.finish_goal(token_id).await?;
        }

        Ok(())
    }

    async fn submit_with_retry(
        &self,
        token_id: i64,
        payloads: &[ActionPayload],
    ) -> anyhow::Result<crate::chain::TxReceipt> {
        let max_attempts = self.config.execute_max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = if payloads.len() > 1 {
                self.chain.execute_batch_action(token_id, payloads).await
            } else {
                self.chain.execute_action(token_id, &payloads[0]).await
            };

            match result {
                Ok(receipt) => return Ok(receipt),
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.execute_retry_base_ms * attempt as u64;
                    warn!(token_id, attempt, error = %e, "submit attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish_goal(&self, token_id: i64) -> anyhow::Result<()> {
        self.store.clear_trading_goal(&self.chain_name, token_id, now_ms()).await?;
        self.agents.stop(token_id);
        Ok(())
    }

    /// i. Blocked backoff: exponential with a dynamic on-chain-cooldown
    /// override, escalating to autopause at `max_blocked_retries`.
    async fn handle_blocked_backoff(&self, token_id: i64, result: &RunResult) -> anyhow::Result<()> {
        let count = {
            let mut counts = self.blocked_counts.lock();
            let entry = counts.entry(token_id).or_insert(0);
            *entry += 1;
            *entry
        };

        if count >= self.config.max_blocked_retries {
            let mut run = RunRecord::new(&self.chain_name, token_id, now_ms());
            run.simulate_ok = false;
            run.failure_category = Some("business_rejected".to_string());
            run.error_code = Some("BUSINESS_AUTOPAUSE_THRESHOLD".to_string());
            run.error = result.block_reason.clone();
            run.decision_reason = Some(result.reasoning.clone());
            self.store.record_run(&run, self.config.run_retention_count).await?;

            self.finish_goal(token_id).await?;
            self.blocked_counts.lock().remove(&token_id);
            Counters::inc(&self.counters.auto_paused);
            info!(token_id, count, "token auto-paused after repeated blocked cycles");
            return Ok(());
        }

        let block_reason = result.block_reason.as_deref().unwrap_or("");
        let backoff_ms = if classify::is_cooldown_reason(block_reason, result.error_code.as_deref()) {
            match self.chain.read_cooldown_seconds(token_id).await {
                Ok(seconds) if seconds > 0 => seconds * 1000 + 5_000,
                _ => self.exponential_backoff_ms(count),
            }
        } else {
            self.exponential_backoff_ms(count)
        };

        self.store
            .update_next_check_at(&self.chain_name, token_id, now_ms() + backoff_ms as i64)
            .await?;
        Ok(())
    }

    fn exponential_backoff_ms(&self, count: u32) -> u64 {
        let shift = (count - 1).min(20);
        self.config
            .blocked_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.config.max_backoff_ms)
    }

    /// m. Error path: classify, record, and either permanently disable,
    /// treat as a synthetic blocked cycle, or let it be retried next tick.
    async fn handle_cycle_error(&self, token_id: i64, err: anyhow::Error) -> anyhow::Result<()> {
        let raw_message = err.to_string();
        let classification = classify::classify_error(&raw_message);
        error!(token_id, error = %raw_message, category = %classification.failure_category, "cycle error");
        if classification.failure_category == "infra" {
            Counters::inc(&self.counters.errors_infra);
        } else {
            Counters::inc(&self.counters.errors_business_rejected);
        }

        if self.agents.get(token_id).is_some() {
            let memory = MemoryEntry {
                result: Some(MemoryOutcome {
                    success: false,
                    tx_hash: None,
                    error: Some(raw_message.clone()),
                }),
                ..MemoryEntry::new(&self.chain_name, token_id, MemoryType::Execution, now_ms())
            };
            let _ = self.store.store_memory(&memory).await;
        }

        let truncated: String = raw_message.chars().take(240).collect();
        let mut run = RunRecord::new(&self.chain_name, token_id, now_ms());
        run.simulate_ok = false;
        run.error = Some(raw_message.clone());
        run.failure_category = Some(classification.failure_category.clone());
        run.error_code = classification.error_code.clone();
        run.execution_trace = vec![
            TraceEntry::new("record", "error", now_ms()).with_meta(serde_json::json!({ "error": truncated }))
        ];
        self.store.record_run(&run, self.config.run_retention_count).await?;

        if classify::is_invalid_token_error(&raw_message) {
            self.store
                .disable(&self.chain_name, token_id, "invalid token id on-chain", None, now_ms())
                .await?;
            self.finish_goal(token_id).await?;
            self.blocked_counts.lock().remove(&token_id);
            Counters::inc(&self.counters.auto_disabled);
            return Ok(());
        }

        if classification.failure_category == "business_rejected" {
            let synthetic = RunResult {
                blocked: true,
                block_reason: Some(raw_message),
                error_code: classification.error_code,
                ..Default::default()
            };
            self.handle_blocked_backoff(token_id, &synthetic).await?;
        }

        Ok(())
    }
}
