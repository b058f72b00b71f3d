use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::actions::{builtin::default_registry, ActionRegistry};
use crate::brain::llm::{LlmBrain, LlmBrainConfig};
use crate::brain::provider::LlmProvider;
use crate::brain::Brain;
use crate::chain::ChainClient;
use crate::config::AppConfig;
use crate::store::model::Strategy;

/// Wires a brain, its action set, and its identity together for one
/// (chain, token) pair. Agents never reach back into the manager that owns
/// them (design notes: capability-style composition over cyclic references).
pub struct Agent {
    pub token_id: i64,
    pub agent_type: String,
    pub vault: String,
    pub brain: Arc<dyn Brain>,
    pub actions: ActionRegistry,
}

/// Resolves the agent-type blueprint to wire for a token: chain-reported
/// tag, falling back to the strategy type, falling back to a configured
/// default. Unknown blueprints are rejected rather than silently defaulted
/// past this point (§4.7-f).
pub trait BlueprintResolver: Send + Sync {
    fn resolve(&self, chain_tag: &str, strategy_type: &str) -> Option<String>;
}

/// Configuration-driven lookup, replacing the small fixed list the original
/// chain-type -> agent-type mapping hard-coded (§9 open question).
pub struct ConfiguredBlueprintResolver {
    known: Vec<String>,
    default_blueprint: String,
}

impl ConfiguredBlueprintResolver {
    pub fn new(known: Vec<String>, default_blueprint: impl Into<String>) -> Self {
        Self {
            known,
            default_blueprint: default_blueprint.into(),
        }
    }
}

impl BlueprintResolver for ConfiguredBlueprintResolver {
    fn resolve(&self, chain_tag: &str, strategy_type: &str) -> Option<String> {
        if chain_tag != "unknown" && self.known.iter().any(|k| k == chain_tag) {
            return Some(chain_tag.to_string());
        }
        if self.known.iter().any(|k| k == strategy_type) {
            return Some(strategy_type.to_string());
        }
        if self.known.iter().any(|k| k == &self.default_blueprint) {
            return Some(self.default_blueprint.clone());
        }
        None
    }
}

/// Builds the `Agent` the scheduler runs for a token once its blueprint is
/// resolved (§4.7-f). Kept behind a trait so wiring an agent with a
/// different brain/action set never touches the scheduler.
pub trait AgentFactory: Send + Sync {
    fn build(&self, token_id: i64, agent_type: &str, vault: &str, strategy: &Strategy) -> Agent;
}

/// Wires the LLM brain against the built-in action registry, reading
/// provider/model/environment settings from configuration (capability-pack
/// loading itself is an external collaborator, out of scope here).
pub struct LlmAgentFactory {
    provider: Arc<dyn LlmProvider>,
    fallback_provider: Option<Arc<dyn LlmProvider>>,
    config: AppConfig,
    chain: Arc<dyn ChainClient>,
}

impl LlmAgentFactory {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        fallback_provider: Option<Arc<dyn LlmProvider>>,
        config: AppConfig,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            provider,
            fallback_provider,
            config,
            chain,
        }
    }
}

impl AgentFactory for LlmAgentFactory {
    fn build(&self, token_id: i64, agent_type: &str, vault: &str, strategy: &Strategy) -> Agent {
        let goal = strategy
            .strategy_params
            .trading_goal
            .clone()
            .unwrap_or_default();

        let brain = LlmBrain::new(LlmBrainConfig {
            provider: self.provider.clone(),
            fallback_provider: self.fallback_provider.clone(),
            model: self.config.llm_model.clone(),
            fallback_model: self.config.llm_fallback_model.clone(),
            goal,
            chain_id: self.config.chain_id.clone(),
            router: self.config.router_address.clone(),
            wrapped_native: self.config.wrapped_native.clone(),
            stablecoins: self.config.stablecoins.clone(),
            min_confidence: self.config.llm_min_confidence,
        });

        Agent {
            token_id,
            agent_type: agent_type.to_string(),
            vault: vault.to_string(),
            brain: Arc::new(brain),
            actions: default_registry(self.chain.clone()),
        }
    }
}

/// Lifecycle cache of live agents, exclusively mutated by the scheduler
/// (`ensure`/`stop`) and the HTTP collaborator (stop on strategy mutation,
/// disable, or clear-goal). Coarse-grained: entries are replaced or removed
/// wholesale, never edited in place.
#[derive(Clone)]
pub struct AgentManager {
    agents: Arc<Mutex<HashMap<i64, Arc<Agent>>>>,
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentManager {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, token_id: i64) -> Option<Arc<Agent>> {
        self.agents.lock().get(&token_id).cloned()
    }

    pub fn ensure(&self, token_id: i64, build: impl FnOnce() -> Agent) -> Arc<Agent> {
        let mut agents = self.agents.lock();
        if let Some(existing) = agents.get(&token_id) {
            return existing.clone();
        }
        let agent = Arc::new(build());
        agents.insert(token_id, agent.clone());
        info!(token_id, agent_type = %agent.agent_type, "agent started");
        agent
    }

    pub fn stop(&self, token_id: i64) {
        if self.agents.lock().remove(&token_id).is_some() {
            debug!(token_id, "agent stopped");
        }
    }
}
