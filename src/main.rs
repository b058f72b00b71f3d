use std::sync::Arc;

use autopilot_runtime::agent::{AgentManager, ConfiguredBlueprintResolver, LlmAgentFactory};
use autopilot_runtime::brain::provider::{HttpLlmProvider, LlmProvider};
use autopilot_runtime::chain::mock::MockChainClient;
use autopilot_runtime::chain::ChainClient;
use autopilot_runtime::config::AppConfig;
use autopilot_runtime::db::Db;
use autopilot_runtime::guardrails::DefaultGuardrails;
use autopilot_runtime::logger::init_tracing;
use autopilot_runtime::scheduler::Scheduler;
use autopilot_runtime::store::sqlx_backend::SqlxStore;
use autopilot_runtime::store::Store;

/// Known agent-type blueprints this binary can wire; a token whose on-chain
/// tag (or strategy type) isn't in this list is skipped rather than guessed
/// at (§4.7-f, §9 open question on the chain-type -> agent-type mapping).
const KNOWN_BLUEPRINTS: &[&str] = &["dca", "rebalancer", "yield"];
const DEFAULT_BLUEPRINT: &str = "dca";

/// Connects the database, runs migrations, and wraps the repository in the
/// `Store` facade every other module talks to.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Store> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    let repo = Arc::new(SqlxStore::new((*db.pool).clone()));
    Ok(Store::new(repo))
}

/// Wires a `ChainClient`. A real RPC-backed client is an external
/// collaborator; the mock keeps the binary runnable standalone.
fn init_chain_client() -> Arc<dyn ChainClient> {
    Arc::new(MockChainClient::new())
}

fn init_agent_factory(cfg: &AppConfig, chain: Arc<dyn ChainClient>) -> Arc<LlmAgentFactory> {
    let provider = Arc::new(HttpLlmProvider::new(cfg.llm_base_url.clone(), cfg.llm_api_key.clone()));
    let fallback_provider = cfg
        .llm_fallback_model
        .as_ref()
        .map(|_| Arc::new(HttpLlmProvider::new(cfg.llm_base_url.clone(), cfg.llm_api_key.clone())) as Arc<dyn LlmProvider>);

    Arc::new(LlmAgentFactory::new(provider, fallback_provider, cfg.clone(), chain))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting autopilot runtime...");

    let cfg = AppConfig::from_env();
    let chain_name = std::env::var("CHAIN_NAME").unwrap_or_else(|_| cfg.chain_id.clone());

    let store = init_store(&cfg).await?;
    let chain = init_chain_client();
    let guardrails = Arc::new(DefaultGuardrails);
    let agents = AgentManager::new();
    let blueprint = Arc::new(ConfiguredBlueprintResolver::new(
        KNOWN_BLUEPRINTS.iter().map(|s| s.to_string()).collect(),
        DEFAULT_BLUEPRINT,
    ));
    let agent_factory = init_agent_factory(&cfg, chain.clone());

    let scheduler = Arc::new(Scheduler::new(
        store,
        chain,
        guardrails,
        agents,
        blueprint,
        agent_factory,
        cfg,
        chain_name.clone(),
    ));

    let loop_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                tracing::error!(error = %e, "scheduler loop exited");
            }
        })
    };

    tracing::info!(chain = %chain_name, "Runtime started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    loop_handle.abort();

    Ok(())
}
