pub mod llm;
pub mod provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::ActionRegistry;
use crate::chain::Observation;
use crate::store::model::MemoryEntry;

/// What a brain produces. Also the wire shape emitted by the LLM brain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl Decision {
    pub fn wait() -> Self {
        Self {
            action: "wait".to_string(),
            params: serde_json::Map::new(),
            reasoning: String::new(),
            message: None,
            confidence: 0.0,
            done: None,
            next_check_ms: None,
            blocked: None,
            block_reason: None,
        }
    }

    /// Clamps confidence, defaults missing fields, and folds unknown actions
    /// into `"wait"` (§8 property 6).
    pub fn normalize(mut self, known_actions: &[String]) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.action != "wait" && !known_actions.iter().any(|a| a == &self.action) {
            self.action = "wait".to_string();
        }
        self
    }
}

/// Stateless across tokens; per-token configuration (goal text, provider,
/// model, max steps, min confidence) is captured at construction.
///
/// `tool_context` carries the reserved-prefix values the cycle has already
/// resolved through the chain client (`__readAllowance`, `__getAmountsOut`,
/// ...) so tool calls never need to reach back out of the brain (see
/// DESIGN.md on Brain/ChainClient decoupling).
#[async_trait]
pub trait Brain: Send + Sync {
    async fn think(
        &self,
        observation: &Observation,
        memories: &[MemoryEntry],
        actions: &ActionRegistry,
        tool_context: &serde_json::Map<String, Value>,
    ) -> Decision;
}
