pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Multi-read snapshot taken once per cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub token_id: i64,
    pub agent_status: String,
    pub owner: String,
    pub vault: String,
    pub renter: String,
    pub operator: String,
    pub renter_expires: i64,
    pub operator_expires: i64,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub observed_at: i64,
    pub paused: bool,
    #[serde(default)]
    pub vault_tokens: Vec<String>,
    #[serde(default)]
    pub native_balance: Option<String>,
    #[serde(default)]
    pub prices: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub gas_price: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SubscriptionStatus {
    None,
    Active,
    GracePeriod,
    Expired,
    Canceled,
}

impl SubscriptionStatus {
    pub fn blocks_dispatch(&self) -> bool {
        matches!(self, Self::GracePeriod | Self::Expired | Self::Canceled)
    }
}

/// `{target, value, data}`, exactly what is submitted on-chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionPayload {
    pub target: String,
    /// Decimal-string uint256.
    pub value: String,
    /// 0x-prefixed hex bytes.
    pub data: String,
}

#[derive(Clone, Debug)]
pub struct TxReceipt {
    pub hash: String,
    pub receipt_status: bool,
    pub receipt_block: u64,
    pub gas_used: Option<i64>,
}

/// The operations the scheduler depends on. Network-level concerns (RPC
/// transport, signing, retries against the provider) live behind an
/// implementation; the scheduler only ever calls through this trait and
/// wraps the `execute*` calls itself with `with_retry` (see `scheduler::classify`).
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn observe(&self, token_id: i64) -> anyhow::Result<Observation>;

    async fn read_agent_type(&self, token_id: i64) -> anyhow::Result<String>;

    async fn read_subscription_status(&self, token_id: i64) -> anyhow::Result<SubscriptionStatus>;

    async fn read_allowance(&self, token: &str, owner: &str, spender: &str) -> anyhow::Result<String>;

    /// Best-effort; returns an empty vec on failure rather than erroring.
    async fn get_amounts_out(&self, router: &str, amount_in: &str, path: &[String]) -> Vec<String>;

    async fn read_cooldown_seconds(&self, token_id: i64) -> anyhow::Result<u64>;

    async fn execute_action(&self, token_id: i64, payload: &ActionPayload) -> anyhow::Result<TxReceipt>;

    async fn execute_batch_action(&self, token_id: i64, payloads: &[ActionPayload]) -> anyhow::Result<TxReceipt>;

    async fn enable_operator_with_permit(
        &self,
        token_id: i64,
        operator: &str,
        deadline: i64,
        sig: &str,
    ) -> anyhow::Result<TxReceipt>;

    async fn clear_operator(&self, token_id: i64) -> anyhow::Result<TxReceipt>;
}
