use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chain::{ActionPayload, ChainClient, Observation, SubscriptionStatus, TxReceipt};
use crate::time::now_ms;

/// Deterministic in-memory `ChainClient`. Used for default wiring before a
/// real RPC-backed client is plugged in, and as the harness for integration
/// tests: behaviour is driven entirely by the maps below rather than network
/// state.
pub struct MockChainClient {
    observations: Mutex<HashMap<i64, Observation>>,
    subscriptions: Mutex<HashMap<i64, SubscriptionStatus>>,
    cooldowns: Mutex<HashMap<i64, u64>>,
    allowances: Mutex<HashMap<(String, String, String), String>>,
    /// When set, `execute_action`/`execute_batch_action` return this error
    /// string instead of succeeding (used to simulate chain-level rejection).
    fail_execute_with: Mutex<Option<String>>,
    tx_counter: Mutex<u64>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            observations: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            fail_execute_with: Mutex::new(None),
            tx_counter: Mutex::new(0),
        }
    }

    pub fn seed_observation(&self, token_id: i64, obs: Observation) {
        self.observations.lock().insert(token_id, obs);
    }

    pub fn seed_subscription(&self, token_id: i64, status: SubscriptionStatus) {
        self.subscriptions.lock().insert(token_id, status);
    }

    pub fn seed_cooldown(&self, token_id: i64, seconds: u64) {
        self.cooldowns.lock().insert(token_id, seconds);
    }

    pub fn seed_allowance(&self, token: &str, owner: &str, spender: &str, amount: &str) {
        self.allowances
            .lock()
            .insert((token.to_string(), owner.to_string(), spender.to_string()), amount.to_string());
    }

    pub fn fail_next_execute(&self, message: impl Into<String>) {
        *self.fail_execute_with.lock() = Some(message.into());
    }

    fn next_tx_hash(&self) -> String {
        let mut n = self.tx_counter.lock();
        *n += 1;
        format!("0xmock{:064x}", *n)
    }

    fn default_observation(token_id: i64) -> Observation {
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
            native_balance: Some("1000000000000000000".to_string()),
            prices: serde_json::Map::new(),
            gas_price: Some("1000000000".to_string()),
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn observe(&self, token_id: i64) -> anyhow::Result<Observation> {
        Ok(self
            .observations
            .lock()
            .get(&token_id)
            .cloned()
            .unwrap_or_else(|| Self::default_observation(token_id)))
    }

    async fn read_agent_type(&self, _token_id: i64) -> anyhow::Result<String> {
        Ok("unknown".to_string())
    }

    async fn read_subscription_status(&self, token_id: i64) -> anyhow::Result<SubscriptionStatus> {
        Ok(self
            .subscriptions
            .lock()
            .get(&token_id)
            .copied()
            .unwrap_or(SubscriptionStatus::Active))
    }

    async fn read_allowance(&self, token: &str, owner: &str, spender: &str) -> anyhow::Result<String> {
        Ok(self
            .allowances
            .lock()
            .get(&(token.to_string(), owner.to_string(), spender.to_string()))
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }

    async fn get_amounts_out(&self, _router: &str, amount_in: &str, path: &[String]) -> Vec<String> {
        if path.is_empty() {
            return Vec::new();
        }
        vec![amount_in.to_string(); path.len()]
    }

    async fn read_cooldown_seconds(&self, token_id: i64) -> anyhow::Result<u64> {
        Ok(self.cooldowns.lock().get(&token_id).copied().unwrap_or(0))
    }

    async fn execute_action(&self, _token_id: i64, _payload: &ActionPayload) -> anyhow::Result<TxReceipt> {
        if let Some(msg) = self.fail_execute_with.lock().take() {
            return Err(anyhow::anyhow!(msg));
        }
        Ok(TxReceipt {
            hash: self.next_tx_hash(),
            receipt_status: true,
            receipt_block: 1,
            gas_used: Some(120_000),
        })
    }

    async fn execute_batch_action(&self, token_id: i64, payloads: &[ActionPayload]) -> anyhow::Result<TxReceipt> {
        if payloads.is_empty() {
            return Err(anyhow::anyhow!("empty batch payload"));
        }
        self.execute_action(token_id, &payloads[payloads.len() - 1]).await
    }

    async fn enable_operator_with_permit(
        &self,
        _token_id: i64,
        _operator: &str,
        _deadline: i64,
        _sig: &str,
    ) -> anyhow::Result<TxReceipt> {
        Ok(TxReceipt {
            hash: self.next_tx_hash(),
            receipt_status: true,
            receipt_block: 1,
            gas_used: Some(60_000),
        })
    }

    async fn clear_operator(&self, _token_id: i64) -> anyhow::Result<TxReceipt> {
        Ok(TxReceipt {
            hash: self.next_tx_hash(),
            receipt_status: true,
            receipt_block: 1,
            gas_used: Some(45_000),
        })
    }
}
