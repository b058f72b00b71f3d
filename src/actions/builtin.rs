use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::{Action, ParamSchema, ParamType, PropertySchema};
use crate::chain::{ActionPayload, ChainClient};

fn required_string(params: &serde_json::Map<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required string parameter: {key}"))
}

/// Deterministic, schema-less stand-in for real ABI-encoding: the payload's
/// `data` is a hex digest of the ordered parameter values. A concrete chain
/// integration replaces this with the real calldata encoder; the scheduler
/// and guardrails never inspect `data` beyond its hex shape.
fn synthetic_calldata(selector: &str, fields: &[&str]) -> String {
    let joined = fields.join(":");
    format!("0x{}{}", hex::encode(selector.as_bytes()), hex::encode(joined.as_bytes()))
}

/// Swaps `amountIn` of `tokenIn` for at least `minOut` of `tokenOut` via `router`.
pub struct SwapAction;

#[async_trait]
impl Action for SwapAction {
    fn name(&self) -> &str {
        "swap"
    }

    fn description(&self) -> &str {
        "Swap tokenIn for tokenOut through a router, respecting a minimum output amount."
    }

    fn readonly(&self) -> bool {
        false
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(|| {
            let mut properties = HashMap::new();
            properties.insert("router".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("tokenIn".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("tokenOut".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("amountIn".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("minOut".to_string(), PropertySchema::new(ParamType::String));
            ParamSchema {
                properties,
                required: vec![
                    "router".to_string(),
                    "tokenIn".to_string(),
                    "tokenOut".to_string(),
                    "amountIn".to_string(),
                    "minOut".to_string(),
                ],
            }
        })
    }

    async fn encode(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Vec<ActionPayload>> {
        let router = required_string(params, "router")?;
        let token_in = required_string(params, "tokenIn")?;
        let token_out = required_string(params, "tokenOut")?;
        let amount_in = required_string(params, "amountIn")?;
        let min_out = required_string(params, "minOut")?;

        Ok(vec![ActionPayload {
            target: router,
            value: "0".to_string(),
            data: synthetic_calldata("swap", &[&token_in, &token_out, &amount_in, &min_out]),
        }])
    }
}

/// Wraps the chain's native asset into its wrapped ERC-20/jetton form.
pub struct WrapAction;

#[async_trait]
impl Action for WrapAction {
    fn name(&self) -> &str {
        "wrap"
    }

    fn description(&self) -> &str {
        "Wrap native currency into the chain's wrapped-native token."
    }

    fn readonly(&self) -> bool {
        false
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(|| {
            let mut properties = HashMap::new();
            properties.insert("wrappedNative".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("amountIn".to_string(), PropertySchema::new(ParamType::String));
            ParamSchema {
                properties,
                required: vec!["wrappedNative".to_string(), "amountIn".to_string()],
            }
        })
    }

    async fn encode(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Vec<ActionPayload>> {
        let wrapped_native = required_string(params, "wrappedNative")?;
        let amount_in = required_string(params, "amountIn")?;

        Ok(vec![ActionPayload {
            target: wrapped_native,
            value: amount_in,
            data: "0xd0e30db0".to_string(),
        }])
    }
}

/// Approves `spender` to move up to `amount` of `token` on the vault's behalf.
pub struct ApproveAction;

#[async_trait]
impl Action for ApproveAction {
    fn name(&self) -> &str {
        "approve"
    }

    fn description(&self) -> &str {
        "Approve a spender to move a bounded amount of a token."
    }

    fn readonly(&self) -> bool {
        false
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(|| {
            let mut properties = HashMap::new();
            properties.insert("token".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("spender".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("amount".to_string(), PropertySchema::new(ParamType::String));
            ParamSchema {
                properties,
                required: vec!["token".to_string(), "spender".to_string(), "amount".to_string()],
            }
        })
    }

    async fn encode(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Vec<ActionPayload>> {
        let token = required_string(params, "token")?;
        let spender = required_string(params, "spender")?;
        let amount = required_string(params, "amount")?;

        Ok(vec![ActionPayload {
            target: token,
            value: "0".to_string(),
            data: synthetic_calldata("approve", &[&spender, &amount]),
        }])
    }
}

/// Read-only: surfaces market data the cycle injected under `__marketData`.
pub struct GetMarketDataAction;

#[async_trait]
impl Action for GetMarketDataAction {
    fn name(&self) -> &str {
        "get_market_data"
    }

    fn description(&self) -> &str {
        "Return current market prices and gas conditions for the vault's tokens."
    }

    fn readonly(&self) -> bool {
        true
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(ParamSchema::default)
    }

    async fn execute(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
        Ok(params.get("__marketData").cloned().unwrap_or(Value::Null))
    }
}

/// Read-only: surfaces the vault's token/native balances the cycle injected
/// under `__portfolio`.
pub struct GetPortfolioAction;

#[async_trait]
impl Action for GetPortfolioAction {
    fn name(&self) -> &str {
        "get_portfolio"
    }

    fn description(&self) -> &str {
        "Return the vault's current token and native balances."
    }

    fn readonly(&self) -> bool {
        true
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(ParamSchema::default)
    }

    async fn execute(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
        Ok(params.get("__portfolio").cloned().unwrap_or(Value::Null))
    }
}

/// Read-only: queries `ChainClient::read_allowance` for the vault (the
/// `__vaultAddress` the cycle injects) against `token`/`spender` as supplied
/// by the calling tool invocation.
pub struct GetAllowanceAction {
    pub chain: Arc<dyn ChainClient>,
}

#[async_trait]
impl Action for GetAllowanceAction {
    fn name(&self) -> &str {
        "get_allowance"
    }

    fn description(&self) -> &str {
        "Return the current allowance for a token/spender pair."
    }

    fn readonly(&self) -> bool {
        true
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(|| {
            let mut properties = HashMap::new();
            properties.insert("token".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("spender".to_string(), PropertySchema::new(ParamType::String));
            ParamSchema {
                properties,
                required: vec!["token".to_string(), "spender".to_string()],
            }
        })
    }

    async fn execute(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
        let token = required_string(params, "token")?;
        let spender = required_string(params, "spender")?;
        let owner = required_string(params, "__vaultAddress")?;
        let allowance = self.chain.read_allowance(&token, &owner, &spender).await?;
        Ok(Value::String(allowance))
    }
}

/// Read-only: queries `ChainClient::get_amounts_out` for a swap path through
/// `router`. Best-effort per the trait contract; returns an empty array
/// rather than erroring when the chain client can't price the path.
pub struct GetAmountsOutAction {
    pub chain: Arc<dyn ChainClient>,
}

#[async_trait]
impl Action for GetAmountsOutAction {
    fn name(&self) -> &str {
        "get_amounts_out"
    }

    fn description(&self) -> &str {
        "Return the expected output amounts for a swap path through a router."
    }

    fn readonly(&self) -> bool {
        true
    }

    fn schema(&self) -> &ParamSchema {
        static SCHEMA: std::sync::OnceLock<ParamSchema> = std::sync::OnceLock::new();
        SCHEMA.get_or_init(|| {
            let mut properties = HashMap::new();
            properties.insert("router".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("amountIn".to_string(), PropertySchema::new(ParamType::String));
            properties.insert("path".to_string(), PropertySchema::new(ParamType::Array));
            ParamSchema {
                properties,
                required: vec!["router".to_string(), "amountIn".to_string(), "path".to_string()],
            }
        })
    }

    async fn execute(&self, params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
        let router = required_string(params, "router")?;
        let amount_in = required_string(params, "amountIn")?;
        let path: Vec<String> = params
            .get("path")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let amounts = self.chain.get_amounts_out(&router, &amount_in, &path).await;
        Ok(Value::Array(amounts.into_iter().map(Value::String).collect()))
    }
}

/// Builds the default action set every agent is wired with.
pub fn default_registry(chain: Arc<dyn ChainClient>) -> crate::actions::ActionRegistry {
    let mut reg = crate::actions::ActionRegistry::new();
    reg.register(Arc::new(SwapAction));
    reg.register(Arc::new(WrapAction));
    reg.register(Arc::new(ApproveAction));
    reg.register(Arc::new(GetMarketDataAction));
    reg.register(Arc::new(GetPortfolioAction));
    reg.register(Arc::new(GetAllowanceAction { chain: chain.clone() }));
    reg.register(Arc::new(GetAmountsOutAction { chain }));
    reg
}
