use async_trait::async_trait;

use crate::chain::ActionPayload;

/// Enriched context the cycle orchestrator builds after encoding, before
/// calling `check`.
#[derive(Clone, Debug)]
pub struct GuardrailContext {
    pub token_id: i64,
    pub agent_type: String,
    pub vault: String,
    pub timestamp: i64,
    pub action_name: String,
    pub spend_amount: u128,
    pub action_tokens: Vec<String>,
    pub amount_in: Option<String>,
    pub min_out: Option<String>,
    pub allowed_targets: Vec<String>,
    pub allowed_selectors: Vec<String>,
    pub max_value_per_run: Option<u128>,
    pub require_positive_balance: bool,
    pub vault_has_positive_balance: bool,
    pub cooldown_active: bool,
}

/// A single rejection. `code` becomes `violationCode` on the run record;
/// codes starting with `SOFT_`/`HARD_` are elevated (surfaced to the user
/// message verbatim rather than summarised).
#[derive(Clone, Debug)]
pub struct Violation {
    pub message: String,
    pub code: Option<String>,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_elevated(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|c| c.starts_with("SOFT_") || c.starts_with("HARD_"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct GuardrailResult {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

impl GuardrailResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            violations: Vec::new(),
        }
    }

    pub fn reject(violations: Vec<Violation>) -> Self {
        Self {
            ok: violations.is_empty(),
            violations,
        }
    }
}

#[async_trait]
pub trait GuardrailsDispatcher: Send + Sync {
    async fn check(&self, payload: &ActionPayload, context: &GuardrailContext) -> GuardrailResult;
}

fn selector_of(data: &str) -> Option<String> {
    let hex_body = data.strip_prefix("0x").unwrap_or(data);
    if hex_body.len() < 8 {
        return None;
    }
    Some(format!("0x{}", &hex_body[..8]).to_lowercase())
}

/// Default, fully in-memory policy: target/selector allow-lists, minimum
/// balance, per-run value cap, and on-chain cooldown gating. A production
/// deployment may layer additional on-chain policy checks behind the same
/// trait; this implementation never makes a network call.
#[derive(Default)]
pub struct DefaultGuardrails;

#[async_trait]
impl GuardrailsDispatcher for DefaultGuardrails {
    async fn check(&self, payload: &ActionPayload, context: &GuardrailContext) -> GuardrailResult {
        let mut violations = Vec::new();

        if !context.allowed_targets.is_empty() {
            let target = payload.target.to_lowercase();
            let allowed = context
                .allowed_targets
                .iter()
                .any(|t| t.to_lowercase() == target);
            if !allowed {
                violations.push(
                    Violation::new(format!("target {} is not in the allowed-targets list", payload.target))
                        .with_code("HARD_TARGET_NOT_ALLOWED"),
                );
            }
        }

        if !context.allowed_selectors.is_empty() {
            match selector_of(&payload.data) {
                Some(selector) => {
                    let allowed = context
                        .allowed_selectors
                        .iter()
                        .any(|s| s.to_lowercase() == selector);
                    if !allowed {
                        violations.push(
                            Violation::new(format!("selector {selector} is not in the allowed-selectors list"))
                                .with_code("HARD_SELECTOR_NOT_ALLOWED"),
                        );
                    }
                }
                None => violations.push(
                    Violation::new("payload data too short to contain a selector")
                        .with_code("HARD_SELECTOR_NOT_ALLOWED"),
                ),
            }
        }

        if context.require_positive_balance && !context.vault_has_positive_balance {
            violations.push(Violation::new("below min balance").with_code("HARD_BALANCE"));
        }

        if let Some(cap) = context.max_value_per_run {
            if context.spend_amount > cap {
                violations.push(
                    Violation::new(format!(
                        "spend amount {} exceeds the per-run cap {cap}",
                        context.spend_amount
                    ))
                    .with_code("HARD_BUDGET_EXCEEDED"),
                );
            }
        }

        if context.cooldown_active {
            violations.push(
                Violation::new("action blocked: on-chain cooldown is active")
                    .with_code("BUSINESS_POLICY_COOLDOWN"),
            );
        }

        GuardrailResult::reject(violations)
    }
}
