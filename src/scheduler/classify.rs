/// The outcome of classifying a raw failure or blocked reason into the
/// fields a `RunRecord` persists. Substring rules are deliberately
/// conservative and live behind these two functions so the mapping can be
/// tightened without touching the scheduler (§9 open question).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub failure_category: String,
    pub error_code: Option<String>,
}

impl Classification {
    fn infra() -> Self {
        Self {
            failure_category: "infra".to_string(),
            error_code: None,
        }
    }

    fn business_rejected(code: impl Into<String>) -> Self {
        Self {
            failure_category: "business_rejected".to_string(),
            error_code: Some(code.into()),
        }
    }
}

/// `"invalid token id"` / `"erc721: invalid token id"`, case-insensitive.
pub fn is_invalid_token_error(raw_message: &str) -> bool {
    let lower = raw_message.to_lowercase();
    lower.contains("invalid token id") || lower.contains("erc721: invalid token id")
}

pub fn is_cooldown_reason(block_reason: &str, error_code: Option<&str>) -> bool {
    error_code == Some("BUSINESS_POLICY_COOLDOWN") || block_reason.to_lowercase().contains("cooldown")
}

/// Classifies an uncaught exception's raw message (scheduler step m).
pub fn classify_error(raw_message: &str) -> Classification {
    let lower = raw_message.to_lowercase();

    if is_invalid_token_error(raw_message) {
        return Classification::business_rejected("INVALID_TOKEN_ID");
    }
    if lower.contains("cooldown") {
        return Classification::business_rejected("BUSINESS_POLICY_COOLDOWN");
    }
    if lower.contains("reverted")
        || lower.contains("insufficient")
        || lower.contains("slippage")
        || lower.contains("not allowed")
        || lower.contains("rejected")
    {
        return Classification::business_rejected("BUSINESS_REJECTED");
    }

    Classification::infra()
}

/// Classifies a guardrails/brain blocked outcome (scheduler step i).
pub fn classify_blocked_reason(block_reason: &str, violation_code: Option<&str>) -> Classification {
    if is_cooldown_reason(block_reason, violation_code) {
        return Classification::business_rejected("BUSINESS_POLICY_COOLDOWN");
    }
    Classification::business_rejected(violation_code.unwrap_or("BUSINESS_POLICY_VIOLATION").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_invalid_token_variants() {
        assert!(is_invalid_token_error("execution reverted: ERC721: invalid token ID"));
        assert!(is_invalid_token_error("Invalid token id supplied"));
        assert!(!is_invalid_token_error("insufficient allowance"));
    }

    #[test]
    fn detects_cooldown_by_code_or_text() {
        assert!(is_cooldown_reason("nope", Some("BUSINESS_POLICY_COOLDOWN")));
        assert!(is_cooldown_reason("action blocked: on-chain cooldown is active", None));
        assert!(!is_cooldown_reason("below min balance", Some("HARD_BALANCE")));
    }

    #[test]
    fn classifies_invalid_token_as_business_rejected() {
        let c = classify_error("execution reverted: ERC721: invalid token ID");
        assert_eq!(c.failure_category, "business_rejected");
        assert_eq!(c.error_code.as_deref(), Some("INVALID_TOKEN_ID"));
    }

    #[test]
    fn classifies_unknown_error_as_infra() {
        let c = classify_error("connection reset by peer");
        assert_eq!(c.failure_category, "infra");
        assert!(c.error_code.is_none());
    }
}
