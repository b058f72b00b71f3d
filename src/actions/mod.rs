pub mod builtin;
pub mod payload;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::ActionPayload;

/// Sentinel marking runtime-injected context keys (`__readAllowance`,
/// `__getAmountsOut`, `__vaultTokens`, `__nativeBalance`, ...). The validator
/// skips keys with this prefix; everything else must be declared in the
/// schema's `properties`.
pub const RESERVED_PREFIX: &str = "__";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl ParamType {
    fn matches(&self, v: &Value) -> bool {
        match self {
            ParamType::String => v.is_string(),
            ParamType::Number => v.is_number(),
            ParamType::Integer => v.as_i64().is_some() || v.as_u64().is_some(),
            ParamType::Boolean => v.is_boolean(),
            ParamType::Object => v.is_object(),
            ParamType::Array => v.is_array(),
            ParamType::Null => v.is_null(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PropertySchema {
    pub ty: ParamType,
    pub description: Option<String>,
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    pub fn new(ty: ParamType) -> Self {
        Self {
            ty,
            description: None,
            enum_values: None,
        }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// A JSON-schema-style `{type: "object", properties, required}` object.
#[derive(Clone, Debug, Default)]
pub struct ParamSchema {
    pub properties: HashMap<String, PropertySchema>,
    pub required: Vec<String>,
}

/// Validates `params` against `schema` per the strict rules in §4.3:
/// unknown non-reserved keys, missing required keys, primitive/enum
/// mismatches are all accumulated rather than short-circuited.
pub fn validate_params(schema: &ParamSchema, params: &serde_json::Map<String, Value>) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for key in params.keys() {
        if key.starts_with(RESERVED_PREFIX) {
            continue;
        }
        if !schema.properties.contains_key(key) {
            errors.push(format!("unknown parameter: {key}"));
        }
    }

    for req in &schema.required {
        match params.get(req) {
            Some(Value::Null) | None => errors.push(format!("missing required parameter: {req}")),
            Some(_) => {}
        }
    }

    for (key, value) in params {
        if key.starts_with(RESERVED_PREFIX) {
            continue;
        }
        let Some(prop) = schema.properties.get(key) else {
            continue;
        };
        if !prop.ty.matches(value) {
            errors.push(format!("parameter {key} does not match type {:?}", prop.ty));
            continue;
        }
        if let Some(allowed) = &prop.enum_values {
            if !allowed.contains(value) {
                errors.push(format!("parameter {key} is not one of the allowed enum values"));
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// A named, schema-described capability. `encode` may return a single payload
/// or an ordered batch; read-only actions implement `execute` instead and are
/// never encoded/submitted.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn readonly(&self) -> bool;
    fn schema(&self) -> &ParamSchema;

    async fn encode(&self, _params: &serde_json::Map<String, Value>) -> anyhow::Result<Vec<ActionPayload>> {
        anyhow::bail!("action {} is read-only and has no encoder", self.name())
    }

    async fn execute(&self, _params: &serde_json::Map<String, Value>) -> anyhow::Result<Value> {
        anyhow::bail!("action {} has no tool implementation", self.name())
    }
}

/// Holds every action known to an agent; the brain is offered tools derived
/// from the read-only subset, and the cycle resolves write actions by name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn readonly_actions(&self) -> Vec<Arc<dyn Action>> {
        self.actions.values().filter(|a| a.readonly()).cloned().collect()
    }

    /// Names offered to the brain as candidate `action` values; read-only
    /// actions are tools, not decisions.
    pub fn non_readonly_names(&self) -> Vec<String> {
        self.actions
            .values()
            .filter(|a| !a.readonly())
            .map(|a| a.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn swap_schema() -> ParamSchema {
        let mut properties = HashMap::new();
        properties.insert("router".to_string(), PropertySchema::new(ParamType::String));
        properties.insert("amountIn".to_string(), PropertySchema::new(ParamType::String));
        properties.insert(
            "side".to_string(),
            PropertySchema::new(ParamType::String).with_enum(vec![json!("buy"), json!("sell")]),
        );
        ParamSchema {
            properties,
            required: vec!["router".to_string(), "amountIn".to_string()],
        }
    }

    #[test]
    fn accepts_well_formed_params_and_reserved_keys() {
        let schema = swap_schema();
        let mut params = serde_json::Map::new();
        params.insert("router".to_string(), json!("0xabc"));
        params.insert("amountIn".to_string(), json!("1000"));
        params.insert("__readAllowance".to_string(), json!("500"));
        assert!(validate_params(&schema, &params).is_ok());
    }

    #[test]
    fn rejects_unknown_non_reserved_key() {
        let schema = swap_schema();
        let mut params = serde_json::Map::new();
        params.insert("router".to_string(), json!("0xabc"));
        params.insert("amountIn".to_string(), json!("1000"));
        params.insert("bogus".to_string(), json!(1));
        let errs = validate_params(&schema, &params).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("bogus")));
    }

    #[test]
    fn rejects_missing_required() {
        let schema = swap_schema();
        let mut params = serde_json::Map::new();
        params.insert("router".to_string(), json!("0xabc"));
        let errs = validate_params(&schema, &params).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("amountIn")));
    }

    #[test]
    fn rejects_wrong_primitive_and_enum_mismatch() {
        let schema = swap_schema();
        let mut params = serde_json::Map::new();
        params.insert("router".to_string(), json!(123));
        params.insert("amountIn".to_string(), json!("1000"));
        params.insert("side".to_string(), json!("hold"));
        let errs = validate_params(&schema, &params).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("router")));
        assert!(errs.iter().any(|e| e.contains("side")));
    }
}
