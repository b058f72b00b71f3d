use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::ActionRegistry;
use crate::brain::provider::{ChatMessage, ChatRequest, LlmProvider, ToolSpec};
use crate::brain::{Brain, Decision};
use crate::chain::Observation;
use crate::store::model::{MemoryEntry, MemoryType};

/// Confidence assigned to a clear, non-JSON conversational reply (scenario:
/// "Hello" with no action intent).
const CONVERSATIONAL_FALLBACK_CONFIDENCE: f64 = 0.8;

const DEFAULT_MAX_STEPS: u32 = 5;
const RECENT_MEMORY_WINDOW: usize = 10;

/// Per-token brain configuration, captured once at construction (§4.5).
pub struct LlmBrain {
    provider: Arc<dyn LlmProvider>,
    fallback_provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    fallback_model: Option<String>,
    goal: String,
    chain_id: String,
    router: String,
    wrapped_native: String,
    stablecoins: Vec<String>,
    max_steps: u32,
    min_confidence: f64,
}

pub struct LlmBrainConfig {
    pub provider: Arc<dyn LlmProvider>,
    pub fallback_provider: Option<Arc<dyn LlmProvider>>,
    pub model: String,
    pub fallback_model: Option<String>,
    pub goal: String,
    pub chain_id: String,
    pub router: String,
    pub wrapped_native: String,
    pub stablecoins: Vec<String>,
    pub min_confidence: f64,
}

impl LlmBrain {
    pub fn new(cfg: LlmBrainConfig) -> Self {
        Self {
            provider: cfg.provider,
            fallback_provider: cfg.fallback_provider,
            model: cfg.model,
            fallback_model: cfg.fallback_model,
            goal: cfg.goal,
            chain_id: cfg.chain_id,
            router: cfg.router,
            wrapped_native: cfg.wrapped_native,
            stablecoins: cfg.stablecoins,
            max_steps: DEFAULT_MAX_STEPS,
            min_confidence: cfg.min_confidence,
        }
    }

    fn system_prompt(&self, actions: &ActionRegistry) -> String {
        let action_names = actions.non_readonly_names().join(", ");
        format!(
            "Goal: {goal}\n\
             Environment: chain_id={chain_id}, router={router}, wrapped_native={wrapped_native}, stablecoins=[{stables}]\n\
             Rules: respond with a single JSON object describing exactly one Decision. \
             Never invent token addresses outside the environment block without evidence from a tool call. \
             Prefer \"wait\" when the goal is not yet actionable.\n\
             Available actions: {action_names}",
            goal = self.goal,
            chain_id = self.chain_id,
            router = self.router,
            wrapped_native = self.wrapped_native,
            stables = self.stablecoins.join(", "),
        )
    }

    fn user_prompt(observation: &Observation, memories: &[MemoryEntry]) -> String {
        let recent: Vec<&MemoryEntry> = memories
            .iter()
            .filter(|m| m.entry_type != MemoryType::Goal)
            .take(RECENT_MEMORY_WINDOW)
            .collect();

        let memory_lines: Vec<String> = recent
            .iter()
            .map(|m| {
                format!(
                    "- [{}] action={:?} reasoning={:?}",
                    m.entry_type.as_str(),
                    m.action,
                    m.reasoning
                )
            })
            .collect();

        format!(
            "Observation: vault_tokens={:?}, native_balance={:?}, prices={:?}, gas_price={:?}, \
             block={}, paused={}\n\
             Recent memory:\n{}",
            observation.vault_tokens,
            observation.native_balance,
            observation.prices,
            observation.gas_price,
            observation.block_number,
            observation.paused,
            memory_lines.join("\n"),
        )
    }

    fn tool_specs(actions: &ActionRegistry) -> Vec<ToolSpec> {
        actions
            .readonly_actions()
            .into_iter()
            .map(|a| ToolSpec {
                name: a.name().to_string(),
                description: a.description().to_string(),
                parameters: schema_to_json(a.schema()),
            })
            .collect()
    }

    /// Bounded tool-calling loop: each round may call the model once and
    /// run any requested tools, feeding their results back as `tool`
    /// messages. Returns the final assistant text.
    async fn run_tool_loop(
        &self,
        provider: &Arc<dyn LlmProvider>,
        model: &str,
        actions: &ActionRegistry,
        tool_context: &serde_json::Map<String, Value>,
        mut messages: Vec<ChatMessage>,
    ) -> anyhow::Result<String> {
        let tools = Self::tool_specs(actions);

        for step in 0..self.max_steps {
            let response = provider
                .chat(ChatRequest {
                    model: model.to_string(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                })
                .await?;

            if response.tool_calls.is_empty() {
                return Ok(response.content.unwrap_or_default());
            }

            debug!(step, calls = response.tool_calls.len(), "brain tool-calling round");

            for call in response.tool_calls {
                let Some(action) = actions.get(&call.name) else {
                    messages.push(ChatMessage::tool(call.id, "error: unknown tool"));
                    continue;
                };

                let mut params = call
                    .arguments
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                for (k, v) in tool_context {
                    params.insert(k.clone(), v.clone());
                }

                let result = match action.execute(&params).await {
                    Ok(v) => v.to_string(),
                    Err(e) => format!("error: {e}"),
                };
                messages.push(ChatMessage::tool(call.id, result));
            }
        }

        anyhow::bail!("tool-calling loop exceeded {} steps without a final answer", self.max_steps)
    }
}

#[async_trait]
impl Brain for LlmBrain {
    async fn think(
        &self,
        observation: &Observation,
        memories: &[MemoryEntry],
        actions: &ActionRegistry,
        tool_context: &serde_json::Map<String, Value>,
    ) -> Decision {
        let messages = vec![
            ChatMessage::system(self.system_prompt(actions)),
            ChatMessage::user(Self::user_prompt(observation, memories)),
        ];

        let primary = self
            .run_tool_loop(&self.provider, &self.model, actions, tool_context, messages.clone())
            .await;

        let raw_text = match primary {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "llm brain primary call failed");
                let sanitized = sanitize_message(&e.to_string());
                let mut decision = Decision::wait();
                decision.message = Some(sanitized);
                decision.confidence = 0.0;
                return apply_cadence_filter(&self.goal, decision, &actions.non_readonly_names());
            }
        };

        let mut decision = apply_min_confidence(
            self.min_confidence,
            parse_decision_text(&raw_text).normalize(&actions.non_readonly_names()),
        );

        if decision.confidence == 0.0 {
            if let (Some(fallback_provider), Some(fallback_model)) =
                (&self.fallback_provider, &self.fallback_model)
            {
                if let Ok(text) = self
                    .run_tool_loop(fallback_provider, fallback_model, actions, tool_context, messages)
                    .await
                {
                    decision = apply_min_confidence(
                        self.min_confidence,
                        parse_decision_text(&text).normalize(&actions.non_readonly_names()),
                    );
                }
            }
        }

        apply_cadence_filter(&self.goal, decision, &actions.non_readonly_names())
    }
}

fn schema_to_json(schema: &crate::actions::ParamSchema) -> Value {
    let mut properties = serde_json::Map::new();
    for (name, prop) in &schema.properties {
        let mut entry = serde_json::Map::new();
        entry.insert("type".to_string(), Value::String(format!("{:?}", prop.ty).to_lowercase()));
        if let Some(desc) = &prop.description {
            entry.insert("description".to_string(), Value::String(desc.clone()));
        }
        if let Some(values) = &prop.enum_values {
            entry.insert("enum".to_string(), Value::Array(values.clone()));
        }
        properties.insert(name.clone(), Value::Object(entry));
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": schema.required,
    })
}

/// Truncates and strips anything that looks like a stack trace or path, so
/// raw infra errors never leak into a user-facing `message`.
fn sanitize_message(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or(raw);
    first_line.chars().take(240).collect()
}

fn decision_from_value(v: &Value) -> Decision {
    let action = v
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("wait")
        .to_string();
    let params = v
        .get("params")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let reasoning = v
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = v.get("message").and_then(Value::as_str).map(str::to_string);
    let confidence = v
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let done = v.get("done").and_then(Value::as_bool);
    let next_check_ms = v.get("nextCheckMs").and_then(Value::as_u64);
    let blocked = v.get("blocked").and_then(Value::as_bool);
    let block_reason = v
        .get("blockReason")
        .and_then(Value::as_str)
        .map(str::to_string);

    Decision {
        action,
        params,
        reasoning,
        message,
        confidence,
        done,
        next_check_ms,
        blocked,
        block_reason,
    }
}

/// Strips a fenced code block (``` or ```json) from `text`, returning
/// `(json_body, text_outside_the_fence)`.
fn extract_fenced_json(text: &str) -> Option<(String, String)> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let after = after.trim_start_matches(['\r', '\n']);
    let end_rel = after.find("```")?;

    let json_str = after[..end_rel].trim().to_string();
    let before = text[..start].trim();
    let tail = after[end_rel + 3..].trim();
    let outside = if before.is_empty() {
        tail.to_string()
    } else if tail.is_empty() {
        before.to_string()
    } else {
        format!("{before}\n{tail}")
    };

    Some((json_str, outside))
}

/// Parses the model's final text into a Decision, falling through
/// fenced-block -> direct -> substring -> conversational (§4.5, §9).
pub fn parse_decision_text(raw: &str) -> Decision {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Decision::wait();
    }

    if let Some((json_str, outside)) = extract_fenced_json(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(&json_str) {
            let mut decision = decision_from_value(&v);
            if outside.chars().count() > 20 {
                decision.message = Some(outside);
            }
            return decision;
        }
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return decision_from_value(&v);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return decision_from_value(&v);
            }
        }
    }

    Decision {
        action: "wait".to_string(),
        params: serde_json::Map::new(),
        reasoning: String::new(),
        message: Some(trimmed.to_string()),
        confidence: CONVERSATIONAL_FALLBACK_CONFIDENCE,
        done: Some(true),
        next_check_ms: None,
        blocked: None,
        block_reason: None,
    }
}

/// Downgrades a non-"wait" decision below the configured minimum confidence
/// to a zero-confidence wait, making it eligible for the fallback-model
/// retry the same way a parse failure is (§4.5/§6: min LLM action
/// confidence is load-bearing, not advisory).
fn apply_min_confidence(min_confidence: f64, mut decision: Decision) -> Decision {
    if decision.action != "wait" && decision.confidence < min_confidence {
        decision.action = "wait".to_string();
        decision.confidence = 0.0;
    }
    decision
}

/// Recognises recurring or time-windowed intents in the goal text and
/// overrides the decision with an "active"/"done" cadence plus a suggested
/// `nextCheckMs`. Conservative: only fires on a small set of literal cues.
fn apply_cadence_filter(goal: &str, mut decision: Decision, known_actions: &[String]) -> Decision {
    let lower = goal.to_lowercase();

    let recurring = lower.contains("every day")
        || lower.contains("daily")
        || lower.contains("every hour")
        || lower.contains("recurring");

    if recurring && decision.action == "wait" && decision.done.unwrap_or(false) {
        decision.done = Some(false);
        decision.next_check_ms = Some(decision.next_check_ms.unwrap_or(3_600_000));
    }

    decision.normalize(known_actions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_and_keeps_surrounding_text_as_message() {
        let raw = "Here is my plan, it is fairly detailed and long enough to count.\n```json\n{\"action\":\"wait\",\"confidence\":0.5}\n```\nThanks!";
        let d = parse_decision_text(raw);
        assert_eq!(d.action, "wait");
        assert!(d.message.is_some());
    }

    #[test]
    fn parses_direct_json() {
        let d = parse_decision_text(r#"{"action":"swap","confidence":1.5}"#);
        assert_eq!(d.action, "swap");
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn parses_substring_json() {
        let d = parse_decision_text("well, {\"action\":\"wait\",\"confidence\":0.2} was my answer");
        assert_eq!(d.action, "wait");
        assert_eq!(d.confidence, 0.2);
    }

    #[test]
    fn falls_back_to_conversational_message() {
        let d = parse_decision_text("Hello 👋");
        assert_eq!(d.action, "wait");
        assert_eq!(d.message.as_deref(), Some("Hello 👋"));
        assert_eq!(d.confidence, CONVERSATIONAL_FALLBACK_CONFIDENCE);
        assert_eq!(d.done, Some(true));
    }

    #[test]
    fn unknown_action_normalizes_to_wait() {
        let d = parse_decision_text(r#"{"action":"teleport"}"#).normalize(&["swap".to_string()]);
        assert_eq!(d.action, "wait");
    }

    #[test]
    fn sub_threshold_action_is_downgraded_to_zero_confidence_wait() {
        let d = parse_decision_text(r#"{"action":"swap","confidence":0.2}"#);
        let downgraded = apply_min_confidence(0.5, d);
        assert_eq!(downgraded.action, "wait");
        assert_eq!(downgraded.confidence, 0.0);
    }

    #[test]
    fn above_threshold_action_is_left_untouched() {
        let d = parse_decision_text(r#"{"action":"swap","confidence":0.9}"#);
        let unchanged = apply_min_confidence(0.5, d);
        assert_eq!(unchanged.action, "swap");
        assert_eq!(unchanged.confidence, 0.9);
    }
}
