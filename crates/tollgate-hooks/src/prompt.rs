//! Prompt hook executor — asks an LLM for a decision record.
//!
//! The configured prompt is sent together with the event and tool details.
//! The call races a timer; a late response after the timer fires is dropped.

use crate::breaker::{CircuitBreaker, disabled_message, note_if_tripped};
use crate::types::{HookDecision, HookInput, HookOutcome, PromptHook};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tollgate_types::{CompletionRequest, Message, Provider};

/// Timeout applied when a prompt hook does not configure one.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Token budget for a verdict. Replies are a single small JSON object.
pub const PROMPT_MAX_TOKENS: u32 = 512;

const SYSTEM_INSTRUCTION: &str = "You are a policy gate that reviews actions before they run. \
Evaluate the request against the policy you are given and respond with ONLY a JSON object, \
no prose, of the form {\"decision\": \"allow\" | \"deny\" | \"ask\", \"reason\": string, \
\"updatedInput\": object}. \"reason\" is required when denying. Include \"updatedInput\" only \
to replace tool parameters.";

/// Executes prompt-type handlers against an injected LLM provider.
#[derive(Clone)]
pub struct PromptExecutor {
    provider: Arc<dyn Provider>,
    breaker: Arc<CircuitBreaker>,
    default_model: String,
}

impl PromptExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        breaker: Arc<CircuitBreaker>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            breaker,
            default_model: default_model.into(),
        }
    }

    /// Run `hook` against `input`. Never fails: every path yields an outcome.
    pub async fn execute(&self, hook: &PromptHook, input: &HookInput) -> HookOutcome {
        let id = hook.identity();
        if self.breaker.is_disabled(&id) {
            tracing::debug!(handler = %id, "Skipping disabled prompt hook");
            return HookOutcome::error(disabled_message());
        }

        let request = self.build_request(hook, input);
        let timeout = hook
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROMPT_TIMEOUT);

        tracing::debug!(
            handler = %id,
            provider = self.provider.name(),
            model = %request.model,
            event = %input.event,
            "Running prompt hook"
        );

        let response = match tokio::time::timeout(timeout, self.provider.complete(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return self.fail(&id, format!("{}: {e}", self.provider.name())),
            Err(_) => {
                return self.fail(
                    &id,
                    format!("Prompt hook timed out after {}s", timeout.as_secs()),
                );
            }
        };

        match parse_decision(&response.text) {
            Ok(decision) => {
                self.breaker.record_success(&id);
                HookOutcome::Success(decision)
            }
            Err(e) => {
                tracing::debug!(handler = %id, response = %response.text, "Unparseable LLM verdict");
                self.fail(&id, format!("Prompt hook returned invalid LLM output: {e}"))
            }
        }
    }

    fn fail(&self, id: &str, message: String) -> HookOutcome {
        let tripped = self.breaker.record_failure(id);
        HookOutcome::error(note_if_tripped(message, tripped))
    }

    fn build_request(&self, hook: &PromptHook, input: &HookInput) -> CompletionRequest {
        let tool_input = input
            .tool_input
            .as_ref()
            .map(|params| {
                serde_json::to_string_pretty(params).unwrap_or_else(|_| "{}".to_string())
            })
            .unwrap_or_else(|| "{}".to_string());

        let user = format!(
            "{}\n\nEvent: {}\nTool: {}\nTool input:\n{}",
            hook.prompt,
            input.event,
            input.tool_name.as_deref().unwrap_or("(none)"),
            tool_input
        );

        CompletionRequest {
            model: hook
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: vec![Message::system(SYSTEM_INSTRUCTION), Message::user(user)],
            max_tokens: PROMPT_MAX_TOKENS,
            temperature: Some(0.0),
        }
    }
}

/// Parse an LLM reply into a decision record.
///
/// Unlike command output, the reply must name a `decision` explicitly.
pub fn parse_decision(text: &str) -> Result<HookDecision, String> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    if value.get("decision").is_none() {
        return Err("missing \"decision\" field".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Remove a single surrounding markdown code fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    match rest.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => rest.trim(),
    }
}
