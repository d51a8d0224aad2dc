//! Hook runner — evaluates the handlers for one event and aggregates a verdict.
//!
//! Handlers run one at a time in registry order:
//! - a Blocked outcome or a `deny` decision ends evaluation (first deny wins)
//! - an Error outcome is logged and the handler is treated as absent
//! - `updatedInput` maps merge key by key, later handlers overwriting earlier ones

use crate::command::DEFAULT_DENY_REASON;
use crate::dispatch::HookDispatcher;
use crate::registry::HookRegistry;
use crate::types::{Decision, HandlerDescriptor, HookDecision, HookInput, HookOutcome, HooksConfig};
use serde_json::{Map, Value};

/// Final result of evaluating one event.
#[derive(Debug, Clone, PartialEq)]
pub enum HookVerdict {
    /// The action may proceed, with any parameter updates the handlers produced.
    Allow {
        updated_input: Option<Map<String, Value>>,
        /// At least one handler answered `ask`.
        asked: bool,
    },
    /// A handler denied the action.
    Deny { reason: String },
}

impl HookVerdict {
    pub fn allow() -> Self {
        HookVerdict::Allow {
            updated_input: None,
            asked: false,
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, HookVerdict::Deny { .. })
    }

    /// Wire form of the verdict (same shape handlers return).
    pub fn to_decision(&self) -> HookDecision {
        match self {
            HookVerdict::Allow { updated_input, .. } => HookDecision {
                updated_input: updated_input.clone(),
                ..HookDecision::allow()
            },
            HookVerdict::Deny { reason } => HookDecision::deny(reason.clone()),
        }
    }
}

/// Evaluates configured hooks for incoming events.
///
/// A runner without config behaves as if hooks were turned off: every
/// event is allowed without consulting the registry.
#[derive(Clone)]
pub struct HookRunner {
    config: Option<HooksConfig>,
    dispatcher: HookDispatcher,
}

impl HookRunner {
    pub fn new(config: Option<HooksConfig>, dispatcher: HookDispatcher) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> Option<&HooksConfig> {
        self.config.as_ref()
    }

    /// Whether this runner can execute `handler`. Unsupported handlers are skipped.
    pub fn supports(&self, handler: &HandlerDescriptor) -> bool {
        match handler {
            HandlerDescriptor::Command(_) => true,
            HandlerDescriptor::Prompt(_) => self.dispatcher.has_prompt_executor(),
            HandlerDescriptor::Agent(_) | HandlerDescriptor::Unknown { .. } => false,
        }
    }

    /// Evaluate a tool call about to run.
    pub async fn pre_tool_use(
        &self,
        tool_name: impl Into<String>,
        tool_input: Map<String, Value>,
    ) -> HookVerdict {
        self.evaluate(&HookInput::pre_tool_use(tool_name, tool_input))
            .await
    }

    /// Evaluate every matching handler for `input.event`, strictly in order.
    pub async fn evaluate(&self, input: &HookInput) -> HookVerdict {
        let Some(config) = self.config.as_ref() else {
            return HookVerdict::allow();
        };

        let subject = input.tool_name.as_deref().unwrap_or("");
        let handlers = HookRegistry::match_hooks(Some(config), input.event, subject);
        if handlers.is_empty() {
            return HookVerdict::allow();
        }

        let mut updated_input: Option<Map<String, Value>> = None;
        let mut asked = false;

        for handler in handlers {
            let id = handler.identity();
            if !self.supports(handler) {
                tracing::debug!(
                    handler = %id,
                    kind = handler.kind(),
                    event = %input.event,
                    "Skipping unsupported hook"
                );
                continue;
            }

            match self.dispatcher.dispatch(handler, input).await {
                HookOutcome::Blocked { reason } => {
                    tracing::debug!(handler = %id, %reason, "Hook blocked the action");
                    return HookVerdict::Deny { reason };
                }
                HookOutcome::Error { message } => {
                    tracing::warn!("Hook '{id}' error: {message}");
                    continue;
                }
                HookOutcome::Success(decision) => {
                    match decision.decision {
                        Decision::Deny => {
                            let reason = decision
                                .reason
                                .unwrap_or_else(|| DEFAULT_DENY_REASON.to_string());
                            tracing::debug!(handler = %id, %reason, "Hook denied the action");
                            return HookVerdict::Deny { reason };
                        }
                        Decision::Ask => asked = true,
                        Decision::Allow => {}
                    }
                    if let Some(update) = decision.updated_input {
                        updated_input.get_or_insert_with(Map::new).extend(update);
                    }
                }
            }
        }

        HookVerdict::Allow {
            updated_input,
            asked,
        }
    }
}
