//! Hook dispatcher — routes a handler to the executor for its kind.

use crate::command::CommandExecutor;
use crate::prompt::PromptExecutor;
use crate::types::{HandlerDescriptor, HookInput, HookOutcome};

/// Single entry point for running any handler. Holds no state of its own.
#[derive(Clone)]
pub struct HookDispatcher {
    command: CommandExecutor,
    prompt: Option<PromptExecutor>,
}

impl HookDispatcher {
    pub fn new(command: CommandExecutor, prompt: Option<PromptExecutor>) -> Self {
        Self { command, prompt }
    }

    /// Whether prompt handlers have an LLM provider to run against.
    pub fn has_prompt_executor(&self) -> bool {
        self.prompt.is_some()
    }

    pub async fn dispatch(&self, handler: &HandlerDescriptor, input: &HookInput) -> HookOutcome {
        match handler {
            HandlerDescriptor::Command(hook) => self.command.execute(hook, input).await,
            HandlerDescriptor::Prompt(hook) => match &self.prompt {
                Some(executor) => executor.execute(hook, input).await,
                None => HookOutcome::error("Prompt hooks require an LLM provider"),
            },
            HandlerDescriptor::Agent(_) => HookOutcome::error("Agent hooks are not yet implemented"),
            HandlerDescriptor::Unknown { kind } => {
                HookOutcome::error(format!("Unknown hook type: {kind}"))
            }
        }
    }
}
