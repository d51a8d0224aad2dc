//! Hook engine for Tollgate.
//!
//! Handler kinds: command / prompt (agent and unknown kinds are recognized but never run)
//! Hook events: PreToolUse / PostToolUse / Notification / UserPromptSubmit / Stop /
//! SubagentStop / PreCompact / SessionStart / SessionEnd

pub mod breaker;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod runner;
pub mod types;

pub use breaker::CircuitBreaker;
pub use command::CommandExecutor;
pub use dispatch::HookDispatcher;
pub use error::CommandParseError;
pub use parser::parse_command;
pub use prompt::PromptExecutor;
pub use registry::{HookRegistry, InvalidMatcher};
pub use runner::{HookRunner, HookVerdict};
pub use types::*;
