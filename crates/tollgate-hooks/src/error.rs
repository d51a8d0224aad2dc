//! Error types for hook configuration problems.

use thiserror::Error;

/// A configured command that cannot be turned into a safe argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("Hook command is empty")]
    Empty,

    #[error("Hook command contains unsupported operators ({operator}): {command}")]
    UnsupportedOperators { operator: String, command: String },

    #[error("Hook command has unbalanced quotes: {command}")]
    UnbalancedQuotes { command: String },
}
