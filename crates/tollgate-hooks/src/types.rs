//! Core types for the hook engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tollgate_types::util::prefix_chars;

/// Number of leading prompt characters that make up a prompt hook's identity.
pub const PROMPT_IDENTITY_CHARS: usize = 50;

/// Events that can trigger hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    Notification,
    UserPromptSubmit,
    Stop,
    SubagentStop,
    PreCompact,
    SessionStart,
    SessionEnd,
}

impl HookEvent {
    pub const ALL: [HookEvent; 9] = [
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::Notification,
        HookEvent::UserPromptSubmit,
        HookEvent::Stop,
        HookEvent::SubagentStop,
        HookEvent::PreCompact,
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::Notification => "Notification",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown hook event '{s}'"))
    }
}

/// A configured command: either one string to lex, or an argument vector used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    /// The command as a single space-joined string.
    pub fn joined(&self) -> String {
        match self {
            CommandSpec::Line(line) => line.clone(),
            CommandSpec::Argv(argv) => argv.join(" "),
        }
    }
}

/// Handler that runs an external process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHook {
    pub command: CommandSpec,
    /// Seconds before the process is terminated (default: 600).
    #[serde(default, alias = "timeoutSeconds", alias = "timeout")]
    pub timeout_seconds: Option<u64>,
}

impl CommandHook {
    /// Breaker identity: the command joined by spaces.
    pub fn identity(&self) -> String {
        format!("command:{}", self.command.joined())
    }
}

/// Handler that asks an LLM for a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptHook {
    pub prompt: String,
    /// Model override; the runner's default model is used when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Seconds before the LLM call is abandoned (default: 30).
    #[serde(default, alias = "timeoutSeconds", alias = "timeout")]
    pub timeout_seconds: Option<u64>,
}

impl PromptHook {
    /// Breaker identity: a fixed-length prefix of the prompt text.
    pub fn identity(&self) -> String {
        format!("prompt:{}", prefix_chars(&self.prompt, PROMPT_IDENTITY_CHARS))
    }
}

/// Reserved handler kind. Parsed from config but never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHook {
    pub agent: String,
    #[serde(default, alias = "timeoutSeconds", alias = "timeout")]
    pub timeout_seconds: Option<u64>,
}

/// A single configured handler, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum HandlerDescriptor {
    Command(CommandHook),
    Prompt(PromptHook),
    Agent(AgentHook),
    /// A `type` tag this build does not know. Kept so routing can report it.
    Unknown { kind: String },
}

impl HandlerDescriptor {
    pub fn command(line: impl Into<String>) -> Self {
        HandlerDescriptor::Command(CommandHook {
            command: CommandSpec::Line(line.into()),
            timeout_seconds: None,
        })
    }

    pub fn prompt(prompt: impl Into<String>) -> Self {
        HandlerDescriptor::Prompt(PromptHook {
            prompt: prompt.into(),
            model: None,
            timeout_seconds: None,
        })
    }

    /// The `type` tag of this handler.
    pub fn kind(&self) -> &str {
        match self {
            HandlerDescriptor::Command(_) => "command",
            HandlerDescriptor::Prompt(_) => "prompt",
            HandlerDescriptor::Agent(_) => "agent",
            HandlerDescriptor::Unknown { kind } => kind,
        }
    }

    /// Content-derived identity used to key circuit breaker state.
    ///
    /// Two descriptors with the same defining fields share an identity, so
    /// breaker state survives config reloads that rebuild the descriptors.
    pub fn identity(&self) -> String {
        match self {
            HandlerDescriptor::Command(hook) => hook.identity(),
            HandlerDescriptor::Prompt(hook) => hook.identity(),
            HandlerDescriptor::Agent(hook) => format!("agent:{}", hook.agent),
            HandlerDescriptor::Unknown { kind } => format!("unknown:{kind}"),
        }
    }
}

impl TryFrom<Value> for HandlerDescriptor {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "hook handler is missing a string \"type\" field".to_string())?
            .to_string();

        let invalid = |e: serde_json::Error| format!("invalid {kind} hook: {e}");
        match kind.as_str() {
            "command" => serde_json::from_value(value)
                .map(HandlerDescriptor::Command)
                .map_err(invalid),
            "prompt" => serde_json::from_value(value)
                .map(HandlerDescriptor::Prompt)
                .map_err(invalid),
            "agent" => serde_json::from_value(value)
                .map(HandlerDescriptor::Agent)
                .map_err(invalid),
            _ => Ok(HandlerDescriptor::Unknown { kind }),
        }
    }
}

fn default_matcher() -> String {
    "*".to_string()
}

/// A glob pattern plus the ordered handlers it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HookRule {
    /// Tool name or glob pattern (e.g., "Bash", "mcp__*", "*").
    #[serde(default = "default_matcher")]
    pub matcher: String,
    #[serde(default, alias = "hooks")]
    pub handlers: Vec<HandlerDescriptor>,
}

impl HookRule {
    pub fn new(matcher: impl Into<String>, handlers: Vec<HandlerDescriptor>) -> Self {
        Self {
            matcher: matcher.into(),
            handlers,
        }
    }
}

/// Hook rules grouped by event. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct HooksConfig {
    events: BTreeMap<HookEvent, Vec<HookRule>>,
}

impl HooksConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper that appends a rule for `event`.
    pub fn with_rule(mut self, event: HookEvent, rule: HookRule) -> Self {
        self.events.entry(event).or_default().push(rule);
        self
    }

    /// Rules configured for `event`, in configuration order.
    pub fn rules(&self, event: HookEvent) -> &[HookRule] {
        self.events.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `other`'s rules after this config's rules, event by event.
    pub fn merge(&mut self, other: HooksConfig) {
        for (event, rules) in other.events {
            self.events.entry(event).or_default().extend(rules);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.values().all(Vec::is_empty)
    }

    pub fn events(&self) -> impl Iterator<Item = (HookEvent, &[HookRule])> {
        self.events.iter().map(|(event, rules)| (*event, rules.as_slice()))
    }
}

/// JSON payload sent to command hooks on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    /// The event that triggered the hook.
    #[serde(rename = "hook_event_name")]
    pub event: HookEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tool name (for tool-related events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool parameters (for tool-related events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl HookInput {
    pub fn new(event: HookEvent) -> Self {
        Self {
            event,
            session_id: None,
            tool_name: None,
            tool_input: None,
            cwd: None,
        }
    }

    pub fn pre_tool_use(tool_name: impl Into<String>, tool_input: Map<String, Value>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            ..Self::new(HookEvent::PreToolUse)
        }
    }
}

/// Tri-state verdict a handler returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[default]
    Allow,
    Deny,
    Ask,
}

/// Decision record produced by a handler (subprocess stdout or LLM reply).
///
/// `{}` is a valid record meaning "allow, no changes".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    #[serde(default)]
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, alias = "updated_input", skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Map<String, Value>>,
}

impl HookDecision {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            updated_input: None,
        }
    }
}

/// Result of invoking one handler. Exactly one variant per invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// The handler ran and produced a decision record.
    Success(HookDecision),
    /// The handler explicitly blocked the action.
    Blocked { reason: String },
    /// The handler malfunctioned or could not run.
    Error { message: String },
}

impl HookOutcome {
    pub fn blocked(reason: impl Into<String>) -> Self {
        HookOutcome::Blocked {
            reason: reason.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        HookOutcome::Error {
            message: message.into(),
        }
    }
}
