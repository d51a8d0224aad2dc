//! Hook registry — resolves configured rules into an ordered handler list.

use crate::types::{HandlerDescriptor, HookEvent, HooksConfig};
use globset::GlobMatcher;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

/// Compiled matchers keyed by pattern. `None` marks a pattern that failed to compile.
static MATCHERS: LazyLock<Mutex<HashMap<String, Option<GlobMatcher>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A matcher pattern the glob engine cannot compile. It never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMatcher {
    pub event: HookEvent,
    pub pattern: String,
    pub message: String,
}

/// Matches rules against a subject (tool name) for one event.
pub struct HookRegistry;

impl HookRegistry {
    /// Handlers of every rule for `event` whose matcher matches `subject`.
    ///
    /// Rules are visited in configuration order and each rule's handlers are
    /// appended as-is: no reordering, no deduplication. A missing config or
    /// an event with no rules yields an empty list.
    pub fn match_hooks<'a>(
        config: Option<&'a HooksConfig>,
        event: HookEvent,
        subject: &str,
    ) -> Vec<&'a HandlerDescriptor> {
        let Some(config) = config else {
            return Vec::new();
        };

        config
            .rules(event)
            .iter()
            .filter(|rule| Self::matches(&rule.matcher, subject))
            .flat_map(|rule| rule.handlers.iter())
            .collect()
    }

    /// Check whether `pattern` matches `subject`.
    ///
    /// `*`, an empty pattern, and exact equality match without compiling a
    /// glob. Anything else goes through glob matching (`*`, `?`, `[...]`, `{a,b}`).
    /// Each pattern is compiled once per process.
    pub fn matches(pattern: &str, subject: &str) -> bool {
        if pattern == "*" || pattern.is_empty() || pattern == subject {
            return true;
        }

        let mut matchers = MATCHERS.lock().unwrap_or_else(PoisonError::into_inner);
        matchers
            .entry(pattern.to_string())
            .or_insert_with(|| compile(pattern))
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(subject))
    }

    /// Report every matcher in `config` that is not a valid glob.
    pub fn validate(config: &HooksConfig) -> Vec<InvalidMatcher> {
        config
            .events()
            .flat_map(|(event, rules)| rules.iter().map(move |rule| (event, rule)))
            .filter(|(_, rule)| rule.matcher != "*" && !rule.matcher.is_empty())
            .filter_map(|(event, rule)| {
                globset::Glob::new(&rule.matcher)
                    .err()
                    .map(|e| InvalidMatcher {
                        event,
                        pattern: rule.matcher.clone(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }
}

fn compile(pattern: &str) -> Option<GlobMatcher> {
    match globset::GlobBuilder::new(pattern)
        .case_insensitive(false)
        .literal_separator(false)
        .build()
    {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            tracing::warn!("Invalid hook matcher '{pattern}': {e}");
            None
        }
    }
}
