//! Command parser — turns a configured command into an argument vector.
//!
//! Commands are never run through a shell. A string command is lexed with
//! shell quoting rules, and any unquoted shell construct (pipes, redirects,
//! command lists, substitutions, globs, brace expansion) rejects the whole
//! command.

use crate::error::CommandParseError;
use crate::types::CommandSpec;

/// Resolve a command spec into the argument vector passed to process creation.
pub fn parse_command(spec: &CommandSpec) -> Result<Vec<String>, CommandParseError> {
    match spec {
        CommandSpec::Argv(argv) => {
            if argv.is_empty() {
                return Err(CommandParseError::Empty);
            }
            Ok(argv.clone())
        }
        CommandSpec::Line(line) => parse_line(line),
    }
}

fn parse_line(line: &str) -> Result<Vec<String>, CommandParseError> {
    if line.trim().is_empty() {
        return Err(CommandParseError::Empty);
    }

    if let Some(operator) = find_unquoted_operator(line) {
        return Err(CommandParseError::UnsupportedOperators {
            operator,
            command: line.to_string(),
        });
    }

    let argv = shlex::split(line).ok_or_else(|| CommandParseError::UnbalancedQuotes {
        command: line.to_string(),
    })?;

    if argv.is_empty() {
        return Err(CommandParseError::Empty);
    }
    Ok(argv)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Scan `line` with shell quoting rules and return the first construct that
/// would not resolve to a literal word.
fn find_unquoted_operator(line: &str) -> Option<String> {
    let mut quote = Quote::None;
    let mut at_word_start = true;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => {
                    chars.next();
                }
                '`' => return Some("`".to_string()),
                '$' if chars.peek() == Some(&'(') => return Some("$(".to_string()),
                _ => {}
            },
            Quote::None => {
                match c {
                    '\'' => quote = Quote::Single,
                    '"' => quote = Quote::Double,
                    '\\' => {
                        chars.next();
                    }
                    '|' | '&' | ';' | '<' | '>' | '(' | ')' | '`' | '*' | '?' | '[' | '{' | '\n' => {
                        let mut operator = c.to_string();
                        // Report doubled operators (`&&`, `||`, `>>`) whole.
                        if matches!(c, '|' | '&' | '>' | '<') && chars.peek() == Some(&c) {
                            operator.push(c);
                        }
                        return Some(operator);
                    }
                    '$' if chars.peek() == Some(&'(') => return Some("$(".to_string()),
                    '#' if at_word_start => return Some("#".to_string()),
                    _ => {}
                }
                at_word_start = c.is_whitespace();
                continue;
            }
        }
        at_word_start = false;
    }
    None
}
