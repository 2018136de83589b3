//! Command Parser
//!
//! Turns the caller's free-form string into an argument vector. Quoting and
//! escapes follow POSIX shell rules, but nothing is ever handed to a shell:
//! the tokens become a plain argv.

use super::error::ParseError;
use std::path::Path;

/// A parsed caller command with the program name already removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    raw: String,
    args: Vec<String>,
}

impl CommandRequest {
    /// The string as the caller sent it (trimmed)
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Tokens after the optional leading program name
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }
}

/// Tokenizer bound to one backend program name
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: String,
}

impl CommandParser {
    /// `program` may be a path; callers type only its file name
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let name = Path::new(&program)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or(program);
        Self { program: name }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Split `input` into tokens, dropping a leading program name
    ///
    /// # Errors
    ///
    /// - [`ParseError::CommandEmpty`] for blank input
    /// - [`ParseError::InteractiveModeRejected`] when the input is only the
    ///   program name, which would start the backend's interactive shell
    /// - [`ParseError::Unbalanced`] when quoting cannot be resolved
    ///
    /// # Example
    ///
    /// ```
    /// use cligate::gateway::CommandParser;
    ///
    /// let parser = CommandParser::new("oc");
    /// let request = parser.parse("oc get pods -n 'my project'").unwrap();
    /// assert_eq!(request.args(), ["get", "pods", "-n", "my project"]);
    /// ```
    pub fn parse(&self, input: &str) -> Result<CommandRequest, ParseError> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(ParseError::CommandEmpty);
        }
        if trimmed == self.program {
            return Err(ParseError::InteractiveModeRejected(self.program.clone()));
        }

        let mut args = shlex::split(&escape_comment_marks(trimmed))
            .ok_or_else(|| ParseError::Unbalanced(trimmed.to_string()))?;

        if args.first().map(String::as_str) == Some(self.program.as_str()) {
            args.remove(0);
        }

        // `"oc"` or `oc ""` tokenize down to nothing useful
        if args.is_empty() {
            return Err(ParseError::InteractiveModeRejected(self.program.clone()));
        }

        Ok(CommandRequest {
            raw: trimmed.to_string(),
            args,
        })
    }
}

/// Escape every unquoted word-initial `#`
///
/// `shlex` reads such a word as the start of a comment and drops the rest of
/// the line. Here `#` is an ordinary character, as in `-l #app`.
fn escape_comment_marks(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    let mut chars = input.chars();
    let mut word_start = true;

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\n' => {
                escaped.push(ch);
                word_start = true;
                continue;
            }
            '#' if word_start => escaped.push_str("\\#"),
            '\\' => {
                escaped.push(ch);
                escaped.extend(chars.next());
            }
            '\'' => {
                escaped.push(ch);
                for next in chars.by_ref() {
                    escaped.push(next);
                    if next == '\'' {
                        break;
                    }
                }
            }
            '"' => {
                escaped.push(ch);
                while let Some(next) = chars.next() {
                    escaped.push(next);
                    match next {
                        '\\' => escaped.extend(chars.next()),
                        '"' => break,
                        _ => {}
                    }
                }
            }
            _ => escaped.push(ch),
        }
        word_start = false;
    }
    escaped
}
