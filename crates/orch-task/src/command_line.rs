use std::fmt;

use orch_core::errors::{invalid, ErrorInfo, OrchError};
use serde::{Deserialize, Serialize};

/// Structured command: executable, options, quoted arguments and raw arguments.
///
/// Rendering order is `executable options arguments raw_arguments`. Options
/// whose key ends in `:` are glued to their value (`--out:dir`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    executable: String,
    #[serde(default)]
    options: Vec<(String, String)>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    raw_args: Vec<String>,
    #[serde(default)]
    is_windows: bool,
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c)
}

fn quote_posix(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    if s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

fn quote_windows(s: &str) -> String {
    let escaped = s.replace('"', "\\\"");
    if s.contains(|c: char| c == '"' || c.is_whitespace()) {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

/// Splits a command string the way a POSIX shell would for simple commands:
/// whitespace separates words, single quotes are literal, double quotes allow
/// `\"` and `\\` escapes, and a backslash outside quotes escapes one character.
pub fn split_command(input: &str) -> Result<Vec<String>, OrchError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => return Err(unterminated(input, '\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                            Some(next) => {
                                current.push('\\');
                                current.push(next);
                            }
                            None => return Err(unterminated(input, '"')),
                        },
                        Some(other) => current.push(other),
                        None => return Err(unterminated(input, '"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(input: &str, quote: char) -> OrchError {
    OrchError::Invalid(
        ErrorInfo::new("command.unterminated_quote", format!("unterminated {quote} quote"))
            .with_context("command", input),
    )
}

impl CommandLine {
    /// Command running `executable` with no arguments.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Parses a full command string; the first word is the executable.
    pub fn from_string(command: &str) -> Result<Self, OrchError> {
        let mut words = split_command(command)?.into_iter();
        let executable = words
            .next()
            .ok_or_else(|| invalid("command.empty", "command string is empty"))?;
        Ok(Self {
            executable,
            args: words.collect(),
            ..Self::default()
        })
    }

    /// Marks the command for Windows quoting and path separators.
    pub fn windows(mut self) -> Self {
        self.is_windows = true;
        self
    }

    /// Executable, with `\` separators on Windows.
    pub fn executable(&self) -> String {
        if self.is_windows {
            self.executable.replace('/', "\\")
        } else {
            self.executable.clone()
        }
    }

    /// Replaces the executable.
    pub fn set_executable(&mut self, executable: impl Into<String>) {
        self.executable = executable.into();
    }

    /// Appends a positional argument, quoted on render.
    pub fn add_argument(&mut self, arg: impl ToString) {
        self.args.push(arg.to_string());
    }

    /// Appends an argument rendered verbatim.
    pub fn add_raw_argument(&mut self, arg: impl ToString) {
        self.raw_args.push(arg.to_string());
    }

    /// Sets an option, keeping its first insertion position.
    pub fn add_option(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.options.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.options.push((key, value)),
        }
    }

    /// Positional arguments, unquoted.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Options in insertion order.
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// Raw arguments.
    pub fn raw_arguments(&self) -> &[String] {
        &self.raw_args
    }

    /// True when `arg` is one of the positional arguments.
    pub fn has_argument(&self, arg: &str) -> bool {
        self.args.iter().any(|existing| existing == arg)
    }

    fn quote(&self, s: &str) -> String {
        if self.is_windows {
            quote_windows(s)
        } else {
            quote_posix(s)
        }
    }

    /// Rendered command string.
    pub fn cmd(&self) -> String {
        let mut parts = vec![self.quote(&self.executable())];
        for (key, value) in &self.options {
            if key.ends_with(':') {
                parts.push(self.quote(&format!("{key}{value}")));
            } else {
                parts.push(self.quote(key));
                if !value.is_empty() {
                    parts.push(self.quote(value));
                }
            }
        }
        parts.extend(self.args.iter().filter(|arg| !arg.is_empty()).map(|arg| self.quote(arg)));
        parts.extend(self.raw_args.iter().cloned());
        parts.join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cmd())
    }
}
