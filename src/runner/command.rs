//! Structured command lines for external programs.
//!
//! Commands are kept as a program plus an ordered argument list and only
//! rendered to a shell string when one is needed (remote dispatch, logs,
//! report helpers). Tokens made of plain characters render verbatim; anything
//! else is POSIX single-quoted.

use std::fmt;
use std::process::Stdio;

use serde::{Deserialize, Serialize};

/// A program and its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Creates a command line with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Renders the command as a single shell string.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|token| shell_quote(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds a tokio command with piped output and kill-on-drop, so that a
    /// timed out invocation does not leave the child running.
    pub fn to_tokio_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

/// Quotes a token for a POSIX shell unless it is made of plain characters.
pub fn shell_quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(is_plain) {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', r"'\''"))
}
