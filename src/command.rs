//! Command descriptors and the command-string micro-syntax.
//!
//! A command is described on the command line (or in `multirun.toml`) as a
//! single string: an optional `<dir>` working-directory prefix, then either a
//! quoted program followed by its arguments or a program ending at the first
//! space. This module parses that syntax into an immutable [`CommandSpec`].

use anyhow::{bail, Result};

/// Specification for a command to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute.
    pub program: String,
    /// Raw argument string, split into argv entries at spawn time.
    pub arguments: Option<String>,
    /// Working directory for the command.
    pub working_dir: Option<String>,
}

impl CommandSpec {
    /// The command as the user wrote it, for headers and prefixes.
    pub fn display(&self) -> String {
        match &self.arguments {
            Some(args) => format!("{} {}", self.program, args),
            None => self.program.clone(),
        }
    }
}

/// Parses one command string into a [`CommandSpec`].
///
/// Accepted forms, with `<dir>` optional in each:
///
/// - `<dir>"program with spaces" args...`
/// - `<dir>program args...`
pub fn parse_command(input: &str) -> Result<CommandSpec> {
    let mut rest = input;
    let mut working_dir = None;

    if let Some(after) = rest.strip_prefix('<') {
        let Some(end) = after.find('>') else {
            bail!("command starting with < must name a working directory ending with >: {input}");
        };
        working_dir = Some(after[..end].to_string());
        rest = &after[end + 1..];
        if rest.is_empty() {
            bail!("command must include a program, not only a working directory: {input}");
        }
    }

    let (program, arguments) = if let Some(after) = rest.strip_prefix('"') {
        let Some(end) = after.find('"') else {
            bail!("command starting with a quote must end with a quote: {input}");
        };
        let args = after.get(end + 1..).unwrap_or("").trim_start();
        (&after[..end], args)
    } else {
        match rest.split_once(' ') {
            Some((program, args)) => (program, args),
            None => (rest, ""),
        }
    };

    if program.is_empty() {
        bail!("command must include a program: {input}");
    }

    Ok(CommandSpec {
        program: program.to_string(),
        arguments: if arguments.is_empty() {
            None
        } else {
            Some(arguments.to_string())
        },
        working_dir,
    })
}
