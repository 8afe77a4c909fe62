//! Configuration management for multirun.
//!
//! This module defines the structure of the `multirun.toml` configuration file
//! and provides functionality to load and parse it. Settings given on the
//! command line take precedence over the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// How command output is presented on the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// One shared stream, each line prefixed with its command's index.
    #[default]
    Interlaced,
    /// One fixed terminal region per command with a bounded scrollback.
    Boxed,
}

/// Top-level configuration structure corresponding to `multirun.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Output presentation ("interlaced" or "boxed").
    pub output: Option<OutputKind>,
    /// Height of each command's box in boxed mode.
    pub boxsize: Option<u16>,
    /// Default working directory for commands that do not specify one.
    pub workingdir: Option<String>,
    /// List of commands to run.
    #[serde(rename = "command", default)]
    pub commands: Vec<CommandConfig>,
}

/// Configuration for a single command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Command string in the same micro-syntax as the CLI positionals.
    pub run: String,
    /// Working directory, used when `run` does not embed a `<dir>` prefix.
    pub cwd: Option<String>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
