//! multirun: run several commands concurrently and multiplex their output.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration, wires one output sink per command through
//! a single output multiplexer, and runs every command until exit or
//! interrupt.

mod command;
mod config;
mod mux;
mod output;
mod runner;
mod term;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::command::{parse_command, CommandSpec};
use crate::config::OutputKind;
use crate::mux::OutputMux;
use crate::runner::CommandRunner;
use crate::term::AnsiConsole;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "multirun",
    version,
    about = "Run several commands concurrently and multiplex their output",
    styles = help_styles()
)]
struct Cli {
    /// Commands to run, including any arguments. A command may begin with
    /// <dir> to set its working directory and may quote the program
    /// ("my app" args) when its path contains spaces.
    commands: Vec<String>,
    /// How command output is displayed.
    #[arg(short, long, value_enum)]
    output: Option<OutputKind>,
    /// Height of each command's box in boxed mode. Defaults to an even
    /// split of the terminal height across commands.
    #[arg(short, long)]
    boxsize: Option<u16>,
    /// Default working directory for commands that do not specify one.
    #[arg(short = 'w', long)]
    workingdir: Option<String>,
    /// Path to multirun.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any multirun.toml in the current directory.
    #[arg(long)]
    no_config: bool,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    output: OutputKind,
    boxsize: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (specs, settings) = load_specs(&cli)?;

    let console = Box::new(AnsiConsole::new());
    let mut mux = OutputMux::new(settings.output, console, specs.len(), settings.boxsize)
        .context("failed to initialize terminal output")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    spawn_signal_listener(cancel_tx);
    mux.start_resize_watcher();

    let mut runners = JoinSet::new();
    for spec in specs {
        let sink = mux.create_sink(&spec);
        runners.spawn(CommandRunner::new(spec, sink).run(cancel_rx.clone()));
    }
    drop(cancel_rx);

    // Every runner finishes before we report anything: a failed spawn never
    // cancels its siblings, only an interrupt does.
    let mut result = Ok(());
    while let Some(joined) = runners.join_next().await {
        let outcome = joined
            .context("command task panicked")
            .and_then(|run_result| run_result);
        if result.is_ok() {
            result = outcome;
        }
    }

    mux.close().context("failed to restore terminal state")?;
    result
}

/// Builds the command list and run settings from the CLI and config file.
///
/// Config-file commands come first, CLI commands append after them; CLI
/// flags take precedence over config values.
fn load_specs(cli: &Cli) -> Result<(Vec<CommandSpec>, RunSettings)> {
    let mut specs = Vec::new();
    let mut config_output = None;
    let mut config_boxsize = None;
    let mut config_workingdir = None;

    if !cli.no_config {
        let config_path = cli
            .config
            .clone()
            .or_else(|| default_config_path().filter(|path| path.exists()));
        if let Some(path) = config_path {
            let config = config::load_config(&path)?;
            config_output = config.output;
            config_boxsize = config.boxsize;
            config_workingdir = config.workingdir;
            for entry in config.commands {
                let mut spec = parse_command(&entry.run)?;
                if spec.working_dir.is_none() {
                    spec.working_dir = entry.cwd;
                }
                specs.push(spec);
            }
        }
    }

    for raw in &cli.commands {
        specs.push(parse_command(raw)?);
    }

    if specs.is_empty() {
        bail!("no commands to run (pass one or more command strings or use multirun.toml)");
    }

    // Commands without their own working directory fall back to the default
    // one; commands without either inherit the process working directory.
    let default_dir = cli.workingdir.clone().or(config_workingdir);
    if let Some(default_dir) = default_dir {
        for spec in &mut specs {
            if spec.working_dir.is_none() {
                spec.working_dir = Some(default_dir.clone());
            }
        }
    }

    let settings = RunSettings {
        output: cli.output.or(config_output).unwrap_or_default(),
        boxsize: cli.boxsize.or(config_boxsize),
    };
    Ok((specs, settings))
}

fn default_config_path() -> Option<PathBuf> {
    Some(Path::new("multirun.toml").to_path_buf())
}

/// Fires the cancellation signal on the first interrupt.
///
/// Installing the handlers suppresses the default process termination, so
/// runners get to kill their children and the terminal is restored cleanly.
fn spawn_signal_listener(cancel_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        // First interrupt wins; the signal is single-shot.
        cancel_tx.send_replace(true);
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("multirun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parses_output_mode_and_boxsize() {
        let cli = cli(&["-o", "boxed", "-b", "4", "echo hi"]);
        assert_eq!(cli.output, Some(OutputKind::Boxed));
        assert_eq!(cli.boxsize, Some(4));
        assert_eq!(cli.commands, vec!["echo hi"]);
    }

    #[test]
    fn zero_commands_is_an_error() {
        let cli = cli(&["--no-config"]);
        let err = load_specs(&cli).unwrap_err();
        assert!(err.to_string().contains("no commands to run"));
    }

    #[test]
    fn output_defaults_to_interlaced() {
        let cli = cli(&["--no-config", "echo hi"]);
        let (specs, settings) = load_specs(&cli).unwrap();
        assert_eq!(settings.output, OutputKind::Interlaced);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].program, "echo");
    }

    #[test]
    fn default_working_directory_applies_to_bare_commands() {
        let cli = cli(&["--no-config", "-w", "/srv", "echo hi", "<api>cargo run"]);
        let (specs, _) = load_specs(&cli).unwrap();
        assert_eq!(specs[0].working_dir.as_deref(), Some("/srv"));
        assert_eq!(specs[1].working_dir.as_deref(), Some("api"));
    }

    #[test]
    fn malformed_command_fails_before_running_anything() {
        let cli = cli(&["--no-config", "<srv cargo run"]);
        assert!(load_specs(&cli).is_err());
    }
}
