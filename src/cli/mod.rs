//! CLI for hotloop
//!
//! - `load`: validate and flatten a stage file
//! - `patch`: apply one patch to a YAML file
//! - `apply`: apply a manifest or kustomization with retries
//! - `wait` / `wait-pod`: block on a command or a pod phase
//! - `run`: execute a stage file end to end
//! - `completions`: generate shell completions

pub mod apply;
pub mod completions;
pub mod load;
pub mod patch;
pub mod run;
pub mod wait;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use hotloop::executor::{ArtifactMode, CancellationToken, ExecutionContext};
use hotloop::infrastructure::{Config, cancel_on_ctrl_c, init_logging};
use std::path::PathBuf;

/// CLI arguments for hotloop
#[derive(Parser, Debug)]
#[command(name = "hotloop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Cluster CLI program (oc, kubectl)
    #[arg(long, global = true)]
    cli: Option<String>,

    /// Directory holding rendered manifests
    #[arg(long, global = true)]
    manifests_dir: Option<PathBuf>,

    /// What to keep after a successful apply
    #[arg(long, global = true, value_enum)]
    artifact_mode: Option<ArtifactMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a stage file and print the flattened stages
    Load {
        /// Stage file
        file: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Patch a YAML file in place
    Patch {
        /// File to patch
        file: PathBuf,
        /// Path expression, e.g. spec.template.[0].image
        #[arg(short, long)]
        path: String,
        /// New value, parsed as YAML
        #[arg(short, long)]
        value: String,
        /// Document selector `path=value`, value parsed as YAML
        #[arg(short = 'w', long = "where")]
        where_clauses: Vec<String>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Apply a manifest file or kustomization
    Apply {
        /// Manifest file
        #[arg(required_unless_present = "kustomize", conflicts_with = "kustomize")]
        file: Option<PathBuf>,
        /// Kustomization directory or URL
        #[arg(short, long)]
        kustomize: Option<String>,
        /// Per-attempt timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Retry a command until it succeeds
    Wait {
        /// Command line to run
        command: String,
        /// Retries after the first attempt
        #[arg(short, long)]
        retries: Option<u32>,
        /// Seconds between attempts
        #[arg(short, long)]
        delay: Option<u64>,
        /// Per-attempt timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Wait for the single pod matching a selector to finish
    WaitPod {
        /// Namespace
        #[arg(short, long)]
        namespace: String,
        /// Label selector `k=v,k2=v2`
        #[arg(short = 'l', long)]
        selector: String,
        /// Overall timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Seconds between polls
        #[arg(short, long)]
        poll_interval: Option<u64>,
    },

    /// Execute a stage file
    Run {
        /// Stage file
        file: PathBuf,
        /// Write retry metrics to this file (JSON)
        #[arg(short, long)]
        metrics: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// How command results are printed
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Prints `value` as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

impl Args {
    /// Loads the configuration file and applies flag overrides
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(cli) = &self.cli {
            config.cli.clone_from(cli);
        }
        if let Some(dir) = &self.manifests_dir {
            config.manifests_dir.clone_from(dir);
        }
        if let Some(mode) = self.artifact_mode {
            config.apply.artifact_mode = mode;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn system_context(cancel: CancellationToken) -> ExecutionContext {
    ExecutionContext::system().with_cancel(cancel)
}

/// Parse and execute CLI arguments
pub fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = args.config()?;
    init_logging(&config.log_level);

    match args.command {
        Command::Load { file, format } => {
            load::load_stages(&file, format)?;
        }
        Command::Patch {
            file,
            path,
            value,
            where_clauses,
            format,
        } => {
            let patch = patch::build_patch(&path, &value, &where_clauses)?;
            patch::patch_file(&file, &patch, format)?;
        }
        Command::Apply {
            file,
            kustomize,
            timeout,
            format,
        } => {
            if let Some(secs) = timeout {
                config.apply.timeout_secs = secs;
                config.validate().context("Invalid --timeout")?;
            }
            let target = apply::target(file, kustomize)?;
            apply::apply_target(&config, system_context(cancel_on_ctrl_c()), target, format)?;
        }
        Command::Wait {
            command,
            retries,
            delay,
            timeout,
        } => {
            if let Some(retries) = retries {
                config.wait.retries = retries;
            }
            if let Some(delay) = delay {
                config.wait.delay_secs = delay;
            }
            if timeout.is_some() {
                config.wait.command_timeout_secs = timeout;
            }
            config.validate().context("Invalid wait options")?;
            wait::wait_command(&config, system_context(cancel_on_ctrl_c()), &command)?;
        }
        Command::WaitPod {
            namespace,
            selector,
            timeout,
            poll_interval,
        } => {
            if let Some(timeout) = timeout {
                config.pod_wait.timeout_secs = timeout;
            }
            if let Some(interval) = poll_interval {
                config.pod_wait.poll_interval_secs = interval;
            }
            config.validate().context("Invalid wait-pod options")?;
            wait::wait_pod(&config, system_context(cancel_on_ctrl_c()), &namespace, &selector)?;
        }
        Command::Run {
            file,
            metrics,
            format,
        } => {
            run::run_stages(
                &config,
                system_context(cancel_on_ctrl_c()),
                &file,
                metrics.as_deref(),
                format,
            )?;
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
                ShellArg::Elvish => Shell::Elvish,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_overrides() {
        let args = Args::try_parse_from([
            "hotloop",
            "--cli",
            "kubectl",
            "--artifact-mode",
            "rename",
            "load",
            "stages.yaml",
        ])
        .unwrap();

        let config = args.config().unwrap();
        assert_eq!(config.cli, "kubectl");
        assert_eq!(config.apply.artifact_mode, ArtifactMode::Rename);
        assert_eq!(config.manifests_dir, PathBuf::from("manifests"));
    }

    #[test]
    fn test_apply_requires_a_target() {
        assert!(Args::try_parse_from(["hotloop", "apply"]).is_err());
        assert!(Args::try_parse_from(["hotloop", "apply", "a.yaml", "-k", "dir"]).is_err());
        assert!(Args::try_parse_from(["hotloop", "apply", "-k", "dir"]).is_ok());
    }

    #[test]
    fn test_patch_collects_where_clauses() {
        let args = Args::try_parse_from([
            "hotloop", "patch", "f.yaml", "-p", "spec.replicas", "-v", "3", "-w", "kind=Deployment",
            "-w", "metadata.name=api",
        ])
        .unwrap();
        let Command::Patch { where_clauses, .. } = args.command else {
            panic!("expected patch");
        };
        assert_eq!(where_clauses, vec!["kind=Deployment", "metadata.name=api"]);
    }
}
