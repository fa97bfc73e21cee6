//! Command-line frontend for rollout.
//!
//! ## Commands
//!
//! - `rollout register` - Register a task definition
//! - `rollout install` - Create a service and wait for it to stabilize
//! - `rollout upgrade` - Move a service to a new task definition
//! - `rollout task` - Run one-shot tasks and check their exit codes
//!
//! Settings come from `.rollout.yaml` in the working directory, overridden
//! by flags and `ROLLOUT_ENDPOINT_URL`.

pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ro_core::models::{DeployOptions, RolloutConfig};

#[derive(Debug, Parser)]
#[command(name = "rollout")]
#[command(version, about = "Deploy and upgrade services on a container cluster", long_about = None)]
pub struct Cli {
    /// Log debug detail, including every poll response.
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only report errors.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Also write a debug log to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Cluster API endpoint.
    #[arg(long, global = true, env = "ROLLOUT_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Seconds to wait for convergence; 0 waits forever.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register a task definition document.
    Register(commands::register::RegisterArgs),
    /// Create a service and wait until it is stable.
    Install(commands::install::InstallArgs),
    /// Point an existing service at a new task definition.
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Run one-shot tasks and require every container to exit with 0.
    Task(commands::task::TaskArgs),
    /// Print the version.
    Version,
}

impl Commands {
    /// Whether the command talks to the cluster, and so needs config and a gateway.
    pub fn needs_cluster(&self) -> bool {
        !matches!(self, Self::Version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Debug,
}

impl Verbosity {
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint_url: String,
    pub desired_count: u32,
    pub options: DeployOptions,
    pub verbosity: Verbosity,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// Layer flags over the settings loaded from file.
    pub fn config(&self, file: &RolloutConfig) -> Config {
        let mut options = DeployOptions::from_config(file);
        if let Some(timeout) = self.timeout {
            options = options.with_timeout(Duration::from_secs(timeout));
        }
        Config {
            endpoint_url: self
                .endpoint_url
                .clone()
                .unwrap_or_else(|| file.endpoint_url.clone()),
            desired_count: file.desired_count,
            options,
            verbosity: self.verbosity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let cli = Cli::parse_from([
            "rollout",
            "--timeout",
            "0",
            "--endpoint-url",
            "http://ecs.local:9000",
            "upgrade",
            "main",
            "web",
            "--task-definition-arn",
            "web:4",
        ]);
        let file = RolloutConfig {
            timeout_secs: 900,
            service_poll_secs: 5,
            desired_count: 2,
            ..RolloutConfig::default()
        };
        let config = cli.config(&file);
        assert_eq!(config.endpoint_url, "http://ecs.local:9000");
        assert!(config.options.service_wait.timeout.is_zero());
        assert_eq!(config.options.service_wait.poll_interval, Duration::from_secs(5));
        assert_eq!(config.desired_count, 2);
        assert_eq!(config.verbosity, Verbosity::Normal);
    }
}
