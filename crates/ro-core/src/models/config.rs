use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const SERVICE_POLL_SECS: u64 = 15;
pub const TASK_POLL_SECS: u64 = 6;
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:4566";
pub const DEFAULT_DESIRED_COUNT: u32 = 1;

/// Settings read from `.rollout.yaml`; every field is optional.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RolloutConfig {
    pub timeout_secs: u64,
    pub service_poll_secs: u64,
    pub task_poll_secs: u64,
    pub failure_markers: Vec<String>,
    pub endpoint_url: String,
    /// Task count requested when a service is created.
    pub desired_count: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            service_poll_secs: SERVICE_POLL_SECS,
            task_poll_secs: TASK_POLL_SECS,
            failure_markers: vec!["unable".to_string()],
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            desired_count: DEFAULT_DESIRED_COUNT,
        }
    }
}

/// Poll budget for one wait. A zero timeout waits without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

/// Per-invocation orchestration settings, passed explicitly into every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOptions {
    pub service_wait: WaitConfig,
    pub task_wait: WaitConfig,
    pub failure_markers: Vec<String>,
    /// Compensate on convergence failure (delete on install, revert on upgrade).
    pub rollback: bool,
    /// Deregister the superseded definition after a successful upgrade.
    pub deregister: bool,
}

impl DeployOptions {
    pub fn from_config(config: &RolloutConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            service_wait: WaitConfig::new(
                timeout,
                Duration::from_secs(config.service_poll_secs.max(1)),
            ),
            task_wait: WaitConfig::new(timeout, Duration::from_secs(config.task_poll_secs.max(1))),
            failure_markers: config.failure_markers.clone(),
            rollback: false,
            deregister: false,
        }
    }

    /// Override the timeout of every wait; `0` waits without bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.service_wait.timeout = timeout;
        self.task_wait.timeout = timeout;
        self
    }

    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_deregister(mut self, deregister: bool) -> Self {
        self.deregister = deregister;
        self
    }
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self::from_config(&RolloutConfig::default())
    }
}
