use std::path::PathBuf;

use crate::models::Failure;

/// Category of a [`DeployError`], independent of the variant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Registration,
    NotFound,
    AlreadyExists,
    ConvergenceTimeout,
    ConvergenceAborted,
    PartialFailure,
    Rollback,
    Gateway,
    Document,
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("cannot register task definition: {0}")]
    Registration(String),

    #[error("service '{service}' does not exist in cluster '{cluster}'; create it with `rollout install` first")]
    ServiceNotFound { cluster: String, service: String },

    #[error("task definition '{0}' not found")]
    DefinitionNotFound(String),

    #[error("service '{service}' already exists in cluster '{cluster}'; use `rollout upgrade` instead")]
    AlreadyExists { cluster: String, service: String },

    #[error("timed out waiting for {target} after {polls} polls")]
    ConvergenceTimeout { target: String, polls: u32 },

    #[error("deployment aborted while waiting for {target}: {reason}")]
    ConvergenceAborted { target: String, reason: String },

    #[error("failed to start all instances of task {task_definition}: {}", describe_failures(.failures))]
    TasksNotStarted {
        task_definition: String,
        failures: Vec<Failure>,
    },

    #[error("container {container} in task {task} exited with non-zero exit code {exit_code}; see logs for details")]
    ContainerFailed {
        task: String,
        container: String,
        exit_code: i32,
    },

    #[error("container {container} in task {task} has no exit code; task may have failed before container started")]
    ContainerNeverStarted { task: String, container: String },

    #[error("expected all tasks to be stopped, but task {task} was in state {status}")]
    TaskNotStopped { task: String, status: String },

    #[error("tried to retrieve {expected} task(s) but only received {found}")]
    TasksMissing { expected: usize, found: usize },

    #[error("rollback failed: {0}")]
    Rollback(#[source] Box<DeployError>),

    #[error("{operation} failed: {message}")]
    Gateway {
        operation: &'static str,
        message: String,
    },

    #[error("cannot load document {location}: {message}")]
    Document { location: String, message: String },

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    pub fn gateway(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Gateway {
            operation,
            message: message.into(),
        }
    }

    pub fn document(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Document {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::Registration(_) => ErrorKind::Registration,
            Self::ServiceNotFound { .. } | Self::DefinitionNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::ConvergenceTimeout { .. } => ErrorKind::ConvergenceTimeout,
            Self::ConvergenceAborted { .. } => ErrorKind::ConvergenceAborted,
            Self::TasksNotStarted { .. }
            | Self::ContainerFailed { .. }
            | Self::ContainerNeverStarted { .. }
            | Self::TaskNotStopped { .. }
            | Self::TasksMissing { .. } => ErrorKind::PartialFailure,
            Self::Rollback(_) => ErrorKind::Rollback,
            Self::Gateway { .. } => ErrorKind::Gateway,
            Self::Document { .. } | Self::Io(_) | Self::Json(_) => ErrorKind::Document,
            Self::ConfigNotFound(_) | Self::InvalidConfig(_) | Self::Yaml(_) => ErrorKind::Config,
        }
    }
}

pub(crate) fn describe_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| match (&f.arn, &f.reason) {
            (Some(arn), Some(reason)) => format!("{arn} ({reason})"),
            (None, Some(reason)) => reason.clone(),
            (Some(arn), None) => arn.clone(),
            (None, None) => "unknown failure".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, DeployError>;
