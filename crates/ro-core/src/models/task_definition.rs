use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DeployError, Result};

use super::task::task_id;

/// A rendered task-definition document, ready to be registered.
///
/// Only the fields the orchestrator relies on are validated; everything
/// else is forwarded to the cluster untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionDocument {
    body: Map<String, Value>,
}

impl TaskDefinitionDocument {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(body) = value else {
            return Err(DeployError::Registration(
                "task definition must be a JSON object".into(),
            ));
        };
        match body.get("family") {
            Some(Value::String(family)) if !family.is_empty() => {}
            _ => {
                return Err(DeployError::Registration(
                    "task definition requires a non-empty \"family\"".into(),
                ))
            }
        }
        if !matches!(body.get("containerDefinitions"), Some(Value::Array(_))) {
            return Err(DeployError::Registration(
                "task definition requires a \"containerDefinitions\" array".into(),
            ));
        }
        Ok(Self { body })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn family(&self) -> &str {
        self.body
            .get("family")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn container_definitions(&self) -> Result<Vec<ContainerDefinition>> {
        let defs = self
            .body
            .get("containerDefinitions")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(defs)?)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.body)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
}

/// Registered task definition as reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub task_definition_arn: String,
    pub family: String,
    pub revision: u32,
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
}

impl TaskDefinition {
    /// Console locations of the `awslogs` streams a task of this definition writes to.
    ///
    /// Containers without an explicit `awslogs-stream-prefix` are skipped: the
    /// stream name would then depend on the instance the task landed on.
    pub fn log_locations(&self, task_arn: &str) -> Vec<String> {
        let id = task_id(task_arn);
        self.container_definitions
            .iter()
            .filter_map(|container| {
                let config = container.log_configuration.as_ref()?;
                if config.log_driver != "awslogs" {
                    return None;
                }
                let prefix = config.options.get("awslogs-stream-prefix")?;
                let group = config.options.get("awslogs-group")?;
                let region = config.options.get("awslogs-region")?;
                Some(format!(
                    "https://{region}.console.aws.amazon.com/cloudwatch/home?region={region}#logEventViewer:group={group};stream={prefix}/{}/{id}",
                    container.name
                ))
            })
            .collect()
    }
}

/// Where the task definition for a deployment comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionSource {
    /// Register this document as a new revision.
    Document(TaskDefinitionDocument),
    /// Reuse an already registered definition (ARN or `family:revision`).
    Existing(String),
}

impl DefinitionSource {
    /// Exactly one of a document or an existing identifier must be supplied.
    pub fn from_flags(
        document: Option<TaskDefinitionDocument>,
        existing: Option<String>,
    ) -> Result<Self> {
        match (document, existing) {
            (Some(doc), None) => Ok(Self::Document(doc)),
            (None, Some(arn)) if !arn.is_empty() => Ok(Self::Existing(arn)),
            (Some(_), Some(_)) => Err(DeployError::Usage(
                "supply either a task definition document or --task-definition-arn, not both"
                    .into(),
            )),
            _ => Err(DeployError::Usage(
                "a task definition document or --task-definition-arn is required".into(),
            )),
        }
    }
}
