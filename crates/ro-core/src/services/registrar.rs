use crate::error::{DeployError, Result};
use crate::models::{DefinitionSource, TaskDefinition, TaskDefinitionDocument};

use super::gateway::ClusterGateway;

/// A definition ready to deploy, and whether this run created it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDefinition {
    pub definition: TaskDefinition,
    /// Only definitions registered by this run are ever deregistered by it.
    pub registered: bool,
}

impl ResolvedDefinition {
    pub fn arn(&self) -> &str {
        &self.definition.task_definition_arn
    }
}

/// Turns definition documents into registered identifiers. Never retries.
pub struct Registrar<'a> {
    gateway: &'a dyn ClusterGateway,
}

impl<'a> Registrar<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway) -> Self {
        Self { gateway }
    }

    pub async fn register(&self, document: &TaskDefinitionDocument) -> Result<TaskDefinition> {
        tracing::info!(family = document.family(), "registering task definition");
        let definition = self
            .gateway
            .register_task_definition(document)
            .await
            .map_err(|e| match e {
                DeployError::Gateway { operation, message } => {
                    DeployError::Registration(format!("{operation}: {message}"))
                }
                other => other,
            })?;
        tracing::info!(
            task_definition = %definition.task_definition_arn,
            revision = definition.revision,
            "registered task definition"
        );
        Ok(definition)
    }

    /// Register a document, or confirm an existing identifier resolves.
    pub async fn resolve(&self, source: &DefinitionSource) -> Result<ResolvedDefinition> {
        match source {
            DefinitionSource::Document(document) => Ok(ResolvedDefinition {
                definition: self.register(document).await?,
                registered: true,
            }),
            DefinitionSource::Existing(id) => {
                let definition = self
                    .gateway
                    .describe_task_definition(id)
                    .await?
                    .ok_or_else(|| DeployError::DefinitionNotFound(id.clone()))?;
                tracing::info!(task_definition = %definition.task_definition_arn, "reusing task definition");
                Ok(ResolvedDefinition {
                    definition,
                    registered: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::memory_gateway::InMemoryGateway;
    use serde_json::json;

    fn document() -> TaskDefinitionDocument {
        TaskDefinitionDocument::from_value(json!({
            "family": "api",
            "containerDefinitions": [{"name": "api", "image": "api:1"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn rejection_is_a_registration_error_and_not_retried() {
        let gateway = InMemoryGateway::new();
        gateway
            .fail_operation("RegisterTaskDefinition", "ClientException: Invalid 'cpu' setting")
            .unwrap();
        let err = Registrar::new(&gateway).register(&document()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registration);
        assert!(err.to_string().contains("Invalid 'cpu' setting"));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn existing_identifier_must_resolve() {
        let gateway = InMemoryGateway::new();
        let registrar = Registrar::new(&gateway);
        let err = registrar
            .resolve(&DefinitionSource::Existing("api:7".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        gateway.seed_definition(&document()).unwrap();
        let resolved = registrar
            .resolve(&DefinitionSource::Existing("api:1".into()))
            .await
            .unwrap();
        assert!(!resolved.registered);
        assert!(resolved.arn().ends_with("task-definition/api:1"));
    }
}
