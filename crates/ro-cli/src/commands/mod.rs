pub mod install;
pub mod register;
pub mod task;
pub mod upgrade;
pub mod version;

use ro_core::models::{DefinitionSource, DeployOptions};
use ro_core::services::document;
use ro_core::services::gateway::ClusterGateway;
use ro_core::services::progress::ProgressReporter;
use ro_core::{DeployError, Result};

/// What every command runs against.
pub struct Context<'a> {
    pub gateway: &'a dyn ClusterGateway,
    pub progress: &'a dyn ProgressReporter,
    pub options: DeployOptions,
}

/// Build a definition source from a document path or an existing identifier.
///
/// The conflict is reported before the document is read.
pub(crate) async fn definition_source(
    path: Option<&str>,
    existing: Option<&str>,
) -> Result<DefinitionSource> {
    let document = match (path, existing) {
        (Some(_), Some(_)) => {
            return Err(DeployError::Usage(
                "supply either a task definition document or --task-definition-arn, not both"
                    .into(),
            ))
        }
        (Some(path), None) => Some(document::load_definition(path).await?),
        _ => None,
    };
    DefinitionSource::from_flags(document, existing.map(str::to_string))
}
