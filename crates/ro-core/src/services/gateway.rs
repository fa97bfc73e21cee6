//! Seam between the orchestrator and the cluster scheduler API.
//!
//! Every read is a fresh remote call; implementations must not cache
//! service or task state between calls.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    DescribeServicesOutput, DescribeTasksOutput, RunTaskOutput, RunTaskRequest, Service,
    TaskDefinition, TaskDefinitionDocument,
};

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn register_task_definition(
        &self,
        document: &TaskDefinitionDocument,
    ) -> Result<TaskDefinition>;

    async fn deregister_task_definition(&self, task_definition: &str) -> Result<()>;

    /// `Ok(None)` when no definition resolves from `task_definition`.
    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> Result<Option<TaskDefinition>>;

    async fn create_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service>;

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service>;

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<Service>;

    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> Result<DescribeServicesOutput>;

    async fn describe_tasks(&self, cluster: &str, tasks: &[String])
        -> Result<DescribeTasksOutput>;

    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskOutput>;
}
