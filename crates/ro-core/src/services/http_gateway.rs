//! [`ClusterGateway`] over the cluster API's JSON 1.1 HTTP protocol.
//!
//! Requests are sent unsigned. Point the endpoint at a local emulator or at
//! a signing proxy that adds credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DeployError, Result};
use crate::models::{
    config::DEFAULT_DESIRED_COUNT, DescribeServicesOutput, DescribeTasksOutput, RunTaskOutput, RunTaskRequest, Service,
    TaskDefinition, TaskDefinitionDocument,
};

use super::gateway::ClusterGateway;

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub struct EcsHttpGateway {
    client: Client,
    endpoint: String,
    desired_count: u32,
}

/// Error body returned by the API on a non-2xx response.
#[derive(Debug, Deserialize, PartialEq)]
struct ApiError {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

impl ApiError {
    /// `"com.amazonaws.ecs#ClientException"` -> `"ClientException"`.
    fn short_kind(&self) -> &str {
        self.kind.rsplit('#').next().unwrap_or(&self.kind)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinitionEnvelope {
    task_definition: TaskDefinition,
}

#[derive(Deserialize)]
struct ServiceEnvelope {
    service: Service,
}

impl EcsHttpGateway {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeployError::gateway("Connect", e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            desired_count: DEFAULT_DESIRED_COUNT,
        })
    }

    /// Task count requested by `CreateService`.
    pub fn with_desired_count(mut self, desired_count: u32) -> Self {
        self.desired_count = desired_count;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, operation: &'static str, body: &Value) -> Result<T> {
        tracing::debug!(operation, endpoint = %self.endpoint, "cluster api request");
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| DeployError::gateway(operation, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::gateway(operation, e.to_string()))?;
        if !status.is_success() {
            return Err(DeployError::gateway(operation, error_message(status, &text)));
        }
        tracing::debug!(operation, response = %text, "cluster api response");
        serde_json::from_str(&text)
            .map_err(|e| DeployError::gateway(operation, format!("unexpected response: {e}")))
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(api) if !api.kind.is_empty() => format!("{}: {}", api.short_kind(), api.message),
        _ => format!("HTTP {status}: {body}"),
    }
}

fn create_service_body(cluster: &str, service: &str, task_definition: &str, desired_count: u32) -> Value {
    json!({
        "cluster": cluster,
        "serviceName": service,
        "taskDefinition": task_definition,
        "desiredCount": desired_count,
    })
}

#[async_trait]
impl ClusterGateway for EcsHttpGateway {
    async fn register_task_definition(
        &self,
        document: &TaskDefinitionDocument,
    ) -> Result<TaskDefinition> {
        let body = Value::Object(document.as_map().clone());
        let out: TaskDefinitionEnvelope = self.call("RegisterTaskDefinition", &body).await?;
        Ok(out.task_definition)
    }

    async fn deregister_task_definition(&self, task_definition: &str) -> Result<()> {
        let _: Value = self
            .call(
                "DeregisterTaskDefinition",
                &json!({ "taskDefinition": task_definition }),
            )
            .await?;
        Ok(())
    }

    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> Result<Option<TaskDefinition>> {
        let result: Result<TaskDefinitionEnvelope> = self
            .call(
                "DescribeTaskDefinition",
                &json!({ "taskDefinition": task_definition }),
            )
            .await;
        match result {
            Ok(out) => Ok(Some(out.task_definition)),
            Err(DeployError::Gateway { message, .. })
                if message.starts_with("ClientException") && message.contains("Unable to describe") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service> {
        let body = create_service_body(cluster, service, task_definition, self.desired_count);
        let out: ServiceEnvelope = self.call("CreateService", &body).await?;
        Ok(out.service)
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service> {
        let body = json!({
            "cluster": cluster,
            "service": service,
            "taskDefinition": task_definition,
        });
        let out: ServiceEnvelope = self.call("UpdateService", &body).await?;
        Ok(out.service)
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<Service> {
        let body = json!({ "cluster": cluster, "service": service });
        let out: ServiceEnvelope = self.call("DeleteService", &body).await?;
        Ok(out.service)
    }

    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> Result<DescribeServicesOutput> {
        self.call(
            "DescribeServices",
            &json!({ "cluster": cluster, "services": services }),
        )
        .await
    }

    async fn describe_tasks(&self, cluster: &str, tasks: &[String]) -> Result<DescribeTasksOutput> {
        self.call("DescribeTasks", &json!({ "cluster": cluster, "tasks": tasks }))
            .await
    }

    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskOutput> {
        let body = serde_json::to_value(request)?;
        self.call("RunTask", &body).await
    }
}
