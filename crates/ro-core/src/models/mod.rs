pub mod config;
pub mod service;
pub mod task;
pub mod task_definition;

pub use config::{DeployOptions, RolloutConfig, WaitConfig};
pub use service::{
    DeploymentStatus, DescribeServicesOutput, Failure, Service, ServiceDeployment, ServiceEvent,
    ServiceStatus,
};
pub use task::{Container, DescribeTasksOutput, RunTaskOutput, RunTaskRequest, Task};
pub use task_definition::{
    ContainerDefinition, DefinitionSource, LogConfiguration, TaskDefinition,
    TaskDefinitionDocument,
};

/// Timestamps on the cluster API wire are fractional epoch seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_f64(ts.timestamp_millis() as f64 / 1000.0),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Ok(secs.and_then(|s| DateTime::from_timestamp_millis((s * 1000.0).round() as i64)))
    }
}
