use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Primary,
    Active,
    Inactive,
    #[serde(other)]
    Unknown,
}

/// One convergence attempt of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(
        default,
        with = "super::epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "super::epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        with = "super::epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    pub service_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_arn: Option<String>,
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
    #[serde(default)]
    pub events: Vec<ServiceEvent>,
}

impl Service {
    /// A lookup key matches either the service name or its ARN.
    pub fn matches(&self, name_or_arn: &str) -> bool {
        self.service_name == name_or_arn || self.service_arn == name_or_arn
    }

    pub fn primary_deployment(&self) -> Option<&ServiceDeployment> {
        self.deployments
            .iter()
            .find(|d| d.status == DeploymentStatus::Primary)
    }

    /// Server-side steady state: a single deployment with every desired task running.
    pub fn is_stable(&self) -> bool {
        self.status == ServiceStatus::Active
            && self.deployments.len() == 1
            && self.running_count == self.desired_count
    }

    pub fn is_inactive(&self) -> bool {
        self.status == ServiceStatus::Inactive
    }

    /// First event created strictly after `origin` whose message carries one of `markers`.
    pub fn failure_event_after(
        &self,
        origin: DateTime<Utc>,
        markers: &[String],
    ) -> Option<&ServiceEvent> {
        self.events.iter().find(|event| {
            event.created_at.is_some_and(|at| at > origin)
                && markers.iter().any(|m| event.message.contains(m.as_str()))
        })
    }
}

/// A per-resource failure returned alongside a describe/run response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub const MISSING: &'static str = "MISSING";

    pub fn missing(arn: impl Into<String>) -> Self {
        Self {
            arn: Some(arn.into()),
            reason: Some(Self::MISSING.to_string()),
            detail: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.reason.as_deref() == Some(Self::MISSING)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesOutput {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub failures: Vec<Failure>,
}

impl DescribeServicesOutput {
    pub fn find(&self, name_or_arn: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.matches(name_or_arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn service_with_events(events: Vec<ServiceEvent>) -> Service {
        Service {
            service_name: "web".into(),
            service_arn: "arn:aws:ecs:us-west-2:1:service/main/web".into(),
            cluster_arn: None,
            status: ServiceStatus::Active,
            task_definition: Some("arn:td/web:1".into()),
            desired_count: 2,
            running_count: 2,
            deployments: vec![],
            events,
        }
    }

    fn event_at(secs: i64, message: &str) -> ServiceEvent {
        ServiceEvent {
            id: None,
            created_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            message: message.into(),
        }
    }

    #[test]
    fn matches_name_or_arn() {
        let svc = service_with_events(vec![]);
        assert!(svc.matches("web"));
        assert!(svc.matches("arn:aws:ecs:us-west-2:1:service/main/web"));
        assert!(!svc.matches("api"));
    }

    #[test]
    fn failure_event_respects_origin_cutoff() {
        let origin = Utc.timestamp_opt(1_000, 0).unwrap();
        let markers = vec!["unable".to_string()];

        let stale = service_with_events(vec![event_at(999, "(service web) was unable to place a task")]);
        assert!(stale.failure_event_after(origin, &markers).is_none());

        let same_instant =
            service_with_events(vec![event_at(1_000, "(service web) was unable to place a task")]);
        assert!(same_instant.failure_event_after(origin, &markers).is_none());

        let fresh = service_with_events(vec![
            event_at(1_001, "(service web) has reached a steady state."),
            event_at(1_002, "(service web) was unable to place a task"),
        ]);
        let hit = fresh.failure_event_after(origin, &markers).unwrap();
        assert!(hit.message.contains("unable"));
    }

    #[test]
    fn stability_requires_single_deployment() {
        let mut svc = service_with_events(vec![]);
        let deployment = ServiceDeployment {
            id: None,
            status: DeploymentStatus::Primary,
            task_definition: None,
            desired_count: 2,
            running_count: 2,
            created_at: None,
            updated_at: None,
        };
        svc.deployments = vec![deployment.clone()];
        assert!(svc.is_stable());

        let mut old = deployment;
        old.status = DeploymentStatus::Active;
        svc.deployments.push(old);
        assert!(!svc.is_stable());
    }

    #[test]
    fn deserializes_wire_format() {
        let json = r#"{
            "services": [{
                "serviceName": "web",
                "serviceArn": "arn:aws:ecs:us-west-2:1:service/main/web",
                "status": "ACTIVE",
                "taskDefinition": "arn:td/web:4",
                "desiredCount": 1,
                "runningCount": 0,
                "deployments": [{"status": "PRIMARY", "createdAt": 1700000000.25, "updatedAt": 1700000001.5}],
                "events": [{"id": "e1", "createdAt": 1700000002.0, "message": "hello"}]
            }],
            "failures": [{"arn": "arn:x", "reason": "MISSING"}]
        }"#;
        let out: DescribeServicesOutput = serde_json::from_str(json).unwrap();
        let svc = out.find("web").unwrap();
        let primary = svc.primary_deployment().unwrap();
        assert_eq!(
            primary.updated_at.unwrap().timestamp_millis(),
            1_700_000_001_500
        );
        assert_eq!(svc.events[0].message, "hello");
        assert!(out.failures[0].is_missing());
    }
}
