//! Install, upgrade and one-shot task runs, with compensation on failure.
//!
//! Every run walks `Idle -> Registering -> Converging -> {Stable, Failed}`,
//! and a failed run with rollback enabled continues through `RollingBack`
//! to `RolledBack` or `RollbackFailed`. A rollback that fails replaces the
//! original error, since the cluster is then in a state nobody asked for.

use chrono::{DateTime, Utc};

use crate::error::{describe_failures, DeployError, Result};
use crate::models::{
    DefinitionSource, DeployOptions, RunTaskRequest, Service, Task, TaskDefinition,
    TaskDefinitionDocument,
};

use super::gateway::ClusterGateway;
use super::progress::ProgressReporter;
use super::registrar::{Registrar, ResolvedDefinition};
use super::waiter::Waiter;

/// Cluster used by one-shot runs that name none.
pub const DEFAULT_CLUSTER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Idle,
    Registering,
    Converging,
    Stable,
    Failed,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub cluster: String,
    pub service: String,
    pub definition: DefinitionSource,
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub cluster: String,
    pub service: String,
    pub definition: DefinitionSource,
}

#[derive(Debug, Clone)]
pub struct TaskRunRequest {
    pub request: RunTaskRequest,
    /// Overrides `request.task_definition` when set.
    pub definition: Option<DefinitionSource>,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub task_definition_arn: String,
    pub service: Service,
    /// Definition the service ran before an upgrade.
    pub previous_task_definition: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskRunOutcome {
    pub task_definition_arn: String,
    pub tasks: Vec<Task>,
    pub log_locations: Vec<String>,
}

pub struct Deployer<'a> {
    gateway: &'a dyn ClusterGateway,
    progress: &'a dyn ProgressReporter,
    options: DeployOptions,
}

impl<'a> Deployer<'a> {
    pub fn new(
        gateway: &'a dyn ClusterGateway,
        progress: &'a dyn ProgressReporter,
        options: DeployOptions,
    ) -> Self {
        Self {
            gateway,
            progress,
            options,
        }
    }

    fn waiter(&self) -> Waiter<'a> {
        Waiter::new(self.gateway, self.progress)
    }

    fn registrar(&self) -> Registrar<'a> {
        Registrar::new(self.gateway)
    }

    fn enter(&self, phase: DeployPhase) {
        tracing::info!(?phase, "deployment phase");
        self.progress.on_phase(phase);
    }

    pub async fn register(&self, document: &TaskDefinitionDocument) -> Result<TaskDefinition> {
        self.enter(DeployPhase::Registering);
        match self.registrar().register(document).await {
            Ok(definition) => {
                self.enter(DeployPhase::Stable);
                Ok(definition)
            }
            Err(e) => {
                self.enter(DeployPhase::Failed);
                Err(e)
            }
        }
    }

    /// Create `service` and wait for it to stabilize.
    pub async fn install(&self, request: &InstallRequest) -> Result<DeployOutcome> {
        let InstallRequest {
            cluster,
            service,
            definition,
        } = request;
        self.enter(DeployPhase::Idle);

        let existing = self
            .gateway
            .describe_services(cluster, std::slice::from_ref(service))
            .await?;
        let unexpected: Vec<_> = existing
            .failures
            .iter()
            .filter(|f| !f.is_missing())
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(DeployError::gateway(
                "DescribeServices",
                describe_failures(&unexpected),
            ));
        }
        if existing.find(service).is_some_and(|s| !s.is_inactive()) {
            return Err(DeployError::AlreadyExists {
                cluster: cluster.clone(),
                service: service.clone(),
            });
        }

        self.enter(DeployPhase::Registering);
        let resolved = self.resolve(definition).await?;

        tracing::info!(%cluster, %service, task_definition = resolved.arn(), "creating service");
        let created = match self.gateway.create_service(cluster, service, resolved.arn()).await {
            Ok(created) => created,
            Err(e) => {
                self.enter(DeployPhase::Failed);
                self.cleanup_definition(&resolved).await;
                return Err(e);
            }
        };

        self.enter(DeployPhase::Converging);
        let origin = deployment_origin(&created, false);
        let converged = self
            .waiter()
            .services_stable(
                cluster,
                service,
                origin,
                self.options.service_wait,
                &self.options.failure_markers,
            )
            .await;
        let error = match converged {
            Ok(stable) => {
                self.enter(DeployPhase::Stable);
                return Ok(DeployOutcome {
                    task_definition_arn: resolved.arn().to_string(),
                    service: stable,
                    previous_task_definition: None,
                });
            }
            Err(e) => e,
        };

        self.enter(DeployPhase::Failed);
        tracing::error!(%service, error = %error, "service did not converge");
        if !self.options.rollback {
            return Err(error);
        }

        self.enter(DeployPhase::RollingBack);
        self.progress
            .notice(&format!("Rolling back: deleting service {service}"));
        if let Err(rollback) = self.delete_and_drain(cluster, service).await {
            self.enter(DeployPhase::RollbackFailed);
            self.report_orphan(&resolved);
            return Err(DeployError::Rollback(Box::new(rollback)));
        }
        self.cleanup_definition(&resolved).await;
        self.enter(DeployPhase::RolledBack);
        Err(error)
    }

    /// Point an existing `service` at a new definition and wait for it to stabilize.
    pub async fn upgrade(&self, request: &UpgradeRequest) -> Result<DeployOutcome> {
        let UpgradeRequest {
            cluster,
            service,
            definition,
        } = request;
        self.enter(DeployPhase::Idle);

        let current = self.existing_service(cluster, service).await?;
        let previous = current.task_definition.clone().ok_or_else(|| {
            DeployError::gateway(
                "DescribeServices",
                format!("service {service} reports no task definition"),
            )
        })?;

        self.enter(DeployPhase::Registering);
        let resolved = self.resolve(definition).await?;

        tracing::info!(%cluster, %service, from = %previous, to = resolved.arn(), "updating service");
        let updated = match self.gateway.update_service(cluster, service, resolved.arn()).await {
            Ok(updated) => updated,
            Err(e) => {
                self.enter(DeployPhase::Failed);
                self.cleanup_definition(&resolved).await;
                return Err(e);
            }
        };

        self.enter(DeployPhase::Converging);
        let error = match self.converge_update(cluster, service, &updated).await {
            Ok(stable) => {
                self.enter(DeployPhase::Stable);
                if self.options.deregister && previous != resolved.arn() {
                    self.deregister_best_effort(&previous).await;
                }
                return Ok(DeployOutcome {
                    task_definition_arn: resolved.arn().to_string(),
                    service: stable,
                    previous_task_definition: Some(previous),
                });
            }
            Err(e) => e,
        };

        self.enter(DeployPhase::Failed);
        tracing::error!(%service, error = %error, "service did not converge");
        if !self.options.rollback {
            return Err(error);
        }

        self.enter(DeployPhase::RollingBack);
        self.progress.notice(&format!(
            "Rolling back: returning service {service} to {previous}"
        ));
        let rolled_back = match self.gateway.update_service(cluster, service, &previous).await {
            Ok(reverted) => self.converge_update(cluster, service, &reverted).await,
            Err(e) => Err(e),
        };
        if let Err(rollback) = rolled_back {
            self.enter(DeployPhase::RollbackFailed);
            self.report_orphan(&resolved);
            return Err(DeployError::Rollback(Box::new(rollback)));
        }
        self.cleanup_definition(&resolved).await;
        self.enter(DeployPhase::RolledBack);
        Err(error)
    }

    /// Start one-shot tasks and require every container to exit with 0.
    pub async fn run_task(&self, run: &TaskRunRequest) -> Result<TaskRunOutcome> {
        self.enter(DeployPhase::Idle);
        let mut request = run.request.clone();
        if request.cluster.is_empty() {
            request.cluster = DEFAULT_CLUSTER.to_string();
        }
        let source = match &run.definition {
            Some(source) => source.clone(),
            None if !request.task_definition.is_empty() => {
                DefinitionSource::Existing(request.task_definition.clone())
            }
            None => {
                return Err(DeployError::Usage(
                    "run-task input names no taskDefinition; pass --task-definition-arn or --register"
                        .into(),
                ))
            }
        };

        self.enter(DeployPhase::Registering);
        let resolved = self.resolve(&source).await?;
        request.task_definition = resolved.arn().to_string();

        self.enter(DeployPhase::Converging);
        match self.start_and_check(&request, &resolved.definition).await {
            Ok(outcome) => {
                self.enter(DeployPhase::Stable);
                Ok(outcome)
            }
            Err(e) => {
                self.enter(DeployPhase::Failed);
                Err(e)
            }
        }
    }

    async fn start_and_check(
        &self,
        request: &RunTaskRequest,
        definition: &TaskDefinition,
    ) -> Result<TaskRunOutcome> {
        let cluster = request.cluster.as_str();
        tracing::info!(cluster, task_definition = %request.task_definition, count = ?request.count, "running task");
        let started = self.gateway.run_task(request).await?;

        let mut log_locations = Vec::new();
        for task in &started.tasks {
            for location in definition.log_locations(&task.task_arn) {
                self.progress
                    .notice(&format!("Logs for task {}: {location}", task.id()));
                log_locations.push(location);
            }
        }

        if !started.failures.is_empty() {
            return Err(DeployError::TasksNotStarted {
                task_definition: request.task_definition.clone(),
                failures: started.failures,
            });
        }
        let expected = started.tasks.len();
        if expected == 0 {
            return Err(DeployError::TasksMissing {
                expected: request.count.unwrap_or(1) as usize,
                found: 0,
            });
        }

        let arns: Vec<String> = started.tasks.iter().map(|t| t.task_arn.clone()).collect();
        self.waiter()
            .tasks_stopped(cluster, &arns, self.options.task_wait)
            .await?;

        let finished = self.gateway.describe_tasks(cluster, &arns).await?;
        if !finished.failures.is_empty() {
            return Err(DeployError::gateway(
                "DescribeTasks",
                describe_failures(&finished.failures),
            ));
        }
        if finished.tasks.len() != expected {
            return Err(DeployError::TasksMissing {
                expected,
                found: finished.tasks.len(),
            });
        }
        for task in &finished.tasks {
            check_exit(task)?;
        }

        Ok(TaskRunOutcome {
            task_definition_arn: request.task_definition.clone(),
            tasks: finished.tasks,
            log_locations,
        })
    }

    async fn resolve(&self, source: &DefinitionSource) -> Result<ResolvedDefinition> {
        match self.registrar().resolve(source).await {
            Ok(resolved) => Ok(resolved),
            Err(e) => {
                self.enter(DeployPhase::Failed);
                Err(e)
            }
        }
    }

    async fn existing_service(&self, cluster: &str, service: &str) -> Result<Service> {
        let not_found = || DeployError::ServiceNotFound {
            cluster: cluster.to_string(),
            service: service.to_string(),
        };
        let out = self
            .gateway
            .describe_services(cluster, &[service.to_string()])
            .await?;
        if out.failures.iter().any(|f| f.is_missing()) {
            return Err(not_found());
        }
        if !out.failures.is_empty() {
            return Err(DeployError::gateway(
                "DescribeServices",
                describe_failures(&out.failures),
            ));
        }
        match out.find(service) {
            Some(found) if !found.is_inactive() => Ok(found.clone()),
            _ => Err(not_found()),
        }
    }

    async fn converge_update(&self, cluster: &str, service: &str, updated: &Service) -> Result<Service> {
        self.waiter()
            .services_stable(
                cluster,
                service,
                deployment_origin(updated, true),
                self.options.service_wait,
                &self.options.failure_markers,
            )
            .await
    }

    async fn delete_and_drain(&self, cluster: &str, service: &str) -> Result<()> {
        tracing::info!(cluster, service, "deleting service");
        self.gateway.delete_service(cluster, service).await?;
        self.waiter()
            .services_inactive(cluster, service, self.options.service_wait)
            .await
    }

    /// Deregister a definition this run registered; reused ones are left alone.
    async fn cleanup_definition(&self, resolved: &ResolvedDefinition) {
        if resolved.registered {
            self.deregister_best_effort(resolved.arn()).await;
        }
    }

    async fn deregister_best_effort(&self, task_definition: &str) {
        match self.gateway.deregister_task_definition(task_definition).await {
            Ok(()) => tracing::info!(task_definition, "deregistered task definition"),
            Err(e) => {
                let remediation = deregister_command(task_definition);
                tracing::warn!(task_definition, error = %e, %remediation, "failed to deregister task definition");
                self.progress.notice(&format!(
                    "Could not deregister {task_definition}: {e}\n\
                     Clean it up manually with: {remediation}"
                ));
            }
        }
    }

    /// A failed rollback leaves the cluster alone, so a definition this run
    /// registered stays behind.
    fn report_orphan(&self, resolved: &ResolvedDefinition) {
        if !resolved.registered {
            return;
        }
        let task_definition = resolved.arn();
        let remediation = deregister_command(task_definition);
        tracing::warn!(task_definition, %remediation, "rollback failed, task definition left registered");
        self.progress.notice(&format!(
            "Rollback failed; {task_definition} is still registered.\n\
             Clean it up manually with: {remediation}"
        ));
    }
}

fn deregister_command(task_definition: &str) -> String {
    format!("aws ecs deregister-task-definition --task-definition {task_definition}")
}

/// Timestamp after which failure events belong to this deployment.
///
/// Installs start at the PRIMARY deployment's creation; upgrades at its last update.
fn deployment_origin(service: &Service, upgrade: bool) -> DateTime<Utc> {
    let primary = service.primary_deployment();
    let stamp = if upgrade {
        primary.and_then(|d| d.updated_at.or(d.created_at))
    } else {
        primary.and_then(|d| d.created_at)
    };
    stamp.unwrap_or_else(Utc::now)
}

fn check_exit(task: &Task) -> Result<()> {
    if !task.is_stopped() {
        return Err(DeployError::TaskNotStopped {
            task: task.task_arn.clone(),
            status: task.last_status.clone(),
        });
    }
    for container in &task.containers {
        match container.exit_code {
            None => {
                return Err(DeployError::ContainerNeverStarted {
                    task: task.task_arn.clone(),
                    container: container.name.clone(),
                })
            }
            Some(0) => {}
            Some(exit_code) => {
                return Err(DeployError::ContainerFailed {
                    task: task.task_arn.clone(),
                    container: container.name.clone(),
                    exit_code,
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::memory_gateway::{GatewayCall, InMemoryGateway, Rollout};
    use crate::services::progress::RecordingProgress;
    use serde_json::json;

    fn document(family: &str) -> TaskDefinitionDocument {
        TaskDefinitionDocument::from_value(json!({
            "family": family,
            "containerDefinitions": [{
                "name": "worker",
                "image": "worker:latest",
                "logConfiguration": {
                    "logDriver": "awslogs",
                    "options": {
                        "awslogs-group": "/jobs",
                        "awslogs-region": "eu-west-1",
                        "awslogs-stream-prefix": "jobs"
                    }
                }
            }]
        }))
        .unwrap()
    }

    fn options() -> DeployOptions {
        DeployOptions::default().with_timeout(std::time::Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn install_refuses_existing_service_before_registering() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("web")).unwrap();
        gateway.seed_service("main", "web", "web:1").unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options());

        let err = deployer
            .install(&InstallRequest {
                cluster: "main".into(),
                service: "web".into(),
                definition: DefinitionSource::Document(document("web")),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(gateway.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_cleans_up_new_definition() {
        let gateway = InMemoryGateway::new();
        gateway
            .fail_operation("CreateService", "AccessDeniedException: not allowed")
            .unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options().with_rollback(true));

        let err = deployer
            .install(&InstallRequest {
                cluster: "main".into(),
                service: "web".into(),
                definition: DefinitionSource::Document(document("web")),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gateway);
        assert!(!gateway.is_registered("web:1"));
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::DeleteService { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn reused_definition_survives_rollback() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("web")).unwrap();
        gateway.script_rollout("web", Rollout::Never).unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options().with_rollback(true));

        let err = deployer
            .install(&InstallRequest {
                cluster: "main".into(),
                service: "web".into(),
                definition: DefinitionSource::Existing("web:1".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConvergenceTimeout);
        assert!(gateway.is_registered("web:1"));
        assert_eq!(
            progress.phases(),
            vec![
                DeployPhase::Idle,
                DeployPhase::Registering,
                DeployPhase::Converging,
                DeployPhase::Failed,
                DeployPhase::RollingBack,
                DeployPhase::RolledBack,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_upgrade_deregisters_superseded_definition() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("web")).unwrap();
        gateway.seed_service("main", "web", "web:1").unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options().with_deregister(true));

        let outcome = deployer
            .upgrade(&UpgradeRequest {
                cluster: "main".into(),
                service: "web".into(),
                definition: DefinitionSource::Document(document("web")),
            })
            .await
            .unwrap();
        assert!(outcome.task_definition_arn.ends_with("web:2"));
        assert!(outcome.previous_task_definition.unwrap().ends_with("web:1"));
        assert!(!gateway.is_registered("web:1"));
        assert!(gateway.is_registered("web:2"));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failure_is_a_notice_with_manual_command() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("web")).unwrap();
        gateway.seed_service("main", "web", "web:1").unwrap();
        gateway
            .fail_operation("DeregisterTaskDefinition", "ThrottlingException: slow down")
            .unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options().with_deregister(true));

        deployer
            .upgrade(&UpgradeRequest {
                cluster: "main".into(),
                service: "web".into(),
                definition: DefinitionSource::Document(document("web")),
            })
            .await
            .unwrap();
        let lines = progress.lines();
        assert!(lines.iter().any(|l| l.contains(
            "aws ecs deregister-task-definition --task-definition arn:aws:ecs:us-east-1:000000000000:task-definition/web:1"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn log_locations_reported_before_start_failure() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("job")).unwrap();
        gateway.script_start_failures(1).unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options());

        let mut request = RunTaskRequest::new("batch", "job:1");
        request.count = Some(2);
        let err = deployer
            .run_task(&TaskRunRequest {
                request,
                definition: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::TasksNotStarted { .. }));
        let lines = progress.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("#logEventViewer:group=/jobs;stream=jobs/worker/"));
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::DescribeTasks { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn task_without_exit_code_never_started() {
        let gateway = InMemoryGateway::new();
        gateway.seed_definition(&document("job")).unwrap();
        gateway.script_task_exits("job", vec![None]).unwrap();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options());

        let err = deployer
            .run_task(&TaskRunRequest {
                request: RunTaskRequest::new("", "job"),
                definition: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ContainerNeverStarted { ref container, .. } if container == "worker"));
        assert!(gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::RunTask { cluster, .. } if cluster == DEFAULT_CLUSTER)));
    }

    #[test]
    fn remediation_names_the_definition() {
        assert_eq!(
            deregister_command("arn:aws:ecs:us-east-1:1:task-definition/web:2"),
            "aws ecs deregister-task-definition --task-definition arn:aws:ecs:us-east-1:1:task-definition/web:2"
        );
    }

    #[tokio::test]
    async fn run_task_without_definition_is_usage_error() {
        let gateway = InMemoryGateway::new();
        let progress = RecordingProgress::new();
        let deployer = Deployer::new(&gateway, &progress, options());
        let err = deployer
            .run_task(&TaskRunRequest {
                request: RunTaskRequest::new("batch", ""),
                definition: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(gateway.calls().is_empty());
    }
}
