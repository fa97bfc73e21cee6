//! In-memory cluster scheduler for tests and local dry runs.
//!
//! [`InMemoryGateway`] keeps task definitions, services and tasks in a single
//! locked state and advances each service's rollout a step every time it is
//! described, following a scripted [`Rollout`] per task-definition family.
//! A simulated clock ticks one second per call, so event timestamps are
//! strictly ordered.
//!
//! ## Limitations
//!
//! - Single process only, nothing persists.
//! - Placement, networking and load balancers are not modelled.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{DeployError, Result};
use crate::models::{
    Container, DeploymentStatus, DescribeServicesOutput, DescribeTasksOutput, Failure,
    RunTaskOutput, RunTaskRequest, Service, ServiceDeployment, ServiceEvent, ServiceStatus, Task,
    TaskDefinition, TaskDefinitionDocument,
};

use super::gateway::ClusterGateway;

const ARN_PREFIX: &str = "arn:aws:ecs:us-east-1:000000000000";

/// How a service converges once pointed at a definition of a given family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollout {
    /// Becomes stable on the `n`th describe after the deployment starts.
    StableAfter(u32),
    /// Keeps trying forever.
    Never,
    /// Emits a failure event on the `polls`th describe and never stabilizes.
    FailAfter { polls: u32, message: String },
}

impl Default for Rollout {
    fn default() -> Self {
        Self::StableAfter(1)
    }
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    RegisterTaskDefinition { family: String },
    DeregisterTaskDefinition { task_definition: String },
    DescribeTaskDefinition { task_definition: String },
    CreateService { cluster: String, service: String, task_definition: String },
    UpdateService { cluster: String, service: String, task_definition: String },
    DeleteService { cluster: String, service: String },
    DescribeServices { cluster: String, services: Vec<String> },
    DescribeTasks { cluster: String, tasks: Vec<String> },
    RunTask { cluster: String, task_definition: String, count: u32 },
}

impl GatewayCall {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::RegisterTaskDefinition { .. } => "RegisterTaskDefinition",
            Self::DeregisterTaskDefinition { .. } => "DeregisterTaskDefinition",
            Self::DescribeTaskDefinition { .. } => "DescribeTaskDefinition",
            Self::CreateService { .. } => "CreateService",
            Self::UpdateService { .. } => "UpdateService",
            Self::DeleteService { .. } => "DeleteService",
            Self::DescribeServices { .. } => "DescribeServices",
            Self::DescribeTasks { .. } => "DescribeTasks",
            Self::RunTask { .. } => "RunTask",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::DescribeTaskDefinition { .. }
                | Self::DescribeServices { .. }
                | Self::DescribeTasks { .. }
        )
    }
}

#[derive(Debug)]
struct StoredDefinition {
    definition: TaskDefinition,
    active: bool,
}

#[derive(Debug)]
struct SimService {
    service: Service,
    rollout: Rollout,
    polls: u32,
    failure_emitted: bool,
}

#[derive(Debug)]
struct SimTask {
    task: Task,
    polls_until_stopped: u32,
    exit_code: Option<i32>,
}

#[derive(Debug)]
struct ClusterState {
    clock: DateTime<Utc>,
    next_id: u64,
    definitions: BTreeMap<String, StoredDefinition>,
    revisions: HashMap<String, u32>,
    services: BTreeMap<(String, String), SimService>,
    tasks: BTreeMap<String, SimTask>,
    rollouts: HashMap<String, Rollout>,
    task_exits: HashMap<String, VecDeque<Option<i32>>>,
    task_stop_polls: u32,
    start_failures: usize,
    failing: HashMap<&'static str, String>,
    calls: Vec<GatewayCall>,
}

impl ClusterState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn record(&mut self, call: GatewayCall) -> Result<()> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failing.get(operation) {
            Some(message) => Err(DeployError::gateway(operation, message.clone())),
            None => Ok(()),
        }
    }

    /// Resolve an ARN, `family:revision` or bare family (latest active revision).
    fn resolve(&self, id: &str) -> Option<&StoredDefinition> {
        if let Some(stored) = self.definitions.get(id) {
            return Some(stored);
        }
        if let Some((family, revision)) = id.rsplit_once(':') {
            if let Ok(revision) = revision.parse::<u32>() {
                return self.definitions.values().find(|s| {
                    s.definition.family == family && s.definition.revision == revision
                });
            }
        }
        self.definitions
            .values()
            .filter(|s| s.active && s.definition.family == id)
            .max_by_key(|s| s.definition.revision)
    }

    fn find_service(&self, cluster: &str, name_or_arn: &str) -> Option<(String, String)> {
        self.services
            .iter()
            .find(|((c, _), sim)| c == cluster && sim.service.matches(name_or_arn))
            .map(|(key, _)| key.clone())
    }

    fn active_definition(&self, operation: &'static str, id: &str) -> Result<TaskDefinition> {
        match self.resolve(id) {
            Some(stored) if stored.active => Ok(stored.definition.clone()),
            Some(_) => Err(DeployError::gateway(
                operation,
                format!("ClientException: TaskDefinition {id} is inactive"),
            )),
            None => Err(DeployError::gateway(
                operation,
                format!("ClientException: TaskDefinition not found: {id}"),
            )),
        }
    }

    /// Most specific script wins: ARN, then `family:revision`, then family.
    fn rollout_for(&self, definition: &TaskDefinition) -> Rollout {
        let revision = format!("{}:{}", definition.family, definition.revision);
        [
            definition.task_definition_arn.as_str(),
            revision.as_str(),
            definition.family.as_str(),
        ]
        .iter()
        .find_map(|key| self.rollouts.get(*key))
        .cloned()
        .unwrap_or_default()
    }

    fn advance_service(&mut self, key: &(String, String)) {
        let now = self.tick();
        let Some(sim) = self.services.get_mut(key) else {
            return;
        };
        let name = sim.service.service_name.clone();
        match sim.service.status {
            ServiceStatus::Draining => {
                sim.service.status = ServiceStatus::Inactive;
                sim.service.running_count = 0;
                sim.service.deployments.clear();
            }
            ServiceStatus::Active if sim.service.deployments.len() > 1 || !sim.service.is_stable() => {
                sim.polls += 1;
                match sim.rollout.clone() {
                    Rollout::StableAfter(n) if sim.polls >= n => {
                        sim.service.deployments.retain(|d| d.status == DeploymentStatus::Primary);
                        for deployment in &mut sim.service.deployments {
                            deployment.running_count = deployment.desired_count;
                            deployment.updated_at = Some(now);
                        }
                        sim.service.running_count = sim.service.desired_count;
                        push_event(sim, now, format!("(service {name}) has reached a steady state."));
                    }
                    Rollout::FailAfter { polls, message } if sim.polls >= polls && !sim.failure_emitted => {
                        sim.failure_emitted = true;
                        push_event(sim, now, message);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn advance_task(&mut self, arn: &str) {
        let Some(sim) = self.tasks.get_mut(arn) else {
            return;
        };
        if sim.task.is_stopped() {
            return;
        }
        if sim.polls_until_stopped > 0 {
            sim.polls_until_stopped -= 1;
            sim.task.last_status = "RUNNING".to_string();
            return;
        }
        sim.task.last_status = Task::STOPPED.to_string();
        let exit_code = sim.exit_code;
        if exit_code.is_none() {
            sim.task.stopped_reason = Some("CannotPullContainerError: image not found".into());
        }
        for container in &mut sim.task.containers {
            container.exit_code = exit_code;
            container.last_status = Some(Task::STOPPED.to_string());
        }
    }
}

fn push_event(sim: &mut SimService, at: DateTime<Utc>, message: String) {
    let id = format!("event-{}", sim.service.events.len() + 1);
    // Newest first, as the scheduler reports them.
    sim.service.events.insert(
        0,
        ServiceEvent {
            id: Some(id),
            created_at: Some(at),
            message,
        },
    );
}

fn new_deployment(task_definition: &str, desired: u32, at: DateTime<Utc>) -> ServiceDeployment {
    ServiceDeployment {
        id: None,
        status: DeploymentStatus::Primary,
        task_definition: Some(task_definition.to_string()),
        desired_count: desired,
        running_count: 0,
        created_at: Some(at),
        updated_at: Some(at),
    }
}

fn poison_err<T>(_: PoisonError<T>) -> DeployError {
    DeployError::gateway("InMemoryGateway", "state lock poisoned")
}

/// Simulated cluster scheduler.
#[derive(Debug)]
pub struct InMemoryGateway {
    state: Mutex<ClusterState>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                clock: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default(),
                next_id: 0,
                definitions: BTreeMap::new(),
                revisions: HashMap::new(),
                services: BTreeMap::new(),
                tasks: BTreeMap::new(),
                rollouts: HashMap::new(),
                task_exits: HashMap::new(),
                task_stop_polls: 1,
                start_failures: 0,
                failing: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, ClusterState>> {
        self.state.lock().map_err(poison_err)
    }

    /// Script how services converge onto `definition`, keyed by ARN,
    /// `family:revision` or bare family.
    pub fn script_rollout(&self, definition: &str, rollout: Rollout) -> Result<()> {
        self.state()?.rollouts.insert(definition.to_string(), rollout);
        Ok(())
    }

    /// Exit codes for the next tasks started from `family`, one per task.
    /// `None` means the containers never started.
    pub fn script_task_exits(&self, family: &str, exit_codes: Vec<Option<i32>>) -> Result<()> {
        self.state()?
            .task_exits
            .insert(family.to_string(), exit_codes.into());
        Ok(())
    }

    /// How many describes a task stays RUNNING before it stops.
    pub fn set_task_stop_polls(&self, polls: u32) -> Result<()> {
        self.state()?.task_stop_polls = polls;
        Ok(())
    }

    /// The next run-task call fails to place this many instances.
    pub fn script_start_failures(&self, count: usize) -> Result<()> {
        self.state()?.start_failures = count;
        Ok(())
    }

    /// Every call to `operation` fails with `message` until cleared.
    pub fn fail_operation(&self, operation: &'static str, message: &str) -> Result<()> {
        self.state()?.failing.insert(operation, message.to_string());
        Ok(())
    }

    pub fn clear_failure(&self, operation: &'static str) -> Result<()> {
        self.state()?.failing.remove(operation);
        Ok(())
    }

    /// Seed an already stable service without recording a call.
    pub fn seed_service(&self, cluster: &str, service: &str, task_definition: &str) -> Result<Service> {
        let mut state = self.state()?;
        let definition = state.active_definition("SeedService", task_definition)?;
        let now = state.tick();
        let mut deployment = new_deployment(&definition.task_definition_arn, 1, now);
        deployment.running_count = 1;
        let seeded = Service {
            service_name: service.to_string(),
            service_arn: format!("{ARN_PREFIX}:service/{cluster}/{service}"),
            cluster_arn: Some(format!("{ARN_PREFIX}:cluster/{cluster}")),
            status: ServiceStatus::Active,
            task_definition: Some(definition.task_definition_arn.clone()),
            desired_count: 1,
            running_count: 1,
            deployments: vec![deployment],
            events: Vec::new(),
        };
        let rollout = state.rollout_for(&definition);
        state.services.insert(
            (cluster.to_string(), service.to_string()),
            SimService {
                service: seeded.clone(),
                rollout,
                polls: 0,
                failure_emitted: false,
            },
        );
        Ok(seeded)
    }

    /// Seed a definition without recording a call.
    pub fn seed_definition(&self, document: &TaskDefinitionDocument) -> Result<TaskDefinition> {
        let mut state = self.state()?;
        register(&mut state, document)
    }

    /// Append an event to a service at the current simulated time.
    pub fn push_service_event(&self, cluster: &str, service: &str, message: &str) -> Result<()> {
        let mut state = self.state()?;
        let now = state.tick();
        let key = state
            .find_service(cluster, service)
            .ok_or_else(|| DeployError::gateway("PushServiceEvent", "no such service"))?;
        if let Some(sim) = state.services.get_mut(&key) {
            push_event(sim, now, message.to_string());
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Recorded calls that change cluster state.
    pub fn mutations(&self) -> Vec<GatewayCall> {
        self.calls().into_iter().filter(GatewayCall::is_mutation).collect()
    }

    /// Current view of a service, without advancing its rollout.
    pub fn service(&self, cluster: &str, service: &str) -> Option<Service> {
        let state = self.state().ok()?;
        let key = state.find_service(cluster, service)?;
        state.services.get(&key).map(|sim| sim.service.clone())
    }

    /// Whether `task_definition` resolves to an ACTIVE revision.
    pub fn is_registered(&self, task_definition: &str) -> bool {
        self.state()
            .map(|s| s.resolve(task_definition).is_some_and(|d| d.active))
            .unwrap_or(false)
    }
}

fn register(state: &mut ClusterState, document: &TaskDefinitionDocument) -> Result<TaskDefinition> {
    let family = document.family().to_string();
    let container_definitions = document
        .container_definitions()
        .map_err(|e| DeployError::gateway("RegisterTaskDefinition", format!("ClientException: {e}")))?;
    let revision = state.revisions.entry(family.clone()).or_insert(0);
    *revision += 1;
    let definition = TaskDefinition {
        task_definition_arn: format!("{ARN_PREFIX}:task-definition/{family}:{revision}"),
        family,
        revision: *revision,
        container_definitions,
    };
    state.definitions.insert(
        definition.task_definition_arn.clone(),
        StoredDefinition {
            definition: definition.clone(),
            active: true,
        },
    );
    Ok(definition)
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
    async fn register_task_definition(
        &self,
        document: &TaskDefinitionDocument,
    ) -> Result<TaskDefinition> {
        let mut state = self.state()?;
        state.record(GatewayCall::RegisterTaskDefinition {
            family: document.family().to_string(),
        })?;
        register(&mut state, document)
    }

    async fn deregister_task_definition(&self, task_definition: &str) -> Result<()> {
        let mut state = self.state()?;
        state.record(GatewayCall::DeregisterTaskDefinition {
            task_definition: task_definition.to_string(),
        })?;
        let arn = state
            .resolve(task_definition)
            .map(|s| s.definition.task_definition_arn.clone())
            .ok_or_else(|| {
                DeployError::gateway(
                    "DeregisterTaskDefinition",
                    format!("ClientException: TaskDefinition not found: {task_definition}"),
                )
            })?;
        if let Some(stored) = state.definitions.get_mut(&arn) {
            stored.active = false;
        }
        Ok(())
    }

    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> Result<Option<TaskDefinition>> {
        let mut state = self.state()?;
        state.record(GatewayCall::DescribeTaskDefinition {
            task_definition: task_definition.to_string(),
        })?;
        Ok(state.resolve(task_definition).map(|s| s.definition.clone()))
    }

    async fn create_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service> {
        let mut state = self.state()?;
        state.record(GatewayCall::CreateService {
            cluster: cluster.to_string(),
            service: service.to_string(),
            task_definition: task_definition.to_string(),
        })?;
        if let Some(key) = state.find_service(cluster, service) {
            if state.services[&key].service.status != ServiceStatus::Inactive {
                return Err(DeployError::gateway(
                    "CreateService",
                    "InvalidParameterException: Creation of service was not idempotent.",
                ));
            }
        }
        let definition = state.active_definition("CreateService", task_definition)?;
        let now = state.tick();
        let created = Service {
            service_name: service.to_string(),
            service_arn: format!("{ARN_PREFIX}:service/{cluster}/{service}"),
            cluster_arn: Some(format!("{ARN_PREFIX}:cluster/{cluster}")),
            status: ServiceStatus::Active,
            task_definition: Some(definition.task_definition_arn.clone()),
            desired_count: 1,
            running_count: 0,
            deployments: vec![new_deployment(&definition.task_definition_arn, 1, now)],
            events: Vec::new(),
        };
        let rollout = state.rollout_for(&definition);
        state.services.insert(
            (cluster.to_string(), service.to_string()),
            SimService {
                service: created.clone(),
                rollout,
                polls: 0,
                failure_emitted: false,
            },
        );
        Ok(created)
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<Service> {
        let mut state = self.state()?;
        state.record(GatewayCall::UpdateService {
            cluster: cluster.to_string(),
            service: service.to_string(),
            task_definition: task_definition.to_string(),
        })?;
        let key = state
            .find_service(cluster, service)
            .filter(|key| state.services[key].service.status == ServiceStatus::Active)
            .ok_or_else(|| {
                DeployError::gateway("UpdateService", "ServiceNotActiveException: Service was not ACTIVE.")
            })?;
        let definition = state.active_definition("UpdateService", task_definition)?;
        let rollout = state.rollout_for(&definition);
        let now = state.tick();
        let sim = state
            .services
            .get_mut(&key)
            .ok_or_else(|| DeployError::gateway("UpdateService", "service vanished"))?;
        let desired = sim.service.desired_count;
        for deployment in &mut sim.service.deployments {
            if deployment.status == DeploymentStatus::Primary {
                deployment.status = DeploymentStatus::Active;
            }
        }
        sim.service
            .deployments
            .insert(0, new_deployment(&definition.task_definition_arn, desired, now));
        sim.service.task_definition = Some(definition.task_definition_arn);
        sim.rollout = rollout;
        sim.polls = 0;
        sim.failure_emitted = false;
        Ok(sim.service.clone())
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<Service> {
        let mut state = self.state()?;
        state.record(GatewayCall::DeleteService {
            cluster: cluster.to_string(),
            service: service.to_string(),
        })?;
        let key = state.find_service(cluster, service).ok_or_else(|| {
            DeployError::gateway("DeleteService", "ServiceNotFoundException: Service not found.")
        })?;
        let sim = state
            .services
            .get_mut(&key)
            .ok_or_else(|| DeployError::gateway("DeleteService", "service vanished"))?;
        sim.service.status = ServiceStatus::Draining;
        sim.service.desired_count = 0;
        Ok(sim.service.clone())
    }

    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> Result<DescribeServicesOutput> {
        let mut state = self.state()?;
        state.record(GatewayCall::DescribeServices {
            cluster: cluster.to_string(),
            services: services.to_vec(),
        })?;
        let mut out = DescribeServicesOutput::default();
        for name in services {
            match state.find_service(cluster, name) {
                Some(key) => {
                    state.advance_service(&key);
                    out.services.push(state.services[&key].service.clone());
                }
                None => out.failures.push(Failure::missing(name.clone())),
            }
        }
        Ok(out)
    }

    async fn describe_tasks(&self, cluster: &str, tasks: &[String]) -> Result<DescribeTasksOutput> {
        let mut state = self.state()?;
        state.record(GatewayCall::DescribeTasks {
            cluster: cluster.to_string(),
            tasks: tasks.to_vec(),
        })?;
        let mut out = DescribeTasksOutput::default();
        for arn in tasks {
            if state.tasks.contains_key(arn) {
                state.advance_task(arn);
                out.tasks.push(state.tasks[arn].task.clone());
            } else {
                out.failures.push(Failure::missing(arn.clone()));
            }
        }
        Ok(out)
    }

    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskOutput> {
        let mut state = self.state()?;
        let count = request.count.unwrap_or(1);
        state.record(GatewayCall::RunTask {
            cluster: request.cluster.clone(),
            task_definition: request.task_definition.clone(),
            count,
        })?;
        let definition = state.active_definition("RunTask", &request.task_definition)?;
        let failed = std::mem::take(&mut state.start_failures).min(count as usize);
        let mut out = RunTaskOutput::default();
        for _ in 0..failed {
            out.failures.push(Failure {
                arn: Some(format!("{ARN_PREFIX}:container-instance/{}", request.cluster)),
                reason: Some("RESOURCE:MEMORY".to_string()),
                detail: None,
            });
        }

        let container_names: Vec<String> = if definition.container_definitions.is_empty() {
            vec!["main".to_string()]
        } else {
            definition
                .container_definitions
                .iter()
                .map(|c| c.name.clone())
                .collect()
        };
        for _ in failed..count as usize {
            state.next_id += 1;
            let arn = format!("{ARN_PREFIX}:task/{}/{:032x}", request.cluster, state.next_id);
            let exit_code = state
                .task_exits
                .get_mut(&definition.family)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Some(0));
            let task = Task {
                task_arn: arn.clone(),
                last_status: "PENDING".to_string(),
                task_definition_arn: Some(definition.task_definition_arn.clone()),
                stopped_reason: None,
                containers: container_names
                    .iter()
                    .map(|name| Container {
                        name: name.clone(),
                        exit_code: None,
                        last_status: Some("PENDING".to_string()),
                        reason: None,
                    })
                    .collect(),
            };
            out.tasks.push(task.clone());
            let polls_until_stopped = state.task_stop_polls;
            state.tasks.insert(
                arn,
                SimTask {
                    task,
                    polls_until_stopped,
                    exit_code,
                },
            );
        }
        Ok(out)
    }
}
