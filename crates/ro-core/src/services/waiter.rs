//! Bounded polling of the cluster until a service or set of tasks settles.
//!
//! The poll budget is derived from a timeout and a base interval: with
//! `timeout = 70s` and `interval = 15s` the waiter sleeps 15, 15, 15, 15 and
//! finally 10 seconds between six polls, so the total time asleep equals the
//! timeout exactly. A zero timeout polls without bound.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{DeployError, Result};
use crate::models::{
    DescribeServicesOutput, DescribeTasksOutput, Service, ServiceStatus, WaitConfig,
};

use super::gateway::ClusterGateway;
use super::progress::{PollContext, ProgressReporter};

/// Poll budget computed from a [`WaitConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    max_polls: Option<u32>,
    interval: Duration,
    last_interval: Duration,
}

impl PollSchedule {
    pub fn new(config: WaitConfig) -> Self {
        let interval = config.poll_interval.max(Duration::from_millis(1));
        if config.timeout.is_zero() {
            return Self {
                max_polls: None,
                interval,
                last_interval: interval,
            };
        }

        let base = interval.as_millis();
        let timeout = config.timeout.as_millis();
        let full_rounds = timeout / base;
        let remainder = timeout % base;
        let (sleeps, last_interval) = if remainder == 0 {
            (full_rounds, interval)
        } else {
            (
                full_rounds + 1,
                Duration::from_millis(u64::try_from(remainder).unwrap_or(u64::MAX)),
            )
        };
        let sleeps = u32::try_from(sleeps).unwrap_or(u32::MAX - 1);

        Self {
            max_polls: Some(sleeps + 1),
            interval,
            last_interval,
        }
    }

    /// Total number of polls, `None` when unbounded.
    pub fn max_polls(&self) -> Option<u32> {
        self.max_polls
    }

    /// Number of sleeps between polls, `None` when unbounded.
    pub fn sleeps(&self) -> Option<u32> {
        self.max_polls.map(|polls| polls - 1)
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        self.max_polls.is_some_and(|max| attempt >= max)
    }

    /// Delay after the 1-based poll `attempt`, before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.max_polls {
            Some(max) if attempt.saturating_add(1) == max => self.last_interval,
            _ => self.interval,
        }
    }

    /// Sum of every sleep in the schedule, `None` when unbounded.
    pub fn total_wait(&self) -> Option<Duration> {
        let sleeps = self.sleeps()?;
        if sleeps == 0 {
            return Some(Duration::ZERO);
        }
        Some(self.interval * (sleeps - 1) + self.last_interval)
    }
}

/// Result of inspecting one poll response.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Done(T),
    Abort(String),
    Pending,
}

pub struct Waiter<'a> {
    gateway: &'a dyn ClusterGateway,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Waiter<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, progress: &'a dyn ProgressReporter) -> Self {
        Self { gateway, progress }
    }

    /// Poll `check` until it settles or the budget runs out.
    ///
    /// `check` returns a verdict and a one-line summary of what it saw.
    pub async fn until<T, F, Fut>(&self, target: &str, config: WaitConfig, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Verdict<T>, String)>>,
    {
        let schedule = PollSchedule::new(config);
        tracing::debug!(
            waiting_for = target,
            max_polls = ?schedule.max_polls(),
            total_wait = ?schedule.total_wait(),
            "waiting"
        );

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt = attempt.saturating_add(1);
            let poll = PollContext {
                target,
                attempt,
                max_attempts: schedule.max_polls(),
            };
            self.progress.on_poll_start(&poll);
            let (verdict, summary) = match check().await {
                Ok(observed) => observed,
                Err(e) => break Err(e),
            };
            self.progress.on_poll_end(&poll, &summary);

            match verdict {
                Verdict::Done(value) => break Ok(value),
                Verdict::Abort(reason) => {
                    break Err(DeployError::ConvergenceAborted {
                        target: target.to_string(),
                        reason,
                    })
                }
                Verdict::Pending => {}
            }

            if schedule.is_last(attempt) {
                break Err(DeployError::ConvergenceTimeout {
                    target: target.to_string(),
                    polls: attempt,
                });
            }

            let delay = schedule.delay_after(attempt);
            self.progress.on_sleep(&poll, delay);
            tokio::time::sleep(delay).await;
        };
        self.progress.on_wait_finished(target);
        outcome
    }

    /// Wait until `service` is stable, aborting early on a failure event newer than `origin`.
    pub async fn services_stable(
        &self,
        cluster: &str,
        service: &str,
        origin: DateTime<Utc>,
        config: WaitConfig,
        failure_markers: &[String],
    ) -> Result<Service> {
        let gateway = self.gateway;
        let services = [service.to_string()];
        let services = &services;
        self.until(&format!("service {service}"), config, move || async move {
            gateway
                .describe_services(cluster, services)
                .await
                .map(|out| stable_verdict(&out, service, origin, failure_markers))
        })
        .await
    }

    /// Wait until `service` reports INACTIVE after deletion.
    pub async fn services_inactive(
        &self,
        cluster: &str,
        service: &str,
        config: WaitConfig,
    ) -> Result<()> {
        let gateway = self.gateway;
        let services = [service.to_string()];
        let services = &services;
        self.until(
            &format!("service {service} to drain"),
            config,
            move || async move {
                gateway
                    .describe_services(cluster, services)
                    .await
                    .map(|out| inactive_verdict(&out, service))
            },
        )
        .await
    }

    /// Wait until every task in `tasks` has stopped.
    pub async fn tasks_stopped(
        &self,
        cluster: &str,
        tasks: &[String],
        config: WaitConfig,
    ) -> Result<()> {
        let gateway = self.gateway;
        let target = if tasks.len() == 1 {
            format!("task {}", tasks[0])
        } else {
            format!("{} tasks", tasks.len())
        };
        self.until(&target, config, move || async move {
            gateway
                .describe_tasks(cluster, tasks)
                .await
                .map(|out| stopped_verdict(&out))
        })
        .await
    }
}

fn summarize(service: &Service) -> String {
    format!(
        "{:?}, running {}/{}, {} deployment(s)",
        service.status,
        service.running_count,
        service.desired_count,
        service.deployments.len()
    )
}

pub(crate) fn stable_verdict(
    out: &DescribeServicesOutput,
    service: &str,
    origin: DateTime<Utc>,
    failure_markers: &[String],
) -> (Verdict<Service>, String) {
    if out.failures.iter().any(|f| f.is_missing()) {
        return (
            Verdict::Abort(format!("service {service} is missing")),
            "MISSING".to_string(),
        );
    }
    let Some(found) = out.find(service) else {
        return (Verdict::Pending, "not described".to_string());
    };
    let summary = summarize(found);
    if matches!(found.status, ServiceStatus::Draining | ServiceStatus::Inactive) {
        return (
            Verdict::Abort(format!("service {service} is {:?}", found.status)),
            summary,
        );
    }
    if found.is_stable() {
        return (Verdict::Done(found.clone()), summary);
    }
    if let Some(event) = found.failure_event_after(origin, failure_markers) {
        return (Verdict::Abort(event.message.clone()), summary);
    }
    (Verdict::Pending, summary)
}

pub(crate) fn inactive_verdict(out: &DescribeServicesOutput, service: &str) -> (Verdict<()>, String) {
    if out.failures.iter().any(|f| f.is_missing()) {
        return (
            Verdict::Abort(format!("service {service} is missing")),
            "MISSING".to_string(),
        );
    }
    match out.find(service) {
        Some(found) if found.is_inactive() => (Verdict::Done(()), summarize(found)),
        Some(found) => (Verdict::Pending, summarize(found)),
        None => (Verdict::Pending, "not described".to_string()),
    }
}

pub(crate) fn stopped_verdict(out: &DescribeTasksOutput) -> (Verdict<()>, String) {
    let stopped = out.tasks.iter().filter(|t| t.is_stopped()).count();
    let summary = format!("{stopped}/{} stopped", out.tasks.len());
    if !out.tasks.is_empty() && stopped == out.tasks.len() {
        (Verdict::Done(()), summary)
    } else {
        (Verdict::Pending, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{DeploymentStatus, Failure, ServiceDeployment, ServiceEvent};
    use crate::services::memory_gateway::InMemoryGateway;
    use crate::services::progress::{NoopProgress, RecordingProgress};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn secs(timeout: u64, interval: u64) -> WaitConfig {
        WaitConfig::new(Duration::from_secs(timeout), Duration::from_secs(interval))
    }

    #[test]
    fn schedule_even_division() {
        let schedule = PollSchedule::new(secs(600, 15));
        assert_eq!(schedule.sleeps(), Some(40));
        assert_eq!(schedule.max_polls(), Some(41));
        for attempt in 1..=40 {
            assert_eq!(schedule.delay_after(attempt), Duration::from_secs(15));
        }
        assert_eq!(schedule.total_wait(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn schedule_with_remainder() {
        let schedule = PollSchedule::new(secs(70, 15));
        assert_eq!(schedule.sleeps(), Some(5));
        assert_eq!(schedule.delay_after(1), Duration::from_secs(15));
        assert_eq!(schedule.delay_after(4), Duration::from_secs(15));
        assert_eq!(schedule.delay_after(5), Duration::from_secs(10));
        assert_eq!(schedule.total_wait(), Some(Duration::from_secs(70)));
    }

    #[test]
    fn schedule_total_stays_within_one_interval() {
        for timeout in 1..200u64 {
            for interval in [1u64, 6, 7, 15, 30] {
                let schedule = PollSchedule::new(secs(timeout, interval));
                let total = schedule.total_wait().unwrap().as_secs();
                assert!(total.abs_diff(timeout) < interval, "{timeout}/{interval}");
                assert_eq!(
                    u64::from(schedule.sleeps().unwrap()),
                    timeout.div_ceil(interval)
                );
            }
        }
    }

    #[test]
    fn schedule_timeout_shorter_than_interval() {
        let schedule = PollSchedule::new(secs(10, 15));
        assert_eq!(schedule.max_polls(), Some(2));
        assert_eq!(schedule.delay_after(1), Duration::from_secs(10));
    }

    #[test]
    fn schedule_zero_is_unbounded() {
        let schedule = PollSchedule::new(secs(0, 15));
        assert_eq!(schedule.max_polls(), None);
        assert!(!schedule.is_last(u32::MAX));
        assert_eq!(schedule.delay_after(1_000_000), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn until_times_out_after_budget() {
        let gateway = InMemoryGateway::new();
        let progress = RecordingProgress::new();
        let waiter = Waiter::new(&gateway, &progress);
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let err = waiter
            .until::<(), _, _>("thing", secs(70, 15), move || async move {
                polls.fetch_add(1, Ordering::SeqCst);
                Ok((Verdict::Pending, "nope".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConvergenceTimeout);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert_eq!(progress.lines().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_wait_never_times_out() {
        let gateway = InMemoryGateway::new();
        let waiter = Waiter::new(&gateway, &NoopProgress);
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let value = waiter
            .until("thing", secs(0, 15), move || async move {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 500 {
                    Ok((Verdict::Done(n), String::new()))
                } else {
                    Ok((Verdict::Pending, String::new()))
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 500);
    }

    fn described(events: Vec<ServiceEvent>, running: u32) -> DescribeServicesOutput {
        DescribeServicesOutput {
            services: vec![Service {
                service_name: "web".into(),
                service_arn: "arn:service/main/web".into(),
                cluster_arn: None,
                status: ServiceStatus::Active,
                task_definition: Some("web:2".into()),
                desired_count: 1,
                running_count: running,
                deployments: vec![ServiceDeployment {
                    id: None,
                    status: DeploymentStatus::Primary,
                    task_definition: Some("web:2".into()),
                    desired_count: 1,
                    running_count: running,
                    created_at: None,
                    updated_at: None,
                }],
                events,
            }],
            failures: vec![],
        }
    }

    #[test]
    fn stable_verdict_ignores_stale_failure() {
        let origin = Utc.timestamp_opt(2_000, 0).unwrap();
        let markers = vec!["unable".to_string()];
        let stale = ServiceEvent {
            id: None,
            created_at: Some(Utc.timestamp_opt(1_999, 0).unwrap()),
            message: "(service web) was unable to place a task".into(),
        };
        let (verdict, _) = stable_verdict(&described(vec![stale.clone()], 0), "web", origin, &markers);
        assert_eq!(verdict, Verdict::Pending);

        let mut fresh = stale;
        fresh.created_at = Some(Utc.timestamp_opt(2_001, 0).unwrap());
        let (verdict, _) = stable_verdict(&described(vec![fresh], 0), "web", origin, &markers);
        assert!(matches!(verdict, Verdict::Abort(reason) if reason.contains("unable")));
    }

    #[test]
    fn stable_verdict_matches_by_arn() {
        let origin = Utc.timestamp_opt(0, 0).unwrap();
        let (verdict, _) =
            stable_verdict(&described(vec![], 1), "arn:service/main/web", origin, &[]);
        assert!(matches!(verdict, Verdict::Done(_)));
    }

    #[test]
    fn missing_service_aborts_both_waits() {
        let out = DescribeServicesOutput {
            services: vec![],
            failures: vec![Failure::missing("web")],
        };
        let origin = Utc.timestamp_opt(0, 0).unwrap();
        assert!(matches!(stable_verdict(&out, "web", origin, &[]).0, Verdict::Abort(_)));
        assert!(matches!(inactive_verdict(&out, "web").0, Verdict::Abort(_)));
    }

    #[test]
    fn stopped_verdict_needs_every_task() {
        let mut out: DescribeTasksOutput = serde_json::from_value(serde_json::json!({
            "tasks": [
                {"taskArn": "t1", "lastStatus": "STOPPED"},
                {"taskArn": "t2", "lastStatus": "RUNNING"}
            ]
        }))
        .unwrap();
        assert_eq!(stopped_verdict(&out).0, Verdict::Pending);
        out.tasks[1].last_status = "STOPPED".into();
        assert_eq!(stopped_verdict(&out).0, Verdict::Done(()));
        assert_eq!(stopped_verdict(&DescribeTasksOutput::default()).0, Verdict::Pending);
    }
}
