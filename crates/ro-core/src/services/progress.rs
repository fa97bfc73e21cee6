//! Best-effort progress sinks consumed by the waiter and orchestrator.
//!
//! Reporters never return errors: a reporter that cannot write simply drops
//! the line, and nothing it does may change the outcome of a deployment.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use super::orchestrator::DeployPhase;

/// Where a waiter currently is in its poll budget.
#[derive(Debug, Clone, Copy)]
pub struct PollContext<'a> {
    pub target: &'a str,
    /// 1-based poll number.
    pub attempt: u32,
    /// `None` when waiting without bound.
    pub max_attempts: Option<u32>,
}

pub trait ProgressReporter: Send + Sync {
    fn on_poll_start(&self, _poll: &PollContext<'_>) {}

    /// `observation` summarizes the response seen on this poll.
    fn on_poll_end(&self, _poll: &PollContext<'_>, _observation: &str) {}

    fn on_sleep(&self, _poll: &PollContext<'_>, _delay: Duration) {}

    fn on_wait_finished(&self, _target: &str) {}

    fn on_phase(&self, _phase: DeployPhase) {}

    /// Human-facing warning or hint, e.g. a manual cleanup command.
    fn notice(&self, _message: &str) {}
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {}

/// Prints one `.` per poll, and notices on their own line.
pub struct DotProgress<W: Write + Send> {
    state: Mutex<DotState<W>>,
}

struct DotState<W> {
    out: W,
    dots_pending: bool,
}

impl DotProgress<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> DotProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(DotState {
                out,
                dots_pending: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        match self.state.into_inner() {
            Ok(state) => state.out,
            Err(poisoned) => poisoned.into_inner().out,
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut DotState<W>) -> std::io::Result<()>) {
        if let Ok(mut state) = self.state.lock() {
            let _ = f(&mut state);
        }
    }
}

impl<W: Write + Send> ProgressReporter for DotProgress<W> {
    fn on_poll_start(&self, poll: &PollContext<'_>) {
        if poll.attempt == 1 {
            self.with_state(|s| {
                write!(s.out, "Waiting for {}", poll.target)?;
                s.dots_pending = true;
                s.out.flush()
            });
        }
    }

    fn on_sleep(&self, _poll: &PollContext<'_>, _delay: Duration) {
        self.with_state(|s| {
            write!(s.out, ".")?;
            s.dots_pending = true;
            s.out.flush()
        });
    }

    fn on_wait_finished(&self, _target: &str) {
        self.with_state(|s| {
            if s.dots_pending {
                writeln!(s.out)?;
                s.dots_pending = false;
            }
            s.out.flush()
        });
    }

    fn notice(&self, message: &str) {
        self.with_state(|s| {
            if s.dots_pending {
                writeln!(s.out)?;
                s.dots_pending = false;
            }
            writeln!(s.out, "{message}")?;
            s.out.flush()
        });
    }
}

/// Structured `tracing` lines including the last observed response.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugProgress;

impl ProgressReporter for DebugProgress {
    fn on_poll_end(&self, poll: &PollContext<'_>, observation: &str) {
        tracing::debug!(
            waiting_for = poll.target,
            attempt = poll.attempt,
            max_attempts = ?poll.max_attempts,
            observation,
            "poll finished"
        );
    }

    fn on_sleep(&self, poll: &PollContext<'_>, delay: Duration) {
        tracing::debug!(waiting_for = poll.target, delay_secs = delay.as_secs_f64(), "sleeping");
    }

    fn on_phase(&self, phase: DeployPhase) {
        tracing::debug!(?phase, "phase");
    }

    fn notice(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Keeps the ordered progress log in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
    phases: Mutex<Vec<DeployPhase>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn phases(&self) -> Vec<DeployPhase> {
        self.phases.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl ProgressReporter for RecordingProgress {
    fn on_poll_end(&self, poll: &PollContext<'_>, observation: &str) {
        self.push(format!("poll {} {}: {observation}", poll.target, poll.attempt));
    }

    fn on_phase(&self, phase: DeployPhase) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.push(phase);
        }
    }

    fn notice(&self, message: &str) {
        self.push(message.to_string());
    }
}
