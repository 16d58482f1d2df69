use crate::models::Period;
use crate::scheduler::ScheduleTime;
use crate::workflow::{
    Cancelled, LogSink, ReportWorkflow, RunContext, SessionFactory, Stage, WorkflowOutcome,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SEPARATOR: &str = "==================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    StopRequested,
}

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Scheduled(ScheduleTime),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Manual => write!(f, "manual start"),
            Trigger::Scheduled(time) => write!(f, "scheduled for {}", time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("a run is already in progress")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub period: Period,
    pub outcome: WorkflowOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<PeriodReport>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn downloaded(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_success()).count()
    }
}

/// Run the workflow once per period, each in its own browser session.
///
/// A period's failure never stops the others. The session is always closed
/// before the next period starts. Cancellation ends the loop early.
pub async fn run_periods(
    workflow: &ReportWorkflow,
    factory: &dyn SessionFactory,
    periods: &[Period],
    ctx: &RunContext,
) -> RunSummary {
    let sink = ctx.sink();
    let mut reports = Vec::with_capacity(periods.len());
    let mut cancelled = false;

    for period in periods {
        if ctx.is_cancelled() {
            sink.warn("Stop requested. Skipping the remaining periods.".to_string());
            cancelled = true;
            break;
        }

        sink.info(format!("--- Starting period {} ({}) ---", period, period.file_base_name()));

        let session = match factory.open().await {
            Ok(session) => session,
            Err(e) => {
                let reason = format!("{:#}", e);
                sink.error(format!("❌ Could not open a browser for {}: {}", period, reason));
                reports.push(PeriodReport {
                    period: period.clone(),
                    outcome: WorkflowOutcome::Failed { stage: Stage::Browser, reason },
                });
                continue;
            }
        };

        let result = workflow.run(session.as_ref(), period, ctx).await;

        sink.debug("Closing the browser session for this period".to_string());
        if let Err(e) = session.quit().await {
            sink.warn(format!("⚠️ Browser did not close cleanly: {}", e));
        }

        match result {
            Ok(outcome) => {
                sink.info(format!("--- Finished period {}: {} ---", period, outcome));
                reports.push(PeriodReport {
                    period: period.clone(),
                    outcome,
                });
            }
            Err(Cancelled) => {
                sink.warn(format!("Run interrupted by the operator during {}", period));
                cancelled = true;
                break;
            }
        }
    }

    if let Err(e) = factory.release().await {
        sink.warn(format!("⚠️ Browser driver cleanup warning: {}", e));
    }

    RunSummary { reports, cancelled }
}

struct ActiveRun {
    state: RunState,
    token: Option<CancellationToken>,
}

/// Resets the run state when the run task ends, however it ends.
struct RunGuard {
    active: Arc<Mutex<ActiveRun>>,
    sink: Arc<dyn LogSink>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        active.state = RunState::Idle;
        active.token = None;
        drop(active);
        self.sink.info("Run finished".to_string());
        self.sink.info(SEPARATOR.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The single entry point for starting and stopping runs.
///
/// A one-permit semaphore is the run slot: whoever holds the permit owns the
/// only run in the process. Manual starts and scheduled triggers both go
/// through [`Launcher::try_start`].
pub struct Launcher {
    slot: Arc<Semaphore>,
    active: Arc<Mutex<ActiveRun>>,
    workflow: Arc<ReportWorkflow>,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn LogSink>,
    runtime: Handle,
}

impl Launcher {
    /// Must be called from within a Tokio runtime; runs are spawned on it.
    pub fn new(workflow: ReportWorkflow, factory: Arc<dyn SessionFactory>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            active: Arc::new(Mutex::new(ActiveRun {
                state: RunState::Idle,
                token: None,
            })),
            workflow: Arc::new(workflow),
            factory,
            sink,
            runtime: Handle::current(),
        }
    }

    pub fn state(&self) -> RunState {
        lock(&self.active).state
    }

    pub fn is_running(&self) -> bool {
        self.state() != RunState::Idle
    }

    /// Start a run over the current month and the two before it.
    pub fn try_start(&self, trigger: Trigger) -> Result<JoinHandle<RunSummary>, LaunchError> {
        let today = chrono::Local::now().date_naive();
        self.try_start_with(trigger, Period::recent(today))
    }

    pub fn try_start_with(
        &self,
        trigger: Trigger,
        periods: Vec<Period>,
    ) -> Result<JoinHandle<RunSummary>, LaunchError> {
        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.sink.warn("The automation is already running.".to_string());
                return Err(LaunchError::AlreadyRunning);
            }
        };

        let token = CancellationToken::new();
        {
            let mut active = lock(&self.active);
            active.state = RunState::Running;
            active.token = Some(token.clone());
        }

        self.sink.info(SEPARATOR.to_string());
        self.sink.info(format!("🚀 Starting the automation ({})", trigger));

        let guard = RunGuard {
            active: self.active.clone(),
            sink: self.sink.clone(),
            _permit: permit,
        };
        let workflow = self.workflow.clone();
        let factory = self.factory.clone();
        let sink = self.sink.clone();

        Ok(self.runtime.spawn(async move {
            let _guard = guard;
            let ctx = RunContext::new(token, sink.clone());
            let summary = run_periods(&workflow, factory.as_ref(), &periods, &ctx).await;
            log_summary(sink.as_ref(), &summary);
            summary
        }))
    }

    /// Ask the active run to stop at its next checkpoint.
    ///
    /// Returns `false` when there is nothing to stop.
    pub fn request_stop(&self) -> bool {
        let mut active = lock(&self.active);
        if active.state != RunState::Running {
            return false;
        }
        match &active.token {
            Some(token) => {
                token.cancel();
                active.state = RunState::StopRequested;
                drop(active);
                self.sink.warn("Stop signal sent. Waiting for the current step to finish...".to_string());
                true
            }
            None => false,
        }
    }
}

fn log_summary(sink: &dyn LogSink, summary: &RunSummary) {
    for report in &summary.reports {
        let line = format!("{}: {}", report.period.file_base_name(), report.outcome);
        if report.outcome.is_success() {
            sink.success(line);
        } else {
            sink.warn(line);
        }
    }

    if summary.cancelled {
        sink.warn("Automation interrupted.".to_string());
    } else {
        sink.success(format!(
            "🏁 Automation finished: {}/{} reports downloaded",
            summary.downloaded(),
            summary.reports.len()
        ));
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::config::Credentials;
    use crate::workflow::{PortalSettings, WorkflowTimings};
    use std::path::Path;

    pub fn workflow(dir: &Path, timings: WorkflowTimings) -> ReportWorkflow {
        ReportWorkflow::new(
            PortalSettings {
                url: "https://portal.test/login".to_string(),
                credentials: Credentials::default(),
                download_dir: dir.to_path_buf(),
            },
            timings,
        )
    }

    /// Timings where the grace period is long enough to keep a run busy.
    pub fn slow_timings() -> WorkflowTimings {
        let mut timings = WorkflowTimings::immediate();
        timings.grace_period = std::time::Duration::from_secs(600);
        timings
    }
}
