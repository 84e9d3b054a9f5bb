//! Recurring tasks with at most one execution in flight per task.
//!
//! Every registered task is driven by its own actor owning the timer. The actor waits for the
//! timer, a trigger request or shutdown, runs the task's unit of work and records the outcome
//! in the task's [`TaskRunRecord`](crate::storage::entities::TaskRunRecord).

use std::fmt::{self, Display};
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::select;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config;
use crate::jobs::JobError;
use crate::storage::Storage;

/// Status stored for a successful run.
pub const COMPLETED_STATUS: &str = "Task completed successfully";

/// A unit of work run by the scheduler.
pub trait Work: Send + Sync + 'static {
    /// Whether the external account the work depends on has been set up.
    fn is_configured(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Performs one run. Should return [`JobError::Cancelled`] soon after `cancel` fires.
    fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), JobError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub interval: Duration,

    /// Delay before the first run if the task is overdue at startup.
    pub overdue_delay: Duration,
}

impl TaskSchedule {
    pub fn new(interval: config::Duration, overdue_delay: config::Duration) -> Self {
        Self {
            interval: interval.into(),
            overdue_delay: overdue_delay.into(),
        }
    }
}

/// Computes how long to wait before the first run of a task.
///
/// A task that never ran is due immediately. Otherwise it is due one interval after its last
/// run, or after `overdue_delay` if that moment has already passed.
pub fn initial_delay(
    last_ran: Option<OffsetDateTime>,
    now: OffsetDateTime,
    interval: Duration,
    overdue_delay: Duration,
) -> Duration {
    let Some(last_ran) = last_ran else {
        return Duration::ZERO;
    };

    let interval_signed = time::Duration::try_from(interval).unwrap_or(time::Duration::MAX);
    let remaining = interval_signed.saturating_sub(now - last_ran);

    if remaining.is_negative() {
        return overdue_delay;
    }

    // a last run in the future (clock skew) must not push the task out past one interval
    Duration::try_from(remaining)
        .map(|remaining| remaining.min(interval))
        .unwrap_or(overdue_delay)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

#[derive(Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn stop(&self) {
        self.0.store(TaskState::Stopped as u8, Ordering::Release);
    }
}

/// Puts the task back into the idle state when a run ends, however it ends.
struct RunningGuard(Arc<StateCell>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        // a no-op if the task was stopped in the meantime
        self.0.transition(TaskState::Running, TaskState::Idle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerError {
    AlreadyRunning,
    Stopped,
}

impl Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "the task is already running"),
            Self::Stopped => write!(f, "the task has been stopped"),
        }
    }
}

impl std::error::Error for TriggerError {}

/// A registered task, as seen from the outside.
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    schedule: TaskSchedule,
    state: Arc<StateCell>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> TaskSchedule {
        self.schedule
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Requests an immediate run without changing the task's interval.
    pub fn trigger(&self) -> Result<(), TriggerError> {
        match self.state.get() {
            TaskState::Running => {
                info!(
                    task = %self.name,
                    "Requested to run now, but the task is already running; skipping"
                );

                Err(TriggerError::AlreadyRunning)
            }

            TaskState::Stopped => Err(TriggerError::Stopped),

            TaskState::Idle => {
                self.trigger.notify_one();
                info!(task = %self.name, "Requested to run now");

                Ok(())
            }
        }
    }

    /// Disables the timer and asks an in-flight run to wind down.
    pub fn stop(&self) {
        info!(task = %self.name, "Stopping the task");
        self.state.stop();
        self.cancel.cancel();
    }
}

pub struct Scheduler {
    storage: Arc<Storage>,
    cancel: CancellationToken,
    handles: Vec<TaskHandle>,
    runners: JoinSet<()>,
}

impl Scheduler {
    pub fn new(storage: Arc<Storage>, cancel: CancellationToken) -> Self {
        Self {
            storage,
            cancel,
            handles: Vec::new(),
            runners: JoinSet::new(),
        }
    }

    /// Registers a task and arms its timer.
    #[instrument(level = "DEBUG", skip(self, schedule, work))]
    pub async fn start<W: Work>(
        &mut self,
        name: &str,
        schedule: TaskSchedule,
        work: W,
    ) -> Result<TaskHandle> {
        let mut tx = self.storage.begin().await?;
        let record = tx.get_or_create_task(name).await?;
        tx.commit().await?;

        let delay = initial_delay(
            record.last_ran,
            OffsetDateTime::now_utc(),
            schedule.interval,
            schedule.overdue_delay,
        );

        match record.last_ran {
            Some(last_ran) => info!(
                task = %name,
                %last_ran,
                "The task last ran at {last_ran}; scheduling the next run in {}",
                config::Duration::from(delay),
            ),

            None => info!(task = %name, "The task has never run; scheduling it now"),
        }

        let handle = TaskHandle {
            name: name.into(),
            schedule,
            state: Default::default(),
            trigger: Default::default(),
            cancel: self.cancel.child_token(),
        };
        let runner = Runner {
            handle: handle.clone(),
            storage: self.storage.clone(),
            work,
        };

        self.runners
            .spawn(runner.run(delay).instrument(info_span!("task", name = %name)));
        self.handles.push(handle.clone());

        Ok(handle)
    }

    /// Waits for shutdown, stops every task and waits for them to exit.
    pub async fn run(mut self) -> Result<()> {
        self.cancel.cancelled().await;

        for handle in &self.handles {
            handle.stop();
        }

        debug!("Waiting for the tasks to stop");

        while let Some(result) = self.runners.join_next().await {
            if let Err(e) = result {
                error!("A task runner terminated abnormally: {e}");
            }
        }

        Ok(())
    }
}

struct Runner<W> {
    handle: TaskHandle,
    storage: Arc<Storage>,
    work: W,
}

impl<W: Work> Runner<W> {
    async fn run(mut self, initial_delay: Duration) {
        let mut next_run = pin!(sleep(initial_delay));
        let cancel = self.handle.cancel.clone();
        let trigger = self.handle.trigger.clone();

        loop {
            select! {
                _ = cancel.cancelled() => {
                    debug!("Received a cancellation signal; exiting");
                    break;
                }

                _ = trigger.notified() => {
                    let preempted_by = next_run
                        .deadline()
                        .saturating_duration_since(Instant::now())
                        .as_secs();
                    info!(
                        "Received a request to run now \
                            (preempted the next scheduled run by {preempted_by}s)"
                    );
                }

                _ = &mut next_run => {}
            }

            let started_at = Instant::now();
            self.execute_once().await;

            let interval = self.handle.schedule.interval;
            debug!(
                "Scheduling the next run in {}",
                config::Duration::from(interval)
            );
            next_run.as_mut().reset(started_at + interval);
        }

        self.handle.state.stop();
    }

    async fn execute_once(&mut self) {
        if !self
            .handle
            .state
            .transition(TaskState::Idle, TaskState::Running)
        {
            debug!("The task is not idle; skipping the run");
            return;
        }

        let _running = RunningGuard(self.handle.state.clone());

        // a trigger accepted just before the transition is served by this run
        select! {
            biased;

            _ = self.handle.trigger.notified() => {
                debug!("Dropping a run request that arrived while the run was starting");
            }

            _ = std::future::ready(()) => {}
        }

        match self.work.is_configured().await {
            Ok(true) => {}

            Ok(false) => {
                warn!("The task wanted to run but the catalog account hasn't been set up; skipping");
                return;
            }

            Err(e) => {
                error!("Could not check whether the catalog account has been set up: {e:#}");
                return;
            }
        }

        info!("Running the task");

        let (success, status) = match self.work.run(&self.handle.cancel).await {
            Ok(()) => {
                info!("The task completed successfully");

                (true, COMPLETED_STATUS.to_owned())
            }

            Err(JobError::Cancelled) => {
                info!("The task was cancelled before it could finish");

                return;
            }

            Err(e) => {
                error!("The task failed: {e:#}");

                (false, format!("{e:#}"))
            }
        };

        if let Err(e) = self.record_run(success, &status).await {
            error!("Could not record the outcome of the task: {e:#}");
        }
    }

    async fn record_run(&self, success: bool, status: &str) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        tx.record_task_run(
            self.handle.name(),
            OffsetDateTime::now_utc(),
            success,
            status,
        )
        .await?;
        tx.commit().await
    }
}
