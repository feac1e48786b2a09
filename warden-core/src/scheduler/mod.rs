//! Scheduled security task runner
//!
//! A single ticker decides what is due. Each due task is dispatched as its
//! own tokio task, so a slow audit never delays a cheap cleanup. Per task
//! type at most one run is in flight: the status is flipped to `Running`
//! under the registry write lock before dispatch, and both the ticker and
//! [`SecurityScheduler::run_task_now`] respect it.
//!
//! ```text
//! Pending ──▶ Running ──▶ Completed ─┐
//!    ▲                 └─▶ Failed ────┤
//!    └──────── next_run = finish + interval
//! ```
//!
//! `Completed` and `Failed` are recorded in the execution log and in
//! [`ScheduledTask::last_status`]; the task itself is back to `Pending` as
//! soon as its outcome is stored.
//!
//! Every run is bounded by the task's timeout. Errors, panics and timeouts
//! are recorded as `Failed` in the execution log and never stop other tasks
//! or the next run of the same task.

pub mod history;
pub mod routine;

pub use history::{ExecutionHistory, TaskExecution, TaskTrigger};
pub use routine::{
    IpBlockCleanupRoutine, RetentionPolicy, TaskContext, TaskRoutine, TokenCleanupRoutine,
    routine_fn,
};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    Error,
    clock::SharedClock,
    error::SchedulerError,
    events::{EventBus, SecurityEvent},
};

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;
const MINUTE: u64 = 60;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SecurityAudit,
    VulnerabilityScan,
    SessionCleanup,
    TokenCleanup,
    AuditLogCleanup,
    IpBlockCleanup,
    PasswordExpiryCheck,
    InactiveAccountCheck,
    TableMaintenance,
    ReportGeneration,
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::SecurityAudit,
        TaskType::VulnerabilityScan,
        TaskType::SessionCleanup,
        TaskType::TokenCleanup,
        TaskType::AuditLogCleanup,
        TaskType::IpBlockCleanup,
        TaskType::PasswordExpiryCheck,
        TaskType::InactiveAccountCheck,
        TaskType::TableMaintenance,
        TaskType::ReportGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SecurityAudit => "security_audit",
            TaskType::VulnerabilityScan => "vulnerability_scan",
            TaskType::SessionCleanup => "session_cleanup",
            TaskType::TokenCleanup => "token_cleanup",
            TaskType::AuditLogCleanup => "audit_log_cleanup",
            TaskType::IpBlockCleanup => "ip_block_cleanup",
            TaskType::PasswordExpiryCheck => "password_expiry_check",
            TaskType::InactiveAccountCheck => "inactive_account_check",
            TaskType::TableMaintenance => "table_maintenance",
            TaskType::ReportGeneration => "report_generation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TaskType::SecurityAudit => "Run a full security audit",
            TaskType::VulnerabilityScan => "Scan for known vulnerabilities",
            TaskType::SessionCleanup => "Remove expired sessions",
            TaskType::TokenCleanup => "Purge expired token revocations",
            TaskType::AuditLogCleanup => "Delete audit log entries past retention",
            TaskType::IpBlockCleanup => "Delete expired blocks and old login attempts",
            TaskType::PasswordExpiryCheck => "Flag passwords past their maximum age",
            TaskType::InactiveAccountCheck => "Flag accounts inactive past the threshold",
            TaskType::TableMaintenance => "Run storage table maintenance",
            TaskType::ReportGeneration => "Generate the periodic security report",
        }
    }

    pub fn default_interval(&self) -> Duration {
        let secs = match self {
            TaskType::SecurityAudit => DAY,
            TaskType::VulnerabilityScan => 7 * DAY,
            TaskType::SessionCleanup => HOUR,
            TaskType::TokenCleanup => HOUR,
            TaskType::AuditLogCleanup => DAY,
            TaskType::IpBlockCleanup => HOUR,
            TaskType::PasswordExpiryCheck => DAY,
            TaskType::InactiveAccountCheck => DAY,
            TaskType::TableMaintenance => 7 * DAY,
            TaskType::ReportGeneration => DAY,
        };
        Duration::from_secs(secs)
    }

    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            TaskType::SecurityAudit => 30 * MINUTE,
            TaskType::VulnerabilityScan => HOUR,
            TaskType::SessionCleanup => 5 * MINUTE,
            TaskType::TokenCleanup => 5 * MINUTE,
            TaskType::AuditLogCleanup => 15 * MINUTE,
            TaskType::IpBlockCleanup => 5 * MINUTE,
            TaskType::PasswordExpiryCheck => 10 * MINUTE,
            TaskType::InactiveAccountCheck => 10 * MINUTE,
            TaskType::TableMaintenance => HOUR,
            TaskType::ReportGeneration => 30 * MINUTE,
        };
        Duration::from_secs(secs)
    }

    /// Name used in environment variable keys, e.g. `SECURITY_AUDIT`.
    pub fn env_key(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| SchedulerError::UnknownTaskType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Registry record for one task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_type: TaskType,
    pub description: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub enabled: bool,
    pub status: TaskStatus,
    /// Outcome of the most recent finished run
    pub last_status: Option<TaskStatus>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub failure_count: u64,
}

impl ScheduledTask {
    fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.status != TaskStatus::Running && self.next_run <= now
    }
}

/// Per task type overrides of the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOverride {
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the registry is scanned for due tasks
    pub tick: Duration,
    pub history_capacity: usize,
    pub retention: RetentionPolicy,
    pub overrides: HashMap<TaskType, TaskOverride>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            history_capacity: 100,
            retention: RetentionPolicy::default(),
            overrides: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_override(mut self, task_type: TaskType, task_override: TaskOverride) -> Self {
        self.overrides.insert(task_type, task_override);
        self
    }
}

fn after(at: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| at.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct TaskSlot {
    task: ScheduledTask,
    routine: Arc<dyn TaskRoutine>,
}

/// A run that has been marked `Running` and must be executed.
struct Dispatch {
    task_type: TaskType,
    routine: Arc<dyn TaskRoutine>,
    timeout: Duration,
    trigger: TaskTrigger,
    started_at: DateTime<Utc>,
}

struct SchedulerInner {
    tasks: RwLock<HashMap<TaskType, TaskSlot>>,
    history: RwLock<ExecutionHistory>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    config: SchedulerConfig,
    clock: SharedClock,
    events: EventBus,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerInner {
    async fn tick(self: &Arc<Self>) -> usize {
        let now = self.clock.now();
        let due: Vec<Dispatch> = {
            let mut tasks = self.tasks.write().await;
            tasks
                .values_mut()
                .filter(|slot| slot.task.is_due_at(now))
                .map(|slot| Self::mark_running(slot, TaskTrigger::Scheduled, now))
                .collect()
        };

        let count = due.len();
        for dispatch in due {
            self.spawn(dispatch);
        }
        count
    }

    fn mark_running(slot: &mut TaskSlot, trigger: TaskTrigger, now: DateTime<Utc>) -> Dispatch {
        slot.task.status = TaskStatus::Running;
        slot.task.last_run = Some(now);
        Dispatch {
            task_type: slot.task.task_type,
            routine: Arc::clone(&slot.routine),
            timeout: slot.task.timeout,
            trigger,
            started_at: now,
        }
    }

    fn spawn(self: &Arc<Self>, dispatch: Dispatch) {
        tracing::debug!(task = %dispatch.task_type, trigger = ?dispatch.trigger, "Dispatching scheduled task");

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.execute(dispatch).await });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn execute(&self, dispatch: Dispatch) {
        let Dispatch {
            task_type,
            routine,
            timeout,
            trigger,
            started_at,
        } = dispatch;

        let ctx = TaskContext::new(
            task_type,
            started_at,
            self.config.retention.clone(),
            self.shutdown_tx.subscribe(),
        );
        let mut run = tokio::spawn(async move { routine.run(ctx).await });

        let outcome = match tokio::time::timeout(timeout, &mut run).await {
            Ok(Ok(Ok(summary))) => Ok(summary),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) if join_error.is_panic() => Err("Task panicked".to_string()),
            Ok(Err(_)) => Err("Task was cancelled".to_string()),
            Err(_) => {
                run.abort();
                Err(format!("Task timed out after {}s", timeout.as_secs_f64()))
            }
        };

        self.finish(task_type, trigger, started_at, outcome).await;
    }

    async fn finish(
        &self,
        task_type: TaskType,
        trigger: TaskTrigger,
        started_at: DateTime<Utc>,
        outcome: Result<String, String>,
    ) {
        let finished_at = self.clock.now();
        let status = if outcome.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };

        if let Some(slot) = self.tasks.write().await.get_mut(&task_type) {
            let task = &mut slot.task;
            task.status = TaskStatus::Pending;
            task.last_status = Some(status);
            task.next_run = after(finished_at, task.interval);
            task.run_count += 1;
            match &outcome {
                Ok(_) => task.last_error = None,
                Err(e) => {
                    task.failure_count += 1;
                    task.last_error = Some(e.clone());
                }
            }
        }

        let duration = (finished_at - started_at).to_std().unwrap_or_default();
        let (result, error) = match outcome {
            Ok(summary) => {
                tracing::info!(task = %task_type, duration_ms = duration.as_millis() as u64, result = %summary, "Scheduled task completed");
                (Some(summary), None)
            }
            Err(e) => {
                tracing::error!(task = %task_type, error = %e, "Scheduled task failed");
                self.events
                    .publish(SecurityEvent::ScheduledTaskFailed {
                        task_type,
                        error: e.clone(),
                        timestamp: finished_at,
                    })
                    .await;
                (None, Some(e))
            }
        };

        self.history.write().await.push(TaskExecution {
            task_type,
            trigger,
            started_at,
            finished_at,
            duration,
            status,
            result,
            error,
        });
    }

    async fn wait_idle(&self) {
        loop {
            let handles =
                std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Scheduled task bookkeeping failed");
                }
            }
        }
    }
}

/// Registry and driver of periodic security tasks.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = SecurityScheduler::new(SchedulerConfig::default(), events, clock);
/// scheduler
///     .register(TaskType::SecurityAudit, routine_fn(|ctx| async move { run_audit(ctx).await }))
///     .await?;
/// scheduler.start()?;
///
/// // operator controls
/// scheduler.run_task_now(TaskType::SecurityAudit).await?;
/// scheduler.disable_task(TaskType::SecurityAudit).await?;
///
/// scheduler.shutdown().await;
/// ```
pub struct SecurityScheduler {
    inner: Arc<SchedulerInner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SecurityScheduler {
    pub fn new(config: SchedulerConfig, events: EventBus, clock: SharedClock) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: RwLock::new(HashMap::new()),
                history: RwLock::new(ExecutionHistory::new(config.history_capacity)),
                in_flight: Mutex::new(Vec::new()),
                config,
                clock,
                events,
                shutdown_tx,
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register the routine for a task type.
    ///
    /// Each type can be registered once. The first run is due one interval
    /// from now.
    pub async fn register(
        &self,
        task_type: TaskType,
        routine: Arc<dyn TaskRoutine>,
    ) -> Result<(), Error> {
        let overrides = self
            .inner
            .config
            .overrides
            .get(&task_type)
            .cloned()
            .unwrap_or_default();
        let interval = overrides
            .interval
            .unwrap_or_else(|| task_type.default_interval());

        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&task_type) {
            return Err(SchedulerError::AlreadyRegistered(task_type).into());
        }

        let task = ScheduledTask {
            task_type,
            description: task_type.description().to_string(),
            interval,
            timeout: overrides
                .timeout
                .unwrap_or_else(|| task_type.default_timeout()),
            enabled: overrides.enabled.unwrap_or(true),
            status: TaskStatus::Pending,
            last_status: None,
            last_run: None,
            next_run: after(self.inner.clock.now(), interval),
            last_error: None,
            run_count: 0,
            failure_count: 0,
        };

        tracing::info!(
            task = %task_type,
            interval_secs = task.interval.as_secs(),
            enabled = task.enabled,
            "Registered scheduled task"
        );
        tasks.insert(task_type, TaskSlot { task, routine });
        Ok(())
    }

    /// Start the driving loop.
    pub fn start(&self) -> Result<(), Error> {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            return Err(SchedulerError::AlreadyRunning.into());
        }

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let period = self.inner.config.tick;

        *driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(tick_secs = period.as_secs(), "Starting security scheduler");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.tick().await;
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down security scheduler");
                        break;
                    }
                }
            }
        }));

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Scan the registry once and dispatch every due task.
    ///
    /// Returns the number of tasks dispatched.
    pub async fn tick(&self) -> usize {
        self.inner.tick().await
    }

    /// Run a task now, ignoring its schedule.
    ///
    /// Returns `Ok(false)` without running anything if the task is already
    /// running. A disabled task is rejected.
    pub async fn run_task_now(&self, task_type: TaskType) -> Result<bool, Error> {
        let dispatch = {
            let mut tasks = self.inner.tasks.write().await;
            let slot = tasks
                .get_mut(&task_type)
                .ok_or(SchedulerError::NotRegistered(task_type))?;

            if !slot.task.enabled {
                return Err(SchedulerError::TaskDisabled(task_type).into());
            }
            if slot.task.status == TaskStatus::Running {
                tracing::debug!(task = %task_type, "Task already running, manual run skipped");
                return Ok(false);
            }

            SchedulerInner::mark_running(slot, TaskTrigger::Manual, self.inner.clock.now())
        };

        self.inner.spawn(dispatch);
        Ok(true)
    }

    pub async fn enable_task(&self, task_type: TaskType) -> Result<(), Error> {
        self.set_enabled(task_type, true).await
    }

    /// Disable a task. A run already in flight finishes normally.
    pub async fn disable_task(&self, task_type: TaskType) -> Result<(), Error> {
        self.set_enabled(task_type, false).await
    }

    async fn set_enabled(&self, task_type: TaskType, enabled: bool) -> Result<(), Error> {
        let mut tasks = self.inner.tasks.write().await;
        let slot = tasks
            .get_mut(&task_type)
            .ok_or(SchedulerError::NotRegistered(task_type))?;
        slot.task.enabled = enabled;

        tracing::info!(task = %task_type, enabled = enabled, "Updated scheduled task");
        Ok(())
    }

    /// Current state of every registered task, in task type order.
    pub async fn status(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<_> = self
            .inner
            .tasks
            .read()
            .await
            .values()
            .map(|slot| slot.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.task_type);
        tasks
    }

    pub async fn task(&self, task_type: TaskType) -> Option<ScheduledTask> {
        self.inner
            .tasks
            .read()
            .await
            .get(&task_type)
            .map(|slot| slot.task.clone())
    }

    /// The bounded execution log, oldest first.
    pub async fn history(&self) -> Vec<TaskExecution> {
        self.inner.history.read().await.to_vec()
    }

    /// Wait until every dispatched run has been recorded.
    pub async fn wait_idle(&self) {
        self.inner.wait_idle().await;
    }

    /// Stop the driving loop and wait for in-flight bookkeeping.
    ///
    /// Routines see the cancellation through [`TaskContext::cancelled`]. A
    /// routine that ignores it keeps its slot until its timeout fires.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "Security scheduler loop failed");
            }
        }

        self.inner.wait_idle().await;
        tracing::info!("Security scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::error::TaskError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn scheduler(config: SchedulerConfig) -> (SecurityScheduler, MockClock) {
        let _ = tracing_subscriber::fmt().try_init();
        let clock = MockClock::new();
        let scheduler = SecurityScheduler::new(config, EventBus::default(), Arc::new(clock.clone()));
        (scheduler, clock)
    }

    fn counting_routine(counter: Arc<AtomicUsize>) -> Arc<dyn TaskRoutine> {
        routine_fn(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>("done".to_string())
            }
        })
    }

    fn failing_routine() -> Arc<dyn TaskRoutine> {
        routine_fn(|_ctx| async move { Err::<String, _>(TaskError::Failed("disk full".to_string())) })
    }

    fn minute_interval() -> TaskOverride {
        TaskOverride {
            interval: Some(Duration::from_secs(60)),
            ..TaskOverride::default()
        }
    }

    #[test]
    fn test_task_type_names() {
        assert_eq!(TaskType::SecurityAudit.to_string(), "security_audit");
        assert_eq!(TaskType::IpBlockCleanup.env_key(), "IP_BLOCK_CLEANUP");
        assert_eq!(
            "Token-Cleanup".parse::<TaskType>().unwrap(),
            TaskType::TokenCleanup
        );
        for task_type in TaskType::ALL {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
            assert!(!task_type.description().is_empty());
            assert!(task_type.default_timeout() < task_type.default_interval());
        }
    }

    #[test]
    fn test_unknown_task_type_is_rejected() {
        let err = "nightly_backup".parse::<TaskType>().unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UnknownTaskType("nightly_backup".to_string())
        );
    }

    #[tokio::test]
    async fn test_register_once_per_type() {
        let (scheduler, clock) = scheduler(SchedulerConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .register(TaskType::TokenCleanup, counting_routine(counter.clone()))
            .await
            .unwrap();
        let err = scheduler
            .register(TaskType::TokenCleanup, counting_routine(counter))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Scheduler(SchedulerError::AlreadyRegistered(TaskType::TokenCleanup))
        ));

        let status = scheduler.status().await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].status, TaskStatus::Pending);
        assert_eq!(status[0].next_run, clock.now() + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_tick_dispatches_only_due_tasks() {
        let config = SchedulerConfig::default().with_override(TaskType::TokenCleanup, minute_interval());
        let (scheduler, clock) = scheduler(config);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(TaskType::TokenCleanup, counting_routine(counter.clone()))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await, 0);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(scheduler.tick().await, 1);
        scheduler.wait_idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let task = scheduler.task(TaskType::TokenCleanup).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.last_status, Some(TaskStatus::Completed));
        assert_eq!(task.next_run, clock.now() + chrono::Duration::seconds(60));
        assert_eq!(task.run_count, 1);

        // Not due again until another interval passes
        assert_eq!(scheduler.tick().await, 0);

        let history = scheduler.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result.as_deref(), Some("done"));
        assert_eq!(history[0].trigger, TaskTrigger::Scheduled);
    }

    #[tokio::test]
    async fn test_disabled_task_never_runs() {
        let config = SchedulerConfig::default().with_override(TaskType::SecurityAudit, minute_interval());
        let (scheduler, clock) = scheduler(config);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(TaskType::SecurityAudit, counting_routine(counter.clone()))
            .await
            .unwrap();
        scheduler.disable_task(TaskType::SecurityAudit).await.unwrap();

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(scheduler.tick().await, 0);
        let err = scheduler
            .run_task_now(TaskType::SecurityAudit)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Scheduler(SchedulerError::TaskDisabled(TaskType::SecurityAudit))
        ));
        assert_eq!(
            scheduler.task(TaskType::SecurityAudit).await.unwrap().status,
            TaskStatus::Pending
        );

        scheduler.enable_task(TaskType::SecurityAudit).await.unwrap();
        assert_eq!(scheduler.tick().await, 1);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_now_respects_reentrancy_guard() {
        let (scheduler, _clock) = scheduler(SchedulerConfig::default());
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let routine = {
            let release = Arc::clone(&release);
            let runs = Arc::clone(&runs);
            routine_fn(move |_ctx| {
                let release = Arc::clone(&release);
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok::<_, TaskError>("released".to_string())
                }
            })
        };
        scheduler
            .register(TaskType::VulnerabilityScan, routine)
            .await
            .unwrap();

        assert!(scheduler.run_task_now(TaskType::VulnerabilityScan).await.unwrap());
        assert!(!scheduler.run_task_now(TaskType::VulnerabilityScan).await.unwrap());
        assert_eq!(
            scheduler.task(TaskType::VulnerabilityScan).await.unwrap().status,
            TaskStatus::Running
        );

        // notify_one stores a permit if the routine has not reached the await yet
        release.notify_one();
        scheduler.wait_idle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let history = scheduler.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger, TaskTrigger::Manual);
    }

    #[tokio::test]
    async fn test_run_now_on_unregistered_task() {
        let (scheduler, _clock) = scheduler(SchedulerConfig::default());
        let err = scheduler
            .run_task_now(TaskType::ReportGeneration)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Scheduler(SchedulerError::NotRegistered(TaskType::ReportGeneration))
        ));
        assert!(scheduler.enable_task(TaskType::ReportGeneration).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let config = SchedulerConfig::default()
            .with_override(TaskType::AuditLogCleanup, minute_interval())
            .with_override(TaskType::TokenCleanup, minute_interval());
        let (scheduler, clock) = scheduler(config);
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .register(TaskType::AuditLogCleanup, failing_routine())
            .await
            .unwrap();
        scheduler
            .register(TaskType::TokenCleanup, counting_routine(counter.clone()))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(scheduler.tick().await, 2);
        scheduler.wait_idle().await;

        let failed = scheduler.task(TaskType::AuditLogCleanup).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Pending);
        assert_eq!(failed.last_status, Some(TaskStatus::Failed));
        assert_eq!(failed.last_error.as_deref(), Some("disk full"));
        assert_eq!(failed.failure_count, 1);
        assert_eq!(failed.next_run, clock.now() + chrono::Duration::seconds(60));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The failed task runs again on its next interval
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(scheduler.tick().await, 2);
        scheduler.wait_idle().await;
        assert_eq!(
            scheduler.task(TaskType::AuditLogCleanup).await.unwrap().run_count,
            2
        );

        let failures: Vec<_> = scheduler
            .history()
            .await
            .into_iter()
            .filter(|e| !e.succeeded())
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].error.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_panicking_routine_is_recorded_as_failed() {
        let (scheduler, _clock) = scheduler(SchedulerConfig::default());
        let routine = routine_fn(|_ctx| async move {
            if true {
                panic!("routine exploded");
            }
            Ok::<_, TaskError>(String::new())
        });
        scheduler
            .register(TaskType::TableMaintenance, routine)
            .await
            .unwrap();

        scheduler.run_task_now(TaskType::TableMaintenance).await.unwrap();
        scheduler.wait_idle().await;

        let task = scheduler.task(TaskType::TableMaintenance).await.unwrap();
        assert_eq!(task.last_status, Some(TaskStatus::Failed));
        assert_eq!(task.last_error.as_deref(), Some("Task panicked"));
    }

    #[tokio::test]
    async fn test_timed_out_routine_is_recorded_as_failed() {
        let config = SchedulerConfig::default().with_override(
            TaskType::SecurityAudit,
            TaskOverride {
                timeout: Some(Duration::from_millis(50)),
                ..TaskOverride::default()
            },
        );
        let (scheduler, _clock) = scheduler(config);
        let routine = routine_fn(|_ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, TaskError>("finished".to_string())
        });
        scheduler
            .register(TaskType::SecurityAudit, routine)
            .await
            .unwrap();

        scheduler.run_task_now(TaskType::SecurityAudit).await.unwrap();
        scheduler.wait_idle().await;

        let task = scheduler.task(TaskType::SecurityAudit).await.unwrap();
        assert_eq!(task.last_status, Some(TaskStatus::Failed));
        assert!(task.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (scheduler, _clock) = scheduler(SchedulerConfig::default().with_history_capacity(3));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(TaskType::SessionCleanup, counting_routine(counter.clone()))
            .await
            .unwrap();

        for _ in 0..5 {
            scheduler.run_task_now(TaskType::SessionCleanup).await.unwrap();
            scheduler.wait_idle().await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = SchedulerConfig::default()
            .with_tick(Duration::from_millis(10))
            .with_override(TaskType::TokenCleanup, minute_interval());
        let (scheduler, clock) = scheduler(config);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(TaskType::TokenCleanup, counting_routine(counter.clone()))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(61));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.start().is_err());

        for _ in 0..100 {
            if !scheduler.history().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_routines() {
        let (scheduler, _clock) = scheduler(SchedulerConfig::default());
        let routine = routine_fn(|mut ctx| async move {
            ctx.cancelled().await;
            Ok::<_, TaskError>("stopped early".to_string())
        });
        scheduler
            .register(TaskType::ReportGeneration, routine)
            .await
            .unwrap();

        scheduler.run_task_now(TaskType::ReportGeneration).await.unwrap();
        scheduler.shutdown().await;

        let history = scheduler.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result.as_deref(), Some("stopped early"));
    }
}
