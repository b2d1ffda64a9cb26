use super::executor::{CycleOutcome, TaskRunner};
use super::task::{PollingTask, TaskState};
use crate::config::PollerConfig;
use crate::sink::SinkHandle;
use crate::snmp::QueryClient;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Timing knobs for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// How often due tasks are checked
    pub tick: Duration,
    pub query_timeout: Duration,
    pub shutdown_grace: Duration,
    pub failure_threshold: u32,
}

impl SchedulerOptions {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            shutdown_grace: config.shutdown_grace(),
            failure_threshold: config.failure_threshold,
            ..Self::default()
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            query_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            failure_threshold: 1,
        }
    }
}

type CycleHandle = JoinHandle<(Box<TaskRunner>, CycleOutcome)>;

/// The runner lives in exactly one place: parked here between cycles, or
/// inside the spawned cycle while it runs.
enum Slot {
    Idle(Box<TaskRunner>),
    Running(CycleHandle),
    Failed,
}

struct ScheduledTask {
    task: PollingTask,
    slot: Slot,
}

/// Fires every polling task on its own fixed interval.
///
/// The tick loop only spawns and reaps cycles; it never awaits a fetch, so
/// a stalled target cannot hold up any other task.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        tasks: Vec<PollingTask>,
        client: Arc<dyn QueryClient>,
        sink: SinkHandle,
        options: SchedulerOptions,
    ) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| {
                let runner = TaskRunner::new(
                    Arc::clone(&task.target),
                    task.group.clone(),
                    Arc::clone(&client),
                    sink.clone(),
                    options.query_timeout,
                    options.failure_threshold,
                );
                ScheduledTask {
                    task,
                    slot: Slot::Idle(Box::new(runner)),
                }
            })
            .collect();

        Self { tasks, options }
    }

    /// Run until the shutdown channel flips to true (or its sender is
    /// dropped), then give in-flight cycles the grace period to finish.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started with {} tasks (tick: {:?})",
            self.tasks.len(),
            self.options.tick
        );

        let mut ticker = interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping scheduler");
                        break;
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Reap finished cycles, then start every task whose slot has arrived
    pub fn tick(&mut self, now: Instant) {
        for entry in self.tasks.iter_mut() {
            entry.reap();

            if !entry.task.is_due(now) {
                continue;
            }

            match std::mem::replace(&mut entry.slot, Slot::Failed) {
                Slot::Idle(mut runner) => {
                    entry.slot = Slot::Running(tokio::spawn(async move {
                        let outcome = runner.run_cycle().await;
                        (runner, outcome)
                    }));
                    let skipped = entry.task.advance(now);
                    if skipped > 0 {
                        warn!(
                            "{}: skipped {} missed slot(s), next run in {:?}",
                            entry.task.id,
                            skipped,
                            entry.task.next_due.saturating_duration_since(now)
                        );
                    }
                }
                Slot::Running(handle) => {
                    entry.slot = Slot::Running(handle);
                    entry.task.advance(now);
                    warn!(
                        "{}: previous cycle still running, skipping this slot",
                        entry.task.id
                    );
                }
                Slot::Failed => {}
            }
        }
    }

    /// Wait for in-flight cycles under one shared deadline, abort the rest
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.options.shutdown_grace;
        let mut aborted = 0;

        for entry in self.tasks.iter_mut() {
            let Some(mut handle) = entry.take_running() else {
                continue;
            };

            match timeout_at(deadline, &mut handle).await {
                Ok(result) => entry.settle(result),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                    warn!("{}: cycle aborted at shutdown", entry.task.id);
                }
            }
        }

        info!("Scheduler stopped ({} in-flight cycle(s) aborted)", aborted);
    }

    /// Current lifecycle state of a task, by id
    pub fn task_state(&self, id: &str) -> Option<TaskState> {
        self.find(id).map(|entry| match entry.slot {
            Slot::Idle(_) if entry.task.is_due(Instant::now()) => TaskState::Due,
            Slot::Idle(_) => TaskState::Idle,
            Slot::Running(_) => TaskState::Running,
            Slot::Failed => TaskState::Failed,
        })
    }

    pub fn next_due(&self, id: &str) -> Option<Instant> {
        self.find(id).map(|entry| entry.task.next_due)
    }

    /// Tasks that have not been retired
    pub fn schedulable_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !matches!(entry.slot, Slot::Failed))
            .count()
    }

    fn find(&self, id: &str) -> Option<&ScheduledTask> {
        self.tasks.iter().find(|entry| entry.task.id == id)
    }
}

impl ScheduledTask {
    /// Collect a finished cycle without waiting
    fn reap(&mut self) {
        if !matches!(&self.slot, Slot::Running(handle) if handle.is_finished()) {
            return;
        }
        let Some(mut handle) = self.take_running() else {
            return;
        };
        match (&mut handle).now_or_never() {
            Some(result) => self.settle(result),
            None => self.slot = Slot::Running(handle),
        }
    }

    /// Take the handle of a running cycle, leaving the slot `Failed` until
    /// the cycle is settled
    fn take_running(&mut self) -> Option<CycleHandle> {
        if !matches!(self.slot, Slot::Running(_)) {
            return None;
        }
        match std::mem::replace(&mut self.slot, Slot::Failed) {
            Slot::Running(handle) => Some(handle),
            _ => None,
        }
    }

    fn settle(&mut self, result: Result<(Box<TaskRunner>, CycleOutcome), tokio::task::JoinError>) {
        self.slot = match result {
            // Already logged by the runner
            Ok((_, CycleOutcome::Failed { retire: true, .. })) => Slot::Failed,
            Ok((runner, _)) => Slot::Idle(runner),
            Err(e) if e.is_panic() => {
                error!("{}: polling cycle panicked, task retired", self.task.id);
                Slot::Failed
            }
            Err(e) => {
                warn!("{}: polling cycle cancelled: {}", self.task.id, e);
                Slot::Failed
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use crate::metrics::MetricGroup;
    use crate::secret::SecretString;
    use crate::sink::SinkDispatcher;
    use crate::snmp::{SnmpResult, SnmpValue, SnmpVersion};
    use async_trait::async_trait;

    struct Panicking;

    #[async_trait]
    impl QueryClient for Panicking {
        async fn fetch(&self, _target: &Target, _oid: &str) -> SnmpResult<SnmpValue> {
            panic!("agent returned garbage");
        }
    }

    struct Constant;

    #[async_trait]
    impl QueryClient for Constant {
        async fn fetch(&self, _target: &Target, _oid: &str) -> SnmpResult<SnmpValue> {
            Ok(SnmpValue::TimeTicks(42))
        }
    }

    fn task(host: &str, start: Instant) -> PollingTask {
        let target = Arc::new(Target {
            host: host.to_string(),
            port: 161,
            community: SecretString::new("public"),
            version: SnmpVersion::V2c,
            interval_secs: 5,
        });
        PollingTask::new(target, MetricGroup::Uptime, start)
    }

    async fn settle(scheduler: &mut Scheduler, id: &str, now: Instant) -> Option<TaskState> {
        for _ in 0..100 {
            tokio::task::yield_now().await;
            scheduler.tick(now);
            if scheduler.task_state(id) != Some(TaskState::Running) {
                break;
            }
        }
        scheduler.task_state(id)
    }

    #[test]
    fn test_options_from_config() {
        let config = PollerConfig::from_json(
            r#"{"query_timeout_secs": 2, "failure_threshold": 3,
                "targets": [{"host": "h", "interval_secs": 1, "metrics": ["uptime"]}]}"#,
        )
        .unwrap();
        let options = SchedulerOptions::from_config(&config);
        assert_eq!(options.tick, Duration::from_secs(1));
        assert_eq!(options.query_timeout, Duration::from_secs(2));
        assert_eq!(options.shutdown_grace, Duration::from_secs(5));
        assert_eq!(options.failure_threshold, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_runs_due_task_and_returns_it_to_idle() {
        let dispatcher = SinkDispatcher::spawn(Vec::new(), 16).unwrap();
        let start = Instant::now();
        let mut scheduler = Scheduler::new(
            vec![task("10.0.0.1", start)],
            Arc::new(Constant),
            dispatcher.handle(),
            SchedulerOptions::default(),
        );

        assert_eq!(scheduler.task_state("10.0.0.1/uptime"), Some(TaskState::Due));
        scheduler.tick(start);
        assert_eq!(
            scheduler.task_state("10.0.0.1/uptime"),
            Some(TaskState::Running)
        );
        assert_eq!(
            scheduler.next_due("10.0.0.1/uptime"),
            Some(start + Duration::from_secs(5))
        );

        assert_eq!(
            settle(&mut scheduler, "10.0.0.1/uptime", start).await,
            Some(TaskState::Idle)
        );
        assert_eq!(scheduler.task_state("missing/uptime"), None);

        dispatcher.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_retires_only_that_task() {
        let dispatcher = SinkDispatcher::spawn(Vec::new(), 16).unwrap();
        let start = Instant::now();
        let mut scheduler = Scheduler::new(
            vec![task("10.0.0.1", start)],
            Arc::new(Panicking),
            dispatcher.handle(),
            SchedulerOptions::default(),
        );

        scheduler.tick(start);
        assert_eq!(
            settle(&mut scheduler, "10.0.0.1/uptime", start).await,
            Some(TaskState::Failed)
        );
        assert_eq!(scheduler.schedulable_count(), 0);

        // Retired tasks are never started again
        scheduler.tick(start + Duration::from_secs(5));
        assert_eq!(
            scheduler.task_state("10.0.0.1/uptime"),
            Some(TaskState::Failed)
        );

        dispatcher.shutdown(Duration::from_secs(5)).await;
    }
}
