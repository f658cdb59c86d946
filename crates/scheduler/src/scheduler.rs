//! Cycle execution, registry management and the daemon loop.

use crate::SchedulerError;
use crate::policy::TimeoutPolicy;
use crate::task::{TaskContext, TaskDefinition, TaskOutput};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};
use warden_core::{
    Clock, CycleLogSink, CycleResult, DomainEvent, EventBus, SystemClock, TaskOutcome,
    TaskRunStatus,
};

/// How long a cycle waits on the log sink before giving up on it.
const CYCLE_LOG_TIMEOUT: Duration = Duration::from_secs(10);

/// The periodic task scheduler.
///
/// Construct once at startup and share behind an `Arc`. Cycles never
/// overlap: `run_cycle` holds a guard for its whole duration.
pub struct Scheduler {
    base_cycle_minutes: u32,
    max_concurrent_tasks: usize,
    timeout_policy: TimeoutPolicy,
    registry: RwLock<Vec<TaskDefinition>>,
    cycle: AtomicU64,
    cycle_guard: Mutex<()>,
    stopped: AtomicBool,
    clock: Arc<dyn Clock>,
    cycle_log: Option<Arc<dyn CycleLogSink>>,
    events: Option<Arc<EventBus>>,
}

impl Scheduler {
    pub fn new(base_cycle_minutes: u32) -> Result<Self, SchedulerError> {
        if base_cycle_minutes == 0 {
            return Err(SchedulerError::Configuration(
                "base cycle length must be > 0 minutes".into(),
            ));
        }
        Ok(Self {
            base_cycle_minutes,
            max_concurrent_tasks: 1,
            timeout_policy: TimeoutPolicy::default(),
            registry: RwLock::new(Vec::new()),
            cycle: AtomicU64::new(0),
            cycle_guard: Mutex::new(()),
            stopped: AtomicBool::new(false),
            clock: Arc::new(SystemClock),
            cycle_log: None,
            events: None,
        })
    }

    pub fn from_config(config: &warden_config::SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(Self::new(config.base_cycle_minutes)?
            .with_timeout_policy(TimeoutPolicy::from_config(config)?)
            .with_max_concurrent_tasks(config.max_concurrent_tasks))
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Run up to `n` due tasks at once. Recorded order stays sorted.
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cycle_log(mut self, sink: Arc<dyn CycleLogSink>) -> Self {
        self.cycle_log = Some(sink);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn base_cycle_minutes(&self) -> u32 {
        self.base_cycle_minutes
    }

    pub fn timeout_policy(&self) -> &TimeoutPolicy {
        &self.timeout_policy
    }

    /// Cycles started so far.
    pub fn cycle_number(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    // ── Registry ──────────────────────────────────────────────────────

    /// Add a task. Re-registering an owner/name pair replaces it in place.
    pub fn register(&self, task: TaskDefinition) -> Result<(), SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidTask {
            owner: task.owner.clone(),
            name: task.name.clone(),
            reason,
        };
        if task.owner.trim().is_empty() || task.name.trim().is_empty() {
            return Err(invalid("owner and name must not be empty".into()));
        }
        if task.token_budget == 0 {
            return Err(invalid("token budget must be > 0".into()));
        }
        if task.cadence_minutes == 0 || task.cadence_minutes % self.base_cycle_minutes != 0 {
            return Err(invalid(format!(
                "cadence {}m is not a positive multiple of the {}m base cycle",
                task.cadence_minutes, self.base_cycle_minutes
            )));
        }

        info!(
            owner = %task.owner,
            name = %task.name,
            cadence_minutes = task.cadence_minutes,
            token_budget = task.token_budget,
            "Registering task"
        );

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.iter_mut().find(|t| t.matches(&task.owner, &task.name)) {
            Some(existing) => *existing = task,
            None => registry.push(task),
        }
        Ok(())
    }

    pub fn unregister(&self, owner: &str, name: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.len();
        registry.retain(|t| !t.matches(owner, name));
        registry.len() < before
    }

    pub fn enable(&self, owner: &str, name: &str) -> bool {
        self.set_enabled(owner, name, true)
    }

    pub fn disable(&self, owner: &str, name: &str) -> bool {
        self.set_enabled(owner, name, false)
    }

    fn set_enabled(&self, owner: &str, name: &str, enabled: bool) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.iter_mut().find(|t| t.matches(owner, name)) {
            Some(task) => {
                task.enabled = enabled;
                debug!(owner = %owner, name = %name, enabled, "Task toggled");
                true
            }
            None => false,
        }
    }

    /// All registered tasks, in registration order.
    pub fn tasks(&self) -> Vec<TaskDefinition> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tasks belonging to `owner`, in registration order.
    pub fn tasks_for_owner(&self, owner: &str) -> Vec<TaskDefinition> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect()
    }

    pub fn should_run(&self, task: &TaskDefinition, cycle: u64) -> bool {
        task.should_run(cycle, self.base_cycle_minutes)
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Run one cycle: every due task under its timeout, failures isolated.
    pub async fn run_cycle(&self) -> CycleResult {
        let _guard = self.cycle_guard.lock().await;
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = self.clock.now();

        let mut due: Vec<TaskDefinition> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| self.should_run(t, cycle))
            .cloned()
            .collect();
        due.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));

        debug!(cycle, due = due.len(), "Cycle started");

        let outcomes: Vec<TaskOutcome> = stream::iter(due)
            .map(|task| self.run_task(cycle, task))
            .buffered(self.max_concurrent_tasks)
            .collect()
            .await;

        let result = CycleResult::from_outcomes(cycle, started_at, self.clock.now(), outcomes);

        info!(
            cycle,
            tasks_run = result.tasks_run,
            tasks_failed = result.tasks_failed,
            total_tokens = result.total_tokens,
            "Cycle complete"
        );

        self.persist(&result).await;
        self.publish(&result);
        result
    }

    async fn run_task(&self, cycle: u64, task: TaskDefinition) -> TaskOutcome {
        let timeout = self.timeout_policy.timeout_for(task.token_budget);
        let started_at = self.clock.now();
        let ctx = TaskContext {
            cycle,
            owner: task.owner.clone(),
            name: task.name.clone(),
            token_budget: task.token_budget,
            started_at,
        };

        // A timed-out handler keeps running detached; dropping the join
        // handle abandons it without cancelling.
        let handler = task.handler();
        let handle = tokio::spawn(async move { handler.execute(ctx).await });

        let (status, output, err) = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(output))) => (TaskRunStatus::Success, output, None),
            Ok(Ok(Err(e))) => (TaskRunStatus::Error, TaskOutput::default(), Some(e.to_string())),
            Ok(Err(join_err)) => (
                TaskRunStatus::Error,
                TaskOutput::default(),
                Some(describe_join_error(join_err)),
            ),
            Err(_) => (
                TaskRunStatus::Timeout,
                TaskOutput::default(),
                Some(format!("timed out after {}s", timeout.as_secs())),
            ),
        };

        match &err {
            None => debug!(
                owner = %task.owner,
                name = %task.name,
                tokens_used = output.tokens_used,
                "Task succeeded"
            ),
            Some(e) => warn!(
                owner = %task.owner,
                name = %task.name,
                status = %status,
                error = %e,
                "Task failed"
            ),
        }

        TaskOutcome {
            owner: task.owner,
            name: task.name,
            status,
            started_at,
            ended_at: self.clock.now(),
            summary: output.summary,
            error: err,
            tokens_used: output.tokens_used,
        }
    }

    async fn persist(&self, result: &CycleResult) {
        let Some(sink) = &self.cycle_log else {
            return;
        };
        match tokio::time::timeout(CYCLE_LOG_TIMEOUT, sink.record_cycle(result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(cycle = result.cycle, error = %e, "Failed to persist cycle result"),
            Err(_) => warn!(cycle = result.cycle, "Timed out persisting cycle result"),
        }
    }

    fn publish(&self, result: &CycleResult) {
        let Some(bus) = &self.events else {
            return;
        };
        for outcome in result.outcomes.iter().filter(|o| !o.is_success()) {
            bus.publish(DomainEvent::TaskFailed {
                cycle: result.cycle,
                owner: outcome.owner.clone(),
                name: outcome.name.clone(),
                status: outcome.status.to_string(),
                error: outcome.error.clone().unwrap_or_default(),
                timestamp: outcome.ended_at,
            });
        }
        bus.publish(DomainEvent::CycleCompleted {
            cycle: result.cycle,
            tasks_run: result.tasks_run,
            tasks_failed: result.tasks_failed,
            total_tokens: result.total_tokens,
            timestamp: result.ended_at,
        });
    }

    // ── Daemon ────────────────────────────────────────────────────────

    /// Run cycles every base interval until `shutdown` flips to true (or its
    /// sender is dropped) or [`Scheduler::stop`] is called. Cancellation is
    /// observed between cycles only.
    pub async fn run_daemon(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(u64::from(self.base_cycle_minutes) * 60);
        info!(base_cycle_minutes = self.base_cycle_minutes, "Scheduler daemon started");

        loop {
            if self.is_stopped() || *shutdown.borrow() {
                break;
            }

            if let Err(panic) = AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                error!(
                    cycle = self.cycle_number(),
                    error = %panic_message(panic.as_ref()),
                    "Cycle panicked; daemon continues"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(cycles = self.cycle_number(), "Scheduler daemon stopped");
    }

    /// Ask the daemon to exit at the top of its next iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn describe_join_error(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        format!("handler panicked: {}", panic_message(err.into_panic().as_ref()))
    } else {
        format!("handler aborted: {err}")
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskError, handler_fn};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use warden_core::StoreError;

    fn ok_task(owner: &str, name: &str, cadence: u32, tokens: u64) -> TaskDefinition {
        TaskDefinition::new(
            owner,
            name,
            cadence,
            1_000,
            handler_fn(move |ctx: TaskContext| async move {
                Ok(TaskOutput::new(format!("ran {}", ctx.name)).with_tokens(tokens))
            }),
        )
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(5).unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        cycles: std::sync::Mutex<Vec<CycleResult>>,
        fail: bool,
    }

    #[async_trait]
    impl CycleLogSink for RecordingSink {
        async fn record_cycle(&self, result: &CycleResult) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.cycles.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl CycleLogSink for PanickingSink {
        async fn record_cycle(&self, _result: &CycleResult) -> Result<(), StoreError> {
            panic!("sink exploded");
        }
    }

    #[test]
    fn zero_base_cycle_rejected() {
        assert!(matches!(
            Scheduler::new(0),
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[test]
    fn register_validates_cadence_and_budget() {
        let s = scheduler();
        assert!(s.register(ok_task("curator", "rapid", 5, 0)).is_ok());

        let err = s.register(ok_task("curator", "odd", 7, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask { ref name, .. } if name == "odd"));
        assert!(s.register(ok_task("curator", "zero", 0, 0)).is_err());
        assert!(s.register(ok_task("", "anon", 5, 0)).is_err());

        let no_budget = TaskDefinition::new(
            "curator",
            "free",
            5,
            0,
            handler_fn(|_ctx| async { Ok(TaskOutput::default()) }),
        );
        assert!(s.register(no_budget).is_err());
        assert_eq!(s.tasks().len(), 1);
    }

    #[test]
    fn reregistration_replaces_in_place() {
        let s = scheduler();
        s.register(ok_task("a", "one", 5, 0)).unwrap();
        s.register(ok_task("a", "two", 5, 0)).unwrap();
        s.register(ok_task("a", "one", 60, 0)).unwrap();

        let tasks = s.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, "one");
        assert_eq!(tasks[0].cadence_minutes, 60);
    }

    #[test]
    fn registry_mutations_report_matches() {
        let s = scheduler();
        s.register(ok_task("researcher", "digest", 15, 0)).unwrap();
        s.register(ok_task("curator", "rapid", 5, 0)).unwrap();
        s.register(ok_task("researcher", "crawl", 30, 0)).unwrap();

        assert!(s.disable("researcher", "digest"));
        assert!(!s.disable("researcher", "missing"));
        assert!(!s.tasks_for_owner("researcher")[0].enabled);
        assert!(s.enable("researcher", "digest"));

        let names: Vec<String> = s
            .tasks_for_owner("researcher")
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["digest", "crawl"]);

        assert!(s.unregister("researcher", "digest"));
        assert!(!s.unregister("researcher", "digest"));
        assert_eq!(s.tasks().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let s = scheduler();
        s.register(TaskDefinition::new(
            "curator",
            "stuck",
            5,
            50,
            handler_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(TaskOutput::new("never"))
            }),
        ))
        .unwrap();

        let started = tokio::time::Instant::now();
        let result = s.run_cycle().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

        assert_eq!(result.cycle, 1);
        assert_eq!(result.tasks_run, 1);
        assert_eq!(result.tasks_failed, 1);
        let outcome = result.outcome("curator", "stuck").unwrap();
        assert_eq!(outcome.status, TaskRunStatus::Timeout);
        assert!(outcome.error.as_deref().unwrap().contains("30s"));
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let s = scheduler();
        s.register(TaskDefinition::new(
            "agent",
            "b-errors",
            5,
            100,
            handler_fn(|_ctx| async { Err(TaskError::new("store offline")) }),
        ))
        .unwrap();
        s.register(TaskDefinition::new(
            "agent",
            "c-panics",
            5,
            100,
            handler_fn(|_ctx| async {
                if true {
                    panic!("boom");
                }
                Ok(TaskOutput::default())
            }),
        ))
        .unwrap();
        s.register(ok_task("agent", "d-works", 5, 42)).unwrap();
        s.register(ok_task("agent", "a-works", 5, 8)).unwrap();

        let result = s.run_cycle().await;
        assert_eq!(result.tasks_run, 4);
        assert_eq!(result.tasks_succeeded, 2);
        assert_eq!(result.tasks_failed, 2);
        assert_eq!(result.total_tokens, 50);

        let names: Vec<&str> = result.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a-works", "b-errors", "c-panics", "d-works"]);

        let errored = result.outcome("agent", "b-errors").unwrap();
        assert_eq!(errored.status, TaskRunStatus::Error);
        assert_eq!(errored.error.as_deref(), Some("store offline"));

        let panicked = result.outcome("agent", "c-panics").unwrap();
        assert_eq!(panicked.status, TaskRunStatus::Error);
        assert!(panicked.error.as_deref().unwrap().contains("boom"));

        let ok = result.outcome("agent", "a-works").unwrap();
        assert_eq!(ok.summary.as_deref(), Some("ran a-works"));
    }

    #[tokio::test]
    async fn only_due_tasks_run() {
        let s = scheduler();
        s.register(ok_task("curator", "rapid", 5, 1)).unwrap();
        s.register(ok_task("curator", "standard", 15, 10)).unwrap();
        s.register(ok_task("curator", "off", 5, 100).disabled()).unwrap();

        let first = s.run_cycle().await;
        let second = s.run_cycle().await;
        let third = s.run_cycle().await;

        assert_eq!(first.tasks_run, 1);
        assert_eq!(second.tasks_run, 1);
        assert_eq!(third.tasks_run, 2);
        assert_eq!(third.total_tokens, 11);
        assert_eq!(s.cycle_number(), 3);
    }

    #[tokio::test]
    async fn empty_cycle_still_counts() {
        let s = scheduler();
        let result = s.run_cycle().await;
        assert_eq!(result.cycle, 1);
        assert_eq!(result.tasks_run, 0);
        assert!(result.outcomes.is_empty());
    }

    #[tokio::test]
    async fn cycle_results_reach_sink_and_bus() {
        let sink = Arc::new(RecordingSink::default());
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let s = scheduler().with_cycle_log(sink.clone()).with_event_bus(bus);
        s.register(TaskDefinition::new(
            "agent",
            "fails",
            5,
            100,
            handler_fn(|_ctx| async { Err(TaskError::new("nope")) }),
        ))
        .unwrap();

        s.run_cycle().await;
        assert_eq!(sink.cycles.lock().unwrap().len(), 1);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.as_ref(), DomainEvent::TaskFailed { name, .. } if name == "fails"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.as_ref(),
            DomainEvent::CycleCompleted { cycle: 1, tasks_failed: 1, .. }
        ));
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_cycle() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let s = scheduler().with_cycle_log(sink);
        s.register(ok_task("agent", "fine", 5, 3)).unwrap();

        let result = s.run_cycle().await;
        assert_eq!(result.tasks_succeeded, 1);
        assert_eq!(result.total_tokens, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_concurrency_keeps_recorded_order() {
        let s = scheduler().with_max_concurrent_tasks(4);
        for (name, secs) in [("d", 1u64), ("b", 10), ("c", 3), ("a", 10)] {
            s.register(TaskDefinition::new(
                "agent",
                name,
                5,
                100,
                handler_fn(move |_ctx| async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(TaskOutput::default())
                }),
            ))
            .unwrap();
        }

        let started = tokio::time::Instant::now();
        let result = s.run_cycle().await;
        assert!(started.elapsed() < Duration::from_secs(20));

        let names: Vec<&str> = result.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(result.tasks_succeeded, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn daemon_runs_every_base_interval_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let s = Arc::new(scheduler());
        s.register(TaskDefinition::new(
            "curator",
            "tick",
            5,
            100,
            handler_fn(move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(TaskOutput::default())
                }
            }),
        ))
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let daemon = tokio::spawn({
            let s = s.clone();
            async move { s.run_daemon(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        tx.send(true).unwrap();
        daemon.await.unwrap();

        assert_eq!(s.cycle_number(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn daemon_survives_panicking_cycle() {
        let s = Arc::new(scheduler().with_cycle_log(Arc::new(PanickingSink)));
        let (tx, rx) = watch::channel(false);
        let daemon = tokio::spawn({
            let s = s.clone();
            async move { s.run_daemon(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;
        drop(tx);
        daemon.await.unwrap();

        assert_eq!(s.cycle_number(), 2);
    }

    #[tokio::test]
    async fn stopped_daemon_exits_immediately() {
        let s = scheduler();
        s.stop();
        assert!(s.is_stopped());

        let (_tx, rx) = watch::channel(false);
        s.run_daemon(rx).await;
        assert_eq!(s.cycle_number(), 0);
    }
}
