//! Scheduler wiring for the curation passes.

use crate::engine::{CurationEngine, SweepPass};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use warden_config::CurationConfig;
use warden_scheduler::{
    Scheduler, SchedulerError, TaskContext, TaskDefinition, TaskError, TaskHandler, TaskOutput,
};

/// A curation pass run as a scheduled task.
pub struct SweepTask {
    engine: Arc<CurationEngine>,
    pass: SweepPass,
}

impl SweepTask {
    pub fn new(engine: Arc<CurationEngine>, pass: SweepPass) -> Self {
        Self { engine, pass }
    }
}

#[async_trait]
impl TaskHandler for SweepTask {
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let report = self.engine.run(self.pass).await;

        // Partial failures still count as a run; a pass that could not
        // touch the store at all is reported as an error. A skipped pass
        // touched nothing and is not a failure.
        if report.errors > 0 && report.affected() == 0 && report.rescored == 0 {
            return Err(TaskError::new(format!(
                "{} pass in cycle {}: {} store operations failed",
                self.pass, ctx.cycle, report.errors
            )));
        }
        Ok(TaskOutput::new(report.summary()))
    }
}

/// Register the four passes under `config.owner`, with cadences of 1, 3,
/// 12 and 72 base cycles. Returns how many tasks were registered; zero when
/// curation is disabled.
pub fn register_curation_tasks(
    scheduler: &Scheduler,
    engine: Arc<CurationEngine>,
    config: &CurationConfig,
) -> Result<usize, SchedulerError> {
    if !config.enabled {
        info!("Curation disabled; no sweep tasks registered");
        return Ok(0);
    }

    let base = scheduler.base_cycle_minutes();
    for pass in SweepPass::ALL {
        let token_budget = match pass {
            SweepPass::Rapid => config.token_budgets.rapid,
            SweepPass::Standard => config.token_budgets.standard,
            SweepPass::Hourly => config.token_budgets.hourly,
            SweepPass::Deep => config.token_budgets.deep,
        };
        scheduler.register(TaskDefinition::new(
            config.owner.clone(),
            pass.as_str(),
            base * pass.cycle_multiple(),
            token_budget,
            SweepTask::new(engine.clone(), pass),
        ))?;
    }
    Ok(SweepPass::ALL.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CurationPolicy;
    use chrono::{DateTime, Duration, Utc};
    use std::time::Duration as StdDuration;
    use warden_core::{
        EntryFilter, EntryKind, ManualClock, MemoryEntry, MemoryStore, TaskRunStatus, Tier,
    };
    use warden_memory::InMemoryStore;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn engine(store: Arc<InMemoryStore>, policy: CurationPolicy) -> Arc<CurationEngine> {
        Arc::new(
            CurationEngine::new(store, policy)
                .unwrap()
                .with_clock(Arc::new(ManualClock::new(now()))),
        )
    }

    #[test]
    fn registers_four_passes_at_their_cadences() {
        let scheduler = Scheduler::new(5).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let config = CurationConfig::default();

        let n = register_curation_tasks(&scheduler, engine(store, CurationPolicy::default()), &config)
            .unwrap();
        assert_eq!(n, 4);

        let tasks = scheduler.tasks_for_owner("curator");
        let mut cadences: Vec<(String, u32, u32)> = tasks
            .iter()
            .map(|t| (t.name.clone(), t.cadence_minutes, t.token_budget))
            .collect();
        cadences.sort();
        assert_eq!(
            cadences,
            vec![
                ("deep".to_string(), 360, 20_000),
                ("hourly".to_string(), 60, 10_000),
                ("rapid".to_string(), 5, 2_000),
                ("standard".to_string(), 15, 5_000),
            ]
        );

        let policy = scheduler.timeout_policy();
        assert_eq!(policy.timeout_for(2_000), StdDuration::from_secs(30));
        assert_eq!(policy.timeout_for(20_000), StdDuration::from_secs(200));
    }

    #[test]
    fn disabled_curation_registers_nothing() {
        let scheduler = Scheduler::new(5).unwrap();
        let config = CurationConfig {
            enabled: false,
            ..CurationConfig::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let n = register_curation_tasks(&scheduler, engine(store, CurationPolicy::default()), &config)
            .unwrap();
        assert_eq!(n, 0);
        assert!(scheduler.tasks().is_empty());
    }

    #[tokio::test]
    async fn first_cycle_runs_only_the_rapid_pass() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_all((0..12).map(|i| {
                MemoryEntry::new(format!("h{i}"), EntryKind::Entry, Tier::Hot, now() - Duration::days(2))
                    .with_last_accessed(now() - Duration::minutes(i))
            }))
            .await;
        let policy = CurationPolicy {
            hot_max_entries: 10,
            ..CurationPolicy::default()
        };
        let scheduler = Scheduler::new(5).unwrap();
        register_curation_tasks(&scheduler, engine(store.clone(), policy), &CurationConfig::default())
            .unwrap();

        let result = scheduler.run_cycle().await;
        assert_eq!(result.tasks_run, 1);
        let rapid = result.outcome("curator", "rapid").unwrap();
        assert_eq!(rapid.status, TaskRunStatus::Success);
        assert_eq!(rapid.summary.as_deref(), Some("rapid: demoted 2"));

        let hot = store.count(&EntryFilter::new().tier(Tier::Hot)).await.unwrap();
        assert_eq!(hot, 10);

        scheduler.run_cycle().await;
        let third = scheduler.run_cycle().await;
        assert_eq!(third.tasks_run, 2);
        assert!(third.outcome("curator", "standard").is_some());
    }
}
