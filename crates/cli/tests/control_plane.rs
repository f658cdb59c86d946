//! End-to-end tests for the Warden control plane.
//!
//! These wire the scheduler, the spending ledger, the curation engine and
//! the in-memory store together the way the daemon does, then drive cycles
//! by hand.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use warden_budget::{BudgetError, BudgetLedger, LedgerSettings};
use warden_config::CurationConfig;
use warden_core::{
    CurationAction, DomainEvent, EntryFilter, EntryKind, EventBus, ManualClock, MemoryEntry,
    MemoryStore, StoreError, SweepOrder, SweepUpdate, TaskRunStatus, Tier,
};
use warden_curation::{CurationEngine, CurationPolicy, register_curation_tasks};
use warden_memory::InMemoryStore;
use warden_scheduler::{Scheduler, TaskDefinition, TaskError, TaskOutput, handler_fn};

// ── Fixtures ────────────────────────────────────────────────────────────

fn epoch() -> DateTime<Utc> {
    "2026-05-04T08:00:00Z".parse().unwrap()
}

async fn seeded_store(hot: usize) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_all((0..hot).map(|i| {
            MemoryEntry::new(
                format!("hot-{i:05}"),
                EntryKind::Analysis,
                Tier::Hot,
                epoch() - Duration::days(3),
            )
            .with_relationships(2)
            .with_last_accessed(epoch() - Duration::seconds(i as i64 + 1))
        }))
        .await;
    store
}

fn curation(store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> Arc<CurationEngine> {
    Arc::new(
        CurationEngine::new(store, CurationPolicy::default())
            .unwrap()
            .with_clock(clock),
    )
}

/// A task that reserves `reserve` from the ledger and commits `spend`.
fn budgeted_task(ledger: Arc<BudgetLedger>, reserve: f64, spend: f64) -> TaskDefinition {
    TaskDefinition::new(
        "researcher",
        "digest",
        5,
        2_000,
        handler_fn(move |ctx| {
            let ledger = ledger.clone();
            async move {
                let id = ledger
                    .authorize(&ctx.owner, reserve, "daily digest")
                    .map_err(|e| TaskError::new(e.to_string()))?;
                ledger
                    .commit(&id, spend)
                    .map_err(|e| TaskError::new(e.to_string()))?;
                Ok(TaskOutput::new(format!("spent {spend}")).with_tokens(spend as u64))
            }
        }),
    )
}

// ── E2E: Cycle with curation and budgeted work ──────────────────────────

#[tokio::test]
async fn e2e_cycle_demotes_hot_excess_and_charges_ledger() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = seeded_store(2_000).await;
    let ledger = Arc::new(
        BudgetLedger::with_clock(LedgerSettings::default(), clock.clone()).unwrap(),
    );
    ledger.set_override("researcher", 1_000.0).unwrap();

    let scheduler = Scheduler::new(5).unwrap().with_cycle_log(store.clone());
    register_curation_tasks(
        &scheduler,
        curation(store.clone(), clock.clone()),
        &CurationConfig::default(),
    )
    .unwrap();
    scheduler
        .register(budgeted_task(ledger.clone(), 400.0, 250.0))
        .unwrap();

    let first = scheduler.run_cycle().await;
    assert_eq!(first.cycle, 1);
    assert_eq!(first.tasks_run, 2);
    assert_eq!(first.tasks_failed, 0);
    assert_eq!(first.total_tokens, 250);

    let rapid = first.outcome("curator", "rapid").unwrap();
    assert_eq!(rapid.summary.as_deref(), Some("rapid: demoted 400"));
    let hot = store.count(&EntryFilter::new().tier(Tier::Hot)).await.unwrap();
    assert_eq!(hot, 1_600);
    // Least recently read go first.
    let coldest = store.get("hot-01999").await.unwrap().unwrap();
    assert_eq!(coldest.tier, Tier::Warm);

    let summary = ledger.summary("researcher");
    assert_eq!(summary.committed, 250.0);
    assert_eq!(summary.reserved, 0.0);
    assert_eq!(summary.available, 750.0);

    // Cycles 2 and 3 spend 500 more; cycle 4 cannot reserve 400 out of 250.
    scheduler.run_cycle().await;
    scheduler.run_cycle().await;
    let fourth = scheduler.run_cycle().await;
    let digest = fourth.outcome("researcher", "digest").unwrap();
    assert_eq!(digest.status, TaskRunStatus::Error);
    assert!(digest.error.as_deref().unwrap_or_default().contains("budget exceeded"));
    assert_eq!(
        fourth.outcome("curator", "rapid").unwrap().status,
        TaskRunStatus::Success
    );
    assert_eq!(ledger.remaining("researcher"), 250.0);

    let logged = store.cycles().await;
    assert_eq!(logged.len(), 4);
    assert_eq!(logged[3].tasks_failed, 1);
}

#[tokio::test]
async fn e2e_window_rollover_restores_budget() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let ledger = Arc::new(
        BudgetLedger::with_clock(LedgerSettings::default(), clock.clone()).unwrap(),
    );
    ledger.set_override("researcher", 100.0).unwrap();

    let id = ledger.authorize("researcher", 80.0, "crawl").unwrap();
    ledger.commit(&id, 80.0).unwrap();
    let refused = ledger.authorize("researcher", 30.0, "crawl");
    assert!(matches!(
        refused,
        Err(BudgetError::BudgetExceeded { available, .. }) if available == 20.0
    ));

    clock.advance(Duration::hours(24));
    assert_eq!(ledger.remaining("researcher"), 100.0);
    assert!(ledger.authorize("researcher", 30.0, "crawl").is_ok());
}

// ── E2E: Failure isolation ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_slow_task_times_out_without_blocking_curation() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = seeded_store(1_610).await;
    let scheduler = Scheduler::new(5).unwrap();
    register_curation_tasks(
        &scheduler,
        curation(store.clone(), clock),
        &CurationConfig::default(),
    )
    .unwrap();
    scheduler
        .register(TaskDefinition::new(
            "analyst",
            "slow-report",
            5,
            50,
            handler_fn(|_ctx| async {
                tokio::time::sleep(StdDuration::from_secs(3_600)).await;
                Ok(TaskOutput::new("never"))
            }),
        ))
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = scheduler.run_cycle().await;
    let elapsed = started.elapsed();

    assert_eq!(result.tasks_run, 2);
    assert_eq!(result.tasks_failed, 1);
    assert_eq!(
        result.outcome("analyst", "slow-report").unwrap().status,
        TaskRunStatus::Timeout
    );
    assert_eq!(
        result.outcome("curator", "rapid").unwrap().summary.as_deref(),
        Some("rapid: demoted 10")
    );
    assert!(elapsed >= StdDuration::from_secs(30) && elapsed < StdDuration::from_secs(31));
}

/// An in-memory store whose HOT tier count stalls for a minute.
struct StallingStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl MemoryStore for StallingStore {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        self.inner.get(id).await
    }

    async fn upsert(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        self.inner.upsert(entry).await
    }

    async fn select(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        self.inner.select(filter, order, limit).await
    }

    async fn count(&self, filter: &EntryFilter) -> Result<usize, StoreError> {
        if filter.tiers.contains(&Tier::Hot) {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
        }
        self.inner.count(filter).await
    }

    async fn sweep(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
        update: SweepUpdate,
    ) -> Result<usize, StoreError> {
        self.inner.sweep(filter, order, limit, update).await
    }

    async fn record_score(
        &self,
        id: &str,
        score: f64,
        action: CurationAction,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.record_score(id, score, action, at).await
    }
}

#[tokio::test(start_paused = true)]
async fn e2e_abandoned_pass_is_not_run_twice() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let inner = seeded_store(20).await;
    let policy = CurationPolicy {
        hot_max_entries: 10,
        ..CurationPolicy::default()
    };
    let engine = Arc::new(
        CurationEngine::new(Arc::new(StallingStore { inner: inner.clone() }), policy)
            .unwrap()
            .with_clock(clock),
    );
    let scheduler = Scheduler::new(5).unwrap();
    register_curation_tasks(&scheduler, engine, &CurationConfig::default()).unwrap();

    // The first rapid pass overruns its 30s timeout and is left running.
    let first = scheduler.run_cycle().await;
    assert_eq!(
        first.outcome("curator", "rapid").unwrap().status,
        TaskRunStatus::Timeout
    );

    let second = scheduler.run_cycle().await;
    let rapid = second.outcome("curator", "rapid").unwrap();
    assert_eq!(rapid.status, TaskRunStatus::Success);
    assert_eq!(
        rapid.summary.as_deref(),
        Some("rapid: skipped, previous run still in progress")
    );

    // The abandoned pass finishes on its own and demotes the excess once.
    tokio::time::sleep(StdDuration::from_secs(60)).await;
    let hot = inner.count(&EntryFilter::new().tier(Tier::Hot)).await.unwrap();
    assert_eq!(hot, 10);
}

// ── E2E: Daemon and events ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_daemon_runs_passes_and_publishes_events() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = seeded_store(5).await;
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();

    let engine = Arc::new(
        CurationEngine::new(store.clone(), CurationPolicy::default())
            .unwrap()
            .with_clock(clock)
            .with_event_bus(bus.clone()),
    );
    let scheduler = Arc::new(
        Scheduler::new(5)
            .unwrap()
            .with_cycle_log(store.clone())
            .with_event_bus(bus.clone()),
    );
    register_curation_tasks(&scheduler, engine, &CurationConfig::default()).unwrap();

    let (tx, shutdown) = watch::channel(false);
    let daemon = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_daemon(shutdown).await }
    });

    // Cycles at t = 0, 5, 10 and 15 minutes.
    tokio::time::sleep(StdDuration::from_secs(16 * 60)).await;
    tx.send(true).unwrap();
    daemon.await.unwrap();

    assert_eq!(scheduler.cycle_number(), 4);
    assert_eq!(store.cycles().await.len(), 4);

    let mut sweeps = Vec::new();
    let mut cycles = 0;
    while let Ok(event) = rx.try_recv() {
        match event.as_ref() {
            DomainEvent::SweepCompleted { pass, .. } => sweeps.push(pass.clone()),
            DomainEvent::CycleCompleted { .. } => cycles += 1,
            _ => {}
        }
    }
    assert_eq!(cycles, 4);
    // rapid every cycle, standard on cycle 3
    assert_eq!(sweeps.iter().filter(|p| p.as_str() == "rapid").count(), 4);
    assert_eq!(sweeps.iter().filter(|p| p.as_str() == "standard").count(), 1);
}
