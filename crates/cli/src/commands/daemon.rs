//! `warden daemon`: the scheduler heartbeat with curation passes.

use super::{build_engine, build_ledger, open_store};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warden_budget::BudgetLedger;
use warden_config::AppConfig;
use warden_core::{DomainEvent, EventBus};
use warden_curation::register_curation_tasks;
use warden_scheduler::{Scheduler, SchedulerError, TaskDefinition, TaskOutput, handler_fn};

/// Owner of the daemon's own housekeeping tasks.
const SYSTEM_OWNER: &str = "warden";

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let events = Arc::new(EventBus::default());
    let store = open_store(&config.store).await?;
    let ledger = Arc::new(build_ledger(&config.budget, Some(events.clone()))?);
    let engine = Arc::new(build_engine(&config, store.entries.clone(), Some(events.clone()))?);

    let scheduler = Arc::new(
        Scheduler::from_config(&config.scheduler)?
            .with_cycle_log(store.cycle_log.clone())
            .with_event_bus(events.clone()),
    );

    let passes = register_curation_tasks(&scheduler, engine, &config.curation)?;
    register_ledger_maintenance(&scheduler, ledger)?;

    println!("Warden daemon starting");
    println!("   Store:       {}", store.entries.name());
    println!("   Base cycle:  {} min", scheduler.base_cycle_minutes());
    println!("   Curation:    {passes} passes as '{}'", config.curation.owner);
    println!(
        "   Budget:      {} per {}h",
        config.budget.default_max_budget, config.budget.window_hours
    );

    spawn_event_logger(&events);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, stopping after the current cycle"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C; stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run_daemon(shutdown_rx).await;
    info!(cycles = scheduler.cycle_number(), "Daemon stopped");
    Ok(())
}

/// Drop finished reservations once they are older than a full window.
fn register_ledger_maintenance(
    scheduler: &Scheduler,
    ledger: Arc<BudgetLedger>,
) -> Result<(), SchedulerError> {
    let cadence = scheduler.base_cycle_minutes() * 12;
    scheduler.register(TaskDefinition::new(
        SYSTEM_OWNER,
        "ledger-maintenance",
        cadence,
        100,
        handler_fn(move |_ctx| {
            let ledger = ledger.clone();
            async move {
                let pruned = ledger.prune_finished(ledger.settings().window);
                Ok(TaskOutput::new(format!(
                    "pruned {pruned} reservations, {} tracked",
                    ledger.reservation_count()
                )))
            }
        }),
    ))
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.as_ref() {
                    DomainEvent::BudgetExceeded { owner, requested, available, .. } => {
                        warn!(%owner, requested, available, "Budget exceeded");
                    }
                    DomainEvent::TaskFailed { owner, name, status, .. } => {
                        warn!(%owner, %name, %status, "Task failed");
                    }
                    other => debug!(event = ?other, "Domain event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
