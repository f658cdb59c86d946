//! Subcommands and the wiring they share.

pub mod budget;
pub mod daemon;
pub mod status;
pub mod sweep;

use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use warden_budget::{BudgetError, BudgetLedger, LedgerSettings};
use warden_config::{AppConfig, BudgetConfig, StoreConfig};
use warden_core::{CycleLogSink, EventBus, MemoryStore};
use warden_curation::{CurationEngine, CurationPolicy};
use warden_memory::{InMemoryStore, SqliteStore};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// An explicit `--config` path still gets env overrides applied.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// The configured backend, seen both as the entry store and the cycle log.
pub struct Store {
    pub entries: Arc<dyn MemoryStore>,
    pub cycle_log: Arc<dyn CycleLogSink>,
}

pub async fn open_store(config: &StoreConfig) -> CliResult<Store> {
    match config.backend.as_str() {
        "in_memory" => {
            let store = Arc::new(InMemoryStore::new());
            Ok(Store {
                entries: store.clone(),
                cycle_log: store,
            })
        }
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
            Ok(Store {
                entries: store.clone(),
                cycle_log: store,
            })
        }
        other => Err(format!("Unknown store backend '{other}'").into()),
    }
}

pub fn build_ledger(
    config: &BudgetConfig,
    events: Option<Arc<EventBus>>,
) -> Result<BudgetLedger, BudgetError> {
    let settings = LedgerSettings {
        default_max_budget: config.default_max_budget,
        window: Duration::hours(i64::from(config.window_hours)),
        stale_reservation_timeout: Duration::minutes(i64::from(config.stale_reservation_minutes)),
    };
    let mut ledger = BudgetLedger::new(settings)?;
    if let Some(bus) = events {
        ledger = ledger.with_event_bus(bus);
    }
    for (owner, max) in &config.overrides {
        ledger.set_override(owner, *max)?;
    }
    Ok(ledger)
}

pub fn build_engine(
    config: &AppConfig,
    store: Arc<dyn MemoryStore>,
    events: Option<Arc<EventBus>>,
) -> CliResult<CurationEngine> {
    let policy = CurationPolicy::from_config(&config.curation)?;
    let mut engine = CurationEngine::new(store, policy)?;
    if let Some(bus) = events {
        engine = engine.with_event_bus(bus);
    }
    Ok(engine)
}
