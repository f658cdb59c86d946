//! Domain event system: decoupled notification between bounded contexts.
//!
//! The scheduler, the ledger and the curation engine publish events when
//! something interesting happens. Subscribers (dashboards, alerting, tests)
//! react without the publishers knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A scheduler cycle finished
    CycleCompleted {
        cycle: u64,
        tasks_run: usize,
        tasks_failed: usize,
        total_tokens: u64,
        timestamp: DateTime<Utc>,
    },

    /// A task timed out or failed inside a cycle
    TaskFailed {
        cycle: u64,
        owner: String,
        name: String,
        status: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A spending authorization was refused
    BudgetExceeded {
        owner: String,
        requested: f64,
        available: f64,
        timestamp: DateTime<Utc>,
    },

    /// A pending reservation was force-released by the stale sweep
    ReservationExpired {
        reservation_id: String,
        owner: String,
        amount: f64,
        timestamp: DateTime<Utc>,
    },

    /// A curation pass finished
    SweepCompleted {
        pass: String,
        affected: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
