//! Data model for reservations, per-owner budgets and summaries.

use crate::BudgetError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Reservation ───────────────────────────────────────────────────────────

/// Lifecycle of a reservation. `Committed` and `Released` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Committed,
    Released,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Committed => write!(f, "committed"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// A provisional hold against an owner's budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    /// Unique identifier (`rsv_<uuid>`).
    pub id: String,
    pub owner: String,
    /// Reserved ceiling.
    pub amount: f64,
    /// What the spend is for.
    pub description: String,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    /// Actual spend; 0 until committed.
    pub committed_amount: f64,
    /// When the reservation reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub(crate) fn new(
        owner: impl Into<String>,
        amount: f64,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("rsv_{}", Uuid::new_v4().simple()),
            owner: owner.into(),
            amount,
            description: description.into(),
            state: ReservationState::Pending,
            created_at: now,
            committed_amount: 0.0,
            finished_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ReservationState::Pending
    }

    /// Pending for longer than `timeout` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_pending() && now - self.created_at > timeout
    }

    pub(crate) fn finish(&mut self, state: ReservationState, committed: f64, now: DateTime<Utc>) {
        self.state = state;
        self.committed_amount = committed;
        self.finished_at = Some(now);
    }
}

// ── Budget ────────────────────────────────────────────────────────────────

/// Per-owner accounting within the current window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentBudget {
    pub owner: String,
    pub max_budget: f64,
    pub window_start: DateTime<Utc>,
    pub total_committed: f64,
    pub total_reserved: f64,
}

impl AgentBudget {
    pub(crate) fn new(owner: impl Into<String>, max_budget: f64, now: DateTime<Utc>) -> Self {
        Self {
            owner: owner.into(),
            max_budget,
            window_start: now,
            total_committed: 0.0,
            total_reserved: 0.0,
        }
    }

    /// `max − committed − reserved`, never negative.
    pub fn available(&self) -> f64 {
        (self.max_budget - self.total_committed - self.total_reserved).max(0.0)
    }

    /// Start a fresh window if the current one has elapsed. Pending
    /// reservations lose their accounting contribution; the reservation
    /// records themselves are left alone and settle through stale expiry.
    pub(crate) fn roll_window(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if now - self.window_start < window {
            return false;
        }
        self.total_committed = 0.0;
        self.total_reserved = 0.0;
        self.window_start = now;
        true
    }

    /// Drop `amount` from the reserved total, never below zero.
    pub(crate) fn unreserve(&mut self, amount: f64) {
        self.total_reserved = (self.total_reserved - amount).max(0.0);
    }

    pub fn summary(&self) -> BudgetSummary {
        BudgetSummary {
            owner: self.owner.clone(),
            max_budget: self.max_budget,
            committed: self.total_committed,
            reserved: self.total_reserved,
            available: self.available(),
            window_start: self.window_start,
        }
    }
}

/// Point-in-time view of one owner's budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetSummary {
    pub owner: String,
    pub max_budget: f64,
    pub committed: f64,
    pub reserved: f64,
    pub available: f64,
    pub window_start: DateTime<Utc>,
}

// ── Settings ──────────────────────────────────────────────────────────────

/// Construction parameters for a [`crate::BudgetLedger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    /// Ceiling for owners without an override.
    pub default_max_budget: f64,
    /// Rolling window length.
    pub window: Duration,
    /// Pending reservations older than this are force-released.
    pub stale_reservation_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_max_budget: 100_000.0,
            window: Duration::hours(24),
            stale_reservation_timeout: Duration::minutes(30),
        }
    }
}

impl LedgerSettings {
    pub fn validate(&self) -> Result<(), BudgetError> {
        if !(self.default_max_budget > 0.0) || !self.default_max_budget.is_finite() {
            return Err(BudgetError::Configuration(format!(
                "default max budget must be > 0, got {}",
                self.default_max_budget
            )));
        }
        if self.window <= Duration::zero() {
            return Err(BudgetError::Configuration(
                "budget window must be positive".into(),
            ));
        }
        if self.stale_reservation_timeout <= Duration::zero() {
            return Err(BudgetError::Configuration(
                "stale reservation timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
