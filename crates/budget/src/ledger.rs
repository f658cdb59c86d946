//! Thread-safe budget ledger: authorize, commit, release, and report.

use crate::model::*;
use crate::{BudgetError, ReservationError};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use warden_core::{Clock, DomainEvent, EventBus, SystemClock};

/// The spending ledger.
///
/// One mutex guards both the per-owner records and the reservation map, so
/// every operation sees a consistent view. Nothing blocks on I/O while the
/// lock is held; events are published after it is released.
///
/// Terminal reservations stay in the map until [`BudgetLedger::prune_finished`]
/// drops them. Stale expiry only walks the owner's pending ids, so the cost
/// of an access does not grow with that history.
pub struct BudgetLedger {
    settings: LedgerSettings,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    budgets: HashMap<String, AgentBudget>,
    reservations: HashMap<String, Reservation>,
    /// Pending reservation ids per owner
    pending: HashMap<String, HashSet<String>>,
    overrides: HashMap<String, f64>,
}

impl LedgerState {
    /// Materialize the owner's record and apply the rolling-window reset.
    fn budget_mut(
        &mut self,
        owner: &str,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> &mut AgentBudget {
        let max = self
            .overrides
            .get(owner)
            .copied()
            .unwrap_or(settings.default_max_budget);
        let budget = self
            .budgets
            .entry(owner.to_string())
            .or_insert_with(|| AgentBudget::new(owner, max, now));
        if budget.roll_window(now, settings.window) {
            tracing::debug!(owner = %owner, "Budget window reset");
        }
        budget
    }

    /// Force-release the owner's pending reservations that outlived the
    /// timeout. Returns the expired reservations.
    fn expire_stale(
        &mut self,
        owner: &str,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> Vec<Reservation> {
        let mut expired = Vec::new();
        if let Some(ids) = self.pending.get_mut(owner) {
            ids.retain(|id| {
                let Some(reservation) = self.reservations.get_mut(id) else {
                    return false;
                };
                if !reservation.is_stale(now, settings.stale_reservation_timeout) {
                    return true;
                }
                reservation.finish(ReservationState::Released, 0.0, now);
                expired.push(reservation.clone());
                false
            });
        }
        if !expired.is_empty() {
            let budget = self.budget_mut(owner, settings, now);
            for reservation in &expired {
                budget.unreserve(reservation.amount);
            }
        }
        expired
    }

    /// Window reset then stale expiry, the preamble of every owner access.
    fn touch(
        &mut self,
        owner: &str,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> Vec<Reservation> {
        self.budget_mut(owner, settings, now);
        self.expire_stale(owner, settings, now)
    }

    /// Move a pending reservation to a terminal state and drop it from the
    /// owner's pending index.
    fn settle(
        &mut self,
        reservation_id: &str,
        state: ReservationState,
        committed: f64,
        now: DateTime<Utc>,
    ) {
        if let Some(reservation) = self.reservations.get_mut(reservation_id) {
            reservation.finish(state, committed, now);
            if let Some(ids) = self.pending.get_mut(&reservation.owner) {
                ids.remove(reservation_id);
            }
        }
    }
}

impl BudgetLedger {
    /// Create a ledger. Non-positive settings are a fatal configuration error.
    pub fn new(settings: LedgerSettings) -> Result<Self, BudgetError> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: LedgerSettings, clock: Arc<dyn Clock>) -> Result<Self, BudgetError> {
        settings.validate()?;
        Ok(Self {
            settings,
            clock,
            events: None,
            state: Mutex::new(LedgerState::default()),
        })
    }

    /// Publish `BudgetExceeded` and `ReservationExpired` on this bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_expired(&self, expired: Vec<Reservation>) {
        for reservation in expired {
            tracing::info!(
                reservation_id = %reservation.id,
                owner = %reservation.owner,
                amount = reservation.amount,
                "Stale reservation force-released"
            );
            if let Some(bus) = &self.events {
                bus.publish(DomainEvent::ReservationExpired {
                    reservation_id: reservation.id,
                    owner: reservation.owner,
                    amount: reservation.amount,
                    timestamp: self.clock.now(),
                });
            }
        }
    }

    // ── Reservation surface ───────────────────────────────────────────

    /// Reserve `amount` for `owner`. Returns the reservation id.
    ///
    /// Fails with [`BudgetError::BudgetExceeded`] when `amount` exceeds what
    /// is available; nothing is reserved in that case.
    pub fn authorize(
        &self,
        owner: &str,
        amount: f64,
        description: &str,
    ) -> Result<String, BudgetError> {
        if owner.trim().is_empty() {
            return Err(BudgetError::InvalidRequest("owner must not be empty".into()));
        }
        if !(amount > 0.0) || !amount.is_finite() {
            return Err(BudgetError::InvalidRequest(format!(
                "amount must be > 0, got {amount}"
            )));
        }

        let now = self.clock.now();
        let (result, expired) = {
            let mut state = self.lock();
            let expired = state.touch(owner, &self.settings, now);
            let budget = state.budget_mut(owner, &self.settings, now);
            let available = budget.available();

            if amount > available {
                let err = BudgetError::BudgetExceeded {
                    owner: owner.to_string(),
                    requested: amount,
                    available,
                    committed: budget.total_committed,
                    reserved: budget.total_reserved,
                    max: budget.max_budget,
                };
                (Err(err), expired)
            } else {
                budget.total_reserved += amount;
                let reservation = Reservation::new(owner, amount, description, now);
                let id = reservation.id.clone();
                state.reservations.insert(id.clone(), reservation);
                state
                    .pending
                    .entry(owner.to_string())
                    .or_default()
                    .insert(id.clone());
                (Ok(id), expired)
            }
        };
        self.publish_expired(expired);

        match &result {
            Ok(id) => {
                tracing::debug!(owner = %owner, amount, reservation_id = %id, "Spending authorized");
            }
            Err(BudgetError::BudgetExceeded { available, .. }) => {
                tracing::warn!(
                    owner = %owner,
                    requested = amount,
                    available = *available,
                    "Spending denied: budget exceeded"
                );
                if let Some(bus) = &self.events {
                    bus.publish(DomainEvent::BudgetExceeded {
                        owner: owner.to_string(),
                        requested: amount,
                        available: *available,
                        timestamp: now,
                    });
                }
            }
            Err(_) => {}
        }
        result
    }

    /// Settle a pending reservation with what was actually spent.
    ///
    /// `actual` must be within `[0, reserved amount]`; the unused portion
    /// returns to availability.
    pub fn commit(&self, reservation_id: &str, actual: f64) -> Result<(), ReservationError> {
        let now = self.clock.now();
        let mut state = self.lock();

        let reservation = state
            .reservations
            .get(reservation_id)
            .ok_or_else(|| ReservationError::Unknown(reservation_id.to_string()))?;
        if !reservation.is_pending() {
            return Err(ReservationError::NotPending {
                id: reservation_id.to_string(),
                state: reservation.state,
            });
        }
        if !(actual >= 0.0) || actual > reservation.amount {
            return Err(ReservationError::InvalidAmount {
                id: reservation_id.to_string(),
                actual,
                reserved: reservation.amount,
            });
        }
        let owner = reservation.owner.clone();
        let amount = reservation.amount;

        let budget = state.budget_mut(&owner, &self.settings, now);
        budget.unreserve(amount);
        budget.total_committed += actual;

        state.settle(reservation_id, ReservationState::Committed, actual, now);
        drop(state);

        tracing::debug!(
            reservation_id = %reservation_id,
            owner = %owner,
            reserved = amount,
            actual,
            "Spending committed"
        );
        Ok(())
    }

    /// Return a pending reservation's full amount to availability.
    pub fn release(&self, reservation_id: &str) -> Result<(), ReservationError> {
        let now = self.clock.now();
        let mut state = self.lock();

        let reservation = state
            .reservations
            .get(reservation_id)
            .ok_or_else(|| ReservationError::Unknown(reservation_id.to_string()))?;
        if !reservation.is_pending() {
            return Err(ReservationError::NotPending {
                id: reservation_id.to_string(),
                state: reservation.state,
            });
        }
        let owner = reservation.owner.clone();
        let amount = reservation.amount;

        state.budget_mut(&owner, &self.settings, now).unreserve(amount);
        state.settle(reservation_id, ReservationState::Released, 0.0, now);
        drop(state);

        tracing::debug!(reservation_id = %reservation_id, owner = %owner, amount, "Reservation released");
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Available budget for `owner`.
    pub fn remaining(&self, owner: &str) -> f64 {
        self.summary(owner).available
    }

    /// Current figures for `owner`, after window reset and stale expiry.
    pub fn summary(&self, owner: &str) -> BudgetSummary {
        let now = self.clock.now();
        let (summary, expired) = {
            let mut state = self.lock();
            let expired = state.touch(owner, &self.settings, now);
            (state.budget_mut(owner, &self.settings, now).summary(), expired)
        };
        self.publish_expired(expired);
        summary
    }

    /// Summaries for every owner seen so far, sorted by owner.
    pub fn summaries(&self) -> Vec<BudgetSummary> {
        let now = self.clock.now();
        let (mut summaries, expired) = {
            let mut state = self.lock();
            let owners: Vec<String> = state.budgets.keys().cloned().collect();
            let mut expired = Vec::new();
            let mut summaries = Vec::with_capacity(owners.len());
            for owner in owners {
                expired.extend(state.touch(&owner, &self.settings, now));
                summaries.push(state.budget_mut(&owner, &self.settings, now).summary());
            }
            (summaries, expired)
        };
        self.publish_expired(expired);
        summaries.sort_by(|a, b| a.owner.cmp(&b.owner));
        summaries
    }

    /// Look up a reservation by id.
    pub fn reservation(&self, reservation_id: &str) -> Option<Reservation> {
        self.lock().reservations.get(reservation_id).cloned()
    }

    /// Set a per-owner ceiling. Applies in place to an existing record.
    ///
    /// Lowering the ceiling below what the owner has already committed and
    /// reserved does not claw anything back: `committed + reserved` may sit
    /// above the new max until reservations settle or the window rolls.
    /// Availability reads as zero in the meantime and every authorization
    /// is refused.
    pub fn set_override(&self, owner: &str, max_budget: f64) -> Result<(), BudgetError> {
        if owner.trim().is_empty() {
            return Err(BudgetError::InvalidRequest("owner must not be empty".into()));
        }
        if !(max_budget > 0.0) || !max_budget.is_finite() {
            return Err(BudgetError::Configuration(format!(
                "override for '{owner}' must be > 0, got {max_budget}"
            )));
        }

        let mut state = self.lock();
        state.overrides.insert(owner.to_string(), max_budget);
        if let Some(budget) = state.budgets.get_mut(owner) {
            budget.max_budget = max_budget;
        }
        drop(state);

        tracing::info!(owner = %owner, max_budget, "Budget override set");
        Ok(())
    }

    /// Drop terminal reservations that finished more than `older_than` ago.
    /// Returns how many were removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - older_than;
        let mut state = self.lock();
        let before = state.reservations.len();
        state.reservations.retain(|_, r| {
            !(r.state.is_terminal() && r.finished_at.is_some_and(|at| at < cutoff))
        });
        before - state.reservations.len()
    }

    /// Number of reservations currently tracked (any state).
    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }
}
