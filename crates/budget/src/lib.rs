//! Reservation-based spending ledger for Warden.
//!
//! Callers reserve an amount before doing costly work, then commit what
//! they actually spent or release the hold. Each owner has a ceiling over a
//! rolling window; a reservation that would push `committed + reserved`
//! past the ceiling is refused outright.

pub mod ledger;
pub mod model;

pub use ledger::BudgetLedger;
pub use model::{AgentBudget, BudgetSummary, LedgerSettings, Reservation, ReservationState};

/// Errors from authorizing spend or configuring the ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetError {
    /// Non-positive ceiling, window or timeout. Fatal at construction.
    #[error("invalid ledger configuration: {0}")]
    Configuration(String),

    #[error("invalid spending request: {0}")]
    InvalidRequest(String),

    /// Expected control-flow signal; ledger state is untouched.
    #[error(
        "budget exceeded for '{owner}': requested {requested:.2}, available {available:.2} \
         (committed {committed:.2}, reserved {reserved:.2}, max {max:.2})"
    )]
    BudgetExceeded {
        owner: String,
        requested: f64,
        available: f64,
        committed: f64,
        reserved: f64,
        max: f64,
    },
}

/// Misuse of a reservation id: unknown, already finished, or over-committed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReservationError {
    #[error("unknown reservation: {0}")]
    Unknown(String),

    #[error("reservation {id} is {state}, expected pending")]
    NotPending { id: String, state: ReservationState },

    #[error("cannot commit {actual} against reservation {id} of {reserved}")]
    InvalidAmount {
        id: String,
        actual: f64,
        reserved: f64,
    },
}
