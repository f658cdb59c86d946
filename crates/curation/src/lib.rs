//! Memory curation for Warden.
//!
//! [`MemoryScorer`] turns an entry's attributes into a Memory Value Score
//! and a recommended action. [`CurationEngine`] runs the four cadence-bound
//! passes that keep each tier inside its entry budget, and
//! [`register_curation_tasks`] hands those passes to the scheduler.
//!
//! Every pass goes through a [`SafetyGuard`](warden_core::SafetyGuard):
//! protected kinds, entries younger than a day, strong beliefs and tasks
//! in flight are never modified, whatever their score says.

pub mod engine;
pub mod policy;
pub mod scorer;
pub mod tasks;

pub use engine::{CurationEngine, SweepPass, SweepReport};
pub use policy::CurationPolicy;
pub use scorer::{MemoryScorer, ScoreBreakdown};
pub use tasks::{SweepTask, register_curation_tasks};

use warden_core::StoreError;

/// Errors from building the engine or running a pass outside the scheduler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CurationError {
    #[error("invalid curation policy: {0}")]
    Policy(String),

    #[error("unknown sweep pass '{0}', expected rapid, standard, hourly or deep")]
    UnknownPass(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
