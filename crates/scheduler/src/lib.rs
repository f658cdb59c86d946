//! The Warden heartbeat.
//!
//! Holds a registry of named tasks, each with an owning agent, a cadence
//! and a token budget. Every base cycle the scheduler picks the tasks that
//! are due, runs them under a budget-derived timeout, isolates their
//! failures and emits a [`warden_core::CycleResult`].

pub mod policy;
pub mod scheduler;
pub mod task;

pub use policy::TimeoutPolicy;
pub use scheduler::Scheduler;
pub use task::{TaskContext, TaskDefinition, TaskError, TaskHandler, TaskOutput, handler_fn};

/// Errors from configuring the scheduler or registering tasks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid task {owner}/{name}: {reason}")]
    InvalidTask {
        owner: String,
        name: String,
        reason: String,
    },

    #[error("invalid scheduler configuration: {0}")]
    Configuration(String),
}
