//! # Warden Core
//!
//! Domain types, traits, and error definitions for the Warden control plane:
//! the periodic scheduler, the spending ledger, and the memory curation engine.
//! This crate has **no framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the backing store via configuration
//! - Deterministic tests with an in-memory store and a manual clock
//! - Clean dependency graph (all crates depend inward on core)

pub mod clock;
pub mod cycle;
pub mod error;
pub mod event;
pub mod memory;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{CycleLogSink, CycleResult, TaskOutcome, TaskRunStatus};
pub use error::StoreError;
pub use event::{DomainEvent, EventBus};
pub use memory::{
    CurationAction, EntryFilter, EntryKind, EntryStatus, MemoryEntry, MemoryStore, SafetyGuard,
    Severity, SweepOrder, SweepUpdate, Tier,
};
