//! Memory store implementations for Warden.
//!
//! Each backend implements both [`warden_core::MemoryStore`] (the entries the
//! curation engine sweeps) and [`warden_core::CycleLogSink`] (where scheduler
//! cycle results land).

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
