//! Scoring tables and sweep thresholds.

use crate::CurationError;
use chrono::Duration;
use warden_config::CurationConfig;
use warden_core::{EntryKind, Severity, Tier};

/// Every constant the scorer and the sweeps consult.
///
/// The lookup tables (type weights, half-lives, token targets, severity
/// boosts) are fixed. The remaining fields are tunables; `Default` is the
/// reference policy and [`CurationPolicy::from_config`] overrides the ones
/// exposed in `[curation]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CurationPolicy {
    /// Entries younger than this are never touched and always score KEEP
    pub min_age: Duration,

    /// Beliefs at or above this confidence are protected
    pub high_confidence: f64,

    /// Multiplier applied to protected entries
    pub safety_multiplier: f64,

    /// Cap on rows a single operation may touch
    pub max_rows_per_pass: usize,

    pub hot_max_entries: usize,
    pub warm_max_entries: usize,
    pub cold_max_entries: usize,

    /// Read notifications older than this are deleted (rapid)
    pub notification_max_age: Duration,

    /// Inactive sessions older than this are deleted (rapid)
    pub session_max_age: Duration,

    /// Completed, unreferenced tasks older than this are archived (standard)
    pub completed_task_max_age: Duration,

    /// HOT entries unread for this long move to WARM (standard)
    pub hot_idle: Duration,

    /// COLD entries with at least this many reads in 7 days move to WARM (hourly)
    pub promote_min_accesses: u32,

    /// Beliefs unread for this long lose confidence (hourly)
    pub decay_idle: Duration,
    pub confidence_decay_step: f64,
    pub confidence_floor: f64,

    /// Cached scores older than this are recomputed (hourly)
    pub rescore_after: Duration,

    /// Relationship-less entries older than this are deleted (deep)
    pub orphan_max_age: Duration,

    /// Tombstones older than this are purged (deep)
    pub tombstone_retention: Duration,
}

impl Default for CurationPolicy {
    fn default() -> Self {
        Self {
            min_age: Duration::hours(24),
            high_confidence: 0.9,
            safety_multiplier: 100.0,
            max_rows_per_pass: 500,
            hot_max_entries: 1_600,
            warm_max_entries: 8_000,
            cold_max_entries: 40_000,
            notification_max_age: Duration::days(7),
            session_max_age: Duration::hours(24),
            completed_task_max_age: Duration::days(14),
            hot_idle: Duration::hours(12),
            promote_min_accesses: 3,
            decay_idle: Duration::days(7),
            confidence_decay_step: 0.05,
            confidence_floor: 0.3,
            rescore_after: Duration::hours(1),
            orphan_max_age: Duration::days(7),
            tombstone_retention: Duration::days(30),
        }
    }
}

impl CurationPolicy {
    pub fn from_config(config: &CurationConfig) -> Result<Self, CurationError> {
        let policy = Self {
            high_confidence: config.high_confidence_threshold,
            max_rows_per_pass: config.max_rows_per_pass,
            hot_max_entries: config.hot_max_entries,
            warm_max_entries: config.warm_max_entries,
            cold_max_entries: config.cold_max_entries,
            confidence_decay_step: config.confidence_decay_step,
            confidence_floor: config.confidence_floor,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), CurationError> {
        if self.max_rows_per_pass == 0 {
            return Err(CurationError::Policy("max_rows_per_pass must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.high_confidence) {
            return Err(CurationError::Policy(format!(
                "high_confidence must be in [0, 1], got {}",
                self.high_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor)
            || self.confidence_floor >= self.high_confidence
        {
            return Err(CurationError::Policy(format!(
                "confidence_floor must be in [0, high_confidence), got {}",
                self.confidence_floor
            )));
        }
        if !(self.confidence_decay_step > 0.0) || self.confidence_decay_step > 1.0 {
            return Err(CurationError::Policy(format!(
                "confidence_decay_step must be in (0, 1], got {}",
                self.confidence_decay_step
            )));
        }
        if !(self.safety_multiplier >= 1.0) {
            return Err(CurationError::Policy(format!(
                "safety_multiplier must be >= 1, got {}",
                self.safety_multiplier
            )));
        }
        Ok(())
    }

    /// Base importance of each kind.
    pub fn type_weight(&self, kind: EntryKind) -> f64 {
        match kind {
            EntryKind::Belief => 5.0,
            EntryKind::Reflection | EntryKind::Synthesis => 4.0,
            EntryKind::Analysis => 3.5,
            EntryKind::Recommendation | EntryKind::Task => 3.0,
            EntryKind::CompressedContext => 2.5,
            EntryKind::Entry => 2.0,
            EntryKind::SessionContext => 1.0,
            EntryKind::Notification => 0.5,
            EntryKind::AgentIdentity
            | EntryKind::Credential
            | EntryKind::SystemConfig
            | EntryKind::Migration => 10.0,
        }
    }

    /// Recency half-life in days. `None` means the kind does not decay.
    pub fn half_life_days(&self, kind: EntryKind) -> Option<f64> {
        match kind {
            EntryKind::Belief => Some(90.0),
            EntryKind::Reflection | EntryKind::Synthesis => Some(60.0),
            EntryKind::Analysis | EntryKind::CompressedContext | EntryKind::Entry => Some(30.0),
            EntryKind::Recommendation => Some(14.0),
            EntryKind::Notification => Some(3.0),
            EntryKind::SessionContext => Some(1.0),
            _ => None,
        }
    }

    /// Token size above which an entry in `tier` is penalised.
    pub fn tier_token_target(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Hot => 2_000,
            Tier::Warm => 1_000,
            Tier::Cold | Tier::Archive => 500,
        }
    }

    /// Entry-count budget per tier. ARCHIVE is unbounded.
    pub fn tier_max_entries(&self, tier: Tier) -> Option<usize> {
        match tier {
            Tier::Hot => Some(self.hot_max_entries),
            Tier::Warm => Some(self.warm_max_entries),
            Tier::Cold => Some(self.cold_max_entries),
            Tier::Archive => None,
        }
    }

    pub fn severity_boost(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => 1.0,
            Severity::High => 0.6,
            Severity::Medium => 0.3,
            Severity::Low => 0.1,
        }
    }
}
