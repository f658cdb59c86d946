//! Memory store model: entries, tiers, filters, and the store trait.
//!
//! The store is an external collaborator owned by the agent workflows.
//! Warden only reads entries and writes tier, score and curation metadata
//! through the narrow [`MemoryStore`] contract:
//! - point read / upsert by id
//! - a sweep primitive (select up to N matching entries, order, update)
//! - a counter query used for tier budget checks and reporting

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ── Taxonomy ──────────────────────────────────────────────────────────────

/// Storage tier, hottest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Archive,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "HOT",
            Self::Warm => "WARM",
            Self::Cold => "COLD",
            Self::Archive => "ARCHIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOT" => Some(Self::Hot),
            "WARM" => Some(Self::Warm),
            "COLD" => Some(Self::Cold),
            "ARCHIVE" => Some(Self::Archive),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an entry is. The first ten kinds are scored by the MVS formula;
/// the last four are protected and never touched by any curation pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Belief,
    Reflection,
    Analysis,
    Synthesis,
    Recommendation,
    CompressedContext,
    Task,
    Entry,
    SessionContext,
    Notification,
    AgentIdentity,
    Credential,
    SystemConfig,
    Migration,
}

impl EntryKind {
    /// The most durable, curated kind. High-confidence entries of this kind
    /// are protected and subject to confidence decay when unused.
    pub const DURABLE: EntryKind = EntryKind::Belief;

    /// Kinds the MVS formula scores.
    pub const SCORED: [EntryKind; 10] = [
        EntryKind::Belief,
        EntryKind::Reflection,
        EntryKind::Analysis,
        EntryKind::Synthesis,
        EntryKind::Recommendation,
        EntryKind::CompressedContext,
        EntryKind::Task,
        EntryKind::Entry,
        EntryKind::SessionContext,
        EntryKind::Notification,
    ];

    /// Kinds no sweep may ever modify or delete.
    pub const PROTECTED: [EntryKind; 4] = [
        EntryKind::AgentIdentity,
        EntryKind::Credential,
        EntryKind::SystemConfig,
        EntryKind::Migration,
    ];

    pub fn is_protected(&self) -> bool {
        Self::PROTECTED.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Belief => "belief",
            Self::Reflection => "reflection",
            Self::Analysis => "analysis",
            Self::Synthesis => "synthesis",
            Self::Recommendation => "recommendation",
            Self::CompressedContext => "compressed_context",
            Self::Task => "task",
            Self::Entry => "entry",
            Self::SessionContext => "session_context",
            Self::Notification => "notification",
            Self::AgentIdentity => "agent_identity",
            Self::Credential => "credential",
            Self::SystemConfig => "system_config",
            Self::Migration => "migration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s.trim() {
            "belief" => Self::Belief,
            "reflection" => Self::Reflection,
            "analysis" => Self::Analysis,
            "synthesis" => Self::Synthesis,
            "recommendation" => Self::Recommendation,
            "compressed_context" => Self::CompressedContext,
            "task" => Self::Task,
            "entry" => Self::Entry,
            "session_context" => Self::SessionContext,
            "notification" => Self::Notification,
            "agent_identity" => Self::AgentIdentity,
            "credential" => Self::Credential,
            "system_config" => Self::SystemConfig,
            "migration" => Self::Migration,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Lifecycle state. One field covers task progress, notification read
/// state and session activity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Open,
    Active,
    InProgress,
    Completed,
    Cancelled,
    Read,
    Inactive,
}

impl EntryStatus {
    /// Work that is currently being carried out.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Read => "read",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s.trim() {
            "open" => Self::Open,
            "active" => Self::Active,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "read" => Self::Read,
            "inactive" => Self::Inactive,
            _ => return None,
        };
        Some(status)
    }
}

/// Recommended curation action derived from an MVS score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurationAction {
    Keep,
    Improve,
    Demote,
    Prune,
}

impl CurationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "KEEP",
            Self::Improve => "IMPROVE",
            Self::Demote => "DEMOTE",
            Self::Prune => "PRUNE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KEEP" => Some(Self::Keep),
            "IMPROVE" => Some(Self::Improve),
            "DEMOTE" => Some(Self::Demote),
            "PRUNE" => Some(Self::Prune),
            _ => None,
        }
    }
}

impl std::fmt::Display for CurationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entry ─────────────────────────────────────────────────────────────────

/// A single memory entry as seen by the curation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    /// Unique ID for this entry
    pub id: String,

    /// Entry kind
    pub kind: EntryKind,

    /// Current storage tier
    pub tier: Tier,

    /// When this entry was created
    pub created_at: DateTime<Utc>,

    /// When this entry was last read by any agent
    pub last_accessed: DateTime<Utc>,

    /// Reads over the trailing seven days
    pub access_count_7d: u32,

    /// Author confidence in [0, 1]
    pub confidence: f64,

    /// Optional severity (findings, alerts)
    pub severity: Option<Severity>,

    /// Number of links to other entries
    pub relationship_count: u32,

    /// Reads by agents other than the owner
    pub cross_agent_access_count: u32,

    /// Size of the entry in tokens
    pub token_count: u32,

    /// Lifecycle state
    #[serde(default)]
    pub status: EntryStatus,

    /// Tombstone mark; tombstoned entries are invisible to normal queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Cached Memory Value Score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mvs_score: Option<f64>,

    /// Action recommended by the last scoring run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curation_action: Option<CurationAction>,

    /// When the cached score was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scored_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    /// Create an entry with neutral attributes: never accessed since
    /// creation, confidence 0.5, no links, empty body.
    pub fn new(id: impl Into<String>, kind: EntryKind, tier: Tier, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            tier,
            created_at,
            last_accessed: created_at,
            access_count_7d: 0,
            confidence: 0.5,
            severity: None,
            relationship_count: 0,
            cross_agent_access_count: 0,
            token_count: 0,
            status: EntryStatus::Open,
            deleted_at: None,
            mvs_score: None,
            curation_action: None,
            scored_at: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_last_accessed(mut self, at: DateTime<Utc>) -> Self {
        self.last_accessed = at;
        self
    }

    pub fn with_access_count(mut self, count: u32) -> Self {
        self.access_count_7d = count;
        self
    }

    pub fn with_relationships(mut self, count: u32) -> Self {
        self.relationship_count = count;
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.token_count = tokens;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Age at `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ── Filters ───────────────────────────────────────────────────────────────

/// Structural exclusions applied by every curation pass.
///
/// An entry passes the guard only if it is not a protected kind, is at least
/// as old as the age cutoff, is not a high-confidence durable entry, and is
/// not a task that is actively being worked on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyGuard {
    /// Entries created after this instant are too young to touch.
    pub min_age_cutoff: DateTime<Utc>,
    /// Durable entries at or above this confidence are protected.
    pub high_confidence: f64,
}

impl SafetyGuard {
    pub fn new(now: DateTime<Utc>, min_age: Duration, high_confidence: f64) -> Self {
        Self {
            min_age_cutoff: now - min_age,
            high_confidence,
        }
    }

    pub fn admits(&self, entry: &MemoryEntry) -> bool {
        if entry.kind.is_protected() {
            return false;
        }
        if entry.created_at > self.min_age_cutoff {
            return false;
        }
        if entry.kind == EntryKind::DURABLE && entry.confidence >= self.high_confidence {
            return false;
        }
        !(entry.kind == EntryKind::Task && entry.status.is_active())
    }
}

/// A conjunction of optional predicates over entries.
///
/// `matches` is the reference semantics; store implementations must select
/// exactly the entries it accepts. Empty lists mean "any". Tombstoned
/// entries are excluded unless `tombstoned_before` is set, in which case
/// only tombstones marked before that instant match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub tiers: Vec<Tier>,
    pub kinds: Vec<EntryKind>,
    pub statuses: Vec<EntryStatus>,
    pub created_before: Option<DateTime<Utc>>,
    pub accessed_before: Option<DateTime<Utc>>,
    pub min_access_count_7d: Option<u32>,
    pub max_relationship_count: Option<u32>,
    pub confidence_below: Option<f64>,
    pub confidence_above: Option<f64>,
    pub tombstoned_before: Option<DateTime<Utc>>,
    /// Entries never scored, or scored before this instant.
    pub score_stale_before: Option<DateTime<Utc>>,
    pub guard: Option<SafetyGuard>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn accessed_before(mut self, at: DateTime<Utc>) -> Self {
        self.accessed_before = Some(at);
        self
    }

    pub fn min_accesses(mut self, count: u32) -> Self {
        self.min_access_count_7d = Some(count);
        self
    }

    pub fn max_relationships(mut self, count: u32) -> Self {
        self.max_relationship_count = Some(count);
        self
    }

    pub fn confidence_below(mut self, value: f64) -> Self {
        self.confidence_below = Some(value);
        self
    }

    pub fn confidence_above(mut self, value: f64) -> Self {
        self.confidence_above = Some(value);
        self
    }

    pub fn tombstoned_before(mut self, at: DateTime<Utc>) -> Self {
        self.tombstoned_before = Some(at);
        self
    }

    pub fn score_stale_before(mut self, at: DateTime<Utc>) -> Self {
        self.score_stale_before = Some(at);
        self
    }

    pub fn guarded(mut self, guard: SafetyGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        match (self.tombstoned_before, entry.deleted_at) {
            (None, Some(_)) => return false,
            (Some(_), None) => return false,
            (Some(cutoff), Some(marked)) if marked >= cutoff => return false,
            _ => {}
        }
        if !self.tiers.is_empty() && !self.tiers.contains(&entry.tier) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&entry.kind) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&entry.status) {
            return false;
        }
        if self.created_before.is_some_and(|at| entry.created_at >= at) {
            return false;
        }
        if self.accessed_before.is_some_and(|at| entry.last_accessed >= at) {
            return false;
        }
        if self.min_access_count_7d.is_some_and(|n| entry.access_count_7d < n) {
            return false;
        }
        if self.max_relationship_count.is_some_and(|n| entry.relationship_count > n) {
            return false;
        }
        if self.confidence_below.is_some_and(|c| entry.confidence >= c) {
            return false;
        }
        if self.confidence_above.is_some_and(|c| entry.confidence <= c) {
            return false;
        }
        if let Some(at) = self.score_stale_before
            && entry.scored_at.is_some_and(|scored| scored >= at)
        {
            return false;
        }
        self.guard.is_none_or(|guard| guard.admits(entry))
    }
}

/// Order in which a sweep visits matching entries. Ties break on id so
/// repeated sweeps over the same data are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOrder {
    LeastRecentlyAccessed,
    OldestFirst,
}

impl SweepOrder {
    pub fn compare(&self, a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
        let primary = match self {
            Self::LeastRecentlyAccessed => a.last_accessed.cmp(&b.last_accessed),
            Self::OldestFirst => a.created_at.cmp(&b.created_at),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// The single field update a sweep applies to every selected entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepUpdate {
    /// Move to another tier.
    SetTier(Tier),
    /// Soft-delete: set the tombstone mark.
    Tombstone { at: DateTime<Utc> },
    /// Remove permanently.
    Purge,
    /// `confidence = max(confidence - step, floor)`.
    DecayConfidence { step: f64, floor: f64 },
}

impl SweepUpdate {
    /// Apply to an in-memory entry. `Purge` is a removal and is left to the
    /// store; it leaves the entry untouched here.
    pub fn apply(&self, entry: &mut MemoryEntry) {
        match *self {
            Self::SetTier(tier) => entry.tier = tier,
            Self::Tombstone { at } => entry.deleted_at = Some(at),
            Self::Purge => {}
            Self::DecayConfidence { step, floor } => {
                entry.confidence = (entry.confidence - step).max(floor);
            }
        }
    }
}

// ── Store trait ───────────────────────────────────────────────────────────

/// The backing store contract consumed by the curation engine.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
/// Each call is expected to be atomic on its own; nothing spans calls.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Get an entry by ID (tombstoned entries included).
    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError>;

    /// Insert or replace an entry.
    async fn upsert(&self, entry: MemoryEntry) -> Result<(), StoreError>;

    /// Read up to `limit` matching entries in `order`.
    async fn select(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError>;

    /// Count matching entries.
    async fn count(&self, filter: &EntryFilter) -> Result<usize, StoreError>;

    /// Select up to `limit` matching entries in `order` and apply `update`
    /// to each. Returns the number of entries affected.
    async fn sweep(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
        update: SweepUpdate,
    ) -> Result<usize, StoreError>;

    /// Write score metadata for one entry. Returns false if the id is unknown.
    async fn record_score(
        &self,
        id: &str,
        score: f64,
        action: CurationAction,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
