//! The four cadence-bound curation passes.
//!
//! Each pass is a short list of guarded sweep operations against the
//! store. A failing operation is logged and counted; the rest of the pass
//! still runs. Counts only ever reflect rows the store reported as changed,
//! so running a pass twice over unchanged data reports zero the second time.
//!
//! A pass never overlaps with itself. The scheduler abandons a handler that
//! overruns its timeout, so the next cycle can start the same pass while the
//! old one is still sweeping; the second run is skipped rather than counting
//! a tier's excess a second time.

use crate::policy::CurationPolicy;
use crate::scorer::MemoryScorer;
use crate::CurationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_core::{
    Clock, DomainEvent, EntryFilter, EntryKind, EntryStatus, EventBus, MemoryStore, SafetyGuard,
    SweepOrder, SweepUpdate, SystemClock, Tier,
};

/// One of the four curation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPass {
    /// Every base cycle
    Rapid,
    /// Every 3 base cycles
    Standard,
    /// Every 12 base cycles
    Hourly,
    /// Every 72 base cycles
    Deep,
}

impl SweepPass {
    pub const ALL: [SweepPass; 4] = [Self::Rapid, Self::Standard, Self::Hourly, Self::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rapid => "rapid",
            Self::Standard => "standard",
            Self::Hourly => "hourly",
            Self::Deep => "deep",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Rapid => 0,
            Self::Standard => 1,
            Self::Hourly => 2,
            Self::Deep => 3,
        }
    }

    /// Cadence as a multiple of the scheduler's base cycle.
    pub fn cycle_multiple(&self) -> u32 {
        match self {
            Self::Rapid => 1,
            Self::Standard => 3,
            Self::Hourly => 12,
            Self::Deep => 72,
        }
    }
}

impl fmt::Display for SweepPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SweepPass {
    type Err = CurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pass| pass.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CurationError::UnknownPass(s.to_string()))
    }
}

/// What a pass changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub pass: SweepPass,
    pub started_at: DateTime<Utc>,
    /// Moved to a hotter tier
    pub promoted: usize,
    /// Moved one tier colder (HOT→WARM, WARM→COLD)
    pub demoted: usize,
    /// Moved to ARCHIVE
    pub archived: usize,
    /// Tombstoned
    pub deleted: usize,
    /// Tombstones removed for good
    pub purged: usize,
    /// Beliefs whose confidence was lowered
    pub decayed: usize,
    /// Cached scores recomputed
    pub rescored: usize,
    /// Store operations that failed
    pub errors: usize,
    /// The previous run of this pass was still in progress
    pub skipped: bool,
}

impl SweepReport {
    pub fn new(pass: SweepPass, started_at: DateTime<Utc>) -> Self {
        Self {
            pass,
            started_at,
            promoted: 0,
            demoted: 0,
            archived: 0,
            deleted: 0,
            purged: 0,
            decayed: 0,
            rescored: 0,
            errors: 0,
            skipped: false,
        }
    }

    /// A pass that did not run because another run of it holds the lock.
    pub fn skipped(pass: SweepPass, started_at: DateTime<Utc>) -> Self {
        Self {
            skipped: true,
            ..Self::new(pass, started_at)
        }
    }

    /// Rows whose tier, tombstone or confidence changed.
    pub fn affected(&self) -> usize {
        self.promoted + self.demoted + self.archived + self.deleted + self.purged + self.decayed
    }

    /// One-line description, e.g. `rapid: demoted 400, deleted 3`.
    pub fn summary(&self) -> String {
        if self.skipped {
            return format!("{}: skipped, previous run still in progress", self.pass);
        }
        let counters = [
            ("promoted", self.promoted),
            ("demoted", self.demoted),
            ("archived", self.archived),
            ("deleted", self.deleted),
            ("purged", self.purged),
            ("decayed", self.decayed),
            ("rescored", self.rescored),
            ("errors", self.errors),
        ];
        let parts: Vec<String> = counters
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(label, n)| format!("{label} {n}"))
            .collect();
        if parts.is_empty() {
            format!("{}: no changes", self.pass)
        } else {
            format!("{}: {}", self.pass, parts.join(", "))
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Which report counter a sweep operation feeds.
#[derive(Debug, Clone, Copy)]
enum Counter {
    Promoted,
    Demoted,
    Archived,
    Deleted,
    Purged,
    Decayed,
}

impl SweepReport {
    fn add(&mut self, counter: Counter, n: usize) {
        match counter {
            Counter::Promoted => self.promoted += n,
            Counter::Demoted => self.demoted += n,
            Counter::Archived => self.archived += n,
            Counter::Deleted => self.deleted += n,
            Counter::Purged => self.purged += n,
            Counter::Decayed => self.decayed += n,
        }
    }
}

/// Runs curation passes against a [`MemoryStore`].
///
/// Each pass has its own lock. Different passes may run side by side; a
/// second run of the same pass while the first holds its lock returns a
/// skipped report without touching the store.
pub struct CurationEngine {
    store: Arc<dyn MemoryStore>,
    scorer: MemoryScorer,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    running: [Mutex<()>; 4],
}

impl CurationEngine {
    pub fn new(store: Arc<dyn MemoryStore>, policy: CurationPolicy) -> Result<Self, CurationError> {
        policy.validate()?;
        Ok(Self {
            store,
            scorer: MemoryScorer::new(policy),
            clock: Arc::new(SystemClock),
            events: None,
            running: Default::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish `SweepCompleted` after every pass.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &CurationPolicy {
        self.scorer.policy()
    }

    pub fn scorer(&self) -> &MemoryScorer {
        &self.scorer
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Live (non-tombstoned) entry count per tier.
    pub async fn tier_counts(&self) -> Result<Vec<(Tier, usize)>, CurationError> {
        let mut counts = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let n = self.store.count(&EntryFilter::new().tier(tier)).await?;
            counts.push((tier, n));
        }
        Ok(counts)
    }

    /// Run `pass` unless a previous run of it is still in progress.
    pub async fn run(&self, pass: SweepPass) -> SweepReport {
        let Ok(_running) = self.running[pass.index()].try_lock() else {
            warn!(%pass, "Previous run still in progress; skipping pass");
            return SweepReport::skipped(pass, self.clock.now());
        };
        match pass {
            SweepPass::Rapid => self.rapid_pass().await,
            SweepPass::Standard => self.standard_pass().await,
            SweepPass::Hourly => self.hourly_pass().await,
            SweepPass::Deep => self.deep_pass().await,
        }
    }

    /// HOT budget, read notifications, inactive sessions.
    pub async fn rapid(&self) -> SweepReport {
        self.run(SweepPass::Rapid).await
    }

    /// Archive finished tasks, cool idle HOT entries.
    pub async fn standard(&self) -> SweepReport {
        self.run(SweepPass::Standard).await
    }

    /// Promote busy COLD entries, decay unused beliefs, WARM budget,
    /// refresh stale scores.
    pub async fn hourly(&self) -> SweepReport {
        self.run(SweepPass::Hourly).await
    }

    /// Delete orphans, purge old tombstones, COLD budget.
    pub async fn deep(&self) -> SweepReport {
        self.run(SweepPass::Deep).await
    }

    async fn rapid_pass(&self) -> SweepReport {
        let now = self.clock.now();
        let policy = self.policy();
        let guard = self.guard(now);
        let mut report = SweepReport::new(SweepPass::Rapid, now);

        self.enforce_budget(&mut report, Tier::Hot, Tier::Warm, guard)
            .await;

        let read_notifications = EntryFilter::new()
            .kind(EntryKind::Notification)
            .status(EntryStatus::Read)
            .created_before(now - policy.notification_max_age)
            .guarded(guard);
        self.apply(
            &mut report,
            "read_notifications",
            &read_notifications,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::Tombstone { at: now },
            Counter::Deleted,
        )
        .await;

        let inactive_sessions = EntryFilter::new()
            .kind(EntryKind::SessionContext)
            .status(EntryStatus::Inactive)
            .created_before(now - policy.session_max_age)
            .guarded(guard);
        self.apply(
            &mut report,
            "inactive_sessions",
            &inactive_sessions,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::Tombstone { at: now },
            Counter::Deleted,
        )
        .await;

        self.finish(report)
    }

    async fn standard_pass(&self) -> SweepReport {
        let now = self.clock.now();
        let policy = self.policy();
        let guard = self.guard(now);
        let mut report = SweepReport::new(SweepPass::Standard, now);

        let finished_tasks = EntryFilter::new()
            .kind(EntryKind::Task)
            .status(EntryStatus::Completed)
            .tier(Tier::Hot)
            .tier(Tier::Warm)
            .tier(Tier::Cold)
            .max_relationships(0)
            .created_before(now - policy.completed_task_max_age)
            .guarded(guard);
        self.apply(
            &mut report,
            "completed_tasks",
            &finished_tasks,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::SetTier(Tier::Archive),
            Counter::Archived,
        )
        .await;

        let idle_hot = EntryFilter::new()
            .tier(Tier::Hot)
            .accessed_before(now - policy.hot_idle)
            .guarded(guard);
        self.apply(
            &mut report,
            "idle_hot",
            &idle_hot,
            SweepOrder::LeastRecentlyAccessed,
            policy.max_rows_per_pass,
            SweepUpdate::SetTier(Tier::Warm),
            Counter::Demoted,
        )
        .await;

        self.finish(report)
    }

    async fn hourly_pass(&self) -> SweepReport {
        let now = self.clock.now();
        let policy = self.policy();
        let guard = self.guard(now);
        let mut report = SweepReport::new(SweepPass::Hourly, now);

        let busy_cold = EntryFilter::new()
            .tier(Tier::Cold)
            .min_accesses(policy.promote_min_accesses)
            .guarded(guard);
        self.apply(
            &mut report,
            "promote_cold",
            &busy_cold,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::SetTier(Tier::Warm),
            Counter::Promoted,
        )
        .await;

        let unused_beliefs = EntryFilter::new()
            .kind(EntryKind::DURABLE)
            .accessed_before(now - policy.decay_idle)
            .confidence_below(policy.high_confidence)
            .confidence_above(policy.confidence_floor)
            .guarded(guard);
        self.apply(
            &mut report,
            "decay_confidence",
            &unused_beliefs,
            SweepOrder::LeastRecentlyAccessed,
            policy.max_rows_per_pass,
            SweepUpdate::DecayConfidence {
                step: policy.confidence_decay_step,
                floor: policy.confidence_floor,
            },
            Counter::Decayed,
        )
        .await;

        self.enforce_budget(&mut report, Tier::Warm, Tier::Cold, guard)
            .await;

        self.rescore(&mut report, now).await;

        self.finish(report)
    }

    async fn deep_pass(&self) -> SweepReport {
        let now = self.clock.now();
        let policy = self.policy();
        let guard = self.guard(now);
        let mut report = SweepReport::new(SweepPass::Deep, now);

        let orphans = EntryFilter::new()
            .max_relationships(0)
            .created_before(now - policy.orphan_max_age)
            .guarded(guard);
        self.apply(
            &mut report,
            "orphans",
            &orphans,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::Tombstone { at: now },
            Counter::Deleted,
        )
        .await;

        let expired_tombstones = EntryFilter::new()
            .tombstoned_before(now - policy.tombstone_retention)
            .guarded(guard);
        self.apply(
            &mut report,
            "purge_tombstones",
            &expired_tombstones,
            SweepOrder::OldestFirst,
            policy.max_rows_per_pass,
            SweepUpdate::Purge,
            Counter::Purged,
        )
        .await;

        self.enforce_budget(&mut report, Tier::Cold, Tier::Archive, guard)
            .await;

        self.finish(report)
    }

    fn guard(&self, now: DateTime<Utc>) -> SafetyGuard {
        let policy = self.policy();
        SafetyGuard::new(now, policy.min_age, policy.high_confidence)
    }

    /// Move the least-recently-accessed excess of `tier` into `target`.
    /// The excess is measured over every live entry in the tier; only
    /// guarded candidates move, so protected entries can leave a tier over
    /// budget.
    async fn enforce_budget(
        &self,
        report: &mut SweepReport,
        tier: Tier,
        target: Tier,
        guard: SafetyGuard,
    ) {
        let Some(budget) = self.policy().tier_max_entries(tier) else {
            return;
        };
        let operation = budget_operation(tier);
        let count = match self.store.count(&EntryFilter::new().tier(tier)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(pass = %report.pass, operation, error = %e, "Tier count failed");
                report.errors += 1;
                return;
            }
        };

        let excess = count.saturating_sub(budget);
        if excess == 0 {
            debug!(pass = %report.pass, tier = %tier.as_str(), count, budget, "Tier within budget");
            return;
        }

        let counter = if target == Tier::Archive {
            Counter::Archived
        } else {
            Counter::Demoted
        };
        self.apply(
            report,
            operation,
            &EntryFilter::new().tier(tier).guarded(guard),
            SweepOrder::LeastRecentlyAccessed,
            excess.min(self.policy().max_rows_per_pass),
            SweepUpdate::SetTier(target),
            counter,
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        report: &mut SweepReport,
        operation: &'static str,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
        update: SweepUpdate,
        counter: Counter,
    ) {
        match self.store.sweep(filter, order, limit, update).await {
            Ok(affected) => {
                debug!(pass = %report.pass, operation, affected, "Sweep operation done");
                report.add(counter, affected);
            }
            Err(e) => {
                warn!(pass = %report.pass, operation, error = %e, "Sweep operation failed");
                report.errors += 1;
            }
        }
    }

    /// Recompute cached scores that are missing or older than
    /// `rescore_after`, oldest entries first.
    async fn rescore(&self, report: &mut SweepReport, now: DateTime<Utc>) {
        let policy = self.policy();
        let stale = EntryFilter {
            kinds: EntryKind::SCORED.to_vec(),
            ..EntryFilter::default()
        }
        .score_stale_before(now - policy.rescore_after);

        let entries = match self
            .store
            .select(&stale, SweepOrder::OldestFirst, policy.max_rows_per_pass)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pass = %report.pass, operation = "rescore", error = %e, "Score selection failed");
                report.errors += 1;
                return;
            }
        };

        for entry in entries {
            let (mvs, action) = self.scorer.evaluate(&entry, now);
            match self.store.record_score(&entry.id, mvs, action, now).await {
                Ok(true) => report.rescored += 1,
                Ok(false) => debug!(id = %entry.id, "Entry vanished before rescoring"),
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Failed to record score");
                    report.errors += 1;
                }
            }
        }
    }

    fn finish(&self, report: SweepReport) -> SweepReport {
        info!(
            pass = %report.pass,
            promoted = report.promoted,
            demoted = report.demoted,
            archived = report.archived,
            deleted = report.deleted,
            purged = report.purged,
            decayed = report.decayed,
            rescored = report.rescored,
            errors = report.errors,
            "Curation pass complete"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::SweepCompleted {
                pass: report.pass.as_str().to_string(),
                affected: report.affected(),
                errors: report.errors,
                timestamp: self.clock.now(),
            });
        }
        report
    }
}

fn budget_operation(tier: Tier) -> &'static str {
    match tier {
        Tier::Hot => "hot_budget",
        Tier::Warm => "warm_budget",
        Tier::Cold => "cold_budget",
        Tier::Archive => "archive_budget",
    }
}
