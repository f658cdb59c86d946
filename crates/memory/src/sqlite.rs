//! SQLite store.
//!
//! Uses a single SQLite database file with two tables:
//! - `memory_entries`: one row per entry, including curation metadata
//! - `cycle_log`: one row per scheduler cycle, outcomes as a JSON column
//!
//! Every [`EntryFilter`] is translated to a parameterized WHERE clause that
//! selects exactly what `EntryFilter::matches` accepts. Sweeps run as one
//! `UPDATE`/`DELETE ... WHERE id IN (SELECT ... LIMIT n)` statement so each
//! is atomic on its own.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use warden_core::{
    CurationAction, CycleLogSink, CycleResult, EntryFilter, EntryKind, EntryStatus, MemoryEntry,
    MemoryStore, Severity, StoreError, SweepOrder, SweepUpdate, Tier,
};

/// A SQLite-backed memory store and cycle log.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives and dies with its connection; keep
        // exactly one and never recycle it.
        let pool_options = if path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_entries (
                id                       TEXT PRIMARY KEY NOT NULL,
                kind                     TEXT NOT NULL,
                tier                     TEXT NOT NULL,
                created_at               TEXT NOT NULL,
                last_accessed            TEXT NOT NULL,
                access_count_7d          INTEGER NOT NULL,
                confidence               REAL NOT NULL,
                severity                 TEXT,
                relationship_count       INTEGER NOT NULL,
                cross_agent_access_count INTEGER NOT NULL,
                token_count              INTEGER NOT NULL,
                status                   TEXT NOT NULL,
                deleted_at               TEXT,
                mvs_score                REAL,
                curation_action          TEXT,
                scored_at                TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("memory_entries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_tier_accessed ON memory_entries(tier, last_accessed)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("tier index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_deleted ON memory_entries(deleted_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("deleted_at index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycle_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle           INTEGER NOT NULL,
                started_at      TEXT NOT NULL,
                ended_at        TEXT NOT NULL,
                tasks_run       INTEGER NOT NULL,
                tasks_succeeded INTEGER NOT NULL,
                tasks_failed    INTEGER NOT NULL,
                total_tokens    INTEGER NOT NULL,
                outcomes        TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("cycle_log table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Most recent cycle results, newest first.
    pub async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleResult>, StoreError> {
        let rows = sqlx::query("SELECT * FROM cycle_log ORDER BY id DESC LIMIT ?1")
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("cycle_log read: {e}")))?;
        rows.iter().map(row_to_cycle).collect()
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so lexical order is chronological order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_ts(id: &str, column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed {
            id: id.to_string(),
            reason: format!("{column}: {e}"),
        })
}

fn get<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn get_u32(row: &sqlx::sqlite::SqliteRow, id: &str, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = get(row, column)?;
    u32::try_from(raw).map_err(|_| StoreError::Malformed {
        id: id.to_string(),
        reason: format!("{column} out of range: {raw}"),
    })
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryEntry, StoreError> {
    let id: String = get(row, "id")?;
    let malformed = |reason: String| StoreError::Malformed {
        id: id.clone(),
        reason,
    };

    let kind_raw: String = get(row, "kind")?;
    let kind = EntryKind::parse(&kind_raw).ok_or_else(|| malformed(format!("kind '{kind_raw}'")))?;
    let tier_raw: String = get(row, "tier")?;
    let tier = Tier::parse(&tier_raw).ok_or_else(|| malformed(format!("tier '{tier_raw}'")))?;
    let status_raw: String = get(row, "status")?;
    let status =
        EntryStatus::parse(&status_raw).ok_or_else(|| malformed(format!("status '{status_raw}'")))?;

    let severity = match get::<Option<String>>(row, "severity")? {
        Some(raw) => Some(Severity::parse(&raw).ok_or_else(|| malformed(format!("severity '{raw}'")))?),
        None => None,
    };
    let curation_action = match get::<Option<String>>(row, "curation_action")? {
        Some(raw) => Some(
            CurationAction::parse(&raw).ok_or_else(|| malformed(format!("curation_action '{raw}'")))?,
        ),
        None => None,
    };

    let created_at = parse_ts(&id, "created_at", &get::<String>(row, "created_at")?)?;
    let last_accessed = parse_ts(&id, "last_accessed", &get::<String>(row, "last_accessed")?)?;
    let deleted_at = get::<Option<String>>(row, "deleted_at")?
        .map(|raw| parse_ts(&id, "deleted_at", &raw))
        .transpose()?;
    let scored_at = get::<Option<String>>(row, "scored_at")?
        .map(|raw| parse_ts(&id, "scored_at", &raw))
        .transpose()?;

    Ok(MemoryEntry {
        access_count_7d: get_u32(row, &id, "access_count_7d")?,
        relationship_count: get_u32(row, &id, "relationship_count")?,
        cross_agent_access_count: get_u32(row, &id, "cross_agent_access_count")?,
        token_count: get_u32(row, &id, "token_count")?,
        confidence: get(row, "confidence")?,
        mvs_score: get(row, "mvs_score")?,
        id,
        kind,
        tier,
        created_at,
        last_accessed,
        severity,
        status,
        deleted_at,
        curation_action,
        scored_at,
    })
}

fn row_to_cycle(row: &sqlx::sqlite::SqliteRow) -> Result<CycleResult, StoreError> {
    let cycle: i64 = get(row, "cycle")?;
    let key = format!("cycle-{cycle}");
    let outcomes_json: String = get(row, "outcomes")?;
    let outcomes = serde_json::from_str(&outcomes_json).map_err(|e| StoreError::Malformed {
        id: key.clone(),
        reason: format!("outcomes: {e}"),
    })?;
    let started_at = parse_ts(&key, "started_at", &get::<String>(row, "started_at")?)?;
    let ended_at = parse_ts(&key, "ended_at", &get::<String>(row, "ended_at")?)?;
    Ok(CycleResult::from_outcomes(
        u64::try_from(cycle).unwrap_or_default(),
        started_at,
        ended_at,
        outcomes,
    ))
}

// ── Filter translation ────────────────────────────────────────────────────

fn push_in<'a, T, F>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, values: &[T], as_str: F)
where
    F: Fn(&T) -> &'static str,
{
    if values.is_empty() {
        return;
    }
    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(as_str(value));
    }
    separated.push_unseparated(")");
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EntryFilter) {
    qb.push(" WHERE 1 = 1");

    match filter.tombstoned_before {
        None => {
            qb.push(" AND deleted_at IS NULL");
        }
        Some(cutoff) => {
            qb.push(" AND deleted_at IS NOT NULL AND deleted_at < ")
                .push_bind(ts(cutoff));
        }
    }

    push_in(qb, "tier", &filter.tiers, |t| t.as_str());
    push_in(qb, "kind", &filter.kinds, |k| k.as_str());
    push_in(qb, "status", &filter.statuses, |s| s.as_str());

    if let Some(at) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(ts(at));
    }
    if let Some(at) = filter.accessed_before {
        qb.push(" AND last_accessed < ").push_bind(ts(at));
    }
    if let Some(n) = filter.min_access_count_7d {
        qb.push(" AND access_count_7d >= ").push_bind(i64::from(n));
    }
    if let Some(n) = filter.max_relationship_count {
        qb.push(" AND relationship_count <= ").push_bind(i64::from(n));
    }
    if let Some(c) = filter.confidence_below {
        qb.push(" AND confidence < ").push_bind(c);
    }
    if let Some(c) = filter.confidence_above {
        qb.push(" AND confidence > ").push_bind(c);
    }
    if let Some(at) = filter.score_stale_before {
        qb.push(" AND (scored_at IS NULL OR scored_at < ")
            .push_bind(ts(at))
            .push(")");
    }

    if let Some(guard) = filter.guard {
        push_in(qb, "kind NOT", &EntryKind::PROTECTED, |k| k.as_str());
        qb.push(" AND created_at <= ").push_bind(ts(guard.min_age_cutoff));
        qb.push(" AND NOT (kind = ")
            .push_bind(EntryKind::DURABLE.as_str())
            .push(" AND confidence >= ")
            .push_bind(guard.high_confidence)
            .push(")");
        qb.push(" AND NOT (kind = ")
            .push_bind(EntryKind::Task.as_str())
            .push(" AND status IN (")
            .push_bind(EntryStatus::Active.as_str())
            .push(", ")
            .push_bind(EntryStatus::InProgress.as_str())
            .push("))");
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Sqlite>, order: SweepOrder) {
    qb.push(match order {
        SweepOrder::LeastRecentlyAccessed => " ORDER BY last_accessed ASC, id ASC",
        SweepOrder::OldestFirst => " ORDER BY created_at ASC, id ASC",
    });
}

fn push_selection(
    qb: &mut QueryBuilder<'_, Sqlite>,
    filter: &EntryFilter,
    order: SweepOrder,
    limit: usize,
) {
    qb.push("SELECT id FROM memory_entries");
    push_filter(qb, filter);
    push_order(qb, order);
    qb.push(" LIMIT ").push_bind(to_i64(limit));
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM memory_entries WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET failed: {e}")))?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn upsert(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO memory_entries (
                id, kind, tier, created_at, last_accessed, access_count_7d, confidence,
                severity, relationship_count, cross_agent_access_count, token_count, status,
                deleted_at, mvs_score, curation_action, scored_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                tier = excluded.tier,
                created_at = excluded.created_at,
                last_accessed = excluded.last_accessed,
                access_count_7d = excluded.access_count_7d,
                confidence = excluded.confidence,
                severity = excluded.severity,
                relationship_count = excluded.relationship_count,
                cross_agent_access_count = excluded.cross_agent_access_count,
                token_count = excluded.token_count,
                status = excluded.status,
                deleted_at = excluded.deleted_at,
                mvs_score = excluded.mvs_score,
                curation_action = excluded.curation_action,
                scored_at = excluded.scored_at
            "#,
        )
        .bind(&entry.id)
        .bind(entry.kind.as_str())
        .bind(entry.tier.as_str())
        .bind(ts(entry.created_at))
        .bind(ts(entry.last_accessed))
        .bind(i64::from(entry.access_count_7d))
        .bind(entry.confidence)
        .bind(entry.severity.map(|s| s.as_str()))
        .bind(i64::from(entry.relationship_count))
        .bind(i64::from(entry.cross_agent_access_count))
        .bind(i64::from(entry.token_count))
        .bind(entry.status.as_str())
        .bind(entry.deleted_at.map(ts))
        .bind(entry.mvs_score)
        .bind(entry.curation_action.map(|a| a.as_str()))
        .bind(entry.scored_at.map(ts))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT failed: {e}")))?;

        debug!("Upserted memory entry {}", entry.id);
        Ok(())
    }

    async fn select(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM memory_entries");
        push_filter(&mut qb, filter);
        push_order(&mut qb, order);
        qb.push(" LIMIT ").push_bind(to_i64(limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT failed: {e}")))?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn count(&self, filter: &EntryFilter) -> Result<usize, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM memory_entries");
        push_filter(&mut qb, filter);

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT failed: {e}")))?;
        let n: i64 = get(&row, "n")?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    async fn sweep(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
        update: SweepUpdate,
    ) -> Result<usize, StoreError> {
        if limit == 0 {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("");
        match update {
            SweepUpdate::SetTier(tier) => {
                qb.push("UPDATE memory_entries SET tier = ").push_bind(tier.as_str());
            }
            SweepUpdate::Tombstone { at } => {
                qb.push("UPDATE memory_entries SET deleted_at = ").push_bind(ts(at));
            }
            SweepUpdate::Purge => {
                qb.push("DELETE FROM memory_entries");
            }
            SweepUpdate::DecayConfidence { step, floor } => {
                qb.push("UPDATE memory_entries SET confidence = MAX(confidence - ")
                    .push_bind(step)
                    .push(", ")
                    .push_bind(floor)
                    .push(")");
            }
        }
        qb.push(" WHERE id IN (");
        push_selection(&mut qb, filter, order, limit);
        qb.push(")");

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("SWEEP failed: {e}")))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn record_score(
        &self,
        id: &str,
        score: f64,
        action: CurationAction,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE memory_entries SET mvs_score = ?1, curation_action = ?2, scored_at = ?3 WHERE id = ?4",
        )
        .bind(score)
        .bind(action.as_str())
        .bind(ts(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("score update failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CycleLogSink for SqliteStore {
    async fn record_cycle(&self, result: &CycleResult) -> Result<(), StoreError> {
        let outcomes = serde_json::to_string(&result.outcomes)
            .map_err(|e| StoreError::Storage(format!("outcomes serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO cycle_log (
                cycle, started_at, ended_at, tasks_run, tasks_succeeded, tasks_failed,
                total_tokens, outcomes
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(i64::try_from(result.cycle).unwrap_or(i64::MAX))
        .bind(ts(result.started_at))
        .bind(ts(result.ended_at))
        .bind(to_i64(result.tasks_run))
        .bind(to_i64(result.tasks_succeeded))
        .bind(to_i64(result.tasks_failed))
        .bind(i64::try_from(result.total_tokens).unwrap_or(i64::MAX))
        .bind(outcomes)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("cycle_log insert failed: {e}")))?;

        debug!(cycle = result.cycle, "Cycle result persisted");
        Ok(())
    }
}
