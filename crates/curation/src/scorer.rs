//! Memory Value Score (MVS).
//!
//! ```text
//! MVS = (type_weight + recency + frequency + quality + centrality
//!        + cross_agent - bloat_penalty) × safety_multiplier
//! ```
//!
//! rounded to two decimals. The scorer is pure: it reads the entry and the
//! supplied `now`, nothing else.

use crate::policy::CurationPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_core::{CurationAction, EntryKind, MemoryEntry};

const RECENCY_MAX: f64 = 3.0;
const FREQUENCY_MAX: f64 = 2.0;
const QUALITY_MAX: f64 = 2.0;
const CENTRALITY_MAX: f64 = 1.5;
const CENTRALITY_SATURATION: f64 = 10.0;
const CROSS_AGENT_STEP: f64 = 0.5;
const CROSS_AGENT_MAX: f64 = 2.0;
const BLOAT_MAX: f64 = 1.5;

/// Each term of the score, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub type_weight: f64,
    pub recency: f64,
    pub frequency: f64,
    pub quality: f64,
    pub centrality: f64,
    pub cross_agent: f64,
    pub bloat_penalty: f64,
    pub safety_multiplier: f64,
    /// Sum of the terms before the multiplier
    pub raw: f64,
    /// Final rounded score
    pub mvs: f64,
}

impl ScoreBreakdown {
    pub fn action(&self) -> CurationAction {
        MemoryScorer::action_for(self.mvs)
    }

    pub fn is_protected(&self) -> bool {
        self.safety_multiplier > 1.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryScorer {
    policy: CurationPolicy,
}

impl MemoryScorer {
    pub fn new(policy: CurationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CurationPolicy {
        &self.policy
    }

    pub fn breakdown(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> ScoreBreakdown {
        let policy = &self.policy;
        let age = entry.age(now);
        let age_days = (age.num_seconds() as f64 / 86_400.0).max(0.0);

        let type_weight = policy.type_weight(entry.kind);

        let recency = match policy.half_life_days(entry.kind) {
            Some(half_life) => (RECENCY_MAX * 0.5_f64.powf(age_days / half_life)).min(RECENCY_MAX),
            None => RECENCY_MAX,
        };

        let frequency = (FREQUENCY_MAX * f64::from(entry.access_count_7d).ln_1p() / 100_f64.ln())
            .min(FREQUENCY_MAX);

        let severity_boost = entry
            .severity
            .map_or(0.0, |severity| policy.severity_boost(severity));
        let quality = (entry.confidence * 2.0 + severity_boost).min(QUALITY_MAX);

        let centrality = CENTRALITY_MAX
            * (f64::from(entry.relationship_count) / CENTRALITY_SATURATION).min(1.0);

        let cross_agent =
            (f64::from(entry.cross_agent_access_count) * CROSS_AGENT_STEP).min(CROSS_AGENT_MAX);

        let target = f64::from(policy.tier_token_target(entry.tier));
        let tokens = f64::from(entry.token_count);
        let bloat_penalty = if tokens <= target {
            0.0
        } else {
            (((tokens - target) / target) * BLOAT_MAX).min(BLOAT_MAX)
        };

        let protected = age < policy.min_age
            || (entry.kind == EntryKind::Task && entry.status.is_active())
            || (entry.kind == EntryKind::DURABLE && entry.confidence >= policy.high_confidence);
        let safety_multiplier = if protected {
            policy.safety_multiplier
        } else {
            1.0
        };

        let raw = type_weight + recency + frequency + quality + centrality + cross_agent
            - bloat_penalty;

        ScoreBreakdown {
            type_weight,
            recency,
            frequency,
            quality,
            centrality,
            cross_agent,
            bloat_penalty,
            safety_multiplier,
            raw,
            mvs: round2(raw * safety_multiplier),
        }
    }

    pub fn mvs(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        self.breakdown(entry, now).mvs
    }

    /// Score and recommended action in one call.
    pub fn evaluate(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> (f64, CurationAction) {
        let breakdown = self.breakdown(entry, now);
        (breakdown.mvs, breakdown.action())
    }

    /// `>= 8` KEEP (the safety floor always lands here), `>= 3` IMPROVE,
    /// `>= 1.5` DEMOTE, otherwise PRUNE.
    pub fn action_for(mvs: f64) -> CurationAction {
        if mvs >= 8.0 {
            CurationAction::Keep
        } else if mvs >= 3.0 {
            CurationAction::Improve
        } else if mvs >= 1.5 {
            CurationAction::Demote
        } else {
            CurationAction::Prune
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
