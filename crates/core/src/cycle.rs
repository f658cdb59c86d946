//! Scheduler cycle records and the sink they are persisted to.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single task invocation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Success,
    Timeout,
    Error,
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one task within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOutcome {
    pub owner: String,
    pub name: String,
    pub status: TaskRunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Handler summary on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Error text on timeout or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskRunStatus::Success
    }

    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Summary of one scheduler cycle. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleResult {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tasks_run: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    /// Per-task outcomes, ordered by (owner, name).
    pub outcomes: Vec<TaskOutcome>,
    /// Tokens reported by successful tasks.
    pub total_tokens: u64,
}

impl CycleResult {
    /// Build a result from outcomes, deriving every count.
    pub fn from_outcomes(
        cycle: u64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        outcomes: Vec<TaskOutcome>,
    ) -> Self {
        let tasks_succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let total_tokens = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.tokens_used)
            .sum();
        Self {
            cycle,
            started_at,
            ended_at,
            tasks_run: outcomes.len(),
            tasks_succeeded,
            tasks_failed: outcomes.len() - tasks_succeeded,
            outcomes,
            total_tokens,
        }
    }

    /// Outcome for a given task, if it ran this cycle.
    pub fn outcome(&self, owner: &str, name: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.owner == owner && o.name == name)
    }
}

/// Where cycle results are persisted. Write failures are the caller's to
/// log and swallow; a sink error never fails a cycle.
#[async_trait]
pub trait CycleLogSink: Send + Sync {
    async fn record_cycle(&self, result: &CycleResult) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn outcome(name: &str, status: TaskRunStatus, tokens: u64) -> TaskOutcome {
        let now = Utc::now();
        TaskOutcome {
            owner: "curator".into(),
            name: name.into(),
            status,
            started_at: now,
            ended_at: now + Duration::milliseconds(250),
            summary: None,
            error: None,
            tokens_used: tokens,
        }
    }

    #[test]
    fn counts_derive_from_outcomes() {
        let now = Utc::now();
        let result = CycleResult::from_outcomes(
            3,
            now,
            now,
            vec![
                outcome("a", TaskRunStatus::Success, 120),
                outcome("b", TaskRunStatus::Timeout, 999),
                outcome("c", TaskRunStatus::Error, 0),
                outcome("d", TaskRunStatus::Success, 30),
            ],
        );
        assert_eq!(result.tasks_run, 4);
        assert_eq!(result.tasks_succeeded, 2);
        assert_eq!(result.tasks_failed, 2);
        assert_eq!(result.total_tokens, 150);
        assert_eq!(result.outcome("curator", "b").unwrap().status, TaskRunStatus::Timeout);
        assert!(result.outcome("other", "a").is_none());
    }

    #[test]
    fn outcome_duration() {
        let o = outcome("a", TaskRunStatus::Success, 0);
        assert_eq!(o.duration_ms(), 250);
    }

    #[test]
    fn cycle_result_serializes_flat() {
        let now = Utc::now();
        let result =
            CycleResult::from_outcomes(1, now, now, vec![outcome("a", TaskRunStatus::Error, 0)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["cycle"], 1);
        assert_eq!(json["tasks_failed"], 1);
        assert_eq!(json["outcomes"][0]["status"], "error");
    }
}
