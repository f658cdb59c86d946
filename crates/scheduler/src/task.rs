//! Task definitions and the handler contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;

/// What a handler sees when it is invoked.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub cycle: u64,
    pub owner: String,
    pub name: String,
    pub token_budget: u32,
    pub started_at: DateTime<Utc>,
}

/// What a handler returns on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub summary: Option<String>,
    pub tokens_used: u64,
}

impl TaskOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            tokens_used: 0,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// A handler failure. Recorded as an `error` outcome; never aborts a cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The work a scheduled task performs.
///
/// Handlers run on their own tokio task and may be abandoned when they
/// exceed their timeout, so any external side effect must be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError>;
}

/// Adapter that lets a closure returning a future act as a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// let handler = handler_fn(|ctx| async move {
///     Ok(TaskOutput::new(format!("cycle {}", ctx.cycle)))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        (self.f)(ctx).await
    }
}

/// A registered task.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Responsible agent
    pub owner: String,

    /// Unique within the owner
    pub name: String,

    /// Minutes between runs; a positive multiple of the base cycle
    pub cadence_minutes: u32,

    /// Drives the handler timeout
    pub token_budget: u32,

    pub enabled: bool,

    handler: Arc<dyn TaskHandler>,
}

impl TaskDefinition {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        cadence_minutes: u32,
        token_budget: u32,
        handler: impl TaskHandler + 'static,
    ) -> Self {
        Self::from_arc(owner, name, cadence_minutes, token_budget, Arc::new(handler))
    }

    pub fn from_arc(
        owner: impl Into<String>,
        name: impl Into<String>,
        cadence_minutes: u32,
        token_budget: u32,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            cadence_minutes,
            token_budget,
            enabled: true,
            handler,
        }
    }

    /// Register in the disabled state.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        self.handler.clone()
    }

    pub fn matches(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }

    /// Due when enabled and `cycle` is a multiple of `cadence / base`.
    pub fn should_run(&self, cycle: u64, base_cycle_minutes: u32) -> bool {
        if !self.enabled || base_cycle_minutes == 0 {
            return false;
        }
        let period = u64::from(self.cadence_minutes / base_cycle_minutes);
        period > 0 && cycle % period == 0
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("cadence_minutes", &self.cadence_minutes)
            .field("token_budget", &self.token_budget)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
