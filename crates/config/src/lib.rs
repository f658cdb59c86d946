//! Configuration loading, validation, and management for Warden.
//!
//! Loads configuration from `~/.warden/config.toml` with environment
//! variable overrides. Validates all settings at startup; a validation
//! failure is the one error that is allowed to stop the process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.warden/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduler heartbeat settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Spending ledger settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Memory curation settings
    #[serde(default)]
    pub curation: CurationConfig,

    /// Backing store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Length of one cycle; every task cadence must be a multiple of it
    #[serde(default = "default_base_cycle_minutes")]
    pub base_cycle_minutes: u32,

    /// Due tasks executed at once within a cycle (1 = sequential)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Minimum handler timeout
    #[serde(default = "default_timeout_floor_secs")]
    pub timeout_floor_secs: u64,

    /// Allowed execution rate used to turn a token budget into a timeout
    #[serde(default = "default_timeout_tokens_per_second")]
    pub timeout_tokens_per_second: f64,
}

fn default_base_cycle_minutes() -> u32 {
    5
}
fn default_max_concurrent_tasks() -> usize {
    1
}
fn default_timeout_floor_secs() -> u64 {
    30
}
fn default_timeout_tokens_per_second() -> f64 {
    100.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_cycle_minutes: default_base_cycle_minutes(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            timeout_floor_secs: default_timeout_floor_secs(),
            timeout_tokens_per_second: default_timeout_tokens_per_second(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling applied to every owner without an override
    #[serde(default = "default_max_budget")]
    pub default_max_budget: f64,

    /// Rolling window length
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Pending reservations older than this are force-released
    #[serde(default = "default_stale_reservation_minutes")]
    pub stale_reservation_minutes: u32,

    /// Per-owner ceilings (owner → max budget)
    #[serde(default)]
    pub overrides: HashMap<String, f64>,
}

fn default_max_budget() -> f64 {
    100_000.0
}
fn default_window_hours() -> u32 {
    24
}
fn default_stale_reservation_minutes() -> u32 {
    30
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_max_budget: default_max_budget(),
            window_hours: default_window_hours(),
            stale_reservation_minutes: default_stale_reservation_minutes(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationConfig {
    /// Whether the four curation passes are registered with the scheduler
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Agent identifier that owns the curation tasks
    #[serde(default = "default_curation_owner")]
    pub owner: String,

    /// Upper bound on rows a single operation may touch per pass
    #[serde(default = "default_max_rows_per_pass")]
    pub max_rows_per_pass: usize,

    /// Entry-count budgets per tier
    #[serde(default = "default_hot_max_entries")]
    pub hot_max_entries: usize,

    #[serde(default = "default_warm_max_entries")]
    pub warm_max_entries: usize,

    #[serde(default = "default_cold_max_entries")]
    pub cold_max_entries: usize,

    /// Durable entries at or above this confidence are protected
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,

    /// Confidence removed per hourly pass from unused durable entries
    #[serde(default = "default_confidence_decay_step")]
    pub confidence_decay_step: f64,

    /// Confidence never decays below this
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Token budget per pass (drives each handler's timeout)
    #[serde(default)]
    pub token_budgets: PassTokenBudgets,
}

fn default_curation_owner() -> String {
    "curator".into()
}
fn default_max_rows_per_pass() -> usize {
    500
}
fn default_hot_max_entries() -> usize {
    1_600
}
fn default_warm_max_entries() -> usize {
    8_000
}
fn default_cold_max_entries() -> usize {
    40_000
}
fn default_high_confidence_threshold() -> f64 {
    0.9
}
fn default_confidence_decay_step() -> f64 {
    0.05
}
fn default_confidence_floor() -> f64 {
    0.3
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner: default_curation_owner(),
            max_rows_per_pass: default_max_rows_per_pass(),
            hot_max_entries: default_hot_max_entries(),
            warm_max_entries: default_warm_max_entries(),
            cold_max_entries: default_cold_max_entries(),
            high_confidence_threshold: default_high_confidence_threshold(),
            confidence_decay_step: default_confidence_decay_step(),
            confidence_floor: default_confidence_floor(),
            token_budgets: PassTokenBudgets::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassTokenBudgets {
    #[serde(default = "default_rapid_tokens")]
    pub rapid: u32,
    #[serde(default = "default_standard_tokens")]
    pub standard: u32,
    #[serde(default = "default_hourly_tokens")]
    pub hourly: u32,
    #[serde(default = "default_deep_tokens")]
    pub deep: u32,
}

fn default_rapid_tokens() -> u32 {
    2_000
}
fn default_standard_tokens() -> u32 {
    5_000
}
fn default_hourly_tokens() -> u32 {
    10_000
}
fn default_deep_tokens() -> u32 {
    20_000
}

impl Default for PassTokenBudgets {
    fn default() -> Self {
        Self {
            rapid: default_rapid_tokens(),
            standard: default_standard_tokens(),
            hourly: default_hourly_tokens(),
            deep: default_deep_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite file; defaults to `~/.warden/memory.sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The SQLite file to open.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => AppConfig::config_dir().join("memory.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.warden/config.toml).
    ///
    /// Environment variables override file values:
    /// - `WARDEN_STORE_BACKEND`
    /// - `WARDEN_STORE_PATH`
    /// - `WARDEN_BASE_CYCLE_MINUTES`
    /// - `WARDEN_DEFAULT_BUDGET`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production), then re-validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("WARDEN_STORE_BACKEND") {
            self.store.backend = backend;
        }

        if let Some(path) = lookup("WARDEN_STORE_PATH") {
            self.store.path = Some(path);
        }

        if let Some(raw) = lookup("WARDEN_BASE_CYCLE_MINUTES") {
            self.scheduler.base_cycle_minutes = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "WARDEN_BASE_CYCLE_MINUTES must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("WARDEN_DEFAULT_BUDGET") {
            self.budget.default_max_budget = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "WARDEN_DEFAULT_BUDGET must be a number, got '{raw}'"
                ))
            })?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".warden")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if self.scheduler.base_cycle_minutes == 0 {
            return fail("scheduler.base_cycle_minutes must be > 0");
        }
        if self.scheduler.max_concurrent_tasks == 0 {
            return fail("scheduler.max_concurrent_tasks must be >= 1");
        }
        if self.scheduler.timeout_tokens_per_second <= 0.0 {
            return fail("scheduler.timeout_tokens_per_second must be > 0");
        }

        if !(self.budget.default_max_budget > 0.0) {
            return fail("budget.default_max_budget must be > 0");
        }
        if self.budget.window_hours == 0 {
            return fail("budget.window_hours must be > 0");
        }
        if self.budget.stale_reservation_minutes == 0 {
            return fail("budget.stale_reservation_minutes must be > 0");
        }
        if let Some((owner, _)) = self.budget.overrides.iter().find(|(_, max)| !(**max > 0.0)) {
            return Err(ConfigError::ValidationError(format!(
                "budget.overrides.{owner} must be > 0"
            )));
        }

        let c = &self.curation;
        if c.owner.trim().is_empty() {
            return fail("curation.owner must not be empty");
        }
        if c.max_rows_per_pass == 0 {
            return fail("curation.max_rows_per_pass must be > 0");
        }
        if c.hot_max_entries == 0 || c.warm_max_entries == 0 || c.cold_max_entries == 0 {
            return fail("curation tier budgets must be > 0");
        }
        if !(0.0..=1.0).contains(&c.high_confidence_threshold)
            || !(0.0..=1.0).contains(&c.confidence_floor)
        {
            return fail("curation confidence thresholds must be within [0, 1]");
        }
        if c.confidence_floor >= c.high_confidence_threshold {
            return fail("curation.confidence_floor must be below high_confidence_threshold");
        }
        if c.confidence_decay_step <= 0.0 {
            return fail("curation.confidence_decay_step must be > 0");
        }
        let budgets = &c.token_budgets;
        if budgets.rapid == 0 || budgets.standard == 0 || budgets.hourly == 0 || budgets.deep == 0
        {
            return fail("curation token budgets must be > 0");
        }

        match self.store.backend.as_str() {
            "sqlite" | "in_memory" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "store.backend must be 'sqlite' or 'in_memory', got '{other}'"
            ))),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
