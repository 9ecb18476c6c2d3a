//! Scheduler configuration (cronwheel.toml + CRONWHEEL_* env overrides).
//!
//! An explicit object passed into the scheduler at construction — there
//! is no ambient global state.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick cadence in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Global cap on concurrently executing tasks.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Catch up on runs whose scheduled instant passed while the
    /// scheduler was down (per-task `catch_up` still required).
    #[serde(default = "bool_true")]
    pub handle_missed_tasks: bool,
    #[serde(default)]
    pub timezone: TimezonePolicy,
}

/// How per-task timezones resolve against the scheduler-wide default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimezonePolicy {
    /// Scheduler-wide default timezone.
    #[serde(default = "default_timezone")]
    pub default: String,
    /// Resolve timezone names against the IANA database at registration.
    #[serde(default = "bool_true")]
    pub validate: bool,
    /// Strict mode: a per-task override that differs from the default
    /// fails registration. Flexible mode lets the task override win.
    #[serde(default)]
    pub strict: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            handle_missed_tasks: true,
            timezone: TimezonePolicy::default(),
        }
    }
}

impl Default for TimezonePolicy {
    fn default() -> Self {
        Self {
            default: DEFAULT_TIMEZONE.to_string(),
            validate: true,
            strict: false,
        }
    }
}

impl SchedulerConfig {
    /// Load config from a TOML file with CRONWHEEL_* env var overrides
    /// (`CRONWHEEL_TIMEZONE__STRICT=true` targets `timezone.strict`).
    /// A missing file is fine — defaults and env vars still apply.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            SchedulerConfig::default(),
        ));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("CRONWHEEL_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn bool_true() -> bool {
    true
}
