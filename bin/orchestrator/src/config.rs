//! Centralized orchestrator configuration.
//!
//! Loaded via the `config` crate from `ADPULSE_`-prefixed environment
//! variables, with `__` separating nested keys:
//!
//! ```text
//! ADPULSE_SCHEDULER__POOL_SIZE=4
//! ADPULSE_SCHEDULER__TICK_INTERVAL_MS=500
//! ADPULSE_HEALTH__ERROR_RATE_WINDOW_HOURS=6
//! ```

use crate::error::OrchestratorError;
use adpulse_scheduler::SchedulerOptions;
use serde::Deserialize;
use std::time::Duration;

/// Orchestrator configuration composed from per-component sections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

/// Scheduler tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of fires that may execute at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Interval between dispatch passes, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How late a fire may start before it is dropped, in seconds.
    #[serde(default = "default_misfire_grace_secs")]
    pub default_misfire_grace_secs: u64,

    /// Whether missed fires collapse into one run by default.
    #[serde(default = "default_coalesce")]
    pub default_coalesce: bool,
}

/// Health reporting tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Trailing window handed to error-rate probes.
    #[serde(default = "default_error_rate_window_hours")]
    pub error_rate_window_hours: u32,

    /// How often the orchestrator logs a metrics heartbeat, in seconds.
    /// Zero disables the heartbeat.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_pool_size() -> usize {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_misfire_grace_secs() -> u64 {
    60
}

fn default_coalesce() -> bool {
    true
}

fn default_error_rate_window_hours() -> u32 {
    24
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            tick_interval_ms: default_tick_interval_ms(),
            default_misfire_grace_secs: default_misfire_grace_secs(),
            default_coalesce: default_coalesce(),
        }
    }
}

impl SchedulerConfig {
    /// Converts to the scheduler's own option type.
    #[must_use]
    pub fn options(&self) -> SchedulerOptions {
        SchedulerOptions::default()
            .with_pool_size(self.pool_size)
            .with_tick_interval(Duration::from_millis(self.tick_interval_ms))
            .with_default_misfire_grace(Duration::from_secs(self.default_misfire_grace_secs))
            .with_default_coalesce(self.default_coalesce)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_rate_window_hours: default_error_rate_window_hours(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is out of
    /// range.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        Self::from_environment(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("ADPULSE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn from_environment(environment: config::Environment) -> Result<Self, OrchestratorError> {
        let config: Self = config::Config::builder()
            .add_source(environment)
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| OrchestratorError::Config {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler or health reporting cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Config` naming the first bad key.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let invalid = |details: &str| {
            Err(OrchestratorError::Config {
                details: details.to_string(),
            })
        };
        if self.scheduler.pool_size == 0 {
            return invalid("scheduler.pool_size must be at least 1");
        }
        if self.scheduler.tick_interval_ms == 0 {
            return invalid("scheduler.tick_interval_ms must be at least 1");
        }
        if self.health.error_rate_window_hours == 0 {
            return invalid("health.error_rate_window_hours must be at least 1");
        }
        Ok(())
    }
}
