use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;

/// Which per-cycle algorithm the manager runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Agents in discovery order, supervisors after
    #[default]
    Polling,
    /// Supervisors first, then agents that were erroring or fresh last cycle
    SupervisorFirst,
}

/// Content sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Captures taken per analysis
    pub sample_count: usize,
    /// Pause after each capture so tmux isn't hammered
    pub capture_delay_ms: u64,
    /// Pause between samples
    pub sample_interval_ms: u64,
    /// Bytes that must differ before a change counts as activity
    pub significant_change_bytes: usize,
    /// Upper bound on any single tmux call
    pub capture_timeout_ms: u64,
    /// How long a discovery result is reused
    pub discovery_cache_ttl_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_count: 3,
            capture_delay_ms: 100,
            sample_interval_ms: 800,
            significant_change_bytes: 10,
            capture_timeout_ms: 2_000,
            discovery_cache_ttl_secs: 5,
        }
    }
}

/// Notification throttling and delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Minimum gap between two alerts of the same type for the same agent
    pub cooldown_secs: u64,
    /// Send the report text and press Enter afterwards
    pub submit_with_enter: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            submit_with_enter: true,
        }
    }
}

/// State tracking thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// How long an agent may be absent before it's reported and forgotten
    pub missing_grace_secs: u64,
    /// Team idle for this long escalates past the PM
    pub team_idle_escalation_secs: u64,
    /// Automatic retries before an erroring agent needs a human
    pub max_submission_attempts: u32,
    /// Gap between automatic retries
    pub retry_interval_secs: u64,
    /// Silence after an error banner that counts as a crash
    pub crash_silence_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            missing_grace_secs: 30,
            team_idle_escalation_secs: 600,
            max_submission_attempts: 3,
            retry_interval_secs: 60,
            crash_silence_secs: 120,
        }
    }
}

/// Status snapshot output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Defaults to the platform data directory
    pub path: Option<PathBuf>,
    /// Readers treat older snapshots as stale
    pub max_age_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_age_secs: 30,
        }
    }
}

/// Top-level monitor configuration, read from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub strategy: StrategyKind,
    /// Seconds between the start of two cycles
    pub cycle_interval_secs: u64,
    /// Cycles slower than this are logged as over budget
    pub cycle_budget_ms: u64,
    /// Lines of scrollback captured per pane
    pub capture_lines: usize,
    /// Where recovery and escalation alerts go instead of the session PM
    pub escalation_target: Option<String>,
    pub sampling: SamplingConfig,
    pub notifications: NotificationConfig,
    pub tracking: TrackingConfig,
    pub snapshot: SnapshotConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            cycle_interval_secs: 30,
            cycle_budget_ms: 10_000,
            capture_lines: 50,
            escalation_target: None,
            sampling: SamplingConfig::default(),
            notifications: NotificationConfig::default(),
            tracking: TrackingConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-sentinel").join("config.toml"))
    }

    /// Load from `path`, or from the default location when it exists.
    /// Falls back to built-in defaults when no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.sampling.sample_count == 0 {
            return Err(MonitorError::Config(
                "sampling.sample_count must be at least 1".to_string(),
            ));
        }
        if self.sampling.capture_timeout_ms == 0 {
            return Err(MonitorError::Config(
                "sampling.capture_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.capture_lines == 0 {
            return Err(MonitorError::Config(
                "capture_lines must be at least 1".to_string(),
            ));
        }
        if self.cycle_interval_secs == 0 {
            return Err(MonitorError::Config(
                "cycle_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the status snapshot is written
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot.path.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join("agent-sentinel").join("status.json"))
        })
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.sampling.capture_timeout_ms)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_millis(self.cycle_budget_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.notifications.cooldown_secs)
    }

    pub fn missing_grace(&self) -> Duration {
        Duration::from_secs(self.tracking.missing_grace_secs)
    }

    pub fn team_idle_escalation(&self) -> Duration {
        Duration::from_secs(self.tracking.team_idle_escalation_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.retry_interval_secs)
    }

    pub fn crash_silence(&self) -> Duration {
        Duration::from_secs(self.tracking.crash_silence_secs)
    }

    /// Config with every sampling pause set to zero, for tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.sampling.capture_delay_ms = 0;
        config.sampling.sample_interval_ms = 0;
        config.sampling.discovery_cache_ttl_secs = 0;
        config.snapshot.enabled = false;
        config
    }
}
