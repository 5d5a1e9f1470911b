//! Orchestrator configuration.

use crate::error::{Result, StratusError};
use crate::outputs::OutputProjection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default time allowed for a parent create or delete to settle.
///
/// Matches the build timeout the multi-region scenario runs under. `None`
/// (set explicitly) waits indefinitely.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 1200;

/// Tunables for a [`MultiRegionOrchestrator`](crate::MultiRegionOrchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay between two status polls of the same child
    pub poll_interval_ms: u64,

    /// Default timeout of `wait_for_create` (None = wait forever)
    pub create_timeout_secs: Option<u64>,

    /// Default timeout of `wait_for_delete` (None = wait forever)
    pub delete_timeout_secs: Option<u64>,

    /// Per-child monitor deadline in milliseconds (None = poll until the
    /// parent wait gives up)
    pub monitor_deadline_ms: Option<u64>,

    /// Treat NOT_FOUND as DELETE_COMPLETE while waiting for deletion
    pub success_on_not_found: bool,

    /// How child outputs are exposed in the parent
    pub output_projection: OutputProjection,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            create_timeout_secs: Some(DEFAULT_WAIT_TIMEOUT_SECS),
            delete_timeout_secs: Some(DEFAULT_WAIT_TIMEOUT_SECS),
            monitor_deadline_ms: None,
            success_on_not_found: true,
            output_projection: OutputProjection::Full,
        }
    }
}

/// Whole milliseconds of `duration`, at least 1, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl OrchestratorConfig {
    /// Load configuration from a JSON file, falling back to defaults when absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StratusError::Io { path: path.to_path_buf(), source: e })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            StratusError::InvalidConfig { reason: format!("Failed to parse config: {}", e) }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StratusError::Io { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            StratusError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(path, content)
            .map_err(|e| StratusError::Io { path: path.to_path_buf(), source: e })
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(StratusError::InvalidConfig {
                reason: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.monitor_deadline_ms == Some(0) {
            return Err(StratusError::InvalidConfig {
                reason: "monitor_deadline_ms must be greater than zero when set".to_string(),
            });
        }
        if let OutputProjection::Key(key) = &self.output_projection {
            if key.is_empty() {
                return Err(StratusError::InvalidConfig {
                    reason: "output_projection key must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn create_timeout(&self) -> Option<Duration> {
        self.create_timeout_secs.map(Duration::from_secs)
    }

    pub fn delete_timeout(&self) -> Option<Duration> {
        self.delete_timeout_secs.map(Duration::from_secs)
    }

    pub fn monitor_deadline(&self) -> Option<Duration> {
        self.monitor_deadline_ms.map(Duration::from_millis)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    pub fn with_monitor_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.monitor_deadline_ms = deadline.map(millis);
        self
    }

    pub fn with_output_projection(mut self, projection: OutputProjection) -> Self {
        self.output_projection = projection;
        self
    }

    pub fn with_success_on_not_found(mut self, enabled: bool) -> Self {
        self.success_on_not_found = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_explicit() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.create_timeout(), Some(Duration::from_secs(1200)));
        assert_eq!(config.monitor_deadline(), None);
        assert!(config.success_on_not_found);
        assert_eq!(config.output_projection, OutputProjection::Full);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OrchestratorConfig::from_json(
            r#"{"poll_interval_ms": 250, "create_timeout_secs": null, "output_projection": {"key": "value"}}"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.create_timeout(), None);
        assert_eq!(config.delete_timeout(), Some(Duration::from_secs(1200)));
        assert_eq!(config.output_projection, OutputProjection::Key("value".to_string()));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = OrchestratorConfig::from_json(r#"{"poll_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, StratusError::InvalidConfig { .. }));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("stratus.json");

        let config = OrchestratorConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_success_on_not_found(false);
        config.save(&path).unwrap();

        assert_eq!(OrchestratorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_builders_keep_sub_second_precision() {
        let config = OrchestratorConfig::default()
            .with_poll_interval(Duration::from_micros(10))
            .with_monitor_deadline(Some(Duration::from_millis(1900)));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.monitor_deadline(), Some(Duration::from_millis(1900)));

        let config = OrchestratorConfig::default().with_monitor_deadline(Some(Duration::MAX));
        assert_eq!(config.monitor_deadline_ms, Some(u64::MAX));
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let err = OrchestratorConfig::from_json(r#"{"monitor_deadline_ms": 0}"#).unwrap_err();
        assert!(matches!(err, StratusError::InvalidConfig { .. }));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = OrchestratorConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }
}
