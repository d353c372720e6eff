use crate::circuit_breaker::registry::BreakerRegistry;
use crate::circuit_breaker::types::BreakerConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{BreakerError, Result};
use crate::metrics::MetricsNotifier;
use crate::notifier::{CompositeNotifier, TracingNotifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Configuration for breakers without an explicit entry
    #[serde(default)]
    pub default: BreakerConfig,
    /// Per-resource overrides, keyed by breaker name
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerOverride>,
    /// Snapshot storage
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
    /// Deadline for bounded calls in seconds
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding one JSON snapshot per breaker
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
}

fn default_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join("circuit_breakers")
}

/// Per-breaker settings; omitted fields are taken from `default`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
}

impl BreakerOverride {
    /// Layer this override over `base`
    pub fn apply(&self, base: &BreakerConfig) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            window_secs: self.window_secs.unwrap_or(base.window_secs),
            cooldown_secs: self.cooldown_secs.unwrap_or(base.cooldown_secs),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
        }
    }
}

impl GateConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BreakerError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.default
            .validate()
            .map_err(|e| BreakerError::Config(format!("default breaker: {}", e)))?;

        for (name, overrides) in &self.breakers {
            if name.trim().is_empty() {
                return Err(BreakerError::Config(
                    "Breaker name cannot be empty".to_string(),
                ));
            }
            overrides
                .apply(&self.default)
                .validate()
                .map_err(|e| BreakerError::Config(format!("breaker '{}': {}", name, e)))?;
        }

        if self.call_timeout_secs == Some(0) {
            return Err(BreakerError::Config(
                "call_timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(persistence) = &self.persistence {
            if persistence.dir.as_os_str().is_empty() {
                return Err(BreakerError::Config(
                    "persistence.dir cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Effective configuration for `name`
    pub fn breaker_config(&self, name: &str) -> BreakerConfig {
        match self.breakers.get(name) {
            Some(overrides) => overrides.apply(&self.default),
            None => self.default.clone(),
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Registry with logging and metrics notifiers and every configured breaker created
    pub fn build_registry(&self) -> Result<BreakerRegistry> {
        self.build_registry_with_clock(Arc::new(SystemClock))
    }

    pub fn build_registry_with_clock(&self, clock: Arc<dyn Clock>) -> Result<BreakerRegistry> {
        self.validate()?;

        let notifier = CompositeNotifier::new()
            .with(Arc::new(TracingNotifier))
            .with(Arc::new(MetricsNotifier));
        let registry = BreakerRegistry::new(self.default.clone())?
            .with_notifier(Arc::new(notifier))
            .with_clock(clock);

        for (name, overrides) in &self.breakers {
            registry.get_or_create(name, &overrides.apply(&self.default))?;
        }
        Ok(registry)
    }
}
