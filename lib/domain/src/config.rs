use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub reconcile: ReconcileSettings,
    pub watchdog: WatchdogSettings,
    pub platform: PlatformApiConfig,
}

impl OperatorConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read operator config at {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("Failed to parse operator config at {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.watchdog.stall_threshold_secs == 0 {
            anyhow::bail!("watchdog.stall_threshold_secs must be greater than zero");
        }
        if self.platform.group.is_empty() || self.platform.kind.is_empty() {
            anyhow::bail!("platform.group and platform.kind are required");
        }
        Ok(())
    }
}

/// Requeue delays handed back to the caller, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub started_requeue_secs: u64,
    pub retry_requeue_secs: u64,
    pub not_ready_requeue_secs: u64,
    pub ready_poll_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            started_requeue_secs: 1,
            retry_requeue_secs: 5,
            not_ready_requeue_secs: 15,
            ready_poll_secs: 60,
        }
    }
}

impl ReconcileSettings {
    pub fn started_requeue(&self) -> Duration {
        Duration::from_secs(self.started_requeue_secs)
    }

    pub fn retry_requeue(&self) -> Duration {
        Duration::from_secs(self.retry_requeue_secs)
    }

    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_secs(self.ready_poll_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub stall_threshold_secs: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 300,
        }
    }
}

impl WatchdogSettings {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }
}

/// API coordinates of the platform custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformApiConfig {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub field_manager: String,
}

impl Default for PlatformApiConfig {
    fn default() -> Self {
        Self {
            group: "install.rigger.dev".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Platform".to_string(),
            plural: "platforms".to_string(),
            field_manager: "rigger-operator".to_string(),
        }
    }
}
