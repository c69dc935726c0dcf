use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::condition::{ConditionLog, ConditionType, Operation};

/// Namespace/name pair identifying a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Configuration block for a single component, keyed by component name in
/// the platform spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub overrides: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformState {
    #[default]
    Installing,
    Upgrading,
    Ready,
    Failed,
}

impl PlatformState {
    pub fn for_condition(kind: ConditionType) -> Self {
        match kind {
            ConditionType::InstallStarted => PlatformState::Installing,
            ConditionType::UpgradeStarted => PlatformState::Upgrading,
            ConditionType::InstallComplete | ConditionType::UpgradeComplete => {
                PlatformState::Ready
            }
            ConditionType::InstallFailed | ConditionType::UpgradeFailed => PlatformState::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub state: PlatformState,
    #[serde(default)]
    pub conditions: ConditionLog,
}

/// The top-level managed record: desired platform state plus observed status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub metadata: ResourceMeta,
    #[serde(default)]
    pub spec: PlatformSpec,
    #[serde(default)]
    pub status: PlatformStatus,
}

impl ManagedResource {
    pub fn new(namespace: &str, name: &str, version: &str) -> Self {
        Self {
            metadata: ResourceMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                generation: 1,
                resource_version: None,
            },
            spec: PlatformSpec {
                version: version.to_string(),
                components: BTreeMap::new(),
            },
            status: PlatformStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.spec.components.get(name)
    }

    /// True once an install has ever completed.
    pub fn is_installed(&self) -> bool {
        self.status.conditions.contains(ConditionType::InstallComplete)
    }

    /// True when the last recorded condition is the Started marker of
    /// `operation`. A failed pass has to record Started again before the
    /// component walk resumes.
    pub fn in_progress(&self, operation: Operation) -> bool {
        self.status.conditions.is_last(operation.started())
    }

    /// True while `operation` has started or failed without completing.
    pub fn unfinished(&self, operation: Operation) -> bool {
        self.status.conditions.last().is_some_and(|last| {
            last.kind == operation.started() || last.kind == operation.failed()
        })
    }

    pub fn generation_label(&self) -> String {
        format!("generation:{}", self.metadata.generation)
    }
}
