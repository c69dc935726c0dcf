//! Ports the reconciler consumes: cluster access, packaging, and time.

pub mod clock;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use rigger_domain::{ManagedResource, ObjectKey, Selector};

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{InMemoryCluster, InMemoryReleases};

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        kind: &'static str,
        key: String,
        message: String,
    },
    #[error("failed to decode {kind} {key}: {message}")]
    Decode {
        kind: &'static str,
        key: String,
        message: String,
    },
    #[error("cluster API request failed: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, key: impl fmt::Display) -> Self {
        ClusterError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Typed read/write access to the platform records and the workload objects
/// backing each component.
#[async_trait]
pub trait ClusterPort: Send + Sync {
    async fn get_platform(&self, key: &ObjectKey) -> Result<ManagedResource, ClusterError>;

    async fn list_platforms(&self) -> Result<Vec<ManagedResource>, ClusterError>;

    /// Replaces the stored status with `resource.status`. On success the
    /// resource version in `resource.metadata` is refreshed.
    async fn replace_platform_status(
        &self,
        resource: &mut ManagedResource,
    ) -> Result<(), ClusterError>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, ClusterError>;

    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError>;

    async fn list_pods(&self, namespace: &str, selector: &Selector)
    -> Result<Vec<Pod>, ClusterError>;

    async fn delete_pod(&self, key: &ObjectKey) -> Result<(), ClusterError>;

    /// Create-or-update a namespace carrying `labels`.
    async fn apply_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    PendingInstall,
    PendingUpgrade,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub status: ReleaseStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Packaging collaborator that renders and applies a component's manifests.
#[async_trait]
pub trait ReleasePort: Send + Sync {
    async fn release(&self, name: &str, namespace: &str) -> Result<Option<ReleaseInfo>>;

    async fn install(&self, request: &ReleaseRequest) -> Result<()>;

    async fn upgrade(&self, request: &ReleaseRequest) -> Result<()>;
}

#[derive(Clone)]
pub struct PortSet {
    pub cluster: Arc<dyn ClusterPort>,
    pub releases: Arc<dyn ReleasePort>,
    pub clock: Arc<dyn Clock>,
}

impl PortSet {
    pub fn new(
        cluster: Arc<dyn ClusterPort>,
        releases: Arc<dyn ReleasePort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cluster,
            releases,
            clock,
        }
    }

    /// In-memory ports with the system clock.
    pub fn in_memory() -> Self {
        Self {
            cluster: Arc::new(InMemoryCluster::default()),
            releases: Arc::new(InMemoryReleases::default()),
            clock: Arc::new(SystemClock),
        }
    }
}
