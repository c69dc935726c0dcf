//! In-memory port implementations for embedding and tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodReadinessGate, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rigger_domain::{ManagedResource, ObjectKey, Selector};

use crate::{ClusterError, ClusterPort, ReleaseInfo, ReleasePort, ReleaseRequest, ReleaseStatus};

#[derive(Debug, Default)]
struct ClusterState {
    platforms: BTreeMap<ObjectKey, ManagedResource>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    stateful_sets: BTreeMap<ObjectKey, StatefulSet>,
    pods: BTreeMap<ObjectKey, Pod>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    deleted_pods: Vec<ObjectKey>,
    status_writes: usize,
    unavailable: Option<String>,
}

/// Cluster view backed by maps. Platform status writes are checked against
/// the stored resource version the way an API server would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn available(&self) -> Result<MutexGuard<'_, ClusterState>, ClusterError> {
        let state = self.lock();
        if let Some(reason) = &state.unavailable {
            return Err(ClusterError::Api(reason.clone()));
        }
        Ok(state)
    }

    /// Stores `resource`, assigning a fresh resource version.
    pub fn put_platform(&self, mut resource: ManagedResource) -> ManagedResource {
        let mut state = self.lock();
        let version = next_version(state.platforms.get(&resource.key()));
        resource.metadata.resource_version = Some(version);
        state.platforms.insert(resource.key(), resource.clone());
        resource
    }

    pub fn platform(&self, key: &ObjectKey) -> Option<ManagedResource> {
        self.lock().platforms.get(key).cloned()
    }

    pub fn put_deployment(&self, deployment: Deployment) {
        let key = meta_key(&deployment.metadata);
        self.lock().deployments.insert(key, deployment);
    }

    pub fn put_stateful_set(&self, stateful_set: StatefulSet) {
        let key = meta_key(&stateful_set.metadata);
        self.lock().stateful_sets.insert(key, stateful_set);
    }

    pub fn put_pod(&self, pod: Pod) {
        let key = meta_key(&pod.metadata);
        self.lock().pods.insert(key, pod);
    }

    pub fn namespace_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().namespaces.get(name).cloned()
    }

    pub fn deleted_pods(&self) -> Vec<ObjectKey> {
        self.lock().deleted_pods.clone()
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    /// Makes every call fail with an API error until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }
}

fn meta_key(meta: &ObjectMeta) -> ObjectKey {
    ObjectKey::new(
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn next_version(current: Option<&ManagedResource>) -> String {
    let current = current
        .and_then(|resource| resource.metadata.resource_version.as_deref())
        .and_then(|version| version.parse::<u64>().ok())
        .unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl ClusterPort for InMemoryCluster {
    async fn get_platform(&self, key: &ObjectKey) -> Result<ManagedResource, ClusterError> {
        self.available()?
            .platforms
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Platform", key))
    }

    async fn list_platforms(&self) -> Result<Vec<ManagedResource>, ClusterError> {
        Ok(self.available()?.platforms.values().cloned().collect())
    }

    async fn replace_platform_status(
        &self,
        resource: &mut ManagedResource,
    ) -> Result<(), ClusterError> {
        let mut state = self.available()?;
        let key = resource.key();
        let stored = state
            .platforms
            .get(&key)
            .ok_or_else(|| ClusterError::not_found("Platform", &key))?;
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(ClusterError::Conflict {
                kind: "Platform",
                key: key.to_string(),
                message: "the object has been modified; please apply your changes to the latest version".to_string(),
            });
        }

        let version = next_version(Some(stored));
        let mut updated = stored.clone();
        updated.status = resource.status.clone();
        updated.metadata.resource_version = Some(version.clone());
        state.platforms.insert(key, updated);
        state.status_writes += 1;
        resource.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, ClusterError> {
        self.available()?
            .deployments
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Deployment", key))
    }

    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError> {
        self.available()?
            .stateful_sets
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("StatefulSet", key))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Pod>, ClusterError> {
        let state = self.available()?;
        let empty = BTreeMap::new();
        Ok(state
            .pods
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .filter(|(_, pod)| selector.matches(pod.metadata.labels.as_ref().unwrap_or(&empty)))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut state = self.available()?;
        if state.pods.remove(key).is_none() {
            return Err(ClusterError::not_found("Pod", key));
        }
        state.deleted_pods.push(key.clone());
        Ok(())
    }

    async fn apply_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.available()?;
        state
            .namespaces
            .entry(name.to_string())
            .or_default()
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

pub fn deployment(namespace: &str, name: &str, replicas: i32, ready: i32) -> Deployment {
    Deployment {
        metadata: object_meta(namespace, name, BTreeMap::new()),
        status: Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stateful_set(namespace: &str, name: &str, replicas: i32, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: object_meta(namespace, name, BTreeMap::new()),
        status: Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod with the given labels, declared readiness gates, and the subset of
/// those gates whose condition is currently `True`.
pub fn pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    gates: &[&str],
    satisfied: &[&str],
) -> Pod {
    let labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut conditions = vec![PodCondition {
        type_: "Ready".to_string(),
        status: if gates.len() == satisfied.len() { "True" } else { "False" }.to_string(),
        ..Default::default()
    }];
    conditions.extend(gates.iter().map(|gate| PodCondition {
        type_: gate.to_string(),
        status: if satisfied.contains(gate) { "True" } else { "False" }.to_string(),
        ..Default::default()
    }));

    Pod {
        metadata: object_meta(namespace, name, labels),
        spec: Some(PodSpec {
            readiness_gates: Some(
                gates
                    .iter()
                    .map(|gate| PodReadinessGate {
                        condition_type: gate.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: Some(PodStatus {
            conditions: Some(conditions),
            ..Default::default()
        }),
    }
}

fn object_meta(namespace: &str, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: if labels.is_empty() { None } else { Some(labels) },
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct ReleaseState {
    releases: BTreeMap<ObjectKey, ReleaseInfo>,
    failures: BTreeMap<String, String>,
    calls: Vec<String>,
}

/// Packaging stand-in that records calls and can be told to fail per release.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReleases {
    state: Arc<Mutex<ReleaseState>>,
}

impl InMemoryReleases {
    fn lock(&self) -> MutexGuard<'_, ReleaseState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn fail(&self, name: &str, message: &str) {
        self.lock()
            .failures
            .insert(name.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, name: &str) {
        self.lock().failures.remove(name);
    }

    pub fn put_release(&self, info: ReleaseInfo) {
        let key = ObjectKey::new(&info.namespace, &info.name);
        self.lock().releases.insert(key, info);
    }

    /// Calls in order, formatted as `install:<name>` / `upgrade:<name>`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn apply(&self, operation: &str, request: &ReleaseRequest, require_existing: bool) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("{operation}:{}", request.name));
        let key = ObjectKey::new(&request.namespace, &request.name);
        if let Some(message) = state.failures.get(&request.name).cloned() {
            state.releases.insert(
                key,
                ReleaseInfo {
                    name: request.name.clone(),
                    namespace: request.namespace.clone(),
                    version: request.version.clone(),
                    status: ReleaseStatus::Failed,
                },
            );
            anyhow::bail!("{operation} of release {} failed: {message}", request.name);
        }
        if require_existing && !state.releases.contains_key(&key) {
            anyhow::bail!("release {} not found in {}", request.name, request.namespace);
        }
        state.releases.insert(
            key,
            ReleaseInfo {
                name: request.name.clone(),
                namespace: request.namespace.clone(),
                version: request.version.clone(),
                status: ReleaseStatus::Deployed,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ReleasePort for InMemoryReleases {
    async fn release(&self, name: &str, namespace: &str) -> Result<Option<ReleaseInfo>> {
        Ok(self
            .lock()
            .releases
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }

    async fn install(&self, request: &ReleaseRequest) -> Result<()> {
        self.apply("install", request, false)
    }

    async fn upgrade(&self, request: &ReleaseRequest) -> Result<()> {
        self.apply("upgrade", request, true)
    }
}
