//! Readiness checks over the workloads backing a component.

use anyhow::{Result, bail};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use rigger_domain::ObjectKey;
use rigger_ports::{ClusterError, ClusterPort};

/// One workload object whose ready replica count gates a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Deployment(ObjectKey),
    StatefulSet(ObjectKey),
}

impl Availability {
    pub fn deployment(namespace: &str, name: &str) -> Self {
        Availability::Deployment(ObjectKey::new(namespace, name))
    }

    pub fn stateful_set(namespace: &str, name: &str) -> Self {
        Availability::StatefulSet(ObjectKey::new(namespace, name))
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Availability::Deployment(key) | Availability::StatefulSet(key) => key,
        }
    }
}

/// True only when every object exists and has at least `min_replicas` ready.
/// An empty list is ready.
pub async fn all_ready(
    cluster: &dyn ClusterPort,
    objects: &[Availability],
    min_replicas: i32,
    prefix: &str,
) -> bool {
    for object in objects {
        let ready = match object {
            Availability::Deployment(key) => {
                observed(prefix, "Deployment", key, cluster.get_deployment(key).await)
                    .map(|deployment| deployment_ready_replicas(&deployment))
            }
            Availability::StatefulSet(key) => {
                observed(prefix, "StatefulSet", key, cluster.get_stateful_set(key).await)
                    .map(|stateful_set| stateful_set_ready_replicas(&stateful_set))
            }
        };
        match ready {
            Some(count) if count >= min_replicas => {}
            Some(count) => {
                debug!(
                    "{prefix} is waiting for {} to have {min_replicas} ready replicas, has {count}",
                    object.key()
                );
                return false;
            }
            None => return false,
        }
    }
    true
}

pub async fn deployments_are_ready(
    cluster: &dyn ClusterPort,
    keys: &[ObjectKey],
    min_replicas: i32,
    prefix: &str,
) -> bool {
    let objects: Vec<Availability> = keys.iter().cloned().map(Availability::Deployment).collect();
    all_ready(cluster, &objects, min_replicas, prefix).await
}

pub async fn stateful_sets_are_ready(
    cluster: &dyn ClusterPort,
    keys: &[ObjectKey],
    min_replicas: i32,
    prefix: &str,
) -> bool {
    let objects: Vec<Availability> = keys.iter().cloned().map(Availability::StatefulSet).collect();
    all_ready(cluster, &objects, min_replicas, prefix).await
}

fn observed<T>(
    prefix: &str,
    kind: &str,
    key: &ObjectKey,
    result: Result<T, ClusterError>,
) -> Option<T> {
    match result {
        Ok(object) => Some(object),
        Err(err) if err.is_not_found() => {
            debug!("{prefix} is waiting for {kind} {key} to exist");
            None
        }
        Err(err) => {
            debug!("{prefix} could not read {kind} {key}: {err}");
            None
        }
    }
}

fn deployment_ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0)
}

fn stateful_set_ready_replicas(stateful_set: &StatefulSet) -> i32 {
    stateful_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0)
}

/// True when the pod declares readiness gates and at least one of them has
/// no `True` condition yet. A pod without any status conditions has not been
/// scheduled far enough to judge and is reported as an error.
pub fn waiting_for_readiness_gates(pod: &Pod) -> Result<bool> {
    let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
    let conditions = pod
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .unwrap_or_default();
    if conditions.is_empty() {
        bail!("pod {name} has no status conditions");
    }

    let gates = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.readiness_gates.as_deref())
        .unwrap_or_default();
    let unsatisfied = gates.iter().any(|gate| {
        !conditions
            .iter()
            .any(|condition| condition.type_ == gate.condition_type && condition.status == "True")
    });
    Ok(unsatisfied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigger_ports::InMemoryCluster;
    use rigger_ports::memory::{deployment, pod, stateful_set};

    #[tokio::test]
    async fn test_all_ready_requires_every_object() {
        let cluster = InMemoryCluster::default();
        cluster.put_deployment(deployment("monitoring", "thanos-query", 1, 1));
        cluster.put_deployment(deployment("monitoring", "thanos-query-frontend", 1, 0));

        let objects = vec![
            Availability::deployment("monitoring", "thanos-query"),
            Availability::deployment("monitoring", "thanos-query-frontend"),
        ];
        assert!(!all_ready(&cluster, &objects, 1, "thanos").await);

        cluster.put_deployment(deployment("monitoring", "thanos-query-frontend", 1, 1));
        assert!(all_ready(&cluster, &objects, 1, "thanos").await);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_ready() {
        let cluster = InMemoryCluster::default();
        let keys = vec![ObjectKey::new("mysql", "mysql")];
        assert!(!stateful_sets_are_ready(&cluster, &keys, 1, "mysql").await);

        cluster.put_stateful_set(stateful_set("mysql", "mysql", 3, 3));
        assert!(stateful_sets_are_ready(&cluster, &keys, 3, "mysql").await);
        assert!(!stateful_sets_are_ready(&cluster, &keys, 4, "mysql").await);
    }

    #[tokio::test]
    async fn test_api_error_is_not_ready() {
        let cluster = InMemoryCluster::default();
        cluster.put_deployment(deployment("ingress-nginx", "controller", 1, 1));
        cluster.set_unavailable(Some("connection refused"));

        let keys = vec![ObjectKey::new("ingress-nginx", "controller")];
        assert!(!deployments_are_ready(&cluster, &keys, 1, "ingress-nginx").await);
    }

    #[tokio::test]
    async fn test_no_objects_is_ready() {
        let cluster = InMemoryCluster::default();
        assert!(all_ready(&cluster, &[], 1, "network-policies").await);
    }

    #[test]
    fn test_readiness_gates() {
        let waiting = pod("mysql", "mysql-0", &[], &["mysql.oracle.com/ready"], &[]);
        assert!(waiting_for_readiness_gates(&waiting).unwrap());

        let ready = pod(
            "mysql",
            "mysql-0",
            &[],
            &["mysql.oracle.com/ready"],
            &["mysql.oracle.com/ready"],
        );
        assert!(!waiting_for_readiness_gates(&ready).unwrap());

        let ungated = pod("mysql", "mysql-0", &[], &[], &[]);
        assert!(!waiting_for_readiness_gates(&ungated).unwrap());
    }

    #[test]
    fn test_pod_without_conditions_is_error() {
        let mut unscheduled = pod("mysql", "mysql-0", &[], &["mysql.oracle.com/ready"], &[]);
        unscheduled.status = None;
        let err = waiting_for_readiness_gates(&unscheduled).unwrap_err();
        assert!(err.to_string().contains("mysql-0"));
    }
}
