use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use rigger_domain::{ManagedResource, ObjectKey, Selector};

use crate::component::{Component, ComponentContext};
use crate::components::release::ReleaseComponent;
use crate::ready::waiting_for_readiness_gates;
use crate::watchdog::{Remediation, StallProbe, Watchdog};

pub const MYSQL_NAME: &str = "mysql";
pub const MYSQL_NAMESPACE: &str = "mysql";
pub const OPERATOR_NAME: &str = "mysql-operator";
pub const OPERATOR_NAMESPACE: &str = "mysql-operator";

/// Finds MySQL server pods stuck behind unsatisfied readiness gates and
/// restarts the operator that is supposed to set them.
#[derive(Debug, Clone)]
pub struct ReadinessGateProbe {
    server_namespace: String,
    server_selector: Selector,
    operator_namespace: String,
    operator_selector: Selector,
}

impl Default for ReadinessGateProbe {
    fn default() -> Self {
        Self {
            server_namespace: MYSQL_NAMESPACE.to_string(),
            server_selector: Selector::new().is_in("component", ["mysqld"]),
            operator_namespace: OPERATOR_NAMESPACE.to_string(),
            operator_selector: Selector::new().is_in("name", [OPERATOR_NAME]),
        }
    }
}

#[async_trait]
impl StallProbe for ReadinessGateProbe {
    async fn is_stalled(&self, ctx: &ComponentContext<'_>) -> Result<bool> {
        let pods = ctx
            .cluster()
            .list_pods(&self.server_namespace, &self.server_selector)
            .await
            .context("failed checking MySQL readiness gates")?;
        if pods.is_empty() {
            bail!(
                "failed checking MySQL readiness gates, no pods found matching selector {}",
                self.server_selector
            );
        }
        for pod in &pods {
            if waiting_for_readiness_gates(pod)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remediate(&self, ctx: &ComponentContext<'_>) -> Result<Remediation> {
        let pods = ctx
            .cluster()
            .list_pods(&self.operator_namespace, &self.operator_selector)
            .await
            .context("failed listing mysql-operator pods")?;
        let [pod] = pods.as_slice() else {
            return Ok(Remediation::Unavailable(format!(
                "expected one pod matching {}, found {}",
                self.operator_selector,
                pods.len()
            )));
        };

        let key = ObjectKey::new(
            pod.metadata
                .namespace
                .clone()
                .unwrap_or_else(|| self.operator_namespace.clone()),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        info!("Restarting the mysql-operator to repair MySQL pods stuck waiting for readiness gates");
        match ctx.cluster().delete_pod(&key).await {
            Ok(()) => Ok(Remediation::Applied(format!("deleted pod {key}"))),
            Err(err) if err.is_not_found() => {
                debug!("mysql-operator pod {key} was already gone");
                Ok(Remediation::Applied(format!("pod {key} already deleted")))
            }
            Err(err) => Err(err)
                .with_context(|| format!("failed restarting mysql-operator pod {key}")),
        }
    }
}

/// The MySQL server release, with a watchdog that repairs pods whose
/// readiness gates never get set.
pub struct MySqlComponent {
    release: ReleaseComponent,
    watchdog: Watchdog<ReadinessGateProbe>,
}

impl MySqlComponent {
    pub fn new() -> Self {
        Self::with_probe(ReadinessGateProbe::default())
    }

    pub fn with_probe(probe: ReadinessGateProbe) -> Self {
        Self {
            release: ReleaseComponent::new(MYSQL_NAME, MYSQL_NAMESPACE)
                .depends_on(&[OPERATOR_NAME])
                .stateful_set(MYSQL_NAME),
            watchdog: Watchdog::new(probe),
        }
    }
}

impl Default for MySqlComponent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for MySqlComponent {
    fn name(&self) -> &str {
        self.release.name()
    }

    fn namespace(&self) -> &str {
        self.release.namespace()
    }

    fn dependencies(&self) -> &[String] {
        self.release.dependencies()
    }

    fn is_enabled(&self, resource: &ManagedResource) -> bool {
        self.release.is_enabled(resource)
    }

    fn validate(&self, resource: &ManagedResource) -> Result<()> {
        self.release.validate(resource)
    }

    async fn is_installed(&self, ctx: &ComponentContext<'_>) -> Result<bool> {
        self.release.is_installed(ctx).await
    }

    async fn pre_install(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.pre_install(ctx).await
    }

    async fn install(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.install(ctx).await
    }

    async fn post_install(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.post_install(ctx).await
    }

    async fn pre_upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.pre_upgrade(ctx).await
    }

    async fn upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.upgrade(ctx).await
    }

    async fn post_upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.release.post_upgrade(ctx).await
    }

    async fn is_ready(&self, ctx: &mut ComponentContext<'_>) -> bool {
        if self.release.is_ready(ctx).await {
            return true;
        }
        if let Err(err) = self.watchdog.poll(ctx).await {
            warn!("MySQL readiness gate check failed: {err:#}");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::StallTimers;
    use chrono::{TimeZone, Utc};
    use rigger_ports::memory::{pod, stateful_set};
    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use k8s_openapi::api::core::v1::Pod;
    use rigger_ports::{
        ClusterError, ClusterPort, InMemoryCluster, InMemoryReleases, ManualClock, PortSet,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    const GATE: &str = "mysql.oracle.com/ready";

    struct Env {
        cluster: InMemoryCluster,
        clock: Arc<ManualClock>,
        ports: PortSet,
        timers: StallTimers,
        resource: ManagedResource,
    }

    impl Env {
        fn new() -> Self {
            let cluster = InMemoryCluster::default();
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            ));
            let ports = PortSet::new(
                Arc::new(cluster.clone()),
                Arc::new(InMemoryReleases::default()),
                clock.clone(),
            );
            Self {
                cluster,
                clock,
                ports,
                timers: StallTimers::new(),
                resource: ManagedResource::new("default", "platform", "1.0.0"),
            }
        }

        async fn ready_at(&mut self, component: &MySqlComponent, minute: u64) -> bool {
            self.clock.set(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
                    + chrono::Duration::minutes(minute as i64),
            );
            let mut ctx = ComponentContext::new(
                &self.resource,
                &self.ports,
                MYSQL_NAME,
                None,
                &mut self.timers,
                Duration::from_secs(300),
            );
            component.is_ready(&mut ctx).await
        }

        fn stuck_server(&self) {
            self.cluster.put_stateful_set(stateful_set(MYSQL_NAMESPACE, MYSQL_NAME, 1, 0));
            self.cluster.put_pod(pod(
                MYSQL_NAMESPACE,
                "mysql-0",
                &[("component", "mysqld")],
                &[GATE],
                &[],
            ));
        }

        fn operator_pod(&self, name: &str) {
            self.cluster.put_pod(pod(
                OPERATOR_NAMESPACE,
                name,
                &[("name", OPERATOR_NAME)],
                &[],
                &[],
            ));
        }
    }

    #[tokio::test]
    async fn test_stuck_pod_restarts_operator_after_grace_period() {
        let mut env = Env::new();
        let mysql = MySqlComponent::new();
        env.stuck_server();
        env.operator_pod("mysql-operator-7d9f");

        assert!(!env.ready_at(&mysql, 0).await);
        assert!(!env.ready_at(&mysql, 2).await);
        assert!(env.cluster.deleted_pods().is_empty());

        assert!(!env.ready_at(&mysql, 6).await);
        assert_eq!(
            env.cluster.deleted_pods(),
            vec![ObjectKey::new(OPERATOR_NAMESPACE, "mysql-operator-7d9f")]
        );
        assert!(!env.timers.get(MYSQL_NAME).unwrap().is_set());
    }

    /// Lists pods from the wrapped cluster but loses every pod before a
    /// delete reaches it.
    struct RacingCluster(InMemoryCluster);

    #[async_trait]
    impl ClusterPort for RacingCluster {
        async fn get_platform(&self, key: &ObjectKey) -> Result<ManagedResource, ClusterError> {
            self.0.get_platform(key).await
        }

        async fn list_platforms(&self) -> Result<Vec<ManagedResource>, ClusterError> {
            self.0.list_platforms().await
        }

        async fn replace_platform_status(
            &self,
            resource: &mut ManagedResource,
        ) -> Result<(), ClusterError> {
            self.0.replace_platform_status(resource).await
        }

        async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, ClusterError> {
            self.0.get_deployment(key).await
        }

        async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError> {
            self.0.get_stateful_set(key).await
        }

        async fn list_pods(
            &self,
            namespace: &str,
            selector: &Selector,
        ) -> Result<Vec<Pod>, ClusterError> {
            self.0.list_pods(namespace, selector).await
        }

        async fn delete_pod(&self, key: &ObjectKey) -> Result<(), ClusterError> {
            Err(ClusterError::not_found("Pod", key))
        }

        async fn apply_namespace(
            &self,
            name: &str,
            labels: &BTreeMap<String, String>,
        ) -> Result<(), ClusterError> {
            self.0.apply_namespace(name, labels).await
        }
    }

    #[tokio::test]
    async fn test_operator_pod_deleted_concurrently_counts_as_restarted() {
        let mut env = Env::new();
        env.ports = PortSet::new(
            Arc::new(RacingCluster(env.cluster.clone())),
            Arc::new(InMemoryReleases::default()),
            env.clock.clone(),
        );
        let mysql = MySqlComponent::new();
        env.stuck_server();
        env.operator_pod("mysql-operator-7d9f");

        assert!(!env.ready_at(&mysql, 0).await);
        assert!(!env.ready_at(&mysql, 6).await);
        assert!(!env.timers.get(MYSQL_NAME).unwrap().is_set());
    }

    #[tokio::test]
    async fn test_ambiguous_operator_pods_are_left_alone() {
        let mut env = Env::new();
        let mysql = MySqlComponent::new();
        env.stuck_server();
        env.operator_pod("mysql-operator-a");
        env.operator_pod("mysql-operator-b");

        env.ready_at(&mysql, 0).await;
        assert!(!env.ready_at(&mysql, 6).await);
        assert!(env.cluster.deleted_pods().is_empty());
        assert!(env.timers.get(MYSQL_NAME).unwrap().is_set());
    }

    #[tokio::test]
    async fn test_missing_server_pods_do_not_arm_timer() {
        let mut env = Env::new();
        let mysql = MySqlComponent::new();
        env.cluster
            .put_stateful_set(stateful_set(MYSQL_NAMESPACE, MYSQL_NAME, 1, 0));

        assert!(!env.ready_at(&mysql, 0).await);
        assert!(env.timers.get(MYSQL_NAME).is_none());
    }

    #[tokio::test]
    async fn test_ready_stateful_set_skips_probe() {
        let mut env = Env::new();
        let mysql = MySqlComponent::new();
        env.stuck_server();
        env.cluster
            .put_stateful_set(stateful_set(MYSQL_NAMESPACE, MYSQL_NAME, 1, 1));

        assert!(env.ready_at(&mysql, 0).await);
        assert!(env.timers.get(MYSQL_NAME).is_none());
    }

    #[test]
    fn test_depends_on_operator() {
        let mysql = MySqlComponent::new();
        assert_eq!(mysql.dependencies(), &[OPERATOR_NAME.to_string()]);
        assert_eq!(mysql.namespace(), MYSQL_NAMESPACE);
    }
}
