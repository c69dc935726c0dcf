use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rigger::domain::{ComponentSpec, ConditionType, ObjectKey, PlatformState};
use rigger::ports::memory::{deployment, pod, stateful_set};
use rigger::ports::{InMemoryCluster, InMemoryReleases, ManualClock};
use rigger::{
    ManagedResource, OperatorConfig, PortSet, Reconciler, ReconcilerConfig, Requeue, StallTimers,
    default_registry,
};

struct Platform {
    cluster: InMemoryCluster,
    releases: InMemoryReleases,
    clock: Arc<ManualClock>,
    reconciler: Reconciler,
    resource: ManagedResource,
    timers: StallTimers,
}

impl Platform {
    fn new(version: &str) -> Self {
        let cluster = InMemoryCluster::default();
        let releases = InMemoryReleases::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let ports = PortSet::new(
            Arc::new(cluster.clone()),
            Arc::new(releases.clone()),
            clock.clone(),
        );
        let config = ReconcilerConfig::from(&OperatorConfig::default());
        let reconciler = Reconciler::new(Arc::new(default_registry().unwrap()), ports, config);
        let resource = cluster.put_platform(ManagedResource::new("default", "platform", version));
        Self {
            cluster,
            releases,
            clock,
            reconciler,
            resource,
            timers: StallTimers::new(),
        }
    }

    async fn reconcile(&mut self) -> Requeue {
        self.reconciler
            .reconcile(&mut self.resource, &mut self.timers)
            .await
            .unwrap()
    }

    fn workloads_ready(&self) {
        self.cluster.put_deployment(deployment(
            "ingress-nginx",
            "ingress-controller-ingress-nginx-controller",
            1,
            1,
        ));
        self.cluster
            .put_deployment(deployment("mysql-operator", "mysql-operator", 1, 1));
        self.cluster.put_stateful_set(stateful_set("mysql", "mysql", 1, 1));
        self.cluster
            .put_deployment(deployment("monitoring", "thanos-query", 1, 1));
        self.cluster
            .put_deployment(deployment("monitoring", "thanos-query-frontend", 1, 1));
    }

    async fn installed(version: &str) -> Self {
        let mut platform = Self::new(version);
        platform.workloads_ready();
        platform.reconcile().await;
        assert_eq!(platform.reconcile().await, Requeue::Done);
        platform
    }

    fn stored_kinds(&self) -> Vec<ConditionType> {
        self.cluster
            .platform(&self.resource.key())
            .unwrap()
            .status
            .conditions
            .iter()
            .map(|condition| condition.kind)
            .collect()
    }
}

#[tokio::test]
async fn test_install_waits_for_workloads_then_completes() {
    let mut platform = Platform::new("1.0.0");

    assert_eq!(
        platform.reconcile().await,
        Requeue::After(Duration::from_secs(1))
    );
    assert_eq!(
        platform.reconcile().await,
        Requeue::After(Duration::from_secs(15))
    );
    assert_eq!(platform.stored_kinds(), vec![ConditionType::InstallStarted]);
    assert_eq!(
        platform.releases.calls(),
        vec![
            "install:network-policies",
            "install:ingress-nginx",
            "install:mysql-operator",
            "install:mysql",
            "install:thanos",
        ]
    );
    assert!(platform.cluster.namespace_labels("monitoring").is_some());

    platform.workloads_ready();
    assert_eq!(platform.reconcile().await, Requeue::Done);
    assert_eq!(
        platform.stored_kinds(),
        vec![ConditionType::InstallStarted, ConditionType::InstallComplete]
    );
    assert_eq!(platform.resource.status.state, PlatformState::Ready);
    assert_eq!(platform.resource.status.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_upgrade_follows_version_change() {
    let mut platform = Platform::installed("1.0.0").await;
    assert_eq!(
        platform.reconcile().await,
        Requeue::After(Duration::from_secs(60))
    );

    platform.resource.spec.version = "1.1.0".to_string();
    platform.reconcile().await;
    assert_eq!(platform.reconcile().await, Requeue::Done);

    let upgrades: Vec<String> = platform
        .releases
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("upgrade:"))
        .collect();
    assert_eq!(
        upgrades,
        vec![
            "upgrade:network-policies",
            "upgrade:ingress-nginx",
            "upgrade:mysql-operator",
            "upgrade:mysql",
            "upgrade:thanos",
        ]
    );
    assert_eq!(platform.resource.status.version.as_deref(), Some("1.1.0"));
    assert!(
        platform
            .resource
            .status
            .conditions
            .is_last(ConditionType::UpgradeComplete)
    );
    assert!(platform.resource.status.conditions.is_time_ordered());
}

#[tokio::test]
async fn test_failed_release_is_recorded_and_retried() {
    let mut platform = Platform::new("1.0.0");
    platform.workloads_ready();
    platform.releases.fail("mysql-operator", "chart not found");

    platform.reconcile().await;
    let err = platform
        .reconciler
        .reconcile(&mut platform.resource, &mut platform.timers)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!platform.releases.calls().contains(&"install:mysql".to_string()));

    let failed = platform.resource.status.conditions.last().unwrap();
    assert_eq!(failed.kind, ConditionType::InstallFailed);
    assert!(failed.message.starts_with(
        "Error installing component mysql-operator - generation:1. Error is install of release mysql-operator failed"
    ));

    platform.releases.clear_failure("mysql-operator");
    assert_eq!(
        platform.reconcile().await,
        Requeue::After(Duration::from_secs(1))
    );
    assert_eq!(platform.resource.status.state, PlatformState::Installing);
    assert_eq!(platform.reconcile().await, Requeue::Done);
    assert_eq!(
        platform.stored_kinds(),
        vec![
            ConditionType::InstallStarted,
            ConditionType::InstallFailed,
            ConditionType::InstallStarted,
            ConditionType::InstallComplete,
        ]
    );
}

#[tokio::test]
async fn test_stuck_mysql_pod_restarts_operator_once() {
    let mut platform = Platform::installed("1.0.0").await;
    platform
        .cluster
        .put_stateful_set(stateful_set("mysql", "mysql", 1, 0));
    platform.cluster.put_pod(pod(
        "mysql",
        "mysql-0",
        &[("component", "mysqld")],
        &["mysql.oracle.com/ready"],
        &[],
    ));
    platform.cluster.put_pod(pod(
        "mysql-operator",
        "mysql-operator-5c7d",
        &[("name", "mysql-operator")],
        &[],
        &[],
    ));

    platform.reconcile().await;
    platform.clock.advance(Duration::from_secs(2 * 60));
    platform.reconcile().await;
    assert!(platform.cluster.deleted_pods().is_empty());

    platform.clock.advance(Duration::from_secs(4 * 60));
    assert_eq!(
        platform.reconcile().await,
        Requeue::After(Duration::from_secs(60))
    );
    assert_eq!(
        platform.cluster.deleted_pods(),
        vec![ObjectKey::new("mysql-operator", "mysql-operator-5c7d")]
    );
    assert!(!platform.timers.get("mysql").unwrap().is_set());
}

#[tokio::test]
async fn test_enabled_velero_without_bucket_is_invalid() {
    let mut platform = Platform::new("1.0.0");
    platform.resource.spec.components.insert(
        "velero".to_string(),
        ComponentSpec {
            enabled: Some(true),
            ..Default::default()
        },
    );

    let err = platform
        .reconciler
        .reconcile(&mut platform.resource, &mut platform.timers)
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("overrides.backupBucket is required"));
    assert!(platform.stored_kinds().is_empty());
}
