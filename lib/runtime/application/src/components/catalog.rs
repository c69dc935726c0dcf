use std::sync::Arc;

use crate::component::Component;
use crate::components::mysql::{self, MySqlComponent};
use crate::components::release::ReleaseComponent;
use crate::registry::{Registry, RegistryError};

pub const NETWORK_POLICIES: &str = "network-policies";
pub const INGRESS_NGINX: &str = "ingress-nginx";
pub const THANOS: &str = "thanos";
pub const VELERO: &str = "velero";

const SYSTEM_NAMESPACE: &str = "rigger-system";
const MONITORING_NAMESPACE: &str = "monitoring";

/// The platform's components in processing order.
pub fn default_components() -> Vec<Arc<dyn Component>> {
    vec![
        Arc::new(ReleaseComponent::new(NETWORK_POLICIES, SYSTEM_NAMESPACE)),
        Arc::new(
            ReleaseComponent::new(INGRESS_NGINX, INGRESS_NGINX)
                .namespace_label("rigger.dev/namespace", INGRESS_NGINX)
                .deployment("ingress-controller-ingress-nginx-controller"),
        ),
        Arc::new(
            ReleaseComponent::new(mysql::OPERATOR_NAME, mysql::OPERATOR_NAMESPACE)
                .deployment(mysql::OPERATOR_NAME),
        ),
        Arc::new(MySqlComponent::new()),
        Arc::new(
            ReleaseComponent::new(THANOS, MONITORING_NAMESPACE)
                .depends_on(&[NETWORK_POLICIES, INGRESS_NGINX])
                .namespace_label("rigger.dev/namespace", MONITORING_NAMESPACE)
                .deployment("thanos-query")
                .deployment("thanos-query-frontend")
                .min_replicas(1),
        ),
        Arc::new(
            ReleaseComponent::new(VELERO, VELERO)
                .disabled_by_default()
                .require_override("backupBucket")
                .deployment(VELERO),
        ),
    ]
}

pub fn default_registry() -> Result<Registry, RegistryError> {
    Registry::new(default_components())
}
