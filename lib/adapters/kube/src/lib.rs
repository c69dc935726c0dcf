//! Cluster port backed by a Kubernetes API server.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;
use rigger_domain::{
    ManagedResource, ObjectKey, PlatformApiConfig, PlatformSpec, PlatformStatus, ResourceMeta,
    Selector,
};
use rigger_ports::{ClusterError, ClusterPort};

const PLATFORM_KIND: &str = "Platform";

pub struct KubeCluster {
    client: Client,
    platform: ApiResource,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, config: &PlatformApiConfig) -> Self {
        Self {
            client,
            platform: platform_resource(config),
            field_manager: config.field_manager.clone(),
        }
    }

    /// Connects with the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(config: &PlatformApiConfig) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|err| ClusterError::Api(err.to_string()))?;
        Ok(Self::new(client, config))
    }

    fn platforms(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.platform)
    }
}

pub fn platform_resource(config: &PlatformApiConfig) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&config.group, &config.version, &config.kind);
    ApiResource::from_gvk_with_plural(&gvk, &config.plural)
}

pub fn decode_platform(object: &DynamicObject) -> Result<ManagedResource, ClusterError> {
    let key = ObjectKey::new(
        object.metadata.namespace.clone().unwrap_or_default(),
        object.metadata.name.clone().unwrap_or_default(),
    );
    let decode_error = |err: serde_json::Error| ClusterError::Decode {
        kind: PLATFORM_KIND,
        key: key.to_string(),
        message: err.to_string(),
    };

    let spec: PlatformSpec = match object.data.get("spec") {
        Some(spec) => serde_json::from_value(spec.clone()).map_err(decode_error)?,
        None => PlatformSpec::default(),
    };
    let status: PlatformStatus = match object.data.get("status") {
        Some(status) if !status.is_null() => {
            serde_json::from_value(status.clone()).map_err(decode_error)?
        }
        _ => PlatformStatus::default(),
    };

    Ok(ManagedResource {
        metadata: ResourceMeta {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            generation: object.metadata.generation.unwrap_or_default(),
            resource_version: object.metadata.resource_version.clone(),
        },
        spec,
        status,
    })
}

/// Merge patch that replaces the status and carries the resource version,
/// so the API server rejects writes based on a stale read.
pub fn status_patch(resource: &ManagedResource) -> Result<serde_json::Value, ClusterError> {
    let status = serde_json::to_value(&resource.status).map_err(|err| ClusterError::Decode {
        kind: PLATFORM_KIND,
        key: resource.key().to_string(),
        message: err.to_string(),
    })?;
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": resource.metadata.resource_version },
        "status": status,
    }))
}

pub fn namespace_manifest(name: &str, labels: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": labels,
        }
    })
}

pub fn map_error(kind: &'static str, key: impl ToString, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => {
            status_error(kind, key.to_string(), response.code, &response.message)
        }
        other => ClusterError::Api(other.to_string()),
    }
}

fn status_error(kind: &'static str, key: String, code: u16, message: &str) -> ClusterError {
    match code {
        404 => ClusterError::NotFound { kind, key },
        409 => ClusterError::Conflict {
            kind,
            key,
            message: message.to_string(),
        },
        _ => ClusterError::Api(format!("{kind} {key}: {message} ({code})")),
    }
}

#[async_trait]
impl ClusterPort for KubeCluster {
    async fn get_platform(&self, key: &ObjectKey) -> Result<ManagedResource, ClusterError> {
        let object = self
            .platforms(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|err| map_error(PLATFORM_KIND, key, err))?;
        decode_platform(&object)
    }

    async fn list_platforms(&self) -> Result<Vec<ManagedResource>, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.platform);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|err| map_error(PLATFORM_KIND, "*", err))?;
        list.items.iter().map(decode_platform).collect()
    }

    async fn replace_platform_status(
        &self,
        resource: &mut ManagedResource,
    ) -> Result<(), ClusterError> {
        let key = resource.key();
        let patch = status_patch(resource)?;
        let updated = self
            .platforms(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|err| map_error(PLATFORM_KIND, &key, err))?;
        debug!("Wrote status of platform {key}");
        resource.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|err| map_error("Deployment", key, err))
    }

    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|err| map_error("StatefulSet", key, err))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector.to_string());
        let list = api
            .list(&params)
            .await
            .map_err(|err| map_error("Pod", format!("{namespace}/{selector}"), err))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map_err(|err| map_error("Pod", key, err))?;
        Ok(())
    }

    async fn apply_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let manifest = namespace_manifest(name, labels);
        api.patch(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Apply(&manifest),
        )
        .await
        .map_err(|err| map_error("Namespace", name, err))?;
        debug!(namespace = %name, "Applied namespace");
        Ok(())
    }
}
