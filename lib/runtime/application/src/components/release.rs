use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use rigger_domain::{ManagedResource, Operation};
use rigger_ports::ReleaseRequest;

use crate::component::{Component, ComponentContext};
use crate::ready::{self, Availability};

/// A component shipped as one packaged release in its own namespace.
///
/// Install and upgrade hand the platform version and the component's
/// `overrides` block to the packaging port. Readiness is the ready replica
/// count of the availability objects.
#[derive(Debug, Clone)]
pub struct ReleaseComponent {
    name: String,
    namespace: String,
    dependencies: Vec<String>,
    enabled_by_default: bool,
    required_overrides: Vec<String>,
    namespace_labels: BTreeMap<String, String>,
    availability: Vec<Availability>,
    min_replicas: i32,
}

impl ReleaseComponent {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            dependencies: Vec::new(),
            enabled_by_default: true,
            required_overrides: Vec::new(),
            namespace_labels: BTreeMap::new(),
            availability: Vec::new(),
            min_replicas: 1,
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Only installed when the platform spec enables it explicitly.
    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn require_override(mut self, key: &str) -> Self {
        self.required_overrides.push(key.to_string());
        self
    }

    pub fn namespace_label(mut self, key: &str, value: &str) -> Self {
        self.namespace_labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn deployment(mut self, name: &str) -> Self {
        self.availability
            .push(Availability::deployment(&self.namespace, name));
        self
    }

    pub fn stateful_set(mut self, name: &str) -> Self {
        self.availability
            .push(Availability::stateful_set(&self.namespace, name));
        self
    }

    pub fn min_replicas(mut self, min_replicas: i32) -> Self {
        self.min_replicas = min_replicas;
        self
    }

    pub fn availability(&self) -> &[Availability] {
        &self.availability
    }

    fn request(&self, ctx: &ComponentContext<'_>) -> ReleaseRequest {
        ReleaseRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            version: ctx.resource().spec.version.clone(),
            values: ctx
                .spec()
                .map(|spec| spec.overrides.clone())
                .unwrap_or_default(),
        }
    }

    async fn apply_namespace(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        let mut labels = self.namespace_labels.clone();
        labels.insert("rigger.dev/component".to_string(), self.name.clone());
        ctx.cluster()
            .apply_namespace(&self.namespace, &labels)
            .await
            .with_context(|| format!("failed to create or update namespace {}", self.namespace))
    }
}

#[async_trait]
impl Component for ReleaseComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn is_enabled(&self, resource: &ManagedResource) -> bool {
        resource
            .component(&self.name)
            .and_then(|spec| spec.enabled)
            .unwrap_or(self.enabled_by_default)
    }

    fn validate(&self, resource: &ManagedResource) -> Result<()> {
        let overrides = resource.component(&self.name).map(|spec| &spec.overrides);
        for key in &self.required_overrides {
            let present = overrides
                .and_then(|overrides| overrides.get(key))
                .is_some_and(|value| !value.is_null() && value.as_str() != Some(""));
            if !present {
                bail!("overrides.{key} is required");
            }
        }
        Ok(())
    }

    /// Install is convergent, so it always proceeds. Outside of install a
    /// release record of any status means the component is present.
    async fn is_installed(&self, ctx: &ComponentContext<'_>) -> Result<bool> {
        if ctx.operation() == Some(Operation::Install) {
            return Ok(true);
        }
        let release = ctx
            .releases()
            .release(&self.name, &self.namespace)
            .await
            .with_context(|| format!("failed to look up release {}", self.name))?;
        Ok(release.is_some())
    }

    async fn pre_install(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.apply_namespace(ctx).await
    }

    async fn install(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        let request = self.request(ctx);
        debug!("Installing release {} version {}", request.name, request.version);
        ctx.releases().install(&request).await
    }

    async fn pre_upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.apply_namespace(ctx).await
    }

    async fn upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()> {
        let request = self.request(ctx);
        debug!("Upgrading release {} to version {}", request.name, request.version);
        ctx.releases().upgrade(&request).await
    }

    async fn is_ready(&self, ctx: &mut ComponentContext<'_>) -> bool {
        ready::all_ready(ctx.cluster(), &self.availability, self.min_replicas, &self.name).await
    }
}
