//! Install/upgrade passes over the registry.
//!
//! A pass never sleeps. It reads the current phase from the condition log,
//! does as much work as it can, persists what it learned on the platform
//! status, and hands a [`Requeue`] decision (or an error) back to the caller,
//! which owns scheduling. At most one pass per platform key may be in flight;
//! different keys can share one `Reconciler`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use rigger_domain::{
    ConditionType, ManagedResource, ObjectKey, Operation, OperatorConfig, PlatformState,
};
use rigger_ports::{ClusterError, PortSet};

use crate::component::{Component, ComponentContext};
use crate::registry::Registry;
use crate::watchdog::StallTimers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Done,
    After(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay after recording a Started marker.
    pub started_requeue: Duration,
    /// Suggested delay before retrying a retryable error.
    pub retry_requeue: Duration,
    pub not_ready_requeue: Duration,
    /// Readiness poll interval once the platform is steady.
    pub ready_poll: Duration,
    pub stall_threshold: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&OperatorConfig::default())
    }
}

impl From<&OperatorConfig> for ReconcilerConfig {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            started_requeue: config.reconcile.started_requeue(),
            retry_requeue: config.reconcile.retry_requeue(),
            not_ready_requeue: config.reconcile.not_ready_requeue(),
            ready_poll: config.reconcile.ready_poll(),
            stall_threshold: config.watchdog.stall_threshold(),
        }
    }
}

impl ReconcilerConfig {
    /// Delay the caller should wait before re-invoking after `err`, or
    /// `None` when re-invoking cannot help.
    pub fn retry_after(&self, err: &ReconcileError) -> Option<Duration> {
        err.is_retryable().then_some(self.retry_requeue)
    }
}

/// Platform-wide work that runs once after every component has converged.
#[async_trait]
pub trait PlatformHook: Send + Sync {
    async fn post_install(
        &self,
        _resource: &ManagedResource,
        _ports: &PortSet,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_upgrade(
        &self,
        _resource: &ManagedResource,
        _ports: &PortSet,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlatformHook;

impl PlatformHook for NoopPlatformHook {}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid platform {key}: {reason}")]
    Validation { key: ObjectKey, reason: String },
    #[error("{hook} hook of component {component} failed: {error:#}")]
    Hook {
        component: String,
        hook: &'static str,
        error: anyhow::Error,
    },
    #[error("{operation} of component {component} failed: {error:#}")]
    Component {
        component: String,
        operation: Operation,
        error: anyhow::Error,
    },
    #[error("platform post-{operation} hook failed: {error:#}")]
    PlatformHook {
        operation: Operation,
        error: anyhow::Error,
    },
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ReconcileError {
    /// Validation errors describe the declared state itself; everything
    /// else may clear up on a later pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Validation { .. })
    }
}

enum ComponentStep {
    Skipped,
    Converged,
    Failed(anyhow::Error),
}

pub struct Reconciler {
    registry: Arc<Registry>,
    ports: PortSet,
    hook: Arc<dyn PlatformHook>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(registry: Arc<Registry>, ports: PortSet, config: ReconcilerConfig) -> Self {
        Self {
            registry,
            ports,
            hook: Arc::new(NoopPlatformHook),
            config,
        }
    }

    pub fn with_platform_hook(mut self, hook: Arc<dyn PlatformHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Components in processing order.
    pub fn components(&self) -> &[Arc<dyn Component>] {
        self.registry.components()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Picks install, upgrade, or a steady-state readiness poll from the
    /// resource's recorded progress.
    pub async fn reconcile(
        &self,
        resource: &mut ManagedResource,
        timers: &mut StallTimers,
    ) -> Result<Requeue, ReconcileError> {
        if !resource.is_installed() {
            return self.reconcile_install(resource, timers).await;
        }
        let version_changed =
            resource.status.version.as_deref() != Some(resource.spec.version.as_str());
        if version_changed || resource.unfinished(Operation::Upgrade) {
            return self.reconcile_upgrade(resource, timers).await;
        }

        self.validate(resource)?;
        let mut watched = Vec::new();
        for component in self.registry.components() {
            if !component.is_enabled(resource) {
                continue;
            }
            let ctx = ComponentContext::new(
                resource,
                &self.ports,
                component.name(),
                None,
                timers,
                self.config.stall_threshold,
            );
            match component.is_installed(&ctx).await {
                Ok(true) => watched.push(Arc::clone(component)),
                Ok(false) => {}
                Err(err) => warn!(
                    "Could not tell whether {} is installed: {err:#}",
                    component.name()
                ),
            }
        }
        let not_ready = self.not_ready(&watched, None, resource, timers).await;
        if !not_ready.is_empty() {
            info!(
                platform = %resource.key(),
                "Platform is installed but not ready: {}",
                not_ready.join(", ")
            );
        }
        Ok(Requeue::After(self.config.ready_poll))
    }

    pub async fn reconcile_install(
        &self,
        resource: &mut ManagedResource,
        timers: &mut StallTimers,
    ) -> Result<Requeue, ReconcileError> {
        self.run_operation(Operation::Install, resource, timers).await
    }

    pub async fn reconcile_upgrade(
        &self,
        resource: &mut ManagedResource,
        timers: &mut StallTimers,
    ) -> Result<Requeue, ReconcileError> {
        self.run_operation(Operation::Upgrade, resource, timers).await
    }

    async fn run_operation(
        &self,
        operation: Operation,
        resource: &mut ManagedResource,
        timers: &mut StallTimers,
    ) -> Result<Requeue, ReconcileError> {
        let key = resource.key();
        self.validate(resource)?;

        if self.already_complete(operation, resource) {
            debug!(platform = %key, "Platform {operation} already complete");
            return Ok(Requeue::Done);
        }

        if !resource.in_progress(operation) {
            info!(
                platform = %key,
                "Starting {operation} of platform version {}",
                resource.spec.version
            );
            let message = format!(
                "Platform {operation} of version {} started - {}",
                resource.spec.version,
                resource.generation_label()
            );
            self.append_condition(resource, operation.started(), message)
                .await?;
            return Ok(Requeue::After(self.config.started_requeue));
        }

        let mut converged: Vec<Arc<dyn Component>> = Vec::new();
        for component in self.registry.components() {
            match self
                .run_component(component.as_ref(), operation, resource, timers)
                .await?
            {
                ComponentStep::Skipped => {}
                ComponentStep::Converged => converged.push(Arc::clone(component)),
                ComponentStep::Failed(err) => {
                    let message = format!(
                        "Error {} component {} - {}. Error is {err:#}",
                        operation.verb(),
                        component.name(),
                        resource.generation_label()
                    );
                    error!(platform = %key, component = component.name(), "{message}");
                    self.append_condition(resource, operation.failed(), message)
                        .await?;
                    return Err(ReconcileError::Component {
                        component: component.name().to_string(),
                        operation,
                        error: err,
                    });
                }
            }
        }

        let not_ready = self
            .not_ready(&converged, Some(operation), resource, timers)
            .await;
        if !not_ready.is_empty() {
            info!(
                platform = %key,
                "Waiting for components to become ready: {}",
                not_ready.join(", ")
            );
            return Ok(Requeue::After(self.config.not_ready_requeue));
        }

        let hook_result = match operation {
            Operation::Install => self.hook.post_install(resource, &self.ports).await,
            Operation::Upgrade => self.hook.post_upgrade(resource, &self.ports).await,
        };
        if let Err(err) = hook_result {
            error!(platform = %key, "Platform post-{operation} hook failed: {err:#}");
            return Err(ReconcileError::PlatformHook {
                operation,
                error: err,
            });
        }

        resource.status.version = Some(resource.spec.version.clone());
        let message = format!(
            "Platform {operation} of version {} complete - {}",
            resource.spec.version,
            resource.generation_label()
        );
        self.append_condition(resource, operation.complete(), message)
            .await?;
        info!(
            platform = %key,
            "Platform {operation} of version {} complete",
            resource.spec.version
        );
        Ok(Requeue::Done)
    }

    async fn run_component(
        &self,
        component: &dyn Component,
        operation: Operation,
        resource: &ManagedResource,
        timers: &mut StallTimers,
    ) -> Result<ComponentStep, ReconcileError> {
        let name = component.name();
        if !component.is_enabled(resource) {
            debug!("Component {name} is disabled, skipping {operation}");
            return Ok(ComponentStep::Skipped);
        }

        let ctx = ComponentContext::new(
            resource,
            &self.ports,
            name,
            Some(operation),
            timers,
            self.config.stall_threshold,
        );
        let installed = component
            .is_installed(&ctx)
            .await
            .map_err(|err| hook_error(name, "is-installed", err))?;
        if !installed {
            debug!("Component {name} is not installed, skipping {operation}");
            return Ok(ComponentStep::Skipped);
        }

        match operation {
            Operation::Install => {
                component
                    .pre_install(&ctx)
                    .await
                    .map_err(|err| hook_error(name, "pre-install", err))?;
                info!("Installing {name}");
                if let Err(err) = component.install(&ctx).await {
                    return Ok(ComponentStep::Failed(err));
                }
                component
                    .post_install(&ctx)
                    .await
                    .map_err(|err| hook_error(name, "post-install", err))?;
            }
            Operation::Upgrade => {
                component
                    .pre_upgrade(&ctx)
                    .await
                    .map_err(|err| hook_error(name, "pre-upgrade", err))?;
                info!("Upgrading {name}");
                if let Err(err) = component.upgrade(&ctx).await {
                    return Ok(ComponentStep::Failed(err));
                }
                component
                    .post_upgrade(&ctx)
                    .await
                    .map_err(|err| hook_error(name, "post-upgrade", err))?;
            }
        }
        Ok(ComponentStep::Converged)
    }

    /// Names of `components` that are not ready yet. Every component is
    /// asked, so each watchdog gets its poll even when an earlier one fails.
    async fn not_ready(
        &self,
        components: &[Arc<dyn Component>],
        operation: Option<Operation>,
        resource: &ManagedResource,
        timers: &mut StallTimers,
    ) -> Vec<String> {
        let mut names = Vec::new();
        for component in components {
            let mut ctx = ComponentContext::new(
                resource,
                &self.ports,
                component.name(),
                operation,
                timers,
                self.config.stall_threshold,
            );
            if !component.is_ready(&mut ctx).await {
                names.push(component.name().to_string());
            }
        }
        names
    }

    fn already_complete(&self, operation: Operation, resource: &ManagedResource) -> bool {
        if !resource.status.conditions.is_last(operation.complete()) {
            return false;
        }
        match operation {
            Operation::Install => true,
            Operation::Upgrade => {
                resource.status.version.as_deref() == Some(resource.spec.version.as_str())
            }
        }
    }

    fn validate(&self, resource: &ManagedResource) -> Result<(), ReconcileError> {
        let key = resource.key();
        let invalid = |reason: String| {
            error!(platform = %key, "Platform is invalid: {reason}");
            ReconcileError::Validation {
                key: key.clone(),
                reason,
            }
        };

        if resource.spec.version.trim().is_empty() {
            return Err(invalid("spec.version must not be empty".to_string()));
        }
        if let Some(unknown) = resource
            .spec
            .components
            .keys()
            .find(|name| self.registry.get(name).is_none())
        {
            return Err(invalid(format!("unknown component {unknown}")));
        }
        for component in self.registry.components() {
            if !component.is_enabled(resource) {
                continue;
            }
            if let Err(err) = component.validate(resource) {
                return Err(invalid(format!("component {}: {err:#}", component.name())));
            }
        }
        Ok(())
    }

    async fn append_condition(
        &self,
        resource: &mut ManagedResource,
        kind: ConditionType,
        message: String,
    ) -> Result<(), ReconcileError> {
        let now = self.ports.clock.now();
        resource.status.conditions.append(kind, message, now);
        resource.status.state = PlatformState::for_condition(kind);
        self.ports
            .cluster
            .replace_platform_status(resource)
            .await?;
        Ok(())
    }
}

fn hook_error(component: &str, hook: &'static str, err: anyhow::Error) -> ReconcileError {
    error!("The {hook} hook of component {component} failed: {err:#}");
    ReconcileError::Hook {
        component: component.to_string(),
        hook,
        error: err,
    }
}
