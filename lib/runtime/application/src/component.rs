use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use rigger_domain::{ComponentSpec, ManagedResource, Operation};
use rigger_ports::{Clock, ClusterPort, PortSet, ReleasePort};

use crate::watchdog::{StallTimer, StallTimers};

/// One independently installable and upgradable unit of the platform.
///
/// Implementations are shared across every platform key the reconciler
/// serves, so they must not keep per-resource state of their own. Hooks
/// must be idempotent: a pass can be re-run after any failure.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    /// Names of the components that must be processed before this one.
    fn dependencies(&self) -> &[String];

    fn is_enabled(&self, _resource: &ManagedResource) -> bool {
        true
    }

    /// Rejects configuration that no amount of retrying will fix. Only called
    /// for enabled components.
    fn validate(&self, _resource: &ManagedResource) -> Result<()> {
        Ok(())
    }

    /// Whether this pass should drive the component's hooks at all.
    async fn is_installed(&self, ctx: &ComponentContext<'_>) -> Result<bool>;

    async fn pre_install(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn install(&self, ctx: &ComponentContext<'_>) -> Result<()>;

    async fn post_install(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn pre_upgrade(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn upgrade(&self, ctx: &ComponentContext<'_>) -> Result<()>;

    async fn post_upgrade(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Readiness of the backing workloads. Takes the context mutably so
    /// implementations can drive their stall timer.
    async fn is_ready(&self, ctx: &mut ComponentContext<'_>) -> bool;
}

/// Everything a hook may touch during one pass for one component.
pub struct ComponentContext<'a> {
    resource: &'a ManagedResource,
    ports: &'a PortSet,
    component: &'a str,
    operation: Option<Operation>,
    timers: &'a mut StallTimers,
    stall_threshold: Duration,
}

impl<'a> ComponentContext<'a> {
    pub fn new(
        resource: &'a ManagedResource,
        ports: &'a PortSet,
        component: &'a str,
        operation: Option<Operation>,
        timers: &'a mut StallTimers,
        stall_threshold: Duration,
    ) -> Self {
        Self {
            resource,
            ports,
            component,
            operation,
            timers,
            stall_threshold,
        }
    }

    pub fn resource(&self) -> &ManagedResource {
        self.resource
    }

    /// The component's configuration block, if the resource declares one.
    pub fn spec(&self) -> Option<&ComponentSpec> {
        self.resource.component(self.component)
    }

    pub fn component(&self) -> &str {
        self.component
    }

    /// `None` outside of an install or upgrade pass.
    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn cluster(&self) -> &dyn ClusterPort {
        self.ports.cluster.as_ref()
    }

    pub fn releases(&self) -> &dyn ReleasePort {
        self.ports.releases.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.ports.clock.as_ref()
    }

    pub fn stall_timer(&mut self) -> &mut StallTimer {
        self.timers.timer(self.component, self.stall_threshold)
    }
}
