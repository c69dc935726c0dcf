//! Component registry, reconciler, and readiness watchdogs.

pub mod component;
pub mod components;
pub mod ready;
pub mod reconciler;
pub mod registry;
pub mod watchdog;

#[cfg(test)]
pub mod testing;

pub use component::{Component, ComponentContext};
pub use components::{
    MySqlComponent, ReadinessGateProbe, ReleaseComponent, default_components, default_registry,
};
pub use ready::Availability;
pub use reconciler::{
    NoopPlatformHook, PlatformHook, ReconcileError, Reconciler, ReconcilerConfig, Requeue,
};
pub use registry::{Registry, RegistryError};
pub use watchdog::{
    Remediation, StallProbe, StallTimer, StallTimers, Watchdog, WatchdogOutcome,
};
