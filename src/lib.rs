//! Platform operator core: drives a declared platform through install and
//! upgrade one component at a time and keeps it healthy afterwards.

pub use rigger_application as application;
pub use rigger_domain as domain;
pub use rigger_ports as ports;

#[cfg(feature = "kube")]
pub use rigger_adapter_kube as kube;

pub use rigger_application::{
    Component, ComponentContext, ReconcileError, Reconciler, ReconcilerConfig, Registry,
    RegistryError, Requeue, StallTimers, default_registry,
};
pub use rigger_domain::{ManagedResource, OperatorConfig};
pub use rigger_ports::{ClusterPort, PortSet, ReleasePort};
