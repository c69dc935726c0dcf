//! Domain models and invariants.

pub mod condition;
pub mod config;
pub mod resource;
pub mod selector;

pub use condition::{Condition, ConditionLog, ConditionType, Operation};
pub use config::{OperatorConfig, PlatformApiConfig, ReconcileSettings, WatchdogSettings};
pub use resource::{
    ComponentSpec, ManagedResource, ObjectKey, PlatformSpec, PlatformState, PlatformStatus,
    ResourceMeta,
};
pub use selector::Selector;
