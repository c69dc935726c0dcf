//! Concrete platform components and the default registry.

pub mod catalog;
pub mod mysql;
pub mod release;

pub use catalog::{default_components, default_registry};
pub use mysql::{MySqlComponent, ReadinessGateProbe};
pub use release::ReleaseComponent;
