//! Dependency-ordered set of components.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::component::Component;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component {0} is registered more than once")]
    Duplicate(String),
    #[error("component {component} depends on unknown component {dependency}")]
    UnknownDependency {
        component: String,
        dependency: String,
    },
    #[error("component {component} is registered before its dependency {dependency}")]
    OutOfOrder {
        component: String,
        dependency: String,
    },
    #[error("dependency cycle among components: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Components in processing order. Every component appears after all of its
/// declared dependencies, and the order never changes once built.
#[derive(Clone)]
pub struct Registry {
    components: Vec<Arc<dyn Component>>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Accepts `components` in the given order, rejecting any component
    /// listed before one of its dependencies.
    pub fn new(components: Vec<Arc<dyn Component>>) -> Result<Self, RegistryError> {
        let index = index_by_name(&components)?;
        for (position, component) in components.iter().enumerate() {
            for dependency in component.dependencies() {
                match index.get(dependency) {
                    None => {
                        return Err(RegistryError::UnknownDependency {
                            component: component.name().to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(&at) if at == position => {
                        return Err(RegistryError::Cycle(vec![component.name().to_string()]));
                    }
                    Some(&at) if at > position => {
                        return Err(RegistryError::OutOfOrder {
                            component: component.name().to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(Self { components, index })
    }

    /// Orders `components` topologically. Ties keep registration order, so
    /// the same input always yields the same sequence.
    pub fn sorted(components: Vec<Arc<dyn Component>>) -> Result<Self, RegistryError> {
        index_by_name(&components)?;
        let known: HashSet<&str> = components.iter().map(|c| c.name()).collect();
        for component in &components {
            if let Some(dependency) = component
                .dependencies()
                .iter()
                .find(|dependency| !known.contains(dependency.as_str()))
            {
                return Err(RegistryError::UnknownDependency {
                    component: component.name().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut remaining: Vec<Arc<dyn Component>> = components;
        let mut ordered: Vec<Arc<dyn Component>> = Vec::with_capacity(remaining.len());
        let mut placed: HashSet<String> = HashSet::new();
        while !remaining.is_empty() {
            let next = remaining.iter().position(|component| {
                component
                    .dependencies()
                    .iter()
                    .all(|dependency| placed.contains(dependency))
            });
            let Some(next) = next else {
                return Err(RegistryError::Cycle(
                    remaining.iter().map(|c| c.name().to_string()).collect(),
                ));
            };
            let component = remaining.remove(next);
            placed.insert(component.name().to_string());
            ordered.push(component);
        }
        Self::new(ordered)
    }

    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.index.get(name).map(|&at| &self.components[at])
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .finish()
    }
}

fn index_by_name(
    components: &[Arc<dyn Component>],
) -> Result<HashMap<String, usize>, RegistryError> {
    let mut index = HashMap::with_capacity(components.len());
    for (position, component) in components.iter().enumerate() {
        if index.insert(component.name().to_string(), position).is_some() {
            return Err(RegistryError::Duplicate(component.name().to_string()));
        }
    }
    Ok(index)
}
