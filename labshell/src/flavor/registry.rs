//! Global registry of shell flavours.

use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use super::{Ash, Bash, ShellFlavor};
use crate::error::{Result, ShellError};

/// Global flavour registry.
static REGISTRY: Lazy<RwLock<FlavorRegistry>> = Lazy::new(|| {
    let mut registry = FlavorRegistry::new();
    registry.register_builtin_flavors();
    RwLock::new(registry)
});

/// Name to flavour map, in registration order.
#[derive(Default)]
pub struct FlavorRegistry {
    flavors: IndexMap<String, Arc<dyn ShellFlavor>>,
}

impl FlavorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            flavors: IndexMap::new(),
        }
    }

    /// Get the global registry.
    pub fn global() -> &'static RwLock<FlavorRegistry> {
        &REGISTRY
    }

    fn register_builtin_flavors(&mut self) {
        self.flavors.insert("bash".to_string(), Arc::new(Bash));
        self.flavors.insert("ash".to_string(), Arc::new(Ash));
    }

    /// Register a flavour under its own name.
    pub fn register(&mut self, flavor: Arc<dyn ShellFlavor>) -> Result<()> {
        let name = flavor.name().to_string();
        if self.flavors.contains_key(&name) {
            return Err(ShellError::AlreadyRegistered { name }.into());
        }
        self.flavors.insert(name, flavor);
        Ok(())
    }

    /// Get a flavour by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ShellFlavor>> {
        self.flavors.get(name).cloned()
    }

    /// Check if a flavour is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.flavors.contains_key(name)
    }

    /// List all registered flavour names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flavors.keys().map(String::as_str)
    }
}

impl fmt::Debug for FlavorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn lock_error() -> ShellError {
    ShellError::InvalidConfig {
        message: "Failed to acquire flavour registry lock".to_string(),
    }
}

/// Look a flavour up in the global registry.
pub fn lookup(name: &str) -> Result<Arc<dyn ShellFlavor>> {
    FlavorRegistry::global()
        .read()
        .map_err(|_| lock_error())?
        .get(name)
        .ok_or_else(|| {
            ShellError::UnknownShell {
                name: name.to_string(),
            }
            .into()
        })
}

/// Add a flavour to the global registry.
pub fn register(flavor: impl ShellFlavor + 'static) -> Result<()> {
    FlavorRegistry::global()
        .write()
        .map_err(|_| lock_error())?
        .register(Arc::new(flavor))
}
