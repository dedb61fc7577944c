//! In-process registry of native module types.
//!
//! Native modules are compiled into the host binary. The catalog plays the
//! part of an on-disk container for them: local types appear in the local
//! container, remote types appear once a package directory of the matching
//! name exists under the remote directory.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut catalog = ModuleCatalog::new();
//! catalog.register_local::<Heartbeat>();
//! catalog.register_remote::<Counter>("acme");
//! loader.add_source(catalog);
//! ```

use std::collections::HashMap;
use std::path::Path;

use super::container::{ContainerSource, ModuleOrigin, ModuleType};
use super::LoadReport;
use crate::error::HostResult;
use crate::module::Module;

/// Registry of native module factories.
#[derive(Debug, Default, Clone)]
pub struct ModuleCatalog {
    local: Vec<ModuleType>,
    remote: HashMap<String, Vec<ModuleType>>,
}

impl ModuleCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` for the local container, named after the Rust type.
    pub fn register_local<M: Module + Default + 'static>(&mut self) -> &mut Self {
        self.local.push(native_type::<M>());
        self
    }

    /// Register `M` for the remote package `package`.
    pub fn register_remote<M: Module + Default + 'static>(
        &mut self,
        package: impl Into<String>,
    ) -> &mut Self {
        self.remote
            .entry(package.into())
            .or_default()
            .push(native_type::<M>());
        self
    }

    /// Register an arbitrary type for the given origin.
    pub fn register(&mut self, origin: ModuleOrigin, module_type: ModuleType) -> &mut Self {
        match origin {
            ModuleOrigin::Local => self.local.push(module_type),
            ModuleOrigin::Remote { package } => {
                self.remote.entry(package).or_default().push(module_type)
            }
        }
        self
    }

    /// Number of registered types across all origins.
    pub fn len(&self) -> usize {
        self.local.len() + self.remote.values().map(Vec::len).sum::<usize>()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContainerSource for ModuleCatalog {
    fn name(&self) -> &str {
        "native"
    }

    fn open(
        &self,
        origin: &ModuleOrigin,
        _dir: &Path,
        _report: &mut LoadReport,
    ) -> HostResult<Vec<ModuleType>> {
        let types = match origin {
            ModuleOrigin::Local => self.local.clone(),
            ModuleOrigin::Remote { package } => {
                self.remote.get(package).cloned().unwrap_or_default()
            }
        };
        Ok(types)
    }
}

fn native_type<M: Module + Default + 'static>() -> ModuleType {
    ModuleType::new(short_type_name::<M>(), || {
        Ok(Box::new(M::default()) as Box<dyn Module>)
    })
}

/// Last path segment of the Rust type name, without generics.
fn short_type_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleInfo;

    #[derive(Default)]
    struct Heartbeat;

    impl Module for Heartbeat {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("Heartbeat", "")
        }
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Heartbeat>(), "Heartbeat");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }

    #[test]
    fn test_open_by_origin() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register_local::<Heartbeat>()
            .register_remote::<Heartbeat>("acme");
        assert_eq!(catalog.len(), 2);

        let mut report = LoadReport::default();
        let dir = Path::new(".");
        let local = catalog.open(&ModuleOrigin::Local, dir, &mut report).unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name(), "Heartbeat");
        assert!(local[0].instantiate().is_ok());

        let other = ModuleOrigin::Remote {
            package: "other".into(),
        };
        assert!(catalog.open(&other, dir, &mut report).unwrap().is_empty());
    }
}
