//! Module containers and the sources that fill them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::LoadReport;
use crate::error::HostResult;
use crate::module::Module;

/// Package name used for modules from the local directory.
pub const LOCAL_PACKAGE: &str = "local";

/// Where a container was found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleOrigin {
    /// The single local directory.
    Local,
    /// One sub-directory of the remote directory.
    Remote {
        /// Name of that sub-directory.
        package: String,
    },
}

impl ModuleOrigin {
    /// Package part of module ids from this origin.
    pub fn package(&self) -> &str {
        match self {
            ModuleOrigin::Local => LOCAL_PACKAGE,
            ModuleOrigin::Remote { package } => package,
        }
    }

    /// `<package>.<type>`, lower-cased.
    pub fn module_id(&self, type_name: &str) -> String {
        format!("{}.{}", self.package(), type_name).to_lowercase()
    }
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleOrigin::Local => f.write_str("local"),
            ModuleOrigin::Remote { package } => write!(f, "remote:{package}"),
        }
    }
}

type Factory = dyn Fn() -> anyhow::Result<Box<dyn Module>> + Send + Sync;

/// A concrete module type a container can instantiate.
#[derive(Clone)]
pub struct ModuleType {
    name: String,
    factory: Arc<Factory>,
}

impl ModuleType {
    /// Type named `name`, built by `factory`.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    /// Type name; the second half of the module id.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a fresh instance.
    pub fn instantiate(&self) -> anyhow::Result<Box<dyn Module>> {
        (self.factory)()
    }
}

impl fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Something that can find module types in a container directory.
pub trait ContainerSource: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Collect the module types available for `origin` in `dir`.
    ///
    /// Problems with a single type (one bad script, say) are recorded in
    /// `report` and skipped. Returning `Err` discards the whole container.
    fn open(
        &self,
        origin: &ModuleOrigin,
        dir: &Path,
        report: &mut LoadReport,
    ) -> HostResult<Vec<ModuleType>>;
}

/// One directory's worth of module types.
#[derive(Debug, Clone)]
pub struct ModuleContainer {
    /// Where it came from.
    pub origin: ModuleOrigin,
    /// Directory the types were discovered in.
    pub path: PathBuf,
    /// Discovered types, in discovery order.
    pub types: Vec<ModuleType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_ids_are_lower_cased() {
        assert_eq!(ModuleOrigin::Local.module_id("Heartbeat"), "local.heartbeat");
        let remote = ModuleOrigin::Remote {
            package: "Acme.Tools".into(),
        };
        assert_eq!(remote.module_id("Counter"), "acme.tools.counter");
        assert_eq!(remote.to_string(), "remote:Acme.Tools");
    }
}
