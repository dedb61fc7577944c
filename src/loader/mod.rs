//! Module discovery and instantiation.
//!
//! The loader owns two origin directories below a modules root:
//!
//! ```text
//! <root>/
//! ├── local/            one container, package "local"
//! │   └── *.rhai
//! └── remote/
//!     ├── acme/         one container per sub-directory, package "acme"
//!     │   └── *.rhai
//!     └── ...
//! ```
//!
//! Each container directory is offered to every registered
//! [`ContainerSource`]; the types they return are instantiated, loaded and
//! handed to the runtime as [`LoadedModule`]s. Failures never abort a load:
//! they are recorded in the [`LoadReport`] and the offending container or
//! module is skipped.

mod catalog;
mod container;

pub use catalog::ModuleCatalog;
pub use container::{ContainerSource, ModuleContainer, ModuleOrigin, ModuleType, LOCAL_PACKAGE};

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::error::{HostError, HostResult};
use crate::module::LoadedModule;
use crate::runtime::HostServices;

/// A problem encountered while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    /// File or directory the problem relates to.
    pub path: PathBuf,
    /// Human-readable description.
    pub message: String,
}

/// Outcome of one [`ModuleLoader::load_all`] pass.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Ids of the modules that loaded, in load order.
    pub loaded: Vec<String>,
    /// Everything that was skipped, and why.
    pub errors: Vec<LoadError>,
}

impl LoadReport {
    /// Record a problem and log it.
    pub fn error(&mut self, path: impl Into<PathBuf>, message: impl Into<String>) {
        let error = LoadError {
            path: path.into(),
            message: message.into(),
        };
        warn!("Module load error in {:?}: {}", error.path, error.message);
        self.errors.push(error);
    }

    /// Whether nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Discovers containers and instantiates their modules.
pub struct ModuleLoader {
    root: PathBuf,
    local_dir: String,
    remote_dir: String,
    sources: Vec<Arc<dyn ContainerSource>>,
    containers: Vec<ModuleContainer>,
    loaded: bool,
}

impl ModuleLoader {
    /// Loader rooted at `root` with the default `local`/`remote` directories.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            local_dir: "local".to_string(),
            remote_dir: "remote".to_string(),
            sources: Vec::new(),
            containers: Vec::new(),
            loaded: false,
        }
    }

    /// Override the origin directory names.
    pub fn with_dirs(mut self, local_dir: impl Into<String>, remote_dir: impl Into<String>) -> Self {
        self.local_dir = local_dir.into();
        self.remote_dir = remote_dir.into();
        self
    }

    /// Add a source consulted for every container.
    pub fn with_source(mut self, source: impl ContainerSource + 'static) -> Self {
        self.add_source(source);
        self
    }

    /// Add a source consulted for every container.
    pub fn add_source(&mut self, source: impl ContainerSource + 'static) {
        self.sources.push(Arc::new(source));
    }

    /// Modules root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the local container.
    pub fn local_path(&self) -> PathBuf {
        self.root.join(&self.local_dir)
    }

    /// Directory holding remote package directories.
    pub fn remote_path(&self) -> PathBuf {
        self.root.join(&self.remote_dir)
    }

    /// Whether `load_all` has run since the last unload.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Containers opened by the last load.
    pub fn containers(&self) -> &[ModuleContainer] {
        &self.containers
    }

    /// Discover every container and load its modules.
    ///
    /// Fails with [`HostError::AlreadyLoaded`] unless preceded by
    /// [`unload_all`](Self::unload_all), and with an I/O error if the origin
    /// directories cannot be created. Everything else lands in the report.
    pub fn load_all(
        &mut self,
        services: &HostServices,
    ) -> HostResult<(Vec<LoadedModule>, LoadReport)> {
        if self.loaded {
            return Err(HostError::AlreadyLoaded);
        }

        let local = self.local_path();
        let remote = self.remote_path();
        fs::create_dir_all(&local)?;
        fs::create_dir_all(&remote)?;

        let mut report = LoadReport::default();
        let mut containers = Vec::new();

        if let Some(container) = self.open_container(ModuleOrigin::Local, &local, &mut report) {
            containers.push(container);
        }

        for (package, path) in package_dirs(&remote)? {
            let origin = ModuleOrigin::Remote { package };
            if let Some(container) = self.open_container(origin, &path, &mut report) {
                containers.push(container);
            }
        }

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for container in &containers {
            for module_type in &container.types {
                let id = container.origin.module_id(module_type.name());
                if !seen.insert(id.clone()) {
                    report.error(&container.path, format!("Duplicate module id `{id}`; skipping"));
                    continue;
                }

                match instantiate(&id, container, module_type, services) {
                    Ok(module) => {
                        debug!("Loaded module {}", id);
                        report.loaded.push(id);
                        modules.push(module);
                    }
                    Err(e) => report.error(&container.path, format!("{id}: {e:#}")),
                }
            }
        }

        info!(
            "Loaded {} module(s) from {} container(s), {} error(s)",
            modules.len(),
            containers.len(),
            report.errors.len()
        );

        self.containers = containers;
        self.loaded = true;
        Ok((modules, report))
    }

    /// Forget every container so the next `load_all` starts fresh.
    pub fn unload_all(&mut self) {
        self.containers.clear();
        self.loaded = false;
    }

    fn open_container(
        &self,
        origin: ModuleOrigin,
        path: &Path,
        report: &mut LoadReport,
    ) -> Option<ModuleContainer> {
        let mut types = Vec::new();
        for source in &self.sources {
            match source.open(&origin, path, report) {
                Ok(mut found) => types.append(&mut found),
                Err(e) => {
                    report.error(
                        path,
                        format!("{} source failed, skipping container {}: {}", source.name(), origin, e),
                    );
                    return None;
                }
            }
        }
        Some(ModuleContainer {
            origin,
            path: path.to_path_buf(),
            types,
        })
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("root", &self.root)
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("containers", &self.containers.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// Sub-directories of `remote`, sorted by name.
fn package_dirs(remote: &Path) -> HostResult<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(remote)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => dirs.push((name, entry.path())),
            Err(name) => warn!("Skipping package directory with non UTF-8 name {:?}", name),
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn instantiate(
    id: &str,
    container: &ModuleContainer,
    module_type: &ModuleType,
    services: &HostServices,
) -> anyhow::Result<LoadedModule> {
    let module = panic::catch_unwind(AssertUnwindSafe(|| module_type.instantiate()))
        .map_err(|_| anyhow!("constructor panicked"))??;

    let mut loaded = LoadedModule::new(id, container.origin.clone(), module, services);
    loaded.load(services.store.load(id))?;
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, ModuleContext, ModuleInfo};
    use crate::transport::NullSink;

    #[derive(Default)]
    struct Plain;

    impl Module for Plain {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("Plain", "")
        }
    }

    #[derive(Default)]
    struct BadLoad;

    impl Module for BadLoad {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("Bad", "")
        }

        fn on_load(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
            anyhow::bail!("cannot load")
        }
    }

    struct FailingSource;

    impl ContainerSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn open(
            &self,
            origin: &ModuleOrigin,
            _dir: &Path,
            _report: &mut LoadReport,
        ) -> HostResult<Vec<ModuleType>> {
            match origin {
                ModuleOrigin::Remote { package } if package == "broken" => Err(
                    HostError::ContainerLoad {
                        path: package.clone(),
                        reason: "unreadable".into(),
                    },
                ),
                _ => Ok(Vec::new()),
            }
        }
    }

    fn services() -> HostServices {
        HostServices::new(Arc::new(NullSink))
    }

    #[test]
    fn test_load_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ModuleLoader::new(dir.path().join("modules"));

        let (modules, report) = loader.load_all(&services()).unwrap();
        assert!(modules.is_empty());
        assert!(report.is_clean());
        assert!(loader.local_path().is_dir());
        assert!(loader.remote_path().is_dir());
    }

    #[test]
    fn test_double_load_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ModuleLoader::new(dir.path());
        loader.load_all(&services()).unwrap();
        assert!(matches!(
            loader.load_all(&services()),
            Err(HostError::AlreadyLoaded)
        ));

        loader.unload_all();
        assert!(loader.load_all(&services()).is_ok());
    }

    #[test]
    fn test_ids_duplicates_and_failed_loads() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("remote/acme")).unwrap();

        let mut catalog = ModuleCatalog::new();
        catalog
            .register_local::<Plain>()
            .register_local::<Plain>()
            .register_local::<BadLoad>()
            .register_remote::<Plain>("acme")
            .register_remote::<Plain>("missing");

        let mut loader = ModuleLoader::new(dir.path()).with_source(catalog);
        let (modules, report) = loader.load_all(&services()).unwrap();

        let ids: Vec<_> = modules.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["local.plain", "acme.plain"]);
        assert_eq!(report.loaded, ids);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].message.contains("Duplicate module id `local.plain`"));
        assert!(report.errors[1].message.contains("cannot load"));
    }

    #[test]
    fn test_failing_source_skips_whole_container() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("remote/broken")).unwrap();
        fs::create_dir_all(dir.path().join("remote/fine")).unwrap();

        let mut catalog = ModuleCatalog::new();
        catalog
            .register_remote::<Plain>("broken")
            .register_remote::<Plain>("fine");

        let mut loader = ModuleLoader::new(dir.path())
            .with_source(FailingSource)
            .with_source(catalog);
        let (modules, report) = loader.load_all(&services()).unwrap();

        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].id(), "fine.plain");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("skipping container remote:broken"));
        assert_eq!(loader.containers().len(), 2);
    }
}
