//! Rhai script modules.
//!
//! Every `*.rhai` file in a container directory is one module type, named
//! after the file stem. A script describes itself with `module_info()` and
//! implements whichever hooks it needs:
//!
//! ```rhai
//! fn module_info() {
//!     #{ title: "Counter", description: "Counts ticks", category: "generic" }
//! }
//!
//! fn on_load() {
//!     register_parameter("Count", "avatar/parameters/Count", "write", "int");
//!     register_update("tick", 1000, false);
//!     create_int("Step", "Step", "Added on every tick", 1);
//!     this.count = 0;
//! }
//!
//! fn on_update(hook) {
//!     this.count += setting("Step");
//!     send_parameter("Count", this.count);
//! }
//! ```
//!
//! # Host functions
//!
//! | Function | Effect |
//! |----------|--------|
//! | `register_parameter(key, default_name, mode, type)` | declare a parameter (`read`/`write`/`read_write`, `bool`/`int`/`float`/`string`) |
//! | `register_update(name, interval_ms, run_immediately)` | declare an update hook |
//! | `send_parameter(key, value)` | send on the key's configured wire name |
//! | `send_raw(address, value)` | send on an arbitrary address |
//! | `log(message)` / `print(message)` | log on the module channel |
//! | `create_toggle`, `create_text`, `create_int`, `create_dropdown` | create settings |
//! | `setting(key)` | read a setting, `()` if unknown |
//!
//! Parameter hooks receive `(address, value)` for
//! `on_any_parameter_received` and `(key, value, address)` for
//! `on_registered_parameter_received`.

mod module;

pub use module::ScriptModule;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rhai::Engine;
use tracing::debug;

use crate::error::{HostError, HostResult};
use crate::loader::{ContainerSource, LoadReport, ModuleOrigin, ModuleType};
use crate::module::Module;

/// Default operation budget for a single hook call.
pub const DEFAULT_MAX_OPERATIONS: u64 = 100_000;

/// Container source compiling `*.rhai` files.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    max_operations: u64,
}

impl ScriptSource {
    /// Source with the default operation budget.
    pub fn new() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }

    /// Override the operation budget.
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn compile(&self, path: &Path) -> HostResult<ModuleType> {
        let script = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let type_name = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let source = fs::read_to_string(path)?;
        let ast = Engine::new()
            .compile(&source)
            .map_err(|e| HostError::Script {
                script: script.clone(),
                message: e.to_string(),
            })?;

        if !ast
            .iter_functions()
            .any(|f| f.name == "module_info" && f.params.is_empty())
        {
            return Err(HostError::Script {
                script,
                message: "missing `module_info()`".to_string(),
            });
        }

        let ast = Arc::new(ast);
        let max_operations = self.max_operations;
        Ok(ModuleType::new(type_name, move || {
            let module = ScriptModule::new(&script, Arc::clone(&ast), max_operations)?;
            Ok(Box::new(module) as Box<dyn Module>)
        }))
    }
}

impl Default for ScriptSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSource for ScriptSource {
    fn name(&self) -> &str {
        "rhai"
    }

    fn open(
        &self,
        origin: &ModuleOrigin,
        dir: &Path,
        report: &mut LoadReport,
    ) -> HostResult<Vec<ModuleType>> {
        let scripts = script_files(dir).map_err(|e| HostError::ContainerLoad {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut types = Vec::new();
        for path in scripts {
            match self.compile(&path) {
                Ok(module_type) => {
                    debug!("Compiled {:?} for {}", path, origin);
                    types.push(module_type);
                }
                Err(e) => report.error(&path, e.to_string()),
            }
        }
        Ok(types)
    }
}

/// `*.rhai` files directly inside `dir`, sorted by path.
fn script_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "rhai") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_compiles_each_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b_counter.rhai"),
            r#"fn module_info() { #{ title: "Counter" } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("a_broken.rhai"),
            "fn module_info( { oops",
        )
        .unwrap();
        fs::write(dir.path().join("c_nameless.rhai"), "fn on_load() {}").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let mut report = LoadReport::default();
        let types = ScriptSource::new()
            .open(&ModuleOrigin::Local, dir.path(), &mut report)
            .unwrap();

        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name(), "b_counter");
        assert_eq!(types[0].instantiate().unwrap().info().title, "Counter");

        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].path.ends_with("a_broken.rhai"));
        assert!(report.errors[1].message.contains("missing `module_info()`"));
    }

    #[test]
    fn test_unreadable_directory_fails_container() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let mut report = LoadReport::default();
        let result = ScriptSource::new().open(&ModuleOrigin::Local, &missing, &mut report);
        assert!(matches!(result, Err(HostError::ContainerLoad { .. })));
    }
}
