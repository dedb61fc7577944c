//! The module runtime: owns every loaded module and drives them.
//!
//! The host calls into the runtime from a single task:
//!
//! ```text
//!            ┌──────────── tick ───────────┐
//! host ──────┼── inbound parameter ────────┼──► every running module ──► reap faulted
//!            └── avatar / player events ───┘
//! ```
//!
//! Only modules that started successfully are in the running set. A module
//! whose hook faults during a fan-out still lets its siblings finish that
//! fan-out; it is stopped and dropped from the running set right after.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modhost::loader::ModuleLoader;
//! use modhost::runtime::{HostServices, ModuleRuntime};
//! use modhost::script::ScriptSource;
//! use modhost::transport::NullSink;
//!
//! # async fn run() -> modhost::error::HostResult<()> {
//! let loader = ModuleLoader::new("/srv/modhost/modules").with_source(ScriptSource::new());
//! let mut runtime = ModuleRuntime::new(loader, HostServices::new(Arc::new(NullSink)));
//!
//! runtime.load_all()?;
//! runtime.start().await;
//! runtime.update().await;
//! runtime.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{HostError, HostResult};
use crate::loader::{LoadReport, ModuleLoader, ModuleOrigin};
use crate::module::{LoadedModule, ModuleCategory, ModuleState, SettingValue};
use crate::parameter::InboundMessage;
use crate::store::{MemoryStore, SettingsStore};
use crate::transport::ParameterSink;

/// Runtime policy shared by every module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Limit for `on_module_start` and `on_module_stop`; `None` disables it.
    pub hook_timeout: Option<Duration>,
    /// Enabled flag for modules with no stored configuration.
    pub enabled_by_default: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Some(Duration::from_secs(10)),
            enabled_by_default: false,
        }
    }
}

/// Everything modules get from the host, injected at construction.
#[derive(Clone)]
pub struct HostServices {
    /// Time source for module schedulers.
    pub clock: Arc<dyn Clock>,
    /// Outbound parameter destination.
    pub sink: Arc<dyn ParameterSink>,
    /// Per-module configuration store.
    pub store: Arc<dyn SettingsStore>,
    /// Runtime policy.
    pub config: RuntimeConfig,
}

impl HostServices {
    /// Services with a system clock, an in-memory store and default policy.
    pub fn new(sink: Arc<dyn ParameterSink>) -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            sink,
            store: Arc::new(MemoryStore::new()),
            config: RuntimeConfig::default(),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the configuration store.
    pub fn with_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the runtime policy.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Summary of one module for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    /// Module id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Presentation category.
    pub category: ModuleCategory,
    /// Where it was loaded from.
    pub origin: ModuleOrigin,
    /// Lifecycle state.
    pub state: ModuleState,
    /// Whether it starts with the runtime.
    pub enabled: bool,
}

/// Owns the loaded modules and fans host events out to them.
#[derive(Debug)]
pub struct ModuleRuntime {
    loader: ModuleLoader,
    services: HostServices,
    modules: Vec<LoadedModule>,
    /// Indices into `modules` of the modules currently started.
    running: Vec<usize>,
    started: bool,
    report: LoadReport,
}

impl ModuleRuntime {
    /// Runtime over `loader`, handing `services` to every module.
    pub fn new(loader: ModuleLoader, services: HostServices) -> Self {
        Self {
            loader,
            services,
            modules: Vec::new(),
            running: Vec::new(),
            started: false,
            report: LoadReport::default(),
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load every module the loader can find.
    pub fn load_all(&mut self) -> HostResult<&LoadReport> {
        let (modules, report) = self.loader.load_all(&self.services)?;
        self.modules = modules;
        self.running.clear();
        self.report = report;
        Ok(&self.report)
    }

    /// Drop every module and load again from disk.
    ///
    /// Fails with [`HostError::RuntimeRunning`] while started.
    pub fn reload_all(&mut self) -> HostResult<&LoadReport> {
        self.unload_all()?;
        info!("Reloading modules");
        self.load_all()
    }

    /// Drop every module.
    ///
    /// Fails with [`HostError::RuntimeRunning`] while started.
    pub fn unload_all(&mut self) -> HostResult<()> {
        if self.started {
            return Err(HostError::RuntimeRunning);
        }
        self.modules.clear();
        self.running.clear();
        self.loader.unload_all();
        Ok(())
    }

    /// Outcome of the last load.
    pub fn last_report(&self) -> &LoadReport {
        &self.report
    }

    /// The loader, for directory paths.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start every enabled module, in load order.
    pub async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        for module in self.modules.iter_mut().filter(|m| m.is_enabled()) {
            module.start().await;
        }
        self.rebuild_running();
        info!(
            "Runtime started with {} of {} module(s) running",
            self.running.len(),
            self.modules.len()
        );
    }

    /// Stop every module that is not already stopped.
    pub async fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.running.clear();
        for module in &mut self.modules {
            module.stop().await;
        }
        self.started = false;
        info!("Runtime stopped");
    }

    /// Whether [`start`](Self::start) has been called without a matching stop.
    pub fn is_running(&self) -> bool {
        self.started
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Run due update hooks on every running module.
    pub async fn update(&mut self) {
        for &index in &self.running {
            self.modules[index].update();
        }
        self.reap().await;
    }

    /// Deliver an inbound message to every running module.
    pub async fn on_parameter_received(&mut self, message: &InboundMessage) {
        for &index in &self.running {
            self.modules[index].on_parameter_received(message);
        }
        self.reap().await;
    }

    /// Notify every running module of an avatar change.
    pub async fn avatar_change(&mut self) {
        for &index in &self.running {
            self.modules[index].avatar_change();
        }
        self.reap().await;
    }

    /// Notify every running module of a player update.
    pub async fn player_update(&mut self) {
        for &index in &self.running {
            self.modules[index].player_update();
        }
        self.reap().await;
    }

    /// Stop every module flagged for a stop by a fault.
    async fn reap(&mut self) {
        let mut reaped = false;
        for module in self.modules.iter_mut() {
            if module.stop_requested() {
                debug!("Stopping faulted module {}", module.id());
                module.stop().await;
                reaped = true;
            }
        }
        if reaped {
            self.rebuild_running();
        }
    }

    fn rebuild_running(&mut self) {
        self.running = self
            .modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.state().is_running())
            .map(|(i, _)| i)
            .collect();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every loaded module, in load order.
    pub fn modules(&self) -> Vec<ModuleStatus> {
        self.modules
            .iter()
            .map(|m| ModuleStatus {
                id: m.id().to_string(),
                title: m.info().title.clone(),
                category: m.info().category,
                origin: m.origin().clone(),
                state: m.state(),
                enabled: m.is_enabled(),
            })
            .collect()
    }

    /// Look up a loaded module.
    pub fn module(&self, id: &str) -> Option<&LoadedModule> {
        self.modules.iter().find(|m| m.id() == id)
    }

    /// State of a loaded module.
    pub fn module_state(&self, id: &str) -> Option<ModuleState> {
        self.module(id).map(LoadedModule::state)
    }

    /// Ids of the modules currently in the running set.
    pub fn running_ids(&self) -> Vec<&str> {
        self.running
            .iter()
            .map(|&i| self.modules[i].id())
            .collect()
    }

    /// Watch a module's lifecycle state.
    pub fn subscribe_state(&self, id: &str) -> HostResult<watch::Receiver<ModuleState>> {
        self.module(id)
            .map(LoadedModule::subscribe)
            .ok_or_else(|| HostError::UnknownModule(id.to_string()))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Enable or disable a module and persist the flag.
    ///
    /// While the runtime is started, enabling starts the module and
    /// disabling stops it.
    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> HostResult<()> {
        let index = self.index_of(id)?;
        let module = &mut self.modules[index];
        module.set_enabled(enabled);
        self.services.store.save(id, &module.snapshot())?;

        if self.started {
            if enabled {
                module.start().await;
            } else {
                module.stop().await;
            }
            self.rebuild_running();
        }
        Ok(())
    }

    /// Rename a module parameter's wire name and persist it.
    pub fn set_wire_name(&mut self, id: &str, key: &str, wire_name: &str) -> HostResult<()> {
        let index = self.index_of(id)?;
        let module = &mut self.modules[index];
        module.set_wire_name(key, wire_name)?;
        self.services.store.save(id, &module.snapshot())
    }

    /// Restore a module parameter's default wire name and persist it.
    pub fn reset_wire_name(&mut self, id: &str, key: &str) -> HostResult<()> {
        let index = self.index_of(id)?;
        let module = &mut self.modules[index];
        module.reset_wire_name(key)?;
        self.services.store.save(id, &module.snapshot())
    }

    /// Change a module setting and persist it.
    pub fn set_setting(&mut self, id: &str, key: &str, value: SettingValue) -> HostResult<()> {
        let index = self.index_of(id)?;
        let module = &mut self.modules[index];
        module.set_setting(key, value)?;
        self.services.store.save(id, &module.snapshot())
    }

    fn index_of(&self, id: &str) -> HostResult<usize> {
        self.modules
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| HostError::UnknownModule(id.to_string()))
    }
}
