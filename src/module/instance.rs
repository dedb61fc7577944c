//! Runtime wrapper around one loaded module instance.
//!
//! [`LoadedModule`] owns the module object together with everything the
//! host keeps on its behalf: parameter and settings registries, declared
//! update hooks, a private [`Scheduler`] and the lifecycle state. Every hook
//! call goes through here so that errors and panics are contained:
//!
//! ```text
//! hook ─► Err / panic ─► push_exception ─► Exception ─► (runtime) stop ─► Stopped
//! ```

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::context::{ModuleContext, UpdateHook};
use super::settings::{SettingValue, SettingsRegistry};
use super::state::ModuleState;
use super::{Module, ModuleInfo, MODULE_TARGET};
use crate::error::HostResult;
use crate::loader::ModuleOrigin;
use crate::parameter::{InboundMessage, ParameterRegistry, RouteOutcome};
use crate::runtime::HostServices;
use crate::scheduler::Scheduler;
use crate::store::StoredModule;
use crate::transport::ParameterSink;

/// A module instance plus the host-side state that belongs to it.
pub struct LoadedModule {
    id: String,
    origin: ModuleOrigin,
    info: ModuleInfo,
    module: Box<dyn Module>,
    parameters: ParameterRegistry,
    settings: SettingsRegistry,
    update_hooks: Vec<UpdateHook>,
    scheduler: Scheduler<String>,
    sink: Arc<dyn ParameterSink>,
    hook_timeout: Option<Duration>,
    enabled: bool,
    state: watch::Sender<ModuleState>,
    stop_requested: bool,
    last_error: Option<String>,
}

impl LoadedModule {
    /// Wrap `module`. Nothing is called on it until [`load`](Self::load).
    pub fn new(
        id: impl Into<String>,
        origin: ModuleOrigin,
        module: Box<dyn Module>,
        services: &HostServices,
    ) -> Self {
        let (state, _) = watch::channel(ModuleState::Stopped);
        Self {
            id: id.into(),
            origin,
            info: module.info(),
            module,
            parameters: ParameterRegistry::new(),
            settings: SettingsRegistry::new(),
            update_hooks: Vec::new(),
            scheduler: Scheduler::new(Arc::clone(&services.clock)),
            sink: Arc::clone(&services.sink),
            hook_timeout: services.config.hook_timeout,
            enabled: services.config.enabled_by_default,
            state,
            stop_requested: false,
            last_error: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// `<package>.<type>`, lower-cased.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the module came from.
    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    /// Title, description and category as reported at load time.
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ModuleState> {
        self.state.subscribe()
    }

    /// Whether the runtime should start this module.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether a hook faulted and the module is waiting to be stopped.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Message of the most recent fault, cleared on the next start.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Declared parameters.
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// Declared settings.
    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }

    /// Declared update hooks.
    pub fn update_hooks(&self) -> &[UpdateHook] {
        &self.update_hooks
    }

    /// Number of scheduled update runs.
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Run `on_load`, apply `stored`, then run `on_post_load`.
    ///
    /// An error here means the module should be discarded; no exception is
    /// pushed because the module never ran.
    pub fn load(&mut self, stored: Option<StoredModule>) -> anyhow::Result<()> {
        self.invoke(|m, ctx| m.on_load(ctx))
            .map_err(|e| e.context("on_load failed"))?;
        if let Some(stored) = stored {
            self.apply_stored(stored);
        }
        self.invoke(|m, ctx| m.on_post_load(ctx))
            .map_err(|e| e.context("on_post_load failed"))?;
        Ok(())
    }

    fn apply_stored(&mut self, stored: StoredModule) {
        if let Some(enabled) = stored.enabled {
            self.enabled = enabled;
        }
        for (key, wire_name) in stored.parameters {
            if let Err(e) = self.parameters.set_wire_name(&key, wire_name) {
                warn!(target: MODULE_TARGET, module = %self.id, "Ignoring stored wire name: {}", e);
            }
        }
        for (key, value) in stored.settings {
            if let Err(e) = self.settings.set(&key, value) {
                warn!(target: MODULE_TARGET, module = %self.id, "Ignoring stored setting: {}", e);
            }
        }
    }

    /// What should be persisted for this module.
    pub fn snapshot(&self) -> StoredModule {
        StoredModule {
            enabled: Some(self.enabled),
            parameters: self
                .parameters
                .definitions()
                .iter()
                .filter(|d| d.is_renamed())
                .map(|d| (d.key.to_string(), d.wire_name.clone()))
                .collect(),
            settings: self.settings.changed_values(),
        }
    }

    /// Rename a parameter's wire name.
    pub fn set_wire_name(&mut self, key: &str, wire_name: &str) -> HostResult<()> {
        self.parameters.set_wire_name(key, wire_name)
    }

    /// Restore a parameter's default wire name.
    pub fn reset_wire_name(&mut self, key: &str) -> HostResult<()> {
        self.parameters.reset_wire_name(key)
    }

    /// Change a setting's value.
    pub fn set_setting(&mut self, key: &str, value: SettingValue) -> HostResult<()> {
        self.settings.set(key, value)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the module.
    ///
    /// Rebuilds the parameter caches and runs `on_module_start`. If the hook
    /// errors, panics, times out or returns `false`, the module is stopped
    /// again. On success the update hooks are scheduled and those marked
    /// `run_immediately` run once before this returns; a fault in one of
    /// those also stops the module before this returns.
    pub async fn start(&mut self) {
        if self.state() != ModuleState::Stopped {
            debug!(target: MODULE_TARGET, module = %self.id, "Ignoring start while {}", self.state());
            return;
        }

        self.stop_requested = false;
        self.last_error = None;
        self.set_state(ModuleState::Starting);

        if let Err(e) = self.parameters.rebuild_cache() {
            self.push_exception(anyhow::Error::from(e).context("parameter cache rebuild failed"));
            self.stop().await;
            return;
        }

        let limit = self.hook_timeout;
        let started = {
            let (module, mut ctx) = self.parts();
            guarded(module.on_module_start(&mut ctx), limit, "start").await
        };

        match started {
            Ok(true) => {}
            Ok(false) => {
                info!(target: MODULE_TARGET, module = %self.id, "Module declined to start");
                self.stop().await;
                return;
            }
            Err(e) => {
                self.push_exception(e.context("on_module_start failed"));
                self.stop().await;
                return;
            }
        }

        self.set_state(ModuleState::Started);

        let hooks = self.update_hooks.clone();
        for hook in hooks {
            if self.state() != ModuleState::Started {
                break;
            }
            self.scheduler
                .add_delayed(hook.name.clone(), hook.interval, true);
            if hook.run_immediately {
                self.run_update(&hook.name);
            }
        }

        if self.stop_requested {
            self.stop().await;
        }
    }

    /// Stop the module.
    ///
    /// Pending update runs are cancelled before `on_module_stop` is called. A
    /// failing or overrunning stop hook is logged and the module is forced to
    /// `Stopped` regardless.
    pub async fn stop(&mut self) {
        if matches!(self.state(), ModuleState::Stopped | ModuleState::Stopping) {
            return;
        }

        self.set_state(ModuleState::Stopping);
        self.scheduler.cancel_delayed_tasks();

        let limit = self.hook_timeout;
        let stopped = {
            let (module, mut ctx) = self.parts();
            guarded(module.on_module_stop(&mut ctx), limit, "stop").await
        };
        if let Err(e) = stopped {
            error!(target: MODULE_TARGET, module = %self.id, "Forcing stop: {:#}", e);
            if self.last_error.is_none() {
                self.last_error = Some(format!("{e:#}"));
            }
        }

        self.stop_requested = false;
        self.set_state(ModuleState::Stopped);
    }

    /// Record a fault: cancel every pending update run, enter `Exception`
    /// and ask the runtime for a stop.
    pub fn push_exception(&mut self, error: anyhow::Error) {
        error!(
            target: MODULE_TARGET,
            module = %self.id,
            "{} experienced an exception: {:#}",
            self.info.title,
            error
        );
        self.last_error = Some(format!("{error:#}"));
        self.scheduler.cancel_delayed_tasks();
        self.stop_requested = true;
        self.set_state(ModuleState::Exception);
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Run every update hook that is due.
    pub fn update(&mut self) {
        if !self.state().is_running() {
            return;
        }
        for hook in self.scheduler.update() {
            if !self.state().is_running() {
                break;
            }
            self.run_update(&hook);
        }
    }

    /// Deliver an inbound message.
    ///
    /// `on_any_parameter_received` sees every message; the registry then
    /// decides whether `on_registered_parameter_received` fires.
    pub fn on_parameter_received(&mut self, message: &InboundMessage) -> RouteOutcome {
        if !self.state().is_running() {
            return RouteOutcome::Unhandled;
        }

        if !self.call("on_any_parameter_received", |m, ctx| {
            m.on_any_parameter_received(ctx, message)
        }) {
            return RouteOutcome::Unhandled;
        }

        let outcome = self
            .parameters
            .route_inbound(&message.address, &message.value);
        match &outcome {
            RouteOutcome::Rejected {
                key,
                expected,
                received,
            } => {
                warn!(
                    target: MODULE_TARGET,
                    module = %self.id,
                    "Cannot accept input parameter. `{}` expects type `{}` but received type `{}`",
                    key,
                    expected,
                    received
                );
            }
            RouteOutcome::Dispatched(parameter) => {
                self.call("on_registered_parameter_received", |m, ctx| {
                    m.on_registered_parameter_received(ctx, parameter)
                });
            }
            RouteOutcome::Unhandled => {}
        }
        outcome
    }

    /// Notify an avatar change.
    pub fn avatar_change(&mut self) {
        if self.state().is_running() {
            self.call("on_avatar_change", |m, ctx| m.on_avatar_change(ctx));
        }
    }

    /// Notify a player update.
    pub fn player_update(&mut self) {
        if self.state().is_running() {
            self.call("on_player_update", |m, ctx| m.on_player_update(ctx));
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn run_update(&mut self, hook: &str) {
        let hook = hook.to_string();
        if !self.call("on_update", |m, ctx| m.on_update(&hook, ctx)) {
            debug!(target: MODULE_TARGET, module = %self.id, "Update hook `{}` faulted", hook);
        }
    }

    /// Invoke a hook, pushing an exception on failure. Returns `true` on success.
    fn call<F>(&mut self, hook: &str, f: F) -> bool
    where
        F: FnOnce(&mut dyn Module, &mut ModuleContext<'_>) -> anyhow::Result<()>,
    {
        match self.invoke(f) {
            Ok(()) => true,
            Err(e) => {
                self.push_exception(e.context(format!("{hook} failed")));
                false
            }
        }
    }

    fn invoke<F>(&mut self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut dyn Module, &mut ModuleContext<'_>) -> anyhow::Result<()>,
    {
        let (module, mut ctx) = self.parts();
        contain(panic::catch_unwind(AssertUnwindSafe(|| f(module, &mut ctx))))
    }

    fn parts(&mut self) -> (&mut dyn Module, ModuleContext<'_>) {
        let ctx = ModuleContext::new(
            &self.id,
            &mut self.parameters,
            &mut self.settings,
            &mut self.update_hooks,
            self.sink.as_ref(),
        );
        (self.module.as_mut(), ctx)
    }

    fn set_state(&mut self, state: ModuleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(target: MODULE_TARGET, module = %self.id, "State changed to {}", state);
        }
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .field("enabled", &self.enabled)
            .field("parameters", &self.parameters.len())
            .field("pending_tasks", &self.scheduler.pending())
            .finish_non_exhaustive()
    }
}

/// Await an async hook with panic containment and an optional time limit.
async fn guarded<T, F>(fut: F, limit: Option<Duration>, hook: &str) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let fut = AssertUnwindSafe(fut).catch_unwind();
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow!("{hook} hook did not finish within {limit:?}"))?,
        None => fut.await,
    };
    contain(result)
}

fn contain<T>(result: std::thread::Result<anyhow::Result<T>>) -> anyhow::Result<T> {
    match result {
        Ok(inner) => inner,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::parameter::{ParameterMode, ParameterType, ParameterValue, RegisteredParameter};
    use crate::runtime::RuntimeConfig;
    use crate::transport::ChannelSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    type Events = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct Probe {
        events: Events,
        start_result: Option<bool>,
        start_delay: Option<Duration>,
        stop_delay: Option<Duration>,
        panic_on_update: bool,
    }

    #[async_trait]
    impl Module for Probe {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("Probe", "Records hook calls")
        }

        fn on_load(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
            ctx.register_parameter("Face", "avatar/parameters/*", ParameterMode::Read, ParameterType::Float)?;
            ctx.register_update(UpdateHook::every("fast", Duration::from_millis(100)).immediately());
            ctx.register_update(UpdateHook::every("slow", Duration::from_millis(300)));
            self.events.lock().push("load".into());
            Ok(())
        }

        async fn on_module_start(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<bool> {
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            self.events.lock().push("start".into());
            Ok(self.start_result.unwrap_or(true))
        }

        async fn on_module_stop(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
            if let Some(delay) = self.stop_delay {
                tokio::time::sleep(delay).await;
            }
            self.events.lock().push("stop".into());
            Ok(())
        }

        fn on_update(&mut self, hook: &str, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
            if self.panic_on_update {
                panic!("boom in {hook}");
            }
            self.events.lock().push(format!("update:{hook}"));
            Ok(())
        }

        fn on_any_parameter_received(
            &mut self,
            _ctx: &mut ModuleContext<'_>,
            parameter: &InboundMessage,
        ) -> anyhow::Result<()> {
            self.events.lock().push(format!("any:{}", parameter.address));
            Ok(())
        }

        fn on_registered_parameter_received(
            &mut self,
            _ctx: &mut ModuleContext<'_>,
            parameter: &RegisteredParameter,
        ) -> anyhow::Result<()> {
            self.events.lock().push(format!("registered:{}", parameter.key));
            Ok(())
        }
    }

    fn services(clock: &ManualClock, hook_timeout: Option<Duration>) -> HostServices {
        let (sink, _rx) = ChannelSink::new();
        HostServices::new(Arc::new(sink))
            .with_clock(Arc::new(clock.clone()))
            .with_config(RuntimeConfig {
                hook_timeout,
                enabled_by_default: true,
            })
    }

    fn loaded(probe: Probe, clock: &ManualClock) -> LoadedModule {
        let mut module = LoadedModule::new(
            "local.probe",
            ModuleOrigin::Local,
            Box::new(probe),
            &services(clock, Some(Duration::from_millis(50))),
        );
        module.load(None).unwrap();
        module
    }

    fn events(events: &Events) -> Vec<String> {
        events.lock().clone()
    }

    #[tokio::test]
    async fn test_start_schedules_hooks_and_runs_immediate_ones() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                ..Default::default()
            },
            &clock,
        );

        module.start().await;
        assert_eq!(module.state(), ModuleState::Started);
        assert_eq!(events(&log), vec!["load", "start", "update:fast"]);
        assert_eq!(module.pending_tasks(), 2);

        clock.advance(Duration::from_millis(300));
        module.update();
        assert_eq!(
            events(&log)[3..],
            ["update:fast".to_string(), "update:slow".to_string()]
        );

        module.stop().await;
        assert_eq!(module.state(), ModuleState::Stopped);
        assert_eq!(module.pending_tasks(), 0);
        assert_eq!(events(&log).last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn test_declined_start_ends_stopped() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                start_result: Some(false),
                ..Default::default()
            },
            &clock,
        );

        let mut states = module.subscribe();
        module.start().await;

        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(states.has_changed().unwrap());
        assert_eq!(events(&log), vec!["load", "start", "stop"]);
        assert_eq!(module.pending_tasks(), 0);
        assert!(module.last_error().is_none());
    }

    #[tokio::test]
    async fn test_start_timeout_is_a_failed_start() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                start_delay: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            &clock,
        );

        module.start().await;
        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(module.last_error().unwrap().contains("did not finish"));
        assert_eq!(events(&log), vec!["load", "stop"]);
    }

    #[tokio::test]
    async fn test_stop_timeout_forces_stopped() {
        let clock = ManualClock::new();
        let mut module = loaded(
            Probe {
                stop_delay: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            &clock,
        );

        module.start().await;
        module.stop().await;
        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(module.last_error().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_immediate_update_stops_module_during_start() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                panic_on_update: true,
                ..Default::default()
            },
            &clock,
        );

        // The immediate run of `fast` panics during start.
        module.start().await;
        assert!(logs_contain("Probe experienced an exception"));
        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(!module.stop_requested());
        assert_eq!(module.pending_tasks(), 0);
        assert!(module.last_error().unwrap().contains("boom in fast"));
        assert_eq!(events(&log), vec!["load", "start", "stop"]);

        clock.advance(Duration::from_secs(1));
        module.update();
        assert_eq!(module.state(), ModuleState::Stopped);
        assert_eq!(events(&log).len(), 3);
    }

    #[tokio::test]
    async fn test_any_event_fires_before_registered_event() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                ..Default::default()
            },
            &clock,
        );
        module.start().await;
        log.lock().clear();

        let outcome = module.on_parameter_received(&InboundMessage::new(
            "avatar/parameters/FaceFree",
            ParameterValue::Float(0.5),
        ));
        assert!(matches!(outcome, RouteOutcome::Dispatched(_)));
        module.on_parameter_received(&InboundMessage::new("chatbox/typing", true));

        assert_eq!(
            events(&log),
            vec![
                "any:avatar/parameters/FaceFree",
                "registered:Face",
                "any:chatbox/typing"
            ]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_type_mismatch_is_logged_and_not_delivered() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                ..Default::default()
            },
            &clock,
        );
        module.start().await;
        log.lock().clear();

        let outcome = module
            .on_parameter_received(&InboundMessage::new("avatar/parameters/FaceFree", 1));
        assert!(matches!(outcome, RouteOutcome::Rejected { .. }));
        assert_eq!(events(&log), vec!["any:avatar/parameters/FaceFree"]);
        assert!(logs_contain(
            "`Face` expects type `float` but received type `int`"
        ));
    }

    #[tokio::test]
    async fn test_stopped_module_ignores_events() {
        let clock = ManualClock::new();
        let log = Events::default();
        let mut module = loaded(
            Probe {
                events: log.clone(),
                ..Default::default()
            },
            &clock,
        );

        module.on_parameter_received(&InboundMessage::new("avatar/parameters/FaceFree", 0.5f32));
        module.avatar_change();
        clock.advance(Duration::from_secs(1));
        module.update();
        assert_eq!(events(&log), vec!["load"]);
    }

    #[tokio::test]
    async fn test_stored_configuration_applies_and_snapshots() {
        let clock = ManualClock::new();
        let mut module = LoadedModule::new(
            "local.probe",
            ModuleOrigin::Local,
            Box::new(Probe::default()),
            &services(&clock, None),
        );
        let stored = StoredModule {
            enabled: Some(false),
            parameters: [("Face".to_string(), "face/*".to_string())].into(),
            settings: Default::default(),
        };
        module.load(Some(stored.clone())).unwrap();

        assert!(!module.is_enabled());
        assert_eq!(module.parameters().get_by_name("Face").unwrap().wire_name, "face/*");
        assert_eq!(module.snapshot(), stored);
    }
}
