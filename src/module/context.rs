//! The handle a module's hooks use to talk to the host.

use std::time::Duration;
use tracing::{info, warn};

use super::settings::{SettingKind, SettingType, SettingValue, SettingsRegistry};
use super::MODULE_TARGET;
use crate::error::{HostError, HostResult};
use crate::parameter::{
    ParameterDefinition, ParameterKey, ParameterMode, ParameterRegistry, ParameterType,
    ParameterValue,
};
use crate::transport::ParameterSink;

/// A repeating update callback declared by a module.
///
/// Hooks are declared during `on_load`. Once the module has started, the
/// runtime calls [`Module::on_update`](super::Module::on_update) with the
/// hook's name every `interval`, and once more right away if
/// `run_immediately` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateHook {
    /// Name passed back to `on_update`.
    pub name: String,
    /// Time between runs.
    pub interval: Duration,
    /// Also run once synchronously when the module starts.
    pub run_immediately: bool,
}

impl UpdateHook {
    /// A hook named `name` running every `interval`.
    pub fn every(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            run_immediately: false,
        }
    }

    /// Also run once as soon as the module starts.
    pub fn immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }
}

/// Passed to every module hook.
///
/// Registration calls report configuration errors (duplicate keys, bad wire
/// names) through their `Result` and leave the earlier registration intact.
pub struct ModuleContext<'a> {
    module_id: &'a str,
    parameters: &'a mut ParameterRegistry,
    settings: &'a mut SettingsRegistry,
    update_hooks: &'a mut Vec<UpdateHook>,
    sink: &'a dyn ParameterSink,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        module_id: &'a str,
        parameters: &'a mut ParameterRegistry,
        settings: &'a mut SettingsRegistry,
        update_hooks: &'a mut Vec<UpdateHook>,
        sink: &'a dyn ParameterSink,
    ) -> Self {
        Self {
            module_id,
            parameters,
            settings,
            update_hooks,
            sink,
        }
    }

    /// Id of the module this context belongs to.
    pub fn module_id(&self) -> &str {
        self.module_id
    }

    // -------------------------------------------------------------------------
    // Parameters
    // -------------------------------------------------------------------------

    /// Declare a parameter the user can rename.
    ///
    /// Registering after the module has started takes effect for inbound
    /// routing on the next start.
    pub fn register_parameter(
        &mut self,
        key: impl Into<ParameterKey>,
        default_name: impl Into<String>,
        mode: ParameterMode,
        value_type: ParameterType,
    ) -> HostResult<&mut ParameterDefinition> {
        let id = self.module_id;
        self.parameters
            .register(key, default_name, mode, value_type)
            .inspect_err(|e| report(id, e))
    }

    /// Send a value on the wire name currently configured for `key`.
    pub fn send_parameter(
        &mut self,
        key: impl Into<ParameterKey>,
        value: impl Into<ParameterValue>,
    ) -> HostResult<()> {
        let id = self.module_id;
        let key = key.into();
        let (address, value) = self
            .parameters
            .resolve_outbound(&key, value.into())
            .inspect_err(|e| report(id, e))?;
        self.sink.send(&address, value)
    }

    /// Send a value on an arbitrary address, bypassing the registry.
    pub fn send_raw(&mut self, address: &str, value: impl Into<ParameterValue>) -> HostResult<()> {
        self.sink.send(address, value.into())
    }

    /// Read-only view of the declared parameters.
    pub fn parameters(&self) -> &ParameterRegistry {
        self.parameters
    }

    // -------------------------------------------------------------------------
    // Update hooks
    // -------------------------------------------------------------------------

    /// Declare a repeating update hook.
    ///
    /// Hooks declared after the module has started are scheduled on the next
    /// start.
    pub fn register_update(&mut self, hook: UpdateHook) {
        self.update_hooks.push(hook);
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Create an on/off setting.
    pub fn create_toggle(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        default: bool,
    ) -> HostResult<()> {
        self.create_setting(key, title, description, SettingKind::Toggle, SettingValue::Bool(default))
    }

    /// Create a text setting.
    pub fn create_text(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        default: &str,
        empty_is_valid: bool,
    ) -> HostResult<()> {
        self.create_setting(
            key,
            title,
            description,
            SettingKind::Text { empty_is_valid },
            SettingValue::String(default.to_string()),
        )
    }

    /// Create an integer setting.
    pub fn create_int(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        default: i64,
    ) -> HostResult<()> {
        self.create_setting(key, title, description, SettingKind::Int, SettingValue::Int(default))
    }

    /// Create an integer slider bounded by `min..=max`.
    pub fn create_int_slider(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        default: i64,
        min: i64,
        max: i64,
    ) -> HostResult<()> {
        self.create_setting(
            key,
            title,
            description,
            SettingKind::IntSlider { min, max },
            SettingValue::Int(default),
        )
    }

    /// Create a float slider bounded by `min..=max`.
    pub fn create_float_slider(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        default: f64,
        min: f64,
        max: f64,
    ) -> HostResult<()> {
        self.create_setting(
            key,
            title,
            description,
            SettingKind::FloatSlider { min, max },
            SettingValue::Float(default),
        )
    }

    /// Create a setting restricted to one of `options`.
    pub fn create_dropdown(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        options: &[&str],
        default: &str,
    ) -> HostResult<()> {
        self.create_setting(
            key,
            title,
            description,
            SettingKind::Dropdown {
                options: options.iter().map(|o| (*o).to_string()).collect(),
            },
            SettingValue::String(default.to_string()),
        )
    }

    /// Group settings under a title for presentation layers.
    pub fn create_group(&mut self, title: &str, keys: &[&str]) -> HostResult<()> {
        let id = self.module_id;
        self.settings
            .create_group(title, keys)
            .inspect_err(|e| report(id, e))
    }

    /// Read a setting as `T`.
    pub fn setting<T: SettingType>(&self, key: &str) -> HostResult<T> {
        self.settings.value(key)
    }

    /// Every setting this module has created.
    pub fn settings(&self) -> &SettingsRegistry {
        self.settings
    }

    /// Read a setting without knowing its type.
    pub fn setting_value(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key).map(|s| s.value())
    }

    /// Create a setting of any kind.
    pub fn create_setting(
        &mut self,
        key: &str,
        title: &str,
        description: &str,
        kind: SettingKind,
        default: SettingValue,
    ) -> HostResult<()> {
        let id = self.module_id;
        self.settings
            .create(key, title, description, kind, default)
            .inspect_err(|e| report(id, e))
    }

    // -------------------------------------------------------------------------
    // Logging
    // -------------------------------------------------------------------------

    /// Log to this module's channel.
    pub fn log(&self, message: impl AsRef<str>) {
        info!(target: MODULE_TARGET, module = %self.module_id, "{}", message.as_ref());
    }
}

fn report(module_id: &str, error: &HostError) {
    warn!(target: MODULE_TARGET, module = %module_id, "{}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelSink;

    struct Parts {
        parameters: ParameterRegistry,
        settings: SettingsRegistry,
        hooks: Vec<UpdateHook>,
        sink: ChannelSink,
    }

    fn parts() -> (Parts, tokio::sync::mpsc::UnboundedReceiver<crate::parameter::WireMessage>) {
        let (sink, rx) = ChannelSink::new();
        (
            Parts {
                parameters: ParameterRegistry::new(),
                settings: SettingsRegistry::new(),
                hooks: Vec::new(),
                sink,
            },
            rx,
        )
    }

    #[test]
    fn test_send_parameter_uses_configured_name() {
        let (mut p, mut rx) = parts();
        let mut ctx = ModuleContext::new(
            "local.test",
            &mut p.parameters,
            &mut p.settings,
            &mut p.hooks,
            &p.sink,
        );

        ctx.register_parameter("Toggle", "switch", ParameterMode::Write, ParameterType::Bool)
            .unwrap();
        ctx.send_parameter("Toggle", true).unwrap();
        ctx.send_raw("chatbox/input", "hello").unwrap();

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.address, "switch");
        assert_eq!(sent.value, ParameterValue::Bool(true));
        assert_eq!(rx.try_recv().unwrap().address, "chatbox/input");
    }

    #[test]
    fn test_send_unregistered_parameter_fails() {
        let (mut p, mut rx) = parts();
        let mut ctx = ModuleContext::new(
            "local.test",
            &mut p.parameters,
            &mut p.settings,
            &mut p.hooks,
            &p.sink,
        );

        assert!(matches!(
            ctx.send_parameter("Missing", 1),
            Err(HostError::UnregisteredKey(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registrations_land_in_registries() {
        let (mut p, _rx) = parts();
        {
            let mut ctx = ModuleContext::new(
                "local.test",
                &mut p.parameters,
                &mut p.settings,
                &mut p.hooks,
                &p.sink,
            );
            ctx.register_update(UpdateHook::every("poll", Duration::from_millis(500)).immediately());
            ctx.create_toggle("Loud", "Loud", "Announce changes", false)
                .unwrap();
            ctx.create_dropdown("Voice", "Voice", "", &["a", "b"], "a")
                .unwrap();
            assert!(ctx.create_toggle("Loud", "Again", "", true).is_err());
            assert!(!ctx.setting::<bool>("Loud").unwrap());
        }

        assert_eq!(p.hooks.len(), 1);
        assert!(p.hooks[0].run_immediately);
        assert_eq!(p.settings.iter().count(), 2);
    }
}
