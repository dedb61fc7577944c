//! A module implemented by a Rhai script.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, FuncArgs, Map, Scope, AST};
use tracing::warn;

use crate::error::HostError;
use crate::module::{
    Module, ModuleCategory, ModuleContext, ModuleInfo, SettingKind, SettingValue, UpdateHook,
    MODULE_TARGET,
};
use crate::parameter::{
    ParameterMode, ParameterType, ParameterValue, ReceivedParameter, RegisteredParameter,
};

/// Requests a script makes through host functions while a hook runs.
///
/// Host functions cannot reach the [`ModuleContext`] directly, so they queue
/// commands that are applied in order once the hook returns.
#[derive(Debug)]
enum Command {
    RegisterParameter {
        key: String,
        default_name: String,
        mode: ParameterMode,
        value_type: ParameterType,
    },
    RegisterUpdate(UpdateHook),
    Send {
        key: String,
        value: ParameterValue,
    },
    SendRaw {
        address: String,
        value: ParameterValue,
    },
    Log(String),
    CreateSetting {
        key: String,
        title: String,
        description: String,
        kind: SettingKind,
        default: SettingValue,
    },
}

type Commands = Arc<Mutex<Vec<Command>>>;
type SettingsView = Arc<Mutex<HashMap<String, SettingValue>>>;

/// One instance of a script module.
///
/// Each instance owns its own engine so host functions can be bound to the
/// instance's command queue. Instance state lives in the `this` object map;
/// top-level statements of the script are never executed.
pub struct ScriptModule {
    script: String,
    engine: Engine,
    ast: Arc<AST>,
    scope: Scope<'static>,
    this: Dynamic,
    info: ModuleInfo,
    functions: HashSet<(String, usize)>,
    commands: Commands,
    settings: SettingsView,
}

impl ScriptModule {
    /// Instantiate the compiled `ast` of `script`.
    ///
    /// Fails if `module_info()` is missing, errors, or returns something
    /// other than a map with a known category.
    pub fn new(script: &str, ast: Arc<AST>, max_operations: u64) -> anyhow::Result<Self> {
        let commands = Commands::default();
        let settings = SettingsView::default();
        let engine = build_engine(max_operations, &commands, &settings);

        let functions = ast
            .iter_functions()
            .map(|f| (f.name.to_string(), f.params.len()))
            .collect::<HashSet<_>>();
        if !functions.contains(&("module_info".to_string(), 0)) {
            return Err(anyhow!(HostError::Script {
                script: script.to_string(),
                message: "missing `module_info()`".to_string(),
            }));
        }

        let mut scope = Scope::new();
        let raw_info = engine
            .call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(false),
                &mut scope,
                &ast,
                "module_info",
                (),
            )
            .map_err(|e| script_error(script, &e))?;
        let info = parse_info(raw_info, script)?;

        Ok(Self {
            script: script.to_string(),
            engine,
            ast,
            scope,
            this: Dynamic::from_map(Map::new()),
            info,
            functions,
            commands,
            settings,
        })
    }

    fn defines(&self, name: &str, arity: usize) -> bool {
        self.functions.contains(&(name.to_string(), arity))
    }

    /// Call a script function if it is defined, then apply queued commands.
    fn call(
        &mut self,
        ctx: &mut ModuleContext<'_>,
        name: &str,
        arity: usize,
        args: impl FuncArgs,
    ) -> anyhow::Result<Option<Dynamic>> {
        if !self.defines(name, arity) {
            return Ok(None);
        }

        {
            let mut view = self.settings.lock();
            view.clear();
            for (key, setting) in ctx.settings().iter() {
                view.insert(key.to_string(), setting.value().clone());
            }
        }

        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.this);
        let result = self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            name,
            args,
        );

        // Commands issued before an error still take effect.
        self.apply(ctx);
        result.map(Some).map_err(|e| script_error(&self.script, &e))
    }

    fn apply(&self, ctx: &mut ModuleContext<'_>) {
        let commands = std::mem::take(&mut *self.commands.lock());
        for command in commands {
            // Registry errors are already reported on the module channel.
            match command {
                Command::RegisterParameter {
                    key,
                    default_name,
                    mode,
                    value_type,
                } => {
                    let _ = ctx.register_parameter(key, default_name, mode, value_type);
                }
                Command::RegisterUpdate(hook) => ctx.register_update(hook),
                Command::Send { key, value } => {
                    let _ = ctx.send_parameter(key, value);
                }
                Command::SendRaw { address, value } => {
                    if let Err(e) = ctx.send_raw(&address, value) {
                        warn!(target: MODULE_TARGET, module = %ctx.module_id(), "{}", e);
                    }
                }
                Command::Log(message) => ctx.log(message),
                Command::CreateSetting {
                    key,
                    title,
                    description,
                    kind,
                    default,
                } => {
                    let _ = ctx.create_setting(&key, &title, &description, kind, default);
                }
            }
        }
    }

    fn call_unit(
        &mut self,
        ctx: &mut ModuleContext<'_>,
        name: &str,
        arity: usize,
        args: impl FuncArgs,
    ) -> anyhow::Result<()> {
        self.call(ctx, name, arity, args).map(|_| ())
    }
}

#[async_trait]
impl Module for ScriptModule {
    fn info(&self) -> ModuleInfo {
        self.info.clone()
    }

    fn on_load(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_load", 0, ())
    }

    fn on_post_load(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_post_load", 0, ())
    }

    async fn on_module_start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<bool> {
        let result = self.call(ctx, "on_module_start", 0, ())?;
        // Anything but an explicit `false` counts as success.
        Ok(!matches!(result.and_then(|v| v.as_bool().ok()), Some(false)))
    }

    async fn on_module_stop(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_module_stop", 0, ())
    }

    fn on_update(&mut self, hook: &str, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_update", 1, (hook.to_string(),))
    }

    fn on_avatar_change(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_avatar_change", 0, ())
    }

    fn on_player_update(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.call_unit(ctx, "on_player_update", 0, ())
    }

    fn on_any_parameter_received(
        &mut self,
        ctx: &mut ModuleContext<'_>,
        parameter: &ReceivedParameter,
    ) -> anyhow::Result<()> {
        let args = (parameter.address.clone(), to_dynamic(&parameter.value));
        self.call_unit(ctx, "on_any_parameter_received", 2, args)
    }

    fn on_registered_parameter_received(
        &mut self,
        ctx: &mut ModuleContext<'_>,
        parameter: &RegisteredParameter,
    ) -> anyhow::Result<()> {
        let args = (
            parameter.key.to_string(),
            to_dynamic(&parameter.value),
            parameter.address.clone(),
        );
        self.call_unit(ctx, "on_registered_parameter_received", 3, args)
    }
}

// =============================================================================
// Engine setup
// =============================================================================

fn build_engine(max_operations: u64, commands: &Commands, settings: &SettingsView) -> Engine {
    let mut engine = Engine::new();

    engine.on_progress(move |count| {
        if count > max_operations {
            Some(format!("Safety limit exceeded: maximum {max_operations} operations").into())
        } else {
            None
        }
    });

    let queue = Arc::clone(commands);
    engine.on_print(move |text| queue.lock().push(Command::Log(text.to_string())));

    let queue = Arc::clone(commands);
    engine.register_fn("log", move |message: &str| {
        queue.lock().push(Command::Log(message.to_string()));
    });

    let queue = Arc::clone(commands);
    engine.register_fn(
        "register_parameter",
        move |key: &str, default_name: &str, mode: &str, value_type: &str| -> Result<(), Box<EvalAltResult>> {
            let mode = ParameterMode::parse(mode)
                .ok_or_else(|| format!("unknown parameter mode `{mode}`"))?;
            let value_type = ParameterType::parse(value_type)
                .ok_or_else(|| format!("unknown parameter type `{value_type}`"))?;
            queue.lock().push(Command::RegisterParameter {
                key: key.to_string(),
                default_name: default_name.to_string(),
                mode,
                value_type,
            });
            Ok(())
        },
    );

    let queue = Arc::clone(commands);
    engine.register_fn(
        "register_update",
        move |name: &str, interval_ms: i64, run_immediately: bool| -> Result<(), Box<EvalAltResult>> {
            let interval = u64::try_from(interval_ms)
                .map_err(|_| format!("update interval must not be negative, got {interval_ms}"))?;
            queue.lock().push(Command::RegisterUpdate(UpdateHook {
                name: name.to_string(),
                interval: Duration::from_millis(interval),
                run_immediately,
            }));
            Ok(())
        },
    );

    let queue = Arc::clone(commands);
    engine.register_fn(
        "send_parameter",
        move |key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let value = from_dynamic(&value)?;
            queue.lock().push(Command::Send {
                key: key.to_string(),
                value,
            });
            Ok(())
        },
    );

    let queue = Arc::clone(commands);
    engine.register_fn(
        "send_raw",
        move |address: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let value = from_dynamic(&value)?;
            queue.lock().push(Command::SendRaw {
                address: address.to_string(),
                value,
            });
            Ok(())
        },
    );

    let create = SettingCreator {
        commands: Arc::clone(commands),
        view: Arc::clone(settings),
    };

    let c = create.clone();
    engine.register_fn(
        "create_toggle",
        move |key: &str, title: &str, description: &str, default: bool| {
            c.push(key, title, description, SettingKind::Toggle, SettingValue::Bool(default));
        },
    );

    let c = create.clone();
    engine.register_fn(
        "create_text",
        move |key: &str, title: &str, description: &str, default: &str| {
            c.push(
                key,
                title,
                description,
                SettingKind::Text { empty_is_valid: true },
                SettingValue::String(default.to_string()),
            );
        },
    );

    let c = create.clone();
    engine.register_fn(
        "create_int",
        move |key: &str, title: &str, description: &str, default: i64| {
            c.push(key, title, description, SettingKind::Int, SettingValue::Int(default));
        },
    );

    let c = create;
    engine.register_fn(
        "create_dropdown",
        move |key: &str, title: &str, description: &str, options: Array, default: &str| {
            let options = options
                .into_iter()
                .filter_map(|o| o.into_string().ok())
                .collect();
            c.push(
                key,
                title,
                description,
                SettingKind::Dropdown { options },
                SettingValue::String(default.to_string()),
            );
        },
    );

    let view = Arc::clone(settings);
    engine.register_fn("setting", move |key: &str| -> Dynamic {
        view.lock()
            .get(key)
            .map(setting_to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    });

    engine
}

/// Queues setting creation and makes the default readable within the same
/// hook call.
#[derive(Clone)]
struct SettingCreator {
    commands: Commands,
    view: SettingsView,
}

impl SettingCreator {
    fn push(&self, key: &str, title: &str, description: &str, kind: SettingKind, default: SettingValue) {
        self.view
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| default.clone());
        self.commands.lock().push(Command::CreateSetting {
            key: key.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            kind,
            default,
        });
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn parse_info(value: Dynamic, script: &str) -> anyhow::Result<ModuleInfo> {
    let map = value.try_cast::<Map>().ok_or_else(|| {
        anyhow!(HostError::Script {
            script: script.to_string(),
            message: "`module_info()` must return an object map".to_string(),
        })
    })?;
    let text = |key: &str| map.get(key).and_then(|v| v.clone().into_string().ok());

    let category = match text("category") {
        Some(name) => ModuleCategory::parse(&name).ok_or_else(|| {
            anyhow!(HostError::Script {
                script: script.to_string(),
                message: format!("unknown category `{name}`"),
            })
        })?,
        None => ModuleCategory::Generic,
    };

    Ok(ModuleInfo {
        title: text("title").unwrap_or_else(|| script.to_string()),
        description: text("description").unwrap_or_default(),
        category,
    })
}

fn script_error(script: &str, error: &EvalAltResult) -> anyhow::Error {
    anyhow!(HostError::Script {
        script: script.to_string(),
        message: error.to_string(),
    })
}

fn from_dynamic(value: &Dynamic) -> Result<ParameterValue, Box<EvalAltResult>> {
    if let Ok(v) = value.as_bool() {
        return Ok(ParameterValue::Bool(v));
    }
    if let Ok(v) = value.as_int() {
        let v = i32::try_from(v).map_err(|_| format!("{v} does not fit a 32-bit parameter"))?;
        return Ok(ParameterValue::Int(v));
    }
    if let Ok(v) = value.as_float() {
        return Ok(ParameterValue::Float(v as f32));
    }
    if value.is_string() {
        return Ok(ParameterValue::String(value.to_string()));
    }
    Err(format!("cannot send a value of type `{}`", value.type_name()).into())
}

fn to_dynamic(value: &ParameterValue) -> Dynamic {
    match value {
        ParameterValue::Bool(v) => Dynamic::from(*v),
        ParameterValue::Int(v) => Dynamic::from(i64::from(*v)),
        ParameterValue::Float(v) => Dynamic::from(f64::from(*v)),
        ParameterValue::String(v) => Dynamic::from(v.clone()),
    }
}

fn setting_to_dynamic(value: &SettingValue) -> Dynamic {
    match value {
        SettingValue::Bool(v) => Dynamic::from(*v),
        SettingValue::Int(v) => Dynamic::from(*v),
        SettingValue::Float(v) => Dynamic::from(*v),
        SettingValue::String(v) => Dynamic::from(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Arc<AST> {
        Arc::new(Engine::new().compile(source).unwrap())
    }

    #[test]
    fn test_info_is_read_from_script() {
        let ast = compile(
            r#"
            fn module_info() {
                #{ title: "Counter", description: "Counts", category: "health" }
            }
            "#,
        );
        let module = ScriptModule::new("counter.rhai", ast, 10_000).unwrap();
        let info = module.info();
        assert_eq!(info.title, "Counter");
        assert_eq!(info.description, "Counts");
        assert_eq!(info.category, ModuleCategory::Health);
    }

    #[test]
    fn test_missing_or_bad_info_is_rejected() {
        let err = ScriptModule::new("a.rhai", compile("fn on_load() {}"), 10_000)
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing `module_info()`"));

        let err = ScriptModule::new("b.rhai", compile("fn module_info() { 42 }"), 10_000)
            .err()
            .unwrap();
        assert!(err.to_string().contains("object map"));

        let err = ScriptModule::new(
            "c.rhai",
            compile(r#"fn module_info() { #{ category: "toys" } }"#),
            10_000,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("unknown category"));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(
            from_dynamic(&Dynamic::from(true)).unwrap(),
            ParameterValue::Bool(true)
        );
        assert_eq!(
            from_dynamic(&Dynamic::from(7_i64)).unwrap(),
            ParameterValue::Int(7)
        );
        assert_eq!(
            from_dynamic(&Dynamic::from("hi".to_string())).unwrap(),
            ParameterValue::String("hi".into())
        );
        assert!(from_dynamic(&Dynamic::from(i64::MAX)).is_err());
        assert!(from_dynamic(&Dynamic::UNIT).is_err());
        assert_eq!(to_dynamic(&ParameterValue::Int(3)).as_int().unwrap(), 3);
    }
}
