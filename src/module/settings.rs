//! User-configurable module settings.
//!
//! Settings are created by a module during `on_load` and read back at any
//! later point. Like parameters, each setting lives under a key that must be
//! unique within the module; creating a key twice is refused.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{HostError, HostResult};

/// A stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Toggle state
    Bool(bool),
    /// Integer input or integer slider
    Int(i64),
    /// Float slider
    Float(f64),
    /// Text input or dropdown selection
    String(String),
}

impl SettingValue {
    /// Name of the held type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "int",
            SettingValue::Float(_) => "float",
            SettingValue::String(_) => "string",
        }
    }
}

/// Rust types that can be read out of a [`SettingValue`].
pub trait SettingType: Sized {
    /// Type name used in mismatch errors.
    const NAME: &'static str;

    /// Extract `Self`, or `None` on a type mismatch.
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl SettingType for bool {
    const NAME: &'static str = "bool";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl SettingType for i64 {
    const NAME: &'static str = "int";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl SettingType for f64 {
    const NAME: &'static str = "float";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl SettingType for String {
    const NAME: &'static str = "string";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// What kind of input a setting represents, with its constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingKind {
    /// On/off switch.
    Toggle,
    /// Free text.
    Text {
        /// Whether an empty string is accepted.
        empty_is_valid: bool,
    },
    /// Unbounded integer.
    Int,
    /// Integer within `min..=max`.
    IntSlider {
        /// Lower bound (inclusive)
        min: i64,
        /// Upper bound (inclusive)
        max: i64,
    },
    /// Float within `min..=max`.
    FloatSlider {
        /// Lower bound (inclusive)
        min: f64,
        /// Upper bound (inclusive)
        max: f64,
    },
    /// One of a fixed list of options.
    Dropdown {
        /// Allowed values
        options: Vec<String>,
    },
}

/// A single setting definition and its current value.
#[derive(Debug, Clone)]
pub struct ModuleSetting {
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
    /// Input kind and constraints.
    pub kind: SettingKind,
    default: SettingValue,
    value: SettingValue,
}

impl ModuleSetting {
    /// Current value.
    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    /// Value the module declared.
    pub fn default_value(&self) -> &SettingValue {
        &self.default
    }

    /// Whether the current value equals the default.
    pub fn is_default(&self) -> bool {
        self.value == self.default
    }

    fn validate(&self, key: &str, value: &SettingValue) -> HostResult<()> {
        let invalid = |reason: String| HostError::InvalidSettingValue {
            key: key.to_string(),
            reason,
        };

        if value.type_name() != self.default.type_name() {
            return Err(HostError::SettingTypeMismatch {
                key: key.to_string(),
                expected: self.default.type_name(),
                actual: value.type_name(),
            });
        }

        match (&self.kind, value) {
            (SettingKind::Text { empty_is_valid: false }, SettingValue::String(s))
                if s.is_empty() =>
            {
                Err(invalid("value cannot be empty".to_string()))
            }
            (SettingKind::IntSlider { min, max }, SettingValue::Int(v))
                if v < min || v > max =>
            {
                Err(invalid(format!("{v} is outside {min}..={max}")))
            }
            (SettingKind::FloatSlider { min, max }, SettingValue::Float(v))
                if !(*min..=*max).contains(v) =>
            {
                Err(invalid(format!("{v} is outside {min}..={max}")))
            }
            (SettingKind::Dropdown { options }, SettingValue::String(v))
                if !options.contains(v) =>
            {
                Err(invalid(format!("`{v}` is not one of {options:?}")))
            }
            _ => Ok(()),
        }
    }
}

/// Per-module collection of settings and their presentation groups.
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    settings: HashMap<String, ModuleSetting>,
    /// Creation order, for stable presentation.
    order: Vec<String>,
    groups: Vec<(String, Vec<String>)>,
}

impl SettingsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a setting. Fails if `key` already exists, keeping the first one.
    pub fn create(
        &mut self,
        key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: SettingKind,
        default: SettingValue,
    ) -> HostResult<()> {
        let key = key.into();
        if self.settings.contains_key(&key) {
            return Err(HostError::DuplicateSettingKey(key));
        }

        let setting = ModuleSetting {
            title: title.into(),
            description: description.into(),
            kind,
            value: default.clone(),
            default,
        };
        self.order.push(key.clone());
        self.settings.insert(key, setting);
        Ok(())
    }

    /// Group settings under a title for presentation.
    pub fn create_group(&mut self, title: impl Into<String>, keys: &[&str]) -> HostResult<()> {
        if let Some(missing) = keys.iter().find(|k| !self.settings.contains_key(**k)) {
            return Err(HostError::UnknownSetting((*missing).to_string()));
        }
        self.groups
            .push((title.into(), keys.iter().map(|k| (*k).to_string()).collect()));
        Ok(())
    }

    /// Look up a setting.
    pub fn get(&self, key: &str) -> Option<&ModuleSetting> {
        self.settings.get(key)
    }

    /// Read a setting as `T`.
    pub fn value<T: SettingType>(&self, key: &str) -> HostResult<T> {
        let setting = self
            .settings
            .get(key)
            .ok_or_else(|| HostError::UnknownSetting(key.to_string()))?;
        T::from_setting(&setting.value).ok_or_else(|| HostError::SettingTypeMismatch {
            key: key.to_string(),
            expected: T::NAME,
            actual: setting.value.type_name(),
        })
    }

    /// Replace a setting's value after validating it against its kind.
    pub fn set(&mut self, key: &str, value: SettingValue) -> HostResult<()> {
        let setting = self
            .settings
            .get_mut(key)
            .ok_or_else(|| HostError::UnknownSetting(key.to_string()))?;
        setting.validate(key, &value)?;
        setting.value = value;
        Ok(())
    }

    /// Restore a setting to its default.
    pub fn reset(&mut self, key: &str) -> HostResult<()> {
        let setting = self
            .settings
            .get_mut(key)
            .ok_or_else(|| HostError::UnknownSetting(key.to_string()))?;
        setting.value = setting.default.clone();
        Ok(())
    }

    /// Keys in creation order with their settings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleSetting)> {
        self.order
            .iter()
            .filter_map(|k| self.settings.get(k).map(|s| (k.as_str(), s)))
    }

    /// Presentation groups as `(title, keys)`.
    pub fn groups(&self) -> &[(String, Vec<String>)] {
        &self.groups
    }

    /// Values that differ from their defaults, for persistence.
    pub fn changed_values(&self) -> HashMap<String, SettingValue> {
        self.settings
            .iter()
            .filter(|(_, s)| !s.is_default())
            .map(|(k, s)| (k.clone(), s.value.clone()))
            .collect()
    }

    /// Whether no settings exist.
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}
