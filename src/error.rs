//! Custom error types for the module host.
//!
//! This module defines the primary error type, `HostError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report the failures that can happen while loading, configuring and driving
//! modules.
//!
//! ## Error Hierarchy
//!
//! `HostError` groups failures by where they surface:
//!
//! - **Load errors** (`AlreadyLoaded`, `ContainerLoad`, `Script`): a module
//!   container or one of its module types could not be loaded. The loader
//!   records these in its report and keeps going.
//! - **Configuration errors** (`DuplicateKey`, `DuplicateSettingKey`,
//!   `InvalidWireName`): a module declared something twice or declared a wire
//!   name the router cannot compile. The offending registration is refused.
//! - **Lookup errors** (`UnregisteredKey`, `UnknownSetting`, `UnknownModule`):
//!   a caller referred to something that was never declared.
//! - **Value errors** (`SettingTypeMismatch`, `InvalidSettingValue`).
//! - **Runtime errors** (`RuntimeRunning`, `Transport`, `Io`).
//!
//! Errors raised *inside* module hooks are not represented here: hooks return
//! `anyhow::Result`, and the runtime contains those failures per module.

use thiserror::Error;

/// Convenience alias for results using the host error type.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Modules are already loaded; unload them before loading again")]
    AlreadyLoaded,

    #[error("Parameter key `{0}` is already registered")]
    DuplicateKey(String),

    #[error("Setting key `{0}` is already registered")]
    DuplicateSettingKey(String),

    #[error("Parameter key `{0}` has not been registered")]
    UnregisteredKey(String),

    #[error("Setting `{0}` has not been created")]
    UnknownSetting(String),

    #[error("Setting `{key}` holds a {actual} value, not {expected}")]
    SettingTypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid value for setting `{key}`: {reason}")]
    InvalidSettingValue { key: String, reason: String },

    #[error("Invalid wire name `{name}`: {reason}")]
    InvalidWireName { name: String, reason: String },

    #[error("Unknown module `{0}`")]
    UnknownModule(String),

    #[error("Operation requires the runtime to be stopped")]
    RuntimeRunning,

    #[error("Failed to load module container {path}: {reason}")]
    ContainerLoad { path: String, reason: String },

    #[error("Script error in {script}: {message}")]
    Script { script: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "hot-reload")]
    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::DuplicateKey("Toggle".to_string());
        assert_eq!(err.to_string(), "Parameter key `Toggle` is already registered");
    }

    #[test]
    fn test_setting_type_mismatch_display() {
        let err = HostError::SettingTypeMismatch {
            key: "Speed".into(),
            expected: "bool",
            actual: "int",
        };
        assert_eq!(err.to_string(), "Setting `Speed` holds a int value, not bool");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HostError = io.into();
        assert!(matches!(err, HostError::Io(_)));
    }
}
