//! Typed module parameters and the wire-name router.
//!
//! A module declares each parameter it cares about under a stable logical
//! [`ParameterKey`]. The user may rename the parameter's wire name at any
//! time; the module keeps using the key. The [`ParameterRegistry`] translates
//! in both directions:
//!
//! ```text
//! inbound:  (address, value) ──► WirePattern match ──► type check ──► RegisteredParameter
//! outbound: (key, value)     ──► configured wire name ──► ParameterSink
//! ```
//!
//! Wire names are `/`-delimited templates that may contain a single `*`
//! wildcard segment; see [`WirePattern`].

mod pattern;
mod registry;

pub use pattern::WirePattern;
pub use registry::{ParameterDefinition, ParameterRegistry, RouteOutcome};

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// =============================================================================
// Keys
// =============================================================================

/// Stable identifier a module uses for one of its parameters.
///
/// Keys can be declared as constants:
///
/// ```rust
/// use modhost::parameter::ParameterKey;
///
/// const TOGGLE: ParameterKey = ParameterKey::from_static("Toggle");
/// assert_eq!(TOGGLE.as_str(), "Toggle");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterKey(Cow<'static, str>);

impl ParameterKey {
    /// Key backed by a static string, usable in `const` items.
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ParameterKey {
    fn from(key: &'static str) -> Self {
        Self::from_static(key)
    }
}

impl From<String> for ParameterKey {
    fn from(key: String) -> Self {
        Self(Cow::Owned(key))
    }
}

// =============================================================================
// Direction and type
// =============================================================================

/// Which way a parameter flows relative to the external protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    /// The module only receives this parameter.
    Read,
    /// The module only sends this parameter.
    Write,
    /// Both directions.
    ReadWrite,
}

impl ParameterMode {
    /// Whether inbound values for this parameter reach the module.
    pub fn can_read(self) -> bool {
        matches!(self, ParameterMode::Read | ParameterMode::ReadWrite)
    }

    /// Whether the module is expected to send this parameter.
    pub fn can_write(self) -> bool {
        matches!(self, ParameterMode::Write | ParameterMode::ReadWrite)
    }

    /// Parse the lower-case names used by scripts and configuration
    /// (`read`, `write`, `read_write`/`readwrite`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Some(ParameterMode::Read),
            "write" => Some(ParameterMode::Write),
            "read_write" | "readwrite" => Some(ParameterMode::ReadWrite),
            _ => None,
        }
    }
}

/// The closed set of value types a parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Boolean
    Bool,
    /// 32-bit signed integer
    Int,
    /// 32-bit float
    Float,
    /// UTF-8 string
    String,
}

impl ParameterType {
    /// Human-readable type name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ParameterType::Bool => "bool",
            ParameterType::Int => "int",
            ParameterType::Float => "float",
            ParameterType::String => "string",
        }
    }

    /// Parse the names produced by [`name`](Self::name).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Some(ParameterType::Bool),
            "int" => Some(ParameterType::Int),
            "float" => Some(ParameterType::Float),
            "string" => Some(ParameterType::String),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Values
// =============================================================================

/// A value as carried by the external protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    Int(i32),
    /// 32-bit float
    Float(f32),
    /// UTF-8 string
    String(String),
}

impl ParameterValue {
    /// The runtime type of this value.
    pub fn value_type(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Int(_) => ParameterType::Int,
            ParameterValue::Float(_) => ParameterType::Float,
            ParameterValue::String(_) => ParameterType::String,
        }
    }

    /// Whether this value is of type `expected`.
    pub fn is_type(&self, expected: ParameterType) -> bool {
        self.value_type() == expected
    }

    /// The boolean payload, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer payload, if this is an int.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, if this is a float.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{v}"),
            ParameterValue::Int(v) => write!(f, "{v}"),
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::String(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

// =============================================================================
// Events
// =============================================================================

/// An `(address, value)` pair as exchanged with the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// `/`-delimited wire address, without a leading `/`.
    pub address: String,
    /// The carried value.
    pub value: ParameterValue,
}

impl WireMessage {
    /// Convenience constructor.
    pub fn new(address: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        Self {
            address: address.into(),
            value: value.into(),
        }
    }
}

/// A message arriving from the transport.
pub type InboundMessage = WireMessage;

/// Delivered to `on_any_parameter_received` for every inbound message.
pub type ReceivedParameter = WireMessage;

/// Delivered to `on_registered_parameter_received` when an inbound message
/// matched one of the module's readable definitions with the declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredParameter {
    /// The logical key of the matched definition.
    pub key: ParameterKey,
    /// The raw value, already checked against the declared type.
    pub value: ParameterValue,
    /// The address the message arrived on.
    pub address: String,
}

impl RegisteredParameter {
    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Integer payload.
    pub fn as_int(&self) -> Option<i32> {
        self.value.as_int()
    }

    /// Float payload.
    pub fn as_float(&self) -> Option<f32> {
        self.value.as_float()
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}
