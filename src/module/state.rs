//! Module lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a loaded module.
///
/// ```text
/// Stopped ──► Starting ──► Started ──► Stopping ──► Stopped
///                │            │
///                └────────────┴──► Exception ──► Stopping ──► Stopped
/// ```
///
/// Transitions are driven only by the runtime and the module wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModuleState {
    /// Initial state, and the resting state between runs.
    #[default]
    Stopped,
    /// Start hook in progress.
    Starting,
    /// Running: receives ticks and parameters.
    Started,
    /// Stop hook in progress.
    Stopping,
    /// A hook failed; a stop is pending.
    Exception,
}

impl ModuleState {
    /// Whether the module should receive ticks and messages.
    pub fn is_running(self) -> bool {
        self == ModuleState::Started
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Stopped => "Stopped",
            ModuleState::Starting => "Starting",
            ModuleState::Started => "Started",
            ModuleState::Stopping => "Stopping",
            ModuleState::Exception => "Exception",
        };
        f.write_str(name)
    }
}
