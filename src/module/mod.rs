//! The module authoring surface.
//!
//! A module is a unit of user-facing functionality driven by the runtime:
//! it declares parameters, settings and update hooks while loading, then
//! reacts to lifecycle events and inbound parameters while started.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use modhost::module::{Module, ModuleContext, ModuleInfo, UpdateHook};
//! use modhost::parameter::{ParameterMode, ParameterType};
//!
//! #[derive(Default)]
//! struct Heartbeat {
//!     beats: u32,
//! }
//!
//! #[async_trait]
//! impl Module for Heartbeat {
//!     fn info(&self) -> ModuleInfo {
//!         ModuleInfo::new("Heartbeat", "Pulses a parameter")
//!     }
//!
//!     fn on_load(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
//!         ctx.register_parameter("Pulse", "avatar/parameters/Pulse", ParameterMode::Write, ParameterType::Bool)?;
//!         ctx.register_update(UpdateHook::every("beat", Duration::from_secs(1)));
//!         Ok(())
//!     }
//!
//!     fn on_update(&mut self, _hook: &str, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
//!         self.beats += 1;
//!         ctx.send_parameter("Pulse", self.beats % 2 == 0)?;
//!         Ok(())
//!     }
//! }
//! ```

mod context;
mod instance;
pub mod settings;
mod state;

pub use context::{ModuleContext, UpdateHook};
pub use instance::LoadedModule;
pub use settings::{SettingKind, SettingValue, SettingsRegistry};
pub use state::ModuleState;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::parameter::{ReceivedParameter, RegisteredParameter};

/// Tracing target shared by every module's log channel.
pub const MODULE_TARGET: &str = "modhost::module";

/// Broad grouping used by presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    /// Uncategorised
    #[default]
    Generic,
    /// Health and wellbeing
    Health,
    /// Bridges to other applications
    Integrations,
    /// Accessibility aids
    Accessibility,
}

impl ModuleCategory {
    /// Parse a category name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Some(ModuleCategory::Generic),
            "health" => Some(ModuleCategory::Health),
            "integrations" => Some(ModuleCategory::Integrations),
            "accessibility" => Some(ModuleCategory::Accessibility),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleCategory::Generic => "Generic",
            ModuleCategory::Health => "Health",
            ModuleCategory::Integrations => "Integrations",
            ModuleCategory::Accessibility => "Accessibility",
        };
        f.write_str(name)
    }
}

/// Descriptive metadata a module reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Display title
    pub title: String,
    /// One-line description
    pub description: String,
    /// Presentation category
    pub category: ModuleCategory,
}

impl ModuleInfo {
    /// Metadata in the `Generic` category.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: ModuleCategory::Generic,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: ModuleCategory) -> Self {
        self.category = category;
        self
    }
}

/// A hosted module.
///
/// Every hook except [`info`](Self::info) has a no-op default. An `Err` or
/// a panic from any hook puts the module into
/// [`ModuleState::Exception`]; the runtime then stops it without affecting
/// other modules.
///
/// `on_load` and `on_post_load` run once per load. The remaining hooks are
/// only called between a successful start and the following stop.
#[async_trait]
pub trait Module: Send {
    /// Title, description and category.
    fn info(&self) -> ModuleInfo;

    /// Declare parameters, settings and update hooks.
    fn on_load(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after stored configuration has been applied.
    fn on_post_load(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `false` to decline starting; the module is then stopped.
    async fn on_module_start(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Release whatever `on_module_start` acquired.
    async fn on_module_stop(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for the update hook named `hook` each time it is due.
    fn on_update(&mut self, _hook: &str, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// The avatar changed.
    fn on_avatar_change(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Periodic player-state notification.
    fn on_player_update(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Every inbound message, before any routing.
    fn on_any_parameter_received(
        &mut self,
        _ctx: &mut ModuleContext<'_>,
        _parameter: &ReceivedParameter,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Inbound messages that matched a readable definition with its declared
    /// type.
    fn on_registered_parameter_received(
        &mut self,
        _ctx: &mut ModuleContext<'_>,
        _parameter: &RegisteredParameter,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!(ModuleCategory::parse("health"), Some(ModuleCategory::Health));
        assert_eq!(
            ModuleCategory::parse("Integrations"),
            Some(ModuleCategory::Integrations)
        );
        assert_eq!(ModuleCategory::parse("misc"), None);
        assert_eq!(ModuleCategory::Accessibility.to_string(), "Accessibility");
    }

    #[test]
    fn test_info_builder() {
        let info = ModuleInfo::new("Title", "Desc").with_category(ModuleCategory::Health);
        assert_eq!(info.title, "Title");
        assert_eq!(info.category, ModuleCategory::Health);
    }
}
