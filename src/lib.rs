//! Core library for the modhost module host.
//!
//! modhost loads user-authored automation modules from a modules directory,
//! drives their lifecycle and routes OSC parameters between them and a
//! remote application. It is used by the `modhost` binary and can be
//! embedded by hosts that register native modules.
//!
//! - [`loader`] discovers module containers and instantiates modules.
//! - [`module`] is the authoring surface: the [`module::Module`] trait,
//!   its context, settings and lifecycle states.
//! - [`runtime`] owns the loaded modules and fans host events out to them.
//! - [`parameter`] declares parameters and routes wire messages.
//! - [`script`] provides Rhai-scripted modules.
//! - [`transport`] carries parameters to and from the wire.

pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod module;
pub mod parameter;
pub mod runtime;
pub mod scheduler;
pub mod script;
pub mod store;
pub mod transport;
#[cfg(feature = "hot-reload")]
pub mod watcher;

pub use error::{HostError, HostResult};
pub use module::{Module, ModuleContext, ModuleInfo, ModuleState};
pub use runtime::{HostServices, ModuleRuntime, RuntimeConfig};
