//! # pt-sandbox
//!
//! Runs plugin handlers inside a bounded, audited context.
//!
//! A [`PluginSandbox`] pairs one [`Plugin`] implementation with its own
//! permission manager, workspace and resource limits, and exposes a single
//! entry point, [`PluginSandbox::execute`]. Handlers never get ambient
//! access to the host: everything they touch goes through the
//! [`PluginContext`] they are handed, and every flagged action on it is
//! checked against the plugin's manifest first.
//!
//! Each handler runs on its own thread with its heap metered by
//! [`MeteredAllocator`], which this crate installs as the global allocator.
//! A binary that links pt-sandbox must not declare another one.
//!
//! Plugins are registered explicitly with a [`SandboxRegistry`], which
//! creates sandboxes lazily the first time a plugin is used.

pub mod context;
pub mod error;
pub mod limits;
pub mod meter;
pub mod plugin;
pub mod registry;
pub mod sandbox;

pub use context::{AccessError, PluginContext, ProcessOutput};
pub use error::{RuntimeFailure, SandboxError};
pub use limits::ExecutionLimits;
pub use meter::{MemoryMeter, MeteredAllocator};
pub use plugin::{Plugin, PluginFactory};
pub use registry::SandboxRegistry;
pub use sandbox::{
    ExecutionOutcome, ExecutionResult, PluginSandbox, SandboxConfig, SandboxStats,
};
