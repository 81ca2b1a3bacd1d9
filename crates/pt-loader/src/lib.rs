//! # pt-loader
//!
//! Finds plugin manifests on disk, validates each one and publishes the
//! result as an immutable [`PluginIndex`].
//!
//! Discovery never runs plugin code. Rejected manifests stay in the index
//! (with `valid = false` and their validation errors) so operators can see
//! why a plugin was turned away. Every `discover` call builds a fresh index
//! and swaps it in whole; readers holding an older snapshot keep a
//! consistent view.

pub mod error;
pub mod index;
pub mod loader;

pub use error::LoaderError;
pub use index::{DiscoveredPlugin, PluginIndex};
pub use loader::{PluginLoader, MANIFEST_FILE_NAMES, MAX_MANIFEST_BYTES};
