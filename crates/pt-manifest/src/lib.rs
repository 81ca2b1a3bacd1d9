//! # pt-manifest
//!
//! The declarative trust contract every plugin ships.
//!
//! A manifest names the plugin, its governing policy, the intents it
//! handles, the [`Permission`]s it wants and the boundaries it promises to
//! stay inside. [`ManifestValidator`] turns raw manifest bytes into a
//! [`ValidationResult`]: schema errors with dotted paths, plus semantic
//! warnings that never invalidate the plugin.
//!
//! ```rust
//! use pt_manifest::{ManifestFormat, ManifestValidator};
//!
//! let result = ManifestValidator::new().validate(b"plugin: 3", ManifestFormat::Yaml);
//! assert!(!result.valid);
//! ```

pub mod error;
pub mod manifest;
pub mod permission;
pub mod policy;
pub mod schema;
pub mod validator;

pub use error::ManifestError;
pub use manifest::{
    AuthorInfo, Boundaries, Capabilities, DataPolicy, IntentDecl, Manifest, PermissionSet,
    PluginInfo, PolicySection, ResourceLimits,
};
pub use permission::{Permission, RiskLevel};
pub use policy::{DataSharing, GoverningPolicy};
pub use schema::ValidationIssue;
pub use validator::{ManifestFormat, ManifestValidator, ValidationResult};
