// loader.rs - Plugin discovery.
//
// Layout under the plugin root, with the default depth of 1:
//
//   <root>/<plugin-dir>/manifest.yaml   (or manifest.yml, manifest.json)
//
// With depth 2 the loader also looks one level further down, for the
// `<root>/<category>/<plugin-dir>/` layout. A directory that holds a
// manifest is a plugin and is not searched further. Directories are
// visited in sorted order, so the index and any duplicate-id resolution
// are reproducible.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use pt_manifest::{ManifestFormat, ManifestValidator, ValidationIssue, ValidationResult};

use crate::error::LoaderError;
use crate::index::{DiscoveredPlugin, PluginIndex};

/// Manifest file names, in lookup order.
pub const MANIFEST_FILE_NAMES: [&str; 3] = ["manifest.yaml", "manifest.yml", "manifest.json"];

/// Manifests larger than this are rejected without being parsed.
pub const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

pub struct PluginLoader {
    root: PathBuf,
    max_depth: usize,
    validator: ManifestValidator,
    index: RwLock<Arc<PluginIndex>>,
}

impl PluginLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: 1,
            validator: ManifestValidator::new(),
            index: RwLock::new(Arc::new(PluginIndex::default())),
        }
    }

    /// How many directory levels below the root to search (minimum 1).
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the plugin root and replace the published index.
    ///
    /// A missing root yields an empty index. Per-plugin problems are
    /// recorded in the index; only an unreadable directory is an error, and
    /// then the previous index stays published.
    pub fn discover(&self) -> Result<Arc<PluginIndex>, LoaderError> {
        let mut found = Vec::new();
        if self.root.is_dir() {
            self.scan(&self.root, 1, &mut found)?;
        } else {
            tracing::info!(root = %self.root.display(), "plugin root does not exist; no plugins discovered");
        }

        let mut plugins: Vec<DiscoveredPlugin> = Vec::with_capacity(found.len());
        // On an id collision a valid manifest beats an invalid one; between
        // two of the same standing the first directory in scan order wins.
        for plugin in found {
            let Some(slot) = plugins.iter_mut().find(|p| p.id == plugin.id) else {
                plugins.push(plugin);
                continue;
            };
            let (kept, ignored) = if plugin.is_valid() && !slot.is_valid() {
                let ignored = std::mem::replace(slot, plugin);
                (slot.dir.clone(), ignored.dir)
            } else {
                (slot.dir.clone(), plugin.dir)
            };
            tracing::warn!(
                plugin_id = %slot.id,
                kept = %kept.display(),
                ignored = %ignored.display(),
                "duplicate plugin id"
            );
        }

        let index = Arc::new(PluginIndex::from_plugins(plugins));
        tracing::info!(
            root = %self.root.display(),
            valid = index.valid_plugins().count(),
            invalid = index.invalid_plugins().count(),
            "plugin discovery complete"
        );

        *self.index.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&index);
        Ok(index)
    }

    /// The index published by the last successful `discover`.
    pub fn snapshot(&self) -> Arc<PluginIndex> {
        Arc::clone(&self.index.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get(&self, id: &str) -> Option<DiscoveredPlugin> {
        self.snapshot().get(id).cloned()
    }

    fn scan(&self, dir: &Path, depth: usize, found: &mut Vec<DiscoveredPlugin>) -> Result<(), LoaderError> {
        let entries = fs::read_dir(dir).map_err(|source| LoaderError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LoaderError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if path.is_dir() && !hidden {
                subdirs.push(path);
            }
        }
        subdirs.sort();

        for subdir in subdirs {
            match find_manifest(&subdir) {
                Some(manifest_path) => found.push(self.load(&subdir, manifest_path)),
                None if depth < self.max_depth => self.scan(&subdir, depth + 1, found)?,
                None => {}
            }
        }
        Ok(())
    }

    fn load(&self, dir: &Path, manifest_path: PathBuf) -> DiscoveredPlugin {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (mut validation, bytes) = match read_bounded(&manifest_path) {
            Ok(bytes) => {
                let format = ManifestFormat::from_path(&manifest_path).unwrap_or(ManifestFormat::Yaml);
                (self.validator.validate(&bytes, format), Some(bytes))
            }
            Err(message) => (rejected(message), None),
        };

        let manifest = validation.manifest.take().map(Arc::new);
        let id = match &manifest {
            Some(m) => m.id().to_string(),
            None => bytes
                .as_deref()
                .and_then(|b| salvage_id(b, &manifest_path))
                .unwrap_or(dir_name),
        };

        if manifest.is_some() {
            tracing::debug!(plugin_id = %id, warnings = validation.warnings.len(), "plugin manifest accepted");
        } else {
            tracing::warn!(
                plugin_id = %id,
                manifest = %manifest_path.display(),
                errors = validation.errors.len(),
                first_error = %validation.errors.first().map(ToString::to_string).unwrap_or_default(),
                "plugin manifest rejected"
            );
        }

        DiscoveredPlugin {
            id,
            dir: dir.to_path_buf(),
            manifest_path,
            validation,
            manifest,
        }
    }
}

fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn read_bounded(path: &Path) -> Result<Vec<u8>, String> {
    let len = fs::metadata(path)
        .map_err(|e| format!("cannot read manifest: {e}"))?
        .len();
    if len > MAX_MANIFEST_BYTES {
        return Err(format!(
            "manifest is {len} bytes; the limit is {MAX_MANIFEST_BYTES}"
        ));
    }
    fs::read(path).map_err(|e| format!("cannot read manifest: {e}"))
}

fn rejected(message: String) -> ValidationResult {
    ValidationResult {
        valid: false,
        errors: vec![ValidationIssue::new("$", message)],
        warnings: Vec::new(),
        manifest: None,
    }
}

/// Best-effort `plugin.id` from a manifest that failed validation.
fn salvage_id(bytes: &[u8], path: &Path) -> Option<String> {
    let document: serde_json::Value = match ManifestFormat::from_path(path)? {
        ManifestFormat::Yaml => serde_yaml::from_slice(bytes).ok()?,
        ManifestFormat::Json => serde_json::from_slice(bytes).ok()?,
    };
    document
        .get("plugin")?
        .get("id")?
        .as_str()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
