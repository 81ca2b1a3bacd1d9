// config.rs - Host configuration.
//
// `HostConfig::for_root()` lays everything out under a `.pt/` directory in
// the project root:
//
//   <root>/plugins/             plugin manifests (one directory per plugin)
//   <root>/.pt/sandboxes/       per-plugin workspaces
//   <root>/.pt/audit/           <plugin_id>.audit.jsonl
//   <root>/.pt/config.toml      optional overrides, read by `load()`
//
// Relative paths in config.toml are resolved against the project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pt_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

use crate::error::RouterError;

#[derive(Debug, Clone, Serialize)]
pub struct HostConfig {
    pub project_root: PathBuf,
    pub plugins_dir: PathBuf,
    pub sandboxes_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub loader: LoaderSettings,
    pub router: RouterSettings,
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Directory levels searched below the plugin root. 2 supports
    /// `plugins/<category>/<plugin>/`.
    #[serde(default = "default_discovery_depth")]
    pub discovery_depth: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            discovery_depth: default_discovery_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Plugin matches at or below this confidence fall back to core.
    #[serde(default = "default_min_dispatch_confidence")]
    pub min_dispatch_confidence: f64,

    /// Route cache entries kept for the life of the process.
    #[serde(default = "default_route_cache_capacity")]
    pub route_cache_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            min_dispatch_confidence: default_min_dispatch_confidence(),
            route_cache_capacity: default_route_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Wall-clock limit for plugins that do not declare `max_execution_secs`.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
        }
    }
}

fn default_discovery_depth() -> usize {
    1
}

fn default_min_dispatch_confidence() -> f64 {
    0.4
}

fn default_route_cache_capacity() -> usize {
    1024
}

fn default_execution_timeout_secs() -> u64 {
    30
}

/// On-disk shape of `.pt/config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    plugins_dir: Option<PathBuf>,
    sandboxes_dir: Option<PathBuf>,
    audit_dir: Option<PathBuf>,
    #[serde(default)]
    loader: LoaderSettings,
    #[serde(default)]
    router: RouterSettings,
    #[serde(default)]
    sandbox: SandboxSettings,
}

impl HostConfig {
    /// Standard layout for a project, with default tunables.
    pub fn for_root(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let pt_dir = root.join(".pt");
        Self {
            plugins_dir: root.join("plugins"),
            sandboxes_dir: pt_dir.join("sandboxes"),
            audit_dir: pt_dir.join("audit"),
            project_root: root,
            loader: LoaderSettings::default(),
            router: RouterSettings::default(),
            sandbox: SandboxSettings::default(),
        }
    }

    pub fn config_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(".pt").join("config.toml")
    }

    /// `for_root` overlaid with `.pt/config.toml` when it exists.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, RouterError> {
        let mut config = Self::for_root(&project_root);
        let path = Self::config_path(&project_root);
        if !path.is_file() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| RouterError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| RouterError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                config.project_root.join(p)
            }
        };
        let plugins_dir = file.plugins_dir.map(resolve);
        let sandboxes_dir = file.sandboxes_dir.map(resolve);
        let audit_dir = file.audit_dir.map(resolve);
        if let Some(dir) = plugins_dir {
            config.plugins_dir = dir;
        }
        if let Some(dir) = sandboxes_dir {
            config.sandboxes_dir = dir;
        }
        if let Some(dir) = audit_dir {
            config.audit_dir = dir;
        }
        config.loader = file.loader;
        config.router = file.router;
        config.sandbox = file.sandbox;

        config.check().map_err(|message| RouterError::Config {
            path: path.clone(),
            message,
        })?;
        tracing::debug!(path = %path.display(), "host configuration loaded");
        Ok(config)
    }

    pub fn with_plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = dir.into();
        self
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.execution_timeout_secs)
    }

    /// Sandbox settings derived from this configuration.
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::new(&self.sandboxes_dir)
            .with_audit_dir(&self.audit_dir)
            .with_timeout(self.execution_timeout())
    }

    fn check(&self) -> Result<(), String> {
        let floor = self.router.min_dispatch_confidence;
        if !(0.0..=1.0).contains(&floor) {
            return Err(format!(
                "router.min_dispatch_confidence must be within 0.0..=1.0, got {floor}"
            ));
        }
        if self.sandbox.execution_timeout_secs == 0 {
            return Err("sandbox.execution_timeout_secs must be at least 1".to_string());
        }
        if self.loader.discovery_depth == 0 {
            return Err("loader.discovery_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_lives_under_dot_pt() {
        let config = HostConfig::for_root("/work/project");
        assert_eq!(config.plugins_dir, PathBuf::from("/work/project/plugins"));
        assert_eq!(config.sandboxes_dir, PathBuf::from("/work/project/.pt/sandboxes"));
        assert_eq!(config.audit_dir, PathBuf::from("/work/project/.pt/audit"));
        assert_eq!(config.router.min_dispatch_confidence, 0.4);
        assert_eq!(config.router.route_cache_capacity, 1024);
        assert_eq!(config.sandbox.execution_timeout_secs, 30);
        assert_eq!(config.loader.discovery_depth, 1);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load(dir.path()).unwrap();
        assert_eq!(config.plugins_dir, dir.path().join("plugins"));
    }

    #[test]
    fn file_overrides_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".pt")).unwrap();
        std::fs::write(
            HostConfig::config_path(dir.path()),
            r#"
plugins_dir = "extensions"

[loader]
discovery_depth = 2

[router]
min_dispatch_confidence = 0.7

[sandbox]
execution_timeout_secs = 5
"#,
        )
        .unwrap();

        let config = HostConfig::load(dir.path()).unwrap();
        assert_eq!(config.plugins_dir, dir.path().join("extensions"));
        assert_eq!(config.loader.discovery_depth, 2);
        assert_eq!(config.router.min_dispatch_confidence, 0.7);
        assert_eq!(config.router.route_cache_capacity, 1024);
        assert_eq!(config.execution_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn out_of_range_floor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".pt")).unwrap();
        std::fs::write(
            HostConfig::config_path(dir.path()),
            "[router]\nmin_dispatch_confidence = 1.5\n",
        )
        .unwrap();

        let err = HostConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("min_dispatch_confidence"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".pt")).unwrap();
        std::fs::write(HostConfig::config_path(dir.path()), "plugin_dir = \"typo\"\n").unwrap();
        assert!(HostConfig::load(dir.path()).is_err());
    }
}
