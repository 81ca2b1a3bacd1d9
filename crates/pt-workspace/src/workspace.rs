// workspace.rs - Isolated per-plugin directory.
//
// Layout under the sandbox root:
//
//   <sandbox_root>/<plugin_id>/
//     data/       plugin data, including data/settings.json
//     cache/      disposable cache
//     logs/       plugin.log, one JSON object per line
//
// Paths are classified lexically (`.` and `..` folded) and, for paths that
// already exist, through `canonicalize` so a symlink cannot smuggle a path
// out of the workspace.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use crate::error::WorkspaceError;

const SUBDIRS: [&str; 3] = ["data", "cache", "logs"];
const LOG_FILE: &str = "logs/plugin.log";
const SETTINGS_FILE: &str = "data/settings.json";

/// Where a path lands relative to the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathScope {
    /// Inside the workspace: no permission needed.
    Inside(PathBuf),
    /// Outside the workspace: gated like any other flagged action.
    Outside(PathBuf),
}

/// One plugin's confined directory.
#[derive(Debug, Clone)]
pub struct PluginWorkspace {
    plugin_id: String,
    root: PathBuf,
    quota_bytes: u64,
}

impl PluginWorkspace {
    /// Create (or reopen) the workspace for `plugin_id` under `sandbox_root`.
    pub fn create(
        plugin_id: impl Into<String>,
        sandbox_root: impl AsRef<Path>,
        quota_bytes: u64,
    ) -> Result<Self, WorkspaceError> {
        let plugin_id = plugin_id.into();
        let root = sandbox_root.as_ref().join(&plugin_id);
        for sub in SUBDIRS {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|source| WorkspaceError::IoError {
                path: dir.clone(),
                source,
            })?;
        }
        let root = fs::canonicalize(&root).map_err(|source| WorkspaceError::IoError {
            path: root.clone(),
            source,
        })?;
        tracing::debug!(plugin_id = %plugin_id, root = %root.display(), "workspace ready");

        Ok(Self {
            plugin_id,
            root,
            quota_bytes,
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Classify a path. Relative paths are taken relative to the workspace root.
    pub fn classify(&self, path: impl AsRef<Path>) -> PathScope {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = resolve(&joined);
        if resolved.starts_with(&self.root) {
            PathScope::Inside(resolved)
        } else {
            PathScope::Outside(resolved)
        }
    }

    /// Read a file inside the workspace.
    pub fn read(&self, relative_path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let full_path = self.inside(relative_path)?;
        if !full_path.is_file() {
            return Err(WorkspaceError::FileNotFound {
                path: relative_path.to_string(),
            });
        }
        fs::read(&full_path).map_err(|source| WorkspaceError::IoError {
            path: full_path,
            source,
        })
    }

    pub fn read_to_string(&self, relative_path: &str) -> Result<String, WorkspaceError> {
        let bytes = self.read(relative_path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file inside the workspace, creating parent directories.
    ///
    /// Fails with `StorageQuotaExceeded` before touching the disk if the
    /// write would take the workspace over its quota.
    pub fn write(&self, relative_path: &str, content: &[u8]) -> Result<(), WorkspaceError> {
        let full_path = self.inside(relative_path)?;
        let existing = file_len(&full_path);
        self.ensure_room(existing, content.len() as u64)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkspaceError::IoError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&full_path, content).map_err(|source| WorkspaceError::IoError {
            path: full_path,
            source,
        })
    }

    /// Append a timestamped line to `logs/plugin.log`.
    pub fn log(&self, message: &str) -> Result<(), WorkspaceError> {
        let line = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "message": message,
        })
        .to_string();
        self.ensure_room(0, line.len() as u64 + 1)?;

        let path = self.root.join(LOG_FILE);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WorkspaceError::IoError {
                path: path.clone(),
                source,
            })?;
        writeln!(file, "{}", line).map_err(|source| WorkspaceError::IoError { path, source })
    }

    /// Look up a key in `data/settings.json`. Missing file or key is `None`.
    pub fn setting(&self, key: &str) -> Result<Option<serde_json::Value>, WorkspaceError> {
        let path = self.root.join(SETTINGS_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|source| WorkspaceError::IoError {
            path: path.clone(),
            source,
        })?;
        let settings: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|source| WorkspaceError::Settings { path, source })?;
        Ok(settings.get(key).cloned())
    }

    /// Total bytes stored in the workspace.
    pub fn usage_bytes(&self) -> Result<u64, WorkspaceError> {
        let mut total = 0;
        for file in self.walk()? {
            total += file_len(&file);
        }
        Ok(total)
    }

    /// All files in the workspace, as sorted root-relative paths.
    pub fn list_files(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut files: Vec<String> = self
            .walk()?
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&self.root)
                    .ok()
                    .map(|r| r.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Remove the workspace directory and everything in it.
    pub fn cleanup(self) -> Result<(), WorkspaceError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|source| WorkspaceError::IoError {
                path: self.root,
                source,
            })?;
        }
        Ok(())
    }

    fn inside(&self, relative_path: &str) -> Result<PathBuf, WorkspaceError> {
        match self.classify(relative_path) {
            PathScope::Inside(path) if Path::new(relative_path).is_relative() => Ok(path),
            _ => Err(WorkspaceError::OutsideWorkspace {
                plugin_id: self.plugin_id.clone(),
                path: relative_path.to_string(),
            }),
        }
    }

    fn ensure_room(&self, replaced: u64, added: u64) -> Result<(), WorkspaceError> {
        let attempted = self.usage_bytes()?.saturating_sub(replaced) + added;
        if attempted > self.quota_bytes {
            tracing::warn!(
                plugin_id = %self.plugin_id,
                limit = self.quota_bytes,
                attempted,
                "workspace storage quota exceeded"
            );
            return Err(WorkspaceError::StorageQuotaExceeded {
                plugin_id: self.plugin_id.clone(),
                limit_bytes: self.quota_bytes,
                attempted_bytes: attempted,
            });
        }
        Ok(())
    }

    fn walk(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|source| WorkspaceError::IoError {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| WorkspaceError::IoError {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                // Symlinks are not followed: they can point anywhere.
                let file_type = entry.file_type().map_err(|source| WorkspaceError::IoError {
                    path: path.clone(),
                    source,
                })?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Resolve a path as far as the filesystem allows: canonicalize the longest
/// existing prefix, then fold the remaining components lexically.
fn resolve(path: &Path) -> PathBuf {
    let normalized = normalize(path);
    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace(quota: u64) -> (tempfile::TempDir, PluginWorkspace) {
        let dir = tempdir().unwrap();
        let ws = PluginWorkspace::create("focus-keeper", dir.path(), quota).unwrap();
        (dir, ws)
    }

    #[test]
    fn creates_standard_layout() {
        let (_dir, ws) = workspace(1024);
        assert!(ws.data_dir().is_dir());
        assert!(ws.cache_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert!(ws.root().ends_with("focus-keeper"));
    }

    #[test]
    fn write_then_read() {
        let (_dir, ws) = workspace(1024);
        ws.write("data/notes/today.txt", b"deep work").unwrap();
        assert_eq!(ws.read_to_string("data/notes/today.txt").unwrap(), "deep work");
        assert_eq!(ws.list_files().unwrap(), vec!["data/notes/today.txt"]);
    }

    #[test]
    fn traversal_is_outside() {
        let (dir, ws) = workspace(1024);
        match ws.classify("data/../../elsewhere.txt") {
            PathScope::Outside(path) => {
                assert!(path.ends_with("elsewhere.txt"));
                assert!(path.starts_with(fs::canonicalize(dir.path()).unwrap()));
            }
            other => panic!("expected outside, got {:?}", other),
        }
        assert!(matches!(
            ws.write("../escape.txt", b"x"),
            Err(WorkspaceError::OutsideWorkspace { .. })
        ));
    }

    #[test]
    fn absolute_paths_are_classified() {
        let (_dir, ws) = workspace(1024);
        let inside = ws.data_dir().join("a.txt");
        assert!(matches!(ws.classify(&inside), PathScope::Inside(_)));
        assert!(matches!(ws.classify("/etc/hosts"), PathScope::Outside(_)));
        // Workspace accessors only take relative paths, even ones that land inside.
        assert!(ws.read(inside.to_str().unwrap()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_outside() {
        let (dir, ws) = workspace(1024);
        let outside = dir.path().join("secret");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.data_dir().join("link")).unwrap();
        assert!(matches!(
            ws.classify("data/link/file.txt"),
            PathScope::Outside(_)
        ));
    }

    #[test]
    fn quota_is_enforced_before_writing() {
        let (_dir, ws) = workspace(10);
        ws.write("data/a.bin", &[0u8; 8]).unwrap();
        match ws.write("data/b.bin", &[0u8; 4]) {
            Err(WorkspaceError::StorageQuotaExceeded {
                limit_bytes,
                attempted_bytes,
                ..
            }) => {
                assert_eq!(limit_bytes, 10);
                assert_eq!(attempted_bytes, 12);
            }
            other => panic!("expected quota error, got {:?}", other),
        }
        assert!(!ws.data_dir().join("b.bin").exists());
        // Overwriting replaces the old size rather than adding to it.
        ws.write("data/a.bin", &[1u8; 10]).unwrap();
        assert_eq!(ws.usage_bytes().unwrap(), 10);
    }

    #[test]
    fn log_lines_are_json() {
        let (_dir, ws) = workspace(4096);
        ws.log("session started").unwrap();
        ws.log("session ended").unwrap();
        let content = ws.read_to_string("logs/plugin.log").unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["message"], "session ended");
    }

    #[test]
    fn settings_lookup() {
        let (_dir, ws) = workspace(4096);
        assert_eq!(ws.setting("session_minutes").unwrap(), None);
        ws.write("data/settings.json", br#"{"session_minutes": 25}"#)
            .unwrap();
        assert_eq!(
            ws.setting("session_minutes").unwrap(),
            Some(serde_json::json!(25))
        );
        assert_eq!(ws.setting("missing").unwrap(), None);
    }

    #[test]
    fn cleanup_removes_everything() {
        let (_dir, ws) = workspace(1024);
        let root = ws.root().to_path_buf();
        ws.write("cache/x", b"1").unwrap();
        ws.cleanup().unwrap();
        assert!(!root.exists());
    }
}
