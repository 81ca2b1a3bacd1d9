// context.rs - Capability objects handed to plugin handlers.
//
// A handler never touches the host directly. It gets a `PluginContext`
// whose methods are the only doors out of the sandbox:
//
//   files            workspace-relative I/O; paths outside the workspace
//                    are gated as filesystem.read / filesystem.write
//   spawn            child process, gated as process.spawn, run with rlimits
//   connect          TCP connection, gated as network.local or
//                    network.internet depending on the resolved address
//   notify           user notification, gated as system.notifications
//   system_info      gated as system.info
//   configuration    system configuration files, gated as
//                    configuration.read / configuration.write
//   reserve_memory   explicit accounting against max_memory_mb, on top of
//                    the heap metering the sandbox does itself
//
// When a gate says no (denied, consent needed, limit hit) the context
// records an interrupt before returning the error. From then on every door
// refuses without consulting the gate or touching the host, and the sandbox
// reports the interrupt whatever the handler returns.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use pt_manifest::Permission;
use pt_policy::{ConsentRequest, Gate, PermissionManager};
use pt_workspace::{PathScope, PluginWorkspace, WorkspaceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RuntimeFailure;
use crate::limits::ExecutionLimits;

/// Error returned to the handler by a capability object.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access denied: {reason}")]
    Denied { reason: String },

    #[error("consent required for '{permission}' to {action}")]
    ConsentRequired {
        permission: Permission,
        action: String,
    },

    #[error("resource limit reached: {0}")]
    Limit(RuntimeFailure),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("I/O error for {target}: {source}")]
    Io {
        target: String,
        source: std::io::Error,
    },
}

/// Output of a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code; None when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Why the sandbox must stop the current execution.
#[derive(Debug, Clone)]
pub(crate) enum Interrupt {
    Violation { action: String, reason: String },
    Consent { request: ConsentRequest, prompt: String },
    Limit(RuntimeFailure),
}

struct Shared {
    plugin_id: String,
    intent: String,
    request_context: BTreeMap<String, serde_json::Value>,
    workspace: PluginWorkspace,
    permissions: Arc<Mutex<PermissionManager>>,
    limits: ExecutionLimits,
    reserved: AtomicU64,
    interrupt: Mutex<Option<Interrupt>>,
    halted: AtomicBool,
}

/// The only handle a plugin handler has on the outside world.
#[derive(Clone)]
pub struct PluginContext {
    shared: Arc<Shared>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_id: &str,
        intent: &str,
        request_context: BTreeMap<String, serde_json::Value>,
        workspace: PluginWorkspace,
        permissions: Arc<Mutex<PermissionManager>>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                plugin_id: plugin_id.to_string(),
                intent: intent.to_string(),
                request_context,
                workspace,
                permissions,
                limits,
                reserved: AtomicU64::new(0),
                interrupt: Mutex::new(None),
                halted: AtomicBool::new(false),
            }),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.shared.plugin_id
    }

    /// The declared intent pattern being executed.
    pub fn intent(&self) -> &str {
        &self.shared.intent
    }

    /// Key-value context supplied by the caller with the request.
    pub fn request_context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.shared.request_context
    }

    pub fn workspace_root(&self) -> &Path {
        self.shared.workspace.root()
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.shared.limits
    }

    pub fn files(&self) -> FileAccess<'_> {
        FileAccess { ctx: self }
    }

    /// Append a line to the plugin's own log. Never gated.
    pub fn log(&self, message: &str) -> Result<(), AccessError> {
        self.ensure_running()?;
        let result = self.shared.workspace.log(message);
        self.workspace_result(result)
    }

    /// Read a key from the plugin's `data/settings.json`.
    pub fn setting(&self, key: &str) -> Result<Option<serde_json::Value>, AccessError> {
        self.ensure_running()?;
        Ok(self.shared.workspace.setting(key)?)
    }

    /// Account for `bytes` of working memory. Fails once the total
    /// reserved in this execution passes `max_memory_mb`.
    pub fn reserve_memory(&self, bytes: u64) -> Result<(), AccessError> {
        self.ensure_running()?;
        let total = self.shared.reserved.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if total > self.shared.limits.memory_bytes {
            self.shared.reserved.fetch_sub(bytes, Ordering::SeqCst);
            let failure = RuntimeFailure::MemoryLimit {
                limit_mb: self.shared.limits.memory_mb(),
                requested_bytes: total,
            };
            self.interrupt(Interrupt::Limit(failure.clone()));
            return Err(AccessError::Limit(failure));
        }
        Ok(())
    }

    pub fn release_memory(&self, bytes: u64) {
        let _ = self
            .shared
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn reserved_memory(&self) -> u64 {
        self.shared.reserved.load(Ordering::SeqCst)
    }

    /// Show the user a notification.
    pub fn notify(&self, message: &str) -> Result<(), AccessError> {
        self.check(&format!("notify: {message}"), Permission::SystemNotifications)?;
        tracing::info!(plugin_id = %self.shared.plugin_id, text = message, "plugin notification");
        self.log(&format!("notification: {message}"))
    }

    /// Basic facts about the host.
    pub fn system_info(&self) -> Result<serde_json::Value, AccessError> {
        self.check("read system information", Permission::SystemInfo)?;
        Ok(serde_json::json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
        }))
    }

    /// Read a system configuration file.
    pub fn read_configuration(&self, path: impl AsRef<Path>) -> Result<String, AccessError> {
        let path = path.as_ref();
        self.check(
            &format!("read configuration {}", path.display()),
            Permission::ConfigurationRead,
        )?;
        std::fs::read_to_string(path).map_err(|source| AccessError::Io {
            target: path.display().to_string(),
            source,
        })
    }

    /// Replace a system configuration file.
    pub fn write_configuration(
        &self,
        path: impl AsRef<Path>,
        content: &str,
    ) -> Result<(), AccessError> {
        let path = path.as_ref();
        self.check(
            &format!("write configuration {}", path.display()),
            Permission::ConfigurationWrite,
        )?;
        std::fs::write(path, content).map_err(|source| AccessError::Io {
            target: path.display().to_string(),
            source,
        })
    }

    /// Run a program to completion inside the plugin's workspace, under the
    /// execution's rlimits. Killed if the execution is cancelled or times out.
    pub async fn spawn(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, AccessError> {
        let action = if args.is_empty() {
            format!("spawn {program}")
        } else {
            format!("spawn {program} {}", args.join(" "))
        };
        self.check(&action, Permission::ProcessSpawn)?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(self.shared.workspace.root())
            .kill_on_drop(true);
        self.shared.limits.apply_to(&mut command);

        let output = command.output().await.map_err(|source| AccessError::Io {
            target: program.to_string(),
            source,
        })?;
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Open a TCP connection. Loopback and private addresses need
    /// network.local, everything else network.internet.
    pub async fn connect(&self, host: &str, port: u16) -> Result<tokio::net::TcpStream, AccessError> {
        self.ensure_running()?;
        let target = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target.as_str())
            .await
            .map_err(|source| AccessError::Io {
                target: target.clone(),
                source,
            })?
            .collect();

        let permission = if !addrs.is_empty() && addrs.iter().all(|a| is_local(a.ip())) {
            Permission::NetworkLocal
        } else {
            Permission::NetworkInternet
        };
        self.check(&format!("connect {target}"), permission)?;

        tokio::net::TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|source| AccessError::Io { target, source })
    }

    /// Gate an action the handler is about to perform.
    pub fn check(&self, action: &str, permission: Permission) -> Result<(), AccessError> {
        self.ensure_running()?;
        let gate = {
            let mut pm = self.permissions();
            pm.gate(action, permission)
        };
        match gate {
            Ok(Gate::Allow) => Ok(()),
            Ok(Gate::Deny { reason }) => {
                self.interrupt(Interrupt::Violation {
                    action: action.to_string(),
                    reason: reason.clone(),
                });
                Err(AccessError::Denied { reason })
            }
            Ok(Gate::NeedsConsent { .. }) => {
                let consent = {
                    let mut pm = self.permissions();
                    pm.request_permission(action, permission, self.shared.request_context.clone())
                        .map(|request| {
                            let prompt = pm.generate_consent_prompt(&request);
                            (request, prompt)
                        })
                };
                match consent {
                    Ok((request, prompt)) => {
                        self.interrupt(Interrupt::Consent { request, prompt });
                        Err(AccessError::ConsentRequired {
                            permission,
                            action: action.to_string(),
                        })
                    }
                    Err(e) => self.audit_failure(action, e),
                }
            }
            Err(e) => self.audit_failure(action, e),
        }
    }

    pub(crate) fn take_interrupt(&self) -> Option<Interrupt> {
        self.shared
            .interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// True once the execution has been stopped.
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    /// Stop the execution without recording why: timeouts and caller
    /// cancellation, where the sandbox reports the cause itself.
    pub(crate) fn halt(&self) {
        self.shared.halted.store(true, Ordering::SeqCst);
    }

    /// First interrupt wins; later ones are side effects of the first.
    fn interrupt(&self, interrupt: Interrupt) {
        self.halt();
        let mut slot = self
            .shared
            .interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(interrupt);
        }
    }

    fn ensure_running(&self) -> Result<(), AccessError> {
        if self.is_halted() {
            return Err(AccessError::Denied {
                reason: format!(
                    "execution of '{}' was already stopped; no further actions are allowed",
                    self.shared.intent
                ),
            });
        }
        Ok(())
    }

    // An action whose audit entry cannot be written does not happen.
    fn audit_failure(&self, action: &str, error: pt_policy::PolicyError) -> Result<(), AccessError> {
        let reason = error.to_string();
        self.interrupt(Interrupt::Violation {
            action: action.to_string(),
            reason: reason.clone(),
        });
        Err(AccessError::Denied { reason })
    }

    fn permissions(&self) -> MutexGuard<'_, PermissionManager> {
        self.shared
            .permissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn workspace_result<T>(&self, result: Result<T, WorkspaceError>) -> Result<T, AccessError> {
        match result {
            Err(WorkspaceError::StorageQuotaExceeded {
                attempted_bytes, ..
            }) => {
                let failure = RuntimeFailure::StorageLimit {
                    limit_mb: self.shared.limits.storage_mb(),
                    attempted_bytes,
                };
                self.interrupt(Interrupt::Limit(failure.clone()));
                Err(AccessError::Limit(failure))
            }
            other => Ok(other?),
        }
    }
}

/// File access scoped to the plugin workspace.
pub struct FileAccess<'a> {
    ctx: &'a PluginContext,
}

impl FileAccess<'_> {
    /// Read a file. Relative paths are workspace-relative; anything that
    /// resolves outside the workspace needs filesystem.read.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, AccessError> {
        self.ctx.ensure_running()?;
        match self.ctx.shared.workspace.classify(path.as_ref()) {
            PathScope::Inside(full) => Ok(self.ctx.shared.workspace.read(&self.relative(&full))?),
            PathScope::Outside(full) => {
                self.ctx.check(
                    &format!("read file {}", full.display()),
                    Permission::FilesystemRead,
                )?;
                std::fs::read(&full).map_err(|source| AccessError::Io {
                    target: full.display().to_string(),
                    source,
                })
            }
        }
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String, AccessError> {
        let bytes = self.read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file. Inside the workspace the storage quota applies;
    /// outside it needs filesystem.write.
    pub fn write(&self, path: impl AsRef<Path>, content: &[u8]) -> Result<(), AccessError> {
        self.ctx.ensure_running()?;
        match self.ctx.shared.workspace.classify(path.as_ref()) {
            PathScope::Inside(full) => {
                let result = self.ctx.shared.workspace.write(&self.relative(&full), content);
                self.ctx.workspace_result(result)
            }
            PathScope::Outside(full) => {
                self.ctx.check(
                    &format!("write file {}", full.display()),
                    Permission::FilesystemWrite,
                )?;
                std::fs::write(&full, content).map_err(|source| AccessError::Io {
                    target: full.display().to_string(),
                    source,
                })
            }
        }
    }

    /// Files currently in the workspace (root-relative).
    pub fn list(&self) -> Result<Vec<String>, AccessError> {
        self.ctx.ensure_running()?;
        Ok(self.ctx.shared.workspace.list_files()?)
    }

    fn relative(&self, full: &Path) -> String {
        full.strip_prefix(self.ctx.shared.workspace.root())
            .map(PathBuf::from)
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addresses() {
        assert!(is_local("127.0.0.1".parse().unwrap()));
        assert!(is_local("192.168.1.20".parse().unwrap()));
        assert!(is_local("::1".parse().unwrap()));
        assert!(is_local("fd00::1".parse().unwrap()));
        assert!(!is_local("93.184.216.34".parse().unwrap()));
        assert!(!is_local("2606:4700::1111".parse().unwrap()));
    }
}
