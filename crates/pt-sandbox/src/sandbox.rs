// sandbox.rs - One plugin's bounded execution environment.
//
// `execute(intent, payload)` runs in this order:
//
// 1. Resolve the intent against the manifest. Undeclared → Violation,
//    and no plugin code runs.
// 2. Gate every permission the intent declares up front. Deny →
//    Violation; consent needed with nothing cached → ConsentRequired.
//    Still no plugin code has run.
// 3. Run the handler on a dedicated OS thread with its own current-thread
//    runtime and its heap metered. The caller's task only waits, so the
//    wall-clock timeout and the memory ceiling hold even against a handler
//    that blocks or spins.
// 4. If the handler hit a gate or a limit through its context, that
//    interrupt decides the outcome, whatever the handler returned.
//
// A handler thread that outlives its execution (timeout, memory, caller
// gone) has its async work dropped at the next await and every capability
// on its context refused; blocking code in it runs to completion unseen.
//
// Calls into one sandbox are serialized by `turn`; different sandboxes
// share nothing. Counters feed reporting only and never influence a
// decision.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pt_audit::{AuditAction, AuditEvent, AuditLog, AuditSink, MemoryAuditSink};
use pt_manifest::{Manifest, Permission};
use pt_policy::{ConsentDecision, ConsentRequest, Gate, PermissionManager};
use pt_workspace::PluginWorkspace;
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;

use crate::context::{Interrupt, PluginContext};
use crate::error::{RuntimeFailure, SandboxError};
use crate::limits::ExecutionLimits;
use crate::meter::MemoryMeter;
use crate::plugin::Plugin;

/// How often the caller looks at a running handler's memory meter.
const METER_POLL: Duration = Duration::from_millis(10);

type HandlerResult = Result<anyhow::Result<serde_json::Value>, RuntimeFailure>;

/// Host-side settings shared by every sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Parent of every per-plugin workspace.
    pub sandbox_root: PathBuf,
    /// Where `<plugin_id>.audit.jsonl` files go. None keeps audit in memory.
    pub audit_dir: Option<PathBuf>,
    /// Wall-clock limit when the manifest declares none.
    pub default_timeout: Duration,
}

impl SandboxConfig {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            audit_dir: None,
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn audit_path(&self, plugin_id: &str) -> Option<PathBuf> {
        self.audit_dir
            .as_ref()
            .map(|dir| dir.join(format!("{plugin_id}.audit.jsonl")))
    }
}

/// A handler run that completed.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub plugin_id: String,
    pub intent: String,
    pub handler: String,
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

/// What `execute` produced when it did not fail.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed(ExecutionResult),
    /// The caller must show `prompt`, record the user's decision with
    /// `handle_consent_response`, and retry.
    ConsentRequired {
        request: ConsentRequest,
        prompt: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxStats {
    pub plugin_id: String,
    pub executions: u64,
    pub violations: u64,
    pub consents_requested: u64,
    pub consents_granted: u64,
    pub runtime_errors: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub workspace_bytes: u64,
}

#[derive(Default)]
struct Counters {
    executions: AtomicU64,
    violations: AtomicU64,
    consents_requested: AtomicU64,
    consents_granted: AtomicU64,
    runtime_errors: AtomicU64,
}

/// A plugin implementation bound to its permission manager, workspace and limits.
pub struct PluginSandbox {
    manifest: Arc<Manifest>,
    plugin: Arc<dyn Plugin>,
    permissions: Arc<Mutex<PermissionManager>>,
    workspace: PluginWorkspace,
    limits: ExecutionLimits,
    counters: Counters,
    started_at: DateTime<Utc>,
    turn: tokio::sync::Mutex<()>,
}

impl PluginSandbox {
    /// Create a sandbox, auditing to `<audit_dir>/<id>.audit.jsonl` when
    /// configured and to memory otherwise.
    pub fn new(
        manifest: Arc<Manifest>,
        plugin: Arc<dyn Plugin>,
        config: &SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let audit: Box<dyn AuditSink> = match config.audit_path(manifest.id()) {
            Some(path) => Box::new(AuditLog::open(path)?),
            None => Box::new(MemoryAuditSink::new()),
        };
        Self::with_audit_sink(manifest, plugin, config, audit)
    }

    /// Create a sandbox that audits to a caller-supplied sink.
    ///
    /// Fails if any declared intent names a handler the plugin lacks.
    pub fn with_audit_sink(
        manifest: Arc<Manifest>,
        plugin: Arc<dyn Plugin>,
        config: &SandboxConfig,
        audit: Box<dyn AuditSink>,
    ) -> Result<Self, SandboxError> {
        let available = plugin.handlers();
        for intent in &manifest.capabilities.intents {
            if !available.contains(&intent.handler.as_str()) {
                return Err(SandboxError::MissingHandler {
                    plugin_id: manifest.id().to_string(),
                    handler: intent.handler.clone(),
                    intent: intent.pattern.clone(),
                });
            }
        }

        let limits = ExecutionLimits::new(&manifest.effective_limits(), config.default_timeout);
        let workspace =
            PluginWorkspace::create(manifest.id(), &config.sandbox_root, limits.storage_bytes)?;
        let permissions = PermissionManager::new(&manifest, audit);

        tracing::info!(
            plugin_id = %manifest.id(),
            workspace = %workspace.root().display(),
            timeout_ms = limits.wall_clock.as_millis() as u64,
            "sandbox created"
        );

        Ok(Self {
            manifest,
            plugin,
            permissions: Arc::new(Mutex::new(permissions)),
            workspace,
            limits,
            counters: Counters::default(),
            started_at: Utc::now(),
            turn: tokio::sync::Mutex::new(()),
        })
    }

    pub fn plugin_id(&self) -> &str {
        self.manifest.id()
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn workspace(&self) -> &PluginWorkspace {
        &self.workspace
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    /// Read-only access to the permission manager.
    pub fn with_permissions<R>(&self, f: impl FnOnce(&PermissionManager) -> R) -> R {
        f(&*self.lock_permissions())
    }

    /// Execute a declared intent.
    pub async fn execute(
        &self,
        intent: &str,
        payload: serde_json::Value,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.execute_with_context(intent, payload, BTreeMap::new())
            .await
    }

    /// Execute a declared intent, passing the caller's key-value context to
    /// the handler and into any consent request.
    pub async fn execute_with_context(
        &self,
        intent: &str,
        payload: serde_json::Value,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let _turn = self.turn.lock().await;
        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let decl = match self.manifest.find_intent(intent) {
            Some(decl) => decl.clone(),
            None => {
                return Err(self.violation(
                    intent.trim(),
                    format!("Intent '{}' is not declared in the manifest", intent.trim()),
                ))
            }
        };

        for permission in &decl.permissions {
            let gate = self.lock_permissions().gate(&decl.pattern, *permission)?;
            match gate {
                Gate::Allow => {}
                Gate::Deny { reason } => return Err(self.violation(&decl.pattern, reason)),
                Gate::NeedsConsent { .. } => {
                    return self.consent_required(&decl.pattern, *permission, context)
                }
            }
        }

        let ctx = PluginContext::new(
            self.plugin_id(),
            &decl.pattern,
            context,
            self.workspace.clone(),
            Arc::clone(&self.permissions),
            self.limits,
        );

        let meter = Arc::new(MemoryMeter::new(self.limits.memory_bytes));
        let (cancel, cancelled) = oneshot::channel::<()>();
        let mut finished = self.spawn_handler(&decl.handler, payload, &ctx, &meter, cancelled)?;

        let mut guard = CancelGuard {
            cancel: Some(cancel),
            ctx: ctx.clone(),
            permissions: Arc::clone(&self.permissions),
            plugin_id: self.plugin_id().to_string(),
            intent: decl.pattern.clone(),
            armed: true,
        };

        let deadline = tokio::time::sleep(self.limits.wall_clock);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(METER_POLL);
        let result = loop {
            tokio::select! {
                joined = &mut finished => break match joined {
                    Ok(Ok(Ok(output))) => Ok(output),
                    Ok(Ok(Err(e))) => Err(RuntimeFailure::HandlerFailed {
                        message: format!("{e:#}"),
                    }),
                    Ok(Err(failure)) => Err(failure),
                    Err(_) => Err(RuntimeFailure::HandlerFailed {
                        message: "handler thread exited without a result".to_string(),
                    }),
                },
                _ = &mut deadline => break Err(RuntimeFailure::Timeout {
                    limit_ms: self.limits.wall_clock.as_millis() as u64,
                }),
                _ = poll.tick() => {
                    if meter.exceeded() {
                        break Err(RuntimeFailure::MemoryLimit {
                            limit_mb: self.limits.memory_mb(),
                            requested_bytes: meter.peak_bytes(),
                        });
                    }
                }
            }
        };
        guard.disarm();

        // The ceiling may have been crossed after the last poll.
        let result = match result {
            Ok(_) if meter.exceeded() => Err(RuntimeFailure::MemoryLimit {
                limit_mb: self.limits.memory_mb(),
                requested_bytes: meter.peak_bytes(),
            }),
            other => other,
        };
        if let Some(interrupt) = ctx.take_interrupt() {
            return match interrupt {
                Interrupt::Violation { action, reason } => Err(self.violation(&action, reason)),
                Interrupt::Consent { request, prompt } => {
                    self.counters
                        .consents_requested
                        .fetch_add(1, Ordering::Relaxed);
                    Ok(ExecutionOutcome::ConsentRequired { request, prompt })
                }
                Interrupt::Limit(failure) => Err(self.runtime_failure(&decl.pattern, failure)),
            };
        }

        let output = result.map_err(|failure| self.runtime_failure(&decl.pattern, failure))?;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.lock_permissions().audit(
            AuditEvent::new(self.plugin_id(), AuditAction::Execution)
                .with_target(&decl.pattern)
                .with_metadata(json!({ "handler": decl.handler, "duration_ms": duration_ms })),
        )?;
        tracing::debug!(plugin_id = %self.plugin_id(), intent = %decl.pattern, duration_ms, "execution completed");

        Ok(ExecutionOutcome::Completed(ExecutionResult {
            plugin_id: self.plugin_id().to_string(),
            intent: decl.pattern,
            handler: decl.handler,
            output,
            duration_ms,
        }))
    }

    /// Record the user's answer to a consent request raised by `execute`.
    pub fn handle_consent_response(
        &self,
        request: &ConsentRequest,
        decision: ConsentDecision,
    ) -> Result<(), SandboxError> {
        let granted = decision.granted;
        self.lock_permissions().record_consent(request, decision)?;
        if granted {
            self.counters.consents_granted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            plugin_id: self.plugin_id().to_string(),
            executions: self.counters.executions.load(Ordering::Relaxed),
            violations: self.counters.violations.load(Ordering::Relaxed),
            consents_requested: self.counters.consents_requested.load(Ordering::Relaxed),
            consents_granted: self.counters.consents_granted.load(Ordering::Relaxed),
            runtime_errors: self.counters.runtime_errors.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            workspace_bytes: self.workspace.usage_bytes().unwrap_or(0),
        }
    }

    /// Human-readable description of this sandbox's boundaries and activity.
    pub fn boundaries_report(&self) -> String {
        let stats = self.stats();
        let plugin = &self.manifest.plugin;
        let mut report = format!(
            "Sandbox report for {} ({} v{})\n\
             Workspace: {}\n\
             \n\
             Resource limits:\n  \
               Memory: {} MB\n  \
               CPU: {}%\n  \
               Storage: {} MB ({} bytes used)\n  \
               Wall clock: {} ms\n\
             \n\
             Activity:\n  \
               Executions: {}\n  \
               Violations: {}\n  \
               Runtime errors: {}\n  \
               Consents requested: {}\n  \
               Consents granted: {}\n  \
               Uptime: {} s\n\n",
            plugin.id,
            plugin.name,
            plugin.version,
            self.workspace.root().display(),
            self.limits.memory_mb(),
            self.limits.cpu_percent,
            self.limits.storage_mb(),
            stats.workspace_bytes,
            self.limits.wall_clock.as_millis(),
            stats.executions,
            stats.violations,
            stats.runtime_errors,
            stats.consents_requested,
            stats.consents_granted,
            stats.uptime_secs,
        );
        report.push_str(&self.with_permissions(|pm| pm.boundaries_summary()));
        report
    }

    /// Start the handler on its own thread. The returned receiver yields
    /// once the handler finishes, panics or is cancelled.
    fn spawn_handler(
        &self,
        handler: &str,
        payload: serde_json::Value,
        ctx: &PluginContext,
        meter: &Arc<MemoryMeter>,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<oneshot::Receiver<HandlerResult>, SandboxError> {
        let (done, finished) = oneshot::channel();
        let plugin = Arc::clone(&self.plugin);
        let handler = handler.to_string();
        let thread_ctx = ctx.clone();
        let meter = Arc::clone(meter);

        let spawned = std::thread::Builder::new()
            .name(format!("plugin-{}", self.plugin_id()))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = done.send(Err(RuntimeFailure::HandlerFailed {
                            message: format!("could not start handler runtime: {e}"),
                        }));
                        return;
                    }
                };

                let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let _metered = meter.enter();
                    runtime.block_on(async {
                        tokio::select! {
                            output = plugin.handle(&handler, payload, &thread_ctx) => Some(output),
                            _ = cancelled => None,
                        }
                    })
                }));
                let result = match run {
                    Ok(Some(output)) => Ok(output),
                    Ok(None) => Err(RuntimeFailure::HandlerFailed {
                        message: "handler was cancelled".to_string(),
                    }),
                    Err(payload) => Err(RuntimeFailure::Panicked {
                        message: panic_message(payload),
                    }),
                };
                let _ = done.send(result);
            });

        match spawned {
            Ok(_) => Ok(finished),
            Err(e) => Err(self.runtime_failure(
                ctx.intent(),
                RuntimeFailure::HandlerFailed {
                    message: format!("could not start handler thread: {e}"),
                },
            )),
        }
    }

    fn consent_required(
        &self,
        action: &str,
        permission: Permission,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let (request, prompt) = {
            let mut pm = self.lock_permissions();
            let request = pm.request_permission(action, permission, context)?;
            let prompt = pm.generate_consent_prompt(&request);
            (request, prompt)
        };
        self.counters
            .consents_requested
            .fetch_add(1, Ordering::Relaxed);
        Ok(ExecutionOutcome::ConsentRequired { request, prompt })
    }

    fn violation(&self, action: &str, reason: String) -> SandboxError {
        self.counters.violations.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(plugin_id = %self.plugin_id(), action, %reason, "sandbox violation");
        self.audit_best_effort(
            AuditEvent::new(self.plugin_id(), AuditAction::Violation)
                .with_target(action)
                .with_metadata(json!({ "reason": reason })),
        );
        SandboxError::Violation {
            plugin_id: self.plugin_id().to_string(),
            action: action.to_string(),
            reason,
        }
    }

    fn runtime_failure(&self, intent: &str, failure: RuntimeFailure) -> SandboxError {
        self.counters.runtime_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(plugin_id = %self.plugin_id(), intent, %failure, "plugin runtime failure");
        self.audit_best_effort(
            AuditEvent::new(self.plugin_id(), AuditAction::Error)
                .with_target(intent)
                .with_metadata(json!({ "failure": failure })),
        );
        SandboxError::Runtime {
            plugin_id: self.plugin_id().to_string(),
            intent: intent.to_string(),
            failure,
        }
    }

    // The execution already failed; a broken audit sink must not mask why.
    fn audit_best_effort(&self, event: AuditEvent) {
        if let Err(e) = self.lock_permissions().audit(event) {
            tracing::error!(plugin_id = %self.plugin_id(), error = %e, "failed to audit sandbox event");
        }
    }

    fn lock_permissions(&self) -> MutexGuard<'_, PermissionManager> {
        self.permissions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stops the handler and audits the cancellation if `execute` is dropped
/// while the handler is still running. Once disarmed it only stops the
/// handler, which has then finished or been given up on.
struct CancelGuard {
    cancel: Option<oneshot::Sender<()>>,
    ctx: PluginContext,
    permissions: Arc<Mutex<PermissionManager>>,
    plugin_id: String,
    intent: String,
    armed: bool,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.armed = false;
        self.stop();
    }

    fn stop(&mut self) {
        self.ctx.halt();
        // Dropping the sender wakes the handler thread's select.
        self.cancel.take();
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.stop();
        tracing::info!(plugin_id = %self.plugin_id, intent = %self.intent, "execution cancelled by caller");
        let event = AuditEvent::new(&self.plugin_id, AuditAction::ExecutionCancelled)
            .with_target(&self.intent);
        let mut pm = self.permissions.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = pm.audit(event) {
            tracing::error!(plugin_id = %self.plugin_id, error = %e, "failed to audit cancellation");
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
