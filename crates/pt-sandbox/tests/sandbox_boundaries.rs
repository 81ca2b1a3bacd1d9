// sandbox_boundaries.rs - Plugin handlers against the sandbox's walls.
//
// One test plugin ("walls") has a handler per boundary. Each test runs a
// handler and checks that the sandbox, not the handler, decides the
// outcome:
//
//   - undeclared intents never reach plugin code
//   - declared high-risk intents stop for consent before running, and a
//     one-off grant covers exactly one retry
//   - a denial the handler catches is still a violation, and nothing the
//     handler tries afterwards goes through
//   - memory, storage and wall-clock limits end the run as runtime errors,
//     whether or not the handler cooperates
//   - panics are contained
//   - reads outside the workspace go through the forbidden list
//   - a caller that stops waiting leaves an ExecutionCancelled audit entry

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

use pt_audit::{AuditAction, MemoryAuditSink};
use pt_manifest::{Manifest, Permission};
use pt_policy::ConsentDecision;
use pt_sandbox::{
    ExecutionOutcome, Plugin, PluginContext, PluginSandbox, RuntimeFailure, SandboxConfig,
    SandboxError,
};

const WALLS_MANIFEST: &str = r#"
plugin:
  id: walls
  name: Boundary Walls
  version: "1.0.0"
  description: Exercises every wall of the sandbox so the host can trust them.
policy:
  governing_principle: enable_sovereignty
  sacred_promise: Nothing leaves the sandbox without asking.
capabilities:
  intents:
    - pattern: save note
      handler: save_note
    - pattern: apply profile
      handler: apply_profile
      permissions: [configuration.write]
    - pattern: sneak
      handler: sneak
    - pattern: sneak and write
      handler: sneak_and_write
    - pattern: hog memory
      handler: hog_memory
    - pattern: allocate
      handler: allocate
    - pattern: block
      handler: block
    - pattern: fill disk
      handler: fill_disk
    - pattern: spin
      handler: spin
    - pattern: explode
      handler: explode
    - pattern: peek
      handler: peek
  permissions:
    required:
      - filesystem.read
      - filesystem.write
      - configuration.read
      - configuration.write
      - system.info
boundaries:
  forbidden_actions:
    - "read file *secret.txt"
    - delete user data
  resource_limits:
    max_memory_mb: 1
    max_cpu_percent: 10
    max_storage_mb: 1
"#;

#[derive(Default)]
struct Walls {
    ran: AtomicBool,
}

#[async_trait]
impl Plugin for Walls {
    fn handlers(&self) -> &[&'static str] {
        &[
            "save_note",
            "apply_profile",
            "sneak",
            "sneak_and_write",
            "hog_memory",
            "allocate",
            "block",
            "fill_disk",
            "spin",
            "explode",
            "peek",
            "unused",
        ]
    }

    async fn handle(&self, handler: &str, payload: Value, ctx: &PluginContext) -> anyhow::Result<Value> {
        self.ran.store(true, Ordering::SeqCst);
        match handler {
            "save_note" => {
                let text = payload["text"].as_str().unwrap_or_default();
                ctx.files().write("data/note.txt", text.as_bytes())?;
                Ok(json!({ "saved": text.len() }))
            }
            "apply_profile" => Ok(json!({ "applied": payload["profile"] })),
            "sneak" => {
                // Not granted; the handler swallows the error and claims success.
                let _ = ctx.notify("psst");
                Ok(json!({ "sneaked": true }))
            }
            "sneak_and_write" => {
                let _ = ctx.notify("psst");
                let path = payload["path"].as_str().unwrap_or_default();
                ctx.files().write(path, b"leaked")?;
                Ok(json!({ "wrote": path }))
            }
            "hog_memory" => {
                ctx.reserve_memory(512 * 1024)?;
                ctx.reserve_memory(1024 * 1024)?;
                Ok(json!("unreachable"))
            }
            "fill_disk" => {
                let blob = vec![0u8; 600 * 1024];
                ctx.files().write("data/first.bin", &blob)?;
                let _ = ctx.files().write("data/second.bin", &blob);
                Ok(json!("ignored"))
            }
            "allocate" => {
                // Never asks the context; the heap meter has to notice.
                let buffer = std::hint::black_box(vec![7u8; 64 * 1024 * 1024]);
                Ok(json!({ "len": buffer.len() }))
            }
            "block" => {
                std::thread::sleep(Duration::from_secs(3));
                Ok(json!("woke"))
            }
            "spin" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("woke"))
            }
            "explode" => panic!("walls exploded"),
            "peek" => {
                let path = payload["path"].as_str().unwrap_or_default();
                let body = ctx.files().read_to_string(path)?;
                Ok(json!({ "body": body }))
            }
            other => anyhow::bail!("unknown handler {other}"),
        }
    }
}

struct Harness {
    _root: TempDir,
    walls: Arc<Walls>,
    audit: MemoryAuditSink,
    sandbox: PluginSandbox,
}

fn harness(timeout: Duration) -> Harness {
    let root = tempdir().unwrap();
    let manifest: Manifest = serde_yaml::from_str(WALLS_MANIFEST).unwrap();
    let walls = Arc::new(Walls::default());
    let audit = MemoryAuditSink::new();
    let config = SandboxConfig::new(root.path().join("sandboxes")).with_timeout(timeout);
    let sandbox = PluginSandbox::with_audit_sink(
        Arc::new(manifest),
        walls.clone(),
        &config,
        Box::new(audit.clone()),
    )
    .unwrap();
    Harness {
        _root: root,
        walls,
        audit,
        sandbox,
    }
}

fn audited(audit: &MemoryAuditSink, action: AuditAction) -> usize {
    audit.events().iter().filter(|e| e.action == action).count()
}

#[tokio::test]
async fn undeclared_intent_never_runs_plugin_code() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("unused", json!({})).await.unwrap_err();

    assert!(matches!(err, SandboxError::Violation { .. }), "{err}");
    assert!(!h.walls.ran.load(Ordering::SeqCst));
    assert_eq!(audited(&h.audit, AuditAction::Violation), 1);
    assert_eq!(h.sandbox.stats().violations, 1);
}

#[tokio::test]
async fn workspace_writes_need_no_permission() {
    let h = harness(Duration::from_secs(5));

    let outcome = h
        .sandbox
        .execute("Save Note", json!({ "text": "remember the milk" }))
        .await
        .unwrap();

    let ExecutionOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.intent, "save note");
    assert_eq!(result.handler, "save_note");
    assert_eq!(result.output, json!({ "saved": 17 }));
    let note = h.sandbox.workspace().read_to_string("data/note.txt").unwrap();
    assert_eq!(note, "remember the milk");
    assert_eq!(audited(&h.audit, AuditAction::Execution), 1);
}

#[tokio::test]
async fn high_risk_intent_asks_first_and_grant_is_single_use() {
    let h = harness(Duration::from_secs(5));
    let context = BTreeMap::from([("profile".to_string(), json!("minimal"))]);

    let outcome = h
        .sandbox
        .execute_with_context("apply profile", json!({ "profile": "minimal" }), context.clone())
        .await
        .unwrap();
    let ExecutionOutcome::ConsentRequired { request, prompt } = outcome else {
        panic!("expected a consent request");
    };
    assert!(!h.walls.ran.load(Ordering::SeqCst));
    assert_eq!(request.permission, Permission::ConfigurationWrite);
    assert_eq!(request.action, "apply profile");
    assert!(prompt.contains("Risk level: HIGH"));
    assert!(prompt.contains("\"profile\": \"minimal\""));

    h.sandbox
        .handle_consent_response(&request, ConsentDecision::grant())
        .unwrap();

    let retried = h
        .sandbox
        .execute_with_context("apply profile", json!({ "profile": "minimal" }), context.clone())
        .await
        .unwrap();
    assert!(matches!(retried, ExecutionOutcome::Completed(_)));

    // The one-off grant was used up by the retry.
    let again = h
        .sandbox
        .execute_with_context("apply profile", json!({ "profile": "minimal" }), context)
        .await
        .unwrap();
    assert!(matches!(again, ExecutionOutcome::ConsentRequired { .. }));

    let stats = h.sandbox.stats();
    assert_eq!(stats.consents_requested, 2);
    assert_eq!(stats.consents_granted, 1);
    assert_eq!(stats.executions, 3);
}

#[tokio::test]
async fn remembered_denial_is_a_violation() {
    let h = harness(Duration::from_secs(5));

    let ExecutionOutcome::ConsentRequired { request, .. } =
        h.sandbox.execute("apply profile", json!({})).await.unwrap()
    else {
        panic!("expected a consent request");
    };
    h.sandbox
        .handle_consent_response(&request, ConsentDecision::deny().remembered())
        .unwrap();

    let err = h.sandbox.execute("apply profile", json!({})).await.unwrap_err();
    match err {
        SandboxError::Violation { reason, .. } => assert!(reason.contains("declined")),
        other => panic!("expected violation, got {other}"),
    }
    assert!(!h.walls.ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn caught_denial_is_still_a_violation() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("sneak", json!({})).await.unwrap_err();

    match err {
        SandboxError::Violation { action, reason, .. } => {
            assert_eq!(action, "notify: psst");
            assert!(reason.contains("lacks permission 'system.notifications'"));
        }
        other => panic!("expected violation, got {other}"),
    }
    assert!(h.walls.ran.load(Ordering::SeqCst));
    assert_eq!(audited(&h.audit, AuditAction::Execution), 0);
}

#[tokio::test]
async fn nothing_runs_after_a_caught_denial() {
    let h = harness(Duration::from_secs(5));
    let outside = tempdir().unwrap();
    let target = outside.path().join("outside.txt");

    let err = h
        .sandbox
        .execute("sneak and write", json!({ "path": target.to_string_lossy() }))
        .await
        .unwrap_err();

    match err {
        SandboxError::Violation { action, reason, .. } => {
            assert_eq!(action, "notify: psst");
            assert!(reason.contains("lacks permission 'system.notifications'"));
        }
        other => panic!("expected violation, got {other}"),
    }
    assert!(!target.exists(), "write after a denial reached the filesystem");
    // Only the denied notification was ever put to the permission manager.
    assert!(h
        .audit
        .events()
        .iter()
        .all(|e| e.permission.as_deref() != Some("filesystem.write")));
}

#[tokio::test]
async fn memory_over_limit_is_a_runtime_error() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("hog memory", json!({})).await.unwrap_err();

    match err {
        SandboxError::Runtime { failure, .. } => {
            assert!(matches!(failure, RuntimeFailure::MemoryLimit { limit_mb: 1, .. }))
        }
        other => panic!("expected runtime error, got {other}"),
    }
    assert_eq!(h.sandbox.stats().runtime_errors, 1);
}

#[tokio::test]
async fn storage_over_quota_is_a_runtime_error_even_if_ignored() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("fill disk", json!({})).await.unwrap_err();

    assert!(matches!(
        err,
        SandboxError::Runtime {
            failure: RuntimeFailure::StorageLimit { .. },
            ..
        }
    ));
    let files = h.sandbox.workspace().list_files().unwrap();
    assert_eq!(files.len(), 1, "{files:?}");
    assert!(files[0].ends_with("first.bin"));
}

#[tokio::test]
async fn plain_allocation_past_the_limit_is_a_runtime_error() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("allocate", json!({})).await.unwrap_err();

    match err {
        SandboxError::Runtime {
            failure: RuntimeFailure::MemoryLimit { limit_mb, requested_bytes },
            ..
        } => {
            assert_eq!(limit_mb, 1);
            assert!(requested_bytes >= 64 * 1024 * 1024);
        }
        other => panic!("expected memory limit, got {other}"),
    }
    assert_eq!(audited(&h.audit, AuditAction::Execution), 0);
}

#[tokio::test]
async fn blocking_handler_cannot_outlast_the_timeout() {
    let h = harness(Duration::from_millis(200));
    let started = Instant::now();

    let err = h.sandbox.execute("block", json!({})).await.unwrap_err();

    assert!(matches!(
        err,
        SandboxError::Runtime {
            failure: RuntimeFailure::Timeout { limit_ms: 200 },
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());

    // The sandbox is usable while the blocked thread is still asleep.
    let outcome = h
        .sandbox
        .execute("save note", json!({ "text": "after the block" }))
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
}

#[tokio::test]
async fn wall_clock_limit_stops_the_handler() {
    let h = harness(Duration::from_millis(200));

    let err = h.sandbox.execute("spin", json!({})).await.unwrap_err();

    assert!(matches!(
        err,
        SandboxError::Runtime {
            failure: RuntimeFailure::Timeout { limit_ms: 200 },
            ..
        }
    ));
    assert_eq!(audited(&h.audit, AuditAction::Error), 1);
}

#[tokio::test]
async fn panics_are_contained() {
    let h = harness(Duration::from_secs(5));

    let err = h.sandbox.execute("explode", json!({})).await.unwrap_err();
    match err {
        SandboxError::Runtime {
            failure: RuntimeFailure::Panicked { message },
            ..
        } => assert!(message.contains("walls exploded")),
        other => panic!("expected panic to be contained, got {other}"),
    }

    // The sandbox keeps working afterwards.
    let outcome = h
        .sandbox
        .execute("save note", json!({ "text": "still here" }))
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
}

#[tokio::test]
async fn reads_outside_the_workspace_respect_forbidden_actions() {
    let h = harness(Duration::from_secs(5));
    let outside = tempdir().unwrap();
    let public = outside.path().join("readme.txt");
    let secret = outside.path().join("secret.txt");
    std::fs::write(&public, "hello").unwrap();
    std::fs::write(&secret, "hunter2").unwrap();

    let outcome = h
        .sandbox
        .execute("peek", json!({ "path": public.to_string_lossy() }))
        .await
        .unwrap();
    let ExecutionOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.output["body"], "hello");

    let err = h
        .sandbox
        .execute("peek", json!({ "path": secret.to_string_lossy() }))
        .await
        .unwrap_err();
    match err {
        SandboxError::Violation { reason, .. } => assert!(reason.contains("explicitly forbidden")),
        other => panic!("expected violation, got {other}"),
    }
}

#[tokio::test]
async fn abandoned_execution_is_audited_as_cancelled() {
    let h = harness(Duration::from_secs(30));

    let waited = tokio::time::timeout(Duration::from_millis(100), h.sandbox.execute("spin", json!({}))).await;

    assert!(waited.is_err());
    assert_eq!(audited(&h.audit, AuditAction::ExecutionCancelled), 1);
    assert_eq!(audited(&h.audit, AuditAction::Error), 0);
}

#[tokio::test]
async fn missing_handler_fails_sandbox_creation() {
    struct Bare;

    #[async_trait]
    impl Plugin for Bare {
        fn handlers(&self) -> &[&'static str] {
            &["save_note"]
        }

        async fn handle(&self, _: &str, _: Value, _: &PluginContext) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    let root = tempdir().unwrap();
    let manifest: Manifest = serde_yaml::from_str(WALLS_MANIFEST).unwrap();
    let err = PluginSandbox::new(Arc::new(manifest), Arc::new(Bare), &SandboxConfig::new(root.path()))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SandboxError::MissingHandler { ref handler, .. } if handler == "apply_profile"
    ));
}

#[tokio::test]
async fn boundaries_report_describes_limits_and_permissions() {
    let h = harness(Duration::from_secs(5));
    let report = h.sandbox.boundaries_report();

    assert!(report.contains("Sandbox report for walls"));
    assert!(report.contains("Memory: 1 MB"));
    assert!(report.contains("Storage: 1 MB"));
    assert!(report.contains("configuration.write (risk: high, asks first)"));
    assert!(report.contains("delete user data"));
}
