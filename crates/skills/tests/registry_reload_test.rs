//! Registry reload integration tests.
//!
//! Exercises discovery, scanning, the atomic swap of the tool set and the
//! in-flight policy: a call that resolved a tool before a reload finishes
//! against that tool, and the reload does not wait for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Notify;

use agent_sandbox::{BackendFactory, MockBackend, MockProvider, SandboxManager};
use agent_sandbox_core::config::{AppConfig, ScanMode};
use agent_sandbox_core::{Error, LoadErrorKind, Result, Tool, ToolOutput, ToolSource};
use agent_sandbox_governance::SecurityPolicy;
use agent_sandbox_skills::{
    DiscoveredTool, ScriptLoader, ScriptRuntime, ToolCatalog, ToolRegistry,
};

const CLEAN: &str = r#"from agent_tools import tool

@tool
def greet(name: str) -> str:
    """Say hello."""
    return "hello " + name
"#;

const SUBPROCESS: &str = r#"import subprocess

@tool
def run(cmd: str) -> str:
    return subprocess.check_output(cmd, shell=True).decode()
"#;

const USES_OS: &str = r#"import os

@tool
def cwd() -> str:
    return os.getcwd()
"#;

// =============================================================================
// Helpers
// =============================================================================

fn write(dir: &TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join(name), content).unwrap();
}

fn mock_runtime(responses: Vec<agent_sandbox_core::ExecutionResult>) -> (Arc<MockProvider>, ScriptRuntime) {
    let provider = Arc::new(MockProvider::new(responses));
    let manager = Arc::new(SandboxManager::new(provider.clone(), Duration::from_secs(60)));
    (provider, ScriptRuntime::new(manager, "python3", Duration::from_secs(5)))
}

fn mock_registry(dir: &TempDir, policy: SecurityPolicy) -> ToolRegistry {
    let (_provider, runtime) = mock_runtime(Vec::new());
    ToolRegistry::new(policy, dir.path(), Arc::new(runtime))
}

/// Tool whose calls block until released.
struct GatedTool {
    name: String,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "blocks until released"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ToolOutput::text(format!("{} finished", self.name)))
    }
}

struct GatedLoader {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl ScriptLoader for GatedLoader {
    fn load(&self, tool: &DiscoveredTool) -> Arc<dyn Tool> {
        Arc::new(GatedTool {
            name: tool.entry.name.clone(),
            started: self.started.clone(),
            release: self.release.clone(),
        })
    }
}

// =============================================================================
// 1. Discovery through the registry
// =============================================================================

#[tokio::test]
async fn test_strict_reload_isolates_banned_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "clean.py", CLEAN);
    write(&dir, "shell.py", SUBPROCESS);
    let registry = mock_registry(&dir, SecurityPolicy::strict());

    let report = registry.reload().await.unwrap();

    assert_eq!(report.count, 1);
    let tools = registry.list_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "greet");
    assert_eq!(tools[0].module.as_deref(), Some("clean"));
    assert!(matches!(tools[0].source, ToolSource::File(ref p) if p.ends_with("clean.py")));

    let errors = registry.list_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, LoadErrorKind::Security);
    assert!(errors[0].file.ends_with("shell.py"));
    assert!(errors[0].message.contains("subprocess"));
}

#[tokio::test]
async fn test_scan_mode_decides_registration() {
    let dir = TempDir::new().unwrap();
    write(&dir, "paths.py", USES_OS);

    let strict = mock_registry(&dir, SecurityPolicy::strict());
    let report = strict.reload().await.unwrap();
    assert_eq!(report.count, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error_type, LoadErrorKind::Security);

    let warn = mock_registry(&dir, SecurityPolicy::strict().with_mode(ScanMode::Warn));
    let report = warn.reload().await.unwrap();
    assert_eq!(report.count, 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].violation.module, "os");
    assert!(warn.get("cwd").is_ok());
}

#[tokio::test]
async fn test_discovered_tool_runs_through_session() {
    let dir = TempDir::new().unwrap();
    write(&dir, "clean.py", CLEAN);
    let (provider, runtime) = mock_runtime(vec![MockBackend::ok("hello ada")]);
    let registry = ToolRegistry::new(SecurityPolicy::strict(), dir.path(), Arc::new(runtime));
    registry.reload().await.unwrap();

    let output = registry.execute("greet", json!({"name": "ada"})).await.unwrap();
    assert!(output.success);
    assert_eq!(output.content, "hello ada");

    let created = provider.created.lock().await;
    assert_eq!(created.len(), 1);
    let argv = created[0].executed.lock().await[0].clone();
    assert_eq!(argv[4], CLEAN);
}

// =============================================================================
// 2. Atomicity
// =============================================================================

#[tokio::test]
async fn test_readers_never_observe_an_empty_set() {
    let dir = TempDir::new().unwrap();
    for i in 0..8 {
        write(
            &dir,
            &format!("tool_{}.py", i),
            &format!("@tool\ndef t{}():\n    return {}\n", i, i),
        );
    }
    let registry = Arc::new(mock_registry(&dir, SecurityPolicy::strict()));
    registry.reload().await.unwrap();
    assert_eq!(registry.len(), 8);

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let registry = registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut observations = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let seen = registry.list_tools().len();
                assert_eq!(seen, 8, "reader saw a partial tool set");
                observations += 1;
                tokio::task::yield_now().await;
            }
            observations
        })
    };

    for _ in 0..20 {
        registry.reload().await.unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    assert!(reader.await.unwrap() > 0);
}

#[tokio::test]
async fn test_programmatic_tools_survive_reload() {
    let dir = TempDir::new().unwrap();
    write(&dir, "clean.py", CLEAN);

    let manager = Arc::new(SandboxManager::new(
        Arc::new(MockProvider::default()),
        Duration::from_secs(60),
    ));
    let policy = SecurityPolicy::strict().trust_namespace("builtin");
    let registry = ToolRegistry::new(
        policy,
        dir.path(),
        Arc::new(ScriptRuntime::new(manager.clone(), "python3", Duration::from_secs(5))),
    )
    .with_catalog(ToolCatalog::with_sandbox_builtins(manager));

    registry.load_qualified("builtin.sandbox.shell").await.unwrap();
    registry.reload().await.unwrap();
    assert_eq!(registry.len(), 2);

    std::fs::remove_file(dir.path().join("clean.py")).unwrap();
    let report = registry.reload().await.unwrap();
    assert_eq!(report.count, 1);
    assert_eq!(registry.list_tools()[0].name, "sandbox_shell");
    assert!(matches!(registry.get("greet"), Err(Error::ToolNotFound(_))));
}

#[tokio::test]
async fn test_untrusted_namespace_rejected_before_lookup() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(SandboxManager::new(
        Arc::new(MockProvider::default()),
        Duration::from_secs(60),
    ));
    let registry = ToolRegistry::new(
        SecurityPolicy::strict(),
        dir.path(),
        Arc::new(ScriptRuntime::new(manager.clone(), "python3", Duration::from_secs(5))),
    )
    .with_catalog(ToolCatalog::with_sandbox_builtins(manager));

    // No trusted namespaces at all
    assert!(matches!(
        registry.load_qualified("builtin.sandbox.shell").await,
        Err(Error::UntrustedNamespace(_))
    ));
    assert!(registry.is_empty());
}

// =============================================================================
// 3. In-flight calls versus reload
// =============================================================================

#[tokio::test]
async fn test_in_flight_call_finishes_after_its_tool_is_removed() {
    let dir = TempDir::new().unwrap();
    write(&dir, "slow.py", "@tool\ndef slow():\n    pass\n");

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let registry = Arc::new(ToolRegistry::new(
        SecurityPolicy::strict(),
        dir.path(),
        Arc::new(GatedLoader {
            started: started.clone(),
            release: release.clone(),
        }),
    ));
    registry.reload().await.unwrap();

    let call = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.execute("slow", json!({})).await })
    };
    started.notified().await;

    // The reload completes while the call is still blocked
    std::fs::remove_file(dir.path().join("slow.py")).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), registry.reload())
        .await
        .expect("reload waited for an in-flight call")
        .unwrap();
    assert_eq!(report.count, 0);
    assert!(matches!(registry.get("slow"), Err(Error::ToolNotFound(_))));
    assert!(!call.is_finished());

    release.notify_one();
    let output = call.await.unwrap().unwrap();
    assert_eq!(output.content, "slow finished");
}

// =============================================================================
// 4. Real interpreter (skipped when python3 is unavailable)
// =============================================================================

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_script_tool_runs_in_local_session() {
    if !python_available() {
        return;
    }

    let tools = TempDir::new().unwrap();
    let sessions = TempDir::new().unwrap();
    write(&tools, "clean.py", CLEAN);

    let mut config = AppConfig::default();
    config.execution.workspace_root = sessions.path().to_path_buf();
    let factory = Arc::new(BackendFactory::from_config(&config).unwrap());
    let manager = Arc::new(SandboxManager::new(factory, config.execution.idle_timeout()));
    let registry = ToolRegistry::new(
        SecurityPolicy::strict(),
        tools.path(),
        Arc::new(ScriptRuntime::new(manager.clone(), "python3", Duration::from_secs(30))),
    );
    registry.reload().await.unwrap();

    let output = registry.execute("greet", json!({"name": "ada"})).await.unwrap();
    assert!(output.success, "script failed: {}", output.content);
    assert_eq!(output.content, "hello ada");

    manager.shutdown().await;
}
