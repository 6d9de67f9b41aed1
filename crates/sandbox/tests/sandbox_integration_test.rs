//! Sandbox integration tests.
//!
//! Tests the full pipeline: Tool → SandboxManager → BackendFactory →
//! LocalBackend, with real subprocesses in a temporary workspace root.
//! No Docker required.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;

use agent_sandbox::tools::{
    SandboxEditFileTool, SandboxGlobTool, SandboxGrepTool, SandboxReadFileTool, SandboxShellTool,
    SandboxWriteFileTool,
};
use agent_sandbox::{BackendFactory, SandboxManager};
use agent_sandbox_core::config::AppConfig;
use agent_sandbox_core::{Error, SessionId, SessionStatus, Tool};

// =============================================================================
// Helpers
// =============================================================================

fn local_manager(root: &TempDir) -> Arc<SandboxManager> {
    let mut config = AppConfig::default();
    config.execution.workspace_root = root.path().to_path_buf();
    config.execution.default_timeout_secs = 10;
    let factory = Arc::new(BackendFactory::from_config(&config).unwrap());
    Arc::new(SandboxManager::new(factory, config.execution.idle_timeout()))
}

// =============================================================================
// 1. Shell execution
// =============================================================================

#[tokio::test]
async fn test_shell_runs_in_session_workspace() {
    let root = TempDir::new().unwrap();
    let manager = local_manager(&root);

    SandboxWriteFileTool::new(manager.clone())
        .execute(json!({"path": "data.txt", "content": "payload"}))
        .await
        .unwrap();

    let output = SandboxShellTool::new(manager.clone())
        .execute(json!({"command": ["cat", "data.txt"]}))
        .await
        .unwrap();

    assert!(output.success, "Shell tool should report success");
    assert_eq!(output.content, "payload");

    let session = manager.get_or_create().await.unwrap();
    assert!(session.session().root.starts_with(root.path().canonicalize().unwrap()));
}

#[tokio::test]
async fn test_shell_timeout_is_an_outcome() {
    let root = TempDir::new().unwrap();
    let manager = local_manager(&root);

    let started = Instant::now();
    let output = SandboxShellTool::new(manager.clone())
        .execute(json!({"command": "sleep 30", "timeout_secs": 1}))
        .await
        .unwrap();

    assert!(!output.success, "Timed-out command should report failure");
    assert!(output.content.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));

    // The session survives a timeout
    let session = manager.get_or_create().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Ready);
    let again = session.execute(["echo", "still here"].into(), None).await.unwrap();
    assert_eq!(again.output, "still here\n");
}

// =============================================================================
// 2. File tools
// =============================================================================

#[tokio::test]
async fn test_write_edit_search_pipeline() {
    let root = TempDir::new().unwrap();
    let manager = local_manager(&root);

    let write = SandboxWriteFileTool::new(manager.clone());
    write
        .execute(json!({"path": "src/main.py", "content": "print('x x')\n"}))
        .await
        .unwrap();
    write
        .execute(json!({"path": "src/util.py", "content": "X = 1\n"}))
        .await
        .unwrap();

    let edited = SandboxEditFileTool::new(manager.clone())
        .execute(json!({
            "path": "src/main.py",
            "old_text": "x",
            "new_text": "y",
            "replace_all": true
        }))
        .await
        .unwrap();
    assert!(edited.content.contains("2 replacement(s)"));

    let read = SandboxReadFileTool::new(manager.clone())
        .execute(json!({"path": "src/main.py"}))
        .await
        .unwrap();
    assert_eq!(read.content, "     1\tprint('y y')");

    let globbed = SandboxGlobTool::new(manager.clone())
        .execute(json!({"pattern": "**/*.py"}))
        .await
        .unwrap();
    assert_eq!(globbed.content, "src/main.py\nsrc/util.py");

    let grepped = SandboxGrepTool::new(manager)
        .execute(json!({"pattern": "^X", "path": "src"}))
        .await
        .unwrap();
    assert_eq!(grepped.content, "src/util.py:1:X = 1");
}

#[tokio::test]
async fn test_containment_errors_reach_the_caller() {
    let root = TempDir::new().unwrap();
    let manager = local_manager(&root);
    let read = SandboxReadFileTool::new(manager.clone());

    assert!(matches!(
        read.execute(json!({"path": "../../etc/passwd"})).await,
        Err(Error::PathEscape { .. })
    ));
    assert!(matches!(
        read.execute(json!({"path": "bad\u{0}name"})).await,
        Err(Error::MalformedPath(_))
    ));
    assert!(matches!(
        SandboxWriteFileTool::new(manager)
            .execute(json!({"path": ".agents/evil.py", "content": "x"}))
            .await,
        Err(Error::ProtectedPath(_))
    ));
}

// =============================================================================
// 3. Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_sessions_are_isolated() {
    let root = TempDir::new().unwrap();
    let manager = local_manager(&root);

    let a = manager.open(Some(SessionId::from("sbx-a"))).await.unwrap();
    let b = manager.open(Some(SessionId::from("sbx-b"))).await.unwrap();

    a.write("secret.txt", "a-only").await.unwrap();
    assert!(matches!(b.read("secret.txt", 0, 0).await, Err(Error::FileNotFound(_))));
    assert!(matches!(
        b.read("../sbx-a/secret.txt", 0, 0).await,
        Err(Error::PathEscape { .. })
    ));

    manager.close(&SessionId::from("sbx-a")).await.unwrap();
    assert!(!root.path().join("sbx-a").exists());
    assert!(root.path().join("sbx-b").exists());
}

#[tokio::test]
async fn test_reaper_destroys_idle_sessions() {
    let root = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.execution.workspace_root = root.path().to_path_buf();
    let factory = Arc::new(BackendFactory::from_config(&config).unwrap());
    let manager = Arc::new(SandboxManager::new(factory, Duration::from_millis(50)));

    manager.open(Some(SessionId::from("sbx-idle"))).await.unwrap();
    let reaper = manager.spawn_reaper(Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(manager.sessions().is_empty());
    assert!(!root.path().join("sbx-idle").exists());
    reaper.abort();
}
