//! agent-sandboxd - execution sandbox and tool-security host.
//!
//! Runs the sandbox session manager, the tool registry, and the hot-reload
//! watcher for the tool directory until interrupted.

use std::sync::Arc;
use std::time::Duration;

use agent_sandbox::{BackendFactory, SandboxManager};
use agent_sandbox_core::config::AppConfig;
use agent_sandbox_governance::SecurityPolicy;
use agent_sandbox_skills::{ScriptRuntime, ToolCatalog, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    agent_sandbox_governance::configure_tracing(&config.logging)?;

    tracing::info!("Starting agent-sandboxd v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Execution: backend factory and session manager
    // =========================================================================
    std::fs::create_dir_all(&config.execution.workspace_root)?;
    let factory = Arc::new(BackendFactory::from_config(&config)?);
    let manager = Arc::new(SandboxManager::new(factory, config.execution.idle_timeout()));
    let reaper = manager.spawn_reaper(Duration::from_secs(config.execution.reap_interval_secs.max(1)));

    tracing::info!(
        backend = %config.execution.backend,
        workspace_root = %config.execution.workspace_root.display(),
        "Sandbox manager initialized"
    );

    // =========================================================================
    // Tools: registry, trusted built-ins, discovered sources
    // =========================================================================
    let policy = SecurityPolicy::from_config(&config.security);
    let catalog = ToolCatalog::with_sandbox_builtins(manager.clone());
    let runtime = ScriptRuntime::from_config(manager.clone(), &config.discovery);
    let registry = Arc::new(
        ToolRegistry::new(policy, config.discovery.tools_dir.clone(), Arc::new(runtime))
            .with_catalog(catalog.clone()),
    );

    for path in catalog.paths() {
        match registry.load_qualified(&path).await {
            Ok(name) => tracing::debug!(tool = %name, path = %path, "Loaded built-in tool"),
            Err(e) => tracing::warn!(path = %path, error = %e, "Skipped built-in tool"),
        }
    }

    let report = registry.reload().await?;
    for error in &report.errors {
        tracing::warn!(
            file = %error.file.display(),
            error_type = error.error_type.as_str(),
            message = %error.message,
            "Tool failed to load"
        );
    }
    tracing::info!(
        tools = report.count,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Tool registry initialized"
    );

    let _watcher = if config.discovery.watch {
        Some(agent_sandbox_skills::watch(
            registry.clone(),
            &config.discovery.tools_dir,
            config.discovery.debounce(),
        )?)
    } else {
        None
    };

    // =========================================================================
    // Run until interrupted
    // =========================================================================
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    reaper.abort();
    manager.shutdown().await;

    Ok(())
}
