//! Tool registry implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use agent_sandbox_core::{
    Error, LoadErrorKind, Result, Tool, ToolDefinition, ToolLoadError, ToolOutput, ToolRiskLevel,
    ToolSource,
};
use agent_sandbox_governance::SecurityPolicy;

use crate::catalog::ToolCatalog;
use crate::discovery::{discover, ScanWarning};
use crate::script_tool::ScriptLoader;

/// A tool and where it came from.
pub struct ToolRegistration {
    pub name: String,
    pub source: ToolSource,
    /// File stem for discovered tools, qualified path for catalog tools.
    pub module: Option<String>,
    pub registered_at: DateTime<Utc>,
    handler: Arc<dyn Tool>,
}

impl ToolRegistration {
    pub fn handler(&self) -> &Arc<dyn Tool> {
        &self.handler
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.handler.description().to_string(),
            risk_level: self.handler.risk_level(),
            source: self.source.clone(),
            module: self.module.clone(),
        }
    }
}

/// Admin view of one registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub risk_level: ToolRiskLevel,
    pub source: ToolSource,
    pub module: Option<String>,
}

/// Outcome of one reload cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Tools registered after the reload, programmatic ones included.
    pub count: usize,
    pub errors: Vec<ToolLoadError>,
    pub warnings: Vec<ScanWarning>,
}

/// An immutable, published set of tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<ToolRegistration>>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&Arc<ToolRegistration>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolRegistration>> {
        self.tools.values()
    }
}

/// Process-wide tool store.
///
/// Readers load the current [`ToolSet`] without locking. Writers build a
/// new set off to the side and publish it with a single swap, so a reader
/// sees either the whole set before a change or the whole set after it.
/// Writers (register, unregister, reload) are serialized among themselves.
pub struct ToolRegistry {
    current: ArcSwap<ToolSet>,
    errors: ArcSwap<Vec<ToolLoadError>>,
    write_lock: Mutex<()>,
    policy: SecurityPolicy,
    tools_dir: PathBuf,
    loader: Arc<dyn ScriptLoader>,
    catalog: ToolCatalog,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new(
        policy: SecurityPolicy,
        tools_dir: impl Into<PathBuf>,
        loader: Arc<dyn ScriptLoader>,
    ) -> Self {
        Self {
            current: ArcSwap::from_pointee(ToolSet::default()),
            errors: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            policy,
            tools_dir: tools_dir.into(),
            loader,
            catalog: ToolCatalog::default(),
        }
    }

    /// Tools `load_qualified` may resolve.
    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn tools_dir(&self) -> &PathBuf {
        &self.tools_dir
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// The current tool set.
    pub fn snapshot(&self) -> Arc<ToolSet> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Register a programmatic tool under its own name.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        self.register_as(name, tool, ToolSource::Programmatic, None).await
    }

    /// Register a tool under `name`.
    ///
    /// File-sourced registrations are replaced on the next reload.
    pub async fn register_as(
        &self,
        name: impl Into<String>,
        tool: Arc<dyn Tool>,
        source: ToolSource,
        module: Option<String>,
    ) -> Result<()> {
        let name = name.into();
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        if current.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }

        tracing::info!(tool = %name, source = %source, "Registering tool");
        let mut next = (*current).clone();
        next.tools.insert(
            name.clone(),
            Arc::new(ToolRegistration {
                name,
                source,
                module,
                registered_at: Utc::now(),
                handler: tool,
            }),
        );
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Remove a tool. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        if !current.tools.contains_key(name) {
            return false;
        }
        let mut next = (*current).clone();
        next.tools.remove(name);
        self.current.store(Arc::new(next));
        tracing::info!(tool = %name, "Unregistered tool");
        true
    }

    /// Resolve a fully-qualified path from the catalog and register it as a
    /// programmatic tool. Returns the registered tool name.
    ///
    /// Paths outside the trusted namespaces are rejected before the catalog
    /// is consulted.
    pub async fn load_qualified(&self, path: &str) -> Result<String> {
        if !self.policy.is_trusted(path) {
            tracing::warn!(path = %path, "Rejected tool from untrusted namespace");
            return Err(Error::UntrustedNamespace(path.to_string()));
        }

        let tool = self
            .catalog
            .resolve(path)
            .ok_or_else(|| Error::tool_not_found(path))?;
        let name = tool.name().to_string();
        self.register_as(name.clone(), tool, ToolSource::Programmatic, Some(path.to_string()))
            .await?;
        Ok(name)
    }

    /// Admin view of every registered tool, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        self.current.load().iter().map(|r| r.summary()).collect()
    }

    /// Definitions handed to the agent runtime.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.current
            .load()
            .iter()
            .map(|r| ToolDefinition {
                name: r.name.clone(),
                ..r.handler.definition()
            })
            .collect()
    }

    pub fn get_tool(&self, name: &str) -> Result<Arc<ToolRegistration>> {
        self.current
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::tool_not_found(name))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        Ok(self.get_tool(name)?.handler.clone())
    }

    /// Execute a tool by name.
    ///
    /// The registration is resolved once; a reload during the call does not
    /// affect it.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput> {
        let tool = self.get(name)?;
        tracing::debug!(tool = %name, "Executing tool");
        tool.execute(args).await
    }

    /// Load errors from the most recent reload.
    pub fn list_errors(&self) -> Vec<ToolLoadError> {
        Vec::clone(&self.errors.load())
    }

    /// Rediscover the tool directory and atomically replace every
    /// file-sourced tool. Programmatic tools are kept. The previous cycle's
    /// errors are discarded.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _guard = self.write_lock.lock().await;

        let dir = self.tools_dir.clone();
        let policy = self.policy.clone();
        let discovery = tokio::task::spawn_blocking(move || discover(&dir, &policy))
            .await
            .map_err(|e| Error::internal(format!("tool discovery task failed: {}", e)))?;

        let current = self.current.load_full();
        let mut next = ToolSet {
            tools: current
                .tools
                .iter()
                .filter(|(_, r)| !r.source.is_file())
                .map(|(name, r)| (name.clone(), r.clone()))
                .collect(),
        };

        let mut errors = discovery.errors;
        for found in &discovery.tools {
            let name = found.entry.name.clone();
            if next.tools.contains_key(&name) {
                errors.push(ToolLoadError::new(
                    &found.file,
                    LoadErrorKind::Import,
                    format!("tool '{}' conflicts with a programmatic tool", name),
                ));
                continue;
            }
            next.tools.insert(
                name.clone(),
                Arc::new(ToolRegistration {
                    name,
                    source: ToolSource::File(found.file.clone()),
                    module: Some(found.module.clone()),
                    registered_at: Utc::now(),
                    handler: self.loader.load(found),
                }),
            );
        }

        let count = next.len();
        self.current.store(Arc::new(next));
        self.errors.store(Arc::new(errors.clone()));

        tracing::info!(
            dir = %self.tools_dir.display(),
            tools = count,
            errors = errors.len(),
            warnings = discovery.warnings.len(),
            "Tool registry reloaded"
        );

        Ok(ReloadReport {
            count,
            errors,
            warnings: discovery.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::discovery::DiscoveredTool;

    /// Simple echo tool for testing.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input message back"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        async fn execute(&self, args: Value) -> Result<ToolOutput> {
            let message = args
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("No message provided");
            Ok(ToolOutput::text(format!("Echo: {}", message)))
        }
    }

    /// Loader that answers every script call with the function name.
    struct NameLoader;

    struct NamedTool(String);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            &self.0
        }

        fn description(&self) -> &str {
            "discovered"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput> {
            Ok(ToolOutput::text(self.0.clone()))
        }
    }

    impl ScriptLoader for NameLoader {
        fn load(&self, tool: &DiscoveredTool) -> Arc<dyn Tool> {
            Arc::new(NamedTool(tool.entry.name.clone()))
        }
    }

    fn registry(dir: &tempfile::TempDir) -> ToolRegistry {
        ToolRegistry::new(SecurityPolicy::strict(), dir.path(), Arc::new(NameLoader))
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.register(Arc::new(EchoTool)).await.unwrap();

        let tools = registry.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].source, ToolSource::Programmatic);
        assert!(matches!(
            registry.register(Arc::new(EchoTool)).await,
            Err(Error::DuplicateTool(_))
        ));
    }

    #[tokio::test]
    async fn test_execute() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = registry(&dir);
        registry.register(Arc::new(EchoTool)).await.unwrap();

        let result = registry
            .execute("echo", json!({"message": "Hello"}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_execute_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = registry(&dir);

        let result = registry.execute("nonexistent", json!({})).await;
        assert!(matches!(result, Err(Error::ToolNotFound(_))));
        assert!(matches!(registry.get_tool("nonexistent"), Err(Error::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_unregister() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = registry(&dir);
        registry.register(Arc::new(EchoTool)).await.unwrap();

        assert!(registry.unregister("echo").await);
        assert!(!registry.unregister("echo").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reload_keeps_programmatic_tools() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "@tool\ndef alpha():\n    pass\n").unwrap();
        let registry = registry(&dir);
        registry.register(Arc::new(EchoTool)).await.unwrap();

        let report = registry.reload().await.unwrap();
        assert_eq!(report.count, 2);
        assert!(report.errors.is_empty());

        std::fs::remove_file(dir.path().join("a.py")).unwrap();
        std::fs::write(dir.path().join("b.py"), "@tool\ndef beta():\n    pass\n").unwrap();
        registry.reload().await.unwrap();

        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["beta", "echo"]);
        let beta = registry.get_tool("beta").unwrap();
        assert_eq!(beta.module.as_deref(), Some("b"));
        assert!(beta.source.is_file());
    }

    #[tokio::test]
    async fn test_reload_discards_previous_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let bad = dir.path().join("bad.py");
        std::fs::write(&bad, "def broken(:\n").unwrap();
        let registry = registry(&dir);

        registry.reload().await.unwrap();
        assert_eq!(registry.list_errors().len(), 1);
        assert_eq!(registry.list_errors()[0].error_type, LoadErrorKind::Syntax);

        std::fs::write(&bad, "@tool\ndef fixed():\n    pass\n").unwrap();
        let report = registry.reload().await.unwrap();
        assert!(report.errors.is_empty());
        assert!(registry.list_errors().is_empty());
        assert!(registry.get("fixed").is_ok());
    }

    #[tokio::test]
    async fn test_discovered_name_conflicting_with_programmatic() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("echo.py"), "@tool\ndef echo():\n    pass\n").unwrap();
        let registry = registry(&dir);
        registry.register(Arc::new(EchoTool)).await.unwrap();

        let report = registry.reload().await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error_type, LoadErrorKind::Import);
        assert_eq!(registry.get_tool("echo").unwrap().source, ToolSource::Programmatic);
    }

    #[tokio::test]
    async fn test_load_qualified_checks_namespace_first() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut catalog = ToolCatalog::new();
        catalog.insert("builtin.test.echo", || Arc::new(EchoTool) as Arc<dyn Tool>);
        catalog.insert("thirdparty.echo", || Arc::new(EchoTool) as Arc<dyn Tool>);

        let policy = SecurityPolicy::strict().trust_namespace("builtin");
        let registry =
            ToolRegistry::new(policy, dir.path(), Arc::new(NameLoader)).with_catalog(catalog);

        // Cataloged, but outside the allowlist
        assert!(matches!(
            registry.load_qualified("thirdparty.echo").await,
            Err(Error::UntrustedNamespace(_))
        ));
        // Segment match only
        assert!(matches!(
            registry.load_qualified("builtinx.echo").await,
            Err(Error::UntrustedNamespace(_))
        ));
        assert!(matches!(
            registry.load_qualified("builtin.test.missing").await,
            Err(Error::ToolNotFound(_))
        ));

        assert_eq!(registry.load_qualified("builtin.test.echo").await.unwrap(), "echo");
        let echo = registry.get_tool("echo").unwrap();
        assert_eq!(echo.module.as_deref(), Some("builtin.test.echo"));
        assert_eq!(echo.source, ToolSource::Programmatic);
    }
}
