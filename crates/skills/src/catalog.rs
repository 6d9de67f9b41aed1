//! Tools addressable by fully-qualified dotted path.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_sandbox::{builtin_tools, SandboxManager};
use agent_sandbox_core::Tool;

/// Builds a fresh tool instance.
pub type ToolFactory = Arc<dyn Fn() -> Arc<dyn Tool> + Send + Sync>;

/// Maps qualified paths such as `builtin.sandbox.shell` to factories.
///
/// The catalog itself does no trust checks; the registry consults the
/// namespace allowlist before it ever looks a path up here.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    entries: BTreeMap<String, ToolFactory>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in sandbox tools under `builtin.sandbox`.
    pub fn with_sandbox_builtins(manager: Arc<SandboxManager>) -> Self {
        let mut catalog = Self::new();
        for (path, tool) in builtin_tools(manager) {
            catalog.insert(path, move || tool.clone());
        }
        catalog
    }

    pub fn insert<F>(&mut self, path: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Tool> + Send + Sync + 'static,
    {
        self.entries.insert(path.into(), Arc::new(factory));
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(path).map(|factory| factory())
    }

    /// Every qualified path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
