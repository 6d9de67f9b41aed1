//! Security policy applied to tool sources and qualified tool paths.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use agent_sandbox_core::config::{ScanMode, SecurityConfig, DEFAULT_BANNED_MODULES};

/// Banned modules, scan mode, protected paths, and trusted namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub banned_modules: BTreeSet<String>,
    pub mode: ScanMode,
    pub protected_paths: Vec<String>,
    pub trusted_namespaces: Vec<String>,
}

impl SecurityPolicy {
    /// Build from the `security` configuration section.
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            banned_modules: config
                .banned_modules
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            mode: config.scan_mode,
            protected_paths: config.protected_paths.clone(),
            trusted_namespaces: config.trusted_namespaces.clone(),
        }
    }

    /// Strict policy with the default banned set and nothing else.
    pub fn strict() -> Self {
        Self {
            banned_modules: DEFAULT_BANNED_MODULES.iter().map(|m| m.to_string()).collect(),
            mode: ScanMode::Strict,
            protected_paths: Vec::new(),
            trusted_namespaces: Vec::new(),
        }
    }

    /// Same policy in warn mode.
    pub fn warn() -> Self {
        Self {
            mode: ScanMode::Warn,
            ..Self::strict()
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ban(mut self, module: impl Into<String>) -> Self {
        self.banned_modules.insert(module.into());
        self
    }

    pub fn trust_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.trusted_namespaces.push(namespace.into());
        self
    }

    /// The banned entry `module` falls under, if any.
    ///
    /// Matching is by dotted prefix: banning `os` bans `os.path`, but
    /// banning `os.path` leaves `os` alone.
    pub fn banned_entry(&self, module: &str) -> Option<&str> {
        self.banned_modules
            .iter()
            .find(|banned| is_dotted_prefix(banned, module))
            .map(|s| s.as_str())
    }

    /// Whether a fully-qualified dotted path lives under a trusted namespace.
    pub fn is_trusted(&self, qualified: &str) -> bool {
        self.trusted_namespaces
            .iter()
            .any(|ns| !ns.is_empty() && is_dotted_prefix(ns, qualified))
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// `prefix` equals `name` or is a whole-segment dotted prefix of it.
fn is_dotted_prefix(prefix: &str, name: &str) -> bool {
    name == prefix
        || (name.len() > prefix.len()
            && name.starts_with(prefix)
            && name.as_bytes()[prefix.len()] == b'.')
}
