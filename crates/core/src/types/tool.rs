use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Tool Types
// =============================================================================

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool execution was successful.
    pub success: bool,

    /// Output content.
    pub content: String,

    /// Optional structured data.
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            data: None,
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a failed output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: message.into(),
            data: None,
        }
    }
}

/// Tool definition handed to the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// JSON Schema for tool arguments.
    pub parameters: serde_json::Value,
}

/// Risk classification of a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRiskLevel {
    /// Read-only / informational.
    #[default]
    Low,
    /// Writes data but is reversible.
    Medium,
    /// Executes code or modifies state.
    High,
}

/// Where a registered tool came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum ToolSource {
    /// Registered by host code. Survives reloads.
    Programmatic,
    /// Discovered in the tool directory. Replaced on every reload.
    File(PathBuf),
}

impl ToolSource {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Programmatic => f.write_str("programmatic"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

// =============================================================================
// Tool Loading Types
// =============================================================================

/// Why a candidate tool failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadErrorKind {
    /// Source could not be parsed.
    Syntax,
    /// Source could not be read, or its entry points are invalid.
    Import,
    /// Banned imports under strict mode.
    Security,
}

impl LoadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::Security => "security",
        }
    }
}

/// A candidate tool that did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolLoadError {
    pub file: PathBuf,
    pub error_type: LoadErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolLoadError {
    pub fn new(file: impl Into<PathBuf>, error_type: LoadErrorKind, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            error_type,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A banned module referenced by a tool source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportViolation {
    /// Full dotted name as written in the source.
    pub module: String,
    /// The banned-set entry it matched.
    pub banned: String,
    /// 1-based line number.
    pub line: usize,
    /// `import`, `from`, `__import__`, or `importlib`.
    pub form: String,
}

impl std::fmt::Display for ImportViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: {} of banned module '{}'",
            self.line, self.form, self.module
        )
    }
}
