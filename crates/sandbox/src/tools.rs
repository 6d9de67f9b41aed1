//! Sandbox tools implementing the `Tool` trait.
//!
//! Thin JSON adapters over the backend protocol, running against the
//! manager's default session. Registered programmatically under the
//! `builtin.sandbox` namespace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agent_sandbox_core::traits::backend::DEFAULT_READ_LIMIT;
use agent_sandbox_core::{CommandLine, Error, Result, Tool, ToolOutput, ToolRiskLevel};

use crate::manager::SandboxManager;

/// Upper bound a caller may request for one command.
pub const MAX_TIMEOUT_SECS: u64 = 600;

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_request(format!("{} is required", key)))
}

fn optional_str<'a>(args: &'a Value, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

// =============================================================================
// Sandbox Shell Tool
// =============================================================================

/// Runs a command in the sandbox.
///
/// Risk level: HIGH.
pub struct SandboxShellTool {
    manager: Arc<SandboxManager>,
}

impl SandboxShellTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxShellTool {
    fn name(&self) -> &str {
        "sandbox_shell"
    }

    fn description(&self) -> &str {
        "Run a command inside the sandbox session. The command is split into \
         arguments like a shell would, but no shell interprets it: pipes, \
         redirection, and variable expansion are not available unless you \
         invoke an interpreter explicitly. Runs in the session workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "description": "Command line string or argument vector",
                    "oneOf": [
                        {"type": "string"},
                        {"type": "array", "items": {"type": "string"}}
                    ]
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (defaults to the session default)"
                }
            },
            "required": ["command"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let command: CommandLine = match args.get("command") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| Error::invalid_request("command must be a string or a list of strings"))?,
            None => return Err(Error::invalid_request("command is required")),
        };
        let timeout = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(|secs| Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS)));

        let backend = self.manager.get_or_create().await?;
        let result = backend.execute(command, timeout).await?;

        let data = json!({
            "exit_code": result.exit_code,
            "truncated": result.truncated,
            "timed_out": result.timed_out,
            "elapsed_ms": result.elapsed.as_millis() as u64,
        });

        let mut output = result.output.clone();
        if result.truncated {
            output.push_str("\n[output truncated]");
        }

        if result.timed_out {
            return Ok(ToolOutput::error(format!(
                "Command timed out after {:.1}s.\nPartial output:\n{}",
                result.elapsed.as_secs_f64(),
                output
            ))
            .with_data(data));
        }

        let code = result.exit_code.unwrap_or(-1);
        if output.is_empty() {
            output = format!("Command completed with exit code {}", code);
        }
        if result.success() {
            Ok(ToolOutput::text(output).with_data(data))
        } else {
            Ok(ToolOutput::error(format!("Command failed (exit code {}):\n{}", code, output))
                .with_data(data))
        }
    }
}

// =============================================================================
// Sandbox Read File Tool
// =============================================================================

/// Reads a line-numbered slice of a file.
///
/// Risk level: LOW.
pub struct SandboxReadFileTool {
    manager: Arc<SandboxManager>,
}

impl SandboxReadFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxReadFileTool {
    fn name(&self) -> &str {
        "sandbox_read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the sandbox workspace. Lines are numbered from 1."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "offset": {"type": "integer", "description": "0-based first line", "default": 0},
                "limit": {"type": "integer", "description": "Maximum lines", "default": DEFAULT_READ_LIMIT}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);

        let backend = self.manager.get_or_create().await?;
        let content = backend.read(path, offset, limit).await?;
        Ok(ToolOutput::text(content))
    }
}

// =============================================================================
// Sandbox Write File Tool
// =============================================================================

/// Creates or overwrites a file.
///
/// Risk level: MEDIUM.
pub struct SandboxWriteFileTool {
    manager: Arc<SandboxManager>,
}

impl SandboxWriteFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxWriteFileTool {
    fn name(&self) -> &str {
        "sandbox_write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the sandbox workspace, replacing it if it exists."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "content": {"type": "string", "description": "The file content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;

        let backend = self.manager.get_or_create().await?;
        let outcome = backend.write(path, content).await?;
        Ok(ToolOutput::text(format!(
            "File written: {} ({} bytes)",
            outcome.path, outcome.written
        ))
        .with_data(serde_json::to_value(outcome)?))
    }
}

// =============================================================================
// Sandbox Edit File Tool
// =============================================================================

/// Exact-text replacement in a file.
///
/// Risk level: MEDIUM.
pub struct SandboxEditFileTool {
    manager: Arc<SandboxManager>,
}

impl SandboxEditFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxEditFileTool {
    fn name(&self) -> &str {
        "sandbox_edit_file"
    }

    fn description(&self) -> &str {
        "Replace exact text in a sandbox file. Replaces the first occurrence, \
         or every occurrence with replace_all. Fails if the text is not found."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_text": {"type": "string", "description": "Exact text to find"},
                "new_text": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let old = required_str(&args, "old_text")?;
        let new = required_str(&args, "new_text")?;
        let replace_all = args.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        let backend = self.manager.get_or_create().await?;
        let outcome = backend.edit(path, old, new, replace_all).await?;
        Ok(ToolOutput::text(format!(
            "Edited {}: {} replacement(s)",
            outcome.path, outcome.replacements
        ))
        .with_data(serde_json::to_value(outcome)?))
    }
}

// =============================================================================
// Sandbox List / Glob / Grep Tools
// =============================================================================

/// Lists a directory.
///
/// Risk level: LOW.
pub struct SandboxListFilesTool {
    manager: Arc<SandboxManager>,
}

impl SandboxListFilesTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxListFilesTool {
    fn name(&self) -> &str {
        "sandbox_list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in a sandbox workspace directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace", "default": "."}
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = optional_str(&args, "path", ".");
        let backend = self.manager.get_or_create().await?;
        let entries = backend.list(path).await?;

        let text = entries
            .iter()
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.path)
                } else {
                    format!("{} ({} bytes)", e.path, e.size)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::text(text).with_data(serde_json::to_value(entries)?))
    }
}

/// Finds files by glob pattern.
///
/// Risk level: LOW.
pub struct SandboxGlobTool {
    manager: Arc<SandboxManager>,
}

impl SandboxGlobTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxGlobTool {
    fn name(&self) -> &str {
        "sandbox_glob"
    }

    fn description(&self) -> &str {
        "Find files in the sandbox workspace by glob pattern, e.g. '**/*.py'. \
         Results are sorted by path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string", "default": "."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let pattern = required_str(&args, "pattern")?;
        let path = optional_str(&args, "path", ".");
        let backend = self.manager.get_or_create().await?;
        let found = backend.glob(pattern, path).await?;

        let text = found.iter().map(|f| f.path.as_str()).collect::<Vec<_>>().join("\n");
        Ok(ToolOutput::text(text).with_data(serde_json::to_value(found)?))
    }
}

/// Searches file contents by regular expression.
///
/// Risk level: LOW.
pub struct SandboxGrepTool {
    manager: Arc<SandboxManager>,
}

impl SandboxGrepTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SandboxGrepTool {
    fn name(&self) -> &str {
        "sandbox_grep"
    }

    fn description(&self) -> &str {
        "Search file contents in the sandbox workspace with a regular expression. \
         Results are sorted by path, then line number."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string", "default": "."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let pattern = required_str(&args, "pattern")?;
        let path = optional_str(&args, "path", ".");
        let backend = self.manager.get_or_create().await?;
        let found = backend.grep(pattern, path).await?;

        let text = found
            .iter()
            .map(|m| format!("{}:{}:{}", m.path, m.line, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::text(text).with_data(serde_json::to_value(found)?))
    }
}

/// Every built-in tool, keyed by its qualified path under `builtin.sandbox`.
pub fn builtin_tools(manager: Arc<SandboxManager>) -> Vec<(&'static str, Arc<dyn Tool>)> {
    vec![
        ("builtin.sandbox.shell", Arc::new(SandboxShellTool::new(manager.clone())) as Arc<dyn Tool>),
        ("builtin.sandbox.read_file", Arc::new(SandboxReadFileTool::new(manager.clone()))),
        ("builtin.sandbox.write_file", Arc::new(SandboxWriteFileTool::new(manager.clone()))),
        ("builtin.sandbox.edit_file", Arc::new(SandboxEditFileTool::new(manager.clone()))),
        ("builtin.sandbox.list_files", Arc::new(SandboxListFilesTool::new(manager.clone()))),
        ("builtin.sandbox.glob", Arc::new(SandboxGlobTool::new(manager.clone()))),
        ("builtin.sandbox.grep", Arc::new(SandboxGrepTool::new(manager))),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockProvider};
    use agent_sandbox_core::ExecutionResult;

    fn make_manager(responses: Vec<ExecutionResult>) -> Arc<SandboxManager> {
        let provider = Arc::new(MockProvider::new(responses));
        Arc::new(SandboxManager::new(provider, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_shell_tool_success() {
        let manager = make_manager(vec![MockBackend::ok("Hello Sandbox\n")]);
        let tool = SandboxShellTool::new(manager);
        let result = tool
            .execute(json!({"command": "echo Hello Sandbox"}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("Hello Sandbox"));
        assert_eq!(result.data.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_shell_tool_accepts_argv() {
        let provider = Arc::new(MockProvider::default());
        let manager = Arc::new(SandboxManager::new(provider.clone(), Duration::from_secs(60)));
        let tool = SandboxShellTool::new(manager);
        tool.execute(json!({"command": ["ls", "-la", "a b"]})).await.unwrap();

        let created = provider.created.lock().await;
        let executed = created[0].executed.lock().await;
        assert_eq!(executed[0], vec!["ls", "-la", "a b"]);
    }

    #[tokio::test]
    async fn test_shell_tool_failure() {
        let mut failed = MockBackend::ok("");
        failed.exit_code = Some(1);
        failed.output = "command not found".into();
        let tool = SandboxShellTool::new(make_manager(vec![failed]));
        let result = tool.execute(json!({"command": "nonexistent_command"})).await.unwrap();

        assert!(!result.success);
        assert!(result.content.contains("exit code 1"));
    }

    #[tokio::test]
    async fn test_shell_tool_timeout() {
        let mut timed = MockBackend::ok("partial output...");
        timed.exit_code = None;
        timed.timed_out = true;
        let tool = SandboxShellTool::new(make_manager(vec![timed]));
        let result = tool
            .execute(json!({"command": "sleep 999", "timeout_secs": 1}))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.content.contains("timed out"));
        assert!(result.content.contains("partial output..."));
    }

    #[tokio::test]
    async fn test_shell_tool_flags_truncation() {
        let mut long = MockBackend::ok("xxxx");
        long.truncated = true;
        let tool = SandboxShellTool::new(make_manager(vec![long]));
        let result = tool.execute(json!({"command": "yes"})).await.unwrap();
        assert!(result.content.ends_with("[output truncated]"));
        assert_eq!(result.data.unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn test_shell_tool_requires_command() {
        let tool = SandboxShellTool::new(make_manager(vec![]));
        assert!(matches!(tool.execute(json!({})).await, Err(Error::InvalidRequest(_))));
        assert!(matches!(
            tool.execute(json!({"command": 42})).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_write_edit_read() {
        let manager = make_manager(vec![]);
        SandboxWriteFileTool::new(manager.clone())
            .execute(json!({"path": "hello.txt", "content": "x x"}))
            .await
            .unwrap();

        let edited = SandboxEditFileTool::new(manager.clone())
            .execute(json!({"path": "hello.txt", "old_text": "x", "new_text": "y"}))
            .await
            .unwrap();
        assert_eq!(edited.data.unwrap()["replacements"], 1);

        let read = SandboxReadFileTool::new(manager)
            .execute(json!({"path": "hello.txt"}))
            .await
            .unwrap();
        assert_eq!(read.content, "     1\ty x");
    }

    #[tokio::test]
    async fn test_write_file_path_traversal() {
        let tool = SandboxWriteFileTool::new(make_manager(vec![]));
        let result = tool
            .execute(json!({"path": "../../../etc/passwd", "content": "evil"}))
            .await;
        assert!(matches!(result, Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_risk_levels() {
        let manager = make_manager(vec![]);
        let levels: Vec<_> = builtin_tools(manager)
            .into_iter()
            .map(|(path, tool)| (path, tool.risk_level()))
            .collect();
        assert_eq!(levels[0], ("builtin.sandbox.shell", ToolRiskLevel::High));
        assert_eq!(levels[2].1, ToolRiskLevel::Medium);
        assert_eq!(levels[6].1, ToolRiskLevel::Low);
    }
}
