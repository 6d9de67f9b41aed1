//! Script tools: discovered entry points executed inside the sandbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agent_sandbox::SandboxManager;
use agent_sandbox_core::config::DiscoveryConfig;
use agent_sandbox_core::{CommandLine, Error, Result, Tool, ToolOutput, ToolRiskLevel};
use agent_sandbox_governance::VettedModule;

use crate::discovery::{DiscoveredTool, MAX_SOURCE_BYTES};

/// Interpreter-side driver.
///
/// Receives the vetted source, the function name, JSON arguments and the
/// file name as argv, executes the source and calls the function. Strings
/// are written as-is, other return values as JSON.
pub const RUNNER: &str = r#"
import asyncio, inspect, json, sys, types

def tool(*args, **kwargs):
    if len(args) == 1 and callable(args[0]) and not kwargs:
        return args[0]
    return lambda fn: fn

shim = types.ModuleType("agent_tools")
shim.tool = tool
sys.modules["agent_tools"] = shim

source, function, raw_args, filename = sys.argv[1:5]
namespace = {"__name__": "__agent_tool__", "__file__": filename, "tool": tool}
exec(compile(source, filename, "exec"), namespace)
result = namespace[function](**json.loads(raw_args))
if inspect.iscoroutine(result):
    result = asyncio.run(result)
if isinstance(result, str):
    sys.stdout.write(result)
elif result is not None:
    sys.stdout.write(json.dumps(result))
"#;

/// Turns discovered entry points into callable tools.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, tool: &DiscoveredTool) -> Arc<dyn Tool>;
}

/// Runs script tools through the manager's default session.
#[derive(Clone)]
pub struct ScriptRuntime {
    manager: Arc<SandboxManager>,
    interpreter: String,
    timeout: Duration,
}

impl ScriptRuntime {
    pub fn new(manager: Arc<SandboxManager>, interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            manager,
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub fn from_config(manager: Arc<SandboxManager>, config: &DiscoveryConfig) -> Self {
        Self::new(
            manager,
            config.interpreter.clone(),
            Duration::from_secs(config.tool_timeout_secs),
        )
    }
}

impl ScriptLoader for ScriptRuntime {
    fn load(&self, tool: &DiscoveredTool) -> Arc<dyn Tool> {
        Arc::new(ScriptTool {
            name: tool.entry.name.clone(),
            description: tool.entry.description.clone(),
            parameters: tool.entry.parameters.clone(),
            function: tool.entry.function.clone(),
            file_name: tool
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.py", tool.module)),
            source: tool.source.clone(),
            runtime: self.clone(),
        })
    }
}

/// One `@tool` function from a vetted source.
///
/// Holds its own reference to the scanned module, so a call that started
/// before a reload finishes against the source it was resolved with.
pub struct ScriptTool {
    name: String,
    description: String,
    parameters: Value,
    function: String,
    file_name: String,
    source: Arc<VettedModule>,
    runtime: ScriptRuntime,
}

impl ScriptTool {
    /// Interpreter argv for one call.
    pub fn argv(&self, args: &Value) -> Result<Vec<String>> {
        let args = serde_json::to_string(args)?;
        if args.len() > MAX_SOURCE_BYTES {
            return Err(Error::invalid_request(format!(
                "tool arguments are {} bytes, over the {} byte limit",
                args.len(),
                MAX_SOURCE_BYTES
            )));
        }
        Ok(vec![
            self.runtime.interpreter.clone(),
            "-I".to_string(),
            "-c".to_string(),
            RUNNER.to_string(),
            self.source.source().to_string(),
            self.function.clone(),
            args,
            self.file_name.clone(),
        ])
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let args = match args {
            Value::Null => json!({}),
            Value::Object(_) => args,
            _ => return Err(Error::invalid_request("tool arguments must be a JSON object")),
        };

        let argv = self.argv(&args)?;
        let backend = self.runtime.manager.get_or_create().await?;
        tracing::debug!(
            tool = %self.name,
            session_id = %backend.session().id,
            "Executing script tool"
        );

        let result = backend
            .execute(CommandLine::Argv(argv), Some(self.runtime.timeout))
            .await?;

        let data = json!({
            "exit_code": result.exit_code,
            "truncated": result.truncated,
            "timed_out": result.timed_out,
            "elapsed_ms": result.elapsed.as_millis() as u64,
        });

        if result.timed_out {
            return Ok(ToolOutput::error(format!(
                "tool '{}' timed out after {}s\n{}",
                self.name,
                self.runtime.timeout.as_secs(),
                result.output
            ))
            .with_data(data));
        }

        if result.success() {
            Ok(ToolOutput::text(result.output).with_data(data))
        } else {
            tracing::warn!(tool = %self.name, exit_code = ?result.exit_code, "Script tool failed");
            Ok(ToolOutput::error(result.output).with_data(data))
        }
    }
}
