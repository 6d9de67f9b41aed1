use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::types::BackendKind;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub security: SecurityConfig,
    pub execution: ExecutionConfig,
    pub container: ContainerConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

/// How the scanner treats banned imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Record violations, keep loading.
    Warn,
    /// Refuse to register the candidate.
    Strict,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub banned_modules: Vec<String>,
    pub scan_mode: ScanMode,
    /// Relative entries are resolved against each session root.
    pub protected_paths: Vec<String>,
    pub trusted_namespaces: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    pub backend: BackendKind,
    pub workspace_root: PathBuf,
    pub default_timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub memory_limit_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub pids_limit: i64,
    /// `none`, `bridge`, `host`, or the name of a user-defined network.
    pub network: String,
    /// Where `execution.workspace_root` lives on the Docker host, when this
    /// process itself runs inside a container.
    pub host_workspace_path: Option<PathBuf>,
    pub workdir: String,
    pub user: String,
    pub tmpfs_size_bytes: i64,
    pub creation_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    pub tools_dir: PathBuf,
    pub debounce_ms: u64,
    pub interpreter: String,
    pub tool_timeout_secs: u64,
    pub watch: bool,
}

impl DiscoveryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("SANDBOX_ENV").unwrap_or_else(|_| "development".into());
        let defaults = AppConfig::default();

        let s = Config::builder()
            .add_source(defaults.as_source()?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map SANDBOX__EXECUTION__DEFAULT_TIMEOUT_SECS=60 to execution.default_timeout_secs
            .add_source(
                Environment::with_prefix("SANDBOX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.banned_modules")
                    .with_list_parse_key("security.protected_paths")
                    .with_list_parse_key("security.trusted_namespaces")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Built-in defaults as the lowest-priority configuration layer.
    fn as_source(&self) -> Result<Config, ConfigError> {
        let mut builder = Config::builder()
            .set_default("security.banned_modules", self.security.banned_modules.clone())?
            .set_default(
                "security.scan_mode",
                match self.security.scan_mode {
                    ScanMode::Warn => "warn",
                    ScanMode::Strict => "strict",
                },
            )?
            .set_default("security.protected_paths", self.security.protected_paths.clone())?
            .set_default(
                "security.trusted_namespaces",
                self.security.trusted_namespaces.clone(),
            )?
            .set_default("execution.backend", self.execution.backend.as_str())?
            .set_default(
                "execution.workspace_root",
                self.execution.workspace_root.to_string_lossy().to_string(),
            )?
            .set_default("execution.default_timeout_secs", self.execution.default_timeout_secs)?
            .set_default(
                "execution.output_limit_bytes",
                self.execution.output_limit_bytes as u64,
            )?
            .set_default("execution.idle_timeout_secs", self.execution.idle_timeout_secs)?
            .set_default("execution.reap_interval_secs", self.execution.reap_interval_secs)?
            .set_default("container.image", self.container.image.clone())?
            .set_default("container.memory_limit_bytes", self.container.memory_limit_bytes)?
            .set_default("container.cpu_quota", self.container.cpu_quota)?
            .set_default("container.cpu_period", self.container.cpu_period)?
            .set_default("container.pids_limit", self.container.pids_limit)?
            .set_default("container.network", self.container.network.clone())?
            .set_default("container.workdir", self.container.workdir.clone())?
            .set_default("container.user", self.container.user.clone())?
            .set_default("container.tmpfs_size_bytes", self.container.tmpfs_size_bytes)?
            .set_default(
                "container.creation_timeout_secs",
                self.container.creation_timeout_secs,
            )?
            .set_default(
                "discovery.tools_dir",
                self.discovery.tools_dir.to_string_lossy().to_string(),
            )?
            .set_default("discovery.debounce_ms", self.discovery.debounce_ms)?
            .set_default("discovery.interpreter", self.discovery.interpreter.clone())?
            .set_default("discovery.tool_timeout_secs", self.discovery.tool_timeout_secs)?
            .set_default("discovery.watch", self.discovery.watch)?
            .set_default("logging.filter", self.logging.filter.clone())?
            .set_default("logging.json", self.logging.json)?;

        if let Some(ref host_path) = self.container.host_workspace_path {
            builder = builder.set_default(
                "container.host_workspace_path",
                host_path.to_string_lossy().to_string(),
            )?;
        }

        builder.build()
    }
}

/// Modules a tool source may never import.
///
/// Process/OS control, networking and raw sockets, reflection and dynamic
/// execution, concurrency primitives, and the interpreter's own machinery.
pub const DEFAULT_BANNED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "pty",
    "signal",
    "resource",
    "socket",
    "ssl",
    "select",
    "selectors",
    "asyncio",
    "http",
    "urllib",
    "ftplib",
    "smtplib",
    "telnetlib",
    "importlib",
    "imp",
    "builtins",
    "ctypes",
    "cffi",
    "inspect",
    "gc",
    "code",
    "codeop",
    "marshal",
    "pickle",
    "runpy",
    "threading",
    "_thread",
    "multiprocessing",
    "concurrent",
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            security: SecurityConfig {
                banned_modules: DEFAULT_BANNED_MODULES.iter().map(|m| m.to_string()).collect(),
                scan_mode: ScanMode::Strict,
                protected_paths: vec![".agents".into(), ".sandbox".into()],
                trusted_namespaces: vec!["builtin".into()],
            },
            execution: ExecutionConfig {
                backend: BackendKind::Local,
                workspace_root: PathBuf::from("/tmp/agent-sandbox/sessions"),
                default_timeout_secs: 300,
                output_limit_bytes: 100 * 1024, // 100KB
                idle_timeout_secs: 30 * 60,
                reap_interval_secs: 60,
            },
            container: ContainerConfig {
                image: "agent-sandbox:latest".into(),
                memory_limit_bytes: 512 * 1024 * 1024, // 512MB
                cpu_quota: 100_000,                    // 1 CPU core
                cpu_period: 100_000,
                pids_limit: 256,
                network: "none".into(),
                host_workspace_path: None,
                workdir: "/workspace".into(),
                user: "sandbox".into(),
                tmpfs_size_bytes: 64 * 1024 * 1024,
                creation_timeout_secs: 60,
            },
            discovery: DiscoveryConfig {
                tools_dir: PathBuf::from("tools"),
                debounce_ms: 500,
                interpreter: "python3".into(),
                tool_timeout_secs: 60,
                watch: true,
            },
            logging: LoggingConfig {
                filter: "info,agent_sandbox=debug".into(),
                json: false,
            },
        }
    }
}
