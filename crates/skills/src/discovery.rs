//! Tool source discovery.
//!
//! Enumerates the tool directory, runs each source through the scanner and
//! extracts its entry points. Nothing here executes tool code: the output is
//! a list of [`DiscoveredTool`]s, each carrying the [`VettedModule`] it came
//! from, plus a load error for every file that did not make it.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use agent_sandbox_core::{Error, ImportViolation, LoadErrorKind, ToolLoadError};
use agent_sandbox_governance::{evaluate, EntryPoint, ScanDecision, SecurityPolicy, VettedModule};

/// Largest source that fits in one interpreter argument: Linux
/// `MAX_ARG_STRLEN` (32 pages) less the terminating NUL.
pub const MAX_SOURCE_BYTES: usize = 32 * 4096 - 1;

/// An entry point that passed scanning and validation.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub entry: EntryPoint,
    pub file: PathBuf,
    /// Module name (file stem).
    pub module: String,
    pub source: Arc<VettedModule>,
}

/// A banned import tolerated under warn mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub file: PathBuf,
    #[serde(flatten)]
    pub violation: ImportViolation,
}

/// Result of one pass over the tool directory.
#[derive(Debug, Default)]
pub struct Discovery {
    pub tools: Vec<DiscoveredTool>,
    pub errors: Vec<ToolLoadError>,
    pub warnings: Vec<ScanWarning>,
}

/// `*.py` files directly inside `dir`, sorted, skipping names that start
/// with `_`. A missing directory has no sources.
pub fn tool_sources(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || !name.ends_with(".py") || !path.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Scan every source in `dir` and collect its entry points.
///
/// One bad file never stops the pass. Tool names must be unique across the
/// directory; the first file in sorted order keeps a contested name.
pub fn discover(dir: &Path, policy: &SecurityPolicy) -> Discovery {
    let mut discovery = Discovery::default();

    let files = match tool_sources(dir) {
        Ok(files) => files,
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Failed to read tool directory");
            discovery.errors.push(ToolLoadError::new(
                dir,
                LoadErrorKind::Import,
                format!("failed to read tool directory: {}", e),
            ));
            return discovery;
        }
    };

    let mut owners: HashMap<String, PathBuf> = HashMap::new();
    for file in files {
        let loaded = match load_file(&file, policy) {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(
                    file = %file.display(),
                    error_type = error.error_type.as_str(),
                    message = %error.message,
                    "Tool source failed to load"
                );
                discovery.errors.push(error);
                continue;
            }
        };

        if let Some((name, owner)) = loaded
            .tools
            .iter()
            .find_map(|t| owners.get(&t.entry.name).map(|o| (&t.entry.name, o)))
        {
            discovery.errors.push(ToolLoadError::new(
                &file,
                LoadErrorKind::Import,
                format!("tool '{}' is already defined in {}", name, owner.display()),
            ));
            continue;
        }

        for tool in &loaded.tools {
            owners.insert(tool.entry.name.clone(), file.clone());
        }
        discovery.warnings.extend(loaded.warnings);
        discovery.tools.extend(loaded.tools);
    }

    tracing::debug!(
        dir = %dir.display(),
        tools = discovery.tools.len(),
        errors = discovery.errors.len(),
        "Tool discovery finished"
    );
    discovery
}

/// Tools and warnings from a single source.
#[derive(Debug, Default)]
pub struct LoadedFile {
    pub tools: Vec<DiscoveredTool>,
    pub warnings: Vec<ScanWarning>,
}

/// Read, scan and validate one source.
pub fn load_file(file: &Path, policy: &SecurityPolicy) -> Result<LoadedFile, ToolLoadError> {
    let source = std::fs::read_to_string(file).map_err(|e| {
        ToolLoadError::new(file, LoadErrorKind::Import, format!("failed to read source: {}", e))
    })?;
    // The source is passed to the interpreter as a single argv element
    if source.len() > MAX_SOURCE_BYTES {
        return Err(ToolLoadError::new(
            file,
            LoadErrorKind::Import,
            format!(
                "source is {} bytes, over the {} byte limit for tool sources",
                source.len(),
                MAX_SOURCE_BYTES
            ),
        ));
    }

    let label = file.display().to_string();
    let vetted = match evaluate(&label, source, policy) {
        Ok(ScanDecision::Approved(vetted)) => Arc::new(vetted),
        Ok(ScanDecision::Rejected(result)) => {
            return Err(ToolLoadError::new(
                file,
                LoadErrorKind::Security,
                format!("banned imports: {}", result.summary()),
            ));
        }
        Err(Error::Syntax { message, .. }) => {
            return Err(ToolLoadError::new(file, LoadErrorKind::Syntax, message));
        }
        Err(e) => return Err(ToolLoadError::new(file, LoadErrorKind::Import, e.to_string())),
    };

    let entries = vetted
        .entry_points()
        .map_err(|message| ToolLoadError::new(file, LoadErrorKind::Import, message))?;

    let mut seen: Vec<&str> = Vec::new();
    for entry in &entries {
        if seen.contains(&entry.name.as_str()) {
            return Err(ToolLoadError::new(
                file,
                LoadErrorKind::Import,
                format!("tool '{}' is declared more than once", entry.name),
            ));
        }
        seen.push(&entry.name);
    }

    let module = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let warnings = vetted
        .warnings()
        .iter()
        .map(|violation| ScanWarning {
            file: file.to_path_buf(),
            violation: violation.clone(),
        })
        .collect();

    let tools = entries
        .into_iter()
        .map(|entry| DiscoveredTool {
            entry,
            file: file.to_path_buf(),
            module: module.clone(),
            source: vetted.clone(),
        })
        .collect();

    Ok(LoadedFile { tools, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    const CLEAN: &str = "from agent_tools import tool\n\n@tool\ndef greet(name: str) -> str:\n    \"\"\"Say hello.\"\"\"\n    return 'hello ' + name\n";

    #[test]
    fn test_sources_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.py", CLEAN);
        write(&dir, "a.py", CLEAN);
        write(&dir, "_private.py", CLEAN);
        write(&dir, "notes.txt", "hi");
        std::fs::create_dir(dir.path().join("nested.py")).unwrap();

        let names: Vec<String> = tool_sources(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_oversized_source_is_an_import_error() {
        let dir = TempDir::new().unwrap();
        let padding = "# padding\n".repeat(MAX_SOURCE_BYTES / 10 + 1);
        write(&dir, "big.py", &format!("{}{}", padding, CLEAN));
        write(&dir, "small.py", CLEAN);

        let err = load_file(&dir.path().join("big.py"), &SecurityPolicy::strict()).unwrap_err();
        assert_eq!(err.error_type, LoadErrorKind::Import);
        assert!(err.message.contains("byte limit"));

        // One oversized file does not hide the rest of the directory
        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert_eq!(discovery.tools.len(), 1);
        assert_eq!(discovery.errors.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let discovery = discover(&dir.path().join("absent"), &SecurityPolicy::strict());
        assert!(discovery.tools.is_empty());
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_clean_and_banned_under_strict() {
        let dir = TempDir::new().unwrap();
        write(&dir, "clean.py", CLEAN);
        write(
            &dir,
            "evil.py",
            "import subprocess\n\n@tool\ndef run(cmd: str):\n    return subprocess.check_output(cmd)\n",
        );

        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert_eq!(discovery.tools.len(), 1);
        assert_eq!(discovery.tools[0].entry.name, "greet");
        assert_eq!(discovery.tools[0].module, "clean");
        assert_eq!(discovery.errors.len(), 1);
        assert_eq!(discovery.errors[0].error_type, LoadErrorKind::Security);
        assert!(discovery.errors[0].file.ends_with("evil.py"));
    }

    #[test]
    fn test_warn_mode_loads_with_warning() {
        let dir = TempDir::new().unwrap();
        write(&dir, "paths.py", "import os\n\n@tool\ndef cwd():\n    return os.getcwd()\n");

        let strict = discover(dir.path(), &SecurityPolicy::strict());
        assert!(strict.tools.is_empty());
        assert_eq!(strict.errors.len(), 1);

        let warn = discover(dir.path(), &SecurityPolicy::warn());
        assert_eq!(warn.tools.len(), 1);
        assert!(warn.errors.is_empty());
        assert_eq!(warn.warnings.len(), 1);
        assert_eq!(warn.warnings[0].violation.module, "os");
    }

    #[test]
    fn test_syntax_error_kind() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.py", "def oops(:\n    pass\n");
        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert_eq!(discovery.errors.len(), 1);
        assert_eq!(discovery.errors[0].error_type, LoadErrorKind::Syntax);
    }

    #[test]
    fn test_duplicate_names_across_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", CLEAN);
        write(&dir, "b.py", CLEAN);
        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert_eq!(discovery.tools.len(), 1);
        assert!(discovery.tools[0].file.ends_with("a.py"));
        assert_eq!(discovery.errors.len(), 1);
        assert_eq!(discovery.errors[0].error_type, LoadErrorKind::Import);
    }

    #[test]
    fn test_duplicate_names_within_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "twice.py",
            "@tool('same')\ndef a():\n    pass\n\n@tool('same')\ndef b():\n    pass\n",
        );
        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert!(discovery.tools.is_empty());
        assert_eq!(discovery.errors[0].error_type, LoadErrorKind::Import);
    }

    #[test]
    fn test_unreadable_source_is_import_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("binary.py"), [0xff, 0xfe, 0x00]).unwrap();
        let discovery = discover(dir.path(), &SecurityPolicy::strict());
        assert_eq!(discovery.errors.len(), 1);
        assert_eq!(discovery.errors[0].error_type, LoadErrorKind::Import);
    }
}
