//! Filesystem containment policy.
//!
//! Resolves requested paths against a session root and rejects anything that
//! would land outside it, whether through `..` segments, absolute paths, or
//! symlinks, as well as anything under a protected subtree such as the tool
//! or agent configuration directory.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Upper bound on symlink hops while resolving one path (mirrors ELOOP).
const MAX_SYMLINK_HOPS: usize = 40;

/// Confines paths to a session root.
///
/// Holds no mutable state; `resolve` is deterministic for identical inputs
/// and identical filesystem state.
#[derive(Debug, Clone)]
pub struct ContainmentGuard {
    root: PathBuf,
    protected: Vec<PathBuf>,
}

impl ContainmentGuard {
    /// Build a guard for `root`.
    ///
    /// Relative `protected` entries are taken relative to the root; absolute
    /// entries are used as-is. Both are resolved to physical paths.
    pub fn new(root: impl AsRef<Path>, protected: &[String]) -> Result<Self> {
        let root = physical_path(&absolutize(root.as_ref())?)?;

        let mut resolved = Vec::with_capacity(protected.len());
        for entry in protected {
            if entry.is_empty() {
                continue;
            }
            reject_malformed(entry)?;
            let entry_path = Path::new(entry);
            let joined = if entry_path.is_absolute() {
                normalize_lexically(entry_path)
            } else {
                root.join(normalize_lexically(entry_path))
            };
            resolved.push(physical_path(&joined)?);
        }

        Ok(Self {
            root,
            protected: resolved,
        })
    }

    /// The physical root every resolved path descends from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to an absolute physical path inside the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        // 1. Reject control characters before touching the filesystem
        reject_malformed(requested)?;

        // 2. Normalize: strip leading separators, collapse `.` and `..`
        let trimmed = requested.trim_start_matches('/');
        let mut normalized = PathBuf::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(c) => normalized.push(c),
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(self.escape(requested));
                    }
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::malformed_path(format!(
                        "unexpected root component in {}",
                        requested
                    )));
                }
            }
        }

        // 3. Resolve symlinks and re-check the physical location
        let physical = physical_path(&self.root.join(&normalized))?;
        if !physical.starts_with(&self.root) {
            tracing::warn!(
                requested = %requested,
                resolved = %physical.display(),
                root = %self.root.display(),
                "Path escapes sandbox root"
            );
            return Err(self.escape(requested));
        }

        // 4. Protected subtrees are never reachable
        if self.protected.iter().any(|p| physical.starts_with(p)) {
            tracing::warn!(requested = %requested, "Access to protected path denied");
            return Err(Error::ProtectedPath(requested.to_string()));
        }

        Ok(physical)
    }

    /// Root-relative, `/`-separated form of a resolved path (`.` for the root).
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Whether a physical path lies under a protected subtree.
    pub fn is_protected(&self, physical: &Path) -> bool {
        self.protected.iter().any(|p| physical.starts_with(p))
    }

    fn escape(&self, requested: &str) -> Error {
        Error::PathEscape {
            path: requested.to_string(),
            root: self.root.clone(),
        }
    }
}

/// Resolve `requested` against `root` with a one-off guard.
pub fn resolve(root: impl AsRef<Path>, requested: &str, protected: &[String]) -> Result<PathBuf> {
    ContainmentGuard::new(root, protected)?.resolve(requested)
}

fn reject_malformed(input: &str) -> Result<()> {
    if let Some(c) = input.chars().find(|c| c.is_control()) {
        return Err(Error::malformed_path(format!(
            "control character {:?} in path",
            c
        )));
    }

    // Cross-platform check: reject Windows-style absolute paths on any OS
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(Error::malformed_path(format!(
            "drive-qualified paths are not allowed: {}",
            input
        )));
    }
    Ok(())
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize_lexically(path))
    } else {
        Ok(normalize_lexically(&std::env::current_dir()?.join(path)))
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` at the top is dropped.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
///
/// Dangling symlinks are followed to their (possibly missing) target so a
/// later create cannot be redirected outside the root.
fn physical_path(path: &Path) -> Result<PathBuf> {
    physical_path_inner(path, 0)
}

fn physical_path_inner(path: &Path, hops: usize) -> Result<PathBuf> {
    if hops > MAX_SYMLINK_HOPS {
        return Err(Error::malformed_path(format!(
            "too many levels of symbolic links: {}",
            path.display()
        )));
    }

    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut resolved) => {
                for name in tail.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // A dangling symlink: follow it rather than trusting its name
                if let Ok(meta) = std::fs::symlink_metadata(&existing) {
                    if meta.file_type().is_symlink() {
                        let target = std::fs::read_link(&existing)?;
                        let parent = existing.parent().unwrap_or_else(|| Path::new("/"));
                        let mut redirected = normalize_lexically(&parent.join(target));
                        for name in tail.iter().rev() {
                            redirected.push(name);
                        }
                        return physical_path_inner(&redirected, hops + 1);
                    }
                }

                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Ok(normalize_lexically(path)),
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
