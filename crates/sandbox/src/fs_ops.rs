//! Native file operations on a session workspace.
//!
//! Every path goes through the session's [`ContainmentGuard`] before any
//! filesystem call. Nothing here shells out. The methods are blocking; the
//! backends run them on the blocking pool.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use agent_sandbox_core::traits::backend::DEFAULT_READ_LIMIT;
use agent_sandbox_core::{
    ContainmentGuard, EditOutcome, Error, FileInfo, GrepMatch, Result, WriteOutcome,
};

/// Lines longer than this are cut in `read` and `grep` output.
pub const MAX_LINE_CHARS: usize = 2000;

/// File operations confined to one session root.
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    guard: ContainmentGuard,
}

impl WorkspaceFs {
    pub fn new(guard: ContainmentGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &ContainmentGuard {
        &self.guard
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    /// `cat -n` style slice: `limit` lines starting at the 0-based `offset`.
    ///
    /// A `limit` of zero means [`DEFAULT_READ_LIMIT`].
    pub fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String> {
        let content = self.read_to_string(path)?;
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };

        let total = content.lines().count();
        if offset > 0 && offset >= total {
            return Err(Error::invalid_request(format!(
                "offset {} is past the end of {} ({} lines)",
                offset, path, total
            )));
        }

        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(idx, line)| format!("{:>6}\t{}", idx + 1, cut_line(line)))
            .collect();
        Ok(numbered.join("\n"))
    }

    /// Whole file as text (lossy UTF-8).
    pub fn read_to_string(&self, path: &str) -> Result<String> {
        let target = self.guard.resolve(path)?;
        if target.is_dir() {
            return Err(Error::invalid_request(format!("{} is a directory", path)));
        }
        let bytes = fs::read(&target).map_err(|e| not_found_or_io(e, path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create or overwrite a file, creating missing parents inside the root.
    pub fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        let target = self.guard.resolve(path)?;
        if target == self.guard.root() || target.is_dir() {
            return Err(Error::invalid_request(format!("{} is a directory", path)));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;

        tracing::debug!(path = %self.guard.relative(&target), bytes = content.len(), "File written");
        Ok(WriteOutcome {
            path: self.guard.relative(&target),
            written: content.len(),
        })
    }

    /// Replace the first (or every) occurrence of `old`. No match is an error.
    pub fn edit(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<EditOutcome> {
        if old.is_empty() {
            return Err(Error::invalid_request("old text must not be empty"));
        }
        let target = self.guard.resolve(path)?;
        let content = fs::read_to_string(&target).map_err(|e| not_found_or_io(e, path))?;

        let found = content.matches(old).count();
        if found == 0 {
            return Err(Error::EditNoMatch {
                path: path.to_string(),
                old: old.to_string(),
            });
        }

        let (updated, replacements) = if replace_all {
            (content.replace(old, new), found)
        } else {
            (content.replacen(old, new, 1), 1)
        };
        fs::write(&target, updated)?;

        Ok(EditOutcome {
            path: self.guard.relative(&target),
            replacements,
        })
    }

    /// Direct children of a directory, sorted by path.
    pub fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.existing_dir(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            if self.guard.is_protected(&entry_path) {
                continue;
            }
            let Ok(meta) = fs::metadata(&entry_path).or_else(|_| entry.metadata()) else {
                continue;
            };
            entries.push(FileInfo {
                path: self.guard.relative(&entry_path),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Files below `path` whose base-relative path matches `pattern`.
    ///
    /// `*` stays within one path segment, `**` crosses directories.
    /// Results are sorted by root-relative path.
    pub fn glob(&self, pattern: &str, path: &str) -> Result<Vec<FileInfo>> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| Error::invalid_request(format!("invalid glob pattern '{}': {}", pattern, e)))?;
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let base = self.existing_dir(path)?;
        let mut matches: Vec<FileInfo> = self
            .walk(&base)
            .filter(|entry| !entry.is_dir)
            .filter(|entry| {
                let rel = relative_to(&base, &entry.path);
                compiled.matches_with(&rel, options)
            })
            .map(|entry| FileInfo {
                path: self.guard.relative(&entry.path),
                is_dir: false,
                size: entry.size,
            })
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matches)
    }

    /// Lines matching a regular expression in the file or tree at `path`.
    ///
    /// Non-UTF-8 files are skipped. Results are sorted by path, then line.
    pub fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| Error::invalid_request(format!("invalid regex '{}': {}", pattern, e)))?;

        let base = self.guard.resolve(path)?;
        if !base.exists() {
            return Err(Error::FileNotFound(path.to_string()));
        }

        let files: Vec<PathBuf> = if base.is_file() {
            vec![base]
        } else {
            self.walk(&base)
                .filter(|entry| !entry.is_dir)
                .map(|entry| entry.path)
                .collect()
        };

        let mut matches = Vec::new();
        for file in files {
            let Ok(bytes) = fs::read(&file) else {
                continue;
            };
            let Ok(text) = std::str::from_utf8(&bytes) else {
                continue;
            };
            let rel = self.guard.relative(&file);
            for (idx, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: rel.clone(),
                        line: idx + 1,
                        text: cut_line(line).to_string(),
                    });
                }
            }
        }
        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }

    /// Lazy depth-first walk below `base`.
    pub fn walk(&self, base: &Path) -> WorkspaceWalker {
        WorkspaceWalker::new(base.to_path_buf(), self.guard.clone())
    }

    fn existing_dir(&self, path: &str) -> Result<PathBuf> {
        let dir = self.guard.resolve(path)?;
        if !dir.exists() {
            return Err(Error::FileNotFound(path.to_string()));
        }
        if !dir.is_dir() {
            return Err(Error::invalid_request(format!("{} is not a directory", path)));
        }
        Ok(dir)
    }
}

fn not_found_or_io(err: std::io::Error, path: &str) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::FileNotFound(path.to_string())
    } else {
        Error::Io(err)
    }
}

fn cut_line(line: &str) -> &str {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn relative_to(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// =============================================================================
// Walker
// =============================================================================

/// One entry produced by [`WorkspaceWalker`].
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Finite, lazy, depth-first walk of a directory tree.
///
/// Directory symlinks are reported but never descended into, and protected
/// subtrees are skipped entirely. Entries come in filesystem order; callers
/// that need determinism sort. [`restart`](Self::restart) begins a fresh pass.
pub struct WorkspaceWalker {
    base: PathBuf,
    guard: ContainmentGuard,
    stack: Vec<fs::ReadDir>,
}

impl WorkspaceWalker {
    fn new(base: PathBuf, guard: ContainmentGuard) -> Self {
        let mut walker = Self {
            base,
            guard,
            stack: Vec::new(),
        };
        walker.restart();
        walker
    }

    /// Start over from the base directory.
    pub fn restart(&mut self) {
        self.stack.clear();
        match fs::read_dir(&self.base) {
            Ok(entries) => self.stack.push(entries),
            Err(e) => {
                tracing::debug!(base = %self.base.display(), error = %e, "Cannot read walk base")
            }
        }
    }
}

impl Iterator for WorkspaceWalker {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            let entries = self.stack.last_mut()?;
            let Some(entry) = entries.next() else {
                self.stack.pop();
                continue;
            };
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            if self.guard.is_protected(&path) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if let Ok(children) = fs::read_dir(&path) {
                    self.stack.push(children);
                }
                return Some(WalkEntry {
                    path,
                    is_dir: true,
                    size: 0,
                });
            }

            // Symlinks are reported with their target's metadata; a symlink
            // to a directory is never followed.
            let meta = if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(meta) => meta,
                    Err(_) => continue,
                }
            } else {
                match entry.metadata() {
                    Ok(meta) => meta,
                    Err(_) => continue,
                }
            };
            if file_type.is_symlink() {
                // Targets outside the root are not reported.
                match fs::canonicalize(&path) {
                    Ok(target) if target.starts_with(self.guard.root()) => {}
                    _ => continue,
                }
            }
            return Some(WalkEntry {
                path,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
    }
}
