use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Commands
// =============================================================================

/// A command as supplied at the API boundary.
///
/// Either form ends up as an argument vector; nothing is ever handed to a
/// shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Argv(Vec<String>),
    Line(String),
}

impl CommandLine {
    /// Tokenize into an argument vector.
    ///
    /// Quoting is honored; variables and globs are passed through literally.
    pub fn into_argv(self) -> Result<Vec<String>> {
        let argv = match self {
            Self::Argv(argv) => argv,
            Self::Line(line) => shell_words::split(&line)
                .map_err(|e| Error::invalid_request(format!("Cannot tokenize command: {}", e)))?,
        };

        if argv.is_empty() || argv[0].is_empty() {
            return Err(Error::invalid_request("command is empty"));
        }
        Ok(argv)
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(argv: Vec<String>) -> Self {
        Self::Argv(argv)
    }
}

impl From<&[&str]> for CommandLine {
    fn from(argv: &[&str]) -> Self {
        Self::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(argv: [&str; N]) -> Self {
        Self::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

// =============================================================================
// Execution Results
// =============================================================================

/// Result of running one command in a sandbox session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Merged stdout/stderr, in arrival order, capped at the output ceiling.
    pub output: String,
    /// `None` when the command was killed on timeout.
    pub exit_code: Option<i64>,
    /// Bytes beyond the ceiling were dropped.
    pub truncated: bool,
    pub timed_out: bool,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Whether the execution was successful (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Output accumulator with a hard byte ceiling.
///
/// Bytes past the ceiling are discarded as they arrive, so memory stays
/// bounded however much a command prints.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    limit: usize,
    data: Vec<u8>,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::with_capacity(limit.min(8 * 1024)),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.data.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.data.extend_from_slice(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Finish into an `ExecutionResult`.
    pub fn into_result(
        self,
        exit_code: Option<i64>,
        timed_out: bool,
        elapsed: Duration,
    ) -> ExecutionResult {
        ExecutionResult {
            output: String::from_utf8_lossy(&self.data).into_owned(),
            exit_code,
            truncated: self.truncated,
            timed_out,
            elapsed,
        }
    }
}

// =============================================================================
// File Operation Results
// =============================================================================

/// An entry produced by list/glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Root-relative, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// One line matched by grep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    /// Root-relative, `/`-separated.
    pub path: String,
    /// 1-based.
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub path: String,
    pub written: usize,
}

/// Result of a successful edit. Zero matches is an error, never an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub path: String,
    pub replacements: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_tokenization() {
        let argv = CommandLine::from(r#"echo "hello world" 'a b' $HOME *.rs"#)
            .into_argv()
            .unwrap();
        assert_eq!(argv, vec!["echo", "hello world", "a b", "$HOME", "*.rs"]);
    }

    #[test]
    fn test_metacharacters_stay_literal() {
        let argv = CommandLine::from("echo hi; rm -rf / && true")
            .into_argv()
            .unwrap();
        assert_eq!(argv, vec!["echo", "hi;", "rm", "-rf", "/", "&&", "true"]);
    }

    #[test]
    fn test_empty_and_unbalanced_commands_rejected() {
        assert!(CommandLine::from("").into_argv().is_err());
        assert!(CommandLine::from("   ").into_argv().is_err());
        assert!(CommandLine::Argv(vec![]).into_argv().is_err());
        assert!(CommandLine::from("echo 'unterminated").into_argv().is_err());
    }

    #[test]
    fn test_output_buffer_ceiling() {
        let mut buf = OutputBuffer::new(10);
        buf.push(b"12345");
        buf.push(b"67890");
        assert!(!buf.is_truncated());
        buf.push(b"x");
        assert!(buf.is_truncated());
        let result = buf.into_result(Some(0), false, Duration::ZERO);
        assert_eq!(result.output, "1234567890");
        assert!(result.truncated);
    }

    #[test]
    fn test_output_buffer_at_ceiling_is_not_truncated() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"abcd");
        assert_eq!(buf.len(), 4);
        assert!(!buf.is_truncated());
    }

    #[test]
    fn test_execution_result_success() {
        let ok = OutputBuffer::new(8).into_result(Some(0), false, Duration::ZERO);
        assert!(ok.success());
        let timed_out = OutputBuffer::new(8).into_result(None, true, Duration::ZERO);
        assert!(!timed_out.success());
    }
}
