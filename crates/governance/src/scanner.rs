//! Static import scanner for tool sources.
//!
//! Sources are parsed, never executed. The outcome of a scan is either a
//! [`VettedModule`], which carries the exact text that was checked and is
//! the only thing the loader will hand to an interpreter, or a rejection.

use agent_sandbox_core::config::ScanMode;
use agent_sandbox_core::{ImportViolation, Result};

use crate::policy::SecurityPolicy;
use crate::python::{EntryPoint, ImportRef, ParsedModule};

/// Every banned reference found in one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub violations: Vec<ImportViolation>,
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// One line per violation, for load-error messages.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Scan a source against the policy's banned set.
///
/// Fails with `Error::Syntax` when the source does not parse.
pub fn scan(file: &str, source: &str, policy: &SecurityPolicy) -> Result<ScanResult> {
    let module = ParsedModule::parse(file, source)?;
    Ok(scan_module(&module, policy))
}

/// Scan an already-parsed module.
pub fn scan_module(module: &ParsedModule, policy: &SecurityPolicy) -> ScanResult {
    let violations = module
        .imports()
        .into_iter()
        .filter_map(|import| violation(&import, policy))
        .collect();
    ScanResult { violations }
}

fn violation(import: &ImportRef, policy: &SecurityPolicy) -> Option<ImportViolation> {
    let banned = policy.banned_entry(&import.module)?;
    Some(ImportViolation {
        module: import.module.clone(),
        banned: banned.to_string(),
        line: import.line,
        form: import.form.as_str().to_string(),
    })
}

/// Verdict on a candidate tool source.
#[derive(Debug)]
pub enum ScanDecision {
    /// Cleared for loading. Under warn mode `warnings` may be non-empty.
    Approved(VettedModule),
    /// Strict mode found banned imports.
    Rejected(ScanResult),
}

/// A module that passed the scanner.
///
/// Only [`evaluate`] constructs one, so holding a `VettedModule` means the
/// text in [`source`](Self::source) is exactly what was checked.
#[derive(Debug, Clone)]
pub struct VettedModule {
    module: ParsedModule,
    warnings: Vec<ImportViolation>,
}

impl VettedModule {
    pub fn file(&self) -> &str {
        self.module.file()
    }

    pub fn source(&self) -> &str {
        self.module.source()
    }

    /// Violations tolerated under warn mode.
    pub fn warnings(&self) -> &[ImportViolation] {
        &self.warnings
    }

    pub fn entry_points(&self) -> std::result::Result<Vec<EntryPoint>, String> {
        self.module.entry_points()
    }
}

/// Parse, scan, and apply the policy's mode.
pub fn evaluate(file: &str, source: impl Into<String>, policy: &SecurityPolicy) -> Result<ScanDecision> {
    let module = ParsedModule::parse(file, source)?;
    let result = scan_module(&module, policy);

    if result.is_clean() {
        return Ok(ScanDecision::Approved(VettedModule {
            module,
            warnings: Vec::new(),
        }));
    }

    match policy.mode {
        ScanMode::Strict => {
            tracing::warn!(
                file = %file,
                violations = %result.summary(),
                "Rejected tool source with banned imports"
            );
            Ok(ScanDecision::Rejected(result))
        }
        ScanMode::Warn => {
            tracing::warn!(
                file = %file,
                violations = %result.summary(),
                "Loading tool source with banned imports (warn mode)"
            );
            Ok(ScanDecision::Approved(VettedModule {
                module,
                warnings: result.violations,
            }))
        }
    }
}
