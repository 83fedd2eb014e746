//! Whole-module static checks for the portable dialect.
//!
//! The verifier never mutates the module; violations accumulate in an
//! [`ErrorReporter`], and fatal-on-error is the reporter's policy, not the
//! verifier's.

use std::fmt;
use std::io;

mod function;
mod module;
pub mod types;

pub use self::function::FunctionVerifier;
pub use self::module::ModuleVerifier;

/// Verifier knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifierConfig {
    /// Permit `dbg` instruction metadata; all other kinds are rejected
    /// either way.
    pub allow_debug_metadata: bool,
}

/// The metadata kind number of `dbg` attachments.
pub const MD_DBG: u32 = 0;

/// One rule violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Name of the offending function, or `None` for module-scope rules.
    pub function: Option<String>,
    /// The violated rule, e.g. `"bad alignment"`.
    pub rule: &'static str,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(
                f,
                "ABI violation: function `{name}`: {}: {}",
                self.rule, self.detail
            ),
            None => write!(f, "ABI violation: module: {}: {}", self.rule, self.detail),
        }
    }
}

/// Verification failed and the reporter was configured to treat that as
/// fatal.
#[derive(Debug, thiserror::Error)]
#[error("{count} ABI verification error(s)")]
pub struct FatalVerifyErrors {
    pub count: usize,
}

/// Collects diagnostics across verifier invocations.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
    fatal: bool,
}

impl ErrorReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat any accumulated error as fatal in
    /// [`ErrorReporter::check_for_fatal_errors`].
    #[must_use]
    pub fn with_fatal_errors(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn add_error(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(%diagnostic, "abi violation");
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn print_errors(&self, out: &mut impl io::Write) -> io::Result<()> {
        for diagnostic in &self.diagnostics {
            writeln!(out, "{diagnostic}")?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.diagnostics.clear();
    }

    /// In fatal mode, error out once anything has been reported.
    pub fn check_for_fatal_errors(&self) -> Result<(), FatalVerifyErrors> {
        if self.fatal && !self.diagnostics.is_empty() {
            return Err(FatalVerifyErrors {
                count: self.diagnostics.len(),
            });
        }
        Ok(())
    }
}
