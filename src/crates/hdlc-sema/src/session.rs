// src/session.rs
//! Diagnostic sink and error counter for one analysis session.

use std::fmt;

use hdlc_identity::Loc;
use miette::Diagnostic as _;

use crate::errors::{SemanticError, SemanticWarning, Severity};
use crate::options::Options;

/// Receives every reported error as `(message, location)`.
pub type ErrorFn = Box<dyn FnMut(&str, Loc) + Send>;

/// A reported diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub loc: Loc,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.code {
            Some(code) => write!(f, "{}: {what}[{code}]: {}", self.loc, self.message),
            None => write!(f, "{}: {what}: {}", self.loc, self.message),
        }
    }
}

pub struct Session {
    options: Options,
    error_fn: Option<ErrorFn>,
    diagnostics: Vec<Diagnostic>,
    errors: u32,
    warnings: u32,
    suppressed: u32,
}

impl Session {
    pub fn new(options: Options) -> Session {
        Session {
            options,
            error_fn: None,
            diagnostics: Vec::new(),
            errors: 0,
            warnings: 0,
            suppressed: 0,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Install an error handler, returning the previous one. `None` restores
    /// the default handler, which logs through `tracing`.
    pub fn set_error_fn(&mut self, handler: Option<ErrorFn>) -> Option<ErrorFn> {
        std::mem::replace(&mut self.error_fn, handler)
    }

    /// Report an error. Past the error limit the error is counted but
    /// neither recorded nor passed to the handler.
    pub fn error(&mut self, error: SemanticError, loc: Loc) {
        self.errors += 1;
        if self.over_limit() {
            self.suppressed += 1;
            return;
        }
        let message = error.to_string();
        let code = error.code().map(|c| c.to_string());
        match &mut self.error_fn {
            Some(handler) => handler(&message, loc),
            None => tracing::error!(%loc, code = code.as_deref().unwrap_or(""), "{message}"),
        }
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            code,
            message,
            loc,
        });
    }

    pub fn warning(&mut self, warning: SemanticWarning, loc: Loc) {
        if self.limit_reached() {
            return;
        }
        self.warnings += 1;
        let message = warning.to_string();
        let code = warning.code().map(|c| c.to_string());
        tracing::warn!(%loc, code = code.as_deref().unwrap_or(""), "{message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            code,
            message,
            loc,
        });
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    /// Errors counted but not reported because of the error limit.
    pub fn suppressed_count(&self) -> u32 {
        self.suppressed
    }

    /// Start a new unit or session: counters go back to zero. Recorded
    /// diagnostics are kept.
    pub fn reset_error_count(&mut self) {
        self.errors = 0;
        self.warnings = 0;
        self.suppressed = 0;
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Whether the error limit has been reached; passes stop early once it
    /// has.
    pub fn limit_reached(&self) -> bool {
        self.options.error_limit.is_some_and(|limit| self.errors >= limit)
    }

    fn over_limit(&self) -> bool {
        self.options.error_limit.is_some_and(|limit| self.errors > limit)
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Options::default())
    }
}
