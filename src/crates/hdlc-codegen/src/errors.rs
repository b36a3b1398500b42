// src/errors.rs
//! Lowering and evaluation errors.
//!
//! [`CodegenError`] is a contract violation: the tree handed to lowering was
//! not fully analysed, or the backend failed. [`EvalError`] is the outcome of
//! running well-formed code that trapped or ran out of resources.
//!
//! Error code ranges:
//! - E2xxx: Semantic errors
//! - E3xxx: Codegen errors (this module)
//! - E4xxx: Elaboration errors

use std::fmt;

use hdlc_identity::{Ident, Loc};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone)]
pub enum CodegenErrorKind {
    /// Construct the lowering does not handle
    UnsupportedFeature {
        feature: &'static str,
        context: Option<String>,
    },

    /// Wrong number of arguments in a call
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    /// Function, variable or type not found
    NotFound { kind: &'static str, name: String },

    /// Internal invariant violation
    InternalError {
        message: &'static str,
        context: Option<String>,
    },

    /// Required resource not available
    MissingResource {
        resource: &'static str,
        context: Option<String>,
    },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct CodegenError {
    pub kind: CodegenErrorKind,
    pub loc: Option<Loc>,
}

impl CodegenError {
    pub fn unsupported(feature: &'static str) -> Self {
        CodegenErrorKind::UnsupportedFeature {
            feature,
            context: None,
        }
        .into()
    }

    pub fn unsupported_with_context(feature: &'static str, context: impl Into<String>) -> Self {
        CodegenErrorKind::UnsupportedFeature {
            feature,
            context: Some(context.into()),
        }
        .into()
    }

    pub fn arg_count(function: impl Into<String>, expected: usize, found: usize) -> Self {
        CodegenErrorKind::ArgumentCount {
            function: function.into(),
            expected,
            found,
        }
        .into()
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CodegenErrorKind::NotFound {
            kind,
            name: name.into(),
        }
        .into()
    }

    pub fn internal(message: &'static str) -> Self {
        CodegenErrorKind::InternalError {
            message,
            context: None,
        }
        .into()
    }

    pub fn internal_with_context(message: &'static str, context: impl Into<String>) -> Self {
        CodegenErrorKind::InternalError {
            message,
            context: Some(context.into()),
        }
        .into()
    }

    /// Wrap a Cranelift module error
    pub fn cranelift(e: impl fmt::Display) -> Self {
        CodegenErrorKind::InternalError {
            message: "cranelift error",
            context: Some(e.to_string()),
        }
        .into()
    }

    pub fn missing_resource(resource: &'static str, context: impl Into<String>) -> Self {
        CodegenErrorKind::MissingResource {
            resource,
            context: Some(context.into()),
        }
        .into()
    }

    /// Attach a source location; an existing one is kept.
    pub fn with_loc(mut self, loc: Loc) -> Self {
        if self.loc.is_none() && !loc.is_invalid() {
            self.loc = Some(loc);
        }
        self
    }
}

impl From<CodegenErrorKind> for CodegenError {
    fn from(kind: CodegenErrorKind) -> Self {
        CodegenError { kind, loc: None }
    }
}

impl Diagnostic for CodegenError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code: &'static str = match &self.kind {
            CodegenErrorKind::UnsupportedFeature { .. } => "E3001",
            CodegenErrorKind::ArgumentCount { .. } => "E3002",
            CodegenErrorKind::NotFound { .. } => "E3004",
            CodegenErrorKind::InternalError { .. } => "E3005",
            CodegenErrorKind::MissingResource { .. } => "E3006",
        };
        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.loc
            .map(|loc| Box::new(format!("at {loc}")) as Box<dyn fmt::Display>)
    }
}

impl fmt::Display for CodegenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenErrorKind::UnsupportedFeature { feature, context } => {
                write!(f, "unsupported feature: {}", feature)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            CodegenErrorKind::ArgumentCount {
                function,
                expected,
                found,
            } => write!(
                f,
                "{} expects {} argument(s), got {}",
                function, expected, found
            ),
            CodegenErrorKind::NotFound { kind, name } => write!(f, "{} not found: {}", kind, name),
            CodegenErrorKind::InternalError { message, context } => {
                write!(f, "internal error: {}", message)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            CodegenErrorKind::MissingResource { resource, context } => {
                write!(f, "missing resource: {}", resource)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
        }
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Reason a running evaluation stopped abnormally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrapKind {
    DivZero,
    Overflow,
    IndexFail,
    RangeFail,
    LengthFail,
    AssertFail,
    Unreachable,
    StepLimit,
    RecursionLimit,
}

impl TrapKind {
    /// Traps caused by exhausting evaluator limits rather than by the code.
    pub fn is_resource_exhaustion(self) -> bool {
        matches!(self, TrapKind::StepLimit | TrapKind::RecursionLimit)
    }

    /// Stable number of the trap, shown in evaluation errors.
    pub fn code(self) -> u32 {
        match self {
            TrapKind::DivZero => 0,
            TrapKind::Overflow => 1,
            TrapKind::IndexFail => 2,
            TrapKind::RangeFail => 3,
            TrapKind::LengthFail => 4,
            TrapKind::AssertFail => 5,
            TrapKind::Unreachable => 6,
            TrapKind::StepLimit => 7,
            TrapKind::RecursionLimit => 8,
        }
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TrapKind::DivZero => "division by zero",
            TrapKind::Overflow => "value out of range",
            TrapKind::IndexFail => "index out of bounds",
            TrapKind::RangeFail => "value outside subtype range",
            TrapKind::LengthFail => "array length mismatch",
            TrapKind::AssertFail => "assertion violation",
            TrapKind::Unreachable => "reached end of function without return",
            TrapKind::StepLimit => "evaluation step limit exceeded",
            TrapKind::RecursionLimit => "evaluation recursion depth exceeded",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("{kind} at {loc} (trap {})", .kind.code())]
    Trap { kind: TrapKind, loc: Loc },

    #[error("function {0} is not registered with the evaluator")]
    UnknownFunction(Ident),

    #[error("{function} expects {expected} argument(s), got {found}")]
    ArgumentCount {
        function: Ident,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl EvalError {
    pub fn trap(&self) -> Option<TrapKind> {
        match self {
            EvalError::Trap { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn loc(&self) -> Option<Loc> {
        match self {
            EvalError::Trap { loc, .. } => Some(*loc),
            EvalError::Codegen(e) => e.loc,
            _ => None,
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use hdlc_identity::FileRef;

    use super::*;

    #[test]
    fn trap_errors_name_their_trap_code() {
        let loc = Loc::point(FileRef::intern("trap.vhd"), 3, 7);
        let err = EvalError::Trap {
            kind: TrapKind::IndexFail,
            loc,
        };
        assert_eq!(err.to_string(), "index out of bounds at trap.vhd:3:7 (trap 2)");
        assert_eq!(TrapKind::DivZero.code(), 0);
        assert_eq!(TrapKind::RecursionLimit.code(), 8);
    }
}
