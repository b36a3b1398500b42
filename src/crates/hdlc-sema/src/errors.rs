// src/errors.rs
//! Semantic diagnostics.
//!
//! Error code ranges:
//! - E20xx: names, types and declarations
//! - E25xx: static evaluation and bounds
//!
//! Locations are not part of the diagnostic; the session records them next
//! to the message.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("type of expression is {found} but {expected} was expected")]
    #[diagnostic(code(E2001))]
    TypeMismatch { expected: String, found: String },

    #[error("no visible declaration for {name}")]
    #[diagnostic(code(E2002))]
    UndeclaredName { name: String },

    #[error("ambiguous use of name {name}")]
    #[diagnostic(code(E2003))]
    AmbiguousName { name: String },

    #[error("ambiguous call to {name}")]
    #[diagnostic(code(E2004), help("qualify the arguments to select one overload"))]
    AmbiguousCall { name: String },

    #[error("no matching subprogram {name} [{signature}]")]
    #[diagnostic(code(E2005))]
    NoMatchingOverload { name: String, signature: String },

    #[error("{what} {name} cannot be used in an expression")]
    #[diagnostic(code(E2006))]
    NotAnExpression { what: &'static str, name: String },

    #[error("type of aggregate cannot be determined from the surrounding context")]
    #[diagnostic(code(E2007))]
    AggregateNeedsContext,

    #[error("{name} already declared in this region")]
    #[diagnostic(code(E2008))]
    DuplicateDeclaration { name: String },

    #[error("invalid use of incomplete type {name}")]
    #[diagnostic(code(E2009))]
    IncompleteTypeUse { name: String },

    #[error("type {name} is declared but never completed")]
    #[diagnostic(code(E2010))]
    IncompleteTypeNotCompleted { name: String },

    #[error("design unit {name} not found")]
    #[diagnostic(code(E2011))]
    UnitNotFound { name: String },

    #[error("cannot load design unit {name}: {reason}")]
    #[diagnostic(code(E2012))]
    UnitLoadFailed { name: String, reason: String },

    #[error("no library named {name}")]
    #[diagnostic(code(E2013))]
    LibraryNotFound { name: String },

    #[error("{unit} has no {what} named {name}")]
    #[diagnostic(code(E2014))]
    NoSuchFormal {
        unit: String,
        what: &'static str,
        name: String,
    },

    #[error("{what} {name} is associated more than once")]
    #[diagnostic(code(E2015))]
    DuplicateAssociation { what: &'static str, name: String },

    #[error("missing actual for {what} {name} without a default value")]
    #[diagnostic(code(E2016))]
    MissingActual { what: &'static str, name: String },

    #[error("too many actuals for {unit}: expected at most {expected}, found {found}")]
    #[diagnostic(code(E2017))]
    TooManyActuals {
        unit: String,
        expected: usize,
        found: usize,
    },

    #[error("{name} is not a valid target for {kind}")]
    #[diagnostic(code(E2018))]
    InvalidTarget { kind: &'static str, name: String },

    #[error("cannot assign to input port {name}")]
    #[diagnostic(code(E2019))]
    AssignToInPort { name: String },

    #[error("cannot read output port {name}")]
    #[diagnostic(
        code(E2020),
        help("output ports are readable from VHDL-2008, or relax out-port-read")
    )]
    ReadOutPort { name: String },

    #[error("pure function {caller} cannot call impure function {callee}")]
    #[diagnostic(code(E2021))]
    ImpureCall { caller: String, callee: String },

    #[error("pure function {function} cannot reference {name} declared outside it")]
    #[diagnostic(code(E2022))]
    PureFunctionReference { function: String, name: String },

    #[error("bounds of type {name} must be locally static")]
    #[diagnostic(code(E2023))]
    NotLocallyStatic { name: String },

    #[error("range bounds of universal integer type must be literals or attributes")]
    #[diagnostic(code(E2024), help("relax universal-bound to accept this"))]
    UniversalBound,

    #[error("condition must be of type BOOLEAN but has type {found}")]
    #[diagnostic(code(E2025))]
    ConditionNotBoolean { found: String },

    #[error("wait statement not allowed {context}")]
    #[diagnostic(code(E2026))]
    WaitNotAllowed { context: &'static str },

    #[error("return statement not allowed outside a subprogram")]
    #[diagnostic(code(E2027))]
    ReturnOutsideSubprogram,

    #[error("return statement in function {function} must have a value")]
    #[diagnostic(code(E2028))]
    ReturnWithoutValue { function: String },

    #[error("deferred constant {name} is only allowed in a package")]
    #[diagnostic(code(E2029))]
    DeferredConstantOutsidePackage { name: String },

    #[error("deferred constant {name} has no full declaration in the package body")]
    #[diagnostic(code(E2030))]
    DeferredConstantMissing { name: String },

    #[error("{name} is not a signal")]
    #[diagnostic(code(E2031))]
    NotASignal { name: String },

    #[error("prefix of attribute {attr} must be {expected}")]
    #[diagnostic(code(E2032))]
    BadAttributePrefix { attr: String, expected: &'static str },

    #[error("cannot index non-array type {found}")]
    #[diagnostic(code(E2033))]
    NotAnArray { found: String },

    #[error("type {ty} has no field named {field}")]
    #[diagnostic(code(E2034))]
    NoSuchField { ty: String, field: String },

    #[error("array has {expected} dimension(s) but {found} index expression(s) were given")]
    #[diagnostic(code(E2035))]
    WrongIndexCount { expected: usize, found: usize },

    #[error("{name} does not denote a type")]
    #[diagnostic(code(E2036))]
    NotAType { name: String },

    #[error("{name} is not an entity")]
    #[diagnostic(code(E2037))]
    NotAnEntity { name: String },

    #[error("architecture {arch} of {entity} not found")]
    #[diagnostic(code(E2038))]
    ArchitectureNotFound { entity: String, arch: String },

    #[error("{what} declaration not allowed in {place}")]
    #[diagnostic(code(E2039))]
    DeclarationNotAllowed { what: &'static str, place: &'static str },

    #[error("{what} not allowed in {place}")]
    #[diagnostic(code(E2040))]
    StatementNotAllowed { what: &'static str, place: &'static str },

    #[error("function parameter {name} must have mode in")]
    #[diagnostic(code(E2041))]
    FunctionParamMode { name: String },

    #[error("invalid aggregate: {reason}")]
    #[diagnostic(code(E2042))]
    InvalidAggregate { reason: String },

    #[error("{what} must be of a discrete type but has type {found}")]
    #[diagnostic(code(E2043))]
    NotDiscrete { what: &'static str, found: String },

    #[error("type {ty} cannot be constrained")]
    #[diagnostic(code(E2044))]
    CannotConstrain { ty: String },

    #[error("cannot associate {actual_mode} port {actual} with {formal_mode} port {formal}")]
    #[diagnostic(code(E2045))]
    PortModeMismatch {
        actual: String,
        actual_mode: &'static str,
        formal: String,
        formal_mode: &'static str,
    },

    #[error("actual for port {formal} must be a signal name")]
    #[diagnostic(code(E2046))]
    PortActualNotSignal { formal: String },

    #[error("positional association cannot follow named association")]
    #[diagnostic(code(E2047))]
    PositionalAfterNamed,

    // Static evaluation
    #[error("division by zero")]
    #[diagnostic(code(E2501))]
    DivisionByZero,

    #[error("value out of range in static expression of type {ty}")]
    #[diagnostic(code(E2502))]
    StaticOverflow { ty: String },

    #[error("index out of bounds in static expression")]
    #[diagnostic(code(E2503))]
    StaticIndexFailure,

    #[error("array length mismatch in static expression")]
    #[diagnostic(code(E2504))]
    StaticLengthFailure,

    #[error("assertion failed during static evaluation")]
    #[diagnostic(code(E2505))]
    StaticAssertion,

    #[error("static evaluation exceeded the {limit}")]
    #[diagnostic(
        code(E2506),
        help("raise eval-max-steps or eval-max-depth if the expression is expected to terminate")
    )]
    EvaluationLimit { limit: &'static str },

    #[error("function reached its end without a return during static evaluation")]
    #[diagnostic(code(E2507))]
    MissingReturn,

    // Bounds
    #[error("value {value} out of bounds {low} to {high} for {ty}")]
    #[diagnostic(code(E2510))]
    ValueOutOfBounds {
        value: String,
        low: String,
        high: String,
        ty: String,
    },

    #[error("array index {index} out of bounds {low} to {high}")]
    #[diagnostic(code(E2511))]
    IndexOutOfBounds { index: i64, low: i64, high: i64 },

    #[error("expected {expected} elements in aggregate but have {found}")]
    #[diagnostic(code(E2512))]
    LengthMismatch { expected: i64, found: i64 },

    #[error("range {low} to {high} is outside the bounds of {ty}")]
    #[diagnostic(code(E2513))]
    ConstraintOutOfBounds { low: String, high: String, ty: String },
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SemanticWarning {
    #[error("process {name} has no sensitivity list and no wait statement")]
    #[diagnostic(code(W2001))]
    ProcessNeverWaits { name: String },

    #[error("null range {left} {direction} {right}")]
    #[diagnostic(code(W2501))]
    NullRange {
        left: i64,
        direction: &'static str,
        right: i64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}
