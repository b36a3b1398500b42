//! hdlc semantic analysis: name and type checking, constant folding and
//! static bounds checking of design units.

// Public modules
pub mod errors;
pub mod options;
pub mod session;
pub mod standard;

// Passes
mod analysis;
mod bounds;
mod check;
mod simplify;

// Internal modules
pub(crate) mod predefined;
pub(crate) mod scope;

// Re-exports: public API surface
pub use analysis::{Analysis, Pass, analyse_unit};
pub use bounds::bounds_check_unit;
pub use check::check_unit;
pub use errors::{SemanticError, SemanticWarning, Severity};
pub use options::{CoverMask, OptionError, Options, RelaxRules, StandardRevision};
pub use session::{Diagnostic, ErrorFn, Session};
pub use simplify::{FoldingStats, simplify_unit};
pub use standard::{STANDARD, Standard};
