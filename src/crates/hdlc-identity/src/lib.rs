// src/lib.rs
//
// Shared identity primitives for the hdlc core: interned identifiers and
// packed source locations. Both tables are process-wide and append-only;
// everything else in the compiler is session scoped.

mod ident;
mod loc;

pub use ident::{Ident, IdentTable};
pub use loc::{FileRef, Loc};
