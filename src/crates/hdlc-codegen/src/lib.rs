// src/lib.rs
//
// Compile-time evaluation for the hdlc core: analysed subprograms are lowered
// to a small register IR, run by a frame interpreter and, once hot, compiled
// to native code with Cranelift.

mod arith;
mod errors;
mod eval;
mod interp;
pub mod ir;
pub mod jit;
mod lower;

pub use errors::{CodegenError, CodegenErrorKind, CodegenResult, EvalError, EvalResult, TrapKind};
pub use eval::{EvalOptions, EvalStats, Evaluator};
pub use ir::{ArrayValue, Function, LoweredUnit, RegTy, UnitKey, Value};
pub use jit::{JitContext, NativeFunction, is_eligible};
pub use lower::{lower_function, lower_thunk, lower_unit};
