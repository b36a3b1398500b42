// src/eval.rs
//! Compile-time evaluator.
//!
//! Registered functions start out interpreted. A function called
//! `jit_threshold` times is compiled to native code when it is eligible (see
//! [`crate::jit::is_eligible`]); both tiers share fuel and depth accounting so
//! a call produces the same value or the same trap whichever tier runs it.

use std::sync::Arc;

use hdlc_identity::{Ident, Loc};
use rustc_hash::FxHashMap;

use crate::errors::{EvalError, EvalResult, TrapKind};
use crate::interp::{self, Host};
use crate::ir::{Function, LoweredUnit, UnitKey, Value};
use crate::jit::{self, JitContext, NativeFunction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalOptions {
    /// Backedges plus calls allowed in one top-level evaluation.
    pub max_steps: u64,
    /// Maximum call nesting.
    pub max_depth: u32,
    /// Calls after which an eligible function is compiled; `None` keeps
    /// everything interpreted.
    pub jit_threshold: Option<u32>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            max_steps: 1_000_000,
            max_depth: 128,
            jit_threshold: Some(16),
        }
    }
}

impl EvalOptions {
    pub fn interpret_only() -> Self {
        EvalOptions {
            jit_threshold: None,
            ..EvalOptions::default()
        }
    }
}

/// Evaluator activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub interpreted_calls: u64,
    pub native_calls: u64,
    pub native_compiled: u64,
    pub invalidations: u64,
}

enum Tier {
    Interpreted,
    Native(NativeFunction),
    /// Not eligible, or compilation failed; never retried.
    InterpretOnly,
}

struct Entry {
    func: Arc<Function>,
    calls: u32,
    tier: Tier,
}

pub struct Evaluator {
    options: EvalOptions,
    functions: FxHashMap<Ident, Entry>,
    /// Registered units and the functions each one owns.
    units: FxHashMap<Ident, (UnitKey, Vec<Ident>)>,
    jit: Option<JitContext>,
    jit_failed: bool,
    stats: EvalStats,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new(EvalOptions::default())
    }
}

impl Evaluator {
    pub fn new(options: EvalOptions) -> Self {
        Evaluator {
            options,
            functions: FxHashMap::default(),
            units: FxHashMap::default(),
            jit: None,
            jit_failed: false,
            stats: EvalStats::default(),
        }
    }

    pub fn options(&self) -> EvalOptions {
        self.options
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    pub fn unit_key(&self, unit: Ident) -> Option<UnitKey> {
        self.units.get(&unit).map(|(key, _)| *key)
    }

    pub fn is_registered(&self, func: Ident) -> bool {
        self.functions.contains_key(&func)
    }

    /// Whether `func` currently runs as native code.
    pub fn is_native(&self, func: Ident) -> bool {
        self.functions
            .get(&func)
            .is_some_and(|e| matches!(e.tier, Tier::Native(_)))
    }

    /// Make a unit's functions callable. A unit registered under the same
    /// name is replaced, dropping its compiled code. Registering the same
    /// unit version again is a no-op.
    pub fn register(&mut self, unit: LoweredUnit) {
        if self.unit_key(unit.name) == Some(unit.key) {
            return;
        }
        self.invalidate(unit.name);
        let names = unit.functions.iter().map(|f| f.name).collect();
        for func in unit.functions {
            self.functions.insert(
                func.name,
                Entry {
                    func,
                    calls: 0,
                    tier: Tier::Interpreted,
                },
            );
        }
        tracing::debug!(unit = %unit.name, generation = unit.key.generation, "unit registered");
        self.units.insert(unit.name, (unit.key, names));
    }

    /// Forget a unit and its compiled code. Returns whether it was registered.
    pub fn invalidate(&mut self, unit: Ident) -> bool {
        let Some((_, names)) = self.units.remove(&unit) else {
            return false;
        };
        for name in names {
            self.functions.remove(&name);
        }
        self.stats.invalidations += 1;
        tracing::debug!(unit = %unit, "unit invalidated");
        true
    }

    /// Call a registered function.
    #[tracing::instrument(skip(self, args), fields(func = %func))]
    pub fn evaluate(&mut self, func: Ident, args: &[Value]) -> EvalResult<Value> {
        let mut act = self.activation();
        act.invoke(func, args.to_vec(), Loc::INVALID)
    }

    /// Run a function that is not registered, such as a lowered constant
    /// expression. Its callees must be registered.
    pub fn evaluate_function(&mut self, func: &Function, args: &[Value]) -> EvalResult<Value> {
        if args.len() != func.params.len() {
            return Err(EvalError::ArgumentCount {
                function: func.name,
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let mut act = self.activation();
        act.eval.stats.interpreted_calls += 1;
        act.depth = 1;
        interp::interpret(func, args.to_vec(), &mut act)
    }

    /// Register `unit` if needed and call its first function.
    pub fn evaluate_unit(&mut self, unit: &LoweredUnit, args: &[Value]) -> EvalResult<Value> {
        let entry = unit
            .functions
            .first()
            .map(|f| f.name)
            .ok_or(EvalError::UnknownFunction(unit.name))?;
        self.register(unit.clone());
        self.evaluate(entry, args)
    }

    fn activation(&mut self) -> Activation<'_> {
        Activation {
            fuel: self.options.max_steps,
            depth: 0,
            eval: self,
        }
    }

    fn jit_context(&mut self) -> Option<&mut JitContext> {
        if self.jit.is_none() && !self.jit_failed {
            match JitContext::new() {
                Ok(ctx) => self.jit = Some(ctx),
                Err(e) => {
                    tracing::warn!(error = %e, "native tier unavailable, interpreting only");
                    self.jit_failed = true;
                }
            }
        }
        self.jit.as_mut()
    }

    /// Compile `name` if it has become hot.
    fn maybe_tier_up(&mut self, name: Ident) {
        let Some(threshold) = self.options.jit_threshold else {
            return;
        };
        let func = match self.functions.get(&name) {
            Some(e) if matches!(e.tier, Tier::Interpreted) && e.calls >= threshold => e.func.clone(),
            _ => return,
        };
        let tier = if !jit::is_eligible(&func) {
            Tier::InterpretOnly
        } else {
            match self.jit_context().map(|jit| jit.compile(&func)) {
                Some(Ok(native)) => {
                    self.stats.native_compiled += 1;
                    Tier::Native(native)
                }
                Some(Err(e)) => {
                    tracing::warn!(function = %name, error = %e, "native compilation failed");
                    Tier::InterpretOnly
                }
                None => Tier::InterpretOnly,
            }
        };
        if let Some(entry) = self.functions.get_mut(&name) {
            entry.tier = tier;
        }
    }
}

/// One top-level evaluation: fuel and depth are shared by every call it
/// makes.
struct Activation<'e> {
    eval: &'e mut Evaluator,
    fuel: u64,
    depth: u32,
}

impl Activation<'_> {
    fn invoke(&mut self, name: Ident, args: Vec<Value>, loc: Loc) -> EvalResult<Value> {
        let entry = self
            .eval
            .functions
            .get_mut(&name)
            .ok_or(EvalError::UnknownFunction(name))?;
        if args.len() != entry.func.params.len() {
            return Err(EvalError::ArgumentCount {
                function: name,
                expected: entry.func.params.len(),
                found: args.len(),
            });
        }
        let func = entry.func.clone();
        let loc = if loc.is_invalid() { func.loc } else { loc };
        if self.depth >= self.eval.options.max_depth {
            return Err(EvalError::Trap {
                kind: TrapKind::RecursionLimit,
                loc,
            });
        }
        entry.calls = entry.calls.saturating_add(1);
        self.eval.maybe_tier_up(name);

        if let Some(Entry {
            tier: Tier::Native(native),
            ..
        }) = self.eval.functions.get(&name)
        {
            let ints: Vec<i64> = args
                .iter()
                .map(|a| a.as_int().unwrap_or_default())
                .collect();
            let mut fuel = i64::try_from(self.fuel).unwrap_or(i64::MAX);
            let result = native.call(&ints, &mut fuel);
            self.fuel = u64::try_from(fuel).unwrap_or(0);
            self.eval.stats.native_calls += 1;
            return result
                .map(Value::Int)
                .map_err(|(kind, loc)| EvalError::Trap { kind, loc });
        }

        self.eval.stats.interpreted_calls += 1;
        self.depth += 1;
        let result = interp::interpret(&func, args, self);
        self.depth -= 1;
        result
    }
}

impl Host for Activation<'_> {
    fn step(&mut self, loc: Loc) -> EvalResult<()> {
        if self.fuel == 0 {
            return Err(EvalError::Trap {
                kind: TrapKind::StepLimit,
                loc,
            });
        }
        self.fuel -= 1;
        Ok(())
    }

    fn call(&mut self, func: Ident, args: Vec<Value>, loc: Loc) -> EvalResult<Value> {
        self.invoke(func, args, loc)
    }
}

#[cfg(test)]
mod tests;
