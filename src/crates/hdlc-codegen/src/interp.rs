// src/interp.rs
//
// Frame interpreter for lowered IR. Calls and step accounting go through the
// `Host` so the evaluator can dispatch callees to native code and enforce its
// limits in one place.

use std::sync::Arc;

use hdlc_identity::{Ident, Loc};

use crate::arith;
use crate::errors::{EvalError, EvalResult, TrapKind};
use crate::ir::{ArrayValue, BlockId, BoundKind, Function, Op, Reg, Terminator, Value};

pub(crate) trait Host {
    /// Consume one unit of fuel.
    fn step(&mut self, loc: Loc) -> EvalResult<()>;

    fn call(&mut self, func: Ident, args: Vec<Value>, loc: Loc) -> EvalResult<Value>;
}

/// Activation record of one interpreted call.
struct Frame {
    regs: Vec<Value>,
}

impl Frame {
    fn get(&self, reg: Reg) -> &Value {
        &self.regs[reg.0 as usize]
    }

    fn set(&mut self, reg: Reg, value: Value) {
        self.regs[reg.0 as usize] = value;
    }

    fn int(&self, reg: Reg) -> i64 {
        match self.get(reg) {
            Value::Int(v) => *v,
            other => panic!("INTERNAL: r{} holds {:?}, expected an integer", reg.0, other.ty()),
        }
    }

    fn array(&self, reg: Reg) -> &ArrayValue {
        match self.get(reg) {
            Value::Array(a) => a,
            other => panic!("INTERNAL: r{} holds {:?}, expected an array", reg.0, other.ty()),
        }
    }
}

fn trap(kind: TrapKind, loc: Loc) -> EvalError {
    EvalError::Trap { kind, loc }
}

pub(crate) fn interpret(func: &Function, args: Vec<Value>, host: &mut dyn Host) -> EvalResult<Value> {
    let mut frame = Frame {
        regs: func.regs.iter().map(|&ty| Value::zero(ty)).collect(),
    };
    for (&param, arg) in func.params.iter().zip(args) {
        frame.set(param, arg);
    }

    let mut current = BlockId(0);
    loop {
        let block = &func.blocks[current.index()];
        for op in &block.ops {
            exec(op, &mut frame, host)?;
        }
        let next = match &block.term {
            Terminator::Jump(target) => *target,
            Terminator::Branch {
                cond,
                then,
                otherwise,
            } => {
                if frame.int(*cond) != 0 {
                    *then
                } else {
                    *otherwise
                }
            }
            Terminator::Return(reg) => {
                let value = std::mem::replace(&mut frame.regs[reg.0 as usize], Value::Int(0));
                return Ok(value);
            }
            Terminator::Trap { kind, loc } => return Err(trap(*kind, *loc)),
        };
        if Function::is_backedge(current, next) {
            host.step(func.loc)?;
        }
        current = next;
    }
}

fn exec(op: &Op, frame: &mut Frame, host: &mut dyn Host) -> EvalResult<()> {
    match op {
        Op::Const { dst, value } => frame.set(*dst, value.clone()),
        Op::Copy { dst, src } => {
            let value = frame.get(*src).clone();
            frame.set(*dst, value);
        }
        Op::Binary {
            dst,
            op,
            lhs,
            rhs,
            range,
            loc,
        } => {
            let value = arith::binary(*op, frame.get(*lhs), frame.get(*rhs), *range)
                .map_err(|kind| trap(kind, *loc))?;
            frame.set(*dst, value);
        }
        Op::Unary {
            dst,
            op,
            src,
            range,
            loc,
        } => {
            let value = arith::unary(*op, frame.get(*src), *range).map_err(|kind| trap(kind, *loc))?;
            frame.set(*dst, value);
        }
        Op::Cmp { dst, op, lhs, rhs } => {
            let result = arith::compare(*op, frame.get(*lhs), frame.get(*rhs));
            frame.set(*dst, Value::bool(result));
        }
        Op::RangeCheck {
            value,
            low,
            high,
            loc,
        } => {
            let v = frame.int(*value);
            if v < *low || v > *high {
                return Err(trap(TrapKind::RangeFail, *loc));
            }
        }
        Op::Index {
            dst,
            array,
            index,
            loc,
        } => {
            let idx = frame.int(*index);
            let arr = frame.array(*array);
            let off = arr.offset(idx).ok_or_else(|| trap(TrapKind::IndexFail, *loc))?;
            let value = arr.elems[off].clone();
            frame.set(*dst, value);
        }
        Op::SetIndex {
            array,
            index,
            value,
            loc,
        } => {
            let idx = frame.int(*index);
            let value = frame.get(*value).clone();
            let Value::Array(arr) = &mut frame.regs[array.0 as usize] else {
                panic!("INTERNAL: r{} is not an array", array.0);
            };
            let arr = Arc::make_mut(arr);
            let off = arr.offset(idx).ok_or_else(|| trap(TrapKind::IndexFail, *loc))?;
            arr.elems[off] = value;
        }
        Op::Length { dst, array } => {
            let len = frame.array(*array).elems.len() as i64;
            frame.set(*dst, Value::Int(len));
        }
        Op::Bound { dst, array, which } => {
            let arr = frame.array(*array);
            let last = |arr: &ArrayValue| {
                let span = arr.elems.len() as i64 - 1;
                if arr.ascending {
                    arr.left + span
                } else {
                    arr.left - span
                }
            };
            let value = match which {
                BoundKind::Left => arr.left,
                BoundKind::Right => last(arr),
                BoundKind::Low => arr.left.min(last(arr)),
                BoundKind::High => arr.left.max(last(arr)),
                BoundKind::Ascending => arr.ascending as i64,
            };
            frame.set(*dst, Value::Int(value));
        }
        Op::Aggregate {
            dst,
            elems,
            left,
            ascending,
        } => {
            let elems = elems.iter().map(|&r| frame.get(r).clone()).collect();
            frame.set(
                *dst,
                Value::Array(Arc::new(ArrayValue {
                    left: *left,
                    ascending: *ascending,
                    elems,
                })),
            );
        }
        Op::LengthCheck { array, length, loc } => {
            if frame.array(*array).elems.len() != *length {
                return Err(trap(TrapKind::LengthFail, *loc));
            }
        }
        Op::Call {
            dst,
            func,
            args,
            loc,
        } => {
            host.step(*loc)?;
            let args = args.iter().map(|&r| frame.get(r).clone()).collect();
            let value = host.call(*func, args, *loc)?;
            frame.set(*dst, value);
        }
    }
    Ok(())
}
