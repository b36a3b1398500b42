// src/arith.rs
//! Static-evaluation arithmetic shared by the folder, the interpreter and the
//! JIT tier.
//!
//! Integer arithmetic is exact: results that do not fit in 64 bits or in the
//! target subtype trap instead of wrapping. `mod` takes the sign of the
//! divisor, `rem` the sign of the dividend.

use std::cmp::Ordering;
use std::sync::Arc;

use hdlc_object::Builtin;

use crate::errors::TrapKind;
use crate::ir::{ArrayValue, IntRange, Value};

pub fn int_binary(op: Builtin, a: i64, b: i64) -> Result<i64, TrapKind> {
    let result = match op {
        Builtin::Add => a.checked_add(b),
        Builtin::Sub => a.checked_sub(b),
        Builtin::Mul => a.checked_mul(b),
        Builtin::Div => {
            if b == 0 {
                return Err(TrapKind::DivZero);
            }
            a.checked_div(b)
        }
        Builtin::Rem => {
            if b == 0 {
                return Err(TrapKind::DivZero);
            }
            Some(if b == -1 { 0 } else { a % b })
        }
        Builtin::Mod => {
            if b == 0 {
                return Err(TrapKind::DivZero);
            }
            let r = if b == -1 { 0 } else { a % b };
            Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        Builtin::Exp => {
            if b < 0 {
                return Err(TrapKind::RangeFail);
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
        Builtin::And => Some(((a != 0) && (b != 0)) as i64),
        Builtin::Or => Some(((a != 0) || (b != 0)) as i64),
        Builtin::Xor => Some(((a != 0) != (b != 0)) as i64),
        Builtin::Nand => Some(!((a != 0) && (b != 0)) as i64),
        Builtin::Nor => Some(!((a != 0) || (b != 0)) as i64),
        Builtin::Xnor => Some(((a != 0) == (b != 0)) as i64),
        op if op.is_relational() => Some(relation(op, a.cmp(&b)) as i64),
        _ => panic!("INTERNAL: {:?} is not a binary integer operator", op),
    };
    result.ok_or(TrapKind::Overflow)
}

pub fn int_unary(op: Builtin, a: i64) -> Result<i64, TrapKind> {
    match op {
        Builtin::Neg => a.checked_neg().ok_or(TrapKind::Overflow),
        Builtin::Identity => Ok(a),
        Builtin::Abs => a.checked_abs().ok_or(TrapKind::Overflow),
        Builtin::Not => Ok((a == 0) as i64),
        _ => panic!("INTERNAL: {:?} is not a unary integer operator", op),
    }
}

/// `real ** integer`, the only exponentiation defined on reals.
pub fn real_pow(a: f64, b: i64) -> Result<f64, TrapKind> {
    let exp = i32::try_from(b).map_err(|_| TrapKind::Overflow)?;
    finite(a.powi(exp))
}

pub fn real_binary(op: Builtin, a: f64, b: f64) -> Result<f64, TrapKind> {
    let result = match op {
        Builtin::Add => a + b,
        Builtin::Sub => a - b,
        Builtin::Mul => a * b,
        Builtin::Div => {
            if b == 0.0 {
                return Err(TrapKind::DivZero);
            }
            a / b
        }
        _ => panic!("INTERNAL: {:?} is not a binary real operator", op),
    };
    finite(result)
}

pub fn real_unary(op: Builtin, a: f64) -> Result<f64, TrapKind> {
    match op {
        Builtin::Neg => Ok(-a),
        Builtin::Identity => Ok(a),
        Builtin::Abs => Ok(a.abs()),
        _ => panic!("INTERNAL: {:?} is not a unary real operator", op),
    }
}

fn finite(v: f64) -> Result<f64, TrapKind> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(TrapKind::Overflow)
    }
}

fn relation(op: Builtin, ord: Ordering) -> bool {
    match op {
        Builtin::Eq => ord == Ordering::Equal,
        Builtin::Neq => ord != Ordering::Equal,
        Builtin::Lt => ord == Ordering::Less,
        Builtin::Le => ord != Ordering::Greater,
        Builtin::Gt => ord == Ordering::Greater,
        Builtin::Ge => ord != Ordering::Less,
        _ => panic!("INTERNAL: {:?} is not a relational operator", op),
    }
}

fn order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Real(x), Value::Real(y)) => x.total_cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.elems.iter().zip(&y.elems) {
                match order(l, r) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            x.elems.len().cmp(&y.elems.len())
        }
        _ => panic!("INTERNAL: comparing {:?} with {:?}", a.ty(), b.ty()),
    }
}

/// Relational operator over any two values of the same class. Arrays compare
/// element-wise, ignoring their index ranges.
pub fn compare(op: Builtin, a: &Value, b: &Value) -> bool {
    relation(op, order(a, b))
}

pub fn check_range(value: i64, range: Option<IntRange>) -> Result<i64, TrapKind> {
    match range {
        Some((low, high)) if value < low || value > high => Err(TrapKind::Overflow),
        _ => Ok(value),
    }
}

/// Apply a predefined binary operator to two values, checking integer
/// results against `range`.
pub fn binary(op: Builtin, a: &Value, b: &Value, range: Option<IntRange>) -> Result<Value, TrapKind> {
    if op.is_relational() {
        return Ok(Value::bool(compare(op, a, b)));
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_binary(op, *x, *y)
            .and_then(|v| check_range(v, range))
            .map(Value::Int),
        (Value::Real(x), Value::Int(y)) if op == Builtin::Exp => real_pow(*x, *y).map(Value::Real),
        (Value::Real(x), Value::Real(y)) => real_binary(op, *x, *y).map(Value::Real),
        (Value::Array(x), Value::Array(y)) if op.is_logical() => {
            if x.elems.len() != y.elems.len() {
                return Err(TrapKind::LengthFail);
            }
            let elems = x
                .elems
                .iter()
                .zip(&y.elems)
                .map(|(l, r)| binary(op, l, r, None))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(Arc::new(ArrayValue {
                left: x.left,
                ascending: x.ascending,
                elems,
            })))
        }
        _ => panic!(
            "INTERNAL: operator {:?} on {:?} and {:?}",
            op,
            a.ty(),
            b.ty()
        ),
    }
}

pub fn unary(op: Builtin, a: &Value, range: Option<IntRange>) -> Result<Value, TrapKind> {
    match a {
        Value::Int(x) => int_unary(op, *x)
            .and_then(|v| check_range(v, range))
            .map(Value::Int),
        Value::Real(x) => real_unary(op, *x).map(Value::Real),
        Value::Array(x) if op == Builtin::Not => {
            let elems = x
                .elems
                .iter()
                .map(|e| unary(op, e, None))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(Arc::new(ArrayValue {
                left: x.left,
                ascending: x.ascending,
                elems,
            })))
        }
        Value::Array(_) => panic!("INTERNAL: operator {:?} on an array", op),
    }
}
