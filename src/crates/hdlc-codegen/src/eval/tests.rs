use hdlc_identity::FileRef;
use hdlc_object::Builtin;

use super::*;
use crate::ir::{Block, BlockId, Op, Reg, RegTy, Terminator};

const INT32: (i64, i64) = (i32::MIN as i64, i32::MAX as i64);

fn loc(line: u32) -> Loc {
    Loc::point(FileRef::intern("eval_test.vhd"), line, 1)
}

fn unit(name: &str, generation: u32, functions: Vec<Function>) -> LoweredUnit {
    let name = Ident::new(name);
    LoweredUnit {
        name,
        key: UnitKey { name, generation },
        functions: functions.into_iter().map(Arc::new).collect(),
    }
}

fn constant(name: &str, value: i64) -> Function {
    Function {
        name: Ident::new(name),
        params: vec![],
        result: RegTy::Int,
        regs: vec![RegTy::Int],
        blocks: vec![Block {
            ops: vec![Op::Const {
                dst: Reg(0),
                value: Value::Int(value),
            }],
            term: Terminator::Return(Reg(0)),
        }],
        loc: loc(1),
    }
}

/// Sum of `1 to n`, one backedge per iteration.
fn sum_to(name: &str) -> Function {
    let (n, sum, i, cond, one) = (Reg(0), Reg(1), Reg(2), Reg(3), Reg(4));
    let int = |dst, v| Op::Const {
        dst,
        value: Value::Int(v),
    };
    let add = |dst, lhs, rhs| Op::Binary {
        dst,
        op: Builtin::Add,
        lhs,
        rhs,
        range: Some(INT32),
        loc: loc(4),
    };
    Function {
        name: Ident::new(name),
        params: vec![n],
        result: RegTy::Int,
        regs: vec![RegTy::Int; 5],
        blocks: vec![
            Block {
                ops: vec![
                    Op::RangeCheck {
                        value: n,
                        low: INT32.0,
                        high: INT32.1,
                        loc: loc(2),
                    },
                    int(sum, 0),
                    int(i, 1),
                    int(one, 1),
                ],
                term: Terminator::Jump(BlockId(1)),
            },
            Block {
                ops: vec![Op::Cmp {
                    dst: cond,
                    op: Builtin::Le,
                    lhs: i,
                    rhs: n,
                }],
                term: Terminator::Branch {
                    cond,
                    then: BlockId(2),
                    otherwise: BlockId(3),
                },
            },
            Block {
                ops: vec![add(sum, sum, i), add(i, i, one)],
                term: Terminator::Jump(BlockId(1)),
            },
            Block {
                ops: vec![],
                term: Terminator::Return(sum),
            },
        ],
        loc: loc(1),
    }
}

/// `return callee(x)`
fn forward(name: &str, callee: &str, call_line: u32) -> Function {
    Function {
        name: Ident::new(name),
        params: vec![Reg(0)],
        result: RegTy::Int,
        regs: vec![RegTy::Int; 2],
        blocks: vec![Block {
            ops: vec![Op::Call {
                dst: Reg(1),
                func: Ident::new(callee),
                args: vec![Reg(0)],
                loc: loc(call_line),
            }],
            term: Terminator::Return(Reg(1)),
        }],
        loc: loc(call_line - 1),
    }
}

#[test]
fn evaluates_registered_function() {
    let mut eval = Evaluator::new(EvalOptions::interpret_only());
    eval.register(unit("WORK.PKG", 10, vec![sum_to("WORK.PKG.SUM")]));
    let sum = eval.evaluate(Ident::new("WORK.PKG.SUM"), &[Value::Int(10)]).unwrap();
    assert_eq!(sum, Value::Int(55));
    assert_eq!(eval.stats().interpreted_calls, 1);
}

#[test]
fn unknown_function_and_argument_count() {
    let mut eval = Evaluator::new(EvalOptions::interpret_only());
    eval.register(unit("WORK.PKG", 10, vec![sum_to("WORK.PKG.SUM")]));
    let missing = eval.evaluate(Ident::new("WORK.PKG.NOPE"), &[]).unwrap_err();
    assert!(matches!(missing, EvalError::UnknownFunction(_)));
    let arity = eval.evaluate(Ident::new("WORK.PKG.SUM"), &[]).unwrap_err();
    assert!(matches!(
        arity,
        EvalError::ArgumentCount {
            expected: 1,
            found: 0,
            ..
        }
    ));
}

#[test]
fn hot_function_runs_natively_with_same_results() {
    let options = EvalOptions {
        jit_threshold: Some(2),
        max_steps: 50,
        ..EvalOptions::default()
    };
    let mut tiered = Evaluator::new(options);
    let mut plain = Evaluator::new(EvalOptions {
        jit_threshold: None,
        ..options
    });
    let name = Ident::new("WORK.PKG.SUM");
    tiered.register(unit("WORK.PKG", 10, vec![sum_to("WORK.PKG.SUM")]));
    plain.register(unit("WORK.PKG", 10, vec![sum_to("WORK.PKG.SUM")]));

    // The last two exceed the step budget.
    for n in [3, 4, 5, 20, 49, 50, 51, 100] {
        let args = [Value::Int(n)];
        let a = tiered.evaluate(name, &args).map_err(|e| (e.trap(), e.loc()));
        let b = plain.evaluate(name, &args).map_err(|e| (e.trap(), e.loc()));
        assert_eq!(a, b, "n = {n}");
    }
    assert_eq!(plain.stats().native_calls, 0);
    if tiered.is_native(name) {
        assert_eq!(tiered.stats().native_compiled, 1);
        assert_eq!(tiered.stats().interpreted_calls, 1);
        assert_eq!(tiered.stats().native_calls, 7);
    }
}

#[test]
fn ineligible_function_stays_interpreted() {
    let mut eval = Evaluator::new(EvalOptions {
        jit_threshold: Some(1),
        ..EvalOptions::default()
    });
    eval.register(unit(
        "WORK.PKG",
        10,
        vec![
            forward("WORK.PKG.F", "WORK.PKG.SUM", 3),
            sum_to("WORK.PKG.SUM"),
        ],
    ));
    for _ in 0..3 {
        let v = eval.evaluate(Ident::new("WORK.PKG.F"), &[Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(6));
    }
    assert!(!eval.is_native(Ident::new("WORK.PKG.F")));
}

#[test]
fn unbounded_recursion_hits_depth_limit() {
    let mut eval = Evaluator::new(EvalOptions {
        max_depth: 8,
        ..EvalOptions::interpret_only()
    });
    eval.register(unit("WORK.PKG", 10, vec![forward("WORK.PKG.R", "WORK.PKG.R", 5)]));
    let err = eval.evaluate(Ident::new("WORK.PKG.R"), &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::RecursionLimit));
    assert_eq!(err.loc(), Some(loc(5)));
    assert!(TrapKind::RecursionLimit.is_resource_exhaustion());
}

#[test]
fn calls_consume_fuel() {
    let mut eval = Evaluator::new(EvalOptions {
        max_steps: 3,
        max_depth: 100,
        ..EvalOptions::interpret_only()
    });
    eval.register(unit("WORK.PKG", 10, vec![forward("WORK.PKG.R", "WORK.PKG.R", 5)]));
    let err = eval.evaluate(Ident::new("WORK.PKG.R"), &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::StepLimit));
    assert_eq!(err.loc(), Some(loc(5)));
}

#[test]
fn replacing_a_unit_invalidates_its_functions() {
    let mut eval = Evaluator::default();
    let name = Ident::new("WORK.PKG.C");
    eval.register(unit("WORK.PKG", 10, vec![constant("WORK.PKG.C", 1)]));
    assert_eq!(eval.evaluate(name, &[]).unwrap(), Value::Int(1));

    // Same version again is a no-op.
    eval.register(unit("WORK.PKG", 10, vec![constant("WORK.PKG.C", 1)]));
    assert_eq!(eval.stats().invalidations, 0);

    eval.register(unit("WORK.PKG", 11, vec![constant("WORK.PKG.C", 2)]));
    assert_eq!(eval.evaluate(name, &[]).unwrap(), Value::Int(2));
    assert_eq!(eval.stats().invalidations, 1);
    assert_eq!(eval.unit_key(Ident::new("WORK.PKG")).map(|k| k.generation), Some(11));

    assert!(eval.invalidate(Ident::new("WORK.PKG")));
    assert!(!eval.is_registered(name));
    assert!(!eval.invalidate(Ident::new("WORK.PKG")));
}

#[test]
fn unregistered_thunk_calls_registered_function() {
    let mut eval = Evaluator::new(EvalOptions::interpret_only());
    eval.register(unit("WORK.PKG", 10, vec![sum_to("WORK.PKG.SUM")]));
    let thunk = Function {
        name: Ident::new("THUNK"),
        params: vec![],
        result: RegTy::Int,
        regs: vec![RegTy::Int; 2],
        blocks: vec![Block {
            ops: vec![
                Op::Const {
                    dst: Reg(0),
                    value: Value::Int(4),
                },
                Op::Call {
                    dst: Reg(1),
                    func: Ident::new("WORK.PKG.SUM"),
                    args: vec![Reg(0)],
                    loc: loc(9),
                },
            ],
            term: Terminator::Return(Reg(1)),
        }],
        loc: loc(9),
    };
    assert_eq!(eval.evaluate_function(&thunk, &[]).unwrap(), Value::Int(10));

    let lowered = unit("WORK.THUNKS", 12, vec![thunk]);
    assert_eq!(eval.evaluate_unit(&lowered, &[]).unwrap(), Value::Int(10));
    assert!(eval.is_registered(Ident::new("THUNK")));
}
