use hdlc_identity::{FileRef, Ident};
use hdlc_object::builder::TreeBuilder;
use hdlc_object::{Builtin, Direction, ObjectArena, ObjectStore, Tree, Type, TypeKind, TypeNode};

use super::*;
use crate::errors::{CodegenErrorKind, EvalError};
use crate::eval::{EvalOptions, Evaluator};
use crate::ir::Value;
use crate::jit::is_eligible;

const FILE: &str = "lower_test.vhd";

fn file() -> FileRef {
    FileRef::intern(FILE)
}

/// Analysed-tree scaffolding: an `INTEGER` type and the `"+"` builtin.
struct Fixture {
    arena: ObjectArena,
    integer: Type,
    plus: Tree,
}

impl Fixture {
    fn new() -> Fixture {
        let mut arena = ObjectArena::new().with_name(Ident::new("WORK.PKG-body"));
        let mut b = TreeBuilder::new(&mut arena, file());
        let range = b.to(i32::MIN as i64, i32::MAX as i64);
        let mut node = TypeNode::named(TypeKind::Integer, Ident::new("INTEGER"));
        node.ranges.push(range);
        let integer = b.arena().intern_type(node);
        let plus = builtin(&mut b, "+", Builtin::Add, integer);
        Fixture {
            arena,
            integer,
            plus,
        }
    }

    fn builder(&mut self) -> TreeBuilder<'_> {
        TreeBuilder::new(&mut self.arena, file())
    }

    fn into_store(self) -> ObjectStore {
        let mut store = ObjectStore::new();
        store.insert(self.arena);
        store
    }
}

fn typed(b: &mut TreeBuilder<'_>, tree: Tree, ty: Type) -> Tree {
    b.arena().tree_mut(tree).ty = Some(ty);
    tree
}

fn resolved(b: &mut TreeBuilder<'_>, tree: Tree, decl: Tree, ty: Type) -> Tree {
    let node = b.arena().tree_mut(tree);
    node.reference = Some(decl);
    node.ty = Some(ty);
    tree
}

fn builtin(b: &mut TreeBuilder<'_>, symbol: &str, op: Builtin, ty: Type) -> Tree {
    let params = ["L", "R"]
        .iter()
        .map(|name| {
            let mark = b.mark("integer");
            let p = b.param(name, mark);
            typed(b, p, ty)
        })
        .collect();
    let result = b.mark("integer");
    let decl = b.function_decl(&format!("\"{symbol}\""), params, result);
    b.arena().tree_mut(decl).builtin = Some(op);
    typed(b, decl, ty)
}

fn int(b: &mut TreeBuilder<'_>, value: i64, ty: Type) -> Tree {
    let lit = b.int(value);
    typed(b, lit, ty)
}

fn name(b: &mut TreeBuilder<'_>, text: &str, decl: Tree, ty: Type) -> Tree {
    let r = b.name(text);
    resolved(b, r, decl, ty)
}

fn add(b: &mut TreeBuilder<'_>, plus: Tree, ty: Type, lhs: Tree, rhs: Tree) -> Tree {
    let call = b.binary("+", lhs, rhs);
    resolved(b, call, plus, ty)
}

fn param(b: &mut TreeBuilder<'_>, text: &str, ty: Type) -> Tree {
    let mark = b.mark("integer");
    let p = b.param(text, mark);
    typed(b, p, ty)
}

fn body(
    b: &mut TreeBuilder<'_>,
    text: &str,
    params: Vec<Tree>,
    decls: Vec<Tree>,
    stmts: Vec<Tree>,
    ty: Type,
) -> Tree {
    let result = b.mark("integer");
    let f = b.function(text, params, result, decls, stmts);
    b.arena().tree_mut(f).ident2 = Some(Ident::new(&format!("WORK.PKG.{text}(I)I")));
    typed(b, f, ty)
}

/// `function ADD1(X : INTEGER) return INTEGER is begin return X + 1; end`
fn add_one(fx: &mut Fixture) -> Tree {
    let (integer, plus) = (fx.integer, fx.plus);
    let mut b = fx.builder();
    let x = param(&mut b, "x", integer);
    let xref = name(&mut b, "x", x, integer);
    let one = int(&mut b, 1, integer);
    let sum = add(&mut b, plus, integer, xref, one);
    let ret = b.ret(Some(sum));
    body(&mut b, "ADD1", vec![x], vec![], vec![ret], integer)
}

/// Sum of `1 to N` with a `for` loop and a local accumulator.
fn sum_to(fx: &mut Fixture) -> Tree {
    let (integer, plus) = (fx.integer, fx.plus);
    let mut b = fx.builder();
    let n = param(&mut b, "n", integer);
    let mark = b.mark("integer");
    let zero = int(&mut b, 0, integer);
    let acc = b.variable("acc", mark, Some(zero));
    typed(&mut b, acc, integer);

    let low = int(&mut b, 1, integer);
    let high = name(&mut b, "n", n, integer);
    let range = b.range(low, Direction::To, high);
    let placeholder = b.null();
    let lp = b.for_("i", range, vec![placeholder]);
    let i = b.arena().tree(lp).decls[0];
    typed(&mut b, i, integer);

    let target = name(&mut b, "acc", acc, integer);
    let lhs = name(&mut b, "acc", acc, integer);
    let iref = name(&mut b, "i", i, integer);
    let next = add(&mut b, plus, integer, lhs, iref);
    let assign = b.var_assign(target, next);
    b.arena().tree_mut(lp).stmts = vec![assign];

    let result = name(&mut b, "acc", acc, integer);
    let ret = b.ret(Some(result));
    body(&mut b, "SUM", vec![n], vec![acc], vec![lp, ret], integer)
}

fn run(func: &Function, args: &[Value]) -> Result<Value, EvalError> {
    Evaluator::new(EvalOptions::interpret_only()).evaluate_function(func, args)
}

#[test]
fn parameters_are_checked_on_entry() {
    let mut fx = Fixture::new();
    let f = add_one(&mut fx);
    let store = fx.into_store();
    let func = lower_function(&store, f).unwrap();

    assert_eq!(func.name, Ident::new("WORK.PKG.ADD1(I)I"));
    assert_eq!(func.params.len(), 1);
    assert!(matches!(
        func.blocks[0].ops[0],
        Op::RangeCheck { low, high, .. } if low == i32::MIN as i64 && high == i32::MAX as i64
    ));
    assert!(is_eligible(&func));
    assert_eq!(run(&func, &[Value::Int(41)]).unwrap(), Value::Int(42));
}

#[test]
fn arithmetic_is_checked_against_result_subtype() {
    let mut fx = Fixture::new();
    let f = add_one(&mut fx);
    let store = fx.into_store();
    let func = lower_function(&store, f).unwrap();

    let err = run(&func, &[Value::Int(i32::MAX as i64)]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::Overflow));
    let err = run(&func, &[Value::Int(i64::from(i32::MAX) + 10)]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::RangeFail));
}

#[test]
fn for_loop_has_one_backedge() {
    let mut fx = Fixture::new();
    let f = sum_to(&mut fx);
    let store = fx.into_store();
    let func = lower_function(&store, f).unwrap();

    let backedges = func
        .blocks
        .iter()
        .enumerate()
        .flat_map(|(i, b)| {
            let from = BlockId(i as u32);
            let targets: Vec<BlockId> = match b.term {
                Terminator::Jump(t) => vec![t],
                Terminator::Branch {
                    then, otherwise, ..
                } => vec![then, otherwise],
                _ => vec![],
            };
            targets.into_iter().filter(move |&t| Function::is_backedge(from, t))
        })
        .count();
    assert_eq!(backedges, 1);
    assert!(is_eligible(&func));

    assert_eq!(run(&func, &[Value::Int(4)]).unwrap(), Value::Int(10));
    assert_eq!(run(&func, &[Value::Int(0)]).unwrap(), Value::Int(0));
}

#[test]
fn loop_consumes_fuel() {
    let mut fx = Fixture::new();
    let f = sum_to(&mut fx);
    let store = fx.into_store();
    let func = lower_function(&store, f).unwrap();

    let mut eval = Evaluator::new(EvalOptions {
        max_steps: 5,
        ..EvalOptions::interpret_only()
    });
    assert_eq!(eval.evaluate_function(&func, &[Value::Int(5)]).unwrap(), Value::Int(15));
    let err = eval.evaluate_function(&func, &[Value::Int(7)]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::StepLimit));
    assert_eq!(err.loc(), Some(func.loc));
}

#[test]
fn thunk_result_is_range_checked() {
    let mut fx = Fixture::new();
    let integer = fx.integer;
    let mut b = fx.builder();
    let range = b.to(0, 255);
    let mut byte = TypeNode::named(TypeKind::Subtype, Ident::new("BYTE"));
    byte.base = Some(integer);
    byte.ranges.push(range);
    let byte = b.arena().intern_type(byte);
    let fits = int(&mut b, 200, byte);
    let too_big = int(&mut b, 300, byte);
    let store = fx.into_store();

    let ok = lower_thunk(&store, fits, Ident::new("THUNK_OK")).unwrap();
    assert_eq!(ok.params.len(), 0);
    assert_eq!(run(&ok, &[]).unwrap(), Value::Int(200));

    let bad = lower_thunk(&store, too_big, Ident::new("THUNK_BAD")).unwrap();
    let err = run(&bad, &[]).unwrap_err();
    assert_eq!(err.trap(), Some(TrapKind::RangeFail));
}

#[test]
fn others_fills_constrained_aggregate() {
    let mut fx = Fixture::new();
    let integer = fx.integer;
    let mut b = fx.builder();
    let mut array = TypeNode::named(TypeKind::Array, Ident::new("INT_VECTOR"));
    array.index.push(integer);
    array.elem = Some(integer);
    let array = b.arena().intern_type(array);
    let range = b.to(1, 4);
    let mut sub = TypeNode::new(TypeKind::Subtype);
    sub.base = Some(array);
    sub.ranges.push(range);
    let sub = b.arena().intern_type(sub);

    let one = int(&mut b, 1, integer);
    let two = int(&mut b, 2, integer);
    let zero = int(&mut b, 0, integer);
    let e1 = b.pos(one);
    let e2 = b.pos(two);
    let rest = b.others(zero);
    let agg = b.aggregate(vec![e1, e2, rest]);
    typed(&mut b, agg, sub);
    let store = fx.into_store();

    let thunk = lower_thunk(&store, agg, Ident::new("AGG")).unwrap();
    let value = run(&thunk, &[]).unwrap();
    let array = value.as_array().unwrap();
    assert_eq!(array.left, 1);
    assert!(array.ascending);
    let elems: Vec<i64> = array.elems.iter().filter_map(Value::as_int).collect();
    assert_eq!(elems, vec![1, 2, 0, 0]);
}

#[test]
fn deferred_constant_is_unsupported() {
    let mut fx = Fixture::new();
    let integer = fx.integer;
    let mut b = fx.builder();
    let mark = b.mark("integer");
    let c = b.constant("c", mark, None);
    typed(&mut b, c, integer);
    let r = name(&mut b, "c", c, integer);
    let store = fx.into_store();

    let err = lower_thunk(&store, r, Ident::new("DEFERRED")).unwrap_err();
    assert!(matches!(err.kind, CodegenErrorKind::UnsupportedFeature { .. }));
    assert!(err.loc.is_some());
}

#[test]
fn entity_cannot_be_lowered_as_unit() {
    let mut fx = Fixture::new();
    let mut b = fx.builder();
    let ent = b.entity("ent", vec![], vec![], vec![], vec![]);
    b.finish(ent);
    let store = fx.into_store();
    assert!(lower_unit(&store, ent).is_err());
}

#[test]
fn package_body_lowers_every_function() {
    let mut fx = Fixture::new();
    let a = add_one(&mut fx);
    let s = sum_to(&mut fx);
    let mut b = fx.builder();
    let unit = b.package_body("pkg", vec![a, s]);
    b.finish(unit);
    let store = fx.into_store();

    let lowered = lower_unit(&store, unit).unwrap();
    assert_eq!(lowered.name, Ident::new("WORK.PKG-body"));
    assert_eq!(lowered.functions.len(), 2);
    assert!(lowered.function(Ident::new("WORK.PKG.SUM(I)I")).is_some());
}
