use hdlc_identity::Ident;
use hdlc_object::builder::{TreeBuilder, build_unit};
use hdlc_object::{
    AttrKind, Flags, LibraryStore, ObjectStore, PortMode, Tree, TreeKind, TypeKind,
};

use super::check_unit;
use crate::options::{Options, RelaxRules, StandardRevision};
use crate::session::Session;

const FILE: &str = "check_test.vhd";

/// An object store with the units analysed so far and the session that
/// collected their diagnostics.
struct Harness {
    store: ObjectStore,
    libs: LibraryStore,
    session: Session,
}

impl Harness {
    fn new() -> Harness {
        Harness::with_options(Options::default())
    }

    fn with_options(options: Options) -> Harness {
        Harness {
            store: ObjectStore::new(),
            libs: LibraryStore::new(),
            session: Session::new(options),
        }
    }

    /// Build a unit, check it and return its root and error count.
    fn check(&mut self, f: impl FnOnce(&mut TreeBuilder<'_>) -> Tree) -> (Tree, u32) {
        let arena = build_unit(FILE, f);
        let id = self.store.insert(arena);
        let root = self.store.arena(id).and_then(|a| a.root()).unwrap();
        let errors = check_unit(&mut self.store, &self.libs, &mut self.session, root);
        (root, errors)
    }

    fn codes(&self) -> Vec<&str> {
        self.session
            .diagnostics()
            .iter()
            .filter_map(|d| d.code.as_deref())
            .collect()
    }

    fn decl(&self, unit: Tree, name: &str) -> Tree {
        let name = Ident::new(name);
        let found = self
            .store
            .tree(unit)
            .decls
            .iter()
            .copied()
            .find(|&d| self.store.tree(d).ident == Some(name));
        found.unwrap()
    }
}

fn package_with(
    name: &'static str,
    decls: impl FnOnce(&mut TreeBuilder<'_>) -> Vec<Tree>,
) -> impl FnOnce(&mut TreeBuilder<'_>) -> Tree {
    move |b| {
        let decls = decls(b);
        b.package(name, decls)
    }
}

#[test]
fn constants_take_their_declared_type() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let (l, r) = (b.int(2), b.int(3));
        let sum = b.binary("+", l, r);
        vec![b.constant("C", mark, Some(sum))]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let c = h.decl(pkg, "C");
    let node = h.store.tree(c);
    assert_eq!(h.store.type_name(node.ty.unwrap()), "INTEGER");
    let call = h.store.tree(node.value.unwrap());
    assert_eq!(call.kind, TreeKind::FCall);
    assert!(call.reference.is_some());
    assert_eq!(h.store.type_name(call.ty.unwrap()), "INTEGER");
    let operand = h.store.tree(h.store.tree(call.params[0]).value.unwrap());
    assert_eq!(h.store.type_name(operand.ty.unwrap()), "INTEGER");
}

#[test]
fn type_mismatch_is_reported() {
    let mut h = Harness::new();
    let (_, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("boolean");
        let value = b.int(1);
        vec![b.constant("C", mark, Some(value))]
    }));
    assert_eq!(errors, 1);
    assert_eq!(h.codes(), ["E2001"]);
}

#[test]
fn undeclared_name() {
    let mut h = Harness::new();
    let (_, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let value = b.name("nowhere");
        vec![b.constant("C", mark, Some(value))]
    }));
    assert_eq!(errors, 1);
    assert_eq!(h.codes(), ["E2002"]);
}

#[test]
fn duplicate_declaration() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let (m1, m2) = (b.mark("integer"), b.mark("integer"));
        let (v1, v2) = (b.int(1), b.int(2));
        vec![b.constant("C", m1, Some(v1)), b.constant("C", m2, Some(v2))]
    }));
    assert_eq!(h.codes(), ["E2008"]);
}

#[test]
fn enumeration_literals_resolve_by_context() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let color = b.type_enum("color", &["red", "green", "blue"]);
        let light = b.type_enum("light", &["red", "amber", "green"]);
        let mark = b.mark("light");
        let value = b.name("green");
        vec![color, light, b.constant("C", mark, Some(value))]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let c = h.decl(pkg, "C");
    let value = h.store.tree(c).value.unwrap();
    let lit = h.store.tree(value).reference.unwrap();
    assert_eq!(h.store.tree(lit).kind, TreeKind::EnumLit);
    assert_eq!(h.store.type_name(h.store.tree(lit).ty.unwrap()), "LIGHT");
}

#[test]
fn overloaded_literal_without_context_is_ambiguous() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let color = b.type_enum("color", &["red", "green"]);
        let light = b.type_enum("light", &["red", "green"]);
        let mark = b.mark("boolean");
        let (l, r) = (b.name("red"), b.name("green"));
        let eq = b.binary("=", l, r);
        vec![color, light, b.constant("C", mark, Some(eq))]
    }));
    assert_eq!(h.codes(), ["E2004"]);
}

#[test]
fn types_get_implicit_operators() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let range = b.to(0, 255);
        let byte = b.type_range("byte", range);
        let (mark, one) = (b.mark("byte"), b.int(1));
        let base = b.constant("BASE", mark, Some(one));
        let mark = b.mark("byte");
        let (l, r) = (b.name("base"), b.int(2));
        let sum = b.binary("+", l, r);
        vec![byte, base, b.constant("C", mark, Some(sum))]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let decls = &h.store.tree(pkg).decls;
    let builtins = decls
        .iter()
        .filter(|&&d| h.store.tree(d).builtin.is_some())
        .count();
    assert!(builtins > 0);
    let c = h.decl(pkg, "C");
    let call = h.store.tree(h.store.tree(c).value.unwrap());
    let op = h.store.tree(call.reference.unwrap());
    assert_eq!(h.store.type_name(op.ty.unwrap()), "BYTE");
}

#[test]
fn integer_type_bounds_must_be_static() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let f = {
            let result = b.mark("integer");
            b.function_decl("f", Vec::new(), result)
        };
        let (low, high) = (b.int(0), b.call("f", &[]));
        let range = b.range(low, hdlc_object::Direction::To, high);
        vec![f, b.type_range("t", range)]
    }));
    assert!(h.codes().contains(&"E2023"), "{:?}", h.codes());
}

#[test]
fn incomplete_type_completed_by_full_declaration() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let node = b.type_incomplete("node");
        let mark = b.mark("node");
        let ptr = b.type_access("node_ptr", mark);
        let (m1, m2) = (b.mark("integer"), b.mark("node_ptr"));
        let full = b.type_record("node", &[("value", m1), ("next", m2)]);
        vec![node, ptr, full]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let ptr = h.decl(pkg, "NODE_PTR");
    let access = h.store.ty(h.store.tree(ptr).ty.unwrap());
    let designated = access.designated.unwrap();
    assert_eq!(h.store.type_kind(designated), TypeKind::Record);
}

#[test]
fn incomplete_type_never_completed() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| vec![b.type_incomplete("lost")]));
    assert_eq!(h.codes(), ["E2010"]);
}

#[test]
fn constrained_array_constant_from_aggregate() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("bit_vector");
        let bits: Vec<Tree> = (0..4).map(|_| b.name("'1'")).collect();
        let agg = b.aggregate_of(&bits);
        vec![b.constant("ONES", mark, Some(agg))]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let c = h.decl(pkg, "ONES");
    let ty = h.store.tree(c).ty.unwrap();
    assert!(h.store.is_constrained_array(ty));
    let range = h.store.index_constraint(ty, 0).unwrap();
    let range = h.store.static_range(range).unwrap();
    assert_eq!(range.length(), 4);
}

#[test]
fn aggregate_without_context() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let (one, two) = (b.int(1), b.int(2));
        let agg = b.aggregate_of(&[one, two]);
        let len = b.attr(agg, AttrKind::Length);
        vec![b.constant("N", mark, Some(len))]
    }));
    assert!(h.codes().contains(&"E2007"), "{:?}", h.codes());
}

#[test]
fn record_aggregate_missing_field() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let (m1, m2) = (b.mark("integer"), b.mark("boolean"));
        let pair = b.type_record("pair", &[("a", m1), ("b", m2)]);
        let mark = b.mark("pair");
        let one = b.int(1);
        let assoc = b.named("a", one);
        let agg = b.aggregate(vec![assoc]);
        vec![pair, b.constant("P0", mark, Some(agg))]
    }));
    assert_eq!(h.codes(), ["E2042"]);
}

#[test]
fn deferred_constant_needs_body() {
    let mut h = Harness::new();
    let (_, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        vec![b.constant("D", mark, None)]
    }));
    assert_eq!(errors, 0);

    h.check(|b| b.package_body("P", Vec::new()));
    assert_eq!(h.codes(), ["E2030"]);
}

#[test]
fn deferred_constant_completed_in_body() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        vec![b.constant("D", mark, None)]
    }));
    let (body, errors) = h.check(|b| {
        let mark = b.mark("integer");
        let value = b.int(7);
        let full = b.constant("D", mark, Some(value));
        b.package_body("P", vec![full])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
    assert!(h.store.tree(body).reference.is_some());
}

#[test]
fn deferred_constant_outside_package() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("integer");
        let d = b.constant("D", mark, None);
        b.entity("E", Vec::new(), Vec::new(), vec![d], Vec::new())
    });
    assert_eq!(h.codes(), ["E2029"]);
}

/// `function add(a, b : integer) return integer` with a body.
fn add_function(b: &mut TreeBuilder<'_>) -> Tree {
    let (ma, mb, result) = (b.mark("integer"), b.mark("integer"), b.mark("integer"));
    let params = vec![b.param("a", ma), b.param("b", mb)];
    let (x, y) = (b.name("a"), b.name("b"));
    let sum = b.binary("+", x, y);
    let ret = b.ret(Some(sum));
    b.function("add", params, result, Vec::new(), vec![ret])
}

#[test]
fn function_bodies_are_checked_and_mangled() {
    let mut h = Harness::new();
    let (body, errors) = h.check(|b| {
        let func = add_function(b);
        b.package_body("P", vec![func])
    });
    // the package itself is missing
    assert_eq!(h.codes(), ["E2011"]);
    assert_eq!(errors, 1);

    let func = h.decl(body, "ADD");
    let mangled = h.store.tree(func).ident2.unwrap();
    assert!(mangled.as_str().starts_with("WORK.P.ADD("), "{mangled}");
}

#[test]
fn body_completes_declaration() {
    let mut h = Harness::new();
    let (pkg, _) = h.check(package_with("P", |b| {
        let (ma, mb, result) = (b.mark("integer"), b.mark("integer"), b.mark("integer"));
        let params = vec![b.param("a", ma), b.param("b", mb)];
        vec![b.function_decl("add", params, result)]
    }));
    let (body, errors) = h.check(|b| {
        let func = add_function(b);
        b.package_body("P", vec![func])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
    let decl = h.store.tree(h.decl(pkg, "ADD"));
    let func = h.store.tree(h.decl(body, "ADD"));
    assert!(decl.ident2.is_some());
    assert_eq!(decl.ident2, func.ident2);
}

#[test]
fn body_in_same_region_marks_declaration() {
    let mut h = Harness::new();
    let (ent, errors) = h.check(|b| {
        let (ma, mb, result) = (b.mark("integer"), b.mark("integer"), b.mark("integer"));
        let params = vec![b.param("a", ma), b.param("b", mb)];
        let decl = b.function_decl("add", params, result);
        let body = add_function(b);
        b.entity("E", Vec::new(), Vec::new(), vec![decl, body], Vec::new())
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
    let decl = h.store.tree(ent).decls[0];
    assert!(h.store.tree(decl).flags.contains(Flags::HAS_BODY));
}

#[test]
fn call_with_named_and_default_arguments() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let (ma, mb, result) = (b.mark("integer"), b.mark("integer"), b.mark("integer"));
        let a = b.param("a", ma);
        let b_param = b.param("b", mb);
        let default = b.int(10);
        b.arena().tree_mut(b_param).value = Some(default);
        let scale = b.function_decl("scale", vec![a, b_param], result);

        let mark = b.mark("integer");
        let arg = b.int(3);
        let named = b.named("a", arg);
        let mut call = hdlc_object::TreeNode::new(TreeKind::FCall, b.loc())
            .with_ident(Ident::new("SCALE"));
        call.params = vec![named];
        let call = b.arena().alloc_tree(call);
        vec![scale, b.constant("C", mark, Some(call))]
    }));
    assert_eq!(errors, 0, "{:?}", h.codes());

    let c = h.decl(pkg, "C");
    let call = h.store.tree(h.store.tree(c).value.unwrap());
    assert_eq!(call.params.len(), 2);
    let default = h.store.tree(call.params[1]).value.unwrap();
    assert_eq!(h.store.tree(default).literal.and_then(|l| l.as_int()), Some(10));
}

#[test]
fn no_matching_overload_lists_signature() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let (l, r) = (b.int(1), b.name("true"));
        let sum = b.binary("+", l, r);
        vec![b.constant("C", mark, Some(sum))]
    }));
    assert_eq!(h.codes(), ["E2005"]);
    let message = &h.session.diagnostics()[0].message;
    assert!(message.contains("BOOLEAN"), "{message}");
}

#[test]
fn pure_function_cannot_call_impure() {
    let mut h = Harness::new();
    h.check(|b| {
        let result = b.mark("integer");
        let one = b.int(1);
        let ret = b.ret(Some(one));
        let noisy = b.function("noisy", Vec::new(), result, Vec::new(), vec![ret]);
        let noisy = b.impure(noisy);

        let result = b.mark("integer");
        let call = b.call("noisy", &[]);
        let ret = b.ret(Some(call));
        let quiet = b.function("quiet", Vec::new(), result, Vec::new(), vec![ret]);
        b.entity("E", Vec::new(), Vec::new(), vec![noisy, quiet], Vec::new())
    });
    assert_eq!(h.codes(), ["E2021"]);
}

#[test]
fn impure_rule_can_be_relaxed() {
    let mut options = Options::default();
    options.relax.insert(RelaxRules::IMPURE);
    let mut h = Harness::with_options(options);
    let (_, errors) = h.check(|b| {
        let result = b.mark("integer");
        let one = b.int(1);
        let ret = b.ret(Some(one));
        let noisy = b.function("noisy", Vec::new(), result, Vec::new(), vec![ret]);
        let noisy = b.impure(noisy);
        let result = b.mark("integer");
        let call = b.call("noisy", &[]);
        let ret = b.ret(Some(call));
        let quiet = b.function("quiet", Vec::new(), result, Vec::new(), vec![ret]);
        b.entity("E", Vec::new(), Vec::new(), vec![noisy, quiet], Vec::new())
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
}

#[test]
fn pure_function_cannot_read_outer_signal() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("integer");
        let s = b.signal("s", mark, None);
        let result = b.mark("integer");
        let read = b.name("s");
        let ret = b.ret(Some(read));
        let f = b.function("f", Vec::new(), result, Vec::new(), vec![ret]);
        b.architecture("rtl", "e", vec![s, f], Vec::new())
    });
    // the entity does not exist, then the signal read
    assert_eq!(h.codes(), ["E2011", "E2022"]);
}

#[test]
fn return_outside_function_and_without_value() {
    let mut h = Harness::new();
    h.check(|b| {
        let ret = b.ret(None);
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), Vec::new(), vec![ret, wait]);
        let result = b.mark("integer");
        let bare = b.ret(None);
        let f = b.function("f", Vec::new(), result, Vec::new(), vec![bare]);
        b.entity("E", Vec::new(), Vec::new(), vec![f], vec![p])
    });
    assert_eq!(h.codes(), ["E2028", "E2027"]);
}

#[test]
fn condition_must_be_boolean() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("integer");
        let v = b.variable("v", mark, None);
        let cond = b.name("v");
        let null = b.null();
        let stmt = b.if_(cond, vec![null], Vec::new());
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), vec![v], vec![stmt, wait]);
        b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
    });
    assert_eq!(h.codes(), ["E2025"]);
}

#[test]
fn variable_not_allowed_outside_process() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        vec![b.variable("v", mark, None)]
    }));
    assert_eq!(h.codes(), ["E2039"]);
}

#[test]
fn for_loop_parameter_is_constrained() {
    let mut h = Harness::new();
    let (ent, errors) = h.check(|b| {
        let mark = b.mark("integer");
        let sum = b.variable("sum", mark, None);
        let (target, l, r) = (b.name("sum"), b.name("sum"), b.name("i"));
        let add = b.binary("+", l, r);
        let assign = b.var_assign(target, add);
        let range = b.to(1, 8);
        let lp = b.for_("i", range, vec![assign]);
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), vec![sum], vec![lp, wait]);
        b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());

    let process = h.store.tree(ent).stmts[0];
    let lp = h.store.tree(process).stmts[0];
    let param = h.store.tree(lp).decls[0];
    let ty = h.store.tree(param).ty.unwrap();
    assert_eq!(h.store.int_bounds(ty), Some((1, 8)));
    assert_eq!(h.store.type_name(h.store.base_type(ty)), "INTEGER");
}

#[test]
fn universal_range_needs_simple_bounds() {
    let mut h = Harness::new();
    h.check(|b| {
        let (one, two, four) = (b.int(1), b.int(2), b.int(4));
        let high = b.binary("*", two, four);
        let range = b.range(one, hdlc_object::Direction::To, high);
        let null = b.null();
        let lp = b.for_("i", range, vec![null]);
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), Vec::new(), vec![lp, wait]);
        b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
    });
    assert_eq!(h.codes(), ["E2024"]);
}

#[test]
fn process_without_wait_warns() {
    let mut h = Harness::new();
    let (_, errors) = h.check(|b| {
        let null = b.null();
        let p = b.process("spin", Vec::new(), Vec::new(), vec![null]);
        b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
    });
    assert_eq!(errors, 0);
    assert_eq!(h.codes(), ["W2001"]);
    assert_eq!(h.session.warning_count(), 1);
}

#[test]
fn wait_in_sensitive_process() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("bit");
        let clk = b.port("clk", PortMode::In, mark, None);
        let trigger = b.name("clk");
        let wait = b.wait(Vec::new());
        let p = b.process("p", vec![trigger], Vec::new(), vec![wait]);
        b.entity("E", Vec::new(), vec![clk], Vec::new(), vec![p])
    });
    assert_eq!(h.codes(), ["E2026"]);
}

#[test]
fn sensitivity_list_needs_signals() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("integer");
        let value = b.int(3);
        let c = b.constant("k", mark, Some(value));
        let trigger = b.name("k");
        let null = b.null();
        let p = b.process("p", vec![trigger], Vec::new(), vec![null]);
        b.entity("E", Vec::new(), Vec::new(), vec![c], vec![p])
    });
    assert_eq!(h.codes(), ["E2031"]);
}

#[test]
fn assignment_targets() {
    let mut h = Harness::new();
    h.check(|b| {
        let mark = b.mark("bit");
        let input = b.port("a", PortMode::In, mark, None);
        let mark = b.mark("integer");
        let value = b.int(3);
        let c = b.constant("k", mark, Some(value));

        let (target, value) = (b.name("a"), b.name("'0'"));
        let to_in = b.signal_assign(target, value);
        let (target, value) = (b.name("k"), b.int(4));
        let to_const = b.var_assign(target, value);
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), Vec::new(), vec![to_in, to_const, wait]);
        b.entity("E", Vec::new(), vec![input], vec![c], vec![p])
    });
    assert_eq!(h.codes(), ["E2019", "E2018"]);
}

#[test]
fn reading_out_port_depends_on_revision() {
    let unit = |b: &mut TreeBuilder<'_>| {
        let mark = b.mark("bit");
        let q = b.port("q", PortMode::Out, mark, None);
        let mark = b.mark("bit");
        let s = b.signal("s", mark, None);
        let (target, value) = (b.name("s"), b.name("q"));
        let assign = b.cond_assign("copy", target, value);
        b.entity("E", Vec::new(), vec![q], vec![s], vec![assign])
    };

    let mut h = Harness::new();
    h.check(unit);
    assert_eq!(h.codes(), ["E2020"]);

    let options = Options {
        standard: StandardRevision::Vhdl08,
        ..Options::default()
    };
    let mut h = Harness::with_options(options);
    let (_, errors) = h.check(unit);
    assert_eq!(errors, 0, "{:?}", h.codes());
}

#[test]
fn indexing_and_fields() {
    let mut h = Harness::new();
    let (_, errors) = h.check(|b| {
        let range = b.to(0, 7);
        let vec_mark = b.constrained("bit_vector", &[range]);
        let v = b.signal("v", vec_mark, None);
        let (m1, m2) = (b.mark("integer"), b.mark("bit"));
        let rec = b.type_record("rec", &[("n", m1), ("b", m2)]);
        let mark = b.mark("rec");
        let r = b.signal("r", mark, None);

        let (prefix, idx) = (b.name("v"), b.int(3));
        let elem = b.index(prefix, &[idx]);
        let prefix = b.name("r");
        let field = b.field(prefix, "b");
        let assign = b.cond_assign("a", field, elem);

        let prefix = b.name("r");
        let missing = b.field(prefix, "nope");
        let value = b.name("'1'");
        let bad = b.cond_assign("b", missing, value);
        b.entity("E", Vec::new(), Vec::new(), vec![v, rec, r], vec![assign, bad])
    });
    assert_eq!(errors, 1);
    assert_eq!(h.codes(), ["E2034"]);
}

#[test]
fn attribute_prefixes() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let range = b.to(0, 15);
        let nibble = b.type_range("nibble", range);
        let mark = b.mark("nibble");
        let prefix = b.name("nibble");
        let high = b.attr(prefix, AttrKind::High);
        let top = b.constant("TOP", mark, Some(high));
        let mark = b.mark("boolean");
        let prefix = b.name("top");
        let len = b.attr(prefix, AttrKind::Length);
        let bad = b.constant("BAD", mark, Some(len));
        vec![nibble, top, bad]
    }));
    assert_eq!(errors, 1);
    assert_eq!(h.codes(), ["E2032"]);
    let top = h.decl(pkg, "TOP");
    let attr = h.store.tree(h.store.tree(top).value.unwrap());
    assert_eq!(h.store.type_name(attr.ty.unwrap()), "NIBBLE");
}

/// `entity child is generic (width : integer); port (i : in bit; o : out bit)`
fn child_entity(b: &mut TreeBuilder<'_>) -> Tree {
    let mark = b.mark("integer");
    let width = b.generic("width", mark, None);
    let (mi, mo) = (b.mark("bit"), b.mark("bit"));
    let i = b.port("i", PortMode::In, mi, None);
    let o = b.port("o", PortMode::Out, mo, None);
    b.entity("child", vec![width], vec![i, o], Vec::new(), Vec::new())
}

#[test]
fn instance_maps_are_normalised() {
    let mut h = Harness::new();
    h.check(child_entity);
    h.check(|b| b.entity("top", Vec::new(), Vec::new(), Vec::new(), Vec::new()));
    let (arch, errors) = h.check(|b| {
        let (ma, mb) = (b.mark("bit"), b.mark("bit"));
        let (sa, sb) = (b.signal("a", ma, None), b.signal("b", mb, None));
        let width = b.int(8);
        let generics = vec![b.pos(width)];
        let (i, o) = (b.name("a"), b.name("b"));
        let ports = vec![b.named("o", o), b.named("i", i)];
        let inst = b.instance("u0", "work.child", None, generics, ports);
        b.architecture("rtl", "top", vec![sa, sb], vec![inst])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());

    let inst = h.store.tree(arch).stmts[0];
    let node = h.store.tree(inst);
    assert!(node.reference.is_some());
    let generic = h.store.tree(node.genmaps[0]);
    assert_eq!(generic.ident, Some(Ident::new("WIDTH")));
    assert_eq!(generic.assoc, Some(hdlc_object::AssocKind::Named));
}

#[test]
fn instance_association_errors() {
    let mut h = Harness::new();
    h.check(child_entity);
    h.check(|b| b.entity("top", Vec::new(), Vec::new(), Vec::new(), Vec::new()));
    h.check(|b| {
        let mark = b.mark("bit");
        let sa = b.signal("a", mark, None);
        let (i, j) = (b.name("a"), b.name("a"));
        let ports = vec![b.named("i", i), b.named("nope", j)];
        let inst = b.instance("u0", "child", Some("missing"), Vec::new(), ports);
        b.architecture("rtl", "top", vec![sa], vec![inst])
    });
    // unknown architecture, missing generic, unknown port
    assert_eq!(h.codes(), ["E2038", "E2016", "E2014"]);
}

#[test]
fn port_modes_must_be_compatible() {
    let mut h = Harness::new();
    h.check(child_entity);
    h.check(|b| {
        let (mx, my) = (b.mark("bit"), b.mark("bit"));
        let x = b.port("x", PortMode::In, mx, None);
        let y = b.port("y", PortMode::In, my, None);
        b.entity("wrap", Vec::new(), vec![x, y], Vec::new(), Vec::new())
    });
    let (_, errors) = h.check(|b| {
        let width = b.int(1);
        let generics = vec![b.named("width", width)];
        let (i, o) = (b.name("x"), b.name("y"));
        let ports = vec![b.named("i", i), b.named("o", o)];
        let inst = b.instance("u0", "child", None, generics, ports);
        b.architecture("rtl", "wrap", Vec::new(), vec![inst])
    });
    assert_eq!(errors, 1);
    assert_eq!(h.codes(), ["E2045"]);
}

#[test]
fn port_actual_must_be_signal() {
    let mut h = Harness::new();
    h.check(child_entity);
    h.check(|b| b.entity("top", Vec::new(), Vec::new(), Vec::new(), Vec::new()));
    h.check(|b| {
        let width = b.int(1);
        let generics = vec![b.pos(width)];
        let zero = b.name("'0'");
        let ports = vec![b.pos(zero)];
        let inst = b.instance("u0", "child", None, generics, ports);
        b.architecture("rtl", "top", Vec::new(), vec![inst])
    });
    assert_eq!(h.codes(), ["E2046"]);
}

#[test]
fn input_port_takes_expression_in_vhdl_2008() {
    let options = Options {
        standard: StandardRevision::Vhdl08,
        ..Options::default()
    };
    let mut h = Harness::with_options(options);
    h.check(child_entity);
    h.check(|b| b.entity("top", Vec::new(), Vec::new(), Vec::new(), Vec::new()));
    let (_, errors) = h.check(|b| {
        let width = b.int(1);
        let generics = vec![b.pos(width)];
        let zero = b.name("'0'");
        let ports = vec![b.pos(zero)];
        let inst = b.instance("u0", "child", None, generics, ports);
        b.architecture("rtl", "top", Vec::new(), vec![inst])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
}

#[test]
fn error_limit_stops_reporting() {
    let options = Options {
        error_limit: Some(1),
        ..Options::default()
    };
    let mut h = Harness::with_options(options);
    let (_, errors) = h.check(package_with("P", |b| {
        let (m1, m2) = (b.mark("nothing"), b.mark("nothing"));
        vec![b.constant("A", m1, None), b.constant("B", m2, None)]
    }));
    assert_eq!(errors, 1);
    assert_eq!(h.session.diagnostics().len(), 1);
}

#[test]
fn use_clause_makes_package_visible() {
    let mut h = Harness::new();
    h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let value = b.int(42);
        vec![b.constant("ANSWER", mark, Some(value))]
    }));
    let (_, errors) = h.check(|b| {
        let mark = b.mark("integer");
        let value = b.name("answer");
        let c = b.constant("COPY", mark, Some(value));
        let pkg = b.package("Q", vec![c]);
        b.use_all(pkg, "work.p")
    });
    assert_eq!(errors, 0, "{:?}", h.codes());

    let (_, errors) = h.check(|b| {
        let mark = b.mark("integer");
        let value = b.name("work.p.answer");
        let c = b.constant("COPY", mark, Some(value));
        b.package("R", vec![c])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
}

#[test]
fn missing_use_unit() {
    let mut h = Harness::new();
    h.check(|b| {
        let pkg = b.package("Q", Vec::new());
        b.use_all(pkg, "work.absent")
    });
    assert_eq!(h.codes(), ["E2011"]);
}

#[test]
fn relaxed_universal_bound() {
    let mut options = Options::default();
    options.relax.insert(RelaxRules::UNIVERSAL_BOUND);
    let mut h = Harness::with_options(options);
    let (_, errors) = h.check(|b| {
        let (one, two, four) = (b.int(1), b.int(2), b.int(4));
        let high = b.binary("*", two, four);
        let range = b.range(one, hdlc_object::Direction::To, high);
        let null = b.null();
        let lp = b.for_("i", range, vec![null]);
        let wait = b.wait(Vec::new());
        let p = b.process("p", Vec::new(), Vec::new(), vec![lp, wait]);
        b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
    });
    assert_eq!(errors, 0, "{:?}", h.codes());
}

#[test]
fn checked_units_are_found_by_name() {
    let mut h = Harness::new();
    let (pkg, errors) = h.check(package_with("P", |b| {
        let mark = b.mark("integer");
        let one = b.int(1);
        vec![b.constant("C", mark, Some(one))]
    }));
    assert_eq!(errors, 0);
    assert_eq!(h.store.unit(Ident::new("WORK.P")), Some(pkg));
}
