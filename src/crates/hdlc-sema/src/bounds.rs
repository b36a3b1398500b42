// src/bounds.rs
//
// Static bounds checking of folded units. Only violations that can be proved
// from literal values and static ranges are reported; anything else is left
// to run time.

use hdlc_identity::Loc;
use hdlc_object::{
    AssocKind, Direction, Flags, Literal, ObjectStore, StaticRange, Tree, TreeKind, Type,
    TypeKind,
};
use smallvec::SmallVec;

use crate::errors::{SemanticError, SemanticWarning};
use crate::session::Session;
use crate::simplify::literal_value;

/// Check the literal values of a unit against the bounds of their types.
/// Returns the number of errors reported.
pub fn bounds_check_unit(store: &mut ObjectStore, session: &mut Session, unit: Tree) -> u32 {
    let before = session.error_count();
    let mut checker = BoundsChecker {
        store,
        session,
        result: None,
    };
    checker.visit(unit);
    let errors = session.error_count().saturating_sub(before);
    tracing::debug!(errors, "unit bounds checked");
    errors
}

struct BoundsChecker<'a> {
    store: &'a mut ObjectStore,
    session: &'a mut Session,
    /// Result type of the enclosing function.
    result: Option<Type>,
}

impl BoundsChecker<'_> {
    fn visit(&mut self, tree: Tree) {
        if self.session.limit_reached() {
            return;
        }
        let saved = self.result;
        let node = self.store.tree(tree);
        match node.kind {
            TreeKind::FuncBody => self.result = node.ty,
            TreeKind::ConstDecl
            | TreeKind::SignalDecl
            | TreeKind::VarDecl
            | TreeKind::GenericDecl
            | TreeKind::PortDecl
            | TreeKind::ParamDecl => {
                if let (Some(value), Some(ty)) = (node.value, node.ty) {
                    self.value(value, ty);
                }
            }
            TreeKind::VarAssign | TreeKind::SignalAssign | TreeKind::CondAssign => {
                let target_ty = node.target.and_then(|t| self.store.tree(t).ty);
                if let (Some(value), Some(ty)) = (node.value, target_ty) {
                    self.value(value, ty);
                }
            }
            TreeKind::Return => {
                if let (Some(value), Some(ty)) = (node.value, self.result) {
                    self.value(value, ty);
                }
            }
            TreeKind::FCall => self.arguments(tree),
            TreeKind::ArrayRef => self.index(tree),
            TreeKind::Aggregate => self.aggregate(tree),
            TreeKind::TypeMark => self.constraint(tree),
            TreeKind::For => self.loop_range(tree),
            _ => {}
        }

        let mut children: SmallVec<[Tree; 8]> = SmallVec::new();
        self.store.tree(tree).for_each_child(|child| children.push(child));
        for child in children {
            self.visit(child);
        }
        self.result = saved;
    }

    /// A value assigned to an object of type `ty`.
    fn value(&mut self, value: Tree, ty: Type) {
        let Some(v) = literal_value(self.store, value).and_then(Literal::as_int) else {
            return;
        };
        if self.store.is_universal(ty) {
            return;
        }
        let Some(range) = self.store.discrete_range(ty) else {
            return;
        };
        if !range.contains(v) {
            let error = SemanticError::ValueOutOfBounds {
                value: self.display(ty, v),
                low: self.display(ty, range.low()),
                high: self.display(ty, range.high()),
                ty: self.store.type_name(ty),
            };
            self.error(error, value);
        }
    }

    /// Actuals of a user function call against the formal types.
    fn arguments(&mut self, call: Tree) {
        let node = self.store.tree(call);
        let Some(decl) = node.reference else { return };
        let dnode = self.store.tree(decl);
        if dnode.builtin.is_some() {
            return;
        }
        let pairs: SmallVec<[(Tree, Type); 4]> = node
            .params
            .iter()
            .zip(&dnode.params)
            .filter_map(|(&actual, &formal)| {
                Some((self.store.tree(actual).value?, self.store.tree(formal).ty?))
            })
            .collect();
        for (value, ty) in pairs {
            self.value(value, ty);
        }
    }

    fn index(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let Some(pty) = node.value.and_then(|p| self.store.tree(p).ty) else {
            return;
        };
        if self.store.type_kind(pty) != TypeKind::Array || node.params.is_empty() {
            return;
        }
        let params = node.params.clone();

        let mut proved = true;
        for (dim, param) in params.into_iter().enumerate() {
            let range = self
                .store
                .index_constraint(pty, dim)
                .and_then(|r| self.store.static_range(r));
            let index = self
                .store
                .tree(param)
                .value
                .and_then(|v| literal_value(self.store, v))
                .and_then(Literal::as_int);
            let (Some(range), Some(index)) = (range, index) else {
                proved = false;
                continue;
            };
            if !range.contains(index) {
                proved = false;
                let error = SemanticError::IndexOutOfBounds {
                    index,
                    low: range.low(),
                    high: range.high(),
                };
                self.error(error, param);
            }
        }
        if proved {
            self.store.rewrite(tree).flags.insert(Flags::BOUNDS_OK);
        }
    }

    /// Positional aggregates of a constrained array type: element count and
    /// element values.
    fn aggregate(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let Some(ty) = node.ty else { return };
        if self.store.type_kind(ty) != TypeKind::Array {
            return;
        }
        let positional = node.params.iter().all(|&p| {
            !matches!(
                self.store.tree(p).assoc,
                Some(AssocKind::Named | AssocKind::Others)
            )
        });
        let count = node.params.len() as i64;
        let values: SmallVec<[Tree; 8]> = node
            .params
            .iter()
            .filter_map(|&p| self.store.tree(p).value)
            .collect();

        if positional
            && let Some(range) = self.static_index(ty)
            && range.length() != count
        {
            let error = SemanticError::LengthMismatch {
                expected: range.length(),
                found: count,
            };
            self.error(error, tree);
        }
        if let Some(elem) = self.store.element_type(ty) {
            for value in values {
                self.value(value, elem);
            }
        }
    }

    /// Range constraints of a subtype indication against the constrained type.
    fn constraint(&mut self, mark: Tree) {
        let node = self.store.tree(mark);
        let Some(ty) = node.ty else { return };
        if node.ranges.is_empty() {
            return;
        }
        let ranges = node.ranges.clone();
        let scalar = matches!(
            self.store.type_kind(ty),
            TypeKind::Integer | TypeKind::Enum
        );
        for (dim, range) in ranges.into_iter().enumerate() {
            let parent = if scalar {
                self.store.get_type(ty).and_then(|n| n.base)
            } else {
                self.store.index_type(ty, dim)
            };
            let Some(parent) = parent else { continue };
            let (Some(bounds), Some(r)) = (
                self.store.discrete_range(parent),
                self.store.static_range(range),
            ) else {
                continue;
            };
            if r.is_null() {
                continue;
            }
            if !bounds.contains(r.low()) || !bounds.contains(r.high()) {
                let error = SemanticError::ConstraintOutOfBounds {
                    low: self.display(parent, r.low()),
                    high: self.display(parent, r.high()),
                    ty: self.store.type_name(parent),
                };
                self.error(error, range);
            }
        }
    }

    fn loop_range(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let Some(range) = node.ranges.first().and_then(|&r| self.store.static_range(r)) else {
            return;
        };
        if range.is_null() {
            let warning = SemanticWarning::NullRange {
                left: range.left,
                direction: match range.direction {
                    Direction::To => "to",
                    Direction::Downto => "downto",
                },
                right: range.right,
            };
            let loc = node.loc;
            self.session.warning(warning, loc);
        }
    }

    fn static_index(&self, ty: Type) -> Option<StaticRange> {
        let range = self.store.index_constraint(ty, 0)?;
        self.store.static_range(range)
    }

    /// Values of enumeration types print as their literal names.
    fn display(&self, ty: Type, value: i64) -> String {
        if self.store.type_kind(ty) == TypeKind::Enum {
            let base = self.store.base_type(ty);
            let name = usize::try_from(value)
                .ok()
                .and_then(|pos| self.store.get_type(base)?.members.get(pos).copied())
                .and_then(|lit| self.store.get_tree(lit)?.ident);
            if let Some(name) = name {
                return name.to_string();
            }
        }
        value.to_string()
    }

    fn error(&mut self, error: SemanticError, at: Tree) {
        let loc: Loc = self.store.tree(at).loc;
        self.session.error(error, loc);
    }
}

#[cfg(test)]
mod tests {
    use hdlc_identity::Ident;
    use hdlc_object::builder::{TreeBuilder, build_unit};
    use hdlc_object::LibraryStore;

    use super::*;
    use crate::check::check_unit;
    use crate::options::Options;
    use crate::session::Diagnostic;

    fn bounds(f: impl FnOnce(&mut TreeBuilder<'_>) -> Tree) -> (ObjectStore, Tree, Vec<Diagnostic>) {
        let mut store = ObjectStore::new();
        let libs = LibraryStore::new();
        let mut session = Session::new(Options::default());
        let id = store.insert(build_unit("bounds_test.vhd", f));
        let root = store.arena(id).and_then(|a| a.root()).unwrap();
        let errors = check_unit(&mut store, &libs, &mut session, root);
        assert_eq!(errors, 0, "{:?}", session.diagnostics());
        bounds_check_unit(&mut store, &mut session, root);
        let diags = session.diagnostics().to_vec();
        (store, root, diags)
    }

    fn codes(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().filter_map(|d| d.code.as_deref()).collect()
    }

    fn byte(b: &mut TreeBuilder<'_>) -> Tree {
        let range = b.to(0, 255);
        b.type_range("BYTE", range)
    }

    #[test]
    fn constant_value_out_of_range() {
        let (_, _, diags) = bounds(|b| {
            let byte = byte(b);
            let mark = b.mark("byte");
            let value = b.int(300);
            let c = b.constant("C", mark, Some(value));
            b.package("P", vec![byte, c])
        });
        assert_eq!(codes(&diags), ["E2510"]);
        assert!(diags[0].message.contains("300"), "{}", diags[0].message);
        assert!(diags[0].message.contains("BYTE"), "{}", diags[0].message);
    }

    #[test]
    fn enumeration_values_print_as_names() {
        let (_, _, diags) = bounds(|b| {
            let color = b.type_enum("COLOR", &["red", "green", "blue"]);
            let range = {
                let (l, r) = (b.name("red"), b.name("green"));
                b.range(l, Direction::To, r)
            };
            let mark = b.constrained("color", &[range]);
            let warm = b.subtype("WARM", mark);
            let mark = b.mark("warm");
            let value = b.name("blue");
            let c = b.constant("C", mark, Some(value));
            b.package("P", vec![color, warm, c])
        });
        assert_eq!(codes(&diags), ["E2510"]);
        assert!(diags[0].message.contains("BLUE"), "{}", diags[0].message);
        assert!(diags[0].message.contains("GREEN"), "{}", diags[0].message);
    }

    #[test]
    fn static_index_out_of_range() {
        let (store, pkg, diags) = bounds(|b| {
            let range = b.to(0, 3);
            let vec_mark = b.constrained("bit_vector", &[range]);
            let bits: Vec<Tree> = (0..4).map(|_| b.name("'0'")).collect();
            let agg = b.aggregate_of(&bits);
            let v = b.constant("V", vec_mark, Some(agg));

            let mark = b.mark("bit");
            let (prefix, idx) = (b.name("v"), b.int(2));
            let ok = b.index(prefix, &[idx]);
            let inside = b.constant("INSIDE", mark, Some(ok));

            let mark = b.mark("bit");
            let (prefix, idx) = (b.name("v"), b.int(5));
            let bad = b.index(prefix, &[idx]);
            let outside = b.constant("OUTSIDE", mark, Some(bad));
            b.package("P", vec![v, inside, outside])
        });
        assert_eq!(codes(&diags), ["E2511"]);
        assert!(diags[0].message.contains("5 out of bounds 0 to 3"), "{}", diags[0].message);

        let inside = store
            .tree(pkg)
            .decls
            .iter()
            .copied()
            .find(|&d| store.tree(d).ident == Some(Ident::new("INSIDE")))
            .unwrap();
        let value = store.tree(inside).value.unwrap();
        assert!(store.tree(value).flags.contains(Flags::BOUNDS_OK));
    }

    #[test]
    fn aggregate_length_must_match() {
        let (_, _, diags) = bounds(|b| {
            let range = b.to(0, 3);
            let vec_mark = b.constrained("bit_vector", &[range]);
            let bits: Vec<Tree> = (0..3).map(|_| b.name("'1'")).collect();
            let agg = b.aggregate_of(&bits);
            let v = b.constant("V", vec_mark, Some(agg));
            b.package("P", vec![v])
        });
        assert_eq!(codes(&diags), ["E2512"]);
        assert!(diags[0].message.contains("expected 4"), "{}", diags[0].message);
    }

    #[test]
    fn subtype_constraint_outside_parent() {
        let (_, _, diags) = bounds(|b| {
            let byte = byte(b);
            let range = b.to(10, 300);
            let mark = b.constrained("byte", &[range]);
            let wide = b.subtype("WIDE", mark);
            b.package("P", vec![byte, wide])
        });
        assert_eq!(codes(&diags), ["E2513"]);
    }

    #[test]
    fn call_arguments_and_return_values() {
        let (_, _, diags) = bounds(|b| {
            let byte = byte(b);
            let x = {
                let mark = b.mark("byte");
                b.param("x", mark)
            };
            let result = b.mark("byte");
            let big = b.int(256);
            let ret = b.ret(Some(big));
            let f = b.function("f", vec![x], result, Vec::new(), vec![ret]);

            let mark = b.mark("byte");
            let over = b.int(1000);
            let call = b.call("f", &[over]);
            let c = b.constant("C", mark, Some(call));
            b.entity("E", Vec::new(), Vec::new(), vec![byte, f, c], Vec::new())
        });
        assert_eq!(codes(&diags), ["E2510", "E2510"]);
        assert!(diags[0].message.contains("256"), "{}", diags[0].message);
        assert!(diags[1].message.contains("1000"), "{}", diags[1].message);
    }

    #[test]
    fn null_loop_range_warns() {
        let (_, _, diags) = bounds(|b| {
            let null = b.null();
            let range = b.to(5, 1);
            let lp = b.for_("i", range, vec![null]);
            let wait = b.wait(Vec::new());
            let p = b.process("p", Vec::new(), Vec::new(), vec![lp, wait]);
            b.entity("E", Vec::new(), Vec::new(), Vec::new(), vec![p])
        });
        assert_eq!(codes(&diags), ["W2501"]);
        assert!(diags[0].message.contains("5 to 1"), "{}", diags[0].message);
    }

    #[test]
    fn non_static_values_are_left_alone() {
        let (_, _, diags) = bounds(|b| {
            let mark = b.mark("natural");
            let g = b.generic("G", mark, None);
            let mark = b.mark("natural");
            let value = b.name("g");
            let c = b.constant("C", mark, Some(value));
            b.entity("E", vec![g], Vec::new(), vec![c], Vec::new())
        });
        assert!(diags.is_empty(), "{diags:?}");
    }
}
