// src/simplify.rs
//! Constant folding of checked units.
//!
//! The pass walks a unit bottom-up and replaces statically known scalar
//! expressions by literals flagged [`Flags::FOLDED`]:
//!
//! - references to scalar constants whose value is already a literal,
//! - calls to predefined operators whose arguments are constant,
//! - calls to pure user functions already registered with the evaluator,
//! - range attributes of types and of arrays with static bounds.
//!
//! Expressions are evaluated by lowering them to a parameterless function and
//! running it on the [`Evaluator`]. A trap becomes a diagnostic at the folded
//! expression and the node is flagged [`Flags::NO_FOLD`] so that running the
//! pass again reports nothing new.

use std::ops::AddAssign;

use hdlc_codegen::{EvalError, EvalOptions, Evaluator, TrapKind, Value, lower_thunk};
use hdlc_identity::{Ident, Loc};
use hdlc_object::{Flags, Literal, ObjectStore, Tree, TreeKind, TreeNode, Type, TypeKind};
use smallvec::SmallVec;

use crate::errors::SemanticError;
use crate::session::Session;

/// Name given to the functions lowered for folded expressions.
const THUNK_NAME: &str = "<fold>";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FoldingStats {
    /// Operator calls and attributes replaced by their value.
    pub folded: u32,
    /// Constant references replaced by the constant's value.
    pub propagated: u32,
    /// User function calls evaluated.
    pub calls_evaluated: u32,
}

impl FoldingStats {
    pub fn total(&self) -> u32 {
        self.folded + self.propagated + self.calls_evaluated
    }
}

impl AddAssign for FoldingStats {
    fn add_assign(&mut self, other: FoldingStats) {
        self.folded += other.folded;
        self.propagated += other.propagated;
        self.calls_evaluated += other.calls_evaluated;
    }
}

/// Fold the constant expressions of a checked unit in place.
///
/// Calls to user functions are only folded when `evaluator` is given and
/// holds the callee; predefined operators are folded either way.
pub fn simplify_unit(
    store: &mut ObjectStore,
    session: &mut Session,
    unit: Tree,
    evaluator: Option<&mut Evaluator>,
) -> FoldingStats {
    let user_calls = evaluator.is_some();
    let mut local;
    let evaluator = match evaluator {
        Some(evaluator) => evaluator,
        None => {
            let options = EvalOptions {
                jit_threshold: None,
                ..session.options().eval_options()
            };
            local = Evaluator::new(options);
            &mut local
        }
    };

    let mut folder = Folder {
        store,
        session,
        evaluator,
        user_calls,
        thunk: Ident::new(THUNK_NAME),
        stats: FoldingStats::default(),
    };
    folder.visit(unit);

    let stats = folder.stats;
    tracing::debug!(
        folded = stats.folded,
        propagated = stats.propagated,
        calls = stats.calls_evaluated,
        "unit simplified"
    );
    stats
}

struct Folder<'a> {
    store: &'a mut ObjectStore,
    session: &'a mut Session,
    evaluator: &'a mut Evaluator,
    user_calls: bool,
    thunk: Ident,
    stats: FoldingStats,
}

impl Folder<'_> {
    fn visit(&mut self, tree: Tree) {
        let mut children: SmallVec<[Tree; 8]> = SmallVec::new();
        self.store.tree(tree).for_each_child(|child| children.push(child));
        for child in children {
            if self.session.limit_reached() {
                return;
            }
            self.visit(child);
        }

        let node = self.store.tree(tree);
        if node.flags.contains(Flags::NO_FOLD) {
            return;
        }
        match node.kind {
            TreeKind::Ref => self.propagate(tree),
            TreeKind::FCall => self.call(tree),
            TreeKind::AttrRef => self.attribute(tree),
            _ => {}
        }
    }

    /// Replace a reference to a scalar constant by a copy of its literal value.
    fn propagate(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let (Some(decl), Some(ty)) = (node.reference, node.ty) else {
            return;
        };
        let dnode = self.store.tree(decl);
        if dnode.kind != TreeKind::ConstDecl
            || dnode.flags.contains(Flags::LOOP_PARAM)
            || dnode.flags.contains(Flags::DEFERRED)
            || !self.is_scalar(ty)
        {
            return;
        }
        let Some(value) = dnode.value else { return };
        let Some(literal) = literal_value(self.store, value) else {
            return;
        };
        self.replace(tree, literal, ty);
        self.stats.propagated += 1;
    }

    fn call(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let (Some(decl), Some(ty)) = (node.reference, node.ty) else {
            return;
        };
        if !self.is_scalar(ty) {
            return;
        }
        let constant_args = node.params.iter().all(|&p| {
            self.store
                .tree(p)
                .value
                .is_some_and(|v| is_constant_operand(self.store, v))
        });
        if !constant_args {
            return;
        }

        let dnode = self.store.tree(decl);
        let user = dnode.builtin.is_none();
        if user {
            if !self.user_calls || dnode.flags.contains(Flags::IMPURE) {
                return;
            }
            match dnode.ident2 {
                Some(name) if self.evaluator.is_registered(name) => {}
                _ => return,
            }
        }
        if self.evaluate(tree, ty) {
            if user {
                self.stats.calls_evaluated += 1;
            } else {
                self.stats.folded += 1;
            }
        }
    }

    /// Range attributes of a type, or of an array whose index range is static.
    fn attribute(&mut self, tree: Tree) {
        let node = self.store.tree(tree);
        let (Some(prefix), Some(ty)) = (node.value, node.ty) else {
            return;
        };
        if !self.is_scalar(ty) {
            return;
        }
        let pnode = self.store.tree(prefix);
        let Some(pty) = pnode.ty else { return };
        let names_type = pnode.reference.is_some_and(|d| {
            matches!(
                self.store.tree(d).kind,
                TreeKind::TypeDecl | TreeKind::SubtypeDecl
            )
        });
        let static_array = self.store.type_kind(pty) == TypeKind::Array
            && self
                .store
                .index_constraint(pty, 0)
                .and_then(|r| self.store.static_range(r))
                .is_some();
        let foldable = (names_type && self.store.discrete_range(pty).is_some()) || static_array;
        if foldable && self.evaluate(tree, ty) {
            self.stats.folded += 1;
        }
    }

    /// Evaluate `tree` and replace it by the result. Returns whether it was
    /// replaced.
    fn evaluate(&mut self, tree: Tree, ty: Type) -> bool {
        let func = match lower_thunk(self.store, tree, self.thunk) {
            Ok(func) => func,
            Err(e) => {
                tracing::trace!(error = %e, "expression not folded");
                return false;
            }
        };
        match self.evaluator.evaluate_function(&func, &[]) {
            Ok(value) => {
                let Some(literal) = self.literal_of(ty, &value) else {
                    return false;
                };
                self.replace(tree, literal, ty);
                true
            }
            Err(EvalError::Trap { kind, .. }) => {
                let loc = self.store.tree(tree).loc;
                self.trap(kind, ty, loc);
                self.store.rewrite(tree).flags.insert(Flags::NO_FOLD);
                false
            }
            Err(e) => {
                tracing::trace!(error = %e, "expression not folded");
                false
            }
        }
    }

    fn trap(&mut self, kind: TrapKind, ty: Type, loc: Loc) {
        let error = match kind {
            TrapKind::DivZero => SemanticError::DivisionByZero,
            TrapKind::Overflow | TrapKind::RangeFail => SemanticError::StaticOverflow {
                ty: self.store.type_name(ty),
            },
            TrapKind::IndexFail => SemanticError::StaticIndexFailure,
            TrapKind::LengthFail => SemanticError::StaticLengthFailure,
            TrapKind::AssertFail => SemanticError::StaticAssertion,
            TrapKind::Unreachable => SemanticError::MissingReturn,
            TrapKind::StepLimit => SemanticError::EvaluationLimit { limit: "step limit" },
            TrapKind::RecursionLimit => SemanticError::EvaluationLimit {
                limit: "recursion limit",
            },
        };
        self.session.error(error, loc);
    }

    fn literal_of(&self, ty: Type, value: &Value) -> Option<Literal> {
        match (self.store.type_kind(ty), value) {
            (TypeKind::Integer, Value::Int(v)) => Some(Literal::Int(*v)),
            (TypeKind::Enum, Value::Int(v)) => u32::try_from(*v).ok().map(Literal::Enum),
            (TypeKind::Real, Value::Real(v)) => Some(Literal::Real(*v)),
            _ => None,
        }
    }

    fn replace(&mut self, tree: Tree, literal: Literal, ty: Type) {
        let node = self.store.rewrite(tree);
        let mut folded = TreeNode::new(TreeKind::Literal, node.loc);
        folded.literal = Some(literal);
        folded.ty = Some(ty);
        folded.flags = Flags::FOLDED;
        *node = folded;
    }

    fn is_scalar(&self, ty: Type) -> bool {
        matches!(
            self.store.type_kind(ty),
            TypeKind::Integer | TypeKind::Enum | TypeKind::Real
        )
    }
}

/// The literal an expression denotes without evaluation: a literal or an
/// enumeration literal name.
pub(crate) fn literal_value(store: &ObjectStore, expr: Tree) -> Option<Literal> {
    let node = store.tree(expr);
    match node.kind {
        TreeKind::Literal => node.literal,
        TreeKind::Ref => {
            let decl = store.tree(node.reference?);
            (decl.kind == TreeKind::EnumLit).then_some(Literal::Enum(decl.position))
        }
        _ => None,
    }
}

/// Operands a folded call may take: literals and full constants. Lowering
/// inlines the latter.
fn is_constant_operand(store: &ObjectStore, expr: Tree) -> bool {
    if literal_value(store, expr).is_some() {
        return true;
    }
    let node = store.tree(expr);
    if node.kind != TreeKind::Ref {
        return false;
    }
    node.reference.is_some_and(|d| {
        let decl = store.tree(d);
        decl.kind == TreeKind::ConstDecl
            && decl.value.is_some()
            && !decl.flags.contains(Flags::LOOP_PARAM)
    })
}
