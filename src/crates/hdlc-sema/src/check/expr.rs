// src/check/expr.rs
//
// Expressions and overload resolution - impl Checker methods.

use hdlc_identity::{Ident, Loc};
use hdlc_object::{
    AssocKind, AttrKind, Flags, Literal, PortMode, Tree, TreeKind, TreeNode, Type, TypeKind,
};
use smallvec::SmallVec;

use super::Checker;
use crate::errors::SemanticError;
use crate::options::{RelaxRules, StandardRevision};
use crate::scope::{Candidates, Visible, is_overloadable};

/// What is known about an actual before overload resolution.
#[derive(Clone, Debug)]
enum ArgClass {
    Known(Type),
    /// Aggregates take their type from the formal.
    Aggregate,
    /// An overloaded name: one possible type per visible meaning.
    Overloaded(SmallVec<[Type; 4]>),
    Error,
}

#[derive(Debug)]
struct Actual {
    assoc: Tree,
    value: Tree,
    formal: Option<Ident>,
    class: ArgClass,
}

/// A candidate accepting the actuals: the actual bound to each formal.
#[derive(Debug)]
struct Match {
    decl: Tree,
    slots: Vec<Option<usize>>,
    score: u32,
}

impl Checker<'_> {
    /// Type an expression. `expected` only guides the choice between
    /// overloads; callers report mismatches.
    pub(super) fn expr(&mut self, expr: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(expr);
        match node.kind {
            TreeKind::Literal => self.literal(expr, expected),
            TreeKind::Ref => self.name(expr, expected),
            TreeKind::FCall => self.call(expr, expected),
            TreeKind::ArrayRef => self.index(expr),
            TreeKind::RecordRef => self.field(expr),
            TreeKind::AttrRef => self.attribute(expr),
            TreeKind::Aggregate => self.aggregate(expr, expected),
            TreeKind::Range => self.range(expr, expected),
            kind => {
                let error = SemanticError::NotAnExpression {
                    what: "construct",
                    name: format!("{kind:?}"),
                };
                let loc = node.loc;
                self.error(error, loc);
                self.error_ty
            }
        }
    }

    /// Type an expression that must be of type `expected`.
    pub(super) fn check_expr(&mut self, expr: Tree, expected: Type) -> Type {
        let found = self.expr(expr, Some(expected));
        if self.compatible(expected, found) {
            self.retype_universal(expr, expected);
        } else {
            let loc = self.loc(expr);
            self.mismatch(expected, found, loc);
        }
        found
    }

    pub(super) fn condition(&mut self, expr: Tree) {
        let boolean = self.std.boolean;
        let found = self.expr(expr, Some(boolean));
        if !self.is_error(found) && self.store.base_type(found) != boolean {
            let error = SemanticError::ConditionNotBoolean {
                found: self.type_name(found),
            };
            let loc = self.loc(expr);
            self.error(error, loc);
        }
    }

    /// A numeric literal of universal type takes the base type of the
    /// context it converts to.
    pub(super) fn retype_universal(&mut self, expr: Tree, to: Type) {
        if self.is_error(to) {
            return;
        }
        let base = self.store.base_type(to);
        let node = self.store.tree(expr);
        let universal = node.ty.filter(|&ty| self.store.is_universal(ty));
        if node.kind == TreeKind::Literal
            && let Some(ty) = universal
            && !self.store.is_universal(base)
            && self.store.type_kind(ty) == self.store.type_kind(base)
        {
            self.set_ty(expr, base);
        }
    }

    fn literal(&mut self, expr: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(expr);
        let kind = match node.literal {
            Some(Literal::Int(_)) => TypeKind::Integer,
            Some(Literal::Real(_)) => TypeKind::Real,
            Some(Literal::Enum(_)) | None => return node.ty.unwrap_or(self.error_ty),
        };
        let ty = match expected {
            Some(e) if !self.is_error(e) && self.store.type_kind(e) == kind => {
                self.store.base_type(e)
            }
            _ if kind == TypeKind::Integer => self.std.universal_integer,
            _ => self.std.universal_real,
        };
        self.set_ty(expr, ty);
        ty
    }

    // Names

    fn name(&mut self, expr: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(expr);
        let (name, loc) = (node.name(), node.loc);
        let Some(found) = self.lookup(name, loc) else {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        };
        if found.len() == 1 && !is_overloadable(self.store, found[0].decl) {
            return self.object_ref(expr, found[0], name, loc);
        }

        let candidates: SmallVec<[Tree; 4]> = found
            .iter()
            .map(|v| v.decl)
            .filter(|&d| {
                let n = self.store.tree(d);
                n.kind == TreeKind::EnumLit
                    || n.params.iter().all(|&p| self.store.tree(p).value.is_some())
            })
            .collect();
        let Some(chosen) = self.select(name, &candidates, &[], expected, loc) else {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        };
        if self.store.tree(chosen.decl).kind == TreeKind::EnumLit {
            let ty = self.decl_ty(chosen.decl);
            self.resolve(expr, chosen.decl, ty);
            return ty;
        }
        self.finish_call(expr, name, chosen, &[])
    }

    fn object_ref(&mut self, expr: Tree, visible: Visible, name: Ident, loc: Loc) -> Type {
        let decl = visible.decl;
        let dnode = self.store.tree(decl);
        let (kind, mode) = (dnode.kind, dnode.mode);
        let what = match kind {
            TreeKind::ConstDecl
            | TreeKind::VarDecl
            | TreeKind::SignalDecl
            | TreeKind::PortDecl
            | TreeKind::GenericDecl
            | TreeKind::ParamDecl => None,
            TreeKind::TypeDecl | TreeKind::SubtypeDecl => Some("type"),
            _ => Some("declaration"),
        };
        if let Some(what) = what {
            let error = SemanticError::NotAnExpression {
                what,
                name: name.to_string(),
            };
            self.error(error, loc);
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }

        let reads_out_port = kind == TreeKind::PortDecl
            && mode == Some(PortMode::Out)
            && !self.in_target
            && self.options.standard < StandardRevision::Vhdl08
            && !self.options.is_relaxed(RelaxRules::OUT_PORT_READ);
        if reads_out_port {
            self.error(SemanticError::ReadOutPort { name: name.to_string() }, loc);
        }
        if let Some(sub) = self.subprogram
            && sub.pure
            && matches!(kind, TreeKind::VarDecl | TreeKind::SignalDecl | TreeKind::PortDecl)
            && visible.depth < sub.depth
        {
            let error = SemanticError::PureFunctionReference {
                function: sub.name.to_string(),
                name: name.to_string(),
            };
            self.error(error, loc);
        }

        let ty = self.decl_ty(decl);
        self.resolve(expr, decl, ty);
        ty
    }

    // Calls

    fn call(&mut self, expr: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(expr);
        let (name, loc, params) = (node.name(), node.loc, node.params.clone());
        let Some(found) = self.lookup(name, loc) else {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        };

        if found.len() == 1 && !is_overloadable(self.store, found[0].decl) {
            return self.call_of_object(expr, found, name, loc);
        }

        let candidates: SmallVec<[Tree; 4]> = found
            .iter()
            .map(|v| v.decl)
            .filter(|&d| {
                matches!(
                    self.store.tree(d).kind,
                    TreeKind::FuncDecl | TreeKind::FuncBody
                )
            })
            .collect();
        let actuals = self.actuals(&params);
        let Some(chosen) = self.select(name, &candidates, &actuals, expected, loc) else {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        };
        self.finish_call(expr, name, chosen, &actuals)
    }

    /// `X(I)` where `X` names an object is an indexed name.
    fn call_of_object(&mut self, expr: Tree, found: Candidates, name: Ident, loc: Loc) -> Type {
        let kind = self.store.tree(found[0].decl).kind;
        if matches!(kind, TreeKind::TypeDecl | TreeKind::SubtypeDecl) {
            let error = SemanticError::NotAnExpression {
                what: "type",
                name: name.to_string(),
            };
            self.error(error, loc);
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }
        let prefix = self.alloc(TreeNode::new(TreeKind::Ref, loc).with_ident(name));
        let node = self.store.tree_mut(expr);
        node.kind = TreeKind::ArrayRef;
        node.ident = None;
        node.reference = None;
        node.value = Some(prefix);
        self.index(expr)
    }

    /// Classify the actuals of a call. Actuals whose type depends on the
    /// chosen overload are left unchecked until after resolution.
    fn actuals(&mut self, params: &[Tree]) -> Vec<Actual> {
        let mut out = Vec::with_capacity(params.len());
        let mut named = false;
        for &assoc in params {
            let node = self.store.tree(assoc);
            let (kind, ident, value, loc) = (node.assoc, node.ident, node.value, node.loc);
            let Some(value) = value else { continue };
            let formal = match kind.unwrap_or(AssocKind::Positional) {
                AssocKind::Named => {
                    named = true;
                    ident
                }
                AssocKind::Positional if named => {
                    self.error(SemanticError::PositionalAfterNamed, loc);
                    continue;
                }
                AssocKind::Positional | AssocKind::Others => None,
            };
            let class = self.classify(value);
            out.push(Actual {
                assoc,
                value,
                formal,
                class,
            });
        }
        out
    }

    fn classify(&mut self, value: Tree) -> ArgClass {
        let node = self.store.tree(value);
        match node.kind {
            TreeKind::Aggregate => return ArgClass::Aggregate,
            TreeKind::Ref if !node.name().as_str().contains('.') => {
                let found = self.scope.lookup(self.store, node.name());
                let overloaded = !found.is_empty()
                    && found.iter().all(|v| is_overloadable(self.store, v.decl));
                if overloaded {
                    let types: SmallVec<[Type; 4]> = found
                        .iter()
                        .filter_map(|v| {
                            let n = self.store.tree(v.decl);
                            let parameterless = n.kind == TreeKind::EnumLit || n.params.is_empty();
                            n.ty.filter(|_| parameterless)
                        })
                        .collect();
                    if !types.is_empty() {
                        return ArgClass::Overloaded(types);
                    }
                }
            }
            _ => {}
        }
        let ty = self.expr(value, None);
        if self.is_error(ty) {
            ArgClass::Error
        } else {
            ArgClass::Known(ty)
        }
    }

    /// Bind actuals to the formals of `decl`. `None` if the candidate cannot
    /// accept them.
    fn match_candidate(&self, decl: Tree, actuals: &[Actual]) -> Option<Match> {
        let node = self.store.tree(decl);
        let formals: SmallVec<[(Option<Ident>, Type, bool); 4]> = node
            .params
            .iter()
            .map(|&p| {
                let n = self.store.tree(p);
                (n.ident, n.ty.unwrap_or(self.error_ty), n.value.is_some())
            })
            .collect();

        let mut slots = vec![None; formals.len()];
        let mut next = 0;
        for (i, actual) in actuals.iter().enumerate() {
            let pos = match actual.formal {
                Some(name) => formals.iter().position(|f| f.0 == Some(name))?,
                None => {
                    next += 1;
                    next - 1
                }
            };
            if slots.get(pos)?.is_some() {
                return None;
            }
            slots[pos] = Some(i);
        }

        let mut score = 0;
        for (slot, &(_, formal, has_default)) in slots.iter().zip(&formals) {
            match slot {
                Some(i) => score += self.arg_score(formal, &actuals[*i].class)?,
                None if has_default => {}
                None => return None,
            }
        }
        Some(Match { decl, slots, score })
    }

    /// Exact matches score 2, implicit conversions from universal types 1.
    fn arg_score(&self, formal: Type, class: &ArgClass) -> Option<u32> {
        if self.is_error(formal) {
            return Some(0);
        }
        match class {
            ArgClass::Error => Some(0),
            ArgClass::Known(ty) if self.store.same_base(formal, *ty) => Some(2),
            ArgClass::Known(ty) => self.compatible(formal, *ty).then_some(1),
            ArgClass::Aggregate => matches!(
                self.store.type_kind(formal),
                TypeKind::Array | TypeKind::Record
            )
            .then_some(1),
            ArgClass::Overloaded(types) => types
                .iter()
                .any(|&t| self.store.same_base(formal, t))
                .then_some(2),
        }
    }

    /// Pick the one candidate matching the actuals and the expected result
    /// type. Reports no match or an ambiguity.
    fn select(
        &mut self,
        name: Ident,
        candidates: &[Tree],
        actuals: &[Actual],
        expected: Option<Type>,
        loc: Loc,
    ) -> Option<Match> {
        let expected = expected.filter(|&e| !self.is_error(e));
        let mut matches: Vec<Match> = candidates
            .iter()
            .filter_map(|&d| self.match_candidate(d, actuals))
            .filter(|m| expected.is_none_or(|e| self.compatible(e, self.decl_ty(m.decl))))
            .collect();
        let poisoned = actuals.iter().any(|a| matches!(a.class, ArgClass::Error));

        if matches.is_empty() {
            if !poisoned {
                let error = SemanticError::NoMatchingOverload {
                    name: name.to_string(),
                    signature: self.signature(actuals, expected),
                };
                self.error(error, loc);
            }
            return None;
        }

        // A specific result type picks its own operators over the universal
        // ones, so that folding happens in the range of that type.
        if let Some(e) = expected
            && !self.store.is_universal(self.store.base_type(e))
            && matches
                .iter()
                .any(|m| self.store.same_base(e, self.decl_ty(m.decl)))
        {
            matches.retain(|m| self.store.same_base(e, self.decl_ty(m.decl)));
        }
        let best = matches.iter().map(|m| m.score).max().unwrap_or(0);
        matches.retain(|m| m.score == best);
        if matches.len() > 1 {
            if !poisoned {
                let error = if actuals.is_empty() {
                    SemanticError::AmbiguousName {
                        name: name.to_string(),
                    }
                } else {
                    SemanticError::AmbiguousCall {
                        name: name.to_string(),
                    }
                };
                self.error(error, loc);
            }
            return None;
        }
        matches.pop()
    }

    /// `T1, T2 return R` for diagnostics.
    fn signature(&self, actuals: &[Actual], expected: Option<Type>) -> String {
        let args: Vec<String> = actuals
            .iter()
            .map(|a| match &a.class {
                ArgClass::Known(ty) => self.type_name(*ty),
                ArgClass::Aggregate => String::from("aggregate"),
                ArgClass::Overloaded(types) => types
                    .iter()
                    .map(|&t| self.type_name(t))
                    .collect::<Vec<_>>()
                    .join("|"),
                ArgClass::Error => String::from("?"),
            })
            .collect();
        let mut text = args.join(", ");
        if let Some(ty) = expected {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str("return ");
            text.push_str(&self.type_name(ty));
        }
        text
    }

    /// Annotate a resolved call: actuals in formal order with defaults
    /// filled in, deferred actuals checked against their formals.
    fn finish_call(&mut self, expr: Tree, name: Ident, chosen: Match, actuals: &[Actual]) -> Type {
        let decl = chosen.decl;
        let dnode = self.store.tree(decl);
        let impure = dnode.flags.contains(Flags::IMPURE);
        let formals: Vec<(Type, Option<Tree>)> = dnode
            .params
            .iter()
            .map(|&p| {
                let n = self.store.tree(p);
                (n.ty.unwrap_or(self.error_ty), n.value)
            })
            .collect();
        let loc = self.loc(expr);

        let mut params = Vec::with_capacity(formals.len());
        for (pos, (slot, &(formal, default))) in chosen.slots.iter().zip(&formals).enumerate() {
            let assoc = match slot {
                Some(i) => {
                    let actual = &actuals[*i];
                    match actual.class {
                        ArgClass::Aggregate | ArgClass::Overloaded(_) => {
                            self.check_expr(actual.value, formal);
                        }
                        ArgClass::Known(_) => self.retype_universal(actual.value, formal),
                        ArgClass::Error => {}
                    }
                    let node = self.store.tree_mut(actual.assoc);
                    node.assoc = Some(AssocKind::Positional);
                    node.ident = None;
                    node.position = pos as u32;
                    actual.assoc
                }
                None => {
                    let Some(default) = default else { continue };
                    let mut node = TreeNode::new(TreeKind::Param, loc);
                    node.value = Some(default);
                    node.assoc = Some(AssocKind::Positional);
                    node.position = pos as u32;
                    self.alloc(node)
                }
            };
            params.push(assoc);
        }

        if impure
            && let Some(sub) = self.subprogram
            && sub.pure
            && !self.options.is_relaxed(RelaxRules::IMPURE)
        {
            let error = SemanticError::ImpureCall {
                caller: sub.name.to_string(),
                callee: name.to_string(),
            };
            self.error(error, loc);
        }

        let ty = self.decl_ty(decl);
        let node = self.store.tree_mut(expr);
        node.kind = TreeKind::FCall;
        node.params = params;
        node.reference = Some(decl);
        node.ty = Some(ty);
        ty
    }

    // Indexed, selected and attribute names

    pub(super) fn index(&mut self, expr: Tree) -> Type {
        let node = self.store.tree(expr);
        let (prefix, params, loc) = (node.value, node.params.clone(), node.loc);
        let Some(prefix) = prefix else {
            return self.error_ty;
        };
        let pty = self.expr(prefix, None);
        if self.is_error(pty) {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }
        if self.store.type_kind(pty) != TypeKind::Array {
            let error = SemanticError::NotAnArray {
                found: self.type_name(pty),
            };
            self.error(error, loc);
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }

        let dims = self
            .store
            .get_type(self.store.base_type(pty))
            .map_or(0, |n| n.index.len());
        if params.len() != dims {
            let error = SemanticError::WrongIndexCount {
                expected: dims,
                found: params.len(),
            };
            self.error(error, loc);
        }
        for (dim, &param) in params.iter().enumerate() {
            let Some(value) = self.store.tree(param).value else {
                continue;
            };
            match self.store.index_type(pty, dim) {
                Some(index) => self.check_expr(value, index),
                None => self.expr(value, None),
            };
        }

        let elem = self.store.element_type(pty).unwrap_or(self.error_ty);
        self.set_ty(expr, elem);
        elem
    }

    fn field(&mut self, expr: Tree) -> Type {
        let node = self.store.tree(expr);
        let (prefix, field, loc) = (node.value, node.name(), node.loc);
        let Some(prefix) = prefix else {
            return self.error_ty;
        };
        let pty = self.expr(prefix, None);
        if self.is_error(pty) {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }
        let member = self
            .store
            .get_type(self.store.base_type(pty))
            .filter(|n| n.kind == TypeKind::Record)
            .and_then(|n| {
                n.members
                    .iter()
                    .copied()
                    .find(|&m| self.store.tree(m).ident == Some(field))
            });
        let Some(member) = member else {
            let error = SemanticError::NoSuchField {
                ty: self.type_name(pty),
                field: field.to_string(),
            };
            self.error(error, loc);
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        };
        let ty = self.decl_ty(member);
        self.resolve(expr, member, ty);
        ty
    }

    fn attribute(&mut self, expr: Tree) -> Type {
        let node = self.store.tree(expr);
        let (prefix, attr, loc) = (node.value, node.attr, node.loc);
        let (Some(prefix), Some(attr)) = (prefix, attr) else {
            return self.error_ty;
        };

        let pnode = self.store.tree(prefix);
        let type_decl = if pnode.kind == TreeKind::Ref {
            let found = self.scope.lookup(self.store, pnode.name());
            found.first().map(|v| v.decl).filter(|&d| {
                found.len() == 1
                    && matches!(
                        self.store.tree(d).kind,
                        TreeKind::TypeDecl | TreeKind::SubtypeDecl
                    )
            })
        } else {
            None
        };
        let (pty, names_type) = match type_decl {
            Some(decl) => {
                let ty = self.decl_ty(decl);
                self.resolve(prefix, decl, ty);
                (ty, true)
            }
            None => (self.expr(prefix, None), false),
        };
        if self.is_error(pty) {
            self.set_ty(expr, self.error_ty);
            return self.error_ty;
        }

        let kind = self.store.type_kind(pty);
        let scalar_type = names_type
            && matches!(kind, TypeKind::Integer | TypeKind::Real | TypeKind::Enum);
        let (ty, expected) = match attr {
            AttrKind::Left | AttrKind::Right | AttrKind::Low | AttrKind::High => {
                let ty = if scalar_type {
                    Some(pty)
                } else if kind == TypeKind::Array {
                    self.store.index_type(pty, 0)
                } else {
                    None
                };
                (ty, "a scalar type or an array")
            }
            AttrKind::Length => (
                (kind == TypeKind::Array).then_some(self.std.universal_integer),
                "an array",
            ),
            AttrKind::Ascending => (
                (scalar_type || kind == TypeKind::Array).then_some(self.std.boolean),
                "a scalar type or an array",
            ),
        };
        match ty {
            Some(ty) => {
                self.set_ty(expr, ty);
                ty
            }
            None => {
                let error = SemanticError::BadAttributePrefix {
                    attr: format!("{attr:?}").to_ascii_uppercase(),
                    expected,
                };
                self.error(error, loc);
                self.set_ty(expr, self.error_ty);
                self.error_ty
            }
        }
    }

    // Aggregates

    fn aggregate(&mut self, expr: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(expr);
        let (params, loc) = (node.params.clone(), node.loc);
        let target = match expected {
            Some(e) if !self.is_error(e) => e,
            Some(_) => {
                self.set_ty(expr, self.error_ty);
                return self.error_ty;
            }
            None => {
                self.error(SemanticError::AggregateNeedsContext, loc);
                self.set_ty(expr, self.error_ty);
                return self.error_ty;
            }
        };
        match self.store.type_kind(target) {
            TypeKind::Array => self.array_aggregate(target, &params, loc),
            TypeKind::Record => self.record_aggregate(target, &params, loc),
            _ => {
                let error = SemanticError::InvalidAggregate {
                    reason: format!("type {} is not a composite type", self.type_name(target)),
                };
                self.error(error, loc);
                self.set_ty(expr, self.error_ty);
                return self.error_ty;
            }
        }
        self.set_ty(expr, target);
        target
    }

    fn invalid_aggregate(&mut self, reason: impl Into<String>, loc: Loc) {
        let error = SemanticError::InvalidAggregate {
            reason: reason.into(),
        };
        self.error(error, loc);
    }

    fn array_aggregate(&mut self, target: Type, params: &[Tree], loc: Loc) {
        let elem = self.store.element_type(target).unwrap_or(self.error_ty);
        let dims = self
            .store
            .get_type(self.store.base_type(target))
            .map_or(0, |n| n.index.len());
        if dims != 1 {
            self.invalid_aggregate("aggregates of multi-dimensional arrays are not supported", loc);
            return;
        }

        let mut others = false;
        for &assoc in params {
            let node = self.store.tree(assoc);
            let (kind, value, aloc) = (node.assoc, node.value, node.loc);
            let Some(value) = value else { continue };
            if others {
                self.invalid_aggregate("others choice must be the last association", aloc);
            }
            match kind.unwrap_or(AssocKind::Positional) {
                AssocKind::Positional => {}
                AssocKind::Named => {
                    self.invalid_aggregate("named choices are not supported in array aggregates", aloc);
                }
                AssocKind::Others => {
                    others = true;
                    if !self.store.is_constrained_array(target) {
                        self.invalid_aggregate(
                            format!(
                                "others choice needs a constrained array type, not {}",
                                self.type_name(target)
                            ),
                            aloc,
                        );
                    }
                }
            }
            self.check_expr(value, elem);
        }
    }

    fn record_aggregate(&mut self, target: Type, params: &[Tree], loc: Loc) {
        let fields: Vec<Tree> = self
            .store
            .get_type(self.store.base_type(target))
            .map(|n| n.members.clone())
            .unwrap_or_default();
        let mut done = vec![false; fields.len()];
        let mut next = 0;

        for &assoc in params {
            let node = self.store.tree(assoc);
            let (kind, ident, value, aloc) = (node.assoc, node.ident, node.value, node.loc);
            let Some(value) = value else { continue };
            let slot = match kind.unwrap_or(AssocKind::Positional) {
                AssocKind::Positional => {
                    next += 1;
                    if next > fields.len() {
                        let reason = format!("too many elements for record type {}", self.type_name(target));
                        self.invalid_aggregate(reason, aloc);
                        continue;
                    }
                    next - 1
                }
                AssocKind::Named => {
                    let Some(name) = ident else { continue };
                    match fields.iter().position(|&f| self.store.tree(f).ident == Some(name)) {
                        Some(slot) => slot,
                        None => {
                            let error = SemanticError::NoSuchField {
                                ty: self.type_name(target),
                                field: name.to_string(),
                            };
                            self.error(error, aloc);
                            continue;
                        }
                    }
                }
                AssocKind::Others => {
                    let rest: Vec<usize> = (0..fields.len()).filter(|&i| !done[i]).collect();
                    let types: Vec<Type> = rest.iter().map(|&i| self.decl_ty(fields[i])).collect();
                    if let Some(&first) = types.first() {
                        if types.iter().any(|&t| !self.store.same_base(t, first)) {
                            self.invalid_aggregate("others choice must apply to fields of one type", aloc);
                        }
                        self.check_expr(value, first);
                    }
                    for i in rest {
                        done[i] = true;
                    }
                    continue;
                }
            };
            let field = fields[slot];
            if done[slot] {
                let reason = format!("field {} is associated more than once", self.store.tree(field).name());
                self.invalid_aggregate(reason, aloc);
            }
            done[slot] = true;
            let ty = self.decl_ty(field);
            self.check_expr(value, ty);
        }

        for (i, &field) in fields.iter().enumerate() {
            if !done[i] {
                let reason = format!("missing value for field {}", self.store.tree(field).name());
                self.invalid_aggregate(reason, loc);
            }
        }
    }
}
