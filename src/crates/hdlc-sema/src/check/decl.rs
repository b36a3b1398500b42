// src/check/decl.rs
//
// Design units, declarations and type definitions - impl Checker methods.

use hdlc_identity::{Ident, Loc};
use hdlc_object::{
    AssocKind, Class, Direction, Flags, Literal, PortMode, Tree, TreeKind, TreeNode, Type,
    TypeKind, TypeNode,
};
use smallvec::SmallVec;

use super::{Checker, Place, Subprogram, visible_decls};
use crate::errors::SemanticError;
use crate::options::RelaxRules;
use crate::predefined::{declare_operators, mangle, op_class};
use crate::scope::Inserted;

fn describe_decl(kind: TreeKind) -> &'static str {
    match kind {
        TreeKind::GenericDecl => "generic",
        TreeKind::PortDecl => "port",
        TreeKind::ConstDecl => "constant",
        TreeKind::SignalDecl => "signal",
        TreeKind::VarDecl => "variable",
        TreeKind::TypeDecl => "type",
        TreeKind::SubtypeDecl => "subtype",
        TreeKind::FuncDecl => "subprogram",
        TreeKind::FuncBody => "subprogram body",
        _ => "this",
    }
}

impl Checker<'_> {
    // Design units

    pub(super) fn entity(&mut self) {
        self.scope.push();
        let node = self.store.tree(self.unit);
        let interface: Vec<Tree> = node.generics.iter().chain(&node.ports).copied().collect();
        for decl in interface {
            self.interface_decl(decl);
        }
        self.decls(self.unit);
        self.concurrent(self.unit);
        self.scope.pop();
    }

    pub(super) fn architecture(&mut self) {
        let node = self.store.tree(self.unit);
        let loc = node.loc;
        if let Some(entity) = node.ident2 {
            let name = self.qualify(entity);
            match self.load_unit(name, loc) {
                Some(root) if self.store.tree(root).kind == TreeKind::Entity => {
                    self.store.tree_mut(self.unit).reference = Some(root);
                    self.scope.push();
                    let decls = visible_decls(self.store, root);
                    self.scope.import(self.store, decls);
                }
                Some(_) => {
                    self.error(SemanticError::NotAnEntity { name: name.to_string() }, loc);
                }
                None => {}
            }
        }
        self.scope.push();
        self.decls(self.unit);
        self.concurrent(self.unit);
        self.scope.pop();
    }

    pub(super) fn package(&mut self) {
        self.scope.push();
        self.decls(self.unit);
        self.scope.pop();
    }

    pub(super) fn package_body(&mut self) {
        let node = self.store.tree(self.unit);
        let (name, loc) = (node.name(), node.loc);
        let qualified = Ident::prefix(self.work, name, '.');
        self.prefix = qualified;

        let package = match self.load_unit(qualified, loc) {
            Some(root) if self.store.tree(root).kind == TreeKind::Package => Some(root),
            Some(_) => {
                let error = SemanticError::UnitNotFound {
                    name: qualified.to_string(),
                };
                self.error(error, loc);
                None
            }
            None => None,
        };
        if let Some(package) = package {
            self.store.tree_mut(self.unit).reference = Some(package);
            self.scope.push();
            let decls = visible_decls(self.store, package);
            self.scope.import(self.store, decls);
        }

        self.scope.push();
        self.decls(self.unit);
        if let Some(package) = package {
            self.deferred_constants(package);
        }
        self.scope.pop();
    }

    /// Every deferred constant of the package needs a full declaration in
    /// the body.
    fn deferred_constants(&mut self, package: Tree) {
        let decls = self.store.tree(package).decls.clone();
        for decl in decls {
            let node = self.store.tree(decl);
            if node.kind != TreeKind::ConstDecl || !node.flags.contains(Flags::DEFERRED) {
                continue;
            }
            let (name, loc) = (node.name(), node.loc);
            let completed = self.scope.local(name).iter().any(|&d| {
                let n = self.store.tree(d);
                n.kind == TreeKind::ConstDecl && n.value.is_some()
            });
            if !completed {
                let error = SemanticError::DeferredConstantMissing {
                    name: name.to_string(),
                };
                self.error(error, loc);
            }
        }
    }

    // Declaration lists

    /// Check the declarations of `owner`, inserting the implicit operator
    /// declarations after each type.
    pub(super) fn decls(&mut self, owner: Tree) {
        let decls = self.store.tree(owner).decls.clone();
        let mut out = Vec::with_capacity(decls.len());
        for decl in decls {
            out.push(decl);
            if self.stop() {
                continue;
            }
            let implicit = self.decl(decl);
            out.extend(implicit);
        }

        for &decl in &out {
            let node = self.store.tree(decl);
            if node.kind != TreeKind::TypeDecl || node.value.is_some() {
                continue;
            }
            let incomplete = node.ty.is_some_and(|ty| {
                self.store
                    .get_type(ty)
                    .is_some_and(|t| t.kind == TypeKind::Incomplete)
            });
            if incomplete {
                let error = SemanticError::IncompleteTypeNotCompleted {
                    name: node.name().to_string(),
                };
                let loc = node.loc;
                self.error(error, loc);
            }
        }
        self.store.tree_mut(owner).decls = out;
    }

    /// Check one declaration. Returns the implicit declarations it makes.
    fn decl(&mut self, decl: Tree) -> Vec<Tree> {
        let node = self.store.tree(decl);
        let (kind, loc) = (node.kind, node.loc);
        let place = self.place;
        let allowed = match kind {
            TreeKind::SignalDecl => !place.is_sequential(),
            TreeKind::VarDecl => place.is_sequential(),
            TreeKind::FuncBody => place != Place::Package,
            TreeKind::ConstDecl
            | TreeKind::TypeDecl
            | TreeKind::SubtypeDecl
            | TreeKind::FuncDecl => true,
            _ => false,
        };
        if !allowed {
            let error = SemanticError::DeclarationNotAllowed {
                what: describe_decl(kind),
                place: place.describe(),
            };
            self.error(error, loc);
        }

        match kind {
            TreeKind::ConstDecl => self.constant(decl),
            TreeKind::SignalDecl | TreeKind::VarDecl => self.object(decl),
            TreeKind::TypeDecl => return self.type_decl(decl),
            TreeKind::SubtypeDecl => self.subtype_decl(decl),
            TreeKind::FuncDecl => {
                self.subprogram_spec(decl);
                self.declare(decl);
            }
            TreeKind::FuncBody => self.subprogram_body(decl),
            _ => {}
        }
        Vec::new()
    }

    /// Declare `decl` in the innermost region, reporting a clash.
    pub(super) fn declare(&mut self, decl: Tree) -> Option<Inserted> {
        match self.scope.insert(self.store, decl) {
            Ok(inserted) => Some(inserted),
            Err(_) => {
                let node = self.store.tree(decl);
                let error = SemanticError::DuplicateDeclaration {
                    name: node.name().to_string(),
                };
                let loc = node.loc;
                self.error(error, loc);
                None
            }
        }
    }

    /// Resolve the subtype indication of an object declaration and record
    /// its type on the declaration.
    fn mark_of(&mut self, decl: Tree) -> Type {
        let ty = match self.store.tree(decl).mark {
            Some(mark) => self.subtype_indication(mark, false),
            None => self.error_ty,
        };
        self.set_ty(decl, ty);
        ty
    }

    fn interface_decl(&mut self, decl: Tree) {
        let ty = self.mark_of(decl);
        if let Some(value) = self.store.tree(decl).value {
            self.check_expr(value, ty);
        }
        let node = self.store.tree_mut(decl);
        match node.kind {
            TreeKind::GenericDecl => {
                node.class.get_or_insert(Class::Constant);
            }
            TreeKind::PortDecl => {
                node.mode.get_or_insert(PortMode::In);
            }
            _ => {}
        }
        self.declare(decl);
    }

    fn object(&mut self, decl: Tree) {
        let ty = self.mark_of(decl);
        if let Some(value) = self.store.tree(decl).value {
            self.check_expr(value, ty);
        }
        self.declare(decl);
    }

    fn constant(&mut self, decl: Tree) {
        let node = self.store.tree(decl);
        let (value, loc, name) = (node.value, node.loc, node.name());
        let ty = self.mark_of(decl);
        match value {
            None => {
                if self.place != Place::Package {
                    let error = SemanticError::DeferredConstantOutsidePackage {
                        name: name.to_string(),
                    };
                    self.error(error, loc);
                }
            }
            Some(value) if self.store.type_kind(ty) == TypeKind::Array
                && !self.store.is_constrained_array(ty) =>
            {
                match self.positional_constraint(ty, value) {
                    Some(derived) => {
                        self.set_ty(decl, derived);
                        self.check_expr(value, derived);
                    }
                    None => {
                        let found = self.check_expr(value, ty);
                        if self.store.is_constrained_array(found) && self.compatible(ty, found) {
                            self.set_ty(decl, found);
                        }
                    }
                }
            }
            Some(value) => {
                self.check_expr(value, ty);
            }
        }
        self.declare(decl);
    }

    /// Constraint of an unconstrained array constant initialised with a
    /// positional aggregate: the index subtype's left bound upwards, one
    /// index per element.
    fn positional_constraint(&mut self, ty: Type, value: Tree) -> Option<Type> {
        let node = self.store.tree(value);
        let positional = node
            .params
            .iter()
            .all(|&p| self.store.tree(p).assoc.is_none_or(|a| a == AssocKind::Positional));
        if node.kind != TreeKind::Aggregate || !positional || node.params.is_empty() {
            return None;
        }
        let (count, loc) = (node.params.len() as i64, node.loc);
        let index = self.store.index_type(ty, 0)?;
        let left = self.store.discrete_range(index).map_or(0, |r| r.left);
        let index_base = self.store.base_type(index);

        let bound = |checker: &mut Self, v: i64| {
            let mut n = TreeNode::new(TreeKind::Literal, loc);
            n.literal = Some(Literal::Int(v));
            n.ty = Some(index_base);
            checker.alloc(n)
        };
        let low = bound(self, left);
        let high = bound(self, left + count - 1);
        let mut range = TreeNode::new(TreeKind::Range, loc);
        range.left = Some(low);
        range.right = Some(high);
        range.direction = Some(Direction::To);
        range.ty = Some(index_base);
        let range = self.alloc(range);
        Some(self.constrained(ty, &[range]))
    }

    // Types

    fn type_decl(&mut self, decl: Tree) -> Vec<Tree> {
        let node = self.store.tree(decl);
        let (name, def, loc) = (node.name(), node.value, node.loc);
        let Some(def) = def else {
            let ty = self.arena_mut().new_incomplete_type(name, Some(decl));
            self.set_ty(decl, ty);
            self.declare(decl);
            return Vec::new();
        };

        let pending = self.scope.local(name).iter().find_map(|&d| {
            let n = self.store.tree(d);
            let ty = n.ty.filter(|_| n.kind == TreeKind::TypeDecl && n.value.is_none())?;
            (self.store.get_type(ty)?.kind == TypeKind::Incomplete).then_some(ty)
        });

        let def_kind = self.store.tree(def).kind;
        let ty = match def_kind {
            TreeKind::RangeDef => self.numeric_type(decl, name, def, pending),
            TreeKind::EnumDef => self.enum_type(decl, name, def, pending),
            TreeKind::ArrayDef => self.array_type(decl, name, def, pending),
            TreeKind::RecordDef => self.record_type(decl, name, def, pending),
            TreeKind::AccessDef => self.access_type(decl, name, def, pending),
            other => panic!("INTERNAL: {other:?} is not a type definition"),
        };
        self.set_ty(decl, ty);
        self.declare(decl);
        if def_kind == TreeKind::EnumDef {
            let literals = self.store.tree(def).decls.clone();
            for literal in literals {
                self.declare(literal);
            }
        }
        self.operators(ty, loc)
    }

    /// Intern a type descriptor, or complete the pending incomplete type of
    /// the same name with it.
    fn define(&mut self, node: TypeNode, pending: Option<Type>) -> Type {
        if let Some(ty) = pending
            && self.arena_mut().complete_type(ty, node.clone()).is_ok()
        {
            return ty;
        }
        self.intern(node)
    }

    fn numeric_type(&mut self, decl: Tree, name: Ident, def: Tree, pending: Option<Type>) -> Type {
        let Some(&range) = self.store.tree(def).ranges.first() else {
            return self.error_ty;
        };
        let found = self.range(range, None);
        if self.is_error(found) {
            return self.error_ty;
        }
        let kind = match self.store.type_kind(found) {
            TypeKind::Integer => TypeKind::Integer,
            TypeKind::Real => TypeKind::Real,
            _ => {
                let error = SemanticError::TypeMismatch {
                    expected: "an integer or floating point range".to_owned(),
                    found: self.type_name(found),
                };
                let loc = self.loc(range);
                self.error(error, loc);
                return self.error_ty;
            }
        };

        let rnode = self.store.tree(range);
        let bounds = [rnode.left, rnode.right];
        let static_bounds = bounds.iter().flatten().all(|&b| self.is_static(b));
        if !static_bounds && !self.options.is_relaxed(RelaxRules::LOCALLY_STATIC) {
            let loc = rnode.loc;
            self.error(SemanticError::NotLocallyStatic { name: name.to_string() }, loc);
        }

        let mut node = TypeNode::named(kind, name);
        node.decl = Some(decl);
        node.ranges.push(range);
        let ty = self.define(node, pending);
        self.set_ty(range, ty);
        for bound in bounds.into_iter().flatten() {
            self.retype_universal(bound, ty);
        }
        ty
    }

    fn enum_type(&mut self, decl: Tree, name: Ident, def: Tree, pending: Option<Type>) -> Type {
        let literals = self.store.tree(def).decls.clone();
        let mut node = TypeNode::named(TypeKind::Enum, name);
        node.decl = Some(decl);
        node.members = literals.clone();
        let ty = self.define(node, pending);
        for (pos, literal) in literals.into_iter().enumerate() {
            let lit = self.store.tree_mut(literal);
            lit.ty = Some(ty);
            lit.position = pos as u32;
        }
        ty
    }

    fn array_type(&mut self, decl: Tree, name: Ident, def: Tree, pending: Option<Type>) -> Type {
        let node = self.store.tree(def);
        let (ranges, index_marks, elem_mark) = (node.ranges.clone(), node.params.clone(), node.mark);
        let elem = match elem_mark {
            Some(mark) => self.subtype_indication(mark, false),
            None => self.error_ty,
        };

        let mut array = TypeNode::named(TypeKind::Array, name);
        array.decl = Some(decl);
        array.elem = Some(elem);
        if ranges.is_empty() {
            for mark in index_marks {
                let index = self.subtype_indication(mark, false);
                if !self.is_error(index) && !self.is_discrete(index) {
                    let error = SemanticError::NotDiscrete {
                        what: "index subtype",
                        found: self.type_name(index),
                    };
                    let loc = self.loc(mark);
                    self.error(error, loc);
                }
                array.index.push(index);
            }
            return self.define(array, pending);
        }

        for &range in &ranges {
            let index = self.discrete_range(range, None);
            array.index.push(index);
        }
        let base = self.intern(array);
        let mut subtype = TypeNode::named(TypeKind::Subtype, name);
        subtype.decl = Some(decl);
        subtype.base = Some(base);
        subtype.ranges = ranges;
        self.define(subtype, pending)
    }

    fn record_type(&mut self, decl: Tree, name: Ident, def: Tree, pending: Option<Type>) -> Type {
        let fields = self.store.tree(def).decls.clone();
        let mut seen: SmallVec<[Ident; 8]> = SmallVec::new();
        for &field in &fields {
            let node = self.store.tree(field);
            let (fname, loc) = (node.name(), node.loc);
            if seen.contains(&fname) {
                let error = SemanticError::DuplicateDeclaration {
                    name: fname.to_string(),
                };
                self.error(error, loc);
            }
            seen.push(fname);
            self.mark_of(field);
        }
        let mut node = TypeNode::named(TypeKind::Record, name);
        node.decl = Some(decl);
        node.members = fields;
        self.define(node, pending)
    }

    fn access_type(&mut self, decl: Tree, name: Ident, def: Tree, pending: Option<Type>) -> Type {
        let designated = match self.store.tree(def).mark {
            Some(mark) => self.subtype_indication(mark, true),
            None => self.error_ty,
        };
        let mut node = TypeNode::named(TypeKind::Access, name);
        node.decl = Some(decl);
        node.designated = Some(designated);
        self.define(node, pending)
    }

    fn subtype_decl(&mut self, decl: Tree) {
        let node = self.store.tree(decl);
        let (name, mark) = (node.name(), node.mark);
        let indication = match mark {
            Some(mark) => self.subtype_indication(mark, false),
            None => self.error_ty,
        };
        let ty = if self.is_error(indication) {
            self.error_ty
        } else {
            let mut subtype = TypeNode::named(TypeKind::Subtype, name);
            subtype.decl = Some(decl);
            subtype.base = Some(indication);
            if let Some(anonymous) = self.store.get_type(indication)
                && anonymous.kind == TypeKind::Subtype
                && anonymous.ident.is_none()
            {
                subtype.base = anonymous.base;
                subtype.ranges = anonymous.ranges.clone();
            }
            self.intern(subtype)
        };
        self.set_ty(decl, ty);
        self.declare(decl);
    }

    /// Declare the predefined operators of a new type in the current region.
    fn operators(&mut self, ty: Type, loc: Loc) -> Vec<Tree> {
        let ctx = self.std.op_context();
        let Some(class) = op_class(self.store, ty, &ctx) else {
            return Vec::new();
        };
        let names = [ty, ctx.integer, ctx.boolean].map(|t| (t, self.store.type_name(t)));
        let type_name = |t: Type| {
            names
                .iter()
                .find(|(known, _)| *known == t)
                .map_or_else(|| String::from("<anonymous>"), |(_, n)| n.clone())
        };
        let prefix = self.prefix;
        let arena = self.arena;
        let Some(target) = self.store.arena_mut(arena) else {
            panic!("INTERNAL: unit arena left the object store during checking");
        };
        let mut alloc = |node: TreeNode| target.alloc_tree(node);
        let ops = declare_operators(&mut alloc, &type_name, ty, class, &ctx, prefix, loc);
        for &op in &ops {
            self.declare(op);
        }
        ops
    }

    // Subtype indications and ranges

    /// Resolve a type mark and apply its constraint. Incomplete types are
    /// accepted only where `incomplete_ok` (the designated type of an
    /// access type).
    pub(super) fn subtype_indication(&mut self, mark: Tree, incomplete_ok: bool) -> Type {
        let node = self.store.tree(mark);
        let (name, loc, ranges) = (node.name(), node.loc, node.ranges.clone());
        let Some(found) = self.lookup(name, loc) else {
            self.set_ty(mark, self.error_ty);
            return self.error_ty;
        };
        let decl = found[0].decl;
        let kind = self.store.tree(decl).kind;
        if found.len() != 1 || !matches!(kind, TreeKind::TypeDecl | TreeKind::SubtypeDecl) {
            self.error(SemanticError::NotAType { name: name.to_string() }, loc);
            self.set_ty(mark, self.error_ty);
            return self.error_ty;
        }

        let mut ty = self.decl_ty(decl);
        if self.store.type_kind(ty) == TypeKind::Incomplete && !incomplete_ok {
            self.error(SemanticError::IncompleteTypeUse { name: name.to_string() }, loc);
        }
        if !ranges.is_empty() && !self.is_error(ty) {
            ty = self.constrain(ty, &ranges, loc);
        }
        self.resolve(mark, decl, ty);
        ty
    }

    fn constrain(&mut self, ty: Type, ranges: &[Tree], loc: Loc) -> Type {
        match self.store.type_kind(ty) {
            TypeKind::Integer | TypeKind::Real | TypeKind::Enum => {
                if ranges.len() != 1 {
                    let error = SemanticError::WrongIndexCount {
                        expected: 1,
                        found: ranges.len(),
                    };
                    self.error(error, loc);
                    return ty;
                }
                self.range(ranges[0], Some(ty));
                self.constrained(ty, ranges)
            }
            TypeKind::Array if !self.store.is_constrained_array(ty) => {
                let dims = self
                    .store
                    .get_type(self.store.base_type(ty))
                    .map_or(0, |n| n.index.len());
                if ranges.len() != dims {
                    let error = SemanticError::WrongIndexCount {
                        expected: dims,
                        found: ranges.len(),
                    };
                    self.error(error, loc);
                    return ty;
                }
                for (dim, &range) in ranges.iter().enumerate() {
                    let index = self.store.index_type(ty, dim);
                    self.discrete_range(range, index);
                }
                self.constrained(ty, ranges)
            }
            _ => {
                let error = SemanticError::CannotConstrain {
                    ty: self.type_name(ty),
                };
                self.error(error, loc);
                ty
            }
        }
    }

    /// Check a range; both bounds share one type, preferring a non-universal
    /// one.
    pub(super) fn range(&mut self, range: Tree, expected: Option<Type>) -> Type {
        let node = self.store.tree(range);
        if node.kind != TreeKind::Range {
            return self.expr(range, expected);
        }
        let (left, right, loc) = (node.left, node.right, node.loc);
        let (Some(left), Some(right)) = (left, right) else {
            return self.error_ty;
        };
        let lt = self.expr(left, expected);
        let hint = expected.or_else(|| Some(lt).filter(|&t| !self.store.is_universal(t)));
        let rt = self.expr(right, hint);
        let ty = if self.store.is_universal(lt) && !self.store.is_universal(rt) {
            rt
        } else {
            lt
        };
        for (bound, found) in [(left, lt), (right, rt)] {
            if self.compatible(ty, found) {
                self.retype_universal(bound, ty);
            } else {
                self.mismatch(ty, found, loc);
            }
        }
        if let Some(expected) = expected
            && !self.compatible(expected, ty)
        {
            self.mismatch(expected, ty, loc);
        }
        self.set_ty(range, ty);
        ty
    }

    /// A range of a discrete type. Ranges with universal integer bounds are
    /// converted to INTEGER.
    pub(super) fn discrete_range(&mut self, range: Tree, expected: Option<Type>) -> Type {
        let ty = self.range(range, expected);
        if self.is_error(ty) {
            return ty;
        }
        if !self.is_discrete(ty) {
            let error = SemanticError::NotDiscrete {
                what: "range",
                found: self.type_name(ty),
            };
            let loc = self.loc(range);
            self.error(error, loc);
            return self.error_ty;
        }
        if !self.store.is_universal(ty) {
            return ty;
        }

        let node = self.store.tree(range);
        let bounds: SmallVec<[Tree; 2]> = [node.left, node.right].into_iter().flatten().collect();
        let simple = bounds.iter().all(|&b| self.is_simple_bound(b));
        if !simple && !self.options.is_relaxed(RelaxRules::UNIVERSAL_BOUND) {
            let loc = node.loc;
            self.error(SemanticError::UniversalBound, loc);
        }
        let integer = self.std.integer;
        self.set_ty(range, integer);
        for bound in bounds {
            self.retype_universal(bound, integer);
        }
        integer
    }

    pub(super) fn is_discrete(&self, ty: Type) -> bool {
        matches!(self.store.type_kind(ty), TypeKind::Integer | TypeKind::Enum)
    }

    /// A literal, an attribute or a negated literal.
    fn is_simple_bound(&self, bound: Tree) -> bool {
        let node = self.store.tree(bound);
        match node.kind {
            TreeKind::Literal | TreeKind::AttrRef => true,
            TreeKind::FCall => {
                let negation = node
                    .reference
                    .and_then(|d| self.store.tree(d).builtin)
                    .is_some_and(|b| b.is_unary());
                negation
                    && node.params.len() == 1
                    && self
                        .store
                        .tree(node.params[0])
                        .value
                        .is_some_and(|v| self.store.tree(v).kind == TreeKind::Literal)
            }
            _ => false,
        }
    }

    /// Whether an expression is locally static: literals, attributes,
    /// constants and predefined operators applied to them.
    fn is_static(&self, expr: Tree) -> bool {
        let node = self.store.tree(expr);
        match node.kind {
            TreeKind::Literal | TreeKind::AttrRef => true,
            TreeKind::Ref => node.reference.is_some_and(|d| {
                let decl = self.store.tree(d);
                decl.kind == TreeKind::EnumLit
                    || (decl.kind == TreeKind::ConstDecl && decl.value.is_some())
            }),
            TreeKind::FCall => {
                let builtin = node
                    .reference
                    .is_some_and(|d| self.store.tree(d).builtin.is_some());
                builtin
                    && node
                        .params
                        .iter()
                        .filter_map(|&p| self.store.tree(p).value)
                        .all(|v| self.is_static(v))
            }
            _ => false,
        }
    }

    // Subprograms

    /// Resolve parameter and result types and mangle the name.
    fn subprogram_spec(&mut self, func: Tree) {
        let node = self.store.tree(func);
        let (name, params, mark) = (node.name(), node.params.clone(), node.mark);
        let mut signature = Vec::with_capacity(params.len());
        for (pos, &param) in params.iter().enumerate() {
            let pnode = self.store.tree(param);
            let (pname, mode, value, loc) = (pnode.name(), pnode.mode, pnode.value, pnode.loc);
            let ty = self.mark_of(param);
            if mode.is_some_and(|m| m != PortMode::In) {
                let error = SemanticError::FunctionParamMode {
                    name: pname.to_string(),
                };
                self.error(error, loc);
            }
            if let Some(value) = value {
                self.check_expr(value, ty);
            }
            let pnode = self.store.tree_mut(param);
            pnode.class.get_or_insert(Class::Constant);
            pnode.mode.get_or_insert(PortMode::In);
            pnode.position = pos as u32;
            signature.push(self.type_name(ty));
        }
        let result = match mark {
            Some(mark) => self.subtype_indication(mark, false),
            None => self.error_ty,
        };
        let mangled = mangle(self.prefix, name, &signature, &self.type_name(result));
        let node = self.store.tree_mut(func);
        node.ty = Some(result);
        node.ident2 = Some(mangled);
    }

    fn subprogram_body(&mut self, body: Tree) {
        self.subprogram_spec(body);
        if let Some(Inserted::Replaced(decl)) = self.declare(body)
            && decl.arena() == self.arena
            && self.store.tree(decl).kind == TreeKind::FuncDecl
        {
            self.store.tree_mut(decl).flags.insert(Flags::HAS_BODY);
        }

        let node = self.store.tree(body);
        let subprogram = Subprogram {
            name: node.name(),
            result: node.ty.unwrap_or(self.error_ty),
            pure: !node.flags.contains(Flags::IMPURE),
            depth: self.scope.depth() + 1,
        };
        let (params, stmts) = (node.params.clone(), node.stmts.clone());
        let prefix = node.ident2.unwrap_or(self.prefix);

        let saved = (self.place, self.prefix, self.subprogram, self.process.take());
        self.place = Place::Subprogram;
        self.prefix = prefix;
        self.subprogram = Some(subprogram);
        self.scope.push();
        for param in params {
            self.declare(param);
        }
        self.decls(body);
        self.sequential(&stmts);
        self.scope.pop();
        (self.place, self.prefix, self.subprogram, self.process) = saved;
    }
}
