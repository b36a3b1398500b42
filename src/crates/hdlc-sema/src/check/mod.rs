// src/check/mod.rs
//
// Name resolution and type checking of one design unit. The `Checker` holds
// the per-unit context; declarations, expressions and statements are checked
// by `impl Checker` blocks in `decl.rs`, `expr.rs` and `stmt.rs`.
//
// Checking annotates the unit's trees in place: every expression gets a type,
// every name a `reference` to its declaration, subprograms their mangled
// name, and the implicit operator declarations of each type are inserted
// after it in the enclosing declaration list.

mod decl;
mod expr;
mod stmt;

use hdlc_identity::{Ident, Loc};
use hdlc_object::{
    ArenaId, LibraryStore, ObjectArena, ObjectStore, Tree, TreeKind, TreeNode, Type, TypeKind,
    TypeNode, unit_name,
};

use crate::errors::SemanticError;
use crate::options::Options;
use crate::scope::{Candidates, Scope, Visible};
use crate::session::Session;
use crate::standard::{STANDARD, Standard};

/// Name of the work library when the library store has none.
const DEFAULT_WORK: &str = "WORK";

/// The kind of declarative region being checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Place {
    Entity,
    Architecture,
    Package,
    PackageBody,
    Process,
    Subprogram,
}

impl Place {
    fn describe(self) -> &'static str {
        match self {
            Place::Entity => "an entity",
            Place::Architecture => "an architecture",
            Place::Package => "a package",
            Place::PackageBody => "a package body",
            Place::Process => "a process",
            Place::Subprogram => "a function",
        }
    }

    fn is_sequential(self) -> bool {
        matches!(self, Place::Process | Place::Subprogram)
    }
}

/// The function whose body is being checked.
#[derive(Clone, Copy, Debug)]
struct Subprogram {
    name: Ident,
    result: Type,
    pure: bool,
    /// Region holding the parameters; objects declared outside it are
    /// external to the function.
    depth: usize,
}

#[derive(Clone, Copy, Debug)]
struct ProcessState {
    sensitive: bool,
    waits: bool,
}

pub(crate) struct Checker<'a> {
    store: &'a mut ObjectStore,
    libs: &'a LibraryStore,
    session: &'a mut Session,
    options: Options,
    std: Standard,
    unit: Tree,
    arena: ArenaId,
    work: Ident,
    /// Prefix of mangled subprogram names declared in the current region.
    prefix: Ident,
    scope: Scope,
    place: Place,
    subprogram: Option<Subprogram>,
    process: Option<ProcessState>,
    /// Checking an assignment target or port actual: not a read.
    in_target: bool,
    error_ty: Type,
}

/// Check `unit` and annotate it in place. Returns the number of errors
/// reported for it.
pub fn check_unit(
    store: &mut ObjectStore,
    libs: &LibraryStore,
    session: &mut Session,
    unit: Tree,
) -> u32 {
    let before = session.error_count();
    let std = Standard::install(store);
    let work = libs.work().map_or_else(|| Ident::new(DEFAULT_WORK), |lib| lib.name());
    let arena = unit.arena();

    let node = store.tree(unit);
    let name = unit_name(work, node);
    if let Some(name) = name
        && store.arena(arena).is_some_and(|a| a.name().is_none())
    {
        store.set_name(arena, name);
    }
    let mut checker = Checker::new(store, libs, session, std, unit, work);
    checker.check();

    let errors = session.error_count().saturating_sub(before);
    tracing::debug!(unit = ?name, errors, "unit checked");
    errors
}

impl<'a> Checker<'a> {
    fn new(
        store: &'a mut ObjectStore,
        libs: &'a LibraryStore,
        session: &'a mut Session,
        std: Standard,
        unit: Tree,
        work: Ident,
    ) -> Checker<'a> {
        let arena = unit.arena();
        let options = session.options();
        let Some(target) = store.arena_mut(arena) else {
            panic!("INTERNAL: checking a unit that is not in the object store");
        };
        let error_ty = target.intern_type(TypeNode::named(TypeKind::None, Ident::new("<error>")));
        let prefix = target.name().unwrap_or(work);
        let place = match store.tree(unit).kind {
            TreeKind::Entity => Place::Entity,
            TreeKind::Architecture => Place::Architecture,
            TreeKind::PackageBody => Place::PackageBody,
            _ => Place::Package,
        };
        Checker {
            store,
            libs,
            session,
            options,
            std,
            unit,
            arena,
            work,
            prefix,
            scope: Scope::new(),
            place,
            subprogram: None,
            process: None,
            in_target: false,
            error_ty,
        }
    }

    fn check(&mut self) {
        self.scope.push();
        let standard = visible_decls(self.store, self.std.unit);
        self.scope.import(self.store, standard);
        self.context_clause();

        let node = self.store.tree(self.unit);
        match node.kind {
            TreeKind::Entity => self.entity(),
            TreeKind::Architecture => self.architecture(),
            TreeKind::Package => self.package(),
            TreeKind::PackageBody => self.package_body(),
            other => panic!("INTERNAL: {other:?} is not a design unit"),
        }
    }

    fn context_clause(&mut self) {
        let context = self.store.tree(self.unit).context.clone();
        for clause in context {
            let node = self.store.tree(clause);
            let (kind, loc) = (node.kind, node.loc);
            let Some(name) = node.ident else { continue };
            match kind {
                TreeKind::Library => {
                    let known = self.libs.find(name).is_some()
                        || name.as_str().eq_ignore_ascii_case("STD")
                        || name.as_str().eq_ignore_ascii_case(DEFAULT_WORK);
                    if !known {
                        self.error(SemanticError::LibraryNotFound { name: name.to_string() }, loc);
                    }
                }
                TreeKind::Use => self.use_clause(clause, name, loc),
                _ => {}
            }
        }
    }

    fn use_clause(&mut self, clause: Tree, name: Ident, loc: Loc) {
        let name = match name.as_str().strip_suffix(".ALL") {
            Some(stripped) => Ident::new(stripped),
            None => name,
        };
        if name.as_str() == STANDARD {
            self.store.tree_mut(clause).reference = Some(self.std.unit);
            return;
        }
        let Some(root) = self.load_unit(name, loc) else {
            return;
        };
        self.store.tree_mut(clause).reference = Some(root);
        self.scope.push();
        let decls = visible_decls(self.store, root);
        self.scope.import(self.store, decls);
    }

    /// Root of a library unit, loading it if needed. Reports the failure.
    fn load_unit(&mut self, name: Ident, loc: Loc) -> Option<Tree> {
        match self.libs.get_unit(self.store, name) {
            Ok(Some(root)) => Some(root),
            Ok(None) => {
                self.error(SemanticError::UnitNotFound { name: name.to_string() }, loc);
                None
            }
            Err(e) => {
                self.error(
                    SemanticError::UnitLoadFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    },
                    loc,
                );
                None
            }
        }
    }

    /// `WORK.NAME` for a simple name, the name itself when already selected.
    fn qualify(&self, name: Ident) -> Ident {
        if name.as_str().contains('.') {
            self.libs.canonical(name)
        } else {
            Ident::prefix(self.work, name, '.')
        }
    }

    // Annotation helpers

    fn arena_mut(&mut self) -> &mut ObjectArena {
        match self.store.arena_mut(self.arena) {
            Some(arena) => arena,
            None => panic!("INTERNAL: unit arena left the object store during checking"),
        }
    }

    fn alloc(&mut self, node: TreeNode) -> Tree {
        self.arena_mut().alloc_tree(node)
    }

    fn intern(&mut self, node: TypeNode) -> Type {
        self.arena_mut().intern_type(node)
    }

    /// Anonymous subtype of `base` constrained by `ranges`.
    fn constrained(&mut self, base: Type, ranges: &[Tree]) -> Type {
        let mut node = TypeNode::new(TypeKind::Subtype);
        node.base = Some(base);
        node.ranges = ranges.iter().copied().collect();
        self.intern(node)
    }

    fn set_ty(&mut self, tree: Tree, ty: Type) {
        self.store.tree_mut(tree).ty = Some(ty);
    }

    fn resolve(&mut self, tree: Tree, decl: Tree, ty: Type) {
        let node = self.store.tree_mut(tree);
        node.reference = Some(decl);
        node.ty = Some(ty);
    }

    fn error(&mut self, error: SemanticError, loc: Loc) {
        self.session.error(error, loc);
    }

    fn stop(&self) -> bool {
        self.session.limit_reached()
    }

    fn loc(&self, tree: Tree) -> Loc {
        self.store.tree(tree).loc
    }

    // Type queries

    fn is_error(&self, ty: Type) -> bool {
        ty == self.error_ty
            || self
                .store
                .get_type(self.store.base_type(ty))
                .is_none_or(|n| n.kind == TypeKind::None)
    }

    /// Whether a value of type `found` may appear where `expected` is
    /// required. Universal numeric values convert to any type of their class.
    fn compatible(&self, expected: Type, found: Type) -> bool {
        if self.is_error(expected) || self.is_error(found) {
            return true;
        }
        let (e, f) = (self.store.base_type(expected), self.store.base_type(found));
        e == f || (self.store.is_universal(f) && self.store.type_kind(e) == self.store.type_kind(f))
    }

    fn type_name(&self, ty: Type) -> String {
        self.store.type_name(ty)
    }

    fn mismatch(&mut self, expected: Type, found: Type, loc: Loc) {
        let error = SemanticError::TypeMismatch {
            expected: self.type_name(expected),
            found: self.type_name(found),
        };
        self.error(error, loc);
    }

    fn decl_ty(&self, decl: Tree) -> Type {
        self.store.tree(decl).ty.unwrap_or(self.error_ty)
    }

    /// Declarations visible under `name`. Reports an undeclared name.
    fn lookup(&mut self, name: Ident, loc: Loc) -> Option<Candidates> {
        let found = if name.as_str().contains('.') && !name.as_str().starts_with('"') {
            self.lookup_selected(name, loc)?
        } else {
            self.scope.lookup(self.store, name)
        };
        if found.is_empty() {
            self.error(SemanticError::UndeclaredName { name: name.to_string() }, loc);
            return None;
        }
        Some(found)
    }

    /// `LIB.UNIT.NAME`: declarations named `NAME` in the given unit.
    fn lookup_selected(&mut self, name: Ident, loc: Loc) -> Option<Candidates> {
        let unit = name.runtil('.');
        let simple = name.last_segment('.');
        let root = if unit.as_str() == STANDARD {
            self.std.unit
        } else {
            self.load_unit(self.libs.canonical(unit), loc)?
        };
        let found = visible_decls(self.store, root)
            .into_iter()
            .filter(|&d| self.store.tree(d).ident == Some(simple))
            .map(|decl| Visible { decl, depth: 0 })
            .collect();
        Some(found)
    }

    /// The declaration at the root of a name: `S` in `S(3).F`.
    fn root_decl(&self, mut tree: Tree) -> Option<Tree> {
        loop {
            let node = self.store.get_tree(tree)?;
            match node.kind {
                TreeKind::Ref => return node.reference,
                TreeKind::ArrayRef | TreeKind::RecordRef => tree = node.value?,
                _ => return None,
            }
        }
    }
}

/// Declarations a unit makes visible: its declaration list plus the literals
/// of its enumeration types. Entities also export generics and ports.
pub(crate) fn visible_decls(store: &ObjectStore, unit: Tree) -> Vec<Tree> {
    let node = store.tree(unit);
    let mut out: Vec<Tree> = node.generics.iter().chain(&node.ports).copied().collect();
    for &decl in &node.decls {
        out.push(decl);
        let dnode = store.tree(decl);
        if dnode.kind == TreeKind::TypeDecl
            && let Some(def) = dnode.value
            && store.tree(def).kind == TreeKind::EnumDef
        {
            out.extend(store.tree(def).decls.iter().copied());
        }
    }
    out
}

#[cfg(test)]
mod tests;
