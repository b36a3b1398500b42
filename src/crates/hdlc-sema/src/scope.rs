// src/scope.rs
//
// Declarative regions and name visibility. Regions nest; a name declared in
// an inner region hides outer declarations of the same name, except that
// subprograms and enumeration literals overload and only hide outer
// declarations with the same parameter and result type profile.

use hdlc_identity::Ident;
use hdlc_object::{ObjectStore, Tree, TreeKind, Type};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A visible declaration and the depth of the region that declares it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Visible {
    pub decl: Tree,
    pub depth: usize,
}

pub(crate) type Candidates = SmallVec<[Visible; 4]>;

/// Outcome of declaring a name in the current region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Inserted {
    New,
    /// The declaration completes or replaces an earlier one (a body for a
    /// subprogram declaration, a full type for an incomplete one).
    Replaced(Tree),
}

#[derive(Default)]
struct Region {
    names: FxHashMap<Ident, SmallVec<[Tree; 2]>>,
}

#[derive(Default)]
pub(crate) struct Scope {
    regions: Vec<Region>,
}

pub(crate) fn is_overloadable(store: &ObjectStore, decl: Tree) -> bool {
    matches!(
        store.tree(decl).kind,
        TreeKind::FuncDecl | TreeKind::FuncBody | TreeKind::EnumLit
    )
}

/// Parameter and result base types of an overloadable declaration.
fn profile(store: &ObjectStore, decl: Tree) -> (SmallVec<[Option<Type>; 4]>, Option<Type>) {
    let node = store.tree(decl);
    let base = |ty: Option<Type>| ty.map(|t| store.base_type(t));
    let params = node
        .params
        .iter()
        .map(|&p| base(store.tree(p).ty))
        .collect();
    (params, base(node.ty))
}

pub(crate) fn same_profile(store: &ObjectStore, a: Tree, b: Tree) -> bool {
    profile(store, a) == profile(store, b)
}

/// An incomplete type declaration. Its type may already have been completed
/// in place by the full declaration that is about to replace it.
fn is_incomplete_type(store: &ObjectStore, decl: Tree) -> bool {
    let node = store.tree(decl);
    node.kind == TreeKind::TypeDecl && node.value.is_none()
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    pub fn push(&mut self) {
        self.regions.push(Region::default());
    }

    pub fn pop(&mut self) {
        self.regions.pop();
    }

    /// Depth of the innermost region; the outermost region has depth 0.
    pub fn depth(&self) -> usize {
        self.regions.len().saturating_sub(1)
    }

    /// Declare `decl` under its identifier in the innermost region. On a
    /// clash returns the declaration already there.
    pub fn insert(&mut self, store: &ObjectStore, decl: Tree) -> Result<Inserted, Tree> {
        let Some(name) = store.tree(decl).ident else {
            return Ok(Inserted::New);
        };
        let Some(region) = self.regions.last_mut() else {
            panic!("INTERNAL: declaration outside any region");
        };
        let entries = region.names.entry(name).or_default();
        let overloadable = is_overloadable(store, decl);
        let new = store.tree(decl);

        for slot in entries.iter_mut() {
            let old = store.tree(*slot);
            let replaces = match (old.kind, new.kind) {
                (TreeKind::FuncDecl, TreeKind::FuncBody | TreeKind::FuncDecl)
                    if old.builtin.is_some() && same_profile(store, *slot, decl) =>
                {
                    true
                }
                (TreeKind::FuncDecl, TreeKind::FuncBody) => {
                    old.ident2.is_some() && old.ident2 == new.ident2
                }
                (TreeKind::TypeDecl, TreeKind::TypeDecl) => {
                    is_incomplete_type(store, *slot) && new.value.is_some()
                }
                _ => false,
            };
            if replaces {
                let old = std::mem::replace(slot, decl);
                return Ok(Inserted::Replaced(old));
            }
            if !(overloadable && is_overloadable(store, *slot)) || same_profile(store, *slot, decl) {
                return Err(*slot);
            }
        }
        entries.push(decl);
        Ok(Inserted::New)
    }

    /// Declare every named declaration of `decls` without clash checks.
    /// Used for regions made visible by a use clause or by the primary unit.
    pub fn import(&mut self, store: &ObjectStore, decls: impl IntoIterator<Item = Tree>) {
        let Some(region) = self.regions.last_mut() else {
            panic!("INTERNAL: import outside any region");
        };
        for decl in decls {
            if let Some(name) = store.tree(decl).ident {
                region.names.entry(name).or_default().push(decl);
            }
        }
    }

    /// Every declaration of `name` visible from the innermost region. Either
    /// a single non-overloadable declaration or a set of overloads, innermost
    /// first.
    pub fn lookup(&self, store: &ObjectStore, name: Ident) -> Candidates {
        let mut found = Candidates::new();
        for (depth, region) in self.regions.iter().enumerate().rev() {
            let Some(decls) = region.names.get(&name) else {
                continue;
            };
            for &decl in decls {
                if !is_overloadable(store, decl) {
                    if found.is_empty() {
                        found.push(Visible { decl, depth });
                    }
                    return found;
                }
                if found.iter().any(|v| same_profile(store, v.decl, decl)) {
                    continue;
                }
                found.push(Visible { decl, depth });
            }
        }
        found
    }

    /// Declarations of `name` in the innermost region only.
    pub fn local(&self, name: Ident) -> &[Tree] {
        self.regions
            .last()
            .and_then(|r| r.names.get(&name))
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use hdlc_identity::{FileRef, Loc};
    use hdlc_object::{ObjectArena, TreeNode, TypeKind, TypeNode};

    use super::*;

    struct Fixture {
        store: ObjectStore,
        int: Type,
        real: Type,
        decls: FxHashMap<&'static str, Tree>,
    }

    fn loc() -> Loc {
        Loc::point(FileRef::intern("scope.vhd"), 1, 1)
    }

    fn fixture() -> Fixture {
        let mut arena = ObjectArena::new();
        let int = arena.intern_type(TypeNode::named(TypeKind::Integer, Ident::new("INT")));
        let real = arena.intern_type(TypeNode::named(TypeKind::Real, Ident::new("FLT")));
        let mut decls: FxHashMap<&'static str, Tree> = FxHashMap::default();

        let mut func = |arena: &mut ObjectArena,
                        key: &'static str,
                        kind: TreeKind,
                        param: Type,
                        result: Type| {
            let mut p = TreeNode::new(TreeKind::ParamDecl, loc()).with_ident(Ident::new("X"));
            p.ty = Some(param);
            let p = arena.alloc_tree(p);
            let mut f = TreeNode::new(kind, loc()).with_ident(Ident::new("F"));
            f.params = vec![p];
            f.ty = Some(result);
            f.ident2 = Some(Ident::new(&format!("WORK.P.F({key})")));
            decls.insert(key, arena.alloc_tree(f));
        };
        func(&mut arena, "int", TreeKind::FuncDecl, int, int);
        func(&mut arena, "real", TreeKind::FuncDecl, real, real);
        func(&mut arena, "int-inner", TreeKind::FuncDecl, int, int);

        let mut body = TreeNode::new(TreeKind::FuncBody, loc()).with_ident(Ident::new("F"));
        body.ident2 = Some(Ident::new("WORK.P.F(int)"));
        decls.insert("body", arena.alloc_tree(body));

        let mut var = TreeNode::new(TreeKind::VarDecl, loc()).with_ident(Ident::new("F"));
        var.ty = Some(int);
        decls.insert("var", arena.alloc_tree(var));
        let mut var = TreeNode::new(TreeKind::VarDecl, loc()).with_ident(Ident::new("V"));
        var.ty = Some(int);
        decls.insert("v", arena.alloc_tree(var));
        decls.insert(
            "t-incomplete",
            arena.alloc_tree(TreeNode::new(TreeKind::TypeDecl, loc()).with_ident(Ident::new("T"))),
        );
        let def = arena.alloc_tree(TreeNode::new(TreeKind::RecordDef, loc()));
        let mut full = TreeNode::new(TreeKind::TypeDecl, loc()).with_ident(Ident::new("T"));
        full.value = Some(def);
        decls.insert("t-full", arena.alloc_tree(full));

        // Incomplete declaration whose type the full one already completed.
        let rec = arena.intern_type(TypeNode::named(TypeKind::Record, Ident::new("U")));
        let mut completed = TreeNode::new(TreeKind::TypeDecl, loc()).with_ident(Ident::new("U"));
        completed.ty = Some(rec);
        decls.insert("u-incomplete", arena.alloc_tree(completed));
        for key in ["u-full", "u-again"] {
            let def = arena.alloc_tree(TreeNode::new(TreeKind::RecordDef, loc()));
            let mut full = TreeNode::new(TreeKind::TypeDecl, loc()).with_ident(Ident::new("U"));
            full.value = Some(def);
            full.ty = Some(rec);
            decls.insert(key, arena.alloc_tree(full));
        }

        let mut store = ObjectStore::new();
        store.insert(arena);
        Fixture {
            store,
            int,
            real,
            decls,
        }
    }

    #[test]
    fn overloads_accumulate_and_duplicates_clash() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        assert_eq!(scope.insert(&fx.store, fx.decls["int"]), Ok(Inserted::New));
        assert_eq!(scope.insert(&fx.store, fx.decls["real"]), Ok(Inserted::New));
        assert_eq!(
            scope.insert(&fx.store, fx.decls["int-inner"]),
            Err(fx.decls["int"])
        );
        assert_eq!(scope.insert(&fx.store, fx.decls["var"]), Err(fx.decls["int"]));
        assert_eq!(scope.lookup(&fx.store, Ident::new("F")).len(), 2);
        let _ = (fx.int, fx.real);
    }

    #[test]
    fn body_replaces_declaration() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        scope.insert(&fx.store, fx.decls["int"]).unwrap();
        assert_eq!(
            scope.insert(&fx.store, fx.decls["body"]),
            Ok(Inserted::Replaced(fx.decls["int"]))
        );
        assert_eq!(scope.local(Ident::new("F")), &[fx.decls["body"]]);
    }

    #[test]
    fn inner_overload_hides_same_profile_only() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        scope.insert(&fx.store, fx.decls["int"]).unwrap();
        scope.insert(&fx.store, fx.decls["real"]).unwrap();
        scope.push();
        scope.insert(&fx.store, fx.decls["int-inner"]).unwrap();

        let found = scope.lookup(&fx.store, Ident::new("F"));
        let decls: Vec<_> = found.iter().map(|v| (v.decl, v.depth)).collect();
        assert_eq!(
            decls,
            vec![(fx.decls["int-inner"], 1), (fx.decls["real"], 0)]
        );
    }

    #[test]
    fn object_hides_outer_overloads() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        scope.insert(&fx.store, fx.decls["int"]).unwrap();
        scope.push();
        scope.insert(&fx.store, fx.decls["var"]).unwrap();
        let found = scope.lookup(&fx.store, Ident::new("F"));
        assert_eq!(found.as_slice(), &[Visible { decl: fx.decls["var"], depth: 1 }]);

        scope.pop();
        assert_eq!(scope.lookup(&fx.store, Ident::new("F")).len(), 1);
        assert!(scope.lookup(&fx.store, Ident::new("NOPE")).is_empty());
    }

    #[test]
    fn full_type_completes_incomplete_one() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        scope.insert(&fx.store, fx.decls["t-incomplete"]).unwrap();
        assert_eq!(
            scope.insert(&fx.store, fx.decls["t-full"]),
            Ok(Inserted::Replaced(fx.decls["t-incomplete"]))
        );
        assert_eq!(scope.insert(&fx.store, fx.decls["v"]), Ok(Inserted::New));
    }

    #[test]
    fn completion_in_place_still_replaces_incomplete_declaration() {
        let fx = fixture();
        let mut scope = Scope::new();
        scope.push();
        scope.insert(&fx.store, fx.decls["u-incomplete"]).unwrap();
        assert_eq!(
            scope.insert(&fx.store, fx.decls["u-full"]),
            Ok(Inserted::Replaced(fx.decls["u-incomplete"]))
        );
        assert_eq!(
            scope.insert(&fx.store, fx.decls["u-again"]),
            Err(fx.decls["u-full"])
        );
    }
}
