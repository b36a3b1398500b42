// store.rs
//
// Registry of the arenas a session has loaded, so that handles can be
// followed across arena boundaries (an architecture referring to its entity,
// every unit referring to STD.STANDARD).

use hdlc_identity::Ident;
use rustc_hash::FxHashMap;

use crate::arena::{ArenaId, ObjectArena, Tree, Type};
use crate::errors::ArenaError;
use crate::tree::TreeNode;
use crate::types::TypeNode;

#[derive(Default)]
pub struct ObjectStore {
    arenas: FxHashMap<ArenaId, ObjectArena>,
    names: FxHashMap<Ident, ArenaId>,
}

impl ObjectStore {
    pub fn new() -> ObjectStore {
        ObjectStore::default()
    }

    /// Register an arena. A named arena shadows any earlier arena with the
    /// same name; the earlier one stays loaded for existing references.
    pub fn insert(&mut self, arena: ObjectArena) -> ArenaId {
        let id = arena.id();
        if let Some(name) = arena.name()
            && let Some(old) = self.names.insert(name, id)
            && old != id
        {
            tracing::debug!(%name, ?old, new = ?id, "unit replaced in object store");
        }
        self.arenas.insert(id, arena);
        id
    }

    pub fn arena(&self, id: ArenaId) -> Option<&ObjectArena> {
        self.arenas.get(&id)
    }

    pub fn arena_mut(&mut self, id: ArenaId) -> Option<&mut ObjectArena> {
        self.arenas.get_mut(&id)
    }

    /// Name a registered arena so that [`ObjectStore::find`] sees it. The
    /// name shadows any earlier arena registered under it.
    pub fn set_name(&mut self, id: ArenaId, name: Ident) {
        let Some(arena) = self.arenas.get_mut(&id) else {
            return;
        };
        if let Some(old) = arena.name()
            && self.names.get(&old) == Some(&id)
        {
            self.names.remove(&old);
        }
        arena.set_name(name);
        if let Some(old) = self.names.insert(name, id)
            && old != id
        {
            tracing::debug!(%name, ?old, new = ?id, "unit replaced in object store");
        }
    }

    pub fn find(&self, name: Ident) -> Option<ArenaId> {
        self.names.get(&name).copied()
    }

    /// Root tree of the named unit, when loaded.
    pub fn unit(&self, name: Ident) -> Option<Tree> {
        self.find(name)
            .and_then(|id| self.arenas.get(&id))
            .and_then(ObjectArena::root)
    }

    /// Unregister an arena, returning it to the caller.
    pub fn remove(&mut self, id: ArenaId) -> Option<ObjectArena> {
        let arena = self.arenas.remove(&id)?;
        if let Some(name) = arena.name()
            && self.names.get(&name) == Some(&id)
        {
            self.names.remove(&name);
        }
        Some(arena)
    }

    /// Unregister and release an arena.
    pub fn discard(&mut self, id: ArenaId) {
        if let Some(arena) = self.remove(id) {
            arena.discard();
        }
    }

    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }

    pub fn try_tree(&self, tree: Tree) -> Result<&TreeNode, ArenaError> {
        let arena = self
            .arenas
            .get(&tree.arena())
            .ok_or(ArenaError::StaleArena {
                arena: tree.arena(),
            })?;
        arena.get_tree(tree).ok_or(ArenaError::NotFound {
            arena: tree.arena(),
            object: tree.id(),
        })
    }

    pub fn get_tree(&self, tree: Tree) -> Option<&TreeNode> {
        self.try_tree(tree).ok()
    }

    /// Panics on a stale handle.
    pub fn tree(&self, tree: Tree) -> &TreeNode {
        match self.try_tree(tree) {
            Ok(node) => node,
            Err(err) => panic!("INTERNAL: {err}"),
        }
    }

    pub fn get_type(&self, ty: Type) -> Option<&TypeNode> {
        self.arenas.get(&ty.arena())?.get_type(ty)
    }

    pub fn ty(&self, ty: Type) -> &TypeNode {
        match self.get_type(ty) {
            Some(node) => node,
            None => panic!("INTERNAL: stale type handle {ty:?}"),
        }
    }

    pub fn tree_mut(&mut self, tree: Tree) -> &mut TreeNode {
        match self.arenas.get_mut(&tree.arena()) {
            Some(arena) => arena.tree_mut(tree),
            None => panic!("INTERNAL: stale tree handle {tree:?}"),
        }
    }

    pub fn rewrite(&mut self, tree: Tree) -> &mut TreeNode {
        match self.arenas.get_mut(&tree.arena()) {
            Some(arena) => arena.rewrite(tree),
            None => panic!("INTERNAL: stale tree handle {tree:?}"),
        }
    }

    /// Allocate a tree in the arena that owns `near`.
    pub fn alloc_tree_near(&mut self, near: Tree, node: TreeNode) -> Tree {
        match self.arenas.get_mut(&near.arena()) {
            Some(arena) => arena.alloc_tree(node),
            None => panic!("INTERNAL: stale tree handle {near:?}"),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = ArenaId> + '_ {
        self.arenas.keys().copied()
    }
}
