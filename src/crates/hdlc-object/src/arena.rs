// arena.rs
//! Object arenas.
//!
//! An [`ObjectArena`] owns every tree and type descriptor of one compilation
//! unit (or one elaborated instance). Objects are addressed by
//! [`ObjectId`] handles, an arena id plus an index, never by pointer, so the
//! graph may be cyclic and an image of it can be relocated. The arena is
//! released as a whole.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use hdlc_identity::Ident;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::ArenaError;
use crate::tlab::{self, CHUNK_OBJECTS, Chunk};
use crate::tree::{TreeKind, TreeNode};
use crate::types::{TypeKind, TypeNode};

static NEXT_ARENA: AtomicU32 = AtomicU32::new(1);

/// Generations below this are reserved for images with a fixed identity,
/// such as the standard package.
pub const FIRST_DYNAMIC_GENERATION: u32 = 16;

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(FIRST_DYNAMIC_GENERATION);

/// Process-unique arena identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaId(pub(crate) u32);

impl ArenaId {
    fn fresh() -> ArenaId {
        ArenaId(NEXT_ARENA.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub arena: ArenaId,
    pub index: u32,
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.arena, self.index)
    }
}

/// Handle to a [`TreeNode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tree(pub(crate) ObjectId);

/// Handle to a [`TypeNode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type(pub(crate) ObjectId);

impl Tree {
    pub fn id(self) -> ObjectId {
        self.0
    }

    pub fn arena(self) -> ArenaId {
        self.0.arena
    }
}

impl Type {
    pub fn id(self) -> ObjectId {
        self.0
    }

    pub fn arena(self) -> ArenaId {
        self.0.arena
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tree({:?})", self.0)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({:?})", self.0)
    }
}

/// One arena slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Object {
    Tree(TreeNode),
    Type(TypeNode),
    /// Hole left by an object that was not reachable when the image was
    /// written.
    Vacant,
}

pub struct ObjectArena {
    id: ArenaId,
    name: Option<Ident>,
    generation: u32,
    /// Indexed by chunk number. `None` marks a number reserved by a fork that
    /// has not been joined yet.
    chunks: Vec<Option<Chunk>>,
    current: Option<u32>,
    next_chunk: Arc<AtomicU32>,
    forks: u32,
    frozen: bool,
    root: Option<Tree>,
    interned: FxHashMap<TypeNode, Type>,
    live: usize,
}

impl ObjectArena {
    pub fn new() -> ObjectArena {
        ObjectArena {
            id: ArenaId::fresh(),
            name: None,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            chunks: Vec::new(),
            current: None,
            next_chunk: Arc::new(AtomicU32::new(0)),
            forks: 0,
            frozen: false,
            root: None,
            interned: FxHashMap::default(),
            live: 0,
        }
    }

    pub fn with_name(mut self, name: Ident) -> ObjectArena {
        self.name = Some(name);
        self
    }

    pub fn with_generation(mut self, generation: u32) -> ObjectArena {
        self.generation = generation;
        self
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    pub fn name(&self) -> Option<Ident> {
        self.name
    }

    pub(crate) fn set_name(&mut self, name: Ident) {
        self.name = Some(name);
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn root(&self) -> Option<Tree> {
        self.root
    }

    pub fn set_root(&mut self, root: Tree) {
        debug_assert_eq!(root.arena(), self.id);
        self.root = Some(root);
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of index positions spanned by the allocated chunks, including
    /// holes.
    pub fn index_span(&self) -> u32 {
        (self.chunks.len() * CHUNK_OBJECTS) as u32
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the arena read-only. Only [`ObjectArena::rewrite`] may modify
    /// trees afterwards.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.slot(id).is_some_and(|obj| !matches!(obj, Object::Vacant))
    }

    pub fn alloc_tree(&mut self, node: TreeNode) -> Tree {
        debug_assert!(node.validate().is_ok(), "{:?}", node.validate());
        Tree(self.alloc(Object::Tree(node)))
    }

    pub fn alloc_type(&mut self, node: TypeNode) -> Type {
        Type(self.alloc(Object::Type(node)))
    }

    fn alloc(&mut self, object: Object) -> ObjectId {
        let chunk_no = match self.current {
            Some(no) if self.chunks[no as usize].as_ref().is_some_and(|c| !c.is_full()) => no,
            _ => self.start_chunk(),
        };
        let Some(chunk) = self.chunks[chunk_no as usize].as_mut() else {
            unreachable!("current chunk is always present");
        };
        let offset = chunk.objects.len();
        chunk.objects.push(object);
        self.live += 1;
        ObjectId {
            arena: self.id,
            index: chunk_no * CHUNK_OBJECTS as u32 + offset as u32,
        }
    }

    fn start_chunk(&mut self) -> u32 {
        let no = self.next_chunk.fetch_add(1, Ordering::Relaxed);
        self.install_chunk(no, tlab::take_chunk());
        self.current = Some(no);
        no
    }

    fn install_chunk(&mut self, no: u32, chunk: Chunk) {
        let no = no as usize;
        if self.chunks.len() <= no {
            self.chunks.resize_with(no + 1, || None);
        }
        self.chunks[no] = Some(chunk);
    }

    fn slot(&self, id: ObjectId) -> Option<&Object> {
        if id.arena != self.id {
            return None;
        }
        let (chunk, offset) = split_index(id.index);
        self.chunks.get(chunk)?.as_ref()?.objects.get(offset)
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        if id.arena != self.id {
            return None;
        }
        let (chunk, offset) = split_index(id.index);
        self.chunks.get_mut(chunk)?.as_mut()?.objects.get_mut(offset)
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.slot(id)
    }

    pub fn get_tree(&self, tree: Tree) -> Option<&TreeNode> {
        match self.slot(tree.0) {
            Some(Object::Tree(node)) => Some(node),
            _ => None,
        }
    }

    pub fn get_type(&self, ty: Type) -> Option<&TypeNode> {
        match self.slot(ty.0) {
            Some(Object::Type(node)) => Some(node),
            _ => None,
        }
    }

    /// The node behind `tree`. Panics on a handle from another arena.
    pub fn tree(&self, tree: Tree) -> &TreeNode {
        match self.get_tree(tree) {
            Some(node) => node,
            None => panic!("INTERNAL: {tree:?} is not a tree of arena {:?}", self.id),
        }
    }

    pub fn ty(&self, ty: Type) -> &TypeNode {
        match self.get_type(ty) {
            Some(node) => node,
            None => panic!("INTERNAL: {ty:?} is not a type of arena {:?}", self.id),
        }
    }

    /// Mutable access for building and analysis. Fails once frozen.
    pub fn try_tree_mut(&mut self, tree: Tree) -> Result<&mut TreeNode, ArenaError> {
        if self.frozen {
            return Err(ArenaError::Frozen {
                arena: self.id,
                name: self.name,
            });
        }
        self.rewrite_checked(tree)
    }

    /// Like [`ObjectArena::try_tree_mut`]; panics on a frozen arena.
    pub fn tree_mut(&mut self, tree: Tree) -> &mut TreeNode {
        match self.try_tree_mut(tree) {
            Ok(node) => node,
            Err(err) => panic!("INTERNAL: {err}"),
        }
    }

    /// In-place replacement used by folding and bounds annotation. Allowed on
    /// frozen arenas; callers must be the only writer of this unit.
    pub fn rewrite(&mut self, tree: Tree) -> &mut TreeNode {
        match self.rewrite_checked(tree) {
            Ok(node) => node,
            Err(err) => panic!("INTERNAL: {err}"),
        }
    }

    fn rewrite_checked(&mut self, tree: Tree) -> Result<&mut TreeNode, ArenaError> {
        let id = self.id;
        match self.slot_mut(tree.0) {
            Some(Object::Tree(node)) => Ok(node),
            _ => Err(ArenaError::NotFound {
                arena: id,
                object: tree.0,
            }),
        }
    }

    pub fn ty_mut(&mut self, ty: Type) -> Result<&mut TypeNode, ArenaError> {
        if self.frozen {
            return Err(ArenaError::Frozen {
                arena: self.id,
                name: self.name,
            });
        }
        let id = self.id;
        match self.slot_mut(ty.0) {
            Some(Object::Type(node)) => Ok(node),
            _ => Err(ArenaError::NotFound {
                arena: id,
                object: ty.0,
            }),
        }
    }

    /// Canonicalize a complete type descriptor: structurally identical
    /// descriptors share one handle.
    pub fn intern_type(&mut self, node: TypeNode) -> Type {
        debug_assert!(node.is_complete());
        if let Some(&ty) = self.interned.get(&node) {
            return ty;
        }
        let ty = self.alloc_type(node.clone());
        self.interned.insert(node, ty);
        ty
    }

    /// Allocate a placeholder for a type whose definition follows later.
    pub fn new_incomplete_type(&mut self, ident: Ident, decl: Option<Tree>) -> Type {
        self.alloc_type(TypeNode {
            decl,
            ..TypeNode::named(TypeKind::Incomplete, ident)
        })
    }

    /// Fill in a placeholder created by [`ObjectArena::new_incomplete_type`].
    /// Existing handles to it see the completed descriptor.
    pub fn complete_type(&mut self, ty: Type, node: TypeNode) -> Result<(), ArenaError> {
        if !node.is_complete() {
            return Err(ArenaError::StillIncomplete { object: ty.0 });
        }
        let slot = self.ty_mut(ty)?;
        if slot.is_complete() {
            return Err(ArenaError::AlreadyComplete { object: ty.0 });
        }
        *slot = node.clone();
        self.interned.entry(node).or_insert(ty);
        Ok(())
    }

    /// Every occupied index position with its object, holes included.
    pub fn objects(&self) -> impl Iterator<Item = (u32, &Object)> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(no, chunk)| chunk.as_ref().map(|chunk| (no, chunk)))
            .flat_map(|(no, chunk)| {
                chunk
                    .objects
                    .iter()
                    .enumerate()
                    .map(move |(off, obj)| ((no * CHUNK_OBJECTS + off) as u32, obj))
            })
    }

    /// Trees of the given kind, in allocation order.
    pub fn trees_of_kind(&self, kind: TreeKind) -> impl Iterator<Item = Tree> + '_ {
        let id = self.id;
        self.objects().filter_map(move |(index, obj)| match obj {
            Object::Tree(node) if node.kind == kind => Some(Tree(ObjectId { arena: id, index })),
            _ => None,
        })
    }

    /// Fill an empty arena from an image: `objects[i]` lands at index `i`.
    pub(crate) fn load_objects(&mut self, objects: Vec<Object>, root: Option<u32>) {
        debug_assert!(self.chunks.is_empty());
        for object in objects {
            let vacant = matches!(object, Object::Vacant);
            let id = self.alloc(object);
            if vacant {
                self.live -= 1;
            } else if let Some(Object::Type(node)) = self.slot(id)
                && node.is_complete()
            {
                let node = node.clone();
                self.interned.entry(node).or_insert(Type(id));
            }
        }
        let arena = self.id;
        self.root = root.map(|index| Tree(ObjectId { arena, index }));
    }

    /// Hand out a fork that allocates into this arena from another thread.
    pub fn fork(&mut self) -> ArenaFork {
        self.forks += 1;
        ArenaFork {
            arena: self.id,
            next_chunk: Arc::clone(&self.next_chunk),
            chunks: Vec::new(),
            current: None,
            live: 0,
        }
    }

    /// Merge a fork's chunks back. Handles it returned stay valid.
    pub fn join(&mut self, mut fork: ArenaFork) -> Result<(), ArenaError> {
        if fork.arena != self.id {
            return Err(ArenaError::ForeignFork {
                arena: self.id,
                fork: fork.arena,
            });
        }
        for (no, chunk) in std::mem::take(&mut fork.chunks) {
            self.install_chunk(no, chunk);
        }
        self.live += fork.live;
        self.forks -= 1;
        Ok(())
    }

    pub fn outstanding_forks(&self) -> u32 {
        self.forks
    }

    /// Release the whole region. Handles into it must not be used again.
    pub fn discard(self) {
        tracing::trace!(arena = ?self.id, name = ?self.name, objects = self.live, "discard arena");
        drop(self);
    }
}

impl Default for ObjectArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObjectArena {
    fn drop(&mut self) {
        tlab::release(std::mem::take(&mut self.chunks).into_iter().flatten());
    }
}

impl fmt::Debug for ObjectArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectArena")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("objects", &self.live)
            .field("frozen", &self.frozen)
            .finish()
    }
}

fn split_index(index: u32) -> (usize, usize) {
    let index = index as usize;
    (index / CHUNK_OBJECTS, index % CHUNK_OBJECTS)
}

/// Allocation handle for one arena used from another thread. Chunk numbers
/// are reserved from the parent arena, so handles are final as soon as they
/// are returned.
pub struct ArenaFork {
    arena: ArenaId,
    next_chunk: Arc<AtomicU32>,
    chunks: Vec<(u32, Chunk)>,
    current: Option<usize>,
    live: usize,
}

impl ArenaFork {
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    pub fn alloc_tree(&mut self, node: TreeNode) -> Tree {
        debug_assert!(node.validate().is_ok(), "{:?}", node.validate());
        Tree(self.alloc(Object::Tree(node)))
    }

    pub fn alloc_type(&mut self, node: TypeNode) -> Type {
        Type(self.alloc(Object::Type(node)))
    }

    fn alloc(&mut self, object: Object) -> ObjectId {
        let pos = match self.current {
            Some(pos) if !self.chunks[pos].1.is_full() => pos,
            _ => {
                let no = self.next_chunk.fetch_add(1, Ordering::Relaxed);
                self.chunks.push((no, tlab::take_chunk()));
                self.current = Some(self.chunks.len() - 1);
                self.chunks.len() - 1
            }
        };
        let (no, chunk) = &mut self.chunks[pos];
        let offset = chunk.objects.len();
        chunk.objects.push(object);
        self.live += 1;
        ObjectId {
            arena: self.arena,
            index: *no * CHUNK_OBJECTS as u32 + offset as u32,
        }
    }

    /// Read back a tree allocated through this fork.
    pub fn get_tree(&self, tree: Tree) -> Option<&TreeNode> {
        if tree.arena() != self.arena {
            return None;
        }
        let (chunk_no, offset) = split_index(tree.0.index);
        self.chunks
            .iter()
            .find(|(no, _)| *no as usize == chunk_no)
            .and_then(|(_, chunk)| match chunk.objects.get(offset) {
                Some(Object::Tree(node)) => Some(node),
                _ => None,
            })
    }
}

impl Drop for ArenaFork {
    fn drop(&mut self) {
        tlab::release(std::mem::take(&mut self.chunks).into_iter().map(|(_, c)| c));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Literal;
    use hdlc_identity::Loc;

    fn int_lit(v: i64) -> TreeNode {
        TreeNode {
            literal: Some(Literal::Int(v)),
            ..TreeNode::new(TreeKind::Literal, Loc::INVALID)
        }
    }

    #[test]
    fn alloc_and_read_back() {
        let mut arena = ObjectArena::new();
        let a = arena.alloc_tree(int_lit(1));
        let b = arena.alloc_tree(int_lit(2));
        assert_ne!(a, b);
        assert_eq!(arena.tree(a).literal, Some(Literal::Int(1)));
        assert_eq!(arena.tree(b).literal, Some(Literal::Int(2)));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn allocation_spans_chunks() {
        let mut arena = ObjectArena::new();
        let trees: Vec<Tree> = (0..(CHUNK_OBJECTS as i64 * 3 + 5))
            .map(|v| arena.alloc_tree(int_lit(v)))
            .collect();
        for (v, t) in trees.iter().enumerate() {
            assert_eq!(arena.tree(*t).literal, Some(Literal::Int(v as i64)));
        }
        assert_eq!(arena.index_span() as usize, CHUNK_OBJECTS * 4);
    }

    #[test]
    fn handles_are_arena_scoped() {
        let mut a = ObjectArena::new();
        let b = ObjectArena::new();
        let t = a.alloc_tree(int_lit(7));
        assert!(a.get_tree(t).is_some());
        assert!(b.get_tree(t).is_none());
    }

    #[test]
    fn frozen_arena_rejects_mutation_but_allows_rewrite() {
        let mut arena = ObjectArena::new();
        let t = arena.alloc_tree(int_lit(1));
        arena.freeze();
        assert!(matches!(
            arena.try_tree_mut(t),
            Err(ArenaError::Frozen { .. })
        ));
        arena.rewrite(t).literal = Some(Literal::Int(2));
        assert_eq!(arena.tree(t).literal, Some(Literal::Int(2)));
    }

    #[test]
    fn interning_canonicalizes_types() {
        let mut arena = ObjectArena::new();
        let int = Ident::new("INTEGER");
        let a = arena.intern_type(TypeNode::named(TypeKind::Integer, int));
        let b = arena.intern_type(TypeNode::named(TypeKind::Integer, int));
        let c = arena.intern_type(TypeNode::named(TypeKind::Real, Ident::new("REAL")));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn incomplete_types_complete_in_place() {
        let mut arena = ObjectArena::new();
        let name = Ident::new("NODE");
        let ty = arena.new_incomplete_type(name, None);
        assert!(!arena.ty(ty).is_complete());

        let access = arena.intern_type(TypeNode {
            designated: Some(ty),
            ..TypeNode::new(TypeKind::Access)
        });
        arena
            .complete_type(ty, TypeNode::named(TypeKind::Record, name))
            .unwrap();
        assert!(arena.ty(ty).is_complete());
        assert_eq!(arena.ty(access).designated, Some(ty));
        assert!(matches!(
            arena.complete_type(ty, TypeNode::named(TypeKind::Record, name)),
            Err(ArenaError::AlreadyComplete { .. })
        ));
    }

    #[test]
    fn fork_allocates_from_another_thread() {
        let mut arena = ObjectArena::new();
        let local = arena.alloc_tree(int_lit(-1));
        let mut fork = arena.fork();
        let (fork, remote) = std::thread::spawn(move || {
            let trees: Vec<Tree> = (0..300).map(|v| fork.alloc_tree(int_lit(v))).collect();
            (fork, trees)
        })
        .join()
        .unwrap();
        let after = arena.alloc_tree(int_lit(-2));
        arena.join(fork).unwrap();

        assert_eq!(arena.outstanding_forks(), 0);
        assert_eq!(arena.tree(local).literal, Some(Literal::Int(-1)));
        assert_eq!(arena.tree(after).literal, Some(Literal::Int(-2)));
        for (v, t) in remote.iter().enumerate() {
            assert_eq!(arena.tree(*t).literal, Some(Literal::Int(v as i64)));
        }
        assert_eq!(arena.len(), 302);
    }

    #[test]
    fn join_rejects_foreign_fork() {
        let mut a = ObjectArena::new();
        let mut b = ObjectArena::new();
        let fork = b.fork();
        assert!(matches!(a.join(fork), Err(ArenaError::ForeignFork { .. })));
    }

    #[test]
    fn discard_recycles_chunks() {
        let before = tlab::allocator_stats().chunks_recycled;
        let mut arena = ObjectArena::new();
        arena.alloc_tree(int_lit(1));
        arena.discard();
        assert!(tlab::allocator_stats().chunks_recycled > before);
    }
}
