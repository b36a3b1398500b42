// serialize.rs
//! Relocatable arena images.
//!
//! Layout: the magic `HDLA`, a little-endian `u32` format version, then two
//! bincode records: a [`ImageHead`] (unit name, generation, dependencies) and
//! the body (file table, root, object slots).
//!
//! Inside an image every handle names an arena *slot* instead of an
//! [`ArenaId`]: slot 0 is the image itself and slot `k` is the `k`-th entry of
//! the dependency list, which records each external arena by
//! `(name, generation)`. Object indices are preserved; unreachable objects are
//! written as vacant runs. Source locations are rewritten to index the
//! image's own file table.

use hdlc_identity::{FileRef, Ident, Loc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::arena::{ArenaId, Object, ObjectArena, ObjectId};
use crate::errors::{ArenaError, SerialError};
use crate::store::ObjectStore;

pub const MAGIC: &[u8; 4] = b"HDLA";
pub const FORMAT_VERSION: u32 = 3;

const LOCAL_SLOT: ArenaId = ArenaId(0);

/// Leading record of an image, readable without decoding the objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHead {
    pub name: Option<Ident>,
    pub generation: u32,
    pub deps: Vec<(Ident, u32)>,
}

#[derive(Serialize, Deserialize)]
enum Slot {
    Object(Object),
    Vacant(u32),
}

#[derive(Serialize, Deserialize)]
struct ImageBody {
    files: Vec<String>,
    root: u32,
    slots: Vec<Slot>,
}

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Write the image of arena `id`. The arena must have a root, and every
/// arena it references must be named.
pub fn serialize(store: &ObjectStore, id: ArenaId) -> Result<Vec<u8>, SerialError> {
    let arena = store.arena(id).ok_or(ArenaError::StaleArena { arena: id })?;
    let root = arena.root().ok_or(SerialError::NoRoot { arena: id })?;

    let reachable = reachable_objects(arena, root.id());

    let mut deps: Vec<(Ident, u32)> = Vec::new();
    let mut dep_slots: FxHashMap<ArenaId, u32> = FxHashMap::default();
    let mut files: Vec<String> = Vec::new();
    let mut file_slots: FxHashMap<FileRef, u16> = FxHashMap::default();
    let mut failure: Option<SerialError> = None;

    let mut relocate = |oid: &mut ObjectId| {
        if oid.arena == id {
            oid.arena = LOCAL_SLOT;
            return;
        }
        let slot = match dep_slots.get(&oid.arena) {
            Some(&slot) => slot,
            None => {
                let Some(dep) = store.arena(oid.arena) else {
                    failure.get_or_insert(ArenaError::StaleArena { arena: oid.arena }.into());
                    return;
                };
                let Some(name) = dep.name() else {
                    failure.get_or_insert(SerialError::UnnamedDependency {
                        arena: id,
                        dep: oid.arena,
                    });
                    return;
                };
                deps.push((name, dep.generation()));
                let slot = deps.len() as u32;
                dep_slots.insert(oid.arena, slot);
                slot
            }
        };
        oid.arena = ArenaId(slot);
    };

    let mut slots = Vec::new();
    let mut vacant_run = 0u32;
    let mut next = 0u32;
    for (index, object) in arena.objects() {
        // Positions of partially filled chunks are holes too.
        vacant_run += index - next;
        next = index + 1;
        if !reachable.contains(&index) {
            vacant_run += 1;
            continue;
        }
        if vacant_run > 0 {
            slots.push(Slot::Vacant(vacant_run));
            vacant_run = 0;
        }
        let mut object = object.clone();
        match &mut object {
            Object::Tree(node) => {
                node.visit_handles_mut(&mut relocate);
                node.loc = relocate_loc(node.loc, &mut files, &mut file_slots);
            }
            Object::Type(node) => node.visit_handles_mut(&mut relocate),
            Object::Vacant => {}
        }
        slots.push(Slot::Object(object));
    }
    if let Some(err) = failure {
        return Err(err);
    }

    let head = ImageHead {
        name: arena.name(),
        generation: arena.generation(),
        deps,
    };
    let body = ImageBody {
        files,
        root: root.id().index,
        slots,
    };

    let mut bytes = Vec::with_capacity(64 + arena.len() * 32);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend(bincode::serde::encode_to_vec(&head, config())?);
    bytes.extend(bincode::serde::encode_to_vec(&body, config())?);

    tracing::debug!(
        arena = ?id,
        name = ?head.name,
        objects = arena.len(),
        deps = head.deps.len(),
        bytes = bytes.len(),
        "serialized arena"
    );
    Ok(bytes)
}

fn relocate_loc(loc: Loc, files: &mut Vec<String>, slots: &mut FxHashMap<FileRef, u16>) -> Loc {
    let file = loc.file();
    if file.is_invalid() {
        return loc;
    }
    let slot = *slots.entry(file).or_insert_with(|| {
        files.push(file.name().to_owned());
        (files.len() - 1) as u16
    });
    loc.with_file(FileRef::from_raw(slot))
}

fn reachable_objects(arena: &ObjectArena, root: ObjectId) -> FxHashSet<u32> {
    let local = arena.id();
    let mut seen = FxHashSet::default();
    let mut work = vec![root];
    while let Some(oid) = work.pop() {
        if oid.arena != local || !seen.insert(oid.index) {
            continue;
        }
        let mut push = |child: &mut ObjectId| work.push(*child);
        match arena.object(oid) {
            Some(Object::Tree(node)) => node.clone().visit_handles_mut(&mut push),
            Some(Object::Type(node)) => node.clone().visit_handles_mut(&mut push),
            _ => {}
        }
    }
    seen
}

fn split_header(bytes: &[u8]) -> Result<&[u8], SerialError> {
    if bytes.len() < 8 || &bytes[..4] != MAGIC {
        return Err(SerialError::BadMagic);
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let found = u32::from_le_bytes(version);
    if found != FORMAT_VERSION {
        return Err(SerialError::VersionMismatch {
            expected: FORMAT_VERSION,
            found,
        });
    }
    Ok(&bytes[8..])
}

/// Read the head of an image after checking magic and version.
pub fn peek(bytes: &[u8]) -> Result<ImageHead, SerialError> {
    let rest = split_header(bytes)?;
    let (head, _) = bincode::serde::decode_from_slice(rest, config())?;
    Ok(head)
}

/// Load an image into a fresh, frozen arena registered in `store`. All
/// dependencies must already be loaded with matching generations.
pub fn deserialize(store: &mut ObjectStore, bytes: &[u8]) -> Result<ArenaId, SerialError> {
    let rest = split_header(bytes)?;
    let (head, used): (ImageHead, usize) = bincode::serde::decode_from_slice(rest, config())?;
    let (body, _): (ImageBody, usize) =
        bincode::serde::decode_from_slice(&rest[used..], config())?;

    let mut dep_ids = Vec::with_capacity(head.deps.len());
    for &(name, expected) in &head.deps {
        let dep = store
            .find(name)
            .and_then(|id| store.arena(id))
            .ok_or(SerialError::MissingDependency { name })?;
        if dep.generation() != expected {
            return Err(SerialError::StaleDependency {
                name,
                expected,
                found: dep.generation(),
            });
        }
        dep_ids.push(dep.id());
    }

    let files: Vec<FileRef> = body.files.iter().map(|f| FileRef::intern(f)).collect();

    let mut arena = ObjectArena::new().with_generation(head.generation);
    if let Some(name) = head.name {
        arena.set_name(name);
    }
    let local = arena.id();

    let mut failure: Option<SerialError> = None;
    let mut resolve = |oid: &mut ObjectId| {
        let slot = oid.arena.0 as usize;
        if slot == 0 {
            oid.arena = local;
        } else if let Some(&dep) = dep_ids.get(slot - 1) {
            oid.arena = dep;
        } else {
            failure.get_or_insert(SerialError::Corrupt(format!(
                "reference to dependency slot {slot}"
            )));
        }
    };

    let mut objects = Vec::with_capacity(body.slots.len());
    for slot in body.slots {
        match slot {
            Slot::Vacant(run) => objects.extend((0..run).map(|_| Object::Vacant)),
            Slot::Object(mut object) => {
                match &mut object {
                    Object::Tree(node) => {
                        node.visit_handles_mut(&mut resolve);
                        let file = node.loc.file();
                        if !file.is_invalid() {
                            let Some(&real) = files.get(file.raw() as usize) else {
                                return Err(SerialError::Corrupt(format!(
                                    "file slot {} out of range",
                                    file.raw()
                                )));
                            };
                            node.loc = node.loc.with_file(real);
                        }
                    }
                    Object::Type(node) => node.visit_handles_mut(&mut resolve),
                    Object::Vacant => {}
                }
                objects.push(object);
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }
    if body.root as usize >= objects.len() {
        return Err(SerialError::Corrupt(format!("root {} out of range", body.root)));
    }

    arena.load_objects(objects, Some(body.root));
    arena.freeze();
    tracing::debug!(arena = ?local, name = ?head.name, objects = arena.len(), "deserialized arena");
    Ok(store.insert(arena))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Tree;
    use crate::tree::{Literal, TreeKind, TreeNode};
    use crate::types::{TypeKind, TypeNode};

    fn lit(arena: &mut ObjectArena, v: i64, loc: Loc) -> Tree {
        arena.alloc_tree(TreeNode {
            literal: Some(Literal::Int(v)),
            ..TreeNode::new(TreeKind::Literal, loc)
        })
    }

    /// Compare two graphs node by node, following owned children.
    fn assert_isomorphic(a: &ObjectStore, ta: Tree, b: &ObjectStore, tb: Tree) {
        let na = a.tree(ta);
        let nb = b.tree(tb);
        assert_eq!(na.kind, nb.kind);
        assert_eq!(na.ident, nb.ident);
        assert_eq!(na.literal, nb.literal);
        assert_eq!(na.loc.to_string(), nb.loc.to_string());
        assert_eq!(na.ty.map(|t| a.ty(t).kind), nb.ty.map(|t| b.ty(t).kind));
        let mut ca = Vec::new();
        let mut cb = Vec::new();
        na.for_each_child(|c| ca.push(c));
        nb.for_each_child(|c| cb.push(c));
        assert_eq!(ca.len(), cb.len());
        for (x, y) in ca.into_iter().zip(cb) {
            assert_isomorphic(a, x, b, y);
        }
    }

    #[test]
    fn round_trip_preserves_structure() {
        let file = FileRef::intern("round_trip.vhd");
        let mut store = ObjectStore::new();
        let mut arena = ObjectArena::new().with_name(Ident::new("WORK.RT"));
        let int = arena.intern_type(TypeNode::named(TypeKind::Integer, Ident::new("INTEGER")));

        let a = lit(&mut arena, 1, Loc::point(file, 3, 10));
        let b = lit(&mut arena, 2, Loc::point(file, 3, 14));
        // Unreachable object leaves a hole.
        lit(&mut arena, 99, Loc::INVALID);
        let mut call = TreeNode::new(TreeKind::FCall, Loc::new(file, 3, 10, 3, 14));
        call.ident = Some(Ident::new("\"+\""));
        call.ty = Some(int);
        call.params = vec![a, b];
        let call = arena.alloc_tree(call);
        let mut decl = TreeNode::new(TreeKind::ConstDecl, Loc::point(file, 3, 1));
        decl.ident = Some(Ident::new("C"));
        decl.value = Some(call);
        decl.ty = Some(int);
        let decl = arena.alloc_tree(decl);
        let mut pkg = TreeNode::new(TreeKind::Package, Loc::point(file, 1, 1));
        pkg.ident = Some(Ident::new("RT"));
        pkg.decls = vec![decl];
        let pkg = arena.alloc_tree(pkg);
        arena.set_root(pkg);
        let id = store.insert(arena);

        let bytes = serialize(&store, id).unwrap();

        let mut other = ObjectStore::new();
        let loaded = deserialize(&mut other, &bytes).unwrap();
        let loaded_arena = other.arena(loaded).unwrap();
        assert!(loaded_arena.is_frozen());
        assert_eq!(loaded_arena.len(), store.arena(id).unwrap().len() - 1);
        let root = loaded_arena.root().unwrap();
        assert_isomorphic(&store, pkg, &other, root);

        // Indices survive the round trip.
        assert_eq!(root.id().index, pkg.id().index);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut store = ObjectStore::new();
        let mut arena = ObjectArena::new();
        let t = lit(&mut arena, 1, Loc::INVALID);
        arena.set_root(t);
        let id = store.insert(arena);
        let mut bytes = serialize(&store, id).unwrap();
        bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            deserialize(&mut ObjectStore::new(), &bytes),
            Err(SerialError::VersionMismatch { found, .. }) if found == FORMAT_VERSION + 1
        ));
        assert!(matches!(
            deserialize(&mut ObjectStore::new(), b"nope"),
            Err(SerialError::BadMagic)
        ));
    }

    #[test]
    fn external_references_need_matching_generation() {
        let mut store = ObjectStore::new();
        let dep_name = Ident::new("STD.DEP_TEST");
        let mut dep = ObjectArena::new().with_name(dep_name).with_generation(3);
        let dep_root = lit(&mut dep, 42, Loc::INVALID);
        dep.set_root(dep_root);
        store.insert(dep);

        let mut user = ObjectArena::new().with_name(Ident::new("WORK.USER"));
        let mut r = TreeNode::new(TreeKind::Ref, Loc::INVALID);
        r.ident = Some(Ident::new("X"));
        r.reference = Some(dep_root);
        let r = user.alloc_tree(r);
        user.set_root(r);
        let user_id = store.insert(user);

        let bytes = serialize(&store, user_id).unwrap();
        let head = peek(&bytes).unwrap();
        assert_eq!(head.deps, vec![(dep_name, 3)]);

        // Missing dependency.
        let mut empty = ObjectStore::new();
        assert!(matches!(
            deserialize(&mut empty, &bytes),
            Err(SerialError::MissingDependency { .. })
        ));

        // Wrong generation.
        let mut stale = ObjectStore::new();
        let mut dep2 = ObjectArena::new().with_name(dep_name).with_generation(4);
        let t = lit(&mut dep2, 0, Loc::INVALID);
        dep2.set_root(t);
        stale.insert(dep2);
        assert!(matches!(
            deserialize(&mut stale, &bytes),
            Err(SerialError::StaleDependency { expected: 3, found: 4, .. })
        ));

        // Same store: the reference resolves to the loaded dependency.
        let loaded = deserialize(&mut store, &bytes).unwrap();
        let root = store.arena(loaded).unwrap().root().unwrap();
        let target = store.tree(root).reference.unwrap();
        assert_eq!(target, dep_root);
        assert_eq!(store.tree(target).literal, Some(Literal::Int(42)));
    }

    #[test]
    fn unnamed_dependency_is_an_error() {
        let mut store = ObjectStore::new();
        let mut dep = ObjectArena::new();
        let target = lit(&mut dep, 1, Loc::INVALID);
        store.insert(dep);
        let mut user = ObjectArena::new();
        let mut r = TreeNode::new(TreeKind::Ref, Loc::INVALID);
        r.reference = Some(target);
        let r = user.alloc_tree(r);
        user.set_root(r);
        let id = store.insert(user);
        assert!(matches!(
            serialize(&store, id),
            Err(SerialError::UnnamedDependency { .. })
        ));
    }
}
