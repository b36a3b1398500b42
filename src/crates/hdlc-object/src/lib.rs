// src/lib.rs
//
// Object memory model for the hdlc core: arenas with thread-local allocation
// buffers, the tree and type-descriptor graph they own, relocatable arena
// images and the design libraries built on them.

mod arena;
pub mod builder;
mod errors;
pub mod library;
pub mod serialize;
mod store;
mod tlab;
pub mod tree;
mod typeinfo;
pub mod types;

pub use arena::{
    ArenaFork, ArenaId, FIRST_DYNAMIC_GENERATION, Object, ObjectArena, ObjectId, Tree, Type,
};
pub use errors::{ArenaError, LibraryError, LibraryResult, SerialError};
pub use library::{Library, LibraryStore};
pub use store::ObjectStore;
pub use tlab::{AllocatorStats, CHUNK_OBJECTS, allocator_stats};
pub use tree::{
    AssocKind, Attr, AttrKind, Builtin, Class, Direction, Flags, Literal, PortMode, TreeKind,
    TreeNode,
};
pub use typeinfo::StaticRange;
pub use types::{TypeKind, TypeNode};

use hdlc_identity::Ident;

/// Library unit name of a design unit: `LIB.ENT`, `LIB.ENT-ARCH`, `LIB.PKG`
/// or `LIB.PKG-body`.
pub fn unit_name(library: Ident, unit: &TreeNode) -> Option<Ident> {
    let name = unit.ident?;
    let sep = library::SECONDARY_SEP;
    match unit.kind {
        TreeKind::Entity | TreeKind::Package => Some(Ident::prefix(library, name, '.')),
        TreeKind::Architecture => {
            let entity = Ident::prefix(library, unit.ident2?, '.');
            Some(Ident::prefix(entity, name, sep))
        }
        TreeKind::PackageBody => {
            Some(Ident::compose(Ident::prefix(library, name, '.'), sep, "body"))
        }
        _ => None,
    }
}
