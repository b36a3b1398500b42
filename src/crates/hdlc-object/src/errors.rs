// errors.rs
//! Object-model errors. All of these are contract violations or storage
//! failures, never user diagnostics.

use hdlc_identity::Ident;
use thiserror::Error;

use crate::arena::{ArenaId, ObjectId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena {arena:?} ({name:?}) is frozen")]
    Frozen { arena: ArenaId, name: Option<Ident> },

    #[error("object {object:?} not found in arena {arena:?}")]
    NotFound { arena: ArenaId, object: ObjectId },

    #[error("arena {arena:?} is not loaded")]
    StaleArena { arena: ArenaId },

    #[error("type {object:?} is already complete")]
    AlreadyComplete { object: ObjectId },

    #[error("completion of {object:?} supplied an incomplete descriptor")]
    StillIncomplete { object: ObjectId },

    #[error("fork of arena {fork:?} cannot join arena {arena:?}")]
    ForeignFork { arena: ArenaId, fork: ArenaId },
}

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("not an arena image")]
    BadMagic,

    #[error("image format version {found} does not match {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("arena {arena:?} has no root")]
    NoRoot { arena: ArenaId },

    #[error("arena {arena:?} references arena {dep:?}, which has no name")]
    UnnamedDependency { arena: ArenaId, dep: ArenaId },

    #[error("dependency {name} is not loaded")]
    MissingDependency { name: Ident },

    #[error("dependency {name} has generation {found}, image expects {expected}")]
    StaleDependency {
        name: Ident,
        expected: u32,
        found: u32,
    },

    #[error("corrupt image: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("no design unit {unit} in library {library}")]
    UnitNotFound { library: Ident, unit: Ident },

    #[error("no library named {0} on the search path")]
    LibraryNotFound(Ident),

    #[error("unit {unit} in library {library}: {source}")]
    Load {
        library: Ident,
        unit: Ident,
        #[source]
        source: SerialError,
    },

    #[error("arena {arena:?} has no unit name")]
    Unnamed { arena: ArenaId },

    #[error("no work library set")]
    NoWork,

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error("library I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type LibraryResult<T> = Result<T, LibraryError>;
