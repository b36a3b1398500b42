// types.rs
//! Type descriptors.
//!
//! Complete descriptors are interned per arena (see
//! [`ObjectArena::intern_type`](crate::ObjectArena::intern_type)), so two
//! handles to structurally identical complete types compare equal.

use hdlc_identity::Ident;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::arena::{ObjectId, Tree, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Declared but not yet completed.
    Incomplete,
    /// Result of a failed resolution; compatible with everything so that one
    /// error does not cascade.
    None,
    Integer,
    Real,
    Enum,
    /// Unconstrained array: index subtypes in `index`, element in `elem`.
    Array,
    /// Constrained subtype of `base`; scalar subtypes carry one range in
    /// `ranges`, array subtypes one range per dimension.
    Subtype,
    Record,
    Access,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub ident: Option<Ident>,
    /// Declaration that introduced the type. Distinguishes equally named types
    /// declared in different regions.
    pub decl: Option<Tree>,
    pub base: Option<Type>,
    pub elem: Option<Type>,
    pub designated: Option<Type>,
    pub index: SmallVec<[Type; 2]>,
    /// `Range` trees giving the constraint.
    pub ranges: SmallVec<[Tree; 2]>,
    /// `EnumLit` declarations for enumerations, `FieldDecl`s for records.
    pub members: Vec<Tree>,
}

impl TypeNode {
    pub fn new(kind: TypeKind) -> TypeNode {
        TypeNode {
            kind,
            ident: None,
            decl: None,
            base: None,
            elem: None,
            designated: None,
            index: SmallVec::new(),
            ranges: SmallVec::new(),
            members: Vec::new(),
        }
    }

    pub fn named(kind: TypeKind, ident: Ident) -> TypeNode {
        TypeNode {
            ident: Some(ident),
            ..TypeNode::new(kind)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.kind != TypeKind::Incomplete
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Integer | TypeKind::Real | TypeKind::Enum)
    }

    pub(crate) fn visit_handles_mut(&mut self, f: &mut dyn FnMut(&mut ObjectId)) {
        for ty in [&mut self.base, &mut self.elem, &mut self.designated]
            .into_iter()
            .flatten()
        {
            f(&mut ty.0);
        }
        for ty in self.index.iter_mut() {
            f(&mut ty.0);
        }
        if let Some(decl) = &mut self.decl {
            f(&mut decl.0);
        }
        for tree in self.ranges.iter_mut().chain(self.members.iter_mut()) {
            f(&mut tree.0);
        }
    }
}
