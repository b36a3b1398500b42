// typeinfo.rs
//
// Queries over type descriptors that need to follow handles across arenas.

use hdlc_identity::Ident;

use crate::arena::{Tree, Type};
use crate::store::ObjectStore;
use crate::tree::{Direction, Literal, TreeKind};
use crate::types::TypeKind;

/// Statically known bounds of a range: `left`, `direction`, `right`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticRange {
    pub left: i64,
    pub direction: Direction,
    pub right: i64,
}

impl StaticRange {
    pub fn low(&self) -> i64 {
        match self.direction {
            Direction::To => self.left,
            Direction::Downto => self.right,
        }
    }

    pub fn high(&self) -> i64 {
        match self.direction {
            Direction::To => self.right,
            Direction::Downto => self.left,
        }
    }

    pub fn is_null(&self) -> bool {
        self.low() > self.high()
    }

    /// Number of values in the range; zero for a null range.
    pub fn length(&self) -> i64 {
        if self.is_null() {
            0
        } else {
            self.high().saturating_sub(self.low()).saturating_add(1)
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.low() && value <= self.high()
    }
}

impl ObjectStore {
    /// Follow subtype links to the underlying type.
    pub fn base_type(&self, mut ty: Type) -> Type {
        while let Some(node) = self.get_type(ty) {
            match (node.kind, node.base) {
                (TypeKind::Subtype, Some(base)) => ty = base,
                _ => break,
            }
        }
        ty
    }

    pub fn type_kind(&self, ty: Type) -> TypeKind {
        let base = self.base_type(ty);
        self.get_type(base).map_or(TypeKind::None, |n| n.kind)
    }

    /// Display name of a type: its own name, or the name of the nearest named
    /// ancestor for anonymous subtypes.
    pub fn type_name(&self, ty: Type) -> String {
        let mut cur = Some(ty);
        while let Some(t) = cur {
            match self.get_type(t) {
                Some(node) => {
                    if let Some(ident) = node.ident {
                        return ident.as_str().to_owned();
                    }
                    cur = node.base;
                }
                None => break,
            }
        }
        String::from("<anonymous>")
    }

    /// Whether the type is one of the universal numeric types.
    pub fn is_universal(&self, ty: Type) -> bool {
        self.get_type(ty)
            .and_then(|n| n.ident)
            .is_some_and(|name| name.as_str().starts_with("UNIVERSAL_"))
    }

    /// Whether two types have the same base type.
    pub fn same_base(&self, a: Type, b: Type) -> bool {
        self.base_type(a) == self.base_type(b)
    }

    /// The nearest scalar range constraint of `ty`.
    pub fn scalar_range(&self, ty: Type) -> Option<Tree> {
        let mut cur = Some(ty);
        while let Some(t) = cur {
            let node = self.get_type(t)?;
            if let Some(&range) = node.ranges.first() {
                return Some(range);
            }
            cur = node.base;
        }
        None
    }

    /// `left`/`direction`/`right` of a `Range` tree whose bounds are literals
    /// or enumeration literal names.
    pub fn static_range(&self, range: Tree) -> Option<StaticRange> {
        let node = self.get_tree(range)?;
        if node.kind != TreeKind::Range {
            return None;
        }
        let bound = |t: Option<Tree>| {
            let n = self.get_tree(t?)?;
            match n.kind {
                TreeKind::Ref => {
                    let decl = self.get_tree(n.reference?)?;
                    (decl.kind == TreeKind::EnumLit).then_some(decl.position as i64)
                }
                _ => n.literal.and_then(Literal::as_int),
            }
        };
        Some(StaticRange {
            left: bound(node.left)?,
            direction: node.direction?,
            right: bound(node.right)?,
        })
    }

    /// Statically known range of a discrete scalar type. Enumerations span
    /// their literal positions.
    pub fn discrete_range(&self, ty: Type) -> Option<StaticRange> {
        if let Some(range) = self.scalar_range(ty) {
            return self.static_range(range);
        }
        let base = self.get_type(self.base_type(ty))?;
        match base.kind {
            TypeKind::Enum if !base.members.is_empty() => Some(StaticRange {
                left: 0,
                direction: Direction::To,
                right: base.members.len() as i64 - 1,
            }),
            _ => None,
        }
    }

    /// Inclusive `(low, high)` bounds of a discrete type, if static.
    pub fn int_bounds(&self, ty: Type) -> Option<(i64, i64)> {
        self.discrete_range(ty).map(|r| (r.low(), r.high()))
    }

    pub fn element_type(&self, ty: Type) -> Option<Type> {
        self.get_type(self.base_type(ty))?.elem
    }

    /// Index constraint of dimension `dim` of an array subtype.
    pub fn index_constraint(&self, ty: Type, dim: usize) -> Option<Tree> {
        let mut cur = Some(ty);
        while let Some(t) = cur {
            let node = self.get_type(t)?;
            if node.kind == TypeKind::Subtype
                && let Some(&range) = node.ranges.get(dim)
            {
                return Some(range);
            }
            cur = node.base;
        }
        None
    }

    /// Index subtype of dimension `dim` of an array type.
    pub fn index_type(&self, ty: Type, dim: usize) -> Option<Type> {
        self.get_type(self.base_type(ty))?.index.get(dim).copied()
    }

    pub fn is_constrained_array(&self, ty: Type) -> bool {
        self.type_kind(ty) == TypeKind::Array && self.index_constraint(ty, 0).is_some()
    }

    /// Position of the enumeration literal named `name` within `ty`.
    pub fn enum_position(&self, ty: Type, name: Ident) -> Option<u32> {
        let base = self.get_type(self.base_type(ty))?;
        base.members
            .iter()
            .position(|&lit| self.get_tree(lit).and_then(|n| n.ident) == Some(name))
            .map(|pos| pos as u32)
    }
}
