// src/standard.rs
//! The `STD.STANDARD` package.
//!
//! The package is built in code rather than parsed. Its arena has the fixed
//! generation [`STANDARD_GENERATION`] and the same layout on every build, so
//! stored images of units that refer into it load in any session that has
//! installed it.

use hdlc_identity::{FileRef, Ident};
use hdlc_object::builder::TreeBuilder;
use hdlc_object::{Direction, ObjectArena, ObjectStore, Tree, TreeKind, Type, TypeKind, TypeNode};

use crate::predefined::{OpClass, OpContext, declare_operators};

/// Library unit name of the standard package.
pub const STANDARD: &str = "STD.STANDARD";

/// Generation of the standard package arena.
pub const STANDARD_GENERATION: u32 = 1;

const STANDARD_FILE: &str = "std/standard.vhd";

/// Handles to the declarations of `STD.STANDARD` in one object store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Standard {
    pub unit: Tree,
    pub boolean: Type,
    pub bit: Type,
    pub severity_level: Type,
    pub integer: Type,
    pub natural: Type,
    pub positive: Type,
    pub real: Type,
    pub universal_integer: Type,
    pub universal_real: Type,
    pub bit_vector: Type,
}

impl Standard {
    /// Make `STD.STANDARD` available in `store`, building it on first use.
    pub fn install(store: &mut ObjectStore) -> Standard {
        if store.find(Ident::new(STANDARD)).is_none() {
            let arena = build();
            tracing::debug!(objects = arena.len(), "built standard package");
            store.insert(arena);
        }
        match Standard::recover(store) {
            Some(std) => std,
            None => panic!("INTERNAL: {STANDARD} in the object store is malformed"),
        }
    }

    /// Handles of an already loaded standard package.
    pub fn recover(store: &ObjectStore) -> Option<Standard> {
        let unit = store.unit(Ident::new(STANDARD))?;
        let decls = &store.get_tree(unit)?.decls;
        let find = |name: &str| {
            let name = Ident::new(name);
            decls.iter().find_map(|&d| {
                let node = store.get_tree(d)?;
                let is_type = matches!(node.kind, TreeKind::TypeDecl | TreeKind::SubtypeDecl);
                if is_type && node.ident == Some(name) {
                    node.ty
                } else {
                    None
                }
            })
        };
        Some(Standard {
            unit,
            boolean: find("BOOLEAN")?,
            bit: find("BIT")?,
            severity_level: find("SEVERITY_LEVEL")?,
            integer: find("INTEGER")?,
            natural: find("NATURAL")?,
            positive: find("POSITIVE")?,
            real: find("REAL")?,
            universal_integer: find("UNIVERSAL_INTEGER")?,
            universal_real: find("UNIVERSAL_REAL")?,
            bit_vector: find("BIT_VECTOR")?,
        })
    }

    pub(crate) fn op_context(&self) -> OpContext {
        OpContext {
            boolean: self.boolean,
            bit: self.bit,
            integer: self.integer,
        }
    }

    /// The universal type of the same class as `ty`, if numeric.
    pub fn universal_of(&self, store: &ObjectStore, ty: Type) -> Option<Type> {
        match store.type_kind(ty) {
            TypeKind::Integer => Some(self.universal_integer),
            TypeKind::Real => Some(self.universal_real),
            _ => None,
        }
    }
}

/// A declared type of the package and the operators it gets.
struct Declared {
    decl: Tree,
    ty: Type,
    name: &'static str,
    ops: Option<OpClass>,
}

fn build() -> ObjectArena {
    let mut arena = ObjectArena::new()
        .with_name(Ident::new(STANDARD))
        .with_generation(STANDARD_GENERATION);
    let mut b = TreeBuilder::new(&mut arena, FileRef::intern(STANDARD_FILE));
    let mut types = Vec::new();

    let logical = Some(OpClass::Enum { logical: true });
    let boolean = enumeration(&mut b, "BOOLEAN", &["FALSE", "TRUE"], logical);
    let bit = enumeration(&mut b, "BIT", &["'0'", "'1'"], logical);
    let severity = enumeration(
        &mut b,
        "SEVERITY_LEVEL",
        &["NOTE", "WARNING", "ERROR", "FAILURE"],
        Some(OpClass::Enum { logical: false }),
    );

    let range = b.to(i32::MIN as i64, i32::MAX as i64);
    let integer = numeric(&mut b, "INTEGER", TypeKind::Integer, range);
    let range = b.to(i64::MIN, i64::MAX);
    let universal_integer = numeric(&mut b, "UNIVERSAL_INTEGER", TypeKind::Integer, range);
    let (low, high) = (b.real(-f64::MAX), b.real(f64::MAX));
    let range = b.range(low, Direction::To, high);
    let real = numeric(&mut b, "REAL", TypeKind::Real, range);
    let (low, high) = (b.real(-f64::MAX), b.real(f64::MAX));
    let range = b.range(low, Direction::To, high);
    let universal_real = numeric(&mut b, "UNIVERSAL_REAL", TypeKind::Real, range);

    let natural = subtype(&mut b, "NATURAL", &integer, 0, i32::MAX as i64);
    let positive = subtype(&mut b, "POSITIVE", &integer, 1, i32::MAX as i64);
    let bit_vector = unconstrained_array(&mut b, "BIT_VECTOR", &natural, &bit);

    let ctx = OpContext {
        boolean: boolean.ty,
        bit: bit.ty,
        integer: integer.ty,
    };
    types.extend([
        boolean,
        bit,
        severity,
        integer,
        universal_integer,
        real,
        universal_real,
        natural,
        positive,
        bit_vector,
    ]);

    let names: Vec<(Type, &'static str)> = types.iter().map(|t| (t.ty, t.name)).collect();
    let type_name = |ty: Type| {
        names
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, name)| (*name).to_owned())
            .unwrap_or_default()
    };
    let prefix = Ident::new(STANDARD);
    let loc = b.loc();
    let mut decls = Vec::new();
    for declared in &types {
        decls.push(declared.decl);
        if let Some(class) = declared.ops {
            let arena = b.arena();
            decls.extend(declare_operators(
                &mut |node| arena.alloc_tree(node),
                &type_name,
                declared.ty,
                class,
                &ctx,
                prefix,
                loc,
            ));
        }
    }
    let package = b.package("STANDARD", decls);
    b.finish(package);
    arena
}

fn enumeration(
    b: &mut TreeBuilder<'_>,
    name: &'static str,
    literals: &[&str],
    ops: Option<OpClass>,
) -> Declared {
    let decl = b.type_enum(name, literals);
    let arena = b.arena();
    let members = arena
        .tree(decl)
        .value
        .map(|def| arena.tree(def).decls.clone())
        .unwrap_or_default();
    let ty = arena.intern_type(TypeNode {
        decl: Some(decl),
        members: members.clone(),
        ..TypeNode::named(TypeKind::Enum, Ident::new(name))
    });
    for lit in members {
        arena.tree_mut(lit).ty = Some(ty);
    }
    arena.tree_mut(decl).ty = Some(ty);
    Declared { decl, ty, name, ops }
}

fn numeric(b: &mut TreeBuilder<'_>, name: &'static str, kind: TypeKind, range: Tree) -> Declared {
    let decl = b.type_range(name, range);
    let arena = b.arena();
    let mut node = TypeNode::named(kind, Ident::new(name));
    node.decl = Some(decl);
    node.ranges.push(range);
    let ty = arena.intern_type(node);
    type_range(arena, range, ty);
    arena.tree_mut(decl).ty = Some(ty);
    let ops = match kind {
        TypeKind::Real => OpClass::Real,
        _ => OpClass::Integer,
    };
    Declared {
        decl,
        ty,
        name,
        ops: Some(ops),
    }
}

/// `subtype NAME is BASE range left to right`
fn subtype(b: &mut TreeBuilder<'_>, name: &'static str, base: &Declared, left: i64, right: i64) -> Declared {
    let range = b.to(left, right);
    let mark = b.constrained(base.name, &[range]);
    let decl = b.subtype(name, mark);
    let arena = b.arena();
    let mut node = TypeNode::named(TypeKind::Subtype, Ident::new(name));
    node.decl = Some(decl);
    node.base = Some(base.ty);
    node.ranges.push(range);
    let ty = arena.intern_type(node);
    type_range(arena, range, base.ty);
    resolve_mark(arena, mark, base.decl, ty);
    arena.tree_mut(decl).ty = Some(ty);
    Declared {
        decl,
        ty,
        name,
        ops: None,
    }
}

/// `type NAME is array (INDEX range <>) of ELEM`
fn unconstrained_array(
    b: &mut TreeBuilder<'_>,
    name: &'static str,
    index: &Declared,
    elem: &Declared,
) -> Declared {
    let index_mark = b.mark(index.name);
    let elem_mark = b.mark(elem.name);
    let decl = b.type_unconstrained_array(name, &[index_mark], elem_mark);
    let arena = b.arena();
    let mut node = TypeNode::named(TypeKind::Array, Ident::new(name));
    node.decl = Some(decl);
    node.index.push(index.ty);
    node.elem = Some(elem.ty);
    let ty = arena.intern_type(node);
    resolve_mark(arena, index_mark, index.decl, index.ty);
    resolve_mark(arena, elem_mark, elem.decl, elem.ty);
    arena.tree_mut(decl).ty = Some(ty);
    Declared {
        decl,
        ty,
        name,
        ops: Some(OpClass::Array {
            ordered: true,
            logical: true,
        }),
    }
}

fn type_range(arena: &mut ObjectArena, range: Tree, ty: Type) {
    let node = arena.tree(range);
    let bounds = [node.left, node.right];
    arena.tree_mut(range).ty = Some(ty);
    for bound in bounds.into_iter().flatten() {
        arena.tree_mut(bound).ty = Some(ty);
    }
}

fn resolve_mark(arena: &mut ObjectArena, mark: Tree, decl: Tree, ty: Type) {
    let node = arena.tree_mut(mark);
    node.reference = Some(decl);
    node.ty = Some(ty);
}
