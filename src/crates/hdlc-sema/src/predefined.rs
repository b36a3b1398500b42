// src/predefined.rs
//
// Implicitly declared operators. Every scalar, array and record type gets a
// set of builtin function declarations placed right after its type
// declaration, both in STD.STANDARD and in user packages.

use hdlc_identity::{Ident, Loc};
use hdlc_object::builder::operator_name;
use hdlc_object::{Builtin, Class, ObjectStore, PortMode, Tree, TreeKind, TreeNode, Type, TypeKind};

/// Which operator families a type supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpClass {
    Integer,
    Real,
    Enum { logical: bool },
    Array { ordered: bool, logical: bool },
    /// Records and access types: equality only.
    Equality,
}

/// Types the operator signatures refer to besides the operand type itself.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OpContext {
    pub boolean: Type,
    pub bit: Type,
    pub integer: Type,
}

const ARITHMETIC: [Builtin; 6] = [
    Builtin::Add,
    Builtin::Sub,
    Builtin::Mul,
    Builtin::Div,
    Builtin::Mod,
    Builtin::Rem,
];

const SIGN: [Builtin; 3] = [Builtin::Neg, Builtin::Identity, Builtin::Abs];

const RELATIONAL: [Builtin; 6] = [
    Builtin::Eq,
    Builtin::Neq,
    Builtin::Lt,
    Builtin::Le,
    Builtin::Gt,
    Builtin::Ge,
];

const LOGICAL: [Builtin; 6] = [
    Builtin::And,
    Builtin::Or,
    Builtin::Xor,
    Builtin::Nand,
    Builtin::Nor,
    Builtin::Xnor,
];

/// Mangled name of a subprogram: `PREFIX.NAME(T1;T2)R`.
pub(crate) fn mangle(prefix: Ident, name: Ident, params: &[String], result: &str) -> Ident {
    Ident::new(&format!(
        "{}.{}({}){}",
        prefix.as_str(),
        name.as_str(),
        params.join(";"),
        result
    ))
}

/// Operator families of `ty`, or `None` for types without predefined
/// operators.
pub(crate) fn op_class(store: &ObjectStore, ty: Type, ctx: &OpContext) -> Option<OpClass> {
    match store.type_kind(ty) {
        TypeKind::Integer => Some(OpClass::Integer),
        TypeKind::Real => Some(OpClass::Real),
        TypeKind::Enum => {
            let base = store.base_type(ty);
            Some(OpClass::Enum {
                logical: base == ctx.boolean || base == ctx.bit,
            })
        }
        TypeKind::Array => {
            let node = store.get_type(store.base_type(ty))?;
            let one_dim = node.index.len() == 1;
            let elem = node.elem.map(|e| (store.base_type(e), store.type_kind(e)));
            let ordered = one_dim
                && elem.is_some_and(|(_, k)| matches!(k, TypeKind::Integer | TypeKind::Enum));
            let logical = one_dim && elem.is_some_and(|(b, _)| b == ctx.boolean || b == ctx.bit);
            Some(OpClass::Array { ordered, logical })
        }
        TypeKind::Record | TypeKind::Access => Some(OpClass::Equality),
        TypeKind::Incomplete | TypeKind::None | TypeKind::Subtype => None,
    }
}

/// Declare the predefined operators of `ty`, allocating through `alloc`.
/// Returns the declarations in a fixed order.
pub(crate) fn declare_operators(
    alloc: &mut dyn FnMut(TreeNode) -> Tree,
    type_name: &dyn Fn(Type) -> String,
    ty: Type,
    class: OpClass,
    ctx: &OpContext,
    prefix: Ident,
    loc: Loc,
) -> Vec<Tree> {
    let mut ops: Vec<(Builtin, Vec<Type>, Type)> = Vec::new();
    let binary = |op| (op, vec![ty, ty], ty);
    match class {
        OpClass::Integer => {
            ops.extend(ARITHMETIC.iter().map(|&op| binary(op)));
            ops.push((Builtin::Exp, vec![ty, ctx.integer], ty));
            ops.extend(SIGN.iter().map(|&op| (op, vec![ty], ty)));
        }
        OpClass::Real => {
            ops.extend(ARITHMETIC[..4].iter().map(|&op| binary(op)));
            ops.push((Builtin::Exp, vec![ty, ctx.integer], ty));
            ops.extend(SIGN.iter().map(|&op| (op, vec![ty], ty)));
        }
        OpClass::Enum { logical } | OpClass::Array { logical, .. } if logical => {
            ops.extend(LOGICAL.iter().map(|&op| binary(op)));
            ops.push((Builtin::Not, vec![ty], ty));
        }
        _ => {}
    }
    let relational: &[Builtin] = match class {
        OpClass::Integer | OpClass::Real | OpClass::Enum { .. } => &RELATIONAL,
        OpClass::Array { ordered: true, .. } => &RELATIONAL,
        OpClass::Array { ordered: false, .. } | OpClass::Equality => &RELATIONAL[..2],
    };
    ops.extend(relational.iter().map(|&op| (op, vec![ty, ty], ctx.boolean)));

    ops.into_iter()
        .map(|(op, params, result)| builtin_decl(alloc, type_name, op, &params, result, prefix, loc))
        .collect()
}

fn builtin_decl(
    alloc: &mut dyn FnMut(TreeNode) -> Tree,
    type_name: &dyn Fn(Type) -> String,
    op: Builtin,
    param_types: &[Type],
    result: Type,
    prefix: Ident,
    loc: Loc,
) -> Tree {
    let names: &[&str] = if param_types.len() == 1 { &["R"] } else { &["L", "R"] };
    let params: Vec<Tree> = param_types
        .iter()
        .zip(names)
        .enumerate()
        .map(|(pos, (&ty, name))| {
            let mut p = TreeNode::new(TreeKind::ParamDecl, loc).with_ident(Ident::new(name));
            p.ty = Some(ty);
            p.mode = Some(PortMode::In);
            p.class = Some(Class::Constant);
            p.position = pos as u32;
            alloc(p)
        })
        .collect();
    let name = operator_name(op.symbol());
    let signature: Vec<String> = param_types.iter().map(|&t| type_name(t)).collect();

    let mut decl = TreeNode::new(TreeKind::FuncDecl, loc).with_ident(name);
    decl.ident2 = Some(mangle(prefix, name, &signature, &type_name(result)));
    decl.ty = Some(result);
    decl.builtin = Some(op);
    decl.params = params;
    alloc(decl)
}
