// tree.rs
//! Syntax tree nodes.
//!
//! Every node has the same shape: a [`TreeKind`] tag plus a fixed set of
//! optional slots. Which slots a kind may use is given by [`TreeKind::has`],
//! and [`TreeNode::validate`] rejects nodes that set anything else. Passes
//! match exhaustively on the kind.

use std::fmt;

use hdlc_identity::{Ident, Loc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::arena::{ObjectId, Tree, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeKind {
    // Design units
    Entity,
    Architecture,
    Package,
    PackageBody,
    // Context clause
    Library,
    Use,
    // Declarations
    GenericDecl,
    PortDecl,
    ConstDecl,
    SignalDecl,
    VarDecl,
    TypeDecl,
    SubtypeDecl,
    EnumLit,
    FieldDecl,
    FuncDecl,
    FuncBody,
    ParamDecl,
    // Subtype indications and type definitions
    TypeMark,
    RangeDef,
    EnumDef,
    ArrayDef,
    RecordDef,
    AccessDef,
    // Concurrent statements
    Process,
    Instance,
    CondAssign,
    // Sequential statements
    VarAssign,
    SignalAssign,
    If,
    While,
    For,
    Return,
    Assert,
    Wait,
    Null,
    // Expressions
    Literal,
    Ref,
    FCall,
    ArrayRef,
    RecordRef,
    AttrRef,
    Aggregate,
    Range,
    Param,
}

/// A slot of [`TreeNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attr {
    Ident,
    Ident2,
    Ident3,
    Type,
    Value,
    Target,
    Reference,
    Mark,
    Left,
    Right,
    Message,
    Severity,
    Literal,
    Mode,
    Class,
    Builtin,
    AttrKind,
    Assoc,
    Direction,
    Decls,
    Stmts,
    ElseStmts,
    Generics,
    Ports,
    Params,
    GenMaps,
    PortMaps,
    Context,
    Triggers,
    Ranges,
}

impl TreeKind {
    /// Whether nodes of this kind may carry `attr`.
    pub fn has(self, attr: Attr) -> bool {
        use Attr as A;
        use TreeKind as K;
        match self {
            K::Entity => matches!(
                attr,
                A::Ident | A::Generics | A::Ports | A::Decls | A::Stmts | A::Context
            ),
            // ident = architecture, ident2 = entity
            K::Architecture => matches!(
                attr,
                A::Ident | A::Ident2 | A::Decls | A::Stmts | A::Context | A::Reference
            ),
            K::Package => matches!(attr, A::Ident | A::Decls | A::Context),
            K::PackageBody => matches!(attr, A::Ident | A::Decls | A::Context | A::Reference),
            K::Library => matches!(attr, A::Ident),
            // ident = selected name (`WORK.PKG.all` stored as `WORK.PKG`)
            K::Use => matches!(attr, A::Ident | A::Reference),
            K::GenericDecl => {
                matches!(attr, A::Ident | A::Type | A::Mark | A::Value | A::Class)
            }
            K::PortDecl => matches!(attr, A::Ident | A::Type | A::Mark | A::Value | A::Mode),
            K::ConstDecl | K::SignalDecl | K::VarDecl => {
                matches!(attr, A::Ident | A::Type | A::Mark | A::Value)
            }
            // value = definition (absent for an incomplete declaration)
            K::TypeDecl => matches!(attr, A::Ident | A::Type | A::Value),
            K::SubtypeDecl => matches!(attr, A::Ident | A::Type | A::Mark),
            K::EnumLit => matches!(attr, A::Ident | A::Type),
            K::FieldDecl => matches!(attr, A::Ident | A::Type | A::Mark),
            // ident2 = mangled name, set during checking
            K::FuncDecl => matches!(
                attr,
                A::Ident | A::Ident2 | A::Type | A::Mark | A::Params | A::Builtin
            ),
            K::FuncBody => matches!(
                attr,
                A::Ident | A::Ident2 | A::Type | A::Mark | A::Params | A::Decls | A::Stmts
            ),
            K::ParamDecl => {
                matches!(attr, A::Ident | A::Type | A::Mark | A::Value | A::Mode | A::Class)
            }
            K::TypeMark => matches!(attr, A::Ident | A::Type | A::Reference | A::Ranges),
            K::RangeDef => matches!(attr, A::Ranges),
            K::EnumDef => matches!(attr, A::Decls),
            // ranges = index constraint; params = index subtype marks when
            // unconstrained; mark = element subtype
            K::ArrayDef => matches!(attr, A::Ranges | A::Params | A::Mark),
            K::RecordDef => matches!(attr, A::Decls),
            K::AccessDef => matches!(attr, A::Mark),
            K::Process => matches!(attr, A::Ident | A::Decls | A::Stmts | A::Triggers),
            // ident = label, ident2 = entity, ident3 = architecture
            K::Instance => matches!(
                attr,
                A::Ident | A::Ident2 | A::Ident3 | A::Reference | A::GenMaps | A::PortMaps
            ),
            K::CondAssign => matches!(attr, A::Ident | A::Target | A::Value),
            K::VarAssign | K::SignalAssign => matches!(attr, A::Ident | A::Target | A::Value),
            K::If => matches!(attr, A::Ident | A::Value | A::Stmts | A::ElseStmts),
            K::While => matches!(attr, A::Ident | A::Value | A::Stmts),
            // decls[0] = implicit loop parameter
            K::For => matches!(attr, A::Ident | A::Ranges | A::Decls | A::Stmts),
            K::Return => matches!(attr, A::Ident | A::Value),
            K::Assert => matches!(attr, A::Ident | A::Value | A::Message | A::Severity),
            K::Wait => matches!(attr, A::Ident | A::Triggers | A::Value),
            K::Null => matches!(attr, A::Ident),
            K::Literal => matches!(attr, A::Type | A::Literal),
            K::Ref => matches!(attr, A::Ident | A::Type | A::Reference),
            K::FCall => matches!(attr, A::Ident | A::Type | A::Reference | A::Params),
            // value = prefix
            K::ArrayRef => matches!(attr, A::Type | A::Value | A::Params),
            K::RecordRef => matches!(attr, A::Ident | A::Type | A::Value | A::Reference),
            K::AttrRef => matches!(attr, A::Type | A::Value | A::AttrKind),
            K::Aggregate => matches!(attr, A::Type | A::Params),
            K::Range => matches!(attr, A::Type | A::Left | A::Right | A::Direction),
            // ident = formal name for named association
            K::Param => matches!(attr, A::Ident | A::Value | A::Assoc),
        }
    }

    pub fn is_design_unit(self) -> bool {
        matches!(
            self,
            TreeKind::Entity | TreeKind::Architecture | TreeKind::Package | TreeKind::PackageBody
        )
    }

    pub fn is_decl(self) -> bool {
        matches!(
            self,
            TreeKind::GenericDecl
                | TreeKind::PortDecl
                | TreeKind::ConstDecl
                | TreeKind::SignalDecl
                | TreeKind::VarDecl
                | TreeKind::TypeDecl
                | TreeKind::SubtypeDecl
                | TreeKind::EnumLit
                | TreeKind::FieldDecl
                | TreeKind::FuncDecl
                | TreeKind::FuncBody
                | TreeKind::ParamDecl
        )
    }

    pub fn is_expr(self) -> bool {
        matches!(
            self,
            TreeKind::Literal
                | TreeKind::Ref
                | TreeKind::FCall
                | TreeKind::ArrayRef
                | TreeKind::RecordRef
                | TreeKind::AttrRef
                | TreeKind::Aggregate
        )
    }
}

/// Literal value of a [`TreeKind::Literal`] node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Real(f64),
    /// Position of an enumeration literal within its type.
    Enum(u32),
}

impl Literal {
    /// Integer view of discrete literals.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Literal::Int(v) => Some(v),
            Literal::Enum(pos) => Some(pos as i64),
            Literal::Real(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Real(v) => write!(f, "{v:?}"),
            Literal::Enum(pos) => write!(f, "{pos}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortMode {
    In,
    Out,
    InOut,
    Buffer,
}

/// Object class of a parameter or generic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    Constant,
    Signal,
    Variable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    To,
    Downto,
}

/// Predefined attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Left,
    Right,
    Low,
    High,
    Length,
    Ascending,
}

impl AttrKind {
    pub fn from_name(name: &str) -> Option<AttrKind> {
        match name.to_ascii_uppercase().as_str() {
            "LEFT" => Some(AttrKind::Left),
            "RIGHT" => Some(AttrKind::Right),
            "LOW" => Some(AttrKind::Low),
            "HIGH" => Some(AttrKind::High),
            "LENGTH" => Some(AttrKind::Length),
            "ASCENDING" => Some(AttrKind::Ascending),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssocKind {
    Positional,
    Named,
    Others,
}

/// Predefined operators, attached to the builtin declarations of
/// `STD.STANDARD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Rem,
    Exp,
    Neg,
    Identity,
    Abs,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
    Not,
}

impl Builtin {
    pub fn symbol(self) -> &'static str {
        match self {
            Builtin::Add | Builtin::Identity => "+",
            Builtin::Sub | Builtin::Neg => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::Mod => "mod",
            Builtin::Rem => "rem",
            Builtin::Exp => "**",
            Builtin::Abs => "abs",
            Builtin::Eq => "=",
            Builtin::Neq => "/=",
            Builtin::Lt => "<",
            Builtin::Le => "<=",
            Builtin::Gt => ">",
            Builtin::Ge => ">=",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Xor => "xor",
            Builtin::Nand => "nand",
            Builtin::Nor => "nor",
            Builtin::Xnor => "xnor",
            Builtin::Not => "not",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Builtin::Neg | Builtin::Identity | Builtin::Abs | Builtin::Not
        )
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Builtin::Eq | Builtin::Neq | Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Builtin::And
                | Builtin::Or
                | Builtin::Xor
                | Builtin::Nand
                | Builtin::Nor
                | Builtin::Xnor
                | Builtin::Not
        )
    }
}

/// Per-node flag bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags(u32);

impl Flags {
    pub const IMPURE: Flags = Flags(1 << 0);
    /// Loop parameter declared implicitly by a `for` statement.
    pub const LOOP_PARAM: Flags = Flags(1 << 1);
    /// Constant declared without a value in a package.
    pub const DEFERRED: Flags = Flags(1 << 2);
    /// Function declaration has a body.
    pub const HAS_BODY: Flags = Flags(1 << 3);
    /// Node was produced by constant folding.
    pub const FOLDED: Flags = Flags(1 << 4);
    /// Statically determined in-bounds by the bounds checker.
    pub const BOUNDS_OK: Flags = Flags(1 << 5);
    /// Literal substituted for a generic during elaboration.
    pub const ELAB_GENERIC: Flags = Flags(1 << 6);
    /// Static evaluation of this expression trapped; folding skips it.
    pub const NO_FOLD: Flags = Flags(1 << 7);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#x})", self.0)
    }
}

pub type TreeList = Vec<Tree>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub kind: TreeKind,
    pub loc: Loc,
    pub ident: Option<Ident>,
    pub ident2: Option<Ident>,
    pub ident3: Option<Ident>,
    pub ty: Option<Type>,
    pub value: Option<Tree>,
    pub target: Option<Tree>,
    /// Non-owning edge to the declaration a name resolved to.
    pub reference: Option<Tree>,
    pub mark: Option<Tree>,
    pub left: Option<Tree>,
    pub right: Option<Tree>,
    pub message: Option<Tree>,
    pub severity: Option<Tree>,
    pub literal: Option<Literal>,
    pub mode: Option<PortMode>,
    pub class: Option<Class>,
    pub builtin: Option<Builtin>,
    pub attr: Option<AttrKind>,
    pub assoc: Option<AssocKind>,
    pub direction: Option<Direction>,
    /// Declaration order within the parent list, or enumeration position.
    pub position: u32,
    pub flags: Flags,
    pub decls: TreeList,
    pub stmts: TreeList,
    pub else_stmts: TreeList,
    pub generics: TreeList,
    pub ports: TreeList,
    pub params: TreeList,
    pub genmaps: TreeList,
    pub portmaps: TreeList,
    pub context: TreeList,
    pub triggers: TreeList,
    pub ranges: SmallVec<[Tree; 2]>,
}

/// A slot that is set but not allowed for the node's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAttr {
    pub kind: TreeKind,
    pub attr: Attr,
}

impl TreeNode {
    pub fn new(kind: TreeKind, loc: Loc) -> TreeNode {
        TreeNode {
            kind,
            loc,
            ident: None,
            ident2: None,
            ident3: None,
            ty: None,
            value: None,
            target: None,
            reference: None,
            mark: None,
            left: None,
            right: None,
            message: None,
            severity: None,
            literal: None,
            mode: None,
            class: None,
            builtin: None,
            attr: None,
            assoc: None,
            direction: None,
            position: 0,
            flags: Flags::empty(),
            decls: Vec::new(),
            stmts: Vec::new(),
            else_stmts: Vec::new(),
            generics: Vec::new(),
            ports: Vec::new(),
            params: Vec::new(),
            genmaps: Vec::new(),
            portmaps: Vec::new(),
            context: Vec::new(),
            triggers: Vec::new(),
            ranges: SmallVec::new(),
        }
    }

    pub fn with_ident(mut self, ident: Ident) -> TreeNode {
        self.ident = Some(ident);
        self
    }

    /// The node's identifier. Panics when the slot is empty; use `ident`
    /// directly for kinds where it is optional.
    pub fn name(&self) -> Ident {
        match self.ident {
            Some(ident) => ident,
            None => panic!("INTERNAL: {:?} node at {} has no identifier", self.kind, self.loc),
        }
    }

    /// Check that only slots allowed by the kind are populated.
    pub fn validate(&self) -> Result<(), InvalidAttr> {
        let set = [
            (Attr::Ident, self.ident.is_some()),
            (Attr::Ident2, self.ident2.is_some()),
            (Attr::Ident3, self.ident3.is_some()),
            (Attr::Type, self.ty.is_some()),
            (Attr::Value, self.value.is_some()),
            (Attr::Target, self.target.is_some()),
            (Attr::Reference, self.reference.is_some()),
            (Attr::Mark, self.mark.is_some()),
            (Attr::Left, self.left.is_some()),
            (Attr::Right, self.right.is_some()),
            (Attr::Message, self.message.is_some()),
            (Attr::Severity, self.severity.is_some()),
            (Attr::Literal, self.literal.is_some()),
            (Attr::Mode, self.mode.is_some()),
            (Attr::Class, self.class.is_some()),
            (Attr::Builtin, self.builtin.is_some()),
            (Attr::AttrKind, self.attr.is_some()),
            (Attr::Assoc, self.assoc.is_some()),
            (Attr::Direction, self.direction.is_some()),
            (Attr::Decls, !self.decls.is_empty()),
            (Attr::Stmts, !self.stmts.is_empty()),
            (Attr::ElseStmts, !self.else_stmts.is_empty()),
            (Attr::Generics, !self.generics.is_empty()),
            (Attr::Ports, !self.ports.is_empty()),
            (Attr::Params, !self.params.is_empty()),
            (Attr::GenMaps, !self.genmaps.is_empty()),
            (Attr::PortMaps, !self.portmaps.is_empty()),
            (Attr::Context, !self.context.is_empty()),
            (Attr::Triggers, !self.triggers.is_empty()),
            (Attr::Ranges, !self.ranges.is_empty()),
        ];
        match set
            .into_iter()
            .find(|&(attr, present)| present && !self.kind.has(attr))
        {
            Some((attr, _)) => Err(InvalidAttr {
                kind: self.kind,
                attr,
            }),
            None => Ok(()),
        }
    }

    /// Visit the sub-trees this node owns, in source order. The `reference`
    /// edge and the type are not owned and are skipped.
    pub fn for_each_child(&self, mut f: impl FnMut(Tree)) {
        let singles = [
            self.target,
            self.mark,
            self.left,
            self.right,
            self.value,
            self.message,
            self.severity,
        ];
        for child in self.context.iter().copied() {
            f(child);
        }
        for child in self.generics.iter().chain(&self.ports).copied() {
            f(child);
        }
        for child in self.ranges.iter().copied() {
            f(child);
        }
        for child in singles.into_iter().flatten() {
            f(child);
        }
        for list in [
            &self.params,
            &self.genmaps,
            &self.portmaps,
            &self.triggers,
            &self.decls,
            &self.stmts,
            &self.else_stmts,
        ] {
            for child in list.iter().copied() {
                f(child);
            }
        }
    }

    /// Replace every owned sub-tree through `f`.
    pub fn map_children(&mut self, mut f: impl FnMut(Tree) -> Tree) {
        for slot in [
            &mut self.target,
            &mut self.mark,
            &mut self.left,
            &mut self.right,
            &mut self.value,
            &mut self.message,
            &mut self.severity,
        ] {
            if let Some(child) = slot {
                *child = f(*child);
            }
        }
        for child in self.ranges.iter_mut() {
            *child = f(*child);
        }
        for list in [
            &mut self.context,
            &mut self.generics,
            &mut self.ports,
            &mut self.params,
            &mut self.genmaps,
            &mut self.portmaps,
            &mut self.triggers,
            &mut self.decls,
            &mut self.stmts,
            &mut self.else_stmts,
        ] {
            for child in list.iter_mut() {
                *child = f(*child);
            }
        }
    }

    /// Visit every object handle, owned or not.
    pub(crate) fn visit_handles_mut(&mut self, f: &mut dyn FnMut(&mut ObjectId)) {
        if let Some(ty) = &mut self.ty {
            f(&mut ty.0);
        }
        if let Some(reference) = &mut self.reference {
            f(&mut reference.0);
        }
        self.map_children(|mut child| {
            f(&mut child.0);
            child
        });
    }
}
