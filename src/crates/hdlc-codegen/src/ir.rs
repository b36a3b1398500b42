// src/ir.rs
//! Register-based lowered IR.
//!
//! A [`LoweredUnit`] holds the functions of one analysed unit. Each
//! [`Function`] is a list of basic blocks over typed virtual registers. Any
//! jump to a block whose index is not greater than the current one is a
//! backedge; backedges and calls are the only operations that consume
//! evaluator fuel.

use std::fmt;
use std::sync::Arc;

use hdlc_identity::{Ident, Loc};
use hdlc_object::Builtin;

use crate::errors::TrapKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegTy {
    /// Integers, enumeration positions and booleans.
    Int,
    Real,
    Array,
}

/// Array value with its index range.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayValue {
    pub left: i64,
    pub ascending: bool,
    pub elems: Vec<Value>,
}

impl ArrayValue {
    /// Position of `index` in `elems`, if within bounds.
    pub fn offset(&self, index: i64) -> Option<usize> {
        let offset = if self.ascending {
            index.checked_sub(self.left)?
        } else {
            self.left.checked_sub(index)?
        };
        usize::try_from(offset)
            .ok()
            .filter(|&off| off < self.elems.len())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Array(Arc<ArrayValue>),
}

impl Value {
    pub fn bool(b: bool) -> Value {
        Value::Int(b as i64)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn ty(&self) -> RegTy {
        match self {
            Value::Int(_) => RegTy::Int,
            Value::Real(_) => RegTy::Real,
            Value::Array(_) => RegTy::Array,
        }
    }

    pub(crate) fn zero(ty: RegTy) -> Value {
        match ty {
            RegTy::Int => Value::Int(0),
            RegTy::Real => Value::Real(0.0),
            RegTy::Array => Value::Array(Arc::new(ArrayValue {
                left: 0,
                ascending: true,
                elems: Vec::new(),
            })),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v:?}"),
            Value::Array(a) => {
                f.write_str("(")?;
                for (i, elem) in a.elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Inclusive integer bounds an arithmetic result must fall in.
pub type IntRange = (i64, i64);

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Const {
        dst: Reg,
        value: Value,
    },
    Copy {
        dst: Reg,
        src: Reg,
    },
    /// Arithmetic or logical operator. Integer results outside `range` trap
    /// with [`TrapKind::Overflow`].
    Binary {
        dst: Reg,
        op: Builtin,
        lhs: Reg,
        rhs: Reg,
        range: Option<IntRange>,
        loc: Loc,
    },
    Unary {
        dst: Reg,
        op: Builtin,
        src: Reg,
        range: Option<IntRange>,
        loc: Loc,
    },
    /// Relational operator producing 0 or 1.
    Cmp {
        dst: Reg,
        op: Builtin,
        lhs: Reg,
        rhs: Reg,
    },
    /// Subtype conversion check.
    RangeCheck {
        value: Reg,
        low: i64,
        high: i64,
        loc: Loc,
    },
    Index {
        dst: Reg,
        array: Reg,
        index: Reg,
        loc: Loc,
    },
    /// In-place element update of an array register.
    SetIndex {
        array: Reg,
        index: Reg,
        value: Reg,
        loc: Loc,
    },
    Length {
        dst: Reg,
        array: Reg,
    },
    /// Array attribute read: left, right, low or high bound.
    Bound {
        dst: Reg,
        array: Reg,
        which: BoundKind,
    },
    Aggregate {
        dst: Reg,
        elems: Vec<Reg>,
        left: i64,
        ascending: bool,
    },
    /// Check that an array has `length` elements.
    LengthCheck {
        array: Reg,
        length: usize,
        loc: Loc,
    },
    Call {
        dst: Reg,
        func: Ident,
        args: Vec<Reg>,
        loc: Loc,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundKind {
    Left,
    Right,
    Low,
    High,
    Ascending,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Reg,
        then: BlockId,
        otherwise: BlockId,
    },
    Return(Reg),
    Trap {
        kind: TrapKind,
        loc: Loc,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub ops: Vec<Op>,
    pub term: Terminator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    /// Mangled name, unique across loaded units.
    pub name: Ident,
    pub params: Vec<Reg>,
    pub result: RegTy,
    /// Type of every register, indexed by [`Reg`].
    pub regs: Vec<RegTy>,
    pub blocks: Vec<Block>,
    pub loc: Loc,
}

impl Function {
    pub fn reg_ty(&self, reg: Reg) -> RegTy {
        self.regs[reg.0 as usize]
    }

    /// Whether the edge `from -> to` closes a loop.
    pub fn is_backedge(from: BlockId, to: BlockId) -> bool {
        to <= from
    }

    /// Functions called by this one.
    pub fn callees(&self) -> impl Iterator<Item = Ident> + '_ {
        self.blocks
            .iter()
            .flat_map(|b| b.ops.iter())
            .filter_map(|op| match op {
                Op::Call { func, .. } => Some(*func),
                _ => None,
            })
    }
}

/// Identity of the unit a lowered unit was produced from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub name: Ident,
    pub generation: u32,
}

#[derive(Clone, Debug)]
pub struct LoweredUnit {
    pub name: Ident,
    pub key: UnitKey,
    pub functions: Vec<Arc<Function>>,
}

impl LoweredUnit {
    pub fn function(&self, name: Ident) -> Option<&Arc<Function>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "r{}: {:?}", p.0, self.reg_ty(*p))?;
        }
        writeln!(f, ") -> {:?}", self.result)?;
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "  b{i}:")?;
            for op in &block.ops {
                writeln!(f, "    {op:?}")?;
            }
            writeln!(f, "    {:?}", block.term)?;
        }
        Ok(())
    }
}
