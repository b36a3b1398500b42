// src/lower.rs
//
// Translation of analysed trees into lowered IR. The `Lowerer` context holds
// the function under construction; expression and statement lowering live in
// `lower/expr.rs` and `lower/stmt.rs` as `impl Lowerer` blocks.

mod expr;
mod stmt;

use std::sync::Arc;

use hdlc_identity::{Ident, Loc};
use hdlc_object::{ObjectStore, Tree, TreeKind, Type, TypeKind};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{CodegenError, CodegenResult, TrapKind};
use crate::ir::{Block, BlockId, Function, LoweredUnit, Op, Reg, RegTy, Terminator, UnitKey};

/// Lower every subprogram body of an analysed package or package body.
#[tracing::instrument(skip(store))]
pub fn lower_unit(store: &ObjectStore, unit: Tree) -> CodegenResult<LoweredUnit> {
    let node = store.try_tree(unit).map_err(|e| {
        CodegenError::internal_with_context("lowering a unit that is not loaded", e.to_string())
    })?;
    if !matches!(node.kind, TreeKind::Package | TreeKind::PackageBody) {
        return Err(CodegenError::unsupported_with_context(
            "lowering of design unit",
            format!("{:?}", node.kind),
        )
        .with_loc(node.loc));
    }
    let arena = store
        .arena(unit.arena())
        .ok_or_else(|| CodegenError::internal("unit arena missing from store"))?;
    let name = arena.name().unwrap_or_else(|| node.name());
    let key = UnitKey {
        name,
        generation: arena.generation(),
    };

    let mut functions = Vec::new();
    for &decl in &node.decls {
        if store.tree(decl).kind == TreeKind::FuncBody {
            functions.push(Arc::new(lower_function(store, decl)?));
        }
    }
    tracing::debug!(unit = %name, functions = functions.len(), "unit lowered");
    Ok(LoweredUnit {
        name,
        key,
        functions,
    })
}

/// Lower one function body.
pub fn lower_function(store: &ObjectStore, body: Tree) -> CodegenResult<Function> {
    let node = store.tree(body);
    let name = node.ident2.ok_or_else(|| {
        CodegenError::internal_with_context("function body was not mangled", node.name().as_str())
            .with_loc(node.loc)
    })?;
    let result_ty = node
        .ty
        .ok_or_else(|| CodegenError::internal("function body has no type").with_loc(node.loc))?;

    let mut lw = Lowerer::new(store, name, node.loc);
    lw.result_type = Some(result_ty);
    let result = lw.reg_ty_of(result_ty, node.loc)?;

    for &param in &node.params {
        let pnode = store.tree(param);
        let ty = lw.decl_type(param)?;
        let reg_ty = lw.reg_ty_of(ty, pnode.loc)?;
        let reg = lw.new_reg(reg_ty);
        lw.params.push(reg);
        lw.vars.insert(param, reg);
        if let Some((low, high)) = store.int_bounds(ty) {
            lw.emit(Op::RangeCheck {
                value: reg,
                low,
                high,
                loc: pnode.loc,
            });
        }
    }
    for &decl in &node.decls {
        lw.local_decl(decl)?;
    }
    for &stmt in &node.stmts {
        lw.stmt(stmt)?;
    }
    lw.terminate(Terminator::Trap {
        kind: TrapKind::Unreachable,
        loc: node.loc,
    });
    Ok(lw.finish(result))
}

/// Lower a standalone constant expression into a parameterless function.
pub fn lower_thunk(store: &ObjectStore, expr: Tree, name: Ident) -> CodegenResult<Function> {
    let node = store.tree(expr);
    let ty = node.ty.ok_or_else(|| {
        CodegenError::internal("expression has no type").with_loc(node.loc)
    })?;
    let mut lw = Lowerer::new(store, name, node.loc);
    let result = lw.reg_ty_of(ty, node.loc)?;
    let value = lw.expr(expr)?;
    lw.check_subtype(value, ty, node.loc);
    lw.terminate(Terminator::Return(value));
    Ok(lw.finish(result))
}

struct PendingBlock {
    ops: Vec<Op>,
    term: Option<Terminator>,
}

pub(crate) struct Lowerer<'s> {
    store: &'s ObjectStore,
    name: Ident,
    loc: Loc,
    params: Vec<Reg>,
    regs: Vec<RegTy>,
    blocks: Vec<PendingBlock>,
    current: BlockId,
    /// Register holding each local object (parameters, variables, constants,
    /// loop parameters).
    vars: FxHashMap<Tree, Reg>,
    /// Package constants currently being inlined.
    inlining: SmallVec<[Tree; 4]>,
    result_type: Option<Type>,
}

impl<'s> Lowerer<'s> {
    fn new(store: &'s ObjectStore, name: Ident, loc: Loc) -> Self {
        Lowerer {
            store,
            name,
            loc,
            params: Vec::new(),
            regs: Vec::new(),
            blocks: vec![PendingBlock {
                ops: Vec::new(),
                term: None,
            }],
            current: BlockId(0),
            vars: FxHashMap::default(),
            inlining: SmallVec::new(),
            result_type: None,
        }
    }

    fn finish(self, result: RegTy) -> Function {
        let blocks = self
            .blocks
            .into_iter()
            .map(|b| Block {
                ops: b.ops,
                term: b.term.unwrap_or(Terminator::Trap {
                    kind: TrapKind::Unreachable,
                    loc: self.loc,
                }),
            })
            .collect();
        Function {
            name: self.name,
            params: self.params,
            result,
            regs: self.regs,
            blocks,
            loc: self.loc,
        }
    }

    fn new_reg(&mut self, ty: RegTy) -> Reg {
        self.regs.push(ty);
        Reg(self.regs.len() as u32 - 1)
    }

    fn new_block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock {
            ops: Vec::new(),
            term: None,
        });
        BlockId(self.blocks.len() as u32 - 1)
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn is_terminated(&self) -> bool {
        self.blocks[self.current.index()].term.is_some()
    }

    /// Append an op to the current block. Code following a terminator goes
    /// into a fresh unreachable block.
    fn emit(&mut self, op: Op) {
        if self.is_terminated() {
            let dead = self.new_block();
            self.switch_to(dead);
        }
        self.blocks[self.current.index()].ops.push(op);
    }

    fn terminate(&mut self, term: Terminator) {
        if self.is_terminated() {
            return;
        }
        self.blocks[self.current.index()].term = Some(term);
    }

    fn set_term(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block.index()].term = Some(term);
    }

    fn decl_type(&self, decl: Tree) -> CodegenResult<Type> {
        let node = self.store.tree(decl);
        node.ty.ok_or_else(|| {
            CodegenError::internal_with_context("declaration has no type", node.name().as_str())
                .with_loc(node.loc)
        })
    }

    fn reg_ty_of(&self, ty: Type, loc: Loc) -> CodegenResult<RegTy> {
        match self.store.type_kind(ty) {
            TypeKind::Integer | TypeKind::Enum => Ok(RegTy::Int),
            TypeKind::Real => Ok(RegTy::Real),
            TypeKind::Array => Ok(RegTy::Array),
            TypeKind::Incomplete => {
                Err(CodegenError::internal("lowering an incomplete type").with_loc(loc))
            }
            other => Err(
                CodegenError::unsupported_with_context("values of type class", format!("{other:?}"))
                    .with_loc(loc),
            ),
        }
    }

    /// Range check `value` against the static bounds of a discrete subtype.
    fn check_subtype(&mut self, value: Reg, ty: Type, loc: Loc) {
        if self.regs[value.0 as usize] != RegTy::Int {
            return;
        }
        if let Some((low, high)) = self.store.int_bounds(ty) {
            self.emit(Op::RangeCheck {
                value,
                low,
                high,
                loc,
            });
        }
    }
}

#[cfg(test)]
mod tests;
