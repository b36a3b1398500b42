// src/lower/stmt.rs
//
// Declaration and statement lowering - impl Lowerer methods.

use std::sync::Arc;

use hdlc_identity::Loc;
use hdlc_object::{Builtin, Direction, Literal, Tree, TreeKind, Type, TypeKind};

use super::Lowerer;
use crate::errors::{CodegenError, CodegenResult, TrapKind};
use crate::ir::{ArrayValue, Op, Reg, RegTy, Terminator, Value};

/// `SEVERITY_LEVEL'POS(ERROR)`; failed assertions below it have no effect on
/// evaluation.
const SEVERITY_ERROR: u32 = 2;

impl Lowerer<'_> {
    pub(super) fn local_decl(&mut self, decl: Tree) -> CodegenResult<()> {
        let store = self.store;
        let node = store.tree(decl);
        match node.kind {
            TreeKind::VarDecl | TreeKind::ConstDecl => {
                let ty = self.decl_type(decl)?;
                let reg_ty = self.reg_ty_of(ty, node.loc)?;
                let reg = self.new_reg(reg_ty);
                let init = match node.value {
                    Some(value) => self.expr(value)?,
                    None => self.default_value(ty, node.loc)?,
                };
                self.emit(Op::Copy { dst: reg, src: init });
                self.check_subtype(reg, ty, node.loc);
                self.vars.insert(decl, reg);
                Ok(())
            }
            TreeKind::TypeDecl | TreeKind::SubtypeDecl | TreeKind::FuncDecl => Ok(()),
            TreeKind::FuncBody => {
                Err(CodegenError::unsupported("nested subprograms").with_loc(node.loc))
            }
            other => Err(CodegenError::internal_with_context(
                "unexpected declaration in subprogram",
                format!("{other:?}"),
            )
            .with_loc(node.loc)),
        }
    }

    /// Implicit initial value: the left bound of the subtype.
    fn default_value(&mut self, ty: Type, loc: Loc) -> CodegenResult<Reg> {
        let store = self.store;
        match store.type_kind(ty) {
            TypeKind::Integer | TypeKind::Enum => {
                let left = store.discrete_range(ty).map_or(0, |r| r.left);
                Ok(self.constant(Value::Int(left)))
            }
            TypeKind::Real => Ok(self.constant(Value::Real(f64::MIN))),
            TypeKind::Array => {
                let range = store
                    .index_constraint(ty, 0)
                    .and_then(|r| store.static_range(r))
                    .ok_or_else(|| {
                        CodegenError::internal("unconstrained array object").with_loc(loc)
                    })?;
                let elem_ty = store
                    .element_type(ty)
                    .ok_or_else(|| CodegenError::internal("array without element type"))?;
                let elem = match store.type_kind(elem_ty) {
                    TypeKind::Integer | TypeKind::Enum => {
                        Value::Int(store.discrete_range(elem_ty).map_or(0, |r| r.left))
                    }
                    TypeKind::Real => Value::Real(f64::MIN),
                    _ => return Err(CodegenError::unsupported("nested composite types").with_loc(loc)),
                };
                let length = usize::try_from(range.length()).unwrap_or(0);
                Ok(self.constant(Value::Array(Arc::new(ArrayValue {
                    left: range.left,
                    ascending: range.direction == Direction::To,
                    elems: vec![elem; length],
                }))))
            }
            _ => Err(CodegenError::unsupported("default value of composite type").with_loc(loc)),
        }
    }

    fn local_target(&self, target: Tree) -> CodegenResult<Reg> {
        let node = self.store.tree(target);
        node.reference
            .and_then(|decl| self.vars.get(&decl).copied())
            .ok_or_else(|| {
                CodegenError::internal("assignment target is not a local variable").with_loc(node.loc)
            })
    }

    pub(super) fn stmt(&mut self, stmt: Tree) -> CodegenResult<()> {
        let store = self.store;
        let node = store.tree(stmt);
        match node.kind {
            TreeKind::VarAssign => {
                let (Some(target), Some(value)) = (node.target, node.value) else {
                    return Err(CodegenError::internal("malformed assignment").with_loc(node.loc));
                };
                let tnode = store.tree(target);
                match tnode.kind {
                    TreeKind::Ref => {
                        let dst = self.local_target(target)?;
                        let src = self.expr(value)?;
                        if let Some(ty) = tnode.ty {
                            self.check_subtype(src, ty, node.loc);
                        }
                        self.emit(Op::Copy { dst, src });
                    }
                    TreeKind::ArrayRef if tnode.params.len() == 1 => {
                        let prefix = tnode.value.ok_or_else(|| {
                            CodegenError::internal("index without prefix").with_loc(tnode.loc)
                        })?;
                        let array = self.local_target(prefix)?;
                        let index_expr = store.tree(tnode.params[0]).value.ok_or_else(|| {
                            CodegenError::internal("association without actual").with_loc(tnode.loc)
                        })?;
                        let index = self.expr(index_expr)?;
                        let value = self.expr(value)?;
                        if let Some(ty) = tnode.ty {
                            self.check_subtype(value, ty, node.loc);
                        }
                        self.emit(Op::SetIndex {
                            array,
                            index,
                            value,
                            loc: node.loc,
                        });
                    }
                    _ => {
                        return Err(CodegenError::unsupported("assignment target").with_loc(tnode.loc));
                    }
                }
                Ok(())
            }
            TreeKind::If => {
                let cond_expr = node
                    .value
                    .ok_or_else(|| CodegenError::internal("if without condition").with_loc(node.loc))?;
                let cond = self.expr(cond_expr)?;
                let decide = self.current;

                let then = self.new_block();
                self.switch_to(then);
                for &s in &node.stmts {
                    self.stmt(s)?;
                }
                let then_end = self.current;

                let otherwise = if node.else_stmts.is_empty() {
                    None
                } else {
                    let block = self.new_block();
                    self.switch_to(block);
                    for &s in &node.else_stmts {
                        self.stmt(s)?;
                    }
                    Some((block, self.current))
                };

                let merge = self.new_block();
                self.set_term(
                    decide,
                    Terminator::Branch {
                        cond,
                        then,
                        otherwise: otherwise.map_or(merge, |(b, _)| b),
                    },
                );
                self.switch_to(then_end);
                self.terminate(Terminator::Jump(merge));
                if let Some((_, else_end)) = otherwise {
                    self.switch_to(else_end);
                    self.terminate(Terminator::Jump(merge));
                }
                self.switch_to(merge);
                Ok(())
            }
            TreeKind::While => {
                let cond_expr = node
                    .value
                    .ok_or_else(|| CodegenError::internal("loop without condition").with_loc(node.loc))?;
                let header = self.new_block();
                self.terminate(Terminator::Jump(header));
                self.switch_to(header);
                let cond = self.expr(cond_expr)?;
                let decide = self.current;

                let body = self.new_block();
                self.switch_to(body);
                for &s in &node.stmts {
                    self.stmt(s)?;
                }
                self.terminate(Terminator::Jump(header));

                let exit = self.new_block();
                self.set_term(
                    decide,
                    Terminator::Branch {
                        cond,
                        then: body,
                        otherwise: exit,
                    },
                );
                self.switch_to(exit);
                Ok(())
            }
            TreeKind::For => self.for_loop(stmt),
            TreeKind::Return => {
                let value = node.value.ok_or_else(|| {
                    CodegenError::internal("function return without value").with_loc(node.loc)
                })?;
                let reg = self.expr(value)?;
                if let Some(ty) = self.result_type {
                    self.check_subtype(reg, ty, node.loc);
                }
                self.terminate(Terminator::Return(reg));
                Ok(())
            }
            TreeKind::Assert => {
                let severity = node
                    .severity
                    .and_then(|s| store.tree(s).literal)
                    .and_then(Literal::as_int)
                    .unwrap_or(SEVERITY_ERROR as i64);
                if severity < SEVERITY_ERROR as i64 {
                    return Ok(());
                }
                let cond_expr = node
                    .value
                    .ok_or_else(|| CodegenError::internal("assert without condition").with_loc(node.loc))?;
                let cond = self.expr(cond_expr)?;
                let decide = self.current;
                let fail = self.new_block();
                self.switch_to(fail);
                self.terminate(Terminator::Trap {
                    kind: TrapKind::AssertFail,
                    loc: node.loc,
                });
                let ok = self.new_block();
                self.set_term(
                    decide,
                    Terminator::Branch {
                        cond,
                        then: ok,
                        otherwise: fail,
                    },
                );
                self.switch_to(ok);
                Ok(())
            }
            TreeKind::Null => Ok(()),
            other => Err(CodegenError::internal_with_context(
                "statement not allowed in a function",
                format!("{other:?}"),
            )
            .with_loc(node.loc)),
        }
    }

    fn for_loop(&mut self, stmt: Tree) -> CodegenResult<()> {
        let store = self.store;
        let node = store.tree(stmt);
        let (Some(&param), Some(&range)) = (node.decls.first(), node.ranges.first()) else {
            return Err(CodegenError::internal("malformed for loop").with_loc(node.loc));
        };
        let rnode = store.tree(range);
        let (Some(left), Some(right), Some(direction)) = (rnode.left, rnode.right, rnode.direction)
        else {
            return Err(CodegenError::unsupported("loop over a range attribute").with_loc(rnode.loc));
        };
        let step_range = store.tree(param).ty.and_then(|ty| store.int_bounds(ty));

        let left = self.expr(left)?;
        let right = self.expr(right)?;
        let index = self.new_reg(RegTy::Int);
        self.emit(Op::Copy { dst: index, src: left });
        self.vars.insert(param, index);

        let header = self.new_block();
        self.terminate(Terminator::Jump(header));
        self.switch_to(header);
        let in_range = self.new_reg(RegTy::Int);
        self.emit(Op::Cmp {
            dst: in_range,
            op: match direction {
                Direction::To => Builtin::Le,
                Direction::Downto => Builtin::Ge,
            },
            lhs: index,
            rhs: right,
        });
        let header_end = self.current;

        let body = self.new_block();
        self.switch_to(body);
        for &s in &node.stmts {
            self.stmt(s)?;
        }
        let latch = self.new_block();
        self.terminate(Terminator::Jump(latch));
        self.switch_to(latch);
        let done = self.new_reg(RegTy::Int);
        self.emit(Op::Cmp {
            dst: done,
            op: Builtin::Eq,
            lhs: index,
            rhs: right,
        });
        let latch_end = self.current;

        let step = self.new_block();
        self.switch_to(step);
        let one = self.constant(Value::Int(1));
        self.emit(Op::Binary {
            dst: index,
            op: match direction {
                Direction::To => Builtin::Add,
                Direction::Downto => Builtin::Sub,
            },
            lhs: index,
            rhs: one,
            range: step_range,
            loc: node.loc,
        });
        self.terminate(Terminator::Jump(header));

        let exit = self.new_block();
        self.set_term(
            header_end,
            Terminator::Branch {
                cond: in_range,
                then: body,
                otherwise: exit,
            },
        );
        self.set_term(
            latch_end,
            Terminator::Branch {
                cond: done,
                then: exit,
                otherwise: step,
            },
        );
        self.switch_to(exit);
        self.vars.remove(&param);
        Ok(())
    }
}
