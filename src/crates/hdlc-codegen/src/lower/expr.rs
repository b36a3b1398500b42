// src/lower/expr.rs
//
// Expression lowering - impl Lowerer methods.

use hdlc_object::{AssocKind, AttrKind, Builtin, Direction, Literal, Tree, TreeKind, TypeKind};

use super::Lowerer;
use crate::errors::{CodegenError, CodegenResult};
use crate::ir::{BoundKind, Op, Reg, RegTy, Terminator, Value};

impl Lowerer<'_> {
    /// Lower an expression into a fresh or existing register.
    pub(super) fn expr(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        match node.kind {
            TreeKind::Literal => {
                let value = match node.literal {
                    Some(Literal::Int(v)) => Value::Int(v),
                    Some(Literal::Enum(pos)) => Value::Int(pos as i64),
                    Some(Literal::Real(v)) => Value::Real(v),
                    None => {
                        return Err(CodegenError::internal("literal without value").with_loc(node.loc));
                    }
                };
                Ok(self.constant(value))
            }
            TreeKind::Ref => self.reference(expr),
            TreeKind::FCall => self.call(expr),
            TreeKind::ArrayRef => self.index(expr),
            TreeKind::AttrRef => self.attribute(expr),
            TreeKind::Aggregate => self.aggregate(expr),
            TreeKind::RecordRef => {
                Err(CodegenError::unsupported("record values").with_loc(node.loc))
            }
            other => Err(CodegenError::internal_with_context(
                "not an expression",
                format!("{other:?}"),
            )
            .with_loc(node.loc)),
        }
    }

    pub(super) fn constant(&mut self, value: Value) -> Reg {
        let dst = self.new_reg(value.ty());
        self.emit(Op::Const { dst, value });
        dst
    }

    fn reference(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let decl = node.reference.ok_or_else(|| {
            CodegenError::internal_with_context("unresolved name", node.name().as_str())
                .with_loc(node.loc)
        })?;
        if let Some(&reg) = self.vars.get(&decl) {
            return Ok(reg);
        }
        let dnode = store.tree(decl);
        match dnode.kind {
            TreeKind::EnumLit => Ok(self.constant(Value::Int(dnode.position as i64))),
            TreeKind::ConstDecl => {
                let Some(value) = dnode.value else {
                    return Err(CodegenError::unsupported_with_context(
                        "deferred constant",
                        dnode.name().as_str(),
                    )
                    .with_loc(node.loc));
                };
                if self.inlining.contains(&decl) {
                    return Err(CodegenError::internal_with_context(
                        "constant defined in terms of itself",
                        dnode.name().as_str(),
                    )
                    .with_loc(node.loc));
                }
                self.inlining.push(decl);
                let reg = self.expr(value);
                self.inlining.pop();
                let reg = reg?;
                if let Some(ty) = dnode.ty {
                    self.check_subtype(reg, ty, dnode.loc);
                }
                Ok(reg)
            }
            TreeKind::GenericDecl => Err(CodegenError::unsupported_with_context(
                "generic before elaboration",
                dnode.name().as_str(),
            )
            .with_loc(node.loc)),
            TreeKind::SignalDecl | TreeKind::PortDecl => Err(CodegenError::unsupported_with_context(
                "signal in constant expression",
                dnode.name().as_str(),
            )
            .with_loc(node.loc)),
            other => Err(CodegenError::internal_with_context(
                "reference to unexpected declaration",
                format!("{other:?}"),
            )
            .with_loc(node.loc)),
        }
    }

    fn arguments(&mut self, call: Tree) -> CodegenResult<Vec<Reg>> {
        let store = self.store;
        store
            .tree(call)
            .params
            .iter()
            .map(|&p| {
                let pnode = store.tree(p);
                let value = pnode.value.ok_or_else(|| {
                    CodegenError::internal("association without actual").with_loc(pnode.loc)
                })?;
                self.expr(value)
            })
            .collect()
    }

    fn call(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let decl = node.reference.ok_or_else(|| {
            CodegenError::internal_with_context("unresolved call", node.name().as_str())
                .with_loc(node.loc)
        })?;
        let dnode = store.tree(decl);
        let ty = node
            .ty
            .ok_or_else(|| CodegenError::internal("call has no type").with_loc(node.loc))?;
        let result = self.reg_ty_of(ty, node.loc)?;

        let Some(op) = dnode.builtin else {
            let func = dnode.ident2.ok_or_else(|| {
                CodegenError::internal_with_context("callee was not mangled", dnode.name().as_str())
                    .with_loc(node.loc)
            })?;
            let args = self.arguments(expr)?;
            if args.len() != dnode.params.len() {
                return Err(CodegenError::arg_count(
                    func.as_str(),
                    dnode.params.len(),
                    args.len(),
                )
                .with_loc(node.loc));
            }
            let dst = self.new_reg(result);
            self.emit(Op::Call {
                dst,
                func,
                args,
                loc: node.loc,
            });
            return Ok(dst);
        };

        if matches!(op, Builtin::And | Builtin::Or) && result == RegTy::Int {
            return self.short_circuit(expr, op);
        }

        let range = match result {
            RegTy::Int => store.int_bounds(ty),
            _ => None,
        };
        let args = self.arguments(expr)?;
        let dst = self.new_reg(result);
        match (op.is_unary(), args.as_slice()) {
            (true, &[src]) => self.emit(Op::Unary {
                dst,
                op,
                src,
                range,
                loc: node.loc,
            }),
            (false, &[lhs, rhs]) if op.is_relational() => self.emit(Op::Cmp { dst, op, lhs, rhs }),
            (false, &[lhs, rhs]) => self.emit(Op::Binary {
                dst,
                op,
                lhs,
                rhs,
                range,
                loc: node.loc,
            }),
            _ => {
                return Err(CodegenError::arg_count(
                    op.symbol(),
                    if op.is_unary() { 1 } else { 2 },
                    args.len(),
                )
                .with_loc(node.loc));
            }
        }
        Ok(dst)
    }

    /// `and`/`or` on scalars evaluate the right operand only when needed.
    fn short_circuit(&mut self, expr: Tree, op: Builtin) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let [lhs, rhs] = node.params.as_slice() else {
            return Err(CodegenError::arg_count(op.symbol(), 2, node.params.len()).with_loc(node.loc));
        };
        let operand = |p: Tree| {
            store.tree(p).value.ok_or_else(|| {
                CodegenError::internal("association without actual").with_loc(node.loc)
            })
        };
        let (lhs, rhs) = (operand(*lhs)?, operand(*rhs)?);

        let dst = self.new_reg(RegTy::Int);
        let l = self.expr(lhs)?;
        self.emit(Op::Copy { dst, src: l });
        let decide = self.current;

        let right = self.new_block();
        self.switch_to(right);
        let r = self.expr(rhs)?;
        self.emit(Op::Copy { dst, src: r });
        let right_end = self.current;

        let merge = self.new_block();
        self.set_term(
            decide,
            match op {
                Builtin::And => Terminator::Branch {
                    cond: l,
                    then: right,
                    otherwise: merge,
                },
                _ => Terminator::Branch {
                    cond: l,
                    then: merge,
                    otherwise: right,
                },
            },
        );
        self.switch_to(right_end);
        self.terminate(Terminator::Jump(merge));
        self.switch_to(merge);
        Ok(dst)
    }

    fn index(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let prefix = node
            .value
            .ok_or_else(|| CodegenError::internal("index without prefix").with_loc(node.loc))?;
        if node.params.len() != 1 {
            return Err(CodegenError::unsupported("multi-dimensional arrays").with_loc(node.loc));
        }
        let ty = node
            .ty
            .ok_or_else(|| CodegenError::internal("index has no type").with_loc(node.loc))?;
        let elem = self.reg_ty_of(ty, node.loc)?;
        let array = self.expr(prefix)?;
        let index = self.arguments(expr)?[0];
        let dst = self.new_reg(elem);
        self.emit(Op::Index {
            dst,
            array,
            index,
            loc: node.loc,
        });
        Ok(dst)
    }

    fn attribute(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let (Some(prefix), Some(attr)) = (node.value, node.attr) else {
            return Err(CodegenError::internal("malformed attribute").with_loc(node.loc));
        };
        let pnode = store.tree(prefix);
        let pty = pnode
            .ty
            .ok_or_else(|| CodegenError::internal("attribute prefix has no type").with_loc(node.loc))?;
        let names_type = pnode
            .reference
            .map(|d| matches!(store.tree(d).kind, TreeKind::TypeDecl | TreeKind::SubtypeDecl))
            .unwrap_or(false);

        // Attributes of a type, or of an array object whose bounds are static.
        let range = if store.type_kind(pty) == TypeKind::Array {
            store
                .index_constraint(pty, 0)
                .and_then(|r| store.static_range(r))
        } else if names_type {
            store.discrete_range(pty)
        } else {
            None
        };
        if let Some(r) = range {
            let value = match attr {
                AttrKind::Left => r.left,
                AttrKind::Right => r.right,
                AttrKind::Low => r.low(),
                AttrKind::High => r.high(),
                AttrKind::Length => r.length(),
                AttrKind::Ascending => (r.direction == Direction::To) as i64,
            };
            return Ok(self.constant(Value::Int(value)));
        }
        if store.type_kind(pty) != TypeKind::Array || names_type {
            return Err(CodegenError::unsupported_with_context(
                "non-static attribute",
                format!("{attr:?}"),
            )
            .with_loc(node.loc));
        }

        let array = self.expr(prefix)?;
        let dst = self.new_reg(RegTy::Int);
        let which = match attr {
            AttrKind::Length => {
                self.emit(Op::Length { dst, array });
                return Ok(dst);
            }
            AttrKind::Left => BoundKind::Left,
            AttrKind::Right => BoundKind::Right,
            AttrKind::Low => BoundKind::Low,
            AttrKind::High => BoundKind::High,
            AttrKind::Ascending => BoundKind::Ascending,
        };
        self.emit(Op::Bound { dst, array, which });
        Ok(dst)
    }

    fn aggregate(&mut self, expr: Tree) -> CodegenResult<Reg> {
        let store = self.store;
        let node = store.tree(expr);
        let ty = node
            .ty
            .ok_or_else(|| CodegenError::internal("aggregate has no type").with_loc(node.loc))?;
        if store.type_kind(ty) != TypeKind::Array {
            return Err(CodegenError::unsupported("record aggregates").with_loc(node.loc));
        }
        let constraint = store
            .index_constraint(ty, 0)
            .and_then(|r| store.static_range(r));

        let mut elems = Vec::new();
        let mut others = None;
        for &assoc in &node.params {
            let anode = store.tree(assoc);
            let value = anode.value.ok_or_else(|| {
                CodegenError::internal("association without actual").with_loc(anode.loc)
            })?;
            match anode.assoc {
                Some(AssocKind::Positional) | None => elems.push(self.expr(value)?),
                Some(AssocKind::Others) => others = Some((self.expr(value)?, anode.loc)),
                Some(AssocKind::Named) => {
                    return Err(CodegenError::unsupported("named array aggregates").with_loc(anode.loc));
                }
            }
        }

        let (left, ascending) = match constraint {
            Some(r) => (r.left, r.direction == Direction::To),
            None => {
                let index = store.index_type(ty, 0);
                let left = index
                    .and_then(|t| store.discrete_range(t))
                    .map_or(0, |r| r.left);
                (left, true)
            }
        };
        if let Some((fill, loc)) = others {
            let Some(r) = constraint else {
                return Err(CodegenError::internal("others choice without constraint").with_loc(loc));
            };
            let length = usize::try_from(r.length()).unwrap_or(0);
            while elems.len() < length {
                elems.push(fill);
            }
        }

        let dst = self.new_reg(RegTy::Array);
        self.emit(Op::Aggregate {
            dst,
            elems,
            left,
            ascending,
        });
        if let Some(r) = constraint {
            self.emit(Op::LengthCheck {
                array: dst,
                length: usize::try_from(r.length()).unwrap_or(0),
                loc: node.loc,
            });
        }
        Ok(dst)
    }
}
