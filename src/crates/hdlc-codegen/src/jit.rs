// src/jit.rs
//
// Native tier for hot evaluator functions. Only functions whose integer
// values are provably bounded to 32 bits are compiled, so 64-bit machine
// arithmetic can never overflow before the explicit range checks run and
// native results match the interpreter exactly.

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use hdlc_identity::Loc;
use hdlc_object::Builtin;

use crate::errors::{CodegenError, CodegenResult, TrapKind};
use crate::ir::{self, BlockId, Function, Op, Reg, RegTy, Terminator};

/// `args` points at one i64 per parameter; the result is written to `out`;
/// `fuel` is decremented on every backedge. Returns 0 on success, otherwise
/// one plus the index of the trap site that fired.
type NativeEntry = unsafe extern "C" fn(args: *const i64, out: *mut i64, fuel: *mut i64) -> i32;

/// A compiled function. Valid only while the [`JitContext`] that produced it
/// is alive.
pub struct NativeFunction {
    entry: NativeEntry,
    params: usize,
    traps: Vec<(TrapKind, Loc)>,
}

impl NativeFunction {
    /// Run with integer arguments, consuming fuel from `fuel`.
    pub fn call(&self, args: &[i64], fuel: &mut i64) -> Result<i64, (TrapKind, Loc)> {
        assert_eq!(args.len(), self.params, "INTERNAL: native argument count");
        let mut out = 0i64;
        // SAFETY: the entry point was produced by `JitContext::compile` with the
        // signature above and reads exactly `params` arguments.
        let status = unsafe { (self.entry)(args.as_ptr(), &mut out, fuel) };
        match status {
            0 => Ok(out),
            site => Err(self.traps[site as usize - 1]),
        }
    }
}

// SAFETY: the entry point refers to immutable finalized code.
unsafe impl Send for NativeFunction {}
unsafe impl Sync for NativeFunction {}

const I32_RANGE: (i64, i64) = (i32::MIN as i64, i32::MAX as i64);

fn within_i32((low, high): ir::IntRange) -> bool {
    low >= I32_RANGE.0 && high <= I32_RANGE.1
}

/// Whether `func` can be compiled by [`JitContext::compile`].
pub fn is_eligible(func: &Function) -> bool {
    if func.result != RegTy::Int || func.regs.iter().any(|&t| t != RegTy::Int) {
        return false;
    }
    // Every parameter must be range checked to 32 bits on entry, before any
    // other operation.
    let Some(entry) = func.blocks.first() else {
        return false;
    };
    let entry_checked = func.params.iter().enumerate().all(|(i, &p)| {
        matches!(entry.ops.get(i), Some(Op::RangeCheck { value, low, high, .. })
            if *value == p && within_i32((*low, *high)))
    });
    if !entry_checked {
        return false;
    }
    func.blocks.iter().flat_map(|b| &b.ops).all(|op| match op {
        Op::Const { value, .. } => value
            .as_int()
            .is_some_and(|v| within_i32((v, v))),
        Op::Copy { .. } | Op::Cmp { .. } | Op::RangeCheck { .. } => true,
        Op::Binary { op, range, .. } => *op != Builtin::Exp && range.is_some_and(within_i32),
        Op::Unary { range, .. } => range.is_some_and(within_i32),
        _ => false,
    })
}

pub struct JitContext {
    module: JITModule,
    ctx: codegen::Context,
    builder_ctx: FunctionBuilderContext,
    compiled: u32,
}

impl JitContext {
    /// Create a context for the host ISA.
    pub fn new() -> CodegenResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(CodegenError::cranelift)?;
        flag_builder
            .set("is_pic", "false")
            .map_err(CodegenError::cranelift)?;
        flag_builder
            .set("opt_level", "speed")
            .map_err(CodegenError::cranelift)?;

        let isa_builder = cranelift_native::builder()
            .map_err(|msg| CodegenError::missing_resource("native ISA", msg))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(CodegenError::cranelift)?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        Ok(JitContext {
            module,
            ctx,
            builder_ctx: FunctionBuilderContext::new(),
            compiled: 0,
        })
    }

    /// Number of functions compiled so far.
    pub fn compiled(&self) -> u32 {
        self.compiled
    }

    /// Compile an eligible function to native code.
    pub fn compile(&mut self, func: &Function) -> CodegenResult<NativeFunction> {
        if !is_eligible(func) {
            return Err(CodegenError::unsupported_with_context(
                "native compilation",
                func.name.as_str(),
            ));
        }
        let ptr = self.module.target_config().pointer_type();
        let mut sig = self.module.make_signature();
        for _ in 0..3 {
            sig.params.push(AbiParam::new(ptr));
        }
        sig.returns.push(AbiParam::new(types::I32));

        // Symbol names only need to be unique within the module.
        let symbol = format!("hdlc_eval_{}", self.compiled);
        let func_id = self
            .module
            .declare_function(&symbol, Linkage::Export, &sig)
            .map_err(CodegenError::cranelift)?;

        self.ctx.func.signature = sig;
        let traps = {
            let builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let mut emitter = Emitter {
                builder,
                func,
                vars: Vec::new(),
                blocks: Vec::new(),
                traps: Vec::new(),
                fuel_ptr: None,
            };
            emitter.emit_function();
            emitter.builder.seal_all_blocks();
            emitter.builder.finalize();
            emitter.traps
        };

        let defined = self.module.define_function(func_id, &mut self.ctx);
        self.module.clear_context(&mut self.ctx);
        defined.map_err(CodegenError::cranelift)?;
        self.module
            .finalize_definitions()
            .map_err(CodegenError::cranelift)?;
        let code = self.module.get_finalized_function(func_id);
        self.compiled += 1;
        tracing::debug!(function = %func.name, symbol = %symbol, "compiled to native code");

        // SAFETY: `code` was just finalized from a function with the
        // `NativeEntry` signature.
        let entry = unsafe { std::mem::transmute::<*const u8, NativeEntry>(code) };
        Ok(NativeFunction {
            entry,
            params: func.params.len(),
            traps,
        })
    }
}

struct Emitter<'a, 'f> {
    builder: FunctionBuilder<'a>,
    func: &'f Function,
    vars: Vec<Variable>,
    blocks: Vec<Block>,
    traps: Vec<(TrapKind, Loc)>,
    fuel_ptr: Option<Value>,
}

impl Emitter<'_, '_> {
    fn var(&self, reg: Reg) -> Variable {
        self.vars[reg.0 as usize]
    }

    fn use_reg(&mut self, reg: Reg) -> Value {
        let var = self.var(reg);
        self.builder.use_var(var)
    }

    fn def_reg(&mut self, reg: Reg, value: Value) {
        let var = self.var(reg);
        self.builder.def_var(var, value);
    }

    fn emit_function(&mut self) {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let params = self.builder.block_params(entry).to_vec();
        let (args_ptr, out_ptr, fuel_ptr) = (params[0], params[1], params[2]);
        self.fuel_ptr = Some(fuel_ptr);

        for _ in &self.func.regs {
            let var = self.builder.declare_var(types::I64);
            let zero = self.builder.ins().iconst(types::I64, 0);
            self.builder.def_var(var, zero);
            self.vars.push(var);
        }
        for (i, &param) in self.func.params.iter().enumerate() {
            let arg = self
                .builder
                .ins()
                .load(types::I64, MemFlags::trusted(), args_ptr, (i * 8) as i32);
            self.def_reg(param, arg);
        }

        self.blocks = (0..self.func.blocks.len())
            .map(|_| self.builder.create_block())
            .collect();
        let first = self.blocks[0];
        self.builder.ins().jump(first, &[]);

        for (index, block) in self.func.blocks.iter().enumerate() {
            let id = BlockId(index as u32);
            self.builder.switch_to_block(self.blocks[index]);
            for op in &block.ops {
                self.op(op);
            }
            self.terminator(id, &block.term, out_ptr);
        }
    }

    /// Return a trap code when `cond` is set and continue in a fresh block.
    fn trap_if(&mut self, cond: Value, kind: TrapKind, loc: Loc) {
        self.traps.push((kind, loc));
        let code = self.traps.len() as i64;
        let trap_block = self.builder.create_block();
        let cont = self.builder.create_block();
        self.builder.ins().brif(cond, trap_block, &[], cont, &[]);
        self.builder.switch_to_block(trap_block);
        let status = self.builder.ins().iconst(types::I32, code);
        self.builder.ins().return_(&[status]);
        self.builder.switch_to_block(cont);
    }

    fn check_range(&mut self, value: Value, (low, high): ir::IntRange, kind: TrapKind, loc: Loc) {
        let below = self.builder.ins().icmp_imm(IntCC::SignedLessThan, value, low);
        let above = self.builder.ins().icmp_imm(IntCC::SignedGreaterThan, value, high);
        let out = self.builder.ins().bor(below, above);
        self.trap_if(out, kind, loc);
    }

    fn truth(&mut self, value: Value) -> Value {
        self.builder.ins().icmp_imm(IntCC::NotEqual, value, 0)
    }

    fn widen(&mut self, flag: Value) -> Value {
        self.builder.ins().uextend(types::I64, flag)
    }

    fn op(&mut self, op: &Op) {
        match op {
            Op::Const { dst, value } => {
                let v = value.as_int().unwrap_or(0);
                let c = self.builder.ins().iconst(types::I64, v);
                self.def_reg(*dst, c);
            }
            Op::Copy { dst, src } => {
                let v = self.use_reg(*src);
                self.def_reg(*dst, v);
            }
            Op::RangeCheck {
                value,
                low,
                high,
                loc,
            } => {
                let v = self.use_reg(*value);
                self.check_range(v, (*low, *high), TrapKind::RangeFail, *loc);
            }
            Op::Cmp { dst, op, lhs, rhs } => {
                let (a, b) = (self.use_reg(*lhs), self.use_reg(*rhs));
                let cc = match op {
                    Builtin::Eq => IntCC::Equal,
                    Builtin::Neq => IntCC::NotEqual,
                    Builtin::Lt => IntCC::SignedLessThan,
                    Builtin::Le => IntCC::SignedLessThanOrEqual,
                    Builtin::Gt => IntCC::SignedGreaterThan,
                    _ => IntCC::SignedGreaterThanOrEqual,
                };
                let flag = self.builder.ins().icmp(cc, a, b);
                let v = self.widen(flag);
                self.def_reg(*dst, v);
            }
            Op::Unary {
                dst,
                op,
                src,
                range,
                loc,
            } => {
                let a = self.use_reg(*src);
                let v = match op {
                    Builtin::Neg => self.builder.ins().ineg(a),
                    Builtin::Abs => self.builder.ins().iabs(a),
                    Builtin::Not => {
                        let flag = self.builder.ins().icmp_imm(IntCC::Equal, a, 0);
                        self.widen(flag)
                    }
                    _ => a,
                };
                if let Some(range) = range {
                    self.check_range(v, *range, TrapKind::Overflow, *loc);
                }
                self.def_reg(*dst, v);
            }
            Op::Binary {
                dst,
                op,
                lhs,
                rhs,
                range,
                loc,
            } => {
                let (a, b) = (self.use_reg(*lhs), self.use_reg(*rhs));
                let v = self.binary(*op, a, b, *loc);
                if let Some(range) = range {
                    self.check_range(v, *range, TrapKind::Overflow, *loc);
                }
                self.def_reg(*dst, v);
            }
            other => panic!("INTERNAL: {:?} passed the native eligibility check", other),
        }
    }

    fn binary(&mut self, op: Builtin, a: Value, b: Value, loc: Loc) -> Value {
        match op {
            Builtin::Add => self.builder.ins().iadd(a, b),
            Builtin::Sub => self.builder.ins().isub(a, b),
            Builtin::Mul => self.builder.ins().imul(a, b),
            Builtin::Div | Builtin::Rem | Builtin::Mod => {
                let zero = self.builder.ins().icmp_imm(IntCC::Equal, b, 0);
                self.trap_if(zero, TrapKind::DivZero, loc);
                match op {
                    Builtin::Div => self.builder.ins().sdiv(a, b),
                    Builtin::Rem => self.builder.ins().srem(a, b),
                    _ => {
                        // Result takes the sign of the divisor.
                        let r = self.builder.ins().srem(a, b);
                        let signs = self.builder.ins().bxor(r, b);
                        let differ = self.builder.ins().icmp_imm(IntCC::SignedLessThan, signs, 0);
                        let nonzero = self.builder.ins().icmp_imm(IntCC::NotEqual, r, 0);
                        let adjust = self.builder.ins().band(differ, nonzero);
                        let shifted = self.builder.ins().iadd(r, b);
                        self.builder.ins().select(adjust, shifted, r)
                    }
                }
            }
            Builtin::And | Builtin::Or | Builtin::Xor | Builtin::Nand | Builtin::Nor | Builtin::Xnor => {
                let (x, y) = (self.truth(a), self.truth(b));
                let flag = match op {
                    Builtin::And | Builtin::Nand => self.builder.ins().band(x, y),
                    Builtin::Or | Builtin::Nor => self.builder.ins().bor(x, y),
                    _ => self.builder.ins().bxor(x, y),
                };
                let flag = if matches!(op, Builtin::Nand | Builtin::Nor | Builtin::Xnor) {
                    self.builder.ins().icmp_imm(IntCC::Equal, flag, 0)
                } else {
                    flag
                };
                self.widen(flag)
            }
            other => panic!("INTERNAL: {:?} passed the native eligibility check", other),
        }
    }

    /// Consume one unit of fuel, trapping when none is left.
    fn step(&mut self) {
        let Some(fuel_ptr) = self.fuel_ptr else {
            return;
        };
        let fuel = self
            .builder
            .ins()
            .load(types::I64, MemFlags::trusted(), fuel_ptr, 0);
        let empty = self
            .builder
            .ins()
            .icmp_imm(IntCC::SignedLessThanOrEqual, fuel, 0);
        self.trap_if(empty, TrapKind::StepLimit, self.func.loc);
        let left = self.builder.ins().iadd_imm(fuel, -1);
        self.builder
            .ins()
            .store(MemFlags::trusted(), left, fuel_ptr, 0);
    }

    /// Target block for the edge `from -> to`. Backedges go through a
    /// landing block that consumes fuel; it is queued in `landings` and filled
    /// once the current block is terminated.
    fn edge(&mut self, from: BlockId, to: BlockId, landings: &mut Vec<(Block, Block)>) -> Block {
        let target = self.blocks[to.index()];
        if !Function::is_backedge(from, to) {
            return target;
        }
        let landing = self.builder.create_block();
        landings.push((landing, target));
        landing
    }

    fn terminator(&mut self, id: BlockId, term: &Terminator, out_ptr: Value) {
        let mut landings = Vec::new();
        match term {
            Terminator::Jump(to) => {
                let target = self.edge(id, *to, &mut landings);
                self.builder.ins().jump(target, &[]);
            }
            Terminator::Branch {
                cond,
                then,
                otherwise,
            } => {
                let c = self.use_reg(*cond);
                let flag = self.truth(c);
                let then = self.edge(id, *then, &mut landings);
                let otherwise = self.edge(id, *otherwise, &mut landings);
                self.builder.ins().brif(flag, then, &[], otherwise, &[]);
            }
            Terminator::Return(reg) => {
                let v = self.use_reg(*reg);
                self.builder.ins().store(MemFlags::trusted(), v, out_ptr, 0);
                let ok = self.builder.ins().iconst(types::I32, 0);
                self.builder.ins().return_(&[ok]);
            }
            Terminator::Trap { kind, loc } => {
                self.traps.push((*kind, *loc));
                let code = self.builder.ins().iconst(types::I32, self.traps.len() as i64);
                self.builder.ins().return_(&[code]);
            }
        }
        for (landing, target) in landings {
            self.builder.switch_to_block(landing);
            self.step();
            self.builder.ins().jump(target, &[]);
        }
    }
}
