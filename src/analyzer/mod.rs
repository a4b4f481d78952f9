//! Analyzer (C3): resolves every `DeclRef`, assigns a `ValueSlot` to each
//! instruction and materializes the types the Builder only described as
//! type-resolver thunks (spec §4.3, §6).
//!
//! The Builder never resolves a name, so every instruction reaches this
//! pass with `analyzed: false`. Analysis runs as a work queue seeded with
//! every instruction in construction order: most instructions only need
//! their direct operands, which were built (and therefore queued) earlier,
//! so they fall out in one pass. An instruction that names something not
//! yet analyzed — a forward-referenced global, a struct still being typed —
//! parks itself in a table keyed by *that* instruction's id and is woken up
//! again once the id it's waiting on finishes (spec §6 "Scope entries").

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ast::BinOp;
use crate::error::{suggest_similar, CompileError, DiagnosticSink};
use crate::types::{select_cast_op, TypeArena, TypeId, TypeKind};

use crate::mir::{
    AddrMode, AddrMode2, ArgPassingMode, Argument, ConstData, ConstValue, Flags, InstId, InstKind,
    MemberRef, Mir, Scalar, ValueSlot,
};

/// `Err` carries the `InstId` this instruction is still waiting on.
type AResult<T> = Result<T, InstId>;

pub fn analyze(mir: &mut Mir, global_scope: &HashMap<String, InstId>, sink: &mut dyn DiagnosticSink) {
    let mut a = Analyzer {
        mir,
        global_scope,
        sink,
        waiting: HashMap::new(),
    };
    a.run();
    check_missing_returns(a.mir, a.sink);
    #[cfg(feature = "llvm")]
    materialize_llvm_types(a.mir);
}

struct Analyzer<'m> {
    mir: &'m mut Mir,
    global_scope: &'m HashMap<String, InstId>,
    sink: &'m mut dyn DiagnosticSink,
    waiting: HashMap<InstId, Vec<InstId>>,
}

impl<'m> Analyzer<'m> {
    fn run(&mut self) {
        let mut queue: VecDeque<InstId> = self.mir.instrs.ids().collect();
        while let Some(id) = queue.pop_front() {
            if self.mir.instrs[id].analyzed {
                continue;
            }
            let outcome = stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.analyze_one(id));
            match outcome {
                Ok(()) => {
                    if let Some(woken) = self.waiting.remove(&id) {
                        queue.extend(woken);
                    }
                }
                Err(blocking_on) => {
                    self.waiting.entry(blocking_on).or_default().push(id);
                }
            }
        }

        // Anything still parked is a genuine cycle (or a name that resolved
        // to something which itself never converged); give it a poison slot
        // rather than hang so the rest of the module is still usable.
        let stuck: Vec<InstId> = self.waiting.values().flatten().copied().collect();
        for id in stuck {
            if !self.mir.instrs[id].analyzed {
                self.mir.instrs.get_mut(id).value = ValueSlotDefault::void(self.mir);
                self.mir.instrs.get_mut(id).analyzed = true;
            }
        }
        self.waiting.clear();
    }

    fn require(&self, dep: InstId) -> AResult<()> {
        if self.mir.instrs[dep].analyzed {
            Ok(())
        } else {
            Err(dep)
        }
    }

    fn value_of(&self, id: InstId) -> ValueSlot {
        self.mir.instrs[id].value.clone()
    }

    fn finish(&mut self, id: InstId, value: ValueSlot) {
        self.mir.instrs.get_mut(id).value = value;
        self.mir.instrs.get_mut(id).analyzed = true;
    }

    fn type_value_slot(&self, t: TypeId) -> ValueSlot {
        let tot = self.mir.types.type_of_types;
        ValueSlot {
            ty: Some(tot),
            const_value: Some(ConstValue::scalar(tot, Scalar::Type(t))),
            comptime: true,
            addr_mode: AddrMode2(AddrMode::RValue),
        }
    }

    fn type_name(&self, ty: TypeId) -> String {
        let t = self.mir.types.get(ty);
        if let Some(n) = &t.name {
            return n.clone();
        }
        match &t.kind {
            TypeKind::Void => "void".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int { bits, signed } => format!("{}{bits}", if *signed { "s" } else { "u" }),
            TypeKind::Real { bits } => format!("f{bits}"),
            TypeKind::Pointer { pointee } => format!("*{}", self.type_name(*pointee)),
            TypeKind::Array { elem, len } => format!("[{len}]{}", self.type_name(*elem)),
            TypeKind::Slice { elem } => format!("[]{}", self.type_name(*elem)),
            TypeKind::Fn { .. } => "fn".to_string(),
            TypeKind::Struct(_) => "struct".to_string(),
            TypeKind::Enum(_) => "enum".to_string(),
            TypeKind::String => "string".to_string(),
            TypeKind::VArgs => "vargs".to_string(),
            TypeKind::Null => "null".to_string(),
            TypeKind::TypeOfTypes => "type".to_string(),
        }
    }

    /// Implicit conversion rules (spec §4.3 "Implicit cast rules"): same-
    /// signedness integer widening, integer-to-real, null-to-pointer, and
    /// pointee-compatible pointer conversions.
    fn implicit_castable(&self, from: TypeId, to: TypeId) -> bool {
        if self.mir.types.type_cmp(from, to) {
            return true;
        }
        match (&self.mir.types.get(from).kind, &self.mir.types.get(to).kind) {
            (TypeKind::Int { bits: fb, signed: fs }, TypeKind::Int { bits: tb, signed: ts }) => {
                fs == ts && fb <= tb
            }
            (TypeKind::Int { .. }, TypeKind::Real { .. }) => true,
            (TypeKind::Null, TypeKind::Pointer { .. }) => true,
            (TypeKind::Pointer { pointee: p1 }, TypeKind::Pointer { pointee: p2 }) => {
                self.mir.types.type_cmp(*p1, *p2)
            }
            _ => false,
        }
    }

    fn check_assignable(&mut self, from: TypeId, to: TypeId, span: crate::ast::Span) {
        if !self.mir.types.type_cmp(from, to) && !self.implicit_castable(from, to) {
            self.sink.error(CompileError::TypeMismatch {
                from: self.type_name(from),
                to: self.type_name(to),
                span,
            });
        }
    }

    /// Resolves `name` as seen from `from`: first the global table, then a
    /// backward scan over the owning function's locals for the nearest
    /// preceding declaration (spec §6 "Scope entries"). `None` means the
    /// name doesn't exist anywhere visible.
    fn lookup_decl(&self, name: &str, from: InstId) -> Option<InstId> {
        if let Some(&g) = self.global_scope.get(name) {
            return Some(g);
        }
        let owner_block = self.mir.instrs[from].owner_block;
        let func = self.mir.blocks[owner_block].owner_fn?;
        let from_idx = from.index();
        let mut best: Option<InstId> = None;
        for &var in &self.mir.funcs[func].locals {
            let v = &self.mir.vars[var];
            if v.name.as_deref() == Some(name) && v.decl_inst.index() < from_idx {
                let better = best.map(|b| b.index() < v.decl_inst.index()).unwrap_or(true);
                if better {
                    best = Some(v.decl_inst);
                }
            }
        }
        best
    }

    /// Constant-folds a binary op over two already-analyzed, comptime
    /// operands (spec §4.4 "comptime fast path"), with wrapping two's
    /// complement arithmetic for integers.
    fn fold_binop(&self, op: BinOp, lhs: InstId, rhs: InstId, ty: TypeId) -> Option<ConstValue> {
        let a = self.value_of(lhs).const_value?;
        let b = self.value_of(rhs).const_value?;
        if self.mir.types.is_real(ty) || op.is_comparison() && self.mir.types.is_real(self.value_of(lhs).ty?) {
            let (x, y) = (a.as_real()?, b.as_real()?);
            return Some(if op.is_comparison() {
                let r = match op {
                    BinOp::Eq => x == y,
                    BinOp::Ne => x != y,
                    BinOp::Lt => x < y,
                    BinOp::Gt => x > y,
                    BinOp::Le => x <= y,
                    BinOp::Ge => x >= y,
                    _ => return None,
                };
                ConstValue::scalar(self.mir.types.bool_, Scalar::Bool(r))
            } else {
                let r = match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div => x / y,
                    _ => return None,
                };
                ConstValue::scalar(ty, Scalar::Real(r))
            });
        }
        let (x, y) = (a.as_int()?, b.as_int()?);
        if op.is_comparison() {
            let r = match op {
                BinOp::Eq => x == y,
                BinOp::Ne => x != y,
                BinOp::Lt => x < y,
                BinOp::Gt => x > y,
                BinOp::Le => x <= y,
                BinOp::Ge => x >= y,
                _ => unreachable!(),
            };
            return Some(ConstValue::scalar(self.mir.types.bool_, Scalar::Bool(r)));
        }
        let r = match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div => {
                if y == 0 {
                    0
                } else {
                    x.wrapping_div(y)
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    0
                } else {
                    x.wrapping_rem(y)
                }
            }
            BinOp::BitAnd => x & y,
            BinOp::BitOr => x | y,
            BinOp::BitXor => x ^ y,
            BinOp::Shl => x.wrapping_shl(y as u32),
            BinOp::Shr => x.wrapping_shr(y as u32),
            BinOp::LAnd | BinOp::LOr => return None,
            _ => return None,
        };
        Some(ConstValue::scalar(ty, Scalar::Int(r)))
    }

    fn analyze_one(&mut self, id: InstId) -> AResult<()> {
        let span = self.mir.instrs[id].span;
        let kind = self.mir.instrs[id].kind.clone();
        match kind {
            InstKind::Block
            | InstKind::DeclMember { .. }
            | InstKind::DeclVariant { .. }
            | InstKind::Arg { .. } => {
                self.finish(id, ValueSlot::default());
                Ok(())
            }

            InstKind::DeclRef { name } => {
                match self.lookup_decl(&name, id) {
                    None => {
                        let suggestion =
                            suggest_similar(&name, self.global_scope.keys().map(|s| s.as_str()));
                        self.sink.error(CompileError::UnknownSymbol {
                            name: name.clone(),
                            span,
                            suggestion,
                        });
                        self.finish(id, ValueSlotDefault::void(self.mir));
                        Ok(())
                    }
                    Some(target) => {
                        self.require(target)?;
                        let val = self.value_of(target);
                        self.mir.instrs.get_mut(id).kind = InstKind::DeclDirectRef { target };
                        self.finish(id, val);
                        Ok(())
                    }
                }
            }

            InstKind::DeclDirectRef { target } => {
                self.require(target)?;
                let val = self.value_of(target);
                self.finish(id, val);
                Ok(())
            }

            InstKind::FnProto {
                func,
                ret_ty_thunk,
                param_ty_thunks,
            } => {
                if let Some(rt) = ret_ty_thunk {
                    self.require(rt)?;
                }
                for &pt in &param_ty_thunks {
                    self.require(pt)?;
                }
                let ret_ty = match ret_ty_thunk {
                    Some(rt) => self.value_of(rt).as_type_or_void(self.mir),
                    None => self.mir.types.type_of_types,
                };
                let arg_tys: Vec<TypeId> = param_ty_thunks
                    .iter()
                    .map(|&pt| self.value_of(pt).as_type_or_void(self.mir))
                    .collect();
                let is_vargs = self.mir.funcs[func].is_vargs;
                let fn_ty = self.mir.types.intern_fn(arg_tys.clone(), ret_ty, is_vargs);
                self.mir.funcs.get_mut(func).ty = fn_ty;

                let locals = self.mir.funcs[func].locals.clone();
                let mut args = Vec::with_capacity(arg_tys.len());
                for (i, &ty) in arg_tys.iter().enumerate() {
                    if let Some(&var) = locals.get(i) {
                        self.mir.vars.get_mut(var).ty = ty;
                    }
                    let name = locals
                        .get(i)
                        .and_then(|&v| self.mir.vars[v].name.clone())
                        .unwrap_or_default();
                    args.push(Argument {
                        name,
                        ty,
                        index: i,
                        llvm_arg_index: i,
                        passing_mode: ArgPassingMode::Direct,
                    });
                }
                self.mir.funcs.get_mut(func).args = args;

                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(fn_ty),
                        const_value: Some(ConstValue::scalar(fn_ty, Scalar::Func(func))),
                        comptime: true,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::DeclArg { var, ty_thunk, .. } => {
                self.require(ty_thunk)?;
                let ty = self.value_of(ty_thunk).as_type_or_void(self.mir);
                self.mir.vars.get_mut(var).ty = ty;
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::LValue),
                    },
                );
                Ok(())
            }

            InstKind::DeclVar { var, type_thunk, init } => {
                if let Some(tt) = type_thunk {
                    self.require(tt)?;
                }
                if let Some(i) = init {
                    self.require(i)?;
                }
                let declared_ty = type_thunk.map(|tt| self.value_of(tt).as_type_or_void(self.mir));
                let init_ty = init.map(|i| self.value_of(i).ty.unwrap_or(self.mir.types.void));
                let ty = match (declared_ty, init_ty) {
                    (Some(dt), Some(it)) => {
                        self.check_assignable(it, dt, span);
                        dt
                    }
                    (Some(dt), None) => dt,
                    (None, Some(it)) => it,
                    (None, None) => self.mir.types.void,
                };
                self.mir.vars.get_mut(var).ty = ty;
                let init_slot = init.map(|i| self.value_of(i));
                let comptime = init_slot.as_ref().map(|s| s.comptime).unwrap_or(false);
                let const_value = if comptime {
                    init_slot.and_then(|s| s.const_value)
                } else {
                    None
                };
                if self.mir.vars[var].is_global {
                    self.mir.vars.get_mut(var).global_value = const_value.clone();
                }
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value,
                        comptime,
                        addr_mode: AddrMode2(AddrMode::LValue),
                    },
                );
                Ok(())
            }

            InstKind::Const { value } => {
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(value.ty),
                        comptime: value.comptime,
                        addr_mode: AddrMode2(value.addr_mode),
                        const_value: Some(value),
                    },
                );
                Ok(())
            }

            InstKind::Compound { ty_thunk, fields } => {
                self.require(ty_thunk)?;
                for (_, f) in &fields {
                    self.require(*f)?;
                }
                let ty = self.value_of(ty_thunk).as_type_or_void(self.mir);
                let all_comptime = fields.iter().all(|(_, f)| self.value_of(*f).comptime);
                let const_value = if all_comptime {
                    let mut parts = Vec::with_capacity(fields.len());
                    for (_, f) in &fields {
                        let slot = self.value_of(*f);
                        parts.push(slot.const_value.unwrap_or_else(|| ConstValue {
                            ty: slot.ty.unwrap_or(self.mir.types.void),
                            data: ConstData::ZeroInit,
                            addr_mode: AddrMode::RValue,
                            comptime: true,
                        }));
                    }
                    Some(ConstValue {
                        ty,
                        data: ConstData::Struct(parts),
                        addr_mode: AddrMode::RValue,
                        comptime: true,
                    })
                } else {
                    None
                };
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value,
                        comptime: all_comptime,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::VArgs { values } => {
                for &v in &values {
                    self.require(v)?;
                }
                let ty = self.mir.types.intern_vargs();
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Load { ptr } => {
                self.require(ptr)?;
                let ptr_ty = self.value_of(ptr).ty.unwrap_or(self.mir.types.void);
                let pointee = match &self.mir.types.get(ptr_ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => self.mir.types.void,
                };
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(pointee),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Store { value, ptr } => {
                self.require(value)?;
                self.require(ptr)?;
                let ptr_ty = self.value_of(ptr).ty.unwrap_or(self.mir.types.void);
                let pointee = match &self.mir.types.get(ptr_ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => self.mir.types.void,
                };
                let value_ty = self.value_of(value).ty.unwrap_or(self.mir.types.void);
                self.check_assignable(value_ty, pointee, span);
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }

            InstKind::AddrOf { target } => {
                self.require(target)?;
                let target_ty = self.value_of(target).ty.unwrap_or(self.mir.types.void);
                let ptr_ty = self.mir.types.intern_pointer(target_ty);
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ptr_ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::ElemPtr { base, index } => {
                self.require(base)?;
                self.require(index)?;
                let base_ty = self.value_of(base).ty.unwrap_or(self.mir.types.void);
                let elem_ty = match &self.mir.types.get(base_ty).kind {
                    TypeKind::Pointer { pointee } => match &self.mir.types.get(*pointee).kind {
                        TypeKind::Array { elem, .. } | TypeKind::Slice { elem } => *elem,
                        _ => *pointee,
                    },
                    _ => self.mir.types.void,
                };
                let ptr_ty = self.mir.types.intern_pointer(elem_ty);
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ptr_ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::MemberPtr { base, member } => {
                self.require(base)?;
                let base_ty = self.value_of(base).ty.unwrap_or(self.mir.types.void);
                let pointee = match &self.mir.types.get(base_ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => self.mir.types.void,
                };
                let member_ty = match &member {
                    MemberRef::Named(name) => match self.mir.types.member(pointee, name) {
                        Some(m) => m.ty,
                        None => {
                            let suggestion = suggest_similar(
                                name,
                                self.mir
                                    .types
                                    .struct_body_or(pointee)
                                    .iter()
                                    .map(|m| m.name.as_str()),
                            );
                            self.sink.error(CompileError::UnknownSymbol {
                                name: name.clone(),
                                span,
                                suggestion,
                            });
                            self.mir.types.void
                        }
                    },
                    MemberRef::ArrayLen => *self.mir.types.builtins.get("usize").unwrap(),
                    MemberRef::ArrayPtr => {
                        let elem = match &self.mir.types.get(pointee).kind {
                            TypeKind::Array { elem, .. } | TypeKind::Slice { elem } => *elem,
                            _ => self.mir.types.void,
                        };
                        self.mir.types.intern_pointer(elem)
                    }
                };
                let ptr_ty = self.mir.types.intern_pointer(member_ty);
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ptr_ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Binop { op, lhs, rhs } => {
                self.require(lhs)?;
                self.require(rhs)?;
                let lt = self.value_of(lhs).ty.unwrap_or(self.mir.types.void);
                let rt = self.value_of(rhs).ty.unwrap_or(self.mir.types.void);
                let result_ty = if op.is_comparison() {
                    self.mir.types.bool_
                } else if self.mir.types.type_cmp(lt, rt) {
                    lt
                } else if self.implicit_castable(lt, rt) {
                    rt
                } else if self.implicit_castable(rt, lt) {
                    lt
                } else {
                    self.sink.error(CompileError::TypeMismatch {
                        from: self.type_name(lt),
                        to: self.type_name(rt),
                        span,
                    });
                    lt
                };
                let comptime = self.value_of(lhs).comptime && self.value_of(rhs).comptime;
                let const_value = if comptime {
                    self.fold_binop(op, lhs, rhs, result_ty)
                } else {
                    None
                };
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(result_ty),
                        const_value,
                        comptime,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Unop { op, operand } => {
                self.require(operand)?;
                let slot = self.value_of(operand);
                let ty = if matches!(op, crate::ast::UnOp::Not) {
                    self.mir.types.bool_
                } else {
                    slot.ty.unwrap_or(self.mir.types.void)
                };
                let const_value = if slot.comptime {
                    slot.const_value.as_ref().and_then(|c| match op {
                        crate::ast::UnOp::Neg => {
                            if self.mir.types.is_real(ty) {
                                c.as_real().map(|v| ConstValue::scalar(ty, Scalar::Real(-v)))
                            } else {
                                c.as_int().map(|v| ConstValue::scalar(ty, Scalar::Int(v.wrapping_neg())))
                            }
                        }
                        crate::ast::UnOp::Not => c.as_bool().map(|v| ConstValue::scalar(ty, Scalar::Bool(!v))),
                        crate::ast::UnOp::BitNot => c.as_int().map(|v| ConstValue::scalar(ty, Scalar::Int(!v))),
                    })
                } else {
                    None
                };
                let comptime = const_value.is_some();
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value,
                        comptime,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Cast {
                operand,
                target_ty_thunk,
                ..
            } => {
                self.require(operand)?;
                self.require(target_ty_thunk)?;
                let target_ty = self.value_of(target_ty_thunk).as_type_or_void(self.mir);
                let src_ty = self.value_of(operand).ty.unwrap_or(self.mir.types.void);
                let selected = select_cast_op(&self.mir.types, src_ty, target_ty);
                match selected {
                    None => {
                        self.sink.error(CompileError::InvalidCast {
                            from: self.type_name(src_ty),
                            to: self.type_name(target_ty),
                            span,
                        });
                    }
                    Some(op) => {
                        if let InstKind::Cast { op: slot, .. } = &mut self.mir.instrs.get_mut(id).kind {
                            *slot = Some(op);
                        }
                    }
                }
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(target_ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Br { .. } => {
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }
            InstKind::CondBr { cond, .. } => {
                self.require(cond)?;
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }
            InstKind::Switch { value, .. } => {
                self.require(value)?;
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }
            InstKind::Unreachable => {
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }
            InstKind::Ret { value } => {
                if let Some(v) = value {
                    self.require(v)?;
                }
                let slot = match value {
                    Some(v) => self.value_of(v),
                    None => ValueSlot {
                        ty: Some(self.mir.types.void),
                        const_value: None,
                        comptime: true,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                };
                self.finish(id, slot);
                Ok(())
            }
            InstKind::Phi { incoming } => {
                for &(v, _) in &incoming {
                    self.require(v)?;
                }
                let ty = incoming
                    .first()
                    .map(|&(v, _)| self.value_of(v).ty.unwrap_or(self.mir.types.void))
                    .unwrap_or(self.mir.types.void);
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::Call { callee, args } => {
                self.require(callee)?;
                for &a in &args {
                    self.require(a)?;
                }
                let callee_slot = self.value_of(callee);
                let fn_ty = callee_slot.ty.unwrap_or(self.mir.types.void);
                let func = callee_slot.const_value.as_ref().and_then(|c| c.as_func());
                let (arg_tys, ret_ty, is_vargs) = match &self.mir.types.get(fn_ty).kind {
                    TypeKind::Fn { args, ret, vargs } => (args.clone(), *ret, *vargs),
                    _ => (Vec::new(), self.mir.types.void, false),
                };
                if !is_vargs && arg_tys.len() != args.len() {
                    self.sink.error(CompileError::InvalidArgCount {
                        expected: arg_tys.len(),
                        found: args.len(),
                        span,
                    });
                } else {
                    for (i, &a) in args.iter().enumerate() {
                        if let Some(&expect) = arg_tys.get(i) {
                            let got = self.value_of(a).ty.unwrap_or(self.mir.types.void);
                            self.check_assignable(got, expect, span);
                        }
                    }
                }
                let is_thunk = func
                    .map(|f| self.mir.funcs[f].flags.contains(Flags::COMPILER_INTRINSIC))
                    .unwrap_or(false);
                let (const_value, comptime) = if is_thunk {
                    match self.mir.funcs[func.unwrap()].terminal_ret {
                        Some(ret_inst) => {
                            self.require(ret_inst)?;
                            (self.value_of(ret_inst).const_value, true)
                        }
                        None => (None, false),
                    }
                } else {
                    (None, false)
                };
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ret_ty),
                        const_value,
                        comptime,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::TypeFn { args, ret, vargs } => {
                for &a in &args {
                    self.require(a)?;
                }
                self.require(ret)?;
                let arg_tys = args.iter().map(|&a| self.value_of(a).as_type_or_void(self.mir)).collect();
                let ret_ty = self.value_of(ret).as_type_or_void(self.mir);
                let t = self.mir.types.intern_fn(arg_tys, ret_ty, vargs);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypeStruct { name, fields, is_packed } => {
                for (_, f) in &fields {
                    self.require(*f)?;
                }
                let field_tys: Vec<(String, TypeId)> = fields
                    .iter()
                    .map(|(n, f)| (n.clone(), self.value_of(*f).as_type_or_void(self.mir)))
                    .collect();
                let t = self.mir.types.alloc_struct(name, is_packed, None);
                self.mir.types.set_struct_members(t, field_tys);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypeEnum { name, base, variants } => {
                self.require(base)?;
                let base_ty = self.value_of(base).as_type_or_void(self.mir);
                let t = self.mir.types.alloc_enum(name, base_ty);
                let vs = variants.into_iter().map(|(n, v)| (n, v.unwrap_or(0))).collect();
                self.mir.types.set_enum_variants(t, vs);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypePtr { pointee } => {
                self.require(pointee)?;
                let p = self.value_of(pointee).as_type_or_void(self.mir);
                let t = self.mir.types.intern_pointer(p);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypeArray { elem, len } => {
                self.require(elem)?;
                let e = self.value_of(elem).as_type_or_void(self.mir);
                let t = self.mir.types.intern_array(e, len);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypeSlice { elem } => {
                self.require(elem)?;
                let e = self.value_of(elem).as_type_or_void(self.mir);
                let t = self.mir.types.intern_slice(e);
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::TypeVArgs => {
                let t = self.mir.types.intern_vargs();
                self.finish(id, self.type_value_slot(t));
                Ok(())
            }

            InstKind::Sizeof { ty_thunk } => {
                self.require(ty_thunk)?;
                let t = self.value_of(ty_thunk).as_type_or_void(self.mir);
                let size = self.mir.types.get(t).store_size_bytes as u64;
                let usize_ty = *self.mir.types.builtins.get("usize").unwrap();
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(usize_ty),
                        const_value: Some(ConstValue::scalar(usize_ty, Scalar::UInt(size))),
                        comptime: true,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }
            InstKind::Alignof { ty_thunk } => {
                self.require(ty_thunk)?;
                let t = self.value_of(ty_thunk).as_type_or_void(self.mir);
                let align = self.mir.types.get(t).align_bytes as u64;
                let usize_ty = *self.mir.types.builtins.get("usize").unwrap();
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(usize_ty),
                        const_value: Some(ConstValue::scalar(usize_ty, Scalar::UInt(align))),
                        comptime: true,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }
            InstKind::TypeInfo { ty_thunk } => {
                self.require(ty_thunk)?;
                let t = self.value_of(ty_thunk).as_type_or_void(self.mir);
                self.mir.rtti_var(t);
                let ptr_ty = self.mir.types.intern_pointer(self.mir.types.void);
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(ptr_ty),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }
            InstKind::ToAny { expr } => {
                self.require(expr)?;
                let t = self.mir.types.intern_vargs();
                self.finish(
                    id,
                    ValueSlot {
                        ty: Some(t),
                        const_value: None,
                        comptime: false,
                        addr_mode: AddrMode2(AddrMode::RValue),
                    },
                );
                Ok(())
            }

            InstKind::SetInitializer { var, value } => {
                self.require(value)?;
                let cv = self.value_of(value).const_value;
                self.mir.vars.get_mut(var).global_value = cv;
                self.finish(id, ValueSlotDefault::void(self.mir));
                Ok(())
            }
        }
    }
}

/// A few call sites need a bare `void`-typed `ValueSlot`; this just keeps
/// them from repeating the field list.
struct ValueSlotDefault;
impl ValueSlotDefault {
    fn void(mir: &Mir) -> ValueSlot {
        ValueSlot {
            ty: Some(mir.types.void),
            const_value: None,
            comptime: false,
            addr_mode: AddrMode2(AddrMode::RValue),
        }
    }
}

trait AsTypeOrVoid {
    fn as_type_or_void(&self, mir: &Mir) -> TypeId;
}
impl AsTypeOrVoid for ValueSlot {
    fn as_type_or_void(&self, mir: &Mir) -> TypeId {
        self.const_value.as_ref().and_then(|c| c.as_type()).unwrap_or(mir.types.void)
    }
}

/// Walks every non-extern, non-thunk function's reachable control-flow
/// graph looking for a `Ret(None)` reachable from the entry when the
/// function's declared return type isn't void (spec §4.3 "Missing-return
/// detection").
fn check_missing_returns(mir: &Mir, sink: &mut dyn DiagnosticSink) {
    for (_, f) in mir.funcs.iter() {
        if f.flags.contains(Flags::EXTERN) || f.flags.contains(Flags::COMPILER_INTRINSIC) {
            continue;
        }
        let Some(entry) = f.first_block else { continue };
        let ret_ty = match &mir.types.get(f.ty).kind {
            TypeKind::Fn { ret, .. } => *ret,
            _ => mir.types.void,
        };
        if ret_ty == mir.types.void {
            continue;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![entry];
        while let Some(b) = stack.pop() {
            if !seen.insert(b) {
                continue;
            }
            let Some(term) = mir.blocks[b].terminal else { continue };
            match &mir.instrs[term].kind {
                InstKind::Ret { value: None } => {
                    sink.error(CompileError::MissingReturn {
                        func: f.name.clone().unwrap_or_default(),
                        span: f.decl_span,
                    });
                }
                InstKind::Br { target } => stack.push(*target),
                InstKind::CondBr { then_block, else_block, .. } => {
                    stack.push(*then_block);
                    stack.push(*else_block);
                }
                InstKind::Switch { cases, default, .. } => {
                    for (_, c) in cases {
                        stack.push(*c);
                    }
                    stack.push(*default);
                }
                _ => {}
            }
        }
    }
}

/// Builds the LLVM handle for one type (spec §4.3 "LLVM-type
/// materialization"), mirroring the teacher's `mir_type_to_llvm` switch.
/// The handle is never cached — see [`TypeArena::mark_llvm_materialized`]
/// for why — so this runs fresh for every type and every nested field a
/// struct/array pulls in. `Void`, function, vargs and type-of-types kinds
/// have no single concrete LLVM data representation (a function type isn't
/// `BasicType`; the other three carry no runtime storage), so they
/// materialize to nothing.
#[cfg(feature = "llvm")]
fn type_to_llvm_type<'ctx>(
    context: &'ctx inkwell::context::Context,
    types: &TypeArena,
    id: TypeId,
) -> Option<inkwell::types::BasicTypeEnum<'ctx>> {
    use inkwell::types::{BasicType, BasicTypeEnum};
    use inkwell::AddressSpace;

    match &types.get(id).kind {
        TypeKind::Bool => Some(context.bool_type().into()),
        TypeKind::Int { bits, .. } => Some(context.custom_width_int_type(*bits as u32).into()),
        TypeKind::Real { bits } => {
            Some(if *bits <= 32 { context.f32_type().into() } else { context.f64_type().into() })
        }
        TypeKind::Pointer { .. } | TypeKind::Null | TypeKind::String => {
            Some(context.ptr_type(AddressSpace::default()).into())
        }
        TypeKind::Array { elem, len } => {
            let elem_ty = type_to_llvm_type(context, types, *elem)?;
            Some(elem_ty.array_type(*len as u32).into())
        }
        TypeKind::Slice { .. } => {
            let ptr: BasicTypeEnum = context.ptr_type(AddressSpace::default()).into();
            let len_ty: BasicTypeEnum = context.i64_type().into();
            Some(context.struct_type(&[ptr, len_ty], false).into())
        }
        TypeKind::Struct(_) => {
            let body = types.struct_body(id);
            let field_types: Vec<BasicTypeEnum> =
                body.members.iter().filter_map(|m| type_to_llvm_type(context, types, m.ty)).collect();
            Some(context.struct_type(&field_types, body.is_packed).into())
        }
        TypeKind::Enum(_) => type_to_llvm_type(context, types, types.enum_body(id).base),
        TypeKind::Void | TypeKind::Fn { .. } | TypeKind::VArgs | TypeKind::TypeOfTypes => None,
    }
}

/// Walks every type in the arena and materializes its LLVM handle (spec
/// §4.3), using the `inkwell::context::Context` every `Mir` carries once
/// the `llvm` feature is on (`Mir::new` creates it up front — there is no
/// separate codegen stage here to create one later).
#[cfg(feature = "llvm")]
fn materialize_llvm_types(mir: &mut Mir) {
    let Some(context) = mir.llvm_context.as_ref() else {
        return;
    };
    let ids: Vec<TypeId> = mir.types.ids().collect();
    for id in ids {
        let _ = type_to_llvm_type(context, &mir.types, id);
        mir.types.mark_llvm_materialized(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as b;
    use crate::ast::{Item, TypeExpr};
    use crate::error::ConsoleSink;
    use crate::mir::builder::lower_program;

    fn analyze_program(program: &crate::ast::Program) -> (Mir, ConsoleSink) {
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, program);
        let mut sink = ConsoleSink::new("<test>", "");
        analyze(&mut mir, &result.global_scope, &mut sink);
        (mir, sink)
    }

    #[test]
    fn resolves_entry_point_return_type_to_s32() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::int(42)))]),
        ))]);
        let (mir, sink) = analyze_program(&program);
        assert_eq!(sink.error_count(), 0);
        let entry = mir.entry_fn.expect("main registered");
        let s32 = *mir.types.builtins.get("s32").unwrap();
        match &mir.types.get(mir.funcs[entry].ty).kind {
            TypeKind::Fn { ret, .. } => assert_eq!(*ret, s32),
            other => panic!("expected fn type, got {other:?}"),
        }
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::Void,
            b::block(vec![b::let_stmt("x", None, Some(b::var("never_declared"))), b::ret(None)]),
        ))]);
        let (_, sink) = analyze_program(&program);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn missing_return_is_reported_for_non_void_function() {
        let program = b::program(vec![Item::FnDef(b::func(
            "answer",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![]),
        ))]);
        let (_, sink) = analyze_program(&program);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn forward_referenced_struct_resolves() {
        use crate::ast::{StructDef, StructFieldDef};
        let program = b::program(vec![
            Item::FnDef(b::func(
                "main",
                Vec::new(),
                TypeExpr::Void,
                b::block(vec![
                    b::let_stmt("p", Some(TypeExpr::Named("Point".into())), None),
                    b::ret(None),
                ]),
            )),
            Item::StructDef(StructDef {
                name: crate::ast::spanned("Point".to_string()),
                fields: vec![StructFieldDef {
                    name: crate::ast::spanned("x".to_string()),
                    ty: crate::ast::spanned(TypeExpr::s32()),
                }],
                is_packed: false,
                base: None,
                span: crate::ast::Span::synthetic(),
            }),
        ]);
        let (_, sink) = analyze_program(&program);
        assert_eq!(sink.error_count(), 0);
    }
}
