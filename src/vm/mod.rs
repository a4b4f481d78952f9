//! Virtual Machine (C4): the stack-based interpreter and comptime evaluator
//! that actually runs a function body (spec §4.4), plus entry-point and
//! test-case execution (spec §4.4.2).
//!
//! Execution is a recursive tree-walk over already-analyzed MIR rather than
//! a literal bytecode loop: every instruction was already typed — and, for
//! anything foldable, already given a constant value — by the analyzer, so
//! the VM's job at a given instruction is only to *compute a value*, never
//! to re-derive its type. `Stack` still exposes the push/pop/push_frame/
//! pop_frame/alloc_var operations of spec §4.4 "Stack operations", and is
//! what actually backs local-variable storage, argument passing and
//! pointer arithmetic; call recursion is ordinary Rust recursion, guarded
//! the same way the analyzer's work queue is guarded, with
//! `stacker::maybe_grow`.
//!
//! Values on the two stacks and in the static segment are `ConstValue`
//! trees rather than raw bytes — this crate never emits code, so nothing
//! downstream needs a literal memory layout — but every allocation still
//! reports and enforces a byte cost via `Type::store_size_bytes`, matching
//! the spec's accounting. A pointer is a handle into `Vm::derived`, a side
//! table recording which root cell (a stack slot or a global) it was taken
//! from and the field/index path walked to get there; `ElemPtr`/`MemberPtr`
//! extend that path rather than computing a raw offset.

pub mod ffi;

use std::collections::HashMap;

use thiserror::Error;

use crate::mir::{AddrMode, ConstData, ConstValue, Flags, FuncId, InstId, InstKind, MemberRef, Mir, Scalar, VarId};
use crate::types::{TypeArena, TypeId, TypeKind};

/// Default main-stack capacity in bytes (spec §4.4 "configurable size,
/// default 2 MiB").
pub const DEFAULT_STACK_BYTES: usize = 2 * 1024 * 1024;
/// The scratch stack only ever materializes comptime composites as
/// temporaries (vargs slices, `toany` payloads); it never needs to be big.
pub const SCRATCH_STACK_BYTES: usize = 64 * 1024;
const MAX_CALL_DEPTH: usize = 4096;
const MAX_STACK_TRACE: usize = 16;

/// A runtime fault detected while executing comptime/VM code
/// (spec §4.4.2 "Cancellation").
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeFault {
    #[error("execution reached unreachable code")]
    Unreachable,
    #[error("null pointer dereference")]
    NullDeref,
    #[error("division by zero")]
    DivByZero,
    #[error(
        "Array index is out of the bounds! Array index is: {index}, but array size is: {len}"
    )]
    OutOfBounds { index: i64, len: usize },
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("external library '{0}' not found")]
    LibNotFound(String),
    #[error("external symbol '{0}' not found")]
    SymbolNotFound(String),
}

type VResult<T> = Result<T, RuntimeFault>;

/// Header fields every stack carries (spec §4.4 "Stacks").
#[derive(Debug, Clone)]
struct StackHeader {
    top: usize,
    used_bytes: usize,
    allocated_bytes: usize,
    frame_ptr: usize,
    prev_block: Option<crate::mir::BlockId>,
    aborted: bool,
}

#[derive(Debug, Clone)]
struct CallFrame {
    saved_top: usize,
    saved_frame_ptr: usize,
    caller: Option<InstId>,
    locals: HashMap<VarId, usize>,
    args: Vec<ConstValue>,
}

/// One of the VM's two contiguous storage regions (spec §4.4 "Stacks"):
/// `push`/`pop` move the top, `push_frame`/`pop_frame` bracket a call's
/// locals, and `alloc_var` reserves a local's slot and records its
/// frame-relative offset on the `Variable` itself.
pub struct Stack {
    header: StackHeader,
    slots: Vec<ConstValue>,
    sizes: Vec<u32>,
    frames: Vec<CallFrame>,
}

impl Stack {
    fn new(byte_capacity: usize) -> Self {
        Self {
            header: StackHeader {
                top: 0,
                used_bytes: 0,
                allocated_bytes: byte_capacity,
                frame_ptr: 0,
                prev_block: None,
                aborted: false,
            },
            slots: Vec::new(),
            sizes: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.sizes.clear();
        self.frames.clear();
        self.header.top = 0;
        self.header.used_bytes = 0;
        self.header.frame_ptr = 0;
        self.header.prev_block = None;
        self.header.aborted = false;
    }

    /// spec §4.4 "push(ptr, type) copies the value onto the top of the
    /// stack and returns the address of the copy".
    fn push(&mut self, value: ConstValue, size_bytes: u32) -> VResult<usize> {
        if self.header.used_bytes + size_bytes as usize > self.header.allocated_bytes {
            return Err(RuntimeFault::StackOverflow);
        }
        let addr = self.slots.len();
        self.slots.push(value);
        self.sizes.push(size_bytes);
        self.header.used_bytes += size_bytes as usize;
        self.header.top = self.slots.len();
        Ok(addr)
    }

    /// spec §4.4 "pop(type) decreases the top by the type's size and
    /// returns the value that was there".
    fn pop(&mut self) -> VResult<ConstValue> {
        let size = self.sizes.pop().ok_or(RuntimeFault::StackUnderflow)?;
        let value = self.slots.pop().ok_or(RuntimeFault::StackUnderflow)?;
        self.header.used_bytes -= size as usize;
        self.header.top = self.slots.len();
        Ok(value)
    }

    /// spec §4.4 "push_frame(caller) stores the previous frame pointer and
    /// the calling instruction".
    fn push_frame(&mut self, caller: Option<InstId>, args: Vec<ConstValue>) -> VResult<()> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeFault::StackOverflow);
        }
        self.frames.push(CallFrame {
            saved_top: self.header.top,
            saved_frame_ptr: self.header.frame_ptr,
            caller,
            locals: HashMap::new(),
            args,
        });
        self.header.frame_ptr = self.header.top;
        Ok(())
    }

    /// spec §4.4 "pop_frame restores the prior top and frame pointer and
    /// returns the saved caller".
    fn pop_frame(&mut self) -> VResult<Option<InstId>> {
        let frame = self.frames.pop().ok_or(RuntimeFault::StackUnderflow)?;
        self.slots.truncate(frame.saved_top);
        let freed: u32 = self.sizes.split_off(frame.saved_top).iter().sum();
        self.header.used_bytes = self.header.used_bytes.saturating_sub(freed as usize);
        self.header.top = frame.saved_top;
        self.header.frame_ptr = frame.saved_frame_ptr;
        Ok(frame.caller)
    }

    /// spec §4.4 "alloc_var(var) reserves space for a local in the current
    /// frame and writes its frame-relative offset into `var.rel_stack_ptr`".
    fn alloc_var(&mut self, var: VarId, value: ConstValue, size_bytes: u32) -> VResult<(usize, i32)> {
        let addr = self.push(value, size_bytes)?;
        let rel = addr as i32 - self.header.frame_ptr as i32;
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(var, addr);
        }
        Ok((addr, rel))
    }

    fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }
}

/// Which storage region a derived pointer's path starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Main(usize),
    Scratch(usize),
    Global(VarId),
    /// A value synthesized on the fly with no backing storage (e.g. `.len`
    /// on a fixed-size array, which is a compile-time fact, not a field).
    /// Writing through one of these is a no-op.
    Synthetic(Box<ConstValue>),
}

#[derive(Debug, Clone)]
struct Lvalue {
    root: Root,
    path: Vec<usize>,
}

/// The interpreter: two stacks, a pointer table, an FFI bridge, and the
/// bounded call trace used to report a runtime fault (spec §4.4.2
/// "Cancellation... prints a bounded call-stack excerpt").
pub struct Vm {
    main_stack: Stack,
    scratch_stack: Stack,
    ffi: ffi::FfiTable,
    derived: Vec<Lvalue>,
    call_trace: Vec<(FuncId, crate::ast::Span)>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            main_stack: Stack::new(DEFAULT_STACK_BYTES),
            scratch_stack: Stack::new(SCRATCH_STACK_BYTES),
            ffi: ffi::FfiTable::new(),
            derived: Vec::new(),
            call_trace: Vec::new(),
        }
    }

    /// Runs `main` with a cleared stack and a terminal frame (caller
    /// `None`), printing the exact line spec §4.4.2/§8 scenario 1 names.
    /// Returns `false` on a runtime fault, matching the driver's
    /// "compilation continues, emission is suppressed" contract.
    pub fn run_entry(&mut self, mir: &mut Mir) -> bool {
        let Some(entry) = mir.entry_fn else { return true };
        self.main_stack.reset();
        self.scratch_stack.reset();
        self.derived.clear();
        self.call_trace.clear();
        match self.run_function(mir, entry, Vec::new(), None) {
            Ok(v) => {
                println!("execution finished with state: {}", v.as_int().unwrap_or(0));
                true
            }
            Err(fault) => {
                self.main_stack.header.aborted = true;
                self.print_fault(&fault);
                false
            }
        }
    }

    /// Runs every `#test` function in isolation — stack, pointer table and
    /// the `aborted` flag are all reset between runs (spec §4.4.2
    /// "Test-case execution"). A test function's boolean/non-zero return
    /// marks it passed; a runtime fault marks it failed.
    pub fn run_tests(&mut self, mir: &mut Mir) -> Vec<(String, bool)> {
        let tests = mir.test_fns.clone();
        let mut results = Vec::with_capacity(tests.len());
        for f in tests {
            self.main_stack.reset();
            self.scratch_stack.reset();
            self.derived.clear();
            self.call_trace.clear();
            let name = mir.funcs[f].name.clone().unwrap_or_else(|| "<test>".to_string());
            let passed = match self.run_function(mir, f, Vec::new(), None) {
                Ok(v) => v.as_bool().unwrap_or_else(|| v.as_int().map(|n| n != 0).unwrap_or(true)),
                Err(fault) => {
                    self.print_fault(&fault);
                    false
                }
            };
            println!("{} {name}", if passed { "PASS" } else { "FAIL" });
            results.push((name, passed));
        }
        results
    }

    fn print_fault(&self, fault: &RuntimeFault) {
        eprintln!("runtime fault: {fault}");
        for (func, span) in self.call_trace.iter().rev().take(MAX_STACK_TRACE) {
            eprintln!("  at {func:?} ({}:{})", span.line, span.column);
        }
    }

    fn mint(&mut self, lv: Lvalue) -> u64 {
        self.derived.push(lv);
        self.derived.len() as u64
    }

    fn lvalue_of(&self, addr: u64) -> VResult<Lvalue> {
        if addr == 0 {
            return Err(RuntimeFault::NullDeref);
        }
        self.derived.get(addr as usize - 1).cloned().ok_or(RuntimeFault::NullDeref)
    }

    fn deref(&self, mir: &Mir, addr: u64) -> VResult<ConstValue> {
        let lv = self.lvalue_of(addr)?;
        let root = match &lv.root {
            Root::Main(slot) => self.main_stack.slots.get(*slot).cloned(),
            Root::Scratch(slot) => self.scratch_stack.slots.get(*slot).cloned(),
            Root::Global(var) => Some(
                mir.vars[*var]
                    .global_value
                    .clone()
                    .unwrap_or_else(|| zero_value(&mir.types, mir.vars[*var].ty)),
            ),
            Root::Synthetic(cv) => Some((**cv).clone()),
        }
        .ok_or(RuntimeFault::NullDeref)?;
        navigate(&root, &lv.path)
    }

    fn store(&mut self, mir: &mut Mir, addr: u64, value: ConstValue) -> VResult<()> {
        let lv = self.lvalue_of(addr)?;
        match lv.root {
            Root::Main(slot) => {
                let cell = self.main_stack.slots.get_mut(slot).ok_or(RuntimeFault::NullDeref)?;
                navigate_mut(cell, &lv.path, value)
            }
            Root::Scratch(slot) => {
                let cell = self.scratch_stack.slots.get_mut(slot).ok_or(RuntimeFault::NullDeref)?;
                navigate_mut(cell, &lv.path, value)
            }
            Root::Global(var) => {
                let mut cell = mir.vars[var]
                    .global_value
                    .clone()
                    .unwrap_or_else(|| zero_value(&mir.types, mir.vars[var].ty));
                navigate_mut(&mut cell, &lv.path, value)?;
                mir.vars.get_mut(var).global_value = Some(cell);
                Ok(())
            }
            Root::Synthetic(_) => Ok(()),
        }
    }

    /// Resolves `target` — a `DeclVar`/`DeclArg`, possibly behind a chain
    /// of `DeclDirectRef`s — to an address, allocating its storage on first
    /// use if the declaring instruction hasn't run yet (a forward
    /// reference). Anything else is assumed to already evaluate to a
    /// pointer (re-`&`-ing an existing lvalue instruction).
    fn addr_of(&mut self, mir: &mut Mir, target: InstId) -> VResult<u64> {
        match resolve_var(mir, target) {
            Some(var) => {
                if mir.vars[var].is_global {
                    return Ok(self.mint(Lvalue { root: Root::Global(var), path: Vec::new() }));
                }
                let existing = self.main_stack.current_frame().and_then(|f| f.locals.get(&var).copied());
                let addr = match existing {
                    Some(a) => a,
                    None => {
                        let ty = mir.vars[var].ty;
                        let size = mir.types.get(ty).store_size_bytes;
                        let value = zero_value(&mir.types, ty);
                        let (addr, rel) = self.main_stack.alloc_var(var, value, size)?;
                        mir.vars.get_mut(var).rel_stack_ptr = rel;
                        addr
                    }
                };
                Ok(self.mint(Lvalue { root: Root::Main(addr), path: Vec::new() }))
            }
            None => {
                let v = self.eval(mir, target)?;
                Ok(v.as_int().unwrap_or(0) as u64)
            }
        }
    }

    /// Entry point for evaluating one instruction; guards the recursive
    /// descent the same way the analyzer guards its work-queue loop.
    fn eval(&mut self, mir: &mut Mir, inst: InstId) -> VResult<ConstValue> {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.eval_inner(mir, inst))
    }

    fn eval_inner(&mut self, mir: &mut Mir, inst: InstId) -> VResult<ConstValue> {
        let ty = mir.instrs[inst].value.ty.unwrap_or(mir.types.void);
        let kind = mir.instrs[inst].kind.clone();
        match kind {
            InstKind::DeclDirectRef { target } => self.eval(mir, target),

            InstKind::Const { value } => Ok(value),

            InstKind::Arg { index } => {
                let v = self.main_stack.current_frame().and_then(|f| f.args.get(index).cloned());
                Ok(v.unwrap_or_else(|| zero_value(&mir.types, ty)))
            }

            InstKind::DeclArg { arg_index, var, .. } => {
                if let Some(addr) = self.main_stack.current_frame().and_then(|f| f.locals.get(&var).copied()) {
                    return Ok(self.main_stack.slots[addr].clone());
                }
                let arg_value = self
                    .main_stack
                    .current_frame()
                    .and_then(|f| f.args.get(arg_index).cloned())
                    .unwrap_or_else(|| zero_value(&mir.types, ty));
                let size = mir.types.get(ty).store_size_bytes;
                let (_, rel) = self.main_stack.alloc_var(var, arg_value.clone(), size)?;
                mir.vars.get_mut(var).rel_stack_ptr = rel;
                Ok(arg_value)
            }

            InstKind::DeclVar { var, init, .. } => {
                if mir.vars[var].is_global {
                    if let Some(v) = mir.vars[var].global_value.clone() {
                        return Ok(v);
                    }
                    let value = match init {
                        Some(i) => self.eval(mir, i)?,
                        None => zero_value(&mir.types, ty),
                    };
                    mir.vars.get_mut(var).global_value = Some(value.clone());
                    return Ok(value);
                }
                if let Some(addr) = self.main_stack.current_frame().and_then(|f| f.locals.get(&var).copied()) {
                    return Ok(self.main_stack.slots[addr].clone());
                }
                let value = match init {
                    Some(i) => self.eval(mir, i)?,
                    None => zero_value(&mir.types, ty),
                };
                let size = mir.types.get(ty).store_size_bytes;
                let (_, rel) = self.main_stack.alloc_var(var, value.clone(), size)?;
                mir.vars.get_mut(var).rel_stack_ptr = rel;
                Ok(value)
            }

            InstKind::SetInitializer { var, value } => {
                let v = self.eval(mir, value)?;
                mir.vars.get_mut(var).global_value = Some(v.clone());
                Ok(v)
            }

            InstKind::Load { ptr } => {
                let p = self.eval(mir, ptr)?;
                let addr = p.as_int().unwrap_or(0) as u64;
                self.deref(mir, addr)
            }

            InstKind::Store { value, ptr } => {
                let v = self.eval(mir, value)?;
                let p = self.eval(mir, ptr)?;
                let addr = p.as_int().unwrap_or(0) as u64;
                self.store(mir, addr, v)?;
                Ok(ConstValue { ty: mir.types.void, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: false })
            }

            InstKind::AddrOf { target } => {
                let addr = self.addr_of(mir, target)?;
                Ok(ConstValue::scalar(ty, Scalar::Ptr(addr)))
            }

            InstKind::ElemPtr { base, index } => self.eval_elem_ptr(mir, base, index, ty),
            InstKind::MemberPtr { base, member } => self.eval_member_ptr(mir, base, member, ty),

            InstKind::Binop { op, lhs, rhs } => {
                let l = self.eval(mir, lhs)?;
                let r = self.eval(mir, rhs)?;
                runtime_binop(&mir.types, op, &l, &r, ty)
            }

            InstKind::Unop { op, operand } => {
                let v = self.eval(mir, operand)?;
                Ok(runtime_unop(&mir.types, op, &v, ty))
            }

            InstKind::Cast { op, operand, .. } => {
                let v = self.eval(mir, operand)?;
                Ok(apply_cast(op.unwrap_or(crate::types::CastOp::None), &v, ty))
            }

            InstKind::Phi { incoming } => {
                let prev = self.main_stack.header.prev_block;
                let chosen = incoming
                    .iter()
                    .find(|(_, b)| Some(*b) == prev)
                    .or_else(|| incoming.first())
                    .map(|(v, _)| *v);
                match chosen {
                    Some(v) => self.eval(mir, v),
                    None => Ok(zero_value(&mir.types, ty)),
                }
            }

            InstKind::Call { callee, args } => self.eval_call(mir, inst, callee, args, ty),

            InstKind::VArgs { values } => self.eval_vargs(mir, values, ty),
            InstKind::Compound { fields, .. } => self.eval_compound(mir, fields, ty),
            InstKind::ToAny { expr } => self.eval_to_any(mir, expr, ty),
            InstKind::TypeInfo { ty_thunk } => self.eval_type_info(mir, ty_thunk, ty),

            InstKind::Unreachable => {
                self.main_stack.header.aborted = true;
                Err(RuntimeFault::Unreachable)
            }

            // Structural/type-constructor/reflection instructions are
            // always resolved to a constant during analysis; nothing here
            // mutates storage, so the cached value is authoritative.
            _ => Ok(mir.instrs[inst].value.const_value.clone().unwrap_or_else(|| zero_value(&mir.types, ty))),
        }
    }

    fn eval_elem_ptr(&mut self, mir: &mut Mir, base: InstId, index: InstId, ty: TypeId) -> VResult<ConstValue> {
        let base_val = self.eval(mir, base)?;
        let idx_val = self.eval(mir, index)?;
        let idx = idx_val.as_int().unwrap_or(0);
        let base_addr = base_val.as_int().unwrap_or(0) as u64;
        if base_addr == 0 {
            return Err(RuntimeFault::NullDeref);
        }
        let base_ty = mir.instrs[base].value.ty.unwrap_or(mir.types.void);
        let pointee = match &mir.types.get(base_ty).kind {
            TypeKind::Pointer { pointee } => *pointee,
            _ => mir.types.void,
        };
        match &mir.types.get(pointee).kind {
            TypeKind::Array { len, .. } => {
                if idx < 0 || idx as usize >= *len {
                    return Err(RuntimeFault::OutOfBounds { index: idx, len: *len });
                }
                let mut lv = self.lvalue_of(base_addr)?;
                lv.path.push(idx as usize);
                Ok(ConstValue::scalar(ty, Scalar::Ptr(self.mint(lv))))
            }
            TypeKind::Slice { .. } => {
                let slice_val = self.deref(mir, base_addr)?;
                let (ptr_cv, len_cv) = match &slice_val.data {
                    ConstData::Struct(m) if m.len() == 2 => (m[0].clone(), m[1].clone()),
                    _ => return Err(RuntimeFault::NullDeref),
                };
                let len = len_cv.as_int().unwrap_or(0);
                if idx < 0 || idx >= len {
                    return Err(RuntimeFault::OutOfBounds { index: idx, len: len as usize });
                }
                let inner_addr = ptr_cv.as_int().unwrap_or(0) as u64;
                let mut lv = self.lvalue_of(inner_addr)?;
                lv.path.push(idx as usize);
                Ok(ConstValue::scalar(ty, Scalar::Ptr(self.mint(lv))))
            }
            _ => Err(RuntimeFault::NullDeref),
        }
    }

    fn eval_member_ptr(&mut self, mir: &mut Mir, base: InstId, member: MemberRef, ty: TypeId) -> VResult<ConstValue> {
        let base_val = self.eval(mir, base)?;
        let base_addr = base_val.as_int().unwrap_or(0) as u64;
        if base_addr == 0 {
            return Err(RuntimeFault::NullDeref);
        }
        let base_ty = mir.instrs[base].value.ty.unwrap_or(mir.types.void);
        let pointee = match &mir.types.get(base_ty).kind {
            TypeKind::Pointer { pointee } => *pointee,
            _ => mir.types.void,
        };
        match member {
            MemberRef::Named(name) => match mir.types.member(pointee, &name).map(|m| m.index) {
                Some(idx) => {
                    let mut lv = self.lvalue_of(base_addr)?;
                    lv.path.push(idx);
                    Ok(ConstValue::scalar(ty, Scalar::Ptr(self.mint(lv))))
                }
                None => Ok(ConstValue::scalar(ty, Scalar::Ptr(0))),
            },
            MemberRef::ArrayLen => {
                let len = match &mir.types.get(pointee).kind {
                    TypeKind::Array { len, .. } => *len as u64,
                    _ => 0,
                };
                let usize_ty = *mir.types.builtins.get("usize").unwrap();
                let cv = ConstValue::scalar(usize_ty, Scalar::UInt(len));
                let addr = self.mint(Lvalue { root: Root::Synthetic(Box::new(cv)), path: Vec::new() });
                Ok(ConstValue::scalar(ty, Scalar::Ptr(addr)))
            }
            MemberRef::ArrayPtr => {
                let mut lv = self.lvalue_of(base_addr)?;
                lv.path.push(0);
                Ok(ConstValue::scalar(ty, Scalar::Ptr(self.mint(lv))))
            }
        }
    }

    fn eval_call(
        &mut self,
        mir: &mut Mir,
        call_inst: InstId,
        callee: InstId,
        args: Vec<InstId>,
        ty: TypeId,
    ) -> VResult<ConstValue> {
        let callee_val = self.eval(mir, callee)?;
        let mut arg_values = Vec::with_capacity(args.len());
        for a in &args {
            arg_values.push(self.eval(mir, *a)?);
        }
        let Some(func) = callee_val.as_func() else {
            return Ok(zero_value(&mir.types, ty));
        };
        if mir.funcs[func].flags.contains(Flags::EXTERN) {
            self.ffi.call(mir, func, &arg_values)
        } else {
            self.run_function(mir, func, arg_values, Some(call_inst))
        }
    }

    fn eval_vargs(&mut self, mir: &mut Mir, values: Vec<InstId>, ty: TypeId) -> VResult<ConstValue> {
        let mut vals = Vec::with_capacity(values.len());
        for v in &values {
            vals.push(self.eval(mir, *v)?);
        }
        let addr = self.scratch_stack.push(
            ConstValue { ty, data: ConstData::Array(vals.clone()), addr_mode: AddrMode::RValue, comptime: false },
            (vals.len().max(1) as u32) * 8,
        )?;
        let ptr = self.mint(Lvalue { root: Root::Scratch(addr), path: Vec::new() });
        let usize_ty = *mir.types.builtins.get("usize").unwrap();
        let len_cv = ConstValue::scalar(usize_ty, Scalar::UInt(vals.len() as u64));
        Ok(ConstValue {
            ty,
            data: ConstData::Struct(vec![ConstValue::scalar(ty, Scalar::Ptr(ptr)), len_cv]),
            addr_mode: AddrMode::RValue,
            comptime: false,
        })
    }

    fn eval_compound(&mut self, mir: &mut Mir, fields: Vec<(Option<String>, InstId)>, ty: TypeId) -> VResult<ConstValue> {
        let mut parts = Vec::with_capacity(fields.len());
        for (_, f) in &fields {
            parts.push(self.eval(mir, *f)?);
        }
        let is_array = matches!(mir.types.get(ty).kind, TypeKind::Array { .. });
        Ok(ConstValue {
            ty,
            data: if is_array { ConstData::Array(parts) } else { ConstData::Struct(parts) },
            addr_mode: AddrMode::RValue,
            comptime: false,
        })
    }

    fn eval_to_any(&mut self, mir: &mut Mir, expr: InstId, ty: TypeId) -> VResult<ConstValue> {
        let v = self.eval(mir, expr)?;
        let vty = mir.instrs[expr].value.ty.unwrap_or(mir.types.void);
        let rtti = mir.rtti_var(vty);
        let rtti_ptr = self.mint(Lvalue { root: Root::Global(rtti), path: Vec::new() });
        let size = mir.types.get(vty).store_size_bytes.max(1);
        let addr = self.scratch_stack.push(v, size)?;
        let data_ptr = self.mint(Lvalue { root: Root::Scratch(addr), path: Vec::new() });
        Ok(ConstValue {
            ty,
            data: ConstData::Struct(vec![
                ConstValue::scalar(ty, Scalar::Ptr(rtti_ptr)),
                ConstValue::scalar(ty, Scalar::Ptr(data_ptr)),
            ]),
            addr_mode: AddrMode::RValue,
            comptime: false,
        })
    }

    fn eval_type_info(&mut self, mir: &mut Mir, ty_thunk: InstId, ty: TypeId) -> VResult<ConstValue> {
        let t = self.eval(mir, ty_thunk)?.as_type().unwrap_or(mir.types.void);
        let var = mir.rtti_var(t);
        let addr = self.mint(Lvalue { root: Root::Global(var), path: Vec::new() });
        Ok(ConstValue::scalar(ty, Scalar::Ptr(addr)))
    }

    /// Calls `func` with `args` already evaluated, pushing a fresh frame and
    /// walking the function's basic blocks from its entry (spec §4.4.2
    /// "Entry and tests"; §5 "single-threaded, cooperative").
    pub fn run_function(&mut self, mir: &mut Mir, func: FuncId, args: Vec<ConstValue>, caller: Option<InstId>) -> VResult<ConstValue> {
        stacker::maybe_grow(64 * 1024, 2 * 1024 * 1024, || self.run_function_inner(mir, func, args, caller))
    }

    fn run_function_inner(&mut self, mir: &mut Mir, func: FuncId, args: Vec<ConstValue>, caller: Option<InstId>) -> VResult<ConstValue> {
        self.main_stack.push_frame(caller, args)?;
        self.call_trace.push((func, mir.funcs[func].decl_span));
        let result = self.exec_body(mir, func);
        self.call_trace.pop();
        self.main_stack.pop_frame()?;
        result
    }

    fn exec_body(&mut self, mir: &mut Mir, func: FuncId) -> VResult<ConstValue> {
        let Some(mut block) = mir.funcs[func].first_block else {
            return Ok(ConstValue { ty: mir.types.void, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: false });
        };
        loop {
            let instrs = mir.instrs_in(block);
            let mut jumped = false;
            for inst in instrs {
                match mir.instrs[inst].kind.clone() {
                    InstKind::Br { target } => {
                        self.main_stack.header.prev_block = Some(block);
                        block = target;
                        jumped = true;
                        break;
                    }
                    InstKind::CondBr { cond, then_block, else_block } => {
                        let c = self.eval(mir, cond)?;
                        self.main_stack.header.prev_block = Some(block);
                        block = if c.as_bool().unwrap_or(false) { then_block } else { else_block };
                        jumped = true;
                        break;
                    }
                    InstKind::Switch { value, cases, default } => {
                        let v = self.eval(mir, value)?;
                        let n = v.as_int().unwrap_or(0);
                        self.main_stack.header.prev_block = Some(block);
                        block = cases.iter().find(|(c, _)| *c == n).map(|(_, b)| *b).unwrap_or(default);
                        jumped = true;
                        break;
                    }
                    InstKind::Ret { value } => {
                        let v = match value {
                            Some(v) => self.eval(mir, v)?,
                            None => ConstValue { ty: mir.types.void, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: false },
                        };
                        return Ok(v);
                    }
                    InstKind::Unreachable => {
                        self.main_stack.header.aborted = true;
                        return Err(RuntimeFault::Unreachable);
                    }
                    _ => {
                        self.eval(mir, inst)?;
                    }
                }
            }
            if !jumped {
                return Ok(ConstValue { ty: mir.types.void, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: false });
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_var(mir: &Mir, inst: InstId) -> Option<VarId> {
    match &mir.instrs[inst].kind {
        InstKind::DeclVar { var, .. } | InstKind::DeclArg { var, .. } => Some(*var),
        InstKind::DeclDirectRef { target } => resolve_var(mir, *target),
        _ => None,
    }
}

fn navigate(value: &ConstValue, path: &[usize]) -> VResult<ConstValue> {
    let mut cur = value.clone();
    for &step in path {
        cur = match &cur.data {
            ConstData::Struct(members) => members.get(step).cloned().ok_or(RuntimeFault::NullDeref)?,
            ConstData::Array(elems) => elems
                .get(step)
                .cloned()
                .ok_or(RuntimeFault::OutOfBounds { index: step as i64, len: elems.len() })?,
            _ => return Err(RuntimeFault::NullDeref),
        };
    }
    Ok(cur)
}

fn navigate_mut(root: &mut ConstValue, path: &[usize], value: ConstValue) -> VResult<()> {
    let mut cur = root;
    for &step in path {
        cur = match &mut cur.data {
            ConstData::Struct(members) => members.get_mut(step).ok_or(RuntimeFault::NullDeref)?,
            ConstData::Array(elems) => {
                let len = elems.len();
                elems.get_mut(step).ok_or(RuntimeFault::OutOfBounds { index: step as i64, len })?
            }
            _ => return Err(RuntimeFault::NullDeref),
        };
    }
    *cur = value;
    Ok(())
}

/// Builds a zero value for `ty`, used both for uninitialized locals/globals
/// and for the scratch values `vargs`/`toany` stage their payload through.
fn zero_value(types: &TypeArena, ty: TypeId) -> ConstValue {
    match &types.get(ty).kind {
        TypeKind::Void => ConstValue { ty, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: true },
        TypeKind::Bool => ConstValue::scalar(ty, Scalar::Bool(false)),
        TypeKind::Int { signed: false, .. } => ConstValue::scalar(ty, Scalar::UInt(0)),
        TypeKind::Int { .. } => ConstValue::scalar(ty, Scalar::Int(0)),
        TypeKind::Real { .. } => ConstValue::scalar(ty, Scalar::Real(0.0)),
        TypeKind::Pointer { .. } | TypeKind::Null => ConstValue::scalar(ty, Scalar::Ptr(0)),
        TypeKind::String => ConstValue::scalar(ty, Scalar::Str(String::new())),
        TypeKind::TypeOfTypes => ConstValue::scalar(ty, Scalar::Type(types.void)),
        TypeKind::Array { elem, len } => ConstValue {
            ty,
            data: ConstData::Array((0..*len).map(|_| zero_value(types, *elem)).collect()),
            addr_mode: AddrMode::RValue,
            comptime: true,
        },
        TypeKind::Slice { .. } | TypeKind::VArgs => {
            let usize_ty = *types.builtins.get("usize").unwrap_or(&ty);
            ConstValue {
                ty,
                data: ConstData::Struct(vec![ConstValue::scalar(ty, Scalar::Ptr(0)), ConstValue::scalar(usize_ty, Scalar::UInt(0))]),
                addr_mode: AddrMode::RValue,
                comptime: true,
            }
        }
        TypeKind::Fn { .. } => ConstValue::scalar(ty, Scalar::Ptr(0)),
        TypeKind::Struct(_) => {
            let members: Vec<TypeId> = types.struct_body(ty).members.iter().map(|m| m.ty).collect();
            ConstValue {
                ty,
                data: ConstData::Struct(members.iter().map(|&m| zero_value(types, m)).collect()),
                addr_mode: AddrMode::RValue,
                comptime: true,
            }
        }
        TypeKind::Enum(_) => {
            let base = types.enum_body(ty).base;
            zero_value(types, base)
        }
    }
}

fn runtime_binop(types: &TypeArena, op: crate::ast::BinOp, l: &ConstValue, r: &ConstValue, ty: TypeId) -> VResult<ConstValue> {
    use crate::ast::BinOp;

    if op.is_logical() {
        let a = l.as_bool().unwrap_or(false);
        let b = r.as_bool().unwrap_or(false);
        let res = if op == BinOp::LAnd { a && b } else { a || b };
        return Ok(ConstValue::scalar(types.bool_, Scalar::Bool(res)));
    }
    let real_ctx = l.as_real().is_some() || r.as_real().is_some() || types.is_real(ty);
    if real_ctx {
        let x = l.as_real().or_else(|| l.as_int().map(|i| i as f64)).unwrap_or(0.0);
        let y = r.as_real().or_else(|| r.as_int().map(|i| i as f64)).unwrap_or(0.0);
        if op.is_comparison() {
            let res = real_compare(x, y, op);
            return Ok(ConstValue::scalar(types.bool_, Scalar::Bool(res)));
        }
        let v = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
            _ => return Err(RuntimeFault::DivByZero),
        };
        return Ok(ConstValue::scalar(ty, Scalar::Real(v)));
    }
    let x = l.as_int().unwrap_or(0);
    let y = r.as_int().unwrap_or(0);
    if op.is_comparison() {
        return Ok(ConstValue::scalar(types.bool_, Scalar::Bool(int_compare(x, y, op))));
    }
    let v = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(RuntimeFault::DivByZero);
            }
            x.wrapping_div(y)
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(RuntimeFault::DivByZero);
            }
            x.wrapping_rem(y)
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::Shl => x.wrapping_shl(y as u32),
        BinOp::Shr => x.wrapping_shr(y as u32),
        BinOp::LAnd | BinOp::LOr => unreachable!("handled above"),
        _ => x,
    };
    Ok(ConstValue::scalar(ty, Scalar::Int(v)))
}

fn real_compare(x: f64, y: f64, op: crate::ast::BinOp) -> bool {
    use crate::ast::BinOp;
    match op {
        BinOp::Eq => x == y,
        BinOp::Ne => x != y,
        BinOp::Lt => x < y,
        BinOp::Gt => x > y,
        BinOp::Le => x <= y,
        BinOp::Ge => x >= y,
        _ => false,
    }
}

fn int_compare(x: i64, y: i64, op: crate::ast::BinOp) -> bool {
    use crate::ast::BinOp;
    match op {
        BinOp::Eq => x == y,
        BinOp::Ne => x != y,
        BinOp::Lt => x < y,
        BinOp::Gt => x > y,
        BinOp::Le => x <= y,
        BinOp::Ge => x >= y,
        _ => false,
    }
}

fn runtime_unop(types: &TypeArena, op: crate::ast::UnOp, v: &ConstValue, ty: TypeId) -> ConstValue {
    use crate::ast::UnOp;
    match op {
        UnOp::Neg if types.is_real(ty) => ConstValue::scalar(ty, Scalar::Real(-v.as_real().unwrap_or(0.0))),
        UnOp::Neg => ConstValue::scalar(ty, Scalar::Int(v.as_int().unwrap_or(0).wrapping_neg())),
        UnOp::Not => ConstValue::scalar(types.bool_, Scalar::Bool(!v.as_bool().unwrap_or(false))),
        UnOp::BitNot => ConstValue::scalar(ty, Scalar::Int(!v.as_int().unwrap_or(0))),
    }
}

fn apply_cast(op: crate::types::CastOp, v: &ConstValue, ty: TypeId) -> ConstValue {
    use crate::types::CastOp;
    match op {
        CastOp::None => ConstValue { ty, data: v.data.clone(), addr_mode: v.addr_mode, comptime: v.comptime },
        CastOp::Bitcast => ConstValue { ty, data: v.data.clone(), addr_mode: AddrMode::RValue, comptime: v.comptime },
        CastOp::SExt | CastOp::ZExt | CastOp::Trunc => ConstValue::scalar(ty, Scalar::Int(v.as_int().unwrap_or(0))),
        CastOp::FpTrunc | CastOp::FpExt => ConstValue::scalar(ty, Scalar::Real(v.as_real().unwrap_or(0.0))),
        CastOp::FpToSi => ConstValue::scalar(ty, Scalar::Int(v.as_real().unwrap_or(0.0) as i64)),
        CastOp::FpToUi => ConstValue::scalar(ty, Scalar::UInt(v.as_real().unwrap_or(0.0) as u64)),
        CastOp::SiToFp | CastOp::UiToFp => ConstValue::scalar(ty, Scalar::Real(v.as_int().unwrap_or(0) as f64)),
        CastOp::PtrToInt => ConstValue::scalar(ty, Scalar::Int(v.as_int().unwrap_or(0))),
        CastOp::IntToPtr => ConstValue::scalar(ty, Scalar::Ptr(v.as_int().unwrap_or(0) as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::ast::builder as b;
    use crate::ast::{BinOp, Item, TypeExpr};
    use crate::error::ConsoleSink;
    use crate::mir::builder::lower_program;

    fn build_and_analyze(program: crate::ast::Program) -> Mir {
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, &program);
        let mut sink = ConsoleSink::new("test".to_string(), String::new());
        sink.warnings_enabled = false;
        analyzer::analyze(&mut mir, &result.global_scope, &mut sink);
        assert_eq!(sink.error_count(), 0, "unexpected analysis errors");
        mir
    }

    #[test]
    fn runs_literal_return() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::int(0)))]),
        ))]);
        let mut mir = build_and_analyze(program);
        let mut vm = Vm::new();
        let result = vm.run_function(&mut mir, mir.entry_fn.unwrap(), Vec::new(), None).unwrap();
        assert_eq!(result.as_int(), Some(0));
    }

    #[test]
    fn evaluates_operator_precedence() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![
                b::let_stmt("a", None, Some(b::bin(b::int(2), BinOp::Add, b::bin(b::int(3), BinOp::Mul, b::int(4))))),
                b::ret(Some(b::var("a"))),
            ]),
        ))]);
        let mut mir = build_and_analyze(program);
        let mut vm = Vm::new();
        let result = vm.run_function(&mut mir, mir.entry_fn.unwrap(), Vec::new(), None).unwrap();
        assert_eq!(result.as_int(), Some(14));
    }

    #[test]
    fn calls_another_function() {
        let program = b::program(vec![
            Item::FnDef(b::func(
                "add",
                vec![("a", TypeExpr::s32()), ("b", TypeExpr::s32())],
                TypeExpr::s32(),
                b::block(vec![b::ret(Some(b::bin(b::var("a"), BinOp::Add, b::var("b"))))]),
            )),
            Item::FnDef(b::func(
                "main",
                Vec::new(),
                TypeExpr::s32(),
                b::block(vec![b::ret(Some(b::call("add", vec![b::int(2), b::int(3)])))]),
            )),
        ]);
        let mut mir = build_and_analyze(program);
        let mut vm = Vm::new();
        let result = vm.run_function(&mut mir, mir.entry_fn.unwrap(), Vec::new(), None).unwrap();
        assert_eq!(result.as_int(), Some(5));
    }

    #[test]
    fn loop_with_mutation_converges() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![
                b::let_stmt("i", None, Some(b::int(0))),
                b::loop_stmt(
                    Some(b::bin(b::var("i"), BinOp::Lt, b::int(3))),
                    b::block(vec![b::assign(b::var("i"), b::bin(b::var("i"), BinOp::Add, b::int(1)))]),
                ),
                b::ret(Some(b::var("i"))),
            ]),
        ))]);
        let mut mir = build_and_analyze(program);
        let mut vm = Vm::new();
        let result = vm.run_function(&mut mir, mir.entry_fn.unwrap(), Vec::new(), None).unwrap();
        assert_eq!(result.as_int(), Some(3));
    }

    #[test]
    fn division_by_zero_is_a_runtime_fault() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            vec![("x", TypeExpr::s32())],
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::bin(b::var("x"), BinOp::Div, b::var("x"))))]),
        ))]);
        let mut mir = build_and_analyze(program);
        let entry = mir.funcs.ids().find(|&f| mir.funcs[f].name.as_deref() == Some("main")).unwrap();
        let mut vm = Vm::new();
        let result = vm.run_function(&mut mir, entry, vec![ConstValue::scalar(mir.types.builtins["s32"], Scalar::Int(0))], None);
        assert_eq!(result, Err(RuntimeFault::DivByZero));
    }
}
