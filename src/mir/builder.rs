//! Builder (C2): lowers an [`ast::Program`](crate::ast::Program) into the
//! instruction-arena MIR of [`super::Mir`] (spec §4.2).
//!
//! The builder is purely syntactic: it never resolves a name. Every
//! identifier use becomes a `DeclRef`, left for the Analyzer to match
//! against a declaration — a function's own prototype, a global, or (for
//! locals) an earlier instruction in the same function — by walking the
//! instruction list it built (spec §4.2 "Rules for construction", §6
//! "Scope entries"). Every type annotation is wrapped in a synthetic
//! zero-argument function — a "type-resolver thunk" — whose body computes
//! the type value and returns it, so a forward reference to a
//! not-yet-declared struct is resolved by the same `Call`/analyze/comptime
//! machinery as any other call (spec §4.2, §9).

use crate::ast::{
    Attribute, Block, EnumDef, Expr, ExternFnDecl, FnDef, GlobalVarDecl, Item, Param, Program,
    Span, Spanned, StructDef, Stmt, TypeExpr,
};
use crate::error::{CompileError, CompileWarning};
use std::collections::HashMap;

use super::{BlockId, ConstValue, Flags, FuncId, Function, InstId, InstKind, MemberRef, Mir, Scalar, Variable};

/// Per-call result of [`lower_program`]: the global symbol table the
/// Analyzer seeds its waiting table from, plus any warnings the builder
/// could determine statically (spec §4.2 dead-code-after-terminator) and
/// any duplicate-symbol errors found while seeding that table (spec.md:48,
/// mirroring the original's `provide()` in `checker.c`/`mir.c`).
pub struct BuildResult {
    pub global_scope: HashMap<String, InstId>,
    pub warnings: Vec<CompileWarning>,
    pub errors: Vec<CompileError>,
}

pub fn lower_program(mir: &mut Mir, program: &Program) -> BuildResult {
    let global_block = mir.new_block(None, Some("@global".to_string()));
    let mut global_scope = HashMap::new();
    let mut builder = Builder {
        mir,
        global_block,
        cur: global_block,
        cur_func: None,
        break_targets: Vec::new(),
        continue_targets: Vec::new(),
        warnings: Vec::new(),
        errors: Vec::new(),
    };
    for item in &program.items {
        builder.lower_item(item, &mut global_scope);
    }
    BuildResult {
        global_scope,
        warnings: builder.warnings,
        errors: builder.errors,
    }
}

struct Builder<'m> {
    mir: &'m mut Mir,
    global_block: BlockId,
    cur: BlockId,
    cur_func: Option<FuncId>,
    break_targets: Vec<BlockId>,
    continue_targets: Vec<BlockId>,
    warnings: Vec<CompileWarning>,
    errors: Vec<CompileError>,
}

impl<'m> Builder<'m> {
    fn push(&mut self, kind: InstKind, span: Span) -> InstId {
        self.mir.push_instr(self.cur, kind, span)
    }

    fn push_global(&mut self, kind: InstKind, span: Span) -> InstId {
        self.mir.push_instr(self.global_block, kind, span)
    }

    fn builtin(&self, name: &str) -> crate::types::TypeId {
        *self
            .mir
            .types
            .builtins
            .get(name)
            .unwrap_or_else(|| panic!("missing builtin type '{name}'"))
    }

    // ---- items ----------------------------------------------------

    /// Lowers one top-level item and provides its name into `global_scope`
    /// (spec.md:48 "at most one scope entry per declared symbol"). Every
    /// item is still structurally lowered regardless of a name clash — its
    /// instructions just never become reachable by name — matching the
    /// original's `provide()` (`checker.c`, `mir.c`), which keeps the first
    /// declaration registered and reports the collision rather than
    /// overwriting it.
    fn lower_item(&mut self, item: &Item, global_scope: &mut HashMap<String, InstId>) {
        let (name, name_span) = match item {
            Item::FnDef(f) => (&f.name.node, f.name.span),
            Item::ExternFnDecl(x) => (&x.name.node, x.name.span),
            Item::StructDef(s) => (&s.name.node, s.name.span),
            Item::EnumDef(e) => (&e.name.node, e.name.span),
            Item::GlobalVar(g) => (&g.name.node, g.name.span),
        };
        let name = name.clone();
        let previous = global_scope.get(&name).copied();

        let id = match item {
            Item::FnDef(f) => self.lower_fn_def(f),
            Item::ExternFnDecl(x) => self.lower_extern_fn(x),
            Item::StructDef(s) => self.lower_struct_def(s),
            Item::EnumDef(e) => self.lower_enum_def(e),
            Item::GlobalVar(g) => self.lower_global_var(g),
        };

        match previous {
            Some(previous_id) => self.errors.push(CompileError::DuplicateSymbol {
                name,
                span: name_span,
                previous_span: self.mir.instrs[previous_id].span,
            }),
            None => {
                global_scope.insert(name, id);
            }
        }
    }

    fn lower_fn_def(&mut self, f: &FnDef) -> InstId {
        let flags = f.attributes.iter().fold(Flags::empty(), |acc, a| acc | attr_flag(a));

        let func = self.mir.funcs.alloc(Function {
            name: Some(f.name.node.clone()),
            decl_span: f.span,
            ty: self.mir.types.void,
            args: Vec::new(),
            locals: Vec::new(),
            linkage_name: f.name.node.clone(),
            flags,
            first_block: None,
            last_block: None,
            instr_counter: 0,
            ret_value_tmp: None,
            terminal_ret: None,
            first_unreachable: None,
            extern_lib: None,
            extern_symbol: None,
            is_vargs: false,
        });

        let init_block = self.mir.new_block(Some(func), Some("init".to_string()));
        self.mir.funcs.get_mut(func).first_block = Some(init_block);
        self.cur = init_block;
        let saved_func = self.cur_func;
        self.cur_func = Some(func);

        let param_ty_thunks = self.lower_params(func, &f.params);
        let ret_ty_thunk = self.build_type_thunk(&f.ret_ty.node, f.ret_ty.span);

        let proto = self.push_global(
            InstKind::FnProto {
                func,
                ret_ty_thunk: Some(ret_ty_thunk),
                param_ty_thunks,
            },
            f.span,
        );
        self.mir.globals.push(proto);

        let body_block = self.mir.new_block(Some(func), None);
        self.cur = init_block;
        self.push(InstKind::Br { target: body_block }, f.span);
        self.mir.funcs.get_mut(func).last_block = Some(body_block);

        self.cur = body_block;
        self.lower_block(&f.body);
        if self.mir.blocks[self.cur].terminal.is_none() {
            self.push(InstKind::Ret { value: None }, f.span);
        }

        self.cur_func = saved_func;
        if flags.contains(Flags::TEST) {
            self.mir.test_fns.push(func);
        }
        if f.name.node == "main" {
            self.mir.entry_fn = Some(func);
        }
        proto
    }

    fn lower_params(&mut self, func: FuncId, params: &[Param]) -> Vec<InstId> {
        let mut thunks = Vec::with_capacity(params.len());
        for (index, p) in params.iter().enumerate() {
            let ty_thunk = self.build_type_thunk(&p.ty.node, p.ty.span);
            thunks.push(ty_thunk);
            let var = self.mir.vars.alloc(Variable {
                name: Some(p.name.node.clone()),
                ty: self.mir.types.void,
                mutable: true,
                is_global: false,
                flags: Flags::empty(),
                rel_stack_ptr: 0,
                global_value: None,
                usage_count: 0,
                decl_inst: InstId::dangling(),
            });
            self.mir.funcs.get_mut(func).locals.push(var);
            let inst = self.push(
                InstKind::DeclArg {
                    arg_index: index,
                    var,
                    ty_thunk,
                },
                p.name.span,
            );
            self.mir.vars.get_mut(var).decl_inst = inst;
        }
        thunks
    }

    fn lower_extern_fn(&mut self, x: &ExternFnDecl) -> InstId {
        self.cur = self.global_block;
        let func = self.mir.funcs.alloc(Function {
            name: Some(x.name.node.clone()),
            decl_span: x.span,
            ty: self.mir.types.void,
            args: Vec::new(),
            locals: Vec::new(),
            linkage_name: x.name.node.clone(),
            flags: Flags::EXTERN,
            first_block: None,
            last_block: None,
            instr_counter: 0,
            ret_value_tmp: None,
            terminal_ret: None,
            first_unreachable: None,
            extern_lib: x.lib.clone(),
            extern_symbol: Some(x.name.node.clone()),
            is_vargs: x.vargs,
        });
        let param_ty_thunks = x
            .params
            .iter()
            .map(|p| self.build_type_thunk(&p.ty.node, p.ty.span))
            .collect();
        let ret_ty_thunk = self.build_type_thunk(&x.ret_ty.node, x.ret_ty.span);
        let proto = self.push_global(
            InstKind::FnProto {
                func,
                ret_ty_thunk: Some(ret_ty_thunk),
                param_ty_thunks,
            },
            x.span,
        );
        self.mir.globals.push(proto);
        proto
    }

    fn lower_struct_def(&mut self, s: &StructDef) -> InstId {
        self.cur = self.global_block;
        let fields = s
            .fields
            .iter()
            .map(|fld| (fld.name.node.clone(), self.build_type_thunk(&fld.ty.node, fld.ty.span)))
            .collect();
        let ts = self.push_global(
            InstKind::TypeStruct {
                name: Some(s.name.node.clone()),
                fields,
                is_packed: s.is_packed,
            },
            s.span,
        );
        let var = self.mir.vars.alloc(Variable {
            name: Some(s.name.node.clone()),
            ty: self.mir.types.type_of_types,
            mutable: false,
            is_global: true,
            flags: Flags::empty(),
            rel_stack_ptr: 0,
            global_value: None,
            usage_count: 0,
            decl_inst: InstId::dangling(),
        });
        let decl = self.push_global(
            InstKind::DeclVar {
                var,
                type_thunk: None,
                init: Some(ts),
            },
            s.span,
        );
        self.mir.vars.get_mut(var).decl_inst = decl;
        self.mir.globals.push(decl);
        decl
    }

    fn lower_enum_def(&mut self, e: &EnumDef) -> InstId {
        self.cur = self.global_block;
        let base_thunk = match &e.base_ty {
            Some(t) => self.build_type_thunk(&t.node, t.span),
            None => self.build_type_thunk(&TypeExpr::s32(), e.span),
        };
        let mut next_val = 0i64;
        let variants = e
            .variants
            .iter()
            .map(|v| {
                let val = v.value.unwrap_or(next_val);
                next_val = val + 1;
                (v.name.node.clone(), Some(val))
            })
            .collect();
        let te = self.push_global(
            InstKind::TypeEnum {
                name: Some(e.name.node.clone()),
                base: base_thunk,
                variants,
            },
            e.span,
        );
        let var = self.mir.vars.alloc(Variable {
            name: Some(e.name.node.clone()),
            ty: self.mir.types.type_of_types,
            mutable: false,
            is_global: true,
            flags: Flags::empty(),
            rel_stack_ptr: 0,
            global_value: None,
            usage_count: 0,
            decl_inst: InstId::dangling(),
        });
        let decl = self.push_global(
            InstKind::DeclVar {
                var,
                type_thunk: None,
                init: Some(te),
            },
            e.span,
        );
        self.mir.vars.get_mut(var).decl_inst = decl;
        self.mir.globals.push(decl);
        decl
    }

    fn lower_global_var(&mut self, g: &GlobalVarDecl) -> InstId {
        self.cur = self.global_block;
        let type_thunk = g.ty.as_ref().map(|t| self.build_type_thunk(&t.node, t.span));
        let init = g.init.as_ref().map(|e| self.lower_expr(e));
        let flags = g.attributes.iter().fold(Flags::empty(), |acc, a| acc | attr_flag(a));
        let var = self.mir.vars.alloc(Variable {
            name: Some(g.name.node.clone()),
            ty: self.mir.types.void,
            mutable: g.mutable,
            is_global: true,
            flags,
            rel_stack_ptr: 0,
            global_value: None,
            usage_count: 0,
            decl_inst: InstId::dangling(),
        });
        let decl = self.push_global(InstKind::DeclVar { var, type_thunk, init }, g.span);
        self.mir.vars.get_mut(var).decl_inst = decl;
        self.mir.globals.push(decl);
        decl
    }

    // ---- type-resolver thunks --------------------------------------

    /// Wraps `texpr` in a synthetic `() -> type` function and returns the
    /// `Call` to it, emitted into the current block (spec §4.2).
    fn build_type_thunk(&mut self, texpr: &TypeExpr, span: Span) -> InstId {
        let thunk_ty = self.mir.types.intern_fn(Vec::new(), self.mir.types.type_of_types, false);
        let func = self.mir.funcs.alloc(Function {
            name: None,
            decl_span: span,
            ty: thunk_ty,
            args: Vec::new(),
            locals: Vec::new(),
            linkage_name: format!("__type_thunk_{}", self.mir.funcs.len()),
            flags: Flags::COMPILER_INTRINSIC,
            first_block: None,
            last_block: None,
            instr_counter: 0,
            ret_value_tmp: None,
            terminal_ret: None,
            first_unreachable: None,
            extern_lib: None,
            extern_symbol: None,
            is_vargs: false,
        });
        let body = self.mir.new_block(Some(func), None);
        {
            let f = self.mir.funcs.get_mut(func);
            f.first_block = Some(body);
            f.last_block = Some(body);
        }

        let saved_cur = self.cur;
        let saved_func = self.cur_func;
        self.cur = body;
        self.cur_func = Some(func);
        let value = self.emit_type_value(texpr, span);
        let ret = self.push(InstKind::Ret { value: Some(value) }, span);
        self.mir.funcs.get_mut(func).terminal_ret = Some(ret);
        self.cur = saved_cur;
        self.cur_func = saved_func;

        // `ret_ty_thunk: None` — a thunk's own return type is always `type`,
        // which needs no further resolution; this is what stops thunks from
        // wrapping thunks forever.
        let proto = self.push_global(
            InstKind::FnProto {
                func,
                ret_ty_thunk: None,
                param_ty_thunks: Vec::new(),
            },
            span,
        );
        self.push(InstKind::Call { callee: proto, args: Vec::new() }, span)
    }

    fn emit_const_type(&mut self, ty: crate::types::TypeId, span: Span) -> InstId {
        let type_of_types = self.mir.types.type_of_types;
        self.push(
            InstKind::Const {
                value: ConstValue::scalar(type_of_types, Scalar::Type(ty)),
            },
            span,
        )
    }

    fn emit_type_value(&mut self, texpr: &TypeExpr, span: Span) -> InstId {
        match texpr {
            TypeExpr::Void => {
                let t = self.mir.types.void;
                self.emit_const_type(t, span)
            }
            TypeExpr::Bool => {
                let t = self.mir.types.bool_;
                self.emit_const_type(t, span)
            }
            TypeExpr::Int { bits, signed } => {
                let t = self.mir.types.intern_int(*bits, *signed);
                self.emit_const_type(t, span)
            }
            TypeExpr::Real { bits } => {
                let t = self.mir.types.intern_real(*bits);
                self.emit_const_type(t, span)
            }
            TypeExpr::StringT => {
                let t = self.mir.types.string;
                self.emit_const_type(t, span)
            }
            TypeExpr::Null => {
                let t = self.mir.types.null;
                self.emit_const_type(t, span)
            }
            TypeExpr::TypeOfTypes => {
                let t = self.mir.types.type_of_types;
                self.emit_const_type(t, span)
            }
            TypeExpr::VArgs => {
                let t = self.mir.types.intern_vargs();
                self.emit_const_type(t, span)
            }
            TypeExpr::Ptr(inner) => {
                let pointee = self.emit_type_value(inner, span);
                self.push(InstKind::TypePtr { pointee }, span)
            }
            TypeExpr::Array(inner, len) => {
                let elem = self.emit_type_value(inner, span);
                self.push(InstKind::TypeArray { elem, len: *len }, span)
            }
            TypeExpr::Slice(inner) => {
                let elem = self.emit_type_value(inner, span);
                self.push(InstKind::TypeSlice { elem }, span)
            }
            TypeExpr::Fn { args, ret, vargs } => {
                let arg_insts = args.iter().map(|a| self.emit_type_value(a, span)).collect();
                let ret_inst = self.emit_type_value(ret, span);
                self.push(
                    InstKind::TypeFn {
                        args: arg_insts,
                        ret: ret_inst,
                        vargs: *vargs,
                    },
                    span,
                )
            }
            TypeExpr::Named(name) => self.push(InstKind::DeclRef { name: name.clone() }, span),
        }
    }

    // ---- statements -------------------------------------------------

    /// Lowers `block`'s statements into the current basic block. Stops at
    /// the first statement that always transfers control away (`return`,
    /// `break`, `continue`), warning about anything left dangling after it.
    fn lower_block(&mut self, block: &Block) {
        for (i, stmt) in block.stmts.iter().enumerate() {
            if self.lower_stmt(stmt) {
                if let Some(next) = block.stmts.get(i + 1) {
                    self.warnings.push(CompileWarning::UnreachableCode {
                        span: self.stmt_span(next),
                    });
                }
                return;
            }
        }
    }

    fn stmt_span(&self, s: &Stmt) -> Span {
        match s {
            Stmt::Expr(e) => e.span,
            Stmt::DeclVar { span, .. } => *span,
            Stmt::Assign { target, .. } => target.span,
            Stmt::CompoundAssign { target, .. } => target.span,
            Stmt::If { cond, .. } => cond.span,
            Stmt::Loop { cond, .. } => cond.as_ref().map(|c| c.span).unwrap_or(Span::synthetic()),
            Stmt::Break | Stmt::Continue => Span::synthetic(),
            Stmt::Return(v) => v.as_ref().map(|e| e.span).unwrap_or(Span::synthetic()),
            Stmt::Block(_) => Span::synthetic(),
        }
    }

    /// Returns `true` when the statement unconditionally transfers control
    /// out of the enclosing block (so anything following it is dead).
    fn lower_stmt(&mut self, stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Expr(e) => {
                self.lower_expr(e);
                false
            }
            Stmt::DeclVar { name, ty, init, mutable, span } => {
                let type_thunk = ty.as_ref().map(|t| self.build_type_thunk(&t.node, t.span));
                let init_inst = init.as_ref().map(|e| self.lower_expr(e));
                let var = self.mir.vars.alloc(Variable {
                    name: Some(name.node.clone()),
                    ty: self.mir.types.void,
                    mutable: *mutable,
                    is_global: false,
                    flags: Flags::empty(),
                    rel_stack_ptr: 0,
                    global_value: None,
                    usage_count: 0,
                    decl_inst: InstId::dangling(),
                });
                if let Some(f) = self.cur_func {
                    self.mir.funcs.get_mut(f).locals.push(var);
                }
                let inst = self.push(
                    InstKind::DeclVar {
                        var,
                        type_thunk,
                        init: init_inst,
                    },
                    *span,
                );
                self.mir.vars.get_mut(var).decl_inst = inst;
                false
            }
            Stmt::Assign { target, value } => {
                let ptr = self.lower_lvalue_ptr(&target.node, target.span);
                let val = self.lower_expr(value);
                self.push(InstKind::Store { value: val, ptr }, value.span);
                false
            }
            Stmt::CompoundAssign { target, op, value } => {
                let ptr = self.lower_lvalue_ptr(&target.node, target.span);
                let cur_val = self.push(InstKind::Load { ptr }, target.span);
                let rhs = self.lower_expr(value);
                let result = self.push(
                    InstKind::Binop {
                        op: *op,
                        lhs: cur_val,
                        rhs,
                    },
                    value.span,
                );
                self.push(InstKind::Store { value: result, ptr }, value.span);
                false
            }
            Stmt::If { cond, then_block, else_block } => {
                let condval = self.lower_expr(cond);
                let then_b = self.mir.new_block(self.cur_func, None);
                let end_b = self.mir.new_block(self.cur_func, None);
                let else_b = if else_block.is_some() {
                    self.mir.new_block(self.cur_func, None)
                } else {
                    end_b
                };
                self.push(
                    InstKind::CondBr {
                        cond: condval,
                        then_block: then_b,
                        else_block: else_b,
                    },
                    cond.span,
                );
                self.cur = then_b;
                self.lower_block(then_block);
                if self.mir.blocks[self.cur].terminal.is_none() {
                    self.push(InstKind::Br { target: end_b }, cond.span);
                }
                if let Some(eb) = else_block {
                    self.cur = else_b;
                    self.lower_block(eb);
                    if self.mir.blocks[self.cur].terminal.is_none() {
                        self.push(InstKind::Br { target: end_b }, cond.span);
                    }
                }
                self.cur = end_b;
                false
            }
            Stmt::Loop { cond, body } => {
                let decide_b = self.mir.new_block(self.cur_func, None);
                let body_b = self.mir.new_block(self.cur_func, None);
                let end_b = self.mir.new_block(self.cur_func, None);
                self.push(InstKind::Br { target: decide_b }, Span::synthetic());
                self.cur = decide_b;
                match cond {
                    Some(c) => {
                        let v = self.lower_expr(c);
                        self.push(
                            InstKind::CondBr {
                                cond: v,
                                then_block: body_b,
                                else_block: end_b,
                            },
                            c.span,
                        );
                    }
                    None => {
                        self.push(InstKind::Br { target: body_b }, Span::synthetic());
                    }
                }
                self.break_targets.push(end_b);
                self.continue_targets.push(decide_b);
                self.cur = body_b;
                self.lower_block(body);
                if self.mir.blocks[self.cur].terminal.is_none() {
                    self.push(InstKind::Br { target: decide_b }, Span::synthetic());
                }
                self.break_targets.pop();
                self.continue_targets.pop();
                self.cur = end_b;
                false
            }
            Stmt::Break => {
                let target = *self
                    .break_targets
                    .last()
                    .expect("builder invariant: break only lowered inside a loop body");
                self.push(InstKind::Br { target }, Span::synthetic());
                true
            }
            Stmt::Continue => {
                let target = *self
                    .continue_targets
                    .last()
                    .expect("builder invariant: continue only lowered inside a loop body");
                self.push(InstKind::Br { target }, Span::synthetic());
                true
            }
            Stmt::Return(v) => {
                let span = v.as_ref().map(|e| e.span).unwrap_or(Span::synthetic());
                let val = v.as_ref().map(|e| self.lower_expr(e));
                self.push(InstKind::Ret { value: val }, span);
                true
            }
            Stmt::Block(b) => {
                self.lower_block(b);
                false
            }
        }
    }

    // ---- expressions --------------------------------------------------

    /// Lowers an lvalue expression to the `InstId` of a pointer instruction
    /// (`AddrOf`/`ElemPtr`/`MemberPtr`) that can be fed to `Store` or `Load`.
    fn lower_lvalue_ptr(&mut self, expr: &Expr, span: Span) -> InstId {
        match expr {
            Expr::Var(name) => self.lower_var_addr(name, span),
            Expr::Deref(inner) => self.lower_expr(inner),
            Expr::Index { base, index } => {
                let base_ptr = self.lower_lvalue_ptr(&base.node, base.span);
                let idx = self.lower_expr(index);
                self.push(
                    InstKind::ElemPtr {
                        base: base_ptr,
                        index: idx,
                    },
                    span,
                )
            }
            Expr::Member { base, field } => {
                let base_ptr = self.lower_lvalue_ptr(&base.node, base.span);
                let member = member_ref(field);
                self.push(
                    InstKind::MemberPtr {
                        base: base_ptr,
                        member,
                    },
                    span,
                )
            }
            other => unreachable!("not an lvalue expression: {other:?}"),
        }
    }

    fn lower_var_addr(&mut self, name: &str, span: Span) -> InstId {
        let r = self.push(InstKind::DeclRef { name: name.to_string() }, span);
        self.push(InstKind::AddrOf { target: r }, span)
    }

    fn lower_expr(&mut self, e: &Spanned<Expr>) -> InstId {
        let span = e.span;
        match &e.node {
            Expr::IntLit(n) => {
                let ty = self.builtin("s32");
                self.push(
                    InstKind::Const {
                        value: ConstValue::scalar(ty, Scalar::Int(*n)),
                    },
                    span,
                )
            }
            Expr::FloatLit(f) => {
                let ty = self.builtin("f64");
                self.push(
                    InstKind::Const {
                        value: ConstValue::scalar(ty, Scalar::Real(*f)),
                    },
                    span,
                )
            }
            Expr::BoolLit(b) => {
                let ty = self.mir.types.bool_;
                self.push(
                    InstKind::Const {
                        value: ConstValue::scalar(ty, Scalar::Bool(*b)),
                    },
                    span,
                )
            }
            Expr::StringLit(s) => {
                let ty = self.mir.types.string;
                self.push(
                    InstKind::Const {
                        value: ConstValue::scalar(ty, Scalar::Str(s.clone())),
                    },
                    span,
                )
            }
            Expr::NullLit => {
                let ty = self.mir.types.null;
                self.push(
                    InstKind::Const {
                        value: ConstValue::scalar(ty, Scalar::Ptr(0)),
                    },
                    span,
                )
            }
            Expr::Var(name) => {
                let ptr = self.lower_var_addr(name, span);
                self.push(InstKind::Load { ptr }, span)
            }
            Expr::Binary { left, op, right } if op.is_logical() => {
                self.lower_logical(left, *op, right, span)
            }
            Expr::Binary { left, op, right } => {
                let l = self.lower_expr(left);
                let r = self.lower_expr(right);
                self.push(InstKind::Binop { op: *op, lhs: l, rhs: r }, span)
            }
            Expr::Unary { op, expr } => {
                let v = self.lower_expr(expr);
                self.push(InstKind::Unop { op: *op, operand: v }, span)
            }
            Expr::AddrOf(inner) => self.lower_lvalue_ptr(&inner.node, inner.span),
            Expr::Deref(inner) => {
                let ptr = self.lower_expr(inner);
                self.push(InstKind::Load { ptr }, span)
            }
            Expr::Index { base, index } => {
                let base_ptr = self.lower_lvalue_ptr(&base.node, base.span);
                let idx = self.lower_expr(index);
                let elem_ptr = self.push(
                    InstKind::ElemPtr {
                        base: base_ptr,
                        index: idx,
                    },
                    span,
                );
                self.push(InstKind::Load { ptr: elem_ptr }, span)
            }
            Expr::Member { base, field } => {
                let base_ptr = self.lower_lvalue_ptr(&base.node, base.span);
                let member = member_ref(field);
                let member_ptr = self.push(
                    InstKind::MemberPtr {
                        base: base_ptr,
                        member,
                    },
                    span,
                );
                self.push(InstKind::Load { ptr: member_ptr }, span)
            }
            Expr::Call { callee, args } => {
                let callee_inst = self.push(InstKind::DeclRef { name: callee.clone() }, span);
                let arg_insts = args.iter().map(|a| self.lower_expr(a)).collect();
                self.push(
                    InstKind::Call {
                        callee: callee_inst,
                        args: arg_insts,
                    },
                    span,
                )
            }
            Expr::Cast { expr, ty } => {
                let operand = self.lower_expr(expr);
                let target_ty_thunk = self.build_type_thunk(&ty.node, ty.span);
                self.push(
                    InstKind::Cast {
                        op: None,
                        operand,
                        target_ty_thunk,
                    },
                    span,
                )
            }
            Expr::Compound { ty, fields } => {
                let ty_thunk = self.build_type_thunk(&ty.node, ty.span);
                let field_insts = fields
                    .iter()
                    .map(|(name, val)| (name.clone(), self.lower_expr(val)))
                    .collect();
                self.push(
                    InstKind::Compound {
                        ty_thunk,
                        fields: field_insts,
                    },
                    span,
                )
            }
            Expr::VArgsLit(values) => {
                let vs = values.iter().map(|v| self.lower_expr(v)).collect();
                self.push(InstKind::VArgs { values: vs }, span)
            }
            Expr::Sizeof(t) => {
                let ty_thunk = self.build_type_thunk(&t.node, t.span);
                self.push(InstKind::Sizeof { ty_thunk }, span)
            }
            Expr::Alignof(t) => {
                let ty_thunk = self.build_type_thunk(&t.node, t.span);
                self.push(InstKind::Alignof { ty_thunk }, span)
            }
            Expr::TypeInfo(t) => {
                let ty_thunk = self.build_type_thunk(&t.node, t.span);
                self.push(InstKind::TypeInfo { ty_thunk }, span)
            }
            Expr::ToAny(inner) => {
                let v = self.lower_expr(inner);
                self.push(InstKind::ToAny { expr: v }, span)
            }
        }
    }

    /// Short-circuit lowering for `&&`/`||`: a conditional branch around the
    /// right-hand side, merged by a `Phi` on the continuation block
    /// (spec §4.2 "Logical expressions").
    fn lower_logical(
        &mut self,
        left: &Spanned<Expr>,
        op: crate::ast::BinOp,
        right: &Spanned<Expr>,
        span: Span,
    ) -> InstId {
        use crate::ast::BinOp;

        let lhs = self.lower_expr(left);
        let orig_block = self.cur;
        let bool_ty = self.mir.types.bool_;
        let shortcut_val = self.push(
            InstKind::Const {
                value: ConstValue::scalar(bool_ty, Scalar::Bool(op == BinOp::LOr)),
            },
            span,
        );

        let rhs_block = self.mir.new_block(self.cur_func, None);
        let cont_block = self.mir.new_block(self.cur_func, None);
        if op == BinOp::LAnd {
            self.push(
                InstKind::CondBr {
                    cond: lhs,
                    then_block: rhs_block,
                    else_block: cont_block,
                },
                span,
            );
        } else {
            self.push(
                InstKind::CondBr {
                    cond: lhs,
                    then_block: cont_block,
                    else_block: rhs_block,
                },
                span,
            );
        }

        self.cur = rhs_block;
        let rhs_val = self.lower_expr(right);
        self.push(InstKind::Br { target: cont_block }, span);
        let rhs_end_block = self.cur;

        self.cur = cont_block;
        self.push(
            InstKind::Phi {
                incoming: vec![(shortcut_val, orig_block), (rhs_val, rhs_end_block)],
            },
            span,
        )
    }
}

fn attr_flag(a: &Attribute) -> Flags {
    match a {
        Attribute::Private => Flags::PRIVATE,
        Attribute::Inline => Flags::INLINE,
        Attribute::NoInline => Flags::NO_INLINE,
        Attribute::Test => Flags::TEST,
        Attribute::CompilerIntrinsic => Flags::COMPILER_INTRINSIC,
    }
}

fn member_ref(field: &str) -> MemberRef {
    match field {
        "len" => MemberRef::ArrayLen,
        "ptr" => MemberRef::ArrayPtr,
        other => MemberRef::Named(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as b;

    #[test]
    fn lowers_entry_point_returning_a_constant() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::int(0)))]),
        ))]);
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, &program);
        assert!(result.global_scope.contains_key("main"));
        assert!(mir.entry_fn.is_some());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn loop_with_break_lowers_without_panicking() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::Void,
            b::block(vec![
                b::let_stmt("i", None, Some(b::int(0))),
                b::loop_stmt(
                    Some(b::bin(b::var("i"), crate::ast::BinOp::Lt, b::int(3))),
                    b::block(vec![Stmt::Break]),
                ),
                b::ret(None),
            ]),
        ))]);
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, &program);
        assert!(result.global_scope.contains_key("main"));
    }

    #[test]
    fn dead_code_after_return_is_warned_about() {
        let program = b::program(vec![Item::FnDef(b::func(
            "main",
            Vec::new(),
            TypeExpr::Void,
            b::block(vec![b::ret(None), b::ret(None)]),
        ))]);
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, &program);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn redeclaring_a_global_name_reports_duplicate_symbol() {
        let program = b::program(vec![
            Item::FnDef(b::func("helper", Vec::new(), TypeExpr::Void, b::block(vec![b::ret(None)]))),
            Item::FnDef(b::func("helper", Vec::new(), TypeExpr::Void, b::block(vec![b::ret(None)]))),
            Item::FnDef(b::test_func("main", b::block(vec![b::ret(None)]))),
        ]);
        let mut mir = Mir::new();
        let result = lower_program(&mut mir, &program);
        assert_eq!(result.errors.len(), 1);
        match &result.errors[0] {
            crate::error::CompileError::DuplicateSymbol { name, .. } => assert_eq!(name, "helper"),
            other => panic!("expected DuplicateSymbol, got {other:?}"),
        }
        // the first declaration keeps the scope entry, not the second.
        assert!(result.global_scope.contains_key("helper"));
    }
}
