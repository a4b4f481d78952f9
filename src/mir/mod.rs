//! Mid-level Intermediate Representation data model (spec §3, §4.1, §4.2).
//!
//! Everything here is arena-owned: instructions, basic blocks, functions and
//! variables are all handles (`InstId`/`BlockId`/`FuncId`/`VarId`) into the
//! arenas on [`Mir`]. Nothing is individually freed — the whole arena set is
//! dropped together when the module goes away (spec §3 "Lifecycle"), which
//! is what lets a function's prototype be reachable from its own call
//! instructions without any reference-counted teardown.

pub mod builder;

use crate::arena::{Arena, Id};
use crate::ast::{BinOp, Span, UnOp};
use crate::types::{CastOp, TypeArena, TypeId};
use bitflags::bitflags;
use std::collections::HashMap;

pub type InstId = Id<Instruction>;
pub type BlockId = Id<BasicBlock>;
pub type FuncId = Id<Function>;
pub type VarId = Id<Variable>;

bitflags! {
    /// Shared flag set for variables and functions (spec §3 "flags bitset
    /// (extern, compiler-intrinsic, test, inline, no-inline, private)").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        const EXTERN             = 0b0000_0001;
        const COMPILER_INTRINSIC = 0b0000_0010;
        const TEST                = 0b0000_0100;
        const INLINE              = 0b0000_1000;
        const NO_INLINE           = 0b0001_0000;
        const PRIVATE             = 0b0010_0000;
    }
}

/// Address mode of a value (spec §3 "Constant value").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    LValue,
    LValueConst,
    RValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Real(f64),
    Bool(bool),
    Type(TypeId),
    Func(FuncId),
    /// Absolute VM stack/static address; `0` is the null sentinel.
    Ptr(u64),
    /// String literal contents. The source language's `string` is a
    /// `{ptr, len}` slice at runtime, but a comptime constant has no backing
    /// stack memory to point `ptr` at, so a literal's bytes are carried
    /// directly rather than synthesizing a fake address.
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstData {
    Scalar(Scalar),
    Struct(Vec<ConstValue>),
    Array(Vec<ConstValue>),
    ZeroInit,
}

/// A value as both an operand and the payload of a comptime instruction
/// (spec §3 "Constant value", §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstValue {
    pub ty: TypeId,
    pub data: ConstData,
    pub addr_mode: AddrMode,
    pub comptime: bool,
}

impl ConstValue {
    pub fn scalar(ty: TypeId, s: Scalar) -> Self {
        Self {
            ty,
            data: ConstData::Scalar(s),
            addr_mode: AddrMode::RValue,
            comptime: true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.data {
            ConstData::Scalar(Scalar::Int(n)) => Some(n),
            ConstData::Scalar(Scalar::UInt(n)) => Some(n as i64),
            ConstData::Scalar(Scalar::Bool(b)) => Some(b as i64),
            ConstData::Scalar(Scalar::Ptr(p)) => Some(p as i64),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self.data {
            ConstData::Scalar(Scalar::Real(f)) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data {
            ConstData::Scalar(Scalar::Bool(b)) => Some(b),
            ConstData::Scalar(Scalar::Int(n)) => Some(n != 0),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeId> {
        match self.data {
            ConstData::Scalar(Scalar::Type(t)) => Some(t),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<FuncId> {
        match self.data {
            ConstData::Scalar(Scalar::Func(f)) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ConstData::Scalar(Scalar::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A type-carrying slot attached to every instruction (spec §3
/// "Instruction... a value slot").
#[derive(Debug, Clone, Default)]
pub struct ValueSlot {
    pub ty: Option<TypeId>,
    pub const_value: Option<ConstValue>,
    pub comptime: bool,
    pub addr_mode: AddrMode2,
}

/// `AddrMode` without a meaningful default is awkward in a `Default`-derived
/// struct; this thin wrapper just gives `ValueSlot` a sane zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrMode2(pub AddrMode);
impl Default for AddrMode2 {
    fn default() -> Self {
        AddrMode2(AddrMode::RValue)
    }
}

/// How a struct member or variant is referenced from `MemberPtr`
/// (spec §4.2, §4.4 "for arrays `.len`/`.ptr` use synthesized offsets").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    Named(String),
    ArrayLen,
    ArrayPtr,
}

/// The ~35 instruction kinds of spec §4.2, grouped as in the spec table.
#[derive(Debug, Clone)]
pub enum InstKind {
    // Structural
    Block,
    FnProto {
        func: FuncId,
        /// `Call` to the synthetic thunk resolving this function's return
        /// type (spec §4.2 "every type expression is wrapped in a
        /// type-resolver thunk"). `None` only for a type-resolver thunk's
        /// own signature, whose return type (`type`) needs no resolution —
        /// the base case that stops thunks from wrapping thunks forever.
        ret_ty_thunk: Option<InstId>,
        param_ty_thunks: Vec<InstId>,
    },

    // Declarations
    DeclVar {
        var: VarId,
        /// `Call` to the synthetic type-resolver thunk for this
        /// declaration's type annotation, if any (spec §4.2).
        type_thunk: Option<InstId>,
        init: Option<InstId>,
    },
    DeclMember {
        struct_ty: TypeId,
        index: usize,
    },
    DeclVariant {
        enum_ty: TypeId,
        index: usize,
    },
    DeclArg {
        arg_index: usize,
        var: VarId,
        /// `Call` to this parameter's type-resolver thunk; resolved
        /// independently of the owning `FnProto` so the two don't form a
        /// dependency cycle (spec §4.2).
        ty_thunk: InstId,
    },

    // References
    DeclRef {
        name: String,
    },
    /// A `DeclRef` rewritten in place once the analyzer resolves it.
    DeclDirectRef {
        target: InstId,
    },
    Arg {
        index: usize,
    },

    // Values
    Const {
        value: ConstValue,
    },
    Compound {
        ty_thunk: InstId,
        fields: Vec<(Option<String>, InstId)>,
    },
    VArgs {
        values: Vec<InstId>,
    },

    // Memory
    Load {
        ptr: InstId,
    },
    Store {
        value: InstId,
        ptr: InstId,
    },
    AddrOf {
        target: InstId,
    },
    ElemPtr {
        base: InstId,
        index: InstId,
    },
    MemberPtr {
        base: InstId,
        member: MemberRef,
    },

    // Arithmetic
    Binop {
        op: BinOp,
        lhs: InstId,
        rhs: InstId,
    },
    Unop {
        op: UnOp,
        operand: InstId,
    },
    Cast {
        /// `None` until the analyzer selects an opcode from the fixed table
        /// (spec §4.3 "Cast opcode selection").
        op: Option<CastOp>,
        operand: InstId,
        target_ty_thunk: InstId,
    },

    // Control flow
    Br {
        target: BlockId,
    },
    CondBr {
        cond: InstId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        value: InstId,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Ret {
        value: Option<InstId>,
    },
    Unreachable,
    Phi {
        incoming: Vec<(InstId, BlockId)>,
    },

    // Call
    Call {
        callee: InstId,
        args: Vec<InstId>,
    },

    // Type constructors
    TypeFn {
        args: Vec<InstId>,
        ret: InstId,
        vargs: bool,
    },
    TypeStruct {
        name: Option<String>,
        fields: Vec<(String, InstId)>,
        is_packed: bool,
    },
    TypeEnum {
        name: Option<String>,
        base: InstId,
        variants: Vec<(String, Option<i64>)>,
    },
    TypePtr {
        pointee: InstId,
    },
    TypeArray {
        elem: InstId,
        len: usize,
    },
    TypeSlice {
        elem: InstId,
    },
    TypeVArgs,

    // Reflection
    Sizeof {
        ty_thunk: InstId,
    },
    Alignof {
        ty_thunk: InstId,
    },
    TypeInfo {
        ty_thunk: InstId,
    },
    ToAny {
        expr: InstId,
    },

    // Analyzer directives
    SetInitializer {
        var: VarId,
        value: InstId,
    },
}

/// One MIR instruction (spec §3 "Instruction").
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstId,
    pub owner_block: BlockId,
    pub prev: Option<InstId>,
    pub next: Option<InstId>,
    pub value: ValueSlot,
    pub ref_count: u32,
    pub analyzed: bool,
    pub unreachable: bool,
    pub span: Span,
    pub kind: InstKind,
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }
}

/// Straight-line instruction sequence ending in exactly one terminator
/// (spec §3 "Basic block").
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: Option<String>,
    pub entry: Option<InstId>,
    pub last: Option<InstId>,
    pub terminal: Option<InstId>,
    /// `None` for the implicit global block (spec §3).
    pub owner_fn: Option<FuncId>,
    pub emit_to_llvm: bool,
}

impl BasicBlock {
    fn empty(owner_fn: Option<FuncId>, label: Option<String>) -> Self {
        Self {
            label,
            entry: None,
            last: None,
            terminal: None,
            owner_fn,
            emit_to_llvm: true,
        }
    }
}

/// A named, indexed argument descriptor of a function type
/// (spec §3 "Member / Argument / Variant").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPassingMode {
    Direct,
    PromotedToIN(u8),
    ByVal,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub ty: TypeId,
    pub index: usize,
    pub llvm_arg_index: usize,
    pub passing_mode: ArgPassingMode,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub decl_span: Span,
    pub ty: TypeId,
    pub args: Vec<Argument>,
    pub locals: Vec<VarId>,
    pub linkage_name: String,
    pub flags: Flags,
    pub first_block: Option<BlockId>,
    pub last_block: Option<BlockId>,
    pub instr_counter: u32,
    pub ret_value_tmp: Option<VarId>,
    pub terminal_ret: Option<InstId>,
    pub first_unreachable: Option<Span>,
    /// FFI descriptor (spec §3 "Function... an FFI descriptor (extern entry
    /// pointer and dynamic callback handle)"). The resolved symbol itself
    /// lives in `vm::ffi::FfiTable`, keyed by this function's id, so that
    /// the `libloading::Library` it came from can outlive any one call.
    pub extern_lib: Option<String>,
    pub extern_symbol: Option<String>,
    pub is_vargs: bool,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Option<String>,
    pub ty: TypeId,
    pub mutable: bool,
    pub is_global: bool,
    pub flags: Flags,
    /// Frame-relative offset for locals, written by `Stack::alloc_var`.
    pub rel_stack_ptr: i32,
    pub global_value: Option<ConstValue>,
    pub usage_count: u32,
    /// The `DeclVar`/`DeclArg` instruction that introduces this variable,
    /// patched in right after that instruction is pushed. Lets the Analyzer
    /// resolve a local `DeclRef` by walking a function's locals for the
    /// nearest preceding declaration with a matching name (spec §6 "Scope
    /// entries"), without needing a separate lexical-scope stack.
    pub decl_inst: InstId,
}

/// The module under construction / analysis (spec §3 "Module"). The fully
/// analyzed form exposed to collaborators (spec §6) is this same struct:
/// by the time the analyzer is done, `globals`/`rtti`/`test_fns`/`entry_fn`
/// are all populated and nothing more is mutated except by the VM's
/// comptime evaluator filling in `value.const_value` slots.
pub struct Mir {
    pub instrs: Arena<Instruction>,
    pub blocks: Arena<BasicBlock>,
    pub funcs: Arena<Function>,
    pub vars: Arena<Variable>,
    pub types: TypeArena,

    /// Global instructions: function prototypes and global variable
    /// declarations, in declaration order (spec §3 "Module").
    pub globals: Vec<InstId>,
    /// RTTI global variable per type, keyed by `Type::id_hash`
    /// (spec §4.4 `TypeInfo`, §9 "RTTI lazy materialization").
    pub rtti: HashMap<u64, VarId>,
    pub test_fns: Vec<FuncId>,
    pub entry_fn: Option<FuncId>,

    #[cfg(feature = "llvm")]
    pub llvm_context: Option<inkwell::context::Context>,
}

impl Mir {
    pub fn new() -> Self {
        Self {
            instrs: Arena::new(),
            blocks: Arena::new(),
            funcs: Arena::new(),
            vars: Arena::new(),
            types: TypeArena::new(),
            globals: Vec::new(),
            rtti: HashMap::new(),
            test_fns: Vec::new(),
            entry_fn: None,
            #[cfg(feature = "llvm")]
            llvm_context: Some(crate::codegen::LlvmContext::create()),
        }
    }

    /// Append `inst` to the tail of `block`'s instruction list, linking it
    /// to its predecessor (spec §4.2 "Rules for construction").
    pub fn push_instr(&mut self, block: BlockId, kind: InstKind, span: Span) -> InstId {
        let id = self.instrs.alloc(Instruction {
            id: Id::dangling(),
            owner_block: block,
            prev: None,
            next: None,
            value: ValueSlot::default(),
            ref_count: 0,
            analyzed: false,
            unreachable: false,
            span,
            kind,
        });
        self.instrs.get_mut(id).id = id;

        let prev_last = self.blocks[block].last;
        if let Some(prev_last) = prev_last {
            self.instrs.get_mut(prev_last).next = Some(id);
            self.instrs.get_mut(id).prev = Some(prev_last);
        } else {
            self.blocks.get_mut(block).entry = Some(id);
        }
        self.blocks.get_mut(block).last = Some(id);
        if self.instrs[id].is_terminator() {
            self.blocks.get_mut(block).terminal = Some(id);
        }
        id
    }

    pub fn new_block(&mut self, owner_fn: Option<FuncId>, label: Option<String>) -> BlockId {
        self.blocks.alloc(BasicBlock::empty(owner_fn, label))
    }

    pub fn instrs_in(&self, block: BlockId) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut cur = self.blocks[block].entry;
        while let Some(id) = cur {
            out.push(id);
            cur = self.instrs[id].next;
        }
        out
    }

    /// RTTI variable for `ty`, allocating and caching it on first use
    /// (spec §4.4 `TypeInfo`, §9 "RTTI lazy materialization").
    pub fn rtti_var(&mut self, ty: TypeId) -> VarId {
        let hash = self.types.get(ty).id_hash;
        if let Some(&v) = self.rtti.get(&hash) {
            return v;
        }
        let var = self.vars.alloc(Variable {
            name: Some(format!("__rtti_{hash:x}")),
            ty,
            mutable: false,
            is_global: true,
            flags: Flags::empty(),
            rel_stack_ptr: 0,
            global_value: None,
            usage_count: 0,
            decl_inst: Id::dangling(),
        });
        self.rtti.insert(hash, var);
        var
    }
}

impl Default for Mir {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Id<T> {
    /// Placeholder used only to satisfy `Instruction::id`'s field during
    /// allocation; immediately overwritten with the real id (see
    /// `Mir::push_instr`). Never observed by any reader.
    pub(crate) fn dangling() -> Self {
        Id::from_raw(u32::MAX)
    }
}
