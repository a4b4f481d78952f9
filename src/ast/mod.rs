//! Abstract Syntax Tree definitions — the MIR Builder's input (spec §6).
//!
//! Source parsing is explicitly out of scope (spec §1 Non-goals). What
//! follows is the shape of tree a parser would hand the builder: it exists
//! so the rest of the core has something concrete to consume, and so tests
//! can build programs either by hand (`ast::builder`) or by deserializing a
//! JSON document (`serde`) standing in for "whatever the parser produced".

pub mod builder;
mod expr;

pub use expr::*;

use serde::{Deserialize, Serialize};

/// Source location: `{unit, line, column, len}` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Index of the source unit (file) this span belongs to.
    pub unit: u32,
    pub line: u32,
    pub column: u32,
    pub len: u32,
}

impl Span {
    pub const fn synthetic() -> Self {
        Self {
            unit: 0,
            line: 0,
            column: 0,
            len: 0,
        }
    }
}

/// A node paired with the source range it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn synthetic(node: T) -> Self {
        Self {
            node,
            span: Span::synthetic(),
        }
    }
}

/// A program is a sequence of top-level items, lowered one after another by
/// the MIR builder (spec §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

/// Top-level item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    FnDef(FnDef),
    ExternFnDecl(ExternFnDecl),
    StructDef(StructDef),
    EnumDef(EnumDef),
    GlobalVar(GlobalVarDecl),
}

/// Declaration-level attribute (spec §3 Variable/Function flags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    Private,
    Inline,
    NoInline,
    Test,
    CompilerIntrinsic,
}

/// Function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnDef {
    pub attributes: Vec<Attribute>,
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub ret_ty: Spanned<TypeExpr>,
    pub body: Block,
    pub span: Span,
}

/// `extern` function declaration — resolved through the FFI bridge
/// (spec §4.4.1) rather than given a MIR body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternFnDecl {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub ret_ty: Spanned<TypeExpr>,
    pub vargs: bool,
    /// Library name to search for the symbol in, e.g. `"c"`. `None` means
    /// search the process's already-loaded libraries.
    pub lib: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: Spanned<String>,
    pub fields: Vec<StructFieldDef>,
    pub is_packed: bool,
    /// Base/parent struct name, if this struct embeds one (spec §3 Type
    /// "struct ... optional base").
    pub base: Option<Spanned<String>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructFieldDef {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: Spanned<String>,
    pub base_ty: Option<Spanned<TypeExpr>>,
    pub variants: Vec<EnumVariantDef>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumVariantDef {
    pub name: Spanned<String>,
    /// Explicit discriminant, or `None` to continue the previous one + 1.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVarDecl {
    pub attributes: Vec<Attribute>,
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeExpr>>,
    pub init: Option<Spanned<Expr>>,
    pub mutable: bool,
    pub span: Span,
}

/// A block is a straight-line sequence of statements; the builder is the
/// one that turns it into basic blocks (spec §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Spanned<Expr>),
    DeclVar {
        name: Spanned<String>,
        ty: Option<Spanned<TypeExpr>>,
        init: Option<Spanned<Expr>>,
        mutable: bool,
        span: Span,
    },
    Assign {
        target: Spanned<Expr>,
        value: Spanned<Expr>,
    },
    CompoundAssign {
        target: Spanned<Expr>,
        op: BinOp,
        value: Spanned<Expr>,
    },
    If {
        cond: Spanned<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// `loop <cond> { body }`; an absent condition is an infinite loop.
    Loop {
        cond: Option<Spanned<Expr>>,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<Spanned<Expr>>),
    Block(Block),
}

/// Parsed type expression. The builder wraps every occurrence in a
/// type-resolver thunk (spec §4.2) rather than resolving it immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    Void,
    Bool,
    Int { bits: u8, signed: bool },
    Real { bits: u8 },
    StringT,
    Null,
    TypeOfTypes,
    Ptr(Box<TypeExpr>),
    Array(Box<TypeExpr>, usize),
    Slice(Box<TypeExpr>),
    VArgs,
    Fn {
        args: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
        vargs: bool,
    },
    /// Reference to a user-declared struct/enum, resolved by name during
    /// analysis (spec §4.3 "structs and enums compare by identity").
    Named(String),
}

impl TypeExpr {
    pub fn s32() -> Self {
        TypeExpr::Int {
            bits: 32,
            signed: true,
        }
    }

    pub fn ptr(inner: TypeExpr) -> Self {
        TypeExpr::Ptr(Box::new(inner))
    }
}
